//! Membership validator port and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::UserId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("Member {user_id} has no active membership")]
    NotActive { user_id: UserId },

    #[error("Membership of {user_id} ends at {active_until}, before {required}")]
    InsufficientPeriod {
        user_id: UserId,
        active_until: DateTime<Utc>,
        required: DateTime<Utc>,
    },
}

#[async_trait]
pub trait MembershipValidator: Send + Sync {
    /// Fails unless the member is active through `required`.
    async fn validate_active_until(
        &self,
        user_id: UserId,
        required: DateTime<Utc>,
    ) -> Result<(), MembershipError>;
}

/// In-memory membership periods.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMembershipValidator {
    active_until: Arc<RwLock<HashMap<UserId, DateTime<Utc>>>>,
}

impl InMemoryMembershipValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&self, user_id: UserId, until: DateTime<Utc>) {
        self.active_until
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id, until);
    }
}

#[async_trait]
impl MembershipValidator for InMemoryMembershipValidator {
    async fn validate_active_until(
        &self,
        user_id: UserId,
        required: DateTime<Utc>,
    ) -> Result<(), MembershipError> {
        let periods = self.active_until.read().unwrap_or_else(PoisonError::into_inner);
        let active_until = *periods
            .get(&user_id)
            .ok_or(MembershipError::NotActive { user_id })?;

        if active_until < required {
            return Err(MembershipError::InsufficientPeriod {
                user_id,
                active_until,
                required,
            });
        }
        Ok(())
    }
}
