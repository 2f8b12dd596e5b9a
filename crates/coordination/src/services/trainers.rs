//! Trainer identity port and in-memory implementation.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::TrainerId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("{trainer_id} is not an active trainer")]
    NotAuthority { trainer_id: TrainerId },
}

#[async_trait]
pub trait TrainerValidator: Send + Sync {
    async fn validate_trainer(&self, trainer_id: TrainerId) -> Result<(), TrainerError>;
}

/// In-memory trainer roster.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTrainerValidator {
    trainers: Arc<RwLock<HashSet<TrainerId>>>,
}

impl InMemoryTrainerValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, trainer_id: TrainerId) {
        self.trainers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(trainer_id);
    }
}

#[async_trait]
impl TrainerValidator for InMemoryTrainerValidator {
    async fn validate_trainer(&self, trainer_id: TrainerId) -> Result<(), TrainerError> {
        let trainers = self.trainers.read().unwrap_or_else(PoisonError::into_inner);
        if !trainers.contains(&trainer_id) {
            return Err(TrainerError::NotAuthority { trainer_id });
        }
        Ok(())
    }
}
