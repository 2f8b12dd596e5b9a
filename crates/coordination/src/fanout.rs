//! Follow-up writes issued after a pool or slot commit.
//!
//! Each child schedule is written in its own unit, so one stale or started
//! occurrence never blocks the rest.

use chrono::{DateTime, Utc};
use common::{Actor, AggregateId};
use domain::{
    Aggregate, Booking, CommandHandler, DomainError, RecurrenceGroup, Schedule, ScheduleError,
    UnitOfWork,
};
use event_store::EventStore;
use projections::EventDispatcher;

use crate::Result;

/// Outcome of a fan-out over child schedules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub updated: usize,
    /// Children that were already past, over, or already matched.
    pub skipped: usize,
    pub failed: usize,
}

fn is_skippable(err: &DomainError) -> bool {
    matches!(
        err,
        DomainError::Schedule(
            ScheduleError::CannotChangePastSchedule | ScheduleError::InvalidStatus { .. }
        )
    )
}

/// Copies the pool's remaining seats and status onto every child.
#[tracing::instrument(skip_all, fields(group_id = ?group.id()))]
pub async fn mirror_children<S: EventStore + Clone>(
    store: &S,
    dispatcher: &EventDispatcher<S>,
    group: &RecurrenceGroup,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<FanOutReport> {
    let schedules: CommandHandler<S, Schedule> = CommandHandler::new(store.clone());
    let remaining = group.remaining_capacity();
    let status = group.status();
    let mut report = FanOutReport::default();

    for child in group.children() {
        let result = schedules
            .execute(child.schedule_id, now, |s| {
                s.mirror_from_group(remaining, status, actor.clone(), now)
            })
            .await;

        match result {
            Ok(result) if result.committed.is_empty() => report.skipped += 1,
            Ok(result) => match dispatcher.dispatch(&result.committed).await {
                Ok(_) => report.updated += 1,
                Err(err) => {
                    tracing::error!(
                        schedule_id = %child.schedule_id,
                        error = %err,
                        "mirror committed but audit dispatch failed"
                    );
                    metrics::counter!("integration_dispatch_failures_total", "handler" => "audit")
                        .increment(1);
                    report.failed += 1;
                }
            },
            Err(err) if is_skippable(&err) => report.skipped += 1,
            Err(err) => {
                tracing::warn!(schedule_id = %child.schedule_id, error = %err, "mirror failed");
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        updated = report.updated,
        skipped = report.skipped,
        failed = report.failed,
        "pool mirrored onto occurrences"
    );
    Ok(report)
}

/// Loads the bookings attached to a schedule.
///
/// Seat holders for standalone and routine slots; for curriculum occurrences,
/// the enrolled members' bookings on that occurrence.
pub async fn bookings_on<S: EventStore + Clone>(
    store: &S,
    schedule: &Schedule,
    group: Option<&RecurrenceGroup>,
) -> Result<Vec<(AggregateId, Booking)>> {
    let bookings: CommandHandler<S, Booking> = CommandHandler::new(store.clone());
    let schedule_id = schedule.id();
    let mut found = Vec::new();

    let candidates: Vec<AggregateId> = match group {
        Some(group) if schedule.is_curriculum() => group
            .enrollments()
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect(),
        _ => schedule.holders().collect(),
    };

    for booking_id in candidates {
        let booking = bookings.load_required(booking_id).await?;
        if booking.schedule_id() == schedule_id && !booking.is_terminal() {
            found.push((booking_id, booking));
        }
    }
    Ok(found)
}

/// Cancels one child occurrence and every live booking on it.
pub async fn withdraw_child<S: EventStore + Clone>(
    store: &S,
    dispatcher: &EventDispatcher<S>,
    schedule_id: AggregateId,
    group: &RecurrenceGroup,
    actor: &Actor,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<usize> {
    let schedules: CommandHandler<S, Schedule> = CommandHandler::new(store.clone());
    let mut schedule = schedules.load_required(schedule_id).await?;

    let cancelled = schedule
        .cancel(true, chrono::Duration::zero(), actor.clone(), reason.clone(), now)
        .map_err(DomainError::from)?;
    let mut attached = bookings_on(store, &schedule, Some(group)).await?;

    let mut unit = UnitOfWork::new(now);
    unit.record(schedule_id, &mut schedule, cancelled)?;
    for (booking_id, booking) in attached.iter_mut() {
        let events = booking
            .cancel_by_provider(actor.clone(), reason.clone(), now)
            .map_err(DomainError::from)?;
        unit.record(*booking_id, booking, events)?;
    }

    let committed = unit.commit(store).await?;
    dispatcher.dispatch(&committed).await?;
    Ok(attached.len())
}
