//! Subsystem trait and the context handed to each daily run.
//!
//! RULE: Every daily job implements PacingSubsystem.
//! The engine calls update() on each registered subsystem
//! in registration order, once per day.
//! Execution order is fixed and documented in engine.rs.

use chrono::{NaiveDate, NaiveDateTime};
use std::any::Any;

use crate::{
    config::PacingConfig,
    error::PacingResult,
    event::PacingEvent,
    notification::Notifier,
    store::PacingStore,
    types::RunId,
};

/// Everything a subsystem may touch during one run.
pub struct JobContext<'a> {
    pub run_id: &'a RunId,
    pub date: NaiveDate,
    /// Timestamp for every row written during this run.
    pub created_dt: NaiveDateTime,
    pub store: &'a PacingStore,
    pub config: &'a PacingConfig,
    pub notifier: &'a dyn Notifier,
}

/// The contract every subsystem must fulfill.
pub trait PacingSubsystem: Send {
    /// Unique stable name for this subsystem.
    fn name(&self) -> &'static str;

    /// Called once per day by the engine.
    ///
    /// - `ctx`:       date, store and collaborators for this run
    /// - `events_in`: events emitted by earlier subsystems today
    ///
    /// Returns a vec of new events to add to the day's event log.
    fn update(
        &mut self,
        ctx: &JobContext<'_>,
        events_in: &[PacingEvent],
    ) -> PacingResult<Vec<PacingEvent>>;

    /// For downcasting in tests and tooling only.
    fn as_any(&self) -> &dyn Any;
}
