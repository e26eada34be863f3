//! The daily job engine.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   0. Queued operator commands
//!   1. Autopilot subsystem
//!   2. Daily audit subsystem
//!
//! RULES:
//!   - Subsystems execute in registration order, once per day.
//!   - Operator commands are applied before any subsystem runs; a rejected
//!     command becomes an event, never an error.
//!   - Each command runs in one transaction, follow-up reallocation included.
//!   - No subsystem calls another subsystem's functions directly.
//!   - Every event is recorded in the event log.

use chrono::NaiveDate;

use crate::{
    audit_subsystem::{Alarm, DailyAuditSubsystem},
    autopilot_subsystem::{reallocate_ad_group, AutopilotSubsystem},
    clock::JobClock,
    command::{OperatorCommand, QueuedCommand},
    config::PacingConfig,
    error::{PacingError, PacingResult},
    event::{EventLogEntry, PacingEvent},
    notification::{Notifier, OutboxNotifier},
    settings_writer::{
        AdGroupSettingsWriter, AdGroupSourceSettingsWriter, SetOptions, SourceSettingsChanges,
    },
    store::PacingStore,
    subsystem::{JobContext, PacingSubsystem},
    types::{AutopilotState, RunId, SettingsState},
};

const ENGINE: &str = "engine";
const OPERATOR: &str = "operator";

pub struct PacingEngine {
    pub run_id: RunId,
    pub clock: JobClock,
    pub store: PacingStore,
    pub config: PacingConfig,
    notifier: Box<dyn Notifier>,
    subsystems: Vec<Box<dyn PacingSubsystem>>,
    pending_commands: Vec<QueuedCommand>,
    command_seq: u64,
    initialized: bool,
}

impl PacingEngine {
    /// An engine with no subsystems. Registers the run and seeds the
    /// source type catalog into the store.
    pub fn new(
        run_id: RunId,
        store: PacingStore,
        config: PacingConfig,
        notifier: Box<dyn Notifier>,
        start_date: NaiveDate,
    ) -> PacingResult<Self> {
        store.insert_run(&run_id, env!("CARGO_PKG_VERSION"), start_date)?;
        for st in config.source_types_sorted() {
            store.upsert_source_type(st)?;
        }
        Ok(Self {
            clock: JobClock::new(run_id.clone(), start_date),
            run_id,
            store,
            config,
            notifier,
            subsystems: Vec::new(),
            pending_commands: Vec::new(),
            command_seq: 0,
            initialized: false,
        })
    }

    /// Build a fully wired engine with all subsystems registered.
    /// Call this instead of new() + manual register() calls.
    pub fn build(
        run_id: RunId,
        store: PacingStore,
        config: PacingConfig,
        notifier: Box<dyn Notifier>,
        start_date: NaiveDate,
    ) -> PacingResult<Self> {
        let mut engine = Self::new(run_id, store, config, notifier, start_date)?;
        // Fixed execution order.
        engine.register(Box::new(AutopilotSubsystem::new()));
        engine.register(Box::new(DailyAuditSubsystem::new()));
        Ok(engine)
    }

    /// In-memory store, test config and the outbox notifier.
    pub fn build_test(run_id: RunId, start_date: NaiveDate) -> PacingResult<Self> {
        let store = PacingStore::in_memory()?;
        store.migrate()?;
        Self::build(
            run_id,
            store,
            PacingConfig::default_test(),
            Box::new(OutboxNotifier),
            start_date,
        )
    }

    /// Register a subsystem. Call in the documented execution order.
    pub fn register(&mut self, subsystem: Box<dyn PacingSubsystem>) {
        self.subsystems.push(subsystem);
    }

    /// Queue an operator command for the next run_day(). Returns its id.
    pub fn submit_command(&mut self, command: OperatorCommand) -> String {
        self.command_seq += 1;
        let command_id = format!("cmd-{}-{}", self.clock.today, self.command_seq);
        self.pending_commands.push(QueuedCommand {
            run_id: self.run_id.clone(),
            queued_at: self.clock.today,
            command_id: command_id.clone(),
            command,
        });
        command_id
    }

    /// Run one day: commands, then every subsystem, then advance the clock.
    pub fn run_day(&mut self) -> PacingResult<Vec<PacingEvent>> {
        let date = self.clock.today;
        let created_dt = self.clock.created_dt();

        if !self.initialized {
            let init = PacingEvent::RunInitialized {
                run_id: self.run_id.clone(),
                start_date: date,
            };
            persist(&self.store, &self.run_id, date, ENGINE, &init)?;
            self.initialized = true;
        }

        let mut day_events = vec![PacingEvent::DayStarted { date }];

        let commands = std::mem::take(&mut self.pending_commands);
        for queued in commands {
            let command_type = queued.command.type_name().to_string();
            // A rejected command leaves no partial writes behind.
            let applied = self
                .store
                .transaction(|_| self.apply_command(&queued.command, created_dt));
            let event = match applied {
                Ok(()) => PacingEvent::OperatorCommandApplied {
                    date,
                    command_id: queued.command_id,
                    command_type,
                },
                Err(e) if is_rejection(&e) => {
                    log::warn!("command {} rejected: {e}", queued.command_id);
                    PacingEvent::OperatorCommandRejected {
                        date,
                        command_id: queued.command_id,
                        command_type,
                        reason: e.to_string(),
                    }
                }
                Err(e) => return Err(e),
            };
            day_events.push(event);
        }
        for event in &day_events {
            persist(&self.store, &self.run_id, date, ENGINE, event)?;
        }

        let ctx = JobContext {
            run_id: &self.run_id,
            date,
            created_dt,
            store: &self.store,
            config: &self.config,
            notifier: self.notifier.as_ref(),
        };

        // Each subsystem sees all events emitted so far today.
        for subsystem in &mut self.subsystems {
            let new_events = subsystem.update(&ctx, &day_events)?;
            for event in &new_events {
                persist(&self.store, &self.run_id, date, subsystem.name(), event)?;
            }
            day_events.extend(new_events);
        }

        let completed = PacingEvent::DayCompleted { date };
        persist(&self.store, &self.run_id, date, ENGINE, &completed)?;
        day_events.push(completed);

        self.clock.advance();
        Ok(day_events)
    }

    /// Run n days in a loop.
    pub fn run_days(&mut self, n: u64) -> PacingResult<()> {
        for _ in 0..n {
            self.run_day()?;
        }
        Ok(())
    }

    pub fn events_for_date(&self, date: NaiveDate) -> PacingResult<Vec<EventLogEntry>> {
        self.store.events_for_date(&self.run_id, date)
    }

    pub fn autopilot(&self) -> Option<&AutopilotSubsystem> {
        self.subsystems
            .iter()
            .find_map(|s| s.as_any().downcast_ref::<AutopilotSubsystem>())
    }

    /// Alarms of the most recent daily audit.
    pub fn last_alarms(&self) -> &[Alarm] {
        self.subsystems
            .iter()
            .find_map(|s| s.as_any().downcast_ref::<DailyAuditSubsystem>())
            .map_or(&[], |audit| audit.last_alarms.as_slice())
    }

    fn apply_command(
        &self,
        command: &OperatorCommand,
        created_dt: chrono::NaiveDateTime,
    ) -> PacingResult<()> {
        let opts = SetOptions::operator(OPERATOR, created_dt);
        match command {
            OperatorCommand::SetSourceSettings {
                ad_group_id,
                source_id,
                cpc_cc,
                cpm,
                daily_budget_cc,
                state,
            } => {
                let ags = self.store.get_ad_group_source(*ad_group_id, *source_id)?;
                let changes = SourceSettingsChanges {
                    cpc_cc: *cpc_cc,
                    cpm: *cpm,
                    daily_budget_cc: *daily_budget_cc,
                    state: *state,
                };
                let outcome = AdGroupSourceSettingsWriter::new(&self.store, &self.config)
                    .set(ags.id, &changes, &opts)?;
                if outcome.is_written() && *state == Some(SettingsState::Active) {
                    self.reallocate_if_budget_autopilot(*ad_group_id, created_dt)?;
                }
            }
            OperatorCommand::SetAdGroupAutopilot {
                ad_group_id,
                autopilot_state,
                autopilot_daily_budget,
            } => {
                let outcome = AdGroupSettingsWriter::new(&self.store, &self.config).set_autopilot(
                    *ad_group_id,
                    *autopilot_state,
                    *autopilot_daily_budget,
                    &opts,
                )?;
                if outcome.is_written() {
                    self.reallocate_if_budget_autopilot(*ad_group_id, created_dt)?;
                }
            }
            OperatorCommand::SetCampaignLandingMode {
                campaign_id,
                landing_mode,
            } => {
                self.store.set_campaign_landing_mode(*campaign_id, *landing_mode)?;
                log::info!("campaign {campaign_id}: landing mode {landing_mode}");
            }
        }
        Ok(())
    }

    fn reallocate_if_budget_autopilot(
        &self,
        ad_group_id: i64,
        created_dt: chrono::NaiveDateTime,
    ) -> PacingResult<()> {
        let on_budget_autopilot = self
            .store
            .current_ad_group_settings(ad_group_id)?
            .is_some_and(|s| s.autopilot_state == AutopilotState::ActiveCpcBudget);
        if on_budget_autopilot {
            reallocate_ad_group(&self.store, &self.config, ad_group_id, created_dt)?;
        }
        Ok(())
    }
}

/// Operator mistakes are reported back as events; anything else aborts
/// the day.
fn is_rejection(e: &PacingError) -> bool {
    e.is_validation()
        || matches!(
            e,
            PacingError::NotFound { .. } | PacingError::MissingSettings { .. }
        )
}

fn persist(
    store: &PacingStore,
    run_id: &RunId,
    date: NaiveDate,
    subsystem: &str,
    event: &PacingEvent,
) -> PacingResult<()> {
    let entry = EventLogEntry {
        id: None,
        run_id: run_id.clone(),
        date,
        subsystem: subsystem.to_string(),
        event_type: event.type_name().to_string(),
        payload: serde_json::to_string(event)?,
    };
    store.append_event(&entry)
}
