//! Events emitted by the daily jobs.
//!
//! RULE: Every decision a job makes is recorded as an event.
//! The engine persists each one to the event log as JSON.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{AdGroupId, CampaignId, RunId, SourceId};

/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PacingEvent {
    // ── Engine events ──────────────────────────────
    DayStarted {
        date: NaiveDate,
    },
    DayCompleted {
        date: NaiveDate,
    },
    RunInitialized {
        run_id: RunId,
        start_date: NaiveDate,
    },

    // ── Operator commands ──────────────────────────
    OperatorCommandApplied {
        date: NaiveDate,
        command_id: String,
        command_type: String,
    },
    OperatorCommandRejected {
        date: NaiveDate,
        command_id: String,
        command_type: String,
        reason: String,
    },

    // ── Autopilot ──────────────────────────────────
    AutopilotSourceUpdated {
        date: NaiveDate,
        ad_group_id: AdGroupId,
        source_id: SourceId,
        previous_cpc: Option<Decimal>,
        new_cpc: Option<Decimal>,
        previous_daily_budget: Option<Decimal>,
        new_daily_budget: Option<Decimal>,
    },
    AutopilotSourceSkipped {
        date: NaiveDate,
        ad_group_id: AdGroupId,
        source_id: SourceId,
        reason: String,
    },
    AutopilotAdGroupSkipped {
        date: NaiveDate,
        ad_group_id: AdGroupId,
        reason: String,
    },
    AutopilotNotificationFailed {
        date: NaiveDate,
        campaign_id: CampaignId,
        error: String,
    },

    // ── Audit ──────────────────────────────────────
    AuditAlarmRaised {
        date: NaiveDate,
        audit: String,
        detail: String,
    },
    DailyAuditCompleted {
        date: NaiveDate,
        alarm_count: usize,
        digest_sent: bool,
    },
}

impl PacingEvent {
    /// Stable name for the event_type column in event_log.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::DayStarted { .. } => "day_started",
            Self::DayCompleted { .. } => "day_completed",
            Self::RunInitialized { .. } => "run_initialized",
            Self::OperatorCommandApplied { .. } => "operator_command_applied",
            Self::OperatorCommandRejected { .. } => "operator_command_rejected",
            Self::AutopilotSourceUpdated { .. } => "autopilot_source_updated",
            Self::AutopilotSourceSkipped { .. } => "autopilot_source_skipped",
            Self::AutopilotAdGroupSkipped { .. } => "autopilot_ad_group_skipped",
            Self::AutopilotNotificationFailed { .. } => "autopilot_notification_failed",
            Self::AuditAlarmRaised { .. } => "audit_alarm_raised",
            Self::DailyAuditCompleted { .. } => "daily_audit_completed",
        }
    }
}

/// A persisted event log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    pub date: NaiveDate,
    pub subsystem: String,
    pub event_type: String,
    pub payload: String,
}
