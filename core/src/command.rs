use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{AdGroupId, AutopilotState, CampaignId, RunId, SettingsState, SourceId};

/// Operator-issued changes, applied by the engine before the day's jobs.
/// Variants are added over time, never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum OperatorCommand {
    SetSourceSettings {
        ad_group_id: AdGroupId,
        source_id: SourceId,
        #[serde(default)]
        cpc_cc: Option<Decimal>,
        #[serde(default)]
        cpm: Option<Decimal>,
        #[serde(default)]
        daily_budget_cc: Option<Decimal>,
        #[serde(default)]
        state: Option<SettingsState>,
    },
    SetAdGroupAutopilot {
        ad_group_id: AdGroupId,
        autopilot_state: AutopilotState,
        #[serde(default)]
        autopilot_daily_budget: Option<Decimal>,
    },
    SetCampaignLandingMode {
        campaign_id: CampaignId,
        landing_mode: bool,
    },
}

impl OperatorCommand {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SetSourceSettings { .. } => "set_source_settings",
            Self::SetAdGroupAutopilot { .. } => "set_ad_group_autopilot",
            Self::SetCampaignLandingMode { .. } => "set_campaign_landing_mode",
        }
    }
}

/// A queued operator command with its submission date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedCommand {
    pub run_id: RunId,
    pub queued_at: NaiveDate,
    pub command_id: String,
    pub command: OperatorCommand,
}
