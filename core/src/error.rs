use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{AdGroupId, AdGroupSourceId, BudgetId};

#[derive(Error, Debug)]
pub enum PacingError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Ad group source {ad_group_source_id} has no settings")]
    MissingSettings { ad_group_source_id: AdGroupSourceId },

    // ── Settings validation ────────────────────────
    #[error("Minimum CPC on this source is ${limit} (got ${value})")]
    MinimalCpcTooLow { value: Decimal, limit: Decimal },

    #[error("Maximum CPC on this source is ${limit} (got ${value})")]
    MaximalCpcTooHigh { value: Decimal, limit: Decimal },

    #[error("This source does not support CPM bidding")]
    CannotSetCpm { value: Decimal },

    #[error("Minimum CPM on this source is ${limit} (got ${value})")]
    MinimalCpmTooLow { value: Decimal, limit: Decimal },

    #[error("Maximum CPM on this source is ${limit} (got ${value})")]
    MaximalCpmTooHigh { value: Decimal, limit: Decimal },

    #[error("Minimum daily budget on this source is ${limit} (got ${value})")]
    MinimalDailyBudgetTooLow { value: Decimal, limit: Decimal },

    #[error("Maximum daily budget on this source is ${limit} (got ${value})")]
    MaximalDailyBudgetTooHigh { value: Decimal, limit: Decimal },

    #[error("Autopilot daily budget must be at least ${limit} (got ${value})")]
    AutopilotDailyBudgetTooLow { value: Decimal, limit: Decimal },

    #[error("Budget autopilot requires a daily budget")]
    AutopilotDailyBudgetMissing,

    #[error("Settings of ad group {ad_group_id} are frozen while its campaign is in landing mode")]
    CannotChangeInLandingMode { ad_group_id: AdGroupId },

    // ── Integrity ──────────────────────────────────
    #[error("Budget {budget_id} already has spend; its amount can no longer change")]
    BudgetAmountLocked { budget_id: BudgetId },

    #[error("Settings of ad group source {ad_group_source_id} changed concurrently (expected version {expected}, found {found})")]
    ConcurrentSettingsChange {
        ad_group_source_id: AdGroupSourceId,
        expected: i64,
        found: i64,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PacingError {
    /// True for errors caused by operator input rather than the system.
    /// These are reported back to the operator, never propagated.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MinimalCpcTooLow { .. }
                | Self::MaximalCpcTooHigh { .. }
                | Self::CannotSetCpm { .. }
                | Self::MinimalCpmTooLow { .. }
                | Self::MaximalCpmTooHigh { .. }
                | Self::MinimalDailyBudgetTooLow { .. }
                | Self::MaximalDailyBudgetTooHigh { .. }
                | Self::AutopilotDailyBudgetTooLow { .. }
                | Self::AutopilotDailyBudgetMissing
                | Self::CannotChangeInLandingMode { .. }
                | Self::BudgetAmountLocked { .. }
                | Self::ConcurrentSettingsChange { .. }
        )
    }
}

pub type PacingResult<T> = Result<T, PacingError>;
