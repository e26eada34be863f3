//! Shared primitive types used across the entire engine.

use chrono::NaiveDate;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{Deserialize, Serialize};

pub type AgencyId = i64;
pub type AccountId = i64;
pub type CampaignId = i64;
pub type AdGroupId = i64;
pub type SourceId = i64;
pub type SourceTypeId = i64;
pub type AdGroupSourceId = i64;
pub type CreditId = i64;
pub type BudgetId = i64;

/// The canonical run identifier.
pub type RunId = String;

/// Monetary amount in nano units (value × 10⁹).
pub type Nano = i64;

const NANO_SCALE: u32 = 9;

pub fn nano_to_decimal(nano: Nano) -> Decimal {
    Decimal::new(nano, NANO_SCALE)
}

/// Convert to nano units, truncating anything below 10⁻⁹.
/// Saturates at the i64 range.
pub fn decimal_to_nano(value: Decimal) -> Nano {
    (value * Decimal::from(1_000_000_000i64))
        .trunc()
        .to_i64()
        .unwrap_or(if value.is_sign_negative() { Nano::MIN } else { Nano::MAX })
}

/// Inclusive number of days in `[start, end]`; zero when the range is empty.
pub fn days_inclusive(start: NaiveDate, end: NaiveDate) -> i64 {
    ((end - start).num_days() + 1).max(0)
}

/// Inclusive day count of the intersection of two date ranges.
pub fn overlap_days(
    a_start: NaiveDate,
    a_end: NaiveDate,
    b_start: NaiveDate,
    b_end: NaiveDate,
) -> i64 {
    days_inclusive(a_start.max(b_start), a_end.min(b_end))
}

/// Dimension projections are grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Breakdown {
    Account,
    Campaign,
}

/// Run state shared by ad groups and ad group sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsState {
    Active,
    Inactive,
}

impl SettingsState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutopilotState {
    Inactive,
    /// Autopilot adjusts bids only.
    ActiveCpc,
    /// Autopilot adjusts bids and redistributes the daily budget.
    ActiveCpcBudget,
}

impl AutopilotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::ActiveCpc => "active_cpc",
            Self::ActiveCpcBudget => "active_cpc_budget",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inactive" => Some(Self::Inactive),
            "active_cpc" => Some(Self::ActiveCpc),
            "active_cpc_budget" => Some(Self::ActiveCpcBudget),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Inactive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn nano_conversion_is_exact() {
        assert_eq!(nano_to_decimal(17_500_000_000), dec!(17.5));
        assert_eq!(decimal_to_nano(dec!(17.5)), 17_500_000_000);
        assert_eq!(decimal_to_nano(dec!(0.0000000019)), 1);
    }

    #[test]
    fn overlap_counts_inclusive_days() {
        assert_eq!(overlap_days(d(2015, 11, 1), d(2015, 11, 30), d(2015, 11, 10), d(2015, 12, 5)), 21);
        assert_eq!(overlap_days(d(2015, 11, 1), d(2015, 11, 5), d(2015, 11, 6), d(2015, 11, 9)), 0);
        assert_eq!(days_inclusive(d(2015, 11, 1), d(2015, 11, 1)), 1);
    }
}
