//! Audits.
//!
//! RULE: audits only read. Anything they find is reported for a human to
//! act on; nothing here corrects data.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::{
    autopilot_subsystem::get_active_ad_groups_on_autopilot,
    budget_loader::ProjectionFilter,
    clock::{days_before, previous_day},
    config::AutopilotConfig,
    error::PacingResult,
    projections::CurrentMonthBudgetProjections,
    store::{PacingStore, SpendTotals},
    types::{
        nano_to_decimal, AdGroupId, AutopilotState, Breakdown, CampaignId, Nano, SettingsState,
        SourceId,
    },
};

// ── Spend integrity ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpendIntegrityAlarm {
    pub metric: &'static str,
    pub statements_nano: Nano,
    pub warehouse_nano: Nano,
}

impl SpendIntegrityAlarm {
    pub fn diff_nano(&self) -> Nano {
        self.statements_nano - self.warehouse_nano
    }
}

fn metrics(t: &SpendTotals) -> [(&'static str, Nano); 4] {
    [
        ("media_spend", t.media_spend_nano),
        ("data_spend", t.data_spend_nano),
        ("license_fee", t.license_fee_nano),
        ("margin", t.margin_nano),
    ]
}

/// Daily statements and the warehouse must agree on every cost metric.
pub fn audit_spend_integrity(
    store: &PacingStore,
    date: NaiveDate,
    max_err_nano: Nano,
) -> PacingResult<Vec<SpendIntegrityAlarm>> {
    let statements = store.statement_totals_for_date(date)?;
    let warehouse = store.warehouse_totals_for_date(date)?;

    Ok(metrics(&statements)
        .into_iter()
        .zip(metrics(&warehouse))
        .filter(|((_, s), (_, w))| (s - w).abs() > max_err_nano)
        .map(|((metric, s), (_, w))| SpendIntegrityAlarm {
            metric,
            statements_nano: s,
            warehouse_nano: w,
        })
        .collect())
}

// ── Spend patterns ────────────────────────────────────────────────

/// Day-over-day spend drops. Returns `(day, spend(day) / spend(day - 1))`
/// for each of the last `day_range` days ending at `date` whose ratio falls
/// under the threshold. The first of a month uses its own threshold.
pub fn audit_spend_patterns(
    store: &PacingStore,
    date: NaiveDate,
    threshold: Decimal,
    first_in_month_threshold: Decimal,
    day_range: u32,
) -> PacingResult<Vec<(NaiveDate, Decimal)>> {
    let mut alarms = Vec::new();
    for offset in (0..u64::from(day_range)).rev() {
        let day = days_before(date, offset);
        let prev_spend = store.statement_spend_for_date(previous_day(day))?;
        if prev_spend <= 0 {
            continue;
        }
        let spend = store.statement_spend_for_date(day)?;
        let ratio = nano_to_decimal(spend) / nano_to_decimal(prev_spend);
        let limit = if day.day() == 1 {
            first_in_month_threshold
        } else {
            threshold
        };
        if ratio < limit {
            alarms.push((day, ratio));
        }
    }
    Ok(alarms)
}

// ── Pacing ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingAlarmKind {
    Low,
    High,
}

impl PacingAlarmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::High => "high",
        }
    }
}

/// Campaigns whose current-month pacing at `date` is outside
/// `[min_pacing, max_pacing]`. Pacing is rounded to 4 decimal places.
pub fn audit_pacing(
    store: &PacingStore,
    date: NaiveDate,
    min_pacing: Decimal,
    max_pacing: Decimal,
    filter: &ProjectionFilter,
) -> PacingResult<Vec<(CampaignId, Decimal, PacingAlarmKind)>> {
    let projections =
        CurrentMonthBudgetProjections::new(store, date, Breakdown::Campaign, filter, &[])?;
    let mut alarms = Vec::new();
    for (campaign_id, row) in projections.rows() {
        let Some(pacing) = row.pacing else { continue };
        let pacing = pacing.round_dp(4);
        if pacing < min_pacing {
            alarms.push((*campaign_id, pacing, PacingAlarmKind::Low));
        } else if pacing > max_pacing {
            alarms.push((*campaign_id, pacing, PacingAlarmKind::High));
        }
    }
    Ok(alarms)
}

// ── Autopilot ─────────────────────────────────────────────────────

/// Eligible ad groups with active sources that autopilot did not process
/// on `date`.
pub fn audit_autopilot_ad_groups(
    store: &PacingStore,
    date: NaiveDate,
) -> PacingResult<Vec<AdGroupId>> {
    let mut missing = Vec::new();
    for eligible in get_active_ad_groups_on_autopilot(store, date)? {
        let ad_group_id = eligible.ad_group.id;
        let has_active_source = store
            .ad_group_source_states(ad_group_id)?
            .iter()
            .any(|s| s.settings.state == SettingsState::Active);
        if has_active_source && !store.has_autopilot_log(ad_group_id, date)? {
            missing.push(ad_group_id);
        }
    }
    Ok(missing)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpcChangeAlarm {
    pub ad_group_id: AdGroupId,
    pub source_id: SourceId,
    pub previous_cpc: Option<Decimal>,
    pub new_cpc: Decimal,
}

/// Autopilot bids outside the platform range, or moved by more than the
/// tolerated fraction in one run.
pub fn audit_autopilot_cpc_changes(
    store: &PacingStore,
    date: NaiveDate,
    config: &AutopilotConfig,
) -> PacingResult<Vec<CpcChangeAlarm>> {
    let mut alarms = Vec::new();
    for log_row in store.autopilot_logs_for_date(date)? {
        let Some(new_cpc) = log_row.new_cpc_cc else { continue };
        let out_of_range = new_cpc < config.min_cpc || new_cpc > config.max_cpc;
        let too_far = match log_row.previous_cpc_cc {
            Some(prev) if prev > Decimal::ZERO => {
                (new_cpc - prev).abs() / prev > config.max_cpc_change_perc
            }
            _ => false,
        };
        if out_of_range || too_far {
            alarms.push(CpcChangeAlarm {
                ad_group_id: log_row.ad_group_id,
                source_id: log_row.source_id,
                previous_cpc: log_row.previous_cpc_cc,
                new_cpc,
            });
        }
    }
    Ok(alarms)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetTotalsAlarm {
    pub ad_group_id: AdGroupId,
    pub autopilot_daily_budget: Decimal,
    pub sources_total: Decimal,
}

/// Budget-autopilot ad groups whose active sources' daily budgets do not
/// add up to the autopilot daily budget.
pub fn audit_autopilot_budget_totals(
    store: &PacingStore,
    date: NaiveDate,
    epsilon: Decimal,
) -> PacingResult<Vec<BudgetTotalsAlarm>> {
    let mut alarms = Vec::new();
    for eligible in get_active_ad_groups_on_autopilot(store, date)? {
        if eligible.settings.autopilot_state != AutopilotState::ActiveCpcBudget {
            continue;
        }
        let autopilot_daily_budget = eligible.settings.autopilot_daily_budget.unwrap_or_default();
        let sources_total: Decimal = store
            .ad_group_source_states(eligible.ad_group.id)?
            .iter()
            .filter(|s| s.settings.state == SettingsState::Active)
            .filter_map(|s| s.settings.daily_budget_cc)
            .sum();
        if (sources_total - autopilot_daily_budget).abs() > epsilon {
            alarms.push(BudgetTotalsAlarm {
                ad_group_id: eligible.ad_group.id,
                autopilot_daily_budget,
                sources_total,
            });
        }
    }
    Ok(alarms)
}

/// Budget-autopilot decisions logged on `date` whose new budgets do not
/// add up to the ad group's autopilot daily budget.
pub fn audit_autopilot_budget_changes(
    store: &PacingStore,
    date: NaiveDate,
    epsilon: Decimal,
) -> PacingResult<Vec<BudgetTotalsAlarm>> {
    let mut totals: BTreeMap<AdGroupId, Decimal> = BTreeMap::new();
    for log_row in store.autopilot_logs_for_date(date)? {
        if log_row.autopilot_type != AutopilotState::ActiveCpcBudget {
            continue;
        }
        let budget = log_row
            .new_daily_budget
            .or(log_row.previous_daily_budget)
            .unwrap_or_default();
        *totals.entry(log_row.ad_group_id).or_default() += budget;
    }

    let mut alarms = Vec::new();
    for (ad_group_id, sources_total) in totals {
        let Some(settings) = store.current_ad_group_settings(ad_group_id)? else {
            continue;
        };
        let autopilot_daily_budget = settings.autopilot_daily_budget.unwrap_or_default();
        if (sources_total - autopilot_daily_budget).abs() > epsilon {
            alarms.push(BudgetTotalsAlarm {
                ad_group_id,
                autopilot_daily_budget,
                sources_total,
            });
        }
    }
    Ok(alarms)
}
