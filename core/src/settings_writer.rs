//! Validating, copy-on-write settings writers.
//!
//! RULE: settings rows are never edited. Every change appends a new row
//! that copies the current one and replaces only the changed fields.
//! All validation happens before anything is written.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;

use crate::{
    config::{AutopilotConfig, PacingConfig, SourceType},
    error::{PacingError, PacingResult},
    store::{AdGroupSettingsRow, PacingStore, SourceSettingsRow},
    types::{AdGroupId, AdGroupSourceId, AutopilotState, SettingsState},
};

/// Fields to change. `None` leaves the current value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceSettingsChanges {
    pub cpc_cc: Option<Decimal>,
    pub cpm: Option<Decimal>,
    pub daily_budget_cc: Option<Decimal>,
    pub state: Option<SettingsState>,
}

impl SourceSettingsChanges {
    pub fn is_empty(&self) -> bool {
        self.cpc_cc.is_none()
            && self.cpm.is_none()
            && self.daily_budget_cc.is_none()
            && self.state.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetOptions {
    pub changed_by: String,
    /// Version the caller based its decision on. A different current
    /// version fails the write with `ConcurrentSettingsChange`.
    pub expected_previous_id: Option<i64>,
    pub created_dt: NaiveDateTime,
    /// System writes (autopilot) bypass the landing-mode freeze.
    pub system: bool,
}

impl SetOptions {
    pub fn operator(changed_by: &str, created_dt: NaiveDateTime) -> Self {
        Self {
            changed_by: changed_by.to_string(),
            expected_previous_id: None,
            created_dt,
            system: false,
        }
    }

    pub fn system(changed_by: &str, created_dt: NaiveDateTime, expected: Option<i64>) -> Self {
        Self {
            changed_by: changed_by.to_string(),
            expected_previous_id: expected,
            created_dt,
            system: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome<T> {
    /// A new version was appended.
    Written(T),
    /// Nothing differed; the current version is returned as-is.
    Unchanged(T),
}

impl<T> WriteOutcome<T> {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written(_))
    }

    pub fn row(&self) -> &T {
        match self {
            Self::Written(row) | Self::Unchanged(row) => row,
        }
    }

    pub fn into_row(self) -> T {
        match self {
            Self::Written(row) | Self::Unchanged(row) => row,
        }
    }
}

/// Daily budget floor of a source. Budget autopilot raises it to the
/// platform-wide minimum.
pub fn source_min_daily_budget(
    source_type: &SourceType,
    autopilot_state: AutopilotState,
    config: &AutopilotConfig,
) -> Decimal {
    if autopilot_state == AutopilotState::ActiveCpcBudget {
        source_type.min_daily_budget.max(config.budget_ap_min_source_budget)
    } else {
        source_type.min_daily_budget
    }
}

pub fn source_min_cpc(source_type: &SourceType, config: &AutopilotConfig) -> Decimal {
    source_type.min_cpc.max(config.min_cpc)
}

/// Sum of the budget-autopilot floors of every active source of an ad
/// group, counting `extra` as active too.
fn active_sources_floor(
    store: &PacingStore,
    config: &AutopilotConfig,
    ad_group_id: AdGroupId,
    extra: Option<AdGroupSourceId>,
) -> PacingResult<Decimal> {
    let mut total = Decimal::ZERO;
    for s in store.ad_group_source_states(ad_group_id)? {
        let active = s.settings.state == SettingsState::Active;
        if active || extra == Some(s.ad_group_source.id) {
            let source_type = store.get_source_type(s.source.source_type_id)?;
            total += source_min_daily_budget(&source_type, AutopilotState::ActiveCpcBudget, config);
        }
    }
    Ok(total)
}

// ── Ad group source settings ──────────────────────────────────────

pub struct AdGroupSourceSettingsWriter<'a> {
    store: &'a PacingStore,
    config: &'a PacingConfig,
}

impl<'a> AdGroupSourceSettingsWriter<'a> {
    pub fn new(store: &'a PacingStore, config: &'a PacingConfig) -> Self {
        Self { store, config }
    }

    pub fn set(
        &self,
        ad_group_source_id: AdGroupSourceId,
        changes: &SourceSettingsChanges,
        opts: &SetOptions,
    ) -> PacingResult<WriteOutcome<SourceSettingsRow>> {
        self.store.transaction(|store| {
            let ags = store.get_ad_group_source_by_id(ad_group_source_id)?;
            let current = store.current_source_settings(ad_group_source_id)?;

            if let Some(expected) = opts.expected_previous_id {
                let found = current.as_ref().and_then(|c| c.id).unwrap_or(0);
                if found != expected {
                    return Err(PacingError::ConcurrentSettingsChange {
                        ad_group_source_id,
                        expected,
                        found,
                    });
                }
            }

            let base = current.unwrap_or_else(|| SourceSettingsRow {
                id: None,
                ad_group_source_id,
                created_dt: opts.created_dt,
                cpc_cc: None,
                cpm: None,
                daily_budget_cc: None,
                state: SettingsState::Inactive,
                changed_by: opts.changed_by.clone(),
            });

            let mut next = base.clone();
            if let Some(cpc) = changes.cpc_cc {
                next.cpc_cc = Some(cpc);
            }
            if let Some(cpm) = changes.cpm {
                next.cpm = Some(cpm);
            }
            if let Some(budget) = changes.daily_budget_cc {
                next.daily_budget_cc = Some(budget);
            }
            if let Some(state) = changes.state {
                next.state = state;
            }

            let unchanged = next.cpc_cc == base.cpc_cc
                && next.cpm == base.cpm
                && next.daily_budget_cc == base.daily_budget_cc
                && next.state == base.state;
            if unchanged && base.id.is_some() {
                return Ok(WriteOutcome::Unchanged(base));
            }

            let ad_group = store.get_ad_group(ags.ad_group_id)?;
            let campaign = store.get_campaign(ad_group.campaign_id)?;
            if !opts.system && campaign.landing_mode {
                return Err(PacingError::CannotChangeInLandingMode {
                    ad_group_id: ad_group.id,
                });
            }

            let source = store.get_source(ags.source_id)?;
            let source_type = store.get_source_type(source.source_type_id)?;
            let ad_group_settings = store.current_ad_group_settings(ad_group.id)?;
            let autopilot_state = ad_group_settings
                .as_ref()
                .map_or(AutopilotState::Inactive, |s| s.autopilot_state);

            if next.cpc_cc != base.cpc_cc {
                if let Some(cpc) = next.cpc_cc {
                    validate_cpc(cpc, &source_type, ad_group_settings.as_ref())?;
                }
            }
            if next.cpm != base.cpm {
                if let Some(cpm) = next.cpm {
                    validate_cpm(cpm, &source_type)?;
                }
            }
            if next.daily_budget_cc != base.daily_budget_cc {
                if let Some(budget) = next.daily_budget_cc {
                    let floor =
                        source_min_daily_budget(&source_type, autopilot_state, &self.config.autopilot);
                    if budget < floor {
                        return Err(PacingError::MinimalDailyBudgetTooLow {
                            value: budget,
                            limit: floor,
                        });
                    }
                    if budget > source_type.max_daily_budget {
                        return Err(PacingError::MaximalDailyBudgetTooHigh {
                            value: budget,
                            limit: source_type.max_daily_budget,
                        });
                    }
                }
            }

            let activating = next.state == SettingsState::Active && base.state != SettingsState::Active;
            if activating && autopilot_state == AutopilotState::ActiveCpcBudget {
                let ap_budget = ad_group_settings
                    .as_ref()
                    .and_then(|s| s.autopilot_daily_budget)
                    .unwrap_or_default();
                let needed = active_sources_floor(
                    store,
                    &self.config.autopilot,
                    ad_group.id,
                    Some(ad_group_source_id),
                )?;
                if ap_budget < needed {
                    return Err(PacingError::AutopilotDailyBudgetTooLow {
                        value: ap_budget,
                        limit: needed,
                    });
                }
            }

            next.id = None;
            next.created_dt = opts.created_dt;
            next.changed_by = opts.changed_by.clone();
            let id = store.insert_source_settings(&next)?;
            next.id = Some(id);

            log::debug!(
                "ad group source {ad_group_source_id}: settings v{id} by {}",
                opts.changed_by
            );
            Ok(WriteOutcome::Written(next))
        })
    }
}

fn validate_cpc(
    cpc: Decimal,
    source_type: &SourceType,
    ad_group_settings: Option<&AdGroupSettingsRow>,
) -> PacingResult<()> {
    if cpc < source_type.min_cpc {
        return Err(PacingError::MinimalCpcTooLow {
            value: cpc,
            limit: source_type.min_cpc,
        });
    }
    if cpc > source_type.max_cpc {
        return Err(PacingError::MaximalCpcTooHigh {
            value: cpc,
            limit: source_type.max_cpc,
        });
    }
    if let Some(max_cpc) = ad_group_settings.and_then(|s| s.max_cpc) {
        if cpc > max_cpc {
            return Err(PacingError::MaximalCpcTooHigh {
                value: cpc,
                limit: max_cpc,
            });
        }
    }
    Ok(())
}

fn validate_cpm(cpm: Decimal, source_type: &SourceType) -> PacingResult<()> {
    if !source_type.supports_cpm {
        return Err(PacingError::CannotSetCpm { value: cpm });
    }
    if let Some(min) = source_type.min_cpm {
        if cpm < min {
            return Err(PacingError::MinimalCpmTooLow { value: cpm, limit: min });
        }
    }
    if let Some(max) = source_type.max_cpm {
        if cpm > max {
            return Err(PacingError::MaximalCpmTooHigh { value: cpm, limit: max });
        }
    }
    Ok(())
}

// ── Ad group settings ─────────────────────────────────────────────

pub struct AdGroupSettingsWriter<'a> {
    store: &'a PacingStore,
    config: &'a PacingConfig,
}

impl<'a> AdGroupSettingsWriter<'a> {
    pub fn new(store: &'a PacingStore, config: &'a PacingConfig) -> Self {
        Self { store, config }
    }

    /// Switch the autopilot mode of an ad group. Budget autopilot needs a
    /// daily budget that covers the floors of all active sources.
    pub fn set_autopilot(
        &self,
        ad_group_id: AdGroupId,
        state: AutopilotState,
        daily_budget: Option<Decimal>,
        opts: &SetOptions,
    ) -> PacingResult<WriteOutcome<AdGroupSettingsRow>> {
        self.store.transaction(|store| {
            let current = store
                .current_ad_group_settings(ad_group_id)?
                .ok_or(PacingError::NotFound {
                    entity: "ad group settings",
                    id: ad_group_id,
                })?;

            let ad_group = store.get_ad_group(ad_group_id)?;
            let campaign = store.get_campaign(ad_group.campaign_id)?;
            if !opts.system && campaign.landing_mode {
                return Err(PacingError::CannotChangeInLandingMode { ad_group_id });
            }

            let daily_budget = daily_budget.or(current.autopilot_daily_budget);
            if state == AutopilotState::ActiveCpcBudget {
                let budget = daily_budget.ok_or(PacingError::AutopilotDailyBudgetMissing)?;
                let needed = active_sources_floor(store, &self.config.autopilot, ad_group_id, None)?;
                if budget < needed {
                    return Err(PacingError::AutopilotDailyBudgetTooLow {
                        value: budget,
                        limit: needed,
                    });
                }
            }

            if current.autopilot_state == state && current.autopilot_daily_budget == daily_budget {
                return Ok(WriteOutcome::Unchanged(current));
            }

            let mut next = current;
            next.id = None;
            next.created_dt = opts.created_dt;
            next.changed_by = opts.changed_by.clone();
            next.autopilot_state = state;
            next.autopilot_daily_budget = daily_budget;
            let id = store.insert_ad_group_settings(&next)?;
            next.id = Some(id);

            log::info!(
                "ad group {ad_group_id}: autopilot {} (daily budget {:?}) by {}",
                state.as_str(),
                daily_budget,
                opts.changed_by
            );
            Ok(WriteOutcome::Written(next))
        })
    }
}
