//! Autopilot job.
//!
//! Execution order: first subsystem of the day (slot 0).
//! Uses yesterday's warehouse stats to rebalance every eligible ad group:
//!   - budget autopilot splits the ad group's daily budget across its
//!     active sources (autopilot_budget)
//!   - every autopilot mode moves each active source's bid (autopilot_cpc)
//!
//! Every change goes through AdGroupSourceSettingsWriter as a system write.
//! Each active source gets exactly one autopilot_log row per day, whether
//! or not anything changed; an ad group that already has rows for the day
//! is skipped, so re-running a day is a no-op.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::{any::Any, collections::BTreeMap};

use crate::{
    autopilot_budget::{self, BudgetCandidate, BudgetDecision},
    autopilot_cpc::{self, CpcInput},
    clock::previous_day,
    config::{PacingConfig, SourceType},
    error::{PacingError, PacingResult},
    event::PacingEvent,
    notification::{Email, Incident},
    settings_writer::{
        source_min_cpc, source_min_daily_budget, AdGroupSourceSettingsWriter, SetOptions,
        SourceSettingsChanges,
    },
    store::{
        AdGroupRow, AdGroupSettingsRow, AdGroupSourceState, AutopilotLogRow, CampaignRow,
        PacingStore, WarehouseRow,
    },
    subsystem::{JobContext, PacingSubsystem},
    types::{nano_to_decimal, AdGroupId, AutopilotState, CampaignId, SettingsState, SourceId},
};

pub const AUTOPILOT_CHANGED_BY: &str = "autopilot";

const CONCURRENT_CHANGE_COMMENT: &str = "CONCURRENT_SETTINGS_CHANGE";
const INVALID_CHANGE_COMMENT: &str = "INVALID_CHANGE";

/// An ad group the autopilot manages on a given day.
#[derive(Debug, Clone, PartialEq)]
pub struct EligibleAdGroup {
    pub ad_group: AdGroupRow,
    pub settings: AdGroupSettingsRow,
    pub campaign: CampaignRow,
}

/// Ad groups with autopilot on, running on `date`, in a campaign that is
/// not in landing mode. Ordered by ad group id.
pub fn get_active_ad_groups_on_autopilot(
    store: &PacingStore,
    date: NaiveDate,
) -> PacingResult<Vec<EligibleAdGroup>> {
    let mut eligible = Vec::new();
    for ad_group in store.all_ad_groups()? {
        let Some(settings) = store.current_ad_group_settings(ad_group.id)? else {
            continue;
        };
        if !settings.autopilot_state.is_active() || !settings.is_running_on(date) {
            continue;
        }
        let campaign = store.get_campaign(ad_group.campaign_id)?;
        if campaign.landing_mode {
            continue;
        }
        eligible.push(EligibleAdGroup {
            ad_group,
            settings,
            campaign,
        });
    }
    Ok(eligible)
}

/// An active source with everything the allocators need.
struct SourceInputs {
    state: AdGroupSourceState,
    source_type: SourceType,
    stats: Option<WarehouseRow>,
}

impl SourceInputs {
    fn spend(&self) -> Option<Decimal> {
        self.stats
            .as_ref()
            .map(|s| nano_to_decimal(s.media_spend_nano + s.data_spend_nano))
    }

    fn clicks(&self) -> i64 {
        self.stats.as_ref().map_or(0, |s| s.clicks)
    }
}

fn load_active_sources(
    store: &PacingStore,
    ad_group_id: AdGroupId,
    stats_date: NaiveDate,
) -> PacingResult<Vec<SourceInputs>> {
    let mut sources = Vec::new();
    for state in store.ad_group_source_states(ad_group_id)? {
        if state.settings.state != SettingsState::Active {
            continue;
        }
        let source_type = store.get_source_type(state.source.source_type_id)?;
        let stats = store.warehouse_row(stats_date, ad_group_id, state.source.id)?;
        sources.push(SourceInputs {
            state,
            source_type,
            stats,
        });
    }
    Ok(sources)
}

/// Budget split for a budget-autopilot ad group. None for CPC-only autopilot.
fn plan_budgets(
    config: &PacingConfig,
    settings: &AdGroupSettingsRow,
    sources: &[SourceInputs],
) -> Option<BudgetDecision> {
    if settings.autopilot_state != AutopilotState::ActiveCpcBudget {
        return None;
    }
    let target = settings.autopilot_daily_budget?;

    let weights: Vec<Option<Decimal>> = sources
        .iter()
        .map(|s| {
            s.spend()
                .and_then(|spend| autopilot_budget::source_weight(s.clicks(), spend))
        })
        .collect();
    let candidates: Vec<BudgetCandidate> = sources
        .iter()
        .zip(autopilot_budget::fill_missing_weights(&weights))
        .map(|(s, weight)| BudgetCandidate {
            source_id: s.state.source.id,
            floor: source_min_daily_budget(
                &s.source_type,
                AutopilotState::ActiveCpcBudget,
                &config.autopilot,
            ),
            ceiling: s.source_type.max_daily_budget,
            weight,
        })
        .collect();

    Some(autopilot_budget::allocate(
        target,
        &candidates,
        config.autopilot.budget_step,
    ))
}

/// A settings change made outside the daily run.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetReallocation {
    pub source_id: SourceId,
    pub previous_daily_budget: Option<Decimal>,
    pub new_daily_budget: Decimal,
}

/// Re-run the budget split of one ad group right away. Used when an
/// operator activates a source or changes the autopilot budget. Writes no
/// autopilot log rows, so the daily run still happens.
pub fn reallocate_ad_group(
    store: &PacingStore,
    config: &PacingConfig,
    ad_group_id: AdGroupId,
    created_dt: NaiveDateTime,
) -> PacingResult<Vec<BudgetReallocation>> {
    let Some(settings) = store.current_ad_group_settings(ad_group_id)? else {
        return Ok(Vec::new());
    };
    store.transaction(|store| {
        let sources = load_active_sources(store, ad_group_id, previous_day(created_dt.date()))?;
        let Some(BudgetDecision::Allocated(budgets)) = plan_budgets(config, &settings, &sources)
        else {
            return Ok(Vec::new());
        };

        let writer = AdGroupSourceSettingsWriter::new(store, config);
        let mut changes = Vec::new();
        for s in &sources {
            let Some(new_budget) = budgets.get(&s.state.source.id).copied() else {
                continue;
            };
            let previous = s.state.settings.daily_budget_cc;
            if previous == Some(new_budget) {
                continue;
            }
            let outcome = writer.set(
                s.state.ad_group_source.id,
                &SourceSettingsChanges {
                    daily_budget_cc: Some(new_budget),
                    ..SourceSettingsChanges::default()
                },
                &SetOptions::system(AUTOPILOT_CHANGED_BY, created_dt, s.state.settings.id),
            )?;
            if outcome.is_written() {
                changes.push(BudgetReallocation {
                    source_id: s.state.source.id,
                    previous_daily_budget: previous,
                    new_daily_budget: new_budget,
                });
            }
        }
        log::info!("ad group {ad_group_id}: reallocated {} source budgets", changes.len());
        Ok(changes)
    })
}

// ── Daily job ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct AutopilotSubsystem {
    /// Log rows written by the most recent run, for tooling.
    pub last_run: Vec<AutopilotLogRow>,
}

impl AutopilotSubsystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn run_ad_group(
        &self,
        ctx: &JobContext<'_>,
        eligible: &EligibleAdGroup,
        events: &mut Vec<PacingEvent>,
    ) -> PacingResult<Vec<AutopilotLogRow>> {
        let ad_group_id = eligible.ad_group.id;
        let yesterday = previous_day(ctx.date);
        let ap = &ctx.config.autopilot;

        ctx.store.transaction(|store| {
            let sources = load_active_sources(store, ad_group_id, yesterday)?;
            let budget_decision = plan_budgets(ctx.config, &eligible.settings, &sources);
            let budget_comments: Vec<String> = match &budget_decision {
                Some(BudgetDecision::NoChange(comment)) => vec![comment.as_str().to_string()],
                _ => Vec::new(),
            };
            let writer = AdGroupSourceSettingsWriter::new(store, ctx.config);

            let mut logs = Vec::with_capacity(sources.len());
            for s in &sources {
                let source_id = s.state.source.id;
                let current = &s.state.settings;

                let recommendation = autopilot_cpc::recommend(
                    &CpcInput {
                        current_cpc: current.cpc_cc,
                        daily_budget: current.daily_budget_cc,
                        yesterday_spend: s.spend(),
                        floor: source_min_cpc(&s.source_type, ap),
                        ceiling: ap.max_cpc.min(s.source_type.max_cpc),
                        ad_group_max_cpc: eligible.settings.max_cpc,
                        decimal_places: s.source_type.cpc_decimal_places,
                    },
                    ap,
                );
                let new_budget = match &budget_decision {
                    Some(BudgetDecision::Allocated(budgets)) => {
                        budgets.get(&source_id).copied().or(current.daily_budget_cc)
                    }
                    _ => current.daily_budget_cc,
                };

                let mut log_row = AutopilotLogRow {
                    id: None,
                    date: ctx.date,
                    created_dt: ctx.created_dt,
                    campaign_id: eligible.campaign.id,
                    ad_group_id,
                    source_id,
                    autopilot_type: eligible.settings.autopilot_state,
                    previous_cpc_cc: current.cpc_cc,
                    new_cpc_cc: recommendation.new_cpc,
                    previous_daily_budget: current.daily_budget_cc,
                    new_daily_budget: new_budget,
                    yesterday_spend: s.spend().unwrap_or_default(),
                    yesterday_clicks: s.clicks(),
                    cpc_comments: recommendation
                        .comments
                        .iter()
                        .map(|c| c.as_str().to_string())
                        .collect(),
                    budget_comments: budget_comments.clone(),
                };

                // Budget and bid are written, and rejected, independently.
                let mut expected = current.id;
                let mut written = false;

                let budget_change = new_budget.filter(|b| Some(*b) != current.daily_budget_cc);
                if let Some(budget) = budget_change {
                    let changes = SourceSettingsChanges {
                        daily_budget_cc: Some(budget),
                        ..SourceSettingsChanges::default()
                    };
                    let opts = SetOptions::system(AUTOPILOT_CHANGED_BY, ctx.created_dt, expected);
                    match writer.set(s.state.ad_group_source.id, &changes, &opts) {
                        Ok(outcome) => {
                            written |= outcome.is_written();
                            expected = outcome.row().id;
                        }
                        Err(e) if e.is_validation() => {
                            log_row.new_daily_budget = log_row.previous_daily_budget;
                            log_row.budget_comments.push(rejection_comment(&e).to_string());
                            events.push(skipped(ctx.date, ad_group_id, source_id, "budget", &e));
                        }
                        Err(e) => return Err(e),
                    }
                }

                let cpc_change = recommendation.new_cpc.filter(|cpc| Some(*cpc) != current.cpc_cc);
                if let Some(cpc) = cpc_change {
                    let changes = SourceSettingsChanges {
                        cpc_cc: Some(cpc),
                        ..SourceSettingsChanges::default()
                    };
                    let opts = SetOptions::system(AUTOPILOT_CHANGED_BY, ctx.created_dt, expected);
                    match writer.set(s.state.ad_group_source.id, &changes, &opts) {
                        Ok(outcome) => written |= outcome.is_written(),
                        Err(e) if e.is_validation() => {
                            log_row.new_cpc_cc = log_row.previous_cpc_cc;
                            log_row.cpc_comments.push(rejection_comment(&e).to_string());
                            events.push(skipped(ctx.date, ad_group_id, source_id, "cpc", &e));
                        }
                        Err(e) => return Err(e),
                    }
                }

                if written {
                    log::info!(
                        "autopilot: ad group {ad_group_id} source {source_id}: cpc {:?} -> {:?}, budget {:?} -> {:?}",
                        log_row.previous_cpc_cc,
                        log_row.new_cpc_cc,
                        log_row.previous_daily_budget,
                        log_row.new_daily_budget
                    );
                    events.push(PacingEvent::AutopilotSourceUpdated {
                        date: ctx.date,
                        ad_group_id,
                        source_id,
                        previous_cpc: log_row.previous_cpc_cc,
                        new_cpc: log_row.new_cpc_cc,
                        previous_daily_budget: log_row.previous_daily_budget,
                        new_daily_budget: log_row.new_daily_budget,
                    });
                }

                let id = store.insert_autopilot_log(&log_row)?;
                log_row.id = Some(id);
                logs.push(log_row);
            }
            Ok(logs)
        })
    }

    /// One email per campaign listing every change made today.
    fn notify_campaigns(
        &self,
        ctx: &JobContext<'_>,
        eligible: &[EligibleAdGroup],
        logs: &[AutopilotLogRow],
        events: &mut Vec<PacingEvent>,
    ) {
        let mut by_campaign: BTreeMap<CampaignId, Vec<&AutopilotLogRow>> = BTreeMap::new();
        for log_row in logs.iter().filter(|l| is_change(l)) {
            by_campaign.entry(log_row.campaign_id).or_default().push(log_row);
        }

        for (campaign_id, changes) in by_campaign {
            let Some(campaign) = eligible
                .iter()
                .map(|e| &e.campaign)
                .find(|c| c.id == campaign_id)
            else {
                continue;
            };
            let Some(recipient) = campaign.account_manager_email.clone() else {
                log::debug!("campaign {campaign_id} has no account manager; skipping email");
                continue;
            };

            let email = Email {
                recipients: vec![recipient],
                subject: format!("Autopilot changes for campaign {}", campaign.name),
                body: change_summary(ctx.date, campaign, eligible, &changes),
                created_dt: ctx.created_dt,
            };
            if let Err(e) = ctx.notifier.send_email(ctx.store, &email) {
                log::error!("autopilot email for campaign {campaign_id} failed: {e:#}");
                let incident = Incident {
                    key: format!("autopilot-email-{campaign_id}-{}", ctx.date),
                    description: format!("Autopilot email for campaign {campaign_id} failed: {e}"),
                    created_dt: ctx.created_dt,
                };
                if let Err(page_err) = ctx.notifier.trigger_incident(ctx.store, &incident) {
                    log::error!("paging for campaign {campaign_id} failed too: {page_err:#}");
                }
                events.push(PacingEvent::AutopilotNotificationFailed {
                    date: ctx.date,
                    campaign_id,
                    error: e.to_string(),
                });
            }
        }
    }
}

fn rejection_comment(e: &PacingError) -> &'static str {
    if matches!(e, PacingError::ConcurrentSettingsChange { .. }) {
        CONCURRENT_CHANGE_COMMENT
    } else {
        INVALID_CHANGE_COMMENT
    }
}

fn skipped(
    date: NaiveDate,
    ad_group_id: AdGroupId,
    source_id: SourceId,
    field: &str,
    e: &PacingError,
) -> PacingEvent {
    log::warn!("autopilot: ad group {ad_group_id} source {source_id} {field} skipped: {e}");
    PacingEvent::AutopilotSourceSkipped {
        date,
        ad_group_id,
        source_id,
        reason: format!("{field}: {e}"),
    }
}

fn is_change(log_row: &AutopilotLogRow) -> bool {
    log_row.previous_cpc_cc != log_row.new_cpc_cc
        || log_row.previous_daily_budget != log_row.new_daily_budget
}

fn fmt_money(value: Option<Decimal>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.normalize().to_string())
}

fn change_summary(
    date: NaiveDate,
    campaign: &CampaignRow,
    eligible: &[EligibleAdGroup],
    changes: &[&AutopilotLogRow],
) -> String {
    let mut body = format!(
        "Autopilot made the following changes on {date} in campaign {} ({}):\n",
        campaign.name, campaign.id
    );
    for c in changes {
        let ad_group_name = eligible
            .iter()
            .find(|e| e.ad_group.id == c.ad_group_id)
            .map_or("", |e| e.ad_group.name.as_str());
        body.push_str(&format!(
            "- ad group {ad_group_name} ({}), source {}: CPC {} -> {}, daily budget {} -> {}\n",
            c.ad_group_id,
            c.source_id,
            fmt_money(c.previous_cpc_cc),
            fmt_money(c.new_cpc_cc),
            fmt_money(c.previous_daily_budget),
            fmt_money(c.new_daily_budget),
        ));
    }
    body
}

impl PacingSubsystem for AutopilotSubsystem {
    fn name(&self) -> &'static str {
        "autopilot"
    }

    fn update(
        &mut self,
        ctx: &JobContext<'_>,
        _events_in: &[PacingEvent],
    ) -> PacingResult<Vec<PacingEvent>> {
        let mut events = Vec::new();
        let eligible = get_active_ad_groups_on_autopilot(ctx.store, ctx.date)?;

        let mut logs = Vec::new();
        for ag in &eligible {
            if ctx.store.has_autopilot_log(ag.ad_group.id, ctx.date)? {
                events.push(PacingEvent::AutopilotAdGroupSkipped {
                    date: ctx.date,
                    ad_group_id: ag.ad_group.id,
                    reason: "already processed today".into(),
                });
                continue;
            }
            logs.extend(self.run_ad_group(ctx, ag, &mut events)?);
        }

        self.notify_campaigns(ctx, &eligible, &logs, &mut events);

        log::debug!(
            "autopilot {}: {} ad groups eligible, {} sources logged, {} changed",
            ctx.date,
            eligible.len(),
            logs.len(),
            logs.iter().filter(|l| is_change(l)).count()
        );
        self.last_run = logs;
        Ok(events)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
