//! Deterministic demo data set.
//!
//! Builds a small agency with accounts, campaigns, budgets, ad groups and
//! sources, then plays the ETL: for any date it writes the daily statements
//! and the matching warehouse rows. Every random value comes from DemoRng,
//! so one seed always produces the same data.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use std::collections::BTreeMap;

use crate::{
    clock::{days_before, last_day_of_month},
    config::PacingConfig,
    error::PacingResult,
    rng::{DemoRng, DemoStream},
    settings_writer::source_min_daily_budget,
    store::{
        AccountRow, AdGroupRow, AdGroupSettingsRow, BudgetRow, CampaignRow, CreditRow,
        PacingStore, SourceRow, SourceSettingsRow, StatementRow, WarehouseRow,
    },
    types::{
        decimal_to_nano, nano_to_decimal, AccountId, AdGroupId, AutopilotState, CampaignId, Nano,
        SettingsState,
    },
};

const AGENCY_ID: i64 = 1;
const ACCOUNTS: i64 = 3;
const CAMPAIGNS_PER_ACCOUNT: i64 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct DemoDataset {
    pub seed: u64,
    pub accounts: Vec<AccountId>,
    pub campaigns: Vec<CampaignId>,
    pub ad_groups: Vec<AdGroupId>,
}

fn cents(value: i64) -> Decimal {
    Decimal::new(value, 2)
}

/// Write the hierarchy, credits, budgets and settings. Budgets run from
/// `history_days` before `start_date` to the end of its month.
pub fn seed_demo(
    store: &PacingStore,
    config: &PacingConfig,
    seed: u64,
    start_date: NaiveDate,
    history_days: u64,
) -> PacingResult<DemoDataset> {
    store.transaction(|store| {
        let mut hierarchy = DemoRng::new(seed, DemoStream::Hierarchy);
        let mut budgets = DemoRng::new(seed, DemoStream::Budgets);
        let mut settings = DemoRng::new(seed, DemoStream::Settings);

        let flight_start = days_before(start_date, history_days);
        let flight_end = last_day_of_month(start_date);
        let created_dt = NaiveDateTime::new(flight_start, NaiveTime::MIN);

        for st in config.source_types_sorted() {
            store.upsert_source_type(st)?;
        }
        let source_types = config.source_types_sorted();
        for st in &source_types {
            store.insert_source(&SourceRow {
                id: st.id,
                name: st.slug.clone(),
                source_type_id: st.id,
            })?;
        }

        store.insert_agency(AGENCY_ID, "Demo Agency")?;
        store.insert_credit(&CreditRow {
            id: 1,
            account_id: None,
            agency_id: Some(AGENCY_ID),
            start_date: flight_start,
            end_date: flight_end,
            amount: Decimal::from(200_000),
            license_fee: cents(15),
            flat_fee: Decimal::from(hierarchy.range_i64(3, 9) * 100),
        })?;

        let mut dataset = DemoDataset {
            seed,
            accounts: Vec::new(),
            campaigns: Vec::new(),
            ad_groups: Vec::new(),
        };

        for account_id in 1..=ACCOUNTS {
            // The last account buys through its own credit, outside the agency.
            let in_agency = account_id < ACCOUNTS;
            store.insert_account(&AccountRow {
                id: account_id,
                name: format!("Demo account {account_id}"),
                agency_id: in_agency.then_some(AGENCY_ID),
            })?;
            let credit_id = if in_agency {
                1
            } else {
                let credit_id = 1 + account_id;
                store.insert_credit(&CreditRow {
                    id: credit_id,
                    account_id: Some(account_id),
                    agency_id: None,
                    start_date: flight_start,
                    end_date: flight_end,
                    amount: Decimal::from(50_000),
                    license_fee: cents(20),
                    flat_fee: Decimal::ZERO,
                })?;
                credit_id
            };
            dataset.accounts.push(account_id);

            for n in 0..CAMPAIGNS_PER_ACCOUNT {
                let campaign_id = (account_id - 1) * CAMPAIGNS_PER_ACCOUNT + n + 1;
                store.insert_campaign(&CampaignRow {
                    id: campaign_id,
                    account_id,
                    name: format!("Demo campaign {campaign_id}"),
                    landing_mode: false,
                    account_manager_email: Some(format!("am{account_id}@example.com")),
                })?;
                store.insert_budget(&BudgetRow {
                    id: campaign_id,
                    campaign_id,
                    credit_id,
                    start_date: flight_start,
                    end_date: flight_end,
                    amount: Decimal::from(budgets.range_i64(30, 90) * 100),
                    freed_amount: Decimal::ZERO,
                    margin: None,
                })?;
                dataset.campaigns.push(campaign_id);

                let ad_group_id = campaign_id;
                store.insert_ad_group(&AdGroupRow {
                    id: ad_group_id,
                    campaign_id,
                    name: format!("Demo ad group {ad_group_id}"),
                })?;

                let autopilot_state = match ad_group_id % 3 {
                    1 => AutopilotState::ActiveCpcBudget,
                    2 => AutopilotState::ActiveCpc,
                    _ => AutopilotState::Inactive,
                };
                let floors: Vec<Decimal> = source_types
                    .iter()
                    .map(|st| {
                        source_min_daily_budget(st, AutopilotState::ActiveCpcBudget, &config.autopilot)
                    })
                    .collect();
                let floor_total: Decimal = floors.iter().copied().sum();
                let ap_budget = floor_total + Decimal::from(settings.range_i64(2, 8) * 10);

                store.insert_ad_group_settings(&AdGroupSettingsRow {
                    id: None,
                    ad_group_id,
                    created_dt,
                    state: SettingsState::Active,
                    start_date: flight_start,
                    end_date: None,
                    max_cpc: None,
                    autopilot_state,
                    autopilot_daily_budget: (autopilot_state == AutopilotState::ActiveCpcBudget)
                        .then_some(ap_budget),
                    changed_by: "demo".into(),
                })?;
                dataset.ad_groups.push(ad_group_id);

                for (st, floor) in source_types.iter().zip(&floors) {
                    let ags_id = store.insert_ad_group_source(ad_group_id, st.id)?;
                    let cpc = cents(settings.range_i64(20, 60)).max(st.min_cpc);
                    let daily_budget = (*floor + Decimal::from(settings.range_i64(0, 3) * 5))
                        .min(st.max_daily_budget);
                    store.insert_source_settings(&SourceSettingsRow {
                        id: None,
                        ad_group_source_id: ags_id,
                        created_dt,
                        cpc_cc: Some(cpc.round_dp(st.cpc_decimal_places)),
                        cpm: None,
                        daily_budget_cc: Some(daily_budget),
                        state: SettingsState::Active,
                        changed_by: "demo".into(),
                    })?;
                }
            }
        }

        log::info!(
            "demo data: {} accounts, {} campaigns, {} ad groups, seed {seed}",
            dataset.accounts.len(),
            dataset.campaigns.len(),
            dataset.ad_groups.len()
        );
        Ok(dataset)
    })
}

/// Split `total` across `weights` in integer nano units; the last share
/// takes the rounding remainder so the parts always sum to the total.
fn split_nano(total: Nano, weights: &[Decimal]) -> Vec<Nano> {
    let weight_total: Decimal = weights.iter().copied().sum();
    let mut parts = Vec::with_capacity(weights.len());
    let mut assigned: Nano = 0;
    for (i, w) in weights.iter().enumerate() {
        let part = if i + 1 == weights.len() {
            total - assigned
        } else if weight_total.is_zero() {
            0
        } else {
            (Decimal::from(total) * *w / weight_total)
                .trunc()
                .to_i64()
                .unwrap_or(0)
        };
        assigned += part;
        parts.push(part);
    }
    parts
}

/// Play the ETL for `date`: replace its daily statements and write the
/// warehouse rows they aggregate. Returns the number of statements.
pub fn generate_day(store: &PacingStore, seed: u64, date: NaiveDate) -> PacingResult<usize> {
    let day_seed = seed ^ u64::from(date.num_days_from_ce().unsigned_abs());
    let mut rng = DemoRng::new(day_seed, DemoStream::Statements);

    let budgets = store.budgets_overlapping(date, date)?;
    let mut statements = Vec::with_capacity(budgets.len());
    let mut campaign_totals: BTreeMap<CampaignId, (AccountId, StatementRow)> = BTreeMap::new();

    for item in &budgets {
        let days = item.budget.days().max(1);
        let daily = item.budget.allocated_amount() * (Decimal::ONE - item.credit.license_fee)
            / Decimal::from(days);
        let factor = Decimal::from(rng.range_i64(60, 130)) / Decimal::ONE_HUNDRED;
        let spend = (daily * factor).round_dp(2);
        let fee = if item.credit.license_fee < Decimal::ONE {
            spend * item.credit.license_fee / (Decimal::ONE - item.credit.license_fee)
        } else {
            Decimal::ZERO
        };
        let margin = item.budget.margin.map_or(Decimal::ZERO, |m| spend * m);

        let statement = StatementRow {
            date,
            budget_id: item.budget.id,
            media_spend_nano: decimal_to_nano(spend),
            data_spend_nano: 0,
            license_fee_nano: decimal_to_nano(fee),
            margin_nano: decimal_to_nano(margin),
        };
        let entry = campaign_totals
            .entry(item.budget.campaign_id)
            .or_insert_with(|| {
                (
                    item.account_id,
                    StatementRow {
                        media_spend_nano: 0,
                        data_spend_nano: 0,
                        license_fee_nano: 0,
                        margin_nano: 0,
                        ..statement.clone()
                    },
                )
            });
        entry.1.media_spend_nano += statement.media_spend_nano;
        entry.1.license_fee_nano += statement.license_fee_nano;
        entry.1.margin_nano += statement.margin_nano;
        statements.push(statement);
    }

    store.transaction(|store| {
        store.replace_statements_for_date(date, &statements)?;

        let ad_groups = store.all_ad_groups()?;
        for (campaign_id, (account_id, total)) in &campaign_totals {
            let mut sources = Vec::new();
            for ad_group in ad_groups.iter().filter(|a| a.campaign_id == *campaign_id) {
                for s in store.ad_group_source_states(ad_group.id)? {
                    if s.settings.state == SettingsState::Active {
                        sources.push((ad_group.id, s));
                    }
                }
            }
            if sources.is_empty() {
                continue;
            }

            let weights: Vec<Decimal> = sources
                .iter()
                .map(|(_, s)| s.settings.daily_budget_cc.unwrap_or(Decimal::ONE))
                .collect();
            let media = split_nano(total.media_spend_nano, &weights);
            let fees = split_nano(total.license_fee_nano, &weights);
            let margins = split_nano(total.margin_nano, &weights);

            for (i, (ad_group_id, s)) in sources.iter().enumerate() {
                let spend = nano_to_decimal(media[i]);
                let clicks = match s.settings.cpc_cc {
                    Some(cpc) if cpc > Decimal::ZERO => {
                        (spend / cpc).trunc().to_i64().unwrap_or(0)
                    }
                    _ => 0,
                };
                store.upsert_warehouse_row(&WarehouseRow {
                    date,
                    account_id: *account_id,
                    campaign_id: *campaign_id,
                    ad_group_id: *ad_group_id,
                    source_id: s.source.id,
                    media_spend_nano: media[i],
                    data_spend_nano: 0,
                    license_fee_nano: fees[i],
                    margin_nano: margins[i],
                    clicks,
                    impressions: clicks * rng.range_i64(80, 200),
                })?;
            }
        }
        Ok(())
    })?;

    log::debug!("demo ETL {date}: {} statements", statements.len());
    Ok(statements.len())
}
