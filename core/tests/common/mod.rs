//! Fixture builders shared by the integration tests.
#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use pacing_core::{
    config::PacingConfig,
    store::{
        AccountRow, AdGroupRow, AdGroupSettingsRow, BudgetRow, CampaignRow, CreditRow,
        PacingStore, SourceRow, SourceSettingsRow, StatementRow, WarehouseRow,
    },
    types::{decimal_to_nano, AutopilotState, SettingsState},
};
use rust_decimal::Decimal;

pub const OUTBRAIN: i64 = 1;
pub const YAHOO: i64 = 2;

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
}

pub fn midnight(date: NaiveDate) -> NaiveDateTime {
    NaiveDateTime::new(date, NaiveTime::MIN)
}

/// Migrated in-memory store with the test source type catalog.
pub fn store() -> PacingStore {
    let store = PacingStore::in_memory().expect("in-memory store");
    store.migrate().expect("migrate");
    seed_source_types(&store, &PacingConfig::default_test());
    store
}

pub fn seed_source_types(store: &PacingStore, config: &PacingConfig) {
    for st in config.source_types_sorted() {
        store.upsert_source_type(st).expect("source type");
    }
}

pub fn add_agency(store: &PacingStore, id: i64) {
    store.insert_agency(id, &format!("agency {id}")).expect("agency");
}

pub fn add_account(store: &PacingStore, id: i64, agency_id: Option<i64>) {
    store
        .insert_account(&AccountRow {
            id,
            name: format!("account {id}"),
            agency_id,
        })
        .expect("account");
}

pub fn add_campaign(store: &PacingStore, id: i64, account_id: i64, am_email: Option<&str>) {
    store
        .insert_campaign(&CampaignRow {
            id,
            account_id,
            name: format!("campaign {id}"),
            landing_mode: false,
            account_manager_email: am_email.map(str::to_string),
        })
        .expect("campaign");
}

pub struct CreditSpec {
    pub id: i64,
    pub account_id: Option<i64>,
    pub agency_id: Option<i64>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub license_fee: Decimal,
    pub flat_fee: Decimal,
}

pub fn add_credit(store: &PacingStore, c: CreditSpec) {
    store
        .insert_credit(&CreditRow {
            id: c.id,
            account_id: c.account_id,
            agency_id: c.agency_id,
            start_date: c.start,
            end_date: c.end,
            amount: Decimal::from(100_000),
            license_fee: c.license_fee,
            flat_fee: c.flat_fee,
        })
        .expect("credit");
}

pub fn add_budget(
    store: &PacingStore,
    id: i64,
    campaign_id: i64,
    credit_id: i64,
    start: NaiveDate,
    end: NaiveDate,
    amount: Decimal,
) {
    store
        .insert_budget(&BudgetRow {
            id,
            campaign_id,
            credit_id,
            start_date: start,
            end_date: end,
            amount,
            freed_amount: Decimal::ZERO,
            margin: None,
        })
        .expect("budget");
}

pub fn add_statement(
    store: &PacingStore,
    date: NaiveDate,
    budget_id: i64,
    media: Decimal,
    license_fee: Decimal,
) {
    store
        .insert_statement(&StatementRow {
            date,
            budget_id,
            media_spend_nano: decimal_to_nano(media),
            data_spend_nano: 0,
            license_fee_nano: decimal_to_nano(license_fee),
            margin_nano: 0,
        })
        .expect("statement");
}

pub fn add_source(store: &PacingStore, id: i64, source_type_id: i64) {
    store
        .insert_source(&SourceRow {
            id,
            name: format!("source {id}"),
            source_type_id,
        })
        .expect("source");
}

pub struct AdGroupSpec {
    pub id: i64,
    pub campaign_id: i64,
    pub autopilot_state: AutopilotState,
    pub autopilot_daily_budget: Option<Decimal>,
    pub max_cpc: Option<Decimal>,
    pub start: NaiveDate,
}

pub fn add_ad_group(store: &PacingStore, spec: AdGroupSpec) {
    store
        .insert_ad_group(&AdGroupRow {
            id: spec.id,
            campaign_id: spec.campaign_id,
            name: format!("ad group {}", spec.id),
        })
        .expect("ad group");
    store
        .insert_ad_group_settings(&AdGroupSettingsRow {
            id: None,
            ad_group_id: spec.id,
            created_dt: midnight(spec.start),
            state: SettingsState::Active,
            start_date: spec.start,
            end_date: None,
            max_cpc: spec.max_cpc,
            autopilot_state: spec.autopilot_state,
            autopilot_daily_budget: spec.autopilot_daily_budget,
            changed_by: "fixture".into(),
        })
        .expect("ad group settings");
}

/// Link a source to an ad group with initial settings. Returns the ad group
/// source id.
pub fn add_ad_group_source(
    store: &PacingStore,
    ad_group_id: i64,
    source_id: i64,
    cpc: Option<Decimal>,
    daily_budget: Option<Decimal>,
    state: SettingsState,
    created: NaiveDate,
) -> i64 {
    let ags_id = store
        .insert_ad_group_source(ad_group_id, source_id)
        .expect("ad group source");
    store
        .insert_source_settings(&SourceSettingsRow {
            id: None,
            ad_group_source_id: ags_id,
            created_dt: midnight(created),
            cpc_cc: cpc,
            cpm: None,
            daily_budget_cc: daily_budget,
            state,
            changed_by: "fixture".into(),
        })
        .expect("source settings");
    ags_id
}

pub struct StatsSpec {
    pub date: NaiveDate,
    pub account_id: i64,
    pub campaign_id: i64,
    pub ad_group_id: i64,
    pub source_id: i64,
    pub media: Decimal,
    pub clicks: i64,
}

pub fn add_stats(store: &PacingStore, s: StatsSpec) {
    store
        .upsert_warehouse_row(&WarehouseRow {
            date: s.date,
            account_id: s.account_id,
            campaign_id: s.campaign_id,
            ad_group_id: s.ad_group_id,
            source_id: s.source_id,
            media_spend_nano: decimal_to_nano(s.media),
            clicks: s.clicks,
            impressions: s.clicks * 100,
            ..WarehouseRow::default()
        })
        .expect("warehouse row");
}
