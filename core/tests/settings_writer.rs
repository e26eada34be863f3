//! Integration tests for the copy-on-write settings writers.

mod common;

use common::*;
use pacing_core::{
    config::PacingConfig,
    error::PacingError,
    settings_writer::{
        AdGroupSettingsWriter, AdGroupSourceSettingsWriter, SetOptions, SourceSettingsChanges,
        WriteOutcome,
    },
    store::{AdGroupRow, PacingStore},
    types::{AutopilotState, SettingsState},
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

struct Fixture {
    store: PacingStore,
    config: PacingConfig,
    /// outbrain on ad group 1
    ags_outbrain: i64,
    /// yahoo on ad group 1
    ags_yahoo: i64,
    /// a second outbrain source on ad group 1, paused
    ags_paused: i64,
}

fn fixture() -> Fixture {
    let store = store();
    add_account(&store, 1, None);
    add_campaign(&store, 1, 1, Some("am@example.com"));
    add_source(&store, 1, OUTBRAIN);
    add_source(&store, 2, YAHOO);
    add_source(&store, 3, OUTBRAIN);
    add_ad_group(
        &store,
        AdGroupSpec {
            id: 1,
            campaign_id: 1,
            autopilot_state: AutopilotState::Inactive,
            autopilot_daily_budget: None,
            max_cpc: None,
            start: d(2024, 11, 1),
        },
    );
    let created = d(2024, 11, 1);
    let ags_outbrain = add_ad_group_source(
        &store,
        1,
        1,
        Some(dec!(0.50)),
        Some(dec!(50)),
        SettingsState::Active,
        created,
    );
    let ags_yahoo = add_ad_group_source(
        &store,
        1,
        2,
        Some(dec!(0.20)),
        Some(dec!(20)),
        SettingsState::Active,
        created,
    );
    let ags_paused = add_ad_group_source(
        &store,
        1,
        3,
        Some(dec!(0.30)),
        Some(dec!(10)),
        SettingsState::Inactive,
        created,
    );
    Fixture {
        store,
        config: PacingConfig::default_test(),
        ags_outbrain,
        ags_yahoo,
        ags_paused,
    }
}

fn operator() -> SetOptions {
    SetOptions::operator("ops@example.com", midnight(d(2024, 11, 5)))
}

fn set_source(
    f: &Fixture,
    ags_id: i64,
    changes: SourceSettingsChanges,
) -> Result<WriteOutcome<pacing_core::store::SourceSettingsRow>, PacingError> {
    AdGroupSourceSettingsWriter::new(&f.store, &f.config).set(ags_id, &changes, &operator())
}

fn cpc(value: Decimal) -> SourceSettingsChanges {
    SourceSettingsChanges {
        cpc_cc: Some(value),
        ..SourceSettingsChanges::default()
    }
}

fn budget(value: Decimal) -> SourceSettingsChanges {
    SourceSettingsChanges {
        daily_budget_cc: Some(value),
        ..SourceSettingsChanges::default()
    }
}

fn set_autopilot(
    f: &Fixture,
    state: AutopilotState,
    daily_budget: Option<Decimal>,
) -> Result<WriteOutcome<pacing_core::store::AdGroupSettingsRow>, PacingError> {
    AdGroupSettingsWriter::new(&f.store, &f.config)
        .set_autopilot(1, state, daily_budget, &operator())
}

// ─────────────────────────────────────────────────────────────────────────────
// Copy-on-write
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn change_appends_a_version_that_copies_untouched_fields() {
    let f = fixture();

    let outcome = set_source(&f, f.ags_outbrain, cpc(dec!(0.60))).expect("write");
    assert!(outcome.is_written());
    let row = outcome.into_row();
    assert_eq!(row.cpc_cc, Some(dec!(0.60)));
    assert_eq!(row.daily_budget_cc, Some(dec!(50)), "budget copied from previous version");
    assert_eq!(row.state, SettingsState::Active);
    assert_eq!(row.changed_by, "ops@example.com");

    let history = f.store.source_settings_history(f.ags_outbrain).expect("history");
    assert_eq!(history.len(), 2);
    assert!(
        history.iter().any(|r| r.cpc_cc == Some(dec!(0.50))),
        "the previous version is kept untouched"
    );

    let current = f
        .store
        .current_source_settings(f.ags_outbrain)
        .expect("query")
        .expect("current");
    assert_eq!(current, row);
}

#[test]
fn identical_values_write_nothing() {
    let f = fixture();
    let before = f.store.source_settings_count().expect("count");

    let outcome = set_source(&f, f.ags_outbrain, cpc(dec!(0.5))).expect("write");
    assert!(!outcome.is_written());
    assert_eq!(f.store.source_settings_count().expect("count"), before);
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn cpc_must_stay_inside_the_source_range() {
    let f = fixture();

    let low = set_source(&f, f.ags_outbrain, cpc(dec!(0.01))).unwrap_err();
    assert!(matches!(low, PacingError::MinimalCpcTooLow { limit, .. } if limit == dec!(0.05)));

    let high = set_source(&f, f.ags_outbrain, cpc(dec!(5))).unwrap_err();
    assert!(matches!(high, PacingError::MaximalCpcTooHigh { limit, .. } if limit == dec!(3)));
    assert!(high.is_validation());
}

#[test]
fn ad_group_max_cpc_caps_source_bids() {
    let f = fixture();
    add_ad_group(
        &f.store,
        AdGroupSpec {
            id: 2,
            campaign_id: 1,
            autopilot_state: AutopilotState::Inactive,
            autopilot_daily_budget: None,
            max_cpc: Some(dec!(1)),
            start: d(2024, 11, 1),
        },
    );
    let ags = add_ad_group_source(
        &f.store,
        2,
        1,
        Some(dec!(0.5)),
        Some(dec!(50)),
        SettingsState::Active,
        d(2024, 11, 1),
    );

    let err = set_source(&f, ags, cpc(dec!(1.5))).unwrap_err();
    assert!(matches!(err, PacingError::MaximalCpcTooHigh { limit, .. } if limit == dec!(1)));
    assert!(set_source(&f, ags, cpc(dec!(0.9))).is_ok());
}

#[test]
fn cpm_needs_source_support_and_range() {
    let f = fixture();
    let cpm = |value| SourceSettingsChanges {
        cpm: Some(value),
        ..SourceSettingsChanges::default()
    };

    let unsupported = set_source(&f, f.ags_outbrain, cpm(dec!(2))).unwrap_err();
    assert!(matches!(unsupported, PacingError::CannotSetCpm { .. }));

    let high = set_source(&f, f.ags_yahoo, cpm(dec!(30))).unwrap_err();
    assert!(matches!(high, PacingError::MaximalCpmTooHigh { limit, .. } if limit == dec!(25)));

    let low = set_source(&f, f.ags_yahoo, cpm(dec!(0.1))).unwrap_err();
    assert!(matches!(low, PacingError::MinimalCpmTooLow { .. }));

    assert!(set_source(&f, f.ags_yahoo, cpm(dec!(2))).expect("write").is_written());
}

#[test]
fn daily_budget_must_stay_inside_the_source_range() {
    let f = fixture();

    let low = set_source(&f, f.ags_outbrain, budget(dec!(5))).unwrap_err();
    assert!(matches!(low, PacingError::MinimalDailyBudgetTooLow { limit, .. } if limit == dec!(10)));

    let high = set_source(&f, f.ags_yahoo, budget(dec!(50))).unwrap_err();
    assert!(matches!(high, PacingError::MaximalDailyBudgetTooHigh { limit, .. } if limit == dec!(40)));

    // Yahoo allows 3 outside budget autopilot.
    assert!(set_source(&f, f.ags_yahoo, budget(dec!(3))).is_ok());
}

#[test]
fn rejected_writes_leave_no_trace() {
    let f = fixture();
    let before = f.store.source_settings_count().expect("count");

    let both = SourceSettingsChanges {
        cpc_cc: Some(dec!(0.7)),
        daily_budget_cc: Some(dec!(1)),
        ..SourceSettingsChanges::default()
    };
    assert!(set_source(&f, f.ags_outbrain, both).is_err());
    assert_eq!(f.store.source_settings_count().expect("count"), before);
}

// ─────────────────────────────────────────────────────────────────────────────
// Budget autopilot constraints
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn budget_autopilot_needs_a_daily_budget_covering_active_floors() {
    let f = fixture();

    let missing = set_autopilot(&f, AutopilotState::ActiveCpcBudget, None).unwrap_err();
    assert!(matches!(missing, PacingError::AutopilotDailyBudgetMissing));

    // Active sources: outbrain floor 10, yahoo floor raised to 5.
    let low = set_autopilot(&f, AutopilotState::ActiveCpcBudget, Some(dec!(12))).unwrap_err();
    assert!(matches!(
        low,
        PacingError::AutopilotDailyBudgetTooLow { value, limit } if value == dec!(12) && limit == dec!(15)
    ));

    let ok = set_autopilot(&f, AutopilotState::ActiveCpcBudget, Some(dec!(60))).expect("write");
    assert!(ok.is_written());
    let settings = f
        .store
        .current_ad_group_settings(1)
        .expect("query")
        .expect("settings");
    assert_eq!(settings.autopilot_state, AutopilotState::ActiveCpcBudget);
    assert_eq!(settings.autopilot_daily_budget, Some(dec!(60)));
    assert_eq!(settings.state, SettingsState::Active, "other fields are copied");

    let again = set_autopilot(&f, AutopilotState::ActiveCpcBudget, Some(dec!(60))).expect("write");
    assert!(!again.is_written());
}

#[test]
fn budget_autopilot_raises_the_source_budget_floor() {
    let f = fixture();
    set_autopilot(&f, AutopilotState::ActiveCpcBudget, Some(dec!(60))).expect("autopilot");

    let err = set_source(&f, f.ags_yahoo, budget(dec!(3))).unwrap_err();
    assert!(matches!(err, PacingError::MinimalDailyBudgetTooLow { limit, .. } if limit == dec!(5)));
}

#[test]
fn activating_a_source_must_fit_the_autopilot_budget() {
    let f = fixture();
    set_autopilot(&f, AutopilotState::ActiveCpcBudget, Some(dec!(20))).expect("autopilot");

    let activate = SourceSettingsChanges {
        state: Some(SettingsState::Active),
        ..SourceSettingsChanges::default()
    };
    let err = set_source(&f, f.ags_paused, activate.clone()).unwrap_err();
    assert!(matches!(
        err,
        PacingError::AutopilotDailyBudgetTooLow { value, limit } if value == dec!(20) && limit == dec!(25)
    ));

    set_autopilot(&f, AutopilotState::ActiveCpcBudget, Some(dec!(25))).expect("autopilot");
    assert!(set_source(&f, f.ags_paused, activate).expect("write").is_written());
}

#[test]
fn autopilot_requires_existing_ad_group_settings() {
    let f = fixture();
    f.store
        .insert_ad_group(&AdGroupRow {
            id: 9,
            campaign_id: 1,
            name: "bare".into(),
        })
        .expect("ad group");

    let err = AdGroupSettingsWriter::new(&f.store, &f.config)
        .set_autopilot(9, AutopilotState::ActiveCpc, None, &operator())
        .unwrap_err();
    assert!(matches!(err, PacingError::NotFound { .. }));
}

// ─────────────────────────────────────────────────────────────────────────────
// Landing mode and concurrency
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn landing_mode_freezes_operator_changes_only() {
    let f = fixture();
    f.store.set_campaign_landing_mode(1, true).expect("landing mode");

    let err = set_source(&f, f.ags_outbrain, cpc(dec!(0.6))).unwrap_err();
    assert!(matches!(err, PacingError::CannotChangeInLandingMode { ad_group_id: 1 }));

    let err = set_autopilot(&f, AutopilotState::ActiveCpc, None).unwrap_err();
    assert!(matches!(err, PacingError::CannotChangeInLandingMode { .. }));

    let system = SetOptions::system("autopilot", midnight(d(2024, 11, 5)), None);
    let outcome = AdGroupSourceSettingsWriter::new(&f.store, &f.config)
        .set(f.ags_outbrain, &cpc(dec!(0.6)), &system)
        .expect("system write");
    assert!(outcome.is_written());
}

#[test]
fn stale_expected_version_is_refused() {
    let f = fixture();
    let current_id = f
        .store
        .current_source_settings(f.ags_outbrain)
        .expect("query")
        .and_then(|s| s.id)
        .expect("current id");

    // Someone else writes first.
    set_source(&f, f.ags_outbrain, cpc(dec!(0.55))).expect("operator write");

    let stale = SetOptions::system("autopilot", midnight(d(2024, 11, 5)), Some(current_id));
    let err = AdGroupSourceSettingsWriter::new(&f.store, &f.config)
        .set(f.ags_outbrain, &cpc(dec!(0.45)), &stale)
        .unwrap_err();
    assert!(matches!(
        err,
        PacingError::ConcurrentSettingsChange { expected, found, .. } if expected == current_id && found != current_id
    ));

    let latest = f
        .store
        .current_source_settings(f.ags_outbrain)
        .expect("query")
        .expect("current");
    assert_eq!(latest.cpc_cc, Some(dec!(0.55)));
    let fresh = SetOptions::system("autopilot", midnight(d(2024, 11, 5)), latest.id);
    assert!(AdGroupSourceSettingsWriter::new(&f.store, &f.config)
        .set(f.ags_outbrain, &cpc(dec!(0.45)), &fresh)
        .expect("fresh write")
        .is_written());
}

// ─────────────────────────────────────────────────────────────────────────────
// Budget line items
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn budget_amount_locks_once_spend_starts() {
    let f = fixture();
    add_credit(
        &f.store,
        CreditSpec {
            id: 1,
            account_id: Some(1),
            agency_id: None,
            start: d(2024, 11, 1),
            end: d(2024, 11, 30),
            license_fee: dec!(0.1),
            flat_fee: dec!(0),
        },
    );
    add_budget(&f.store, 1, 1, 1, d(2024, 11, 1), d(2024, 11, 30), dec!(1000));

    f.store.update_budget_amount(1, dec!(1200)).expect("no spend yet");

    add_statement(&f.store, d(2024, 11, 2), 1, dec!(40), dec!(4));
    let err = f.store.update_budget_amount(1, dec!(1500)).unwrap_err();
    assert!(matches!(err, PacingError::BudgetAmountLocked { budget_id: 1 }));

    f.store.set_budget_freed_amount(1, dec!(200)).expect("freeing is allowed");
}
