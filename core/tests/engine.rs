//! Integration tests for the daily job engine.
//!
//! Fixture, first job date Nov 10 2024:
//!   campaign 1 (account manager am@example.com) / ad group 1, autopilot off
//!     source 1: outbrain, cpc 0.50, budget 30, active
//!     source 2: outbrain, cpc 0.40, budget 20, active
//!     source 3: outbrain, cpc 0.30, budget 10, inactive

mod common;

use common::*;
use pacing_core::{
    command::OperatorCommand,
    engine::PacingEngine,
    types::{AutopilotState, SettingsState},
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn start() -> NaiveDate {
    d(2024, 11, 10)
}

fn engine() -> PacingEngine {
    let engine = PacingEngine::build_test("engine-test".into(), start()).expect("engine");
    let store = &engine.store;
    add_account(store, 1, None);
    add_campaign(store, 1, 1, Some("am@example.com"));
    for id in 1..=3 {
        add_source(store, id, OUTBRAIN);
    }
    add_ad_group(
        store,
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
    add_ad_group_source(store, 1, 1, Some(dec!(0.50)), Some(dec!(30)), SettingsState::Active, created);
    add_ad_group_source(store, 1, 2, Some(dec!(0.40)), Some(dec!(20)), SettingsState::Active, created);
    add_ad_group_source(store, 1, 3, Some(dec!(0.30)), Some(dec!(10)), SettingsState::Inactive, created);
    engine
}

fn source_settings(engine: &PacingEngine, source_id: i64) -> (Option<Decimal>, Option<Decimal>) {
    let ags = engine.store.get_ad_group_source(1, source_id).expect("ad group source");
    let settings = engine
        .store
        .current_source_settings(ags.id)
        .expect("settings")
        .expect("has settings");
    (settings.cpc_cc, settings.daily_budget_cc)
}

fn event_types(engine: &PacingEngine, date: NaiveDate) -> Vec<String> {
    engine
        .events_for_date(date)
        .expect("events")
        .into_iter()
        .map(|e| e.event_type)
        .collect()
}

fn set_cpc(source_id: i64, cpc: Decimal) -> OperatorCommand {
    OperatorCommand::SetSourceSettings {
        ad_group_id: 1,
        source_id,
        cpc_cc: Some(cpc),
        cpm: None,
        daily_budget_cc: None,
        state: None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Day lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn a_quiet_day_is_framed_by_engine_events() {
    let mut engine = engine();
    let events = engine.run_day().expect("run day");

    assert_eq!(engine.clock.today, d(2024, 11, 11));
    let types = event_types(&engine, start());
    assert_eq!(types.first().map(String::as_str), Some("run_initialized"));
    assert_eq!(types.get(1).map(String::as_str), Some("day_started"));
    assert_eq!(types.last().map(String::as_str), Some("day_completed"));
    assert!(types.contains(&"daily_audit_completed".to_string()));

    // The returned events are today's, without the one-off run event.
    assert_eq!(events.len() + 1, types.len());
    assert!(engine.last_alarms().is_empty());
    assert!(engine.store.outbox(None).expect("outbox").is_empty());
}

#[test]
fn the_run_is_initialized_once() {
    let mut engine = engine();
    engine.run_days(3).expect("run days");

    assert_eq!(engine.clock.today, d(2024, 11, 13));
    let count = |t: &str| engine.store.event_count("engine-test", t).expect("count");
    assert_eq!(count("run_initialized"), 1);
    assert_eq!(count("day_started"), 3);
    assert_eq!(count("day_completed"), 3);
    assert_eq!(count("daily_audit_completed"), 3);
}

// ─────────────────────────────────────────────────────────────────────────────
// Operator commands
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn invalid_commands_are_rejected_as_events() {
    let mut engine = engine();
    let too_low = engine.submit_command(set_cpc(1, dec!(0.01)));
    let unknown = engine.submit_command(set_cpc(9, dec!(0.60)));
    let valid = engine.submit_command(set_cpc(1, dec!(0.60)));
    assert_eq!(too_low, "cmd-2024-11-10-1");
    assert_eq!(valid, "cmd-2024-11-10-3");

    engine.run_day().expect("run day");

    let entries = engine.events_for_date(start()).expect("events");
    let rejected: Vec<_> = entries
        .iter()
        .filter(|e| e.event_type == "operator_command_rejected")
        .collect();
    assert_eq!(rejected.len(), 2);
    assert!(rejected[0].payload.contains(&too_low));
    assert!(rejected[1].payload.contains(&unknown));
    assert!(rejected.iter().all(|e| e.subsystem == "engine"));

    let applied: Vec<_> = entries
        .iter()
        .filter(|e| e.event_type == "operator_command_applied")
        .collect();
    assert_eq!(applied.len(), 1);
    assert!(applied[0].payload.contains(&valid));
    assert!(applied[0].payload.contains("set_source_settings"));

    assert_eq!(source_settings(&engine, 1), (Some(dec!(0.6)), Some(dec!(30))));
}

#[test]
fn commands_are_applied_before_the_jobs_and_only_once() {
    let mut engine = engine();
    engine.submit_command(set_cpc(2, dec!(0.45)));
    engine.run_days(2).expect("run days");

    assert_eq!(engine.store.event_count("engine-test", "operator_command_applied").expect("count"), 1);
    assert_eq!(source_settings(&engine, 2), (Some(dec!(0.45)), Some(dec!(20))));
}

#[test]
fn landing_mode_freezes_later_operator_changes() {
    let mut engine = engine();
    engine.submit_command(OperatorCommand::SetCampaignLandingMode {
        campaign_id: 1,
        landing_mode: true,
    });
    engine.submit_command(set_cpc(1, dec!(0.60)));
    engine.run_day().expect("run day");

    let types = event_types(&engine, start());
    let commands: Vec<&str> = types
        .iter()
        .map(String::as_str)
        .filter(|t| t.starts_with("operator_command"))
        .collect();
    assert_eq!(commands, vec!["operator_command_applied", "operator_command_rejected"]);
    assert!(engine.store.get_campaign(1).expect("campaign").landing_mode);
    assert_eq!(source_settings(&engine, 1).0, Some(dec!(0.50)));
}

#[test]
fn enabling_budget_autopilot_reallocates_and_runs_the_same_day() {
    let mut engine = engine();
    engine.submit_command(OperatorCommand::SetAdGroupAutopilot {
        ad_group_id: 1,
        autopilot_state: AutopilotState::ActiveCpcBudget,
        autopilot_daily_budget: Some(dec!(100)),
    });
    engine.run_day().expect("run day");

    // No stats yet, so the budget is split evenly over the active sources.
    assert_eq!(source_settings(&engine, 1), (Some(dec!(0.50)), Some(dec!(50))));
    assert_eq!(source_settings(&engine, 2), (Some(dec!(0.40)), Some(dec!(50))));
    assert_eq!(source_settings(&engine, 3).1, Some(dec!(10)));

    let logs = &engine.autopilot().expect("autopilot registered").last_run;
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.new_daily_budget == Some(dec!(50))));

    // The reallocation already wrote the split, so the job changed nothing
    // and no one is emailed; the audits agree with the result.
    assert!(engine.store.outbox(None).expect("outbox").is_empty());
    assert!(engine.last_alarms().is_empty());
}

#[test]
fn activating_a_source_under_budget_autopilot_reallocates() {
    let mut engine = engine();
    engine.submit_command(OperatorCommand::SetAdGroupAutopilot {
        ad_group_id: 1,
        autopilot_state: AutopilotState::ActiveCpcBudget,
        autopilot_daily_budget: Some(dec!(90)),
    });
    engine.run_day().expect("day 1");
    assert_eq!(source_settings(&engine, 1).1, Some(dec!(45)));

    engine.submit_command(OperatorCommand::SetSourceSettings {
        ad_group_id: 1,
        source_id: 3,
        cpc_cc: None,
        cpm: None,
        daily_budget_cc: None,
        state: Some(SettingsState::Active),
    });
    engine.run_day().expect("day 2");

    let budgets: Vec<Option<Decimal>> = (1..=3).map(|s| source_settings(&engine, s).1).collect();
    assert_eq!(budgets, vec![Some(dec!(30)), Some(dec!(30)), Some(dec!(30))]);
}

#[test]
fn a_failed_reallocation_rolls_back_the_whole_command() {
    let mut engine = engine();
    // Coarse steps push the yahoo floor above its 40 daily budget ceiling.
    engine.config.autopilot.budget_step = dec!(50);
    let store = &engine.store;
    add_source(store, 4, YAHOO);
    add_ad_group(
        store,
        AdGroupSpec {
            id: 2,
            campaign_id: 1,
            autopilot_state: AutopilotState::ActiveCpcBudget,
            autopilot_daily_budget: Some(dec!(100)),
            max_cpc: None,
            start: d(2024, 11, 1),
        },
    );
    let created = d(2024, 11, 1);
    add_ad_group_source(store, 2, 1, Some(dec!(0.50)), Some(dec!(50)), SettingsState::Active, created);
    let yahoo =
        add_ad_group_source(store, 2, 4, Some(dec!(0.20)), Some(dec!(20)), SettingsState::Inactive, created);

    engine.submit_command(OperatorCommand::SetSourceSettings {
        ad_group_id: 2,
        source_id: 4,
        cpc_cc: None,
        cpm: None,
        daily_budget_cc: None,
        state: Some(SettingsState::Active),
    });
    engine.run_day().expect("run day");

    let count = |t: &str| engine.store.event_count("engine-test", t).expect("count");
    assert_eq!(count("operator_command_rejected"), 1);
    assert_eq!(count("operator_command_applied"), 0);

    let history = engine.store.source_settings_history(yahoo).expect("history");
    assert_eq!(history.len(), 1, "the activation must not survive the rejection");
    assert_eq!(history[0].state, SettingsState::Inactive);
    assert_eq!(history[0].daily_budget_cc, Some(dec!(20)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Daily audit
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn audit_alarms_are_logged_and_mailed_as_a_digest() {
    let mut engine = engine();
    let store = &engine.store;
    add_credit(
        store,
        CreditSpec {
            id: 1,
            account_id: Some(1),
            agency_id: None,
            start: d(2024, 11, 1),
            end: d(2024, 11, 30),
            license_fee: dec!(0.2),
            flat_fee: dec!(0),
        },
    );
    add_budget(store, 1, 1, 1, d(2024, 11, 1), d(2024, 11, 30), dec!(3000));
    // Yesterday's statement has no warehouse counterpart and the campaign
    // is far behind its ideal spend of 720.
    add_statement(store, d(2024, 11, 9), 1, dec!(100), dec!(0));

    engine.run_day().expect("run day");

    let audits: Vec<&str> = engine.last_alarms().iter().map(|a| a.audit).collect();
    assert_eq!(audits, vec!["spend_integrity", "pacing"]);
    assert!(engine.last_alarms()[1].detail.contains("low pacing"));

    let raised = engine
        .events_for_date(start())
        .expect("events")
        .into_iter()
        .filter(|e| e.event_type == "audit_alarm_raised")
        .count();
    assert_eq!(raised, 2);

    let mail = engine.store.outbox(Some("email")).expect("outbox");
    assert_eq!(mail.len(), 1);
    assert_eq!(mail[0].recipient, "ops@example.com");
    assert_eq!(mail[0].subject, "Daily audit 2024-11-10: 2 alarms");
    assert!(mail[0].body.contains("[spend_integrity] media_spend"));
}
