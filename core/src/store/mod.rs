//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Jobs call store methods and never execute SQL directly.
//!
//! Money is persisted as decimal TEXT, statement and warehouse costs as
//! integer nano units, dates as ISO `YYYY-MM-DD` TEXT.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use rusqlite::{params, types::Type, Connection, Row};
use std::str::FromStr;

use crate::{
    error::PacingResult,
    event::EventLogEntry,
    types::{
        AccountId, AdGroupId, AdGroupSourceId, AgencyId, AutopilotState, BudgetId, CampaignId,
        CreditId, Nano, SettingsState, SourceId, SourceTypeId, overlap_days, days_inclusive,
    },
};

mod autopilot_log;
mod budget;
mod hierarchy;
mod outbox;
mod settings;
mod warehouse;

pub struct PacingStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl PacingStore {
    pub fn open(path: &str) -> PacingResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> PacingResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> PacingResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_hierarchy.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_budgets.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_settings.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/005_autopilot_log.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/006_warehouse.sql"))?;
        Ok(())
    }

    /// Run `f` atomically. Nested calls join the outer transaction.
    pub fn transaction<T>(&self, f: impl FnOnce(&Self) -> PacingResult<T>) -> PacingResult<T> {
        if !self.conn.is_autocommit() {
            return f(self);
        }
        let tx = self.conn.unchecked_transaction()?;
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(&self, run_id: &str, version: &str, start_date: NaiveDate) -> PacingResult<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, version, start_date) VALUES (?1, ?2, ?3)",
            params![run_id, version, start_date],
        )?;
        Ok(())
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> PacingResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, date, subsystem, event_type, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.run_id,
                entry.date,
                entry.subsystem,
                entry.event_type,
                entry.payload,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_date(&self, run_id: &str, date: NaiveDate) -> PacingResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, date, subsystem, event_type, payload
             FROM event_log WHERE run_id = ?1 AND date = ?2
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id, date], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    run_id: row.get(1)?,
                    date: row.get(2)?,
                    subsystem: row.get(3)?,
                    event_type: row.get(4)?,
                    payload: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn event_count(&self, run_id: &str, event_type: &str) -> PacingResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM event_log WHERE run_id = ?1 AND event_type = ?2",
            params![run_id, event_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

// ── Column helpers ────────────────────────────────────────────────

pub(crate) fn dec_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_dec_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        Decimal::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

pub(crate) fn opt_dec_param(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.normalize().to_string())
}

pub(crate) fn dec_param(value: Decimal) -> String {
    value.normalize().to_string()
}

fn invalid_enum(idx: usize, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unknown value '{raw}'").into(),
    )
}

pub(crate) fn state_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<SettingsState> {
    let raw: String = row.get(idx)?;
    SettingsState::parse(&raw).ok_or_else(|| invalid_enum(idx, &raw))
}

pub(crate) fn autopilot_state_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<AutopilotState> {
    let raw: String = row.get(idx)?;
    AutopilotState::parse(&raw).ok_or_else(|| invalid_enum(idx, &raw))
}

// ── Hierarchy row types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct AccountRow {
    pub id: AccountId,
    pub name: String,
    pub agency_id: Option<AgencyId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CampaignRow {
    pub id: CampaignId,
    pub account_id: AccountId,
    pub name: String,
    pub landing_mode: bool,
    pub account_manager_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdGroupRow {
    pub id: AdGroupId,
    pub campaign_id: CampaignId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    pub id: SourceId,
    pub name: String,
    pub source_type_id: SourceTypeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdGroupSourceRow {
    pub id: AdGroupSourceId,
    pub ad_group_id: AdGroupId,
    pub source_id: SourceId,
}

// ── Budget row types ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CreditRow {
    pub id: CreditId,
    pub account_id: Option<AccountId>,
    pub agency_id: Option<AgencyId>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub amount: Decimal,
    /// Fraction of the total budget kept as platform fee.
    pub license_fee: Decimal,
    pub flat_fee: Decimal,
}

impl CreditRow {
    /// Flat fee recognised over `[start, end]`, prorated by credit days.
    pub fn flat_fee_on_date_range(&self, start: NaiveDate, end: NaiveDate) -> Decimal {
        let credit_days = days_inclusive(self.start_date, self.end_date);
        if credit_days == 0 || self.flat_fee.is_zero() {
            return Decimal::ZERO;
        }
        let overlap = overlap_days(self.start_date, self.end_date, start, end);
        self.flat_fee * Decimal::from(overlap) / Decimal::from(credit_days)
    }

    /// Signed by the agency rather than by one of its accounts.
    pub fn is_agency_credit(&self) -> bool {
        self.account_id.is_none() && self.agency_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BudgetRow {
    pub id: BudgetId,
    pub campaign_id: CampaignId,
    pub credit_id: CreditId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub amount: Decimal,
    pub freed_amount: Decimal,
    pub margin: Option<Decimal>,
}

impl BudgetRow {
    pub fn allocated_amount(&self) -> Decimal {
        self.amount - self.freed_amount
    }

    pub fn days(&self) -> i64 {
        days_inclusive(self.start_date, self.end_date)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatementRow {
    pub date: NaiveDate,
    pub budget_id: BudgetId,
    pub media_spend_nano: Nano,
    pub data_spend_nano: Nano,
    pub license_fee_nano: Nano,
    pub margin_nano: Nano,
}

impl StatementRow {
    pub fn spend_nano(&self) -> Nano {
        self.media_spend_nano + self.data_spend_nano
    }
}

/// A budget joined with its credit and its campaign's account / agency.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetWithCredit {
    pub budget: BudgetRow,
    pub credit: CreditRow,
    pub account_id: AccountId,
    pub agency_id: Option<AgencyId>,
}

// ── Settings row types ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct AdGroupSettingsRow {
    pub id: Option<i64>,
    pub ad_group_id: AdGroupId,
    pub created_dt: NaiveDateTime,
    pub state: SettingsState,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub max_cpc: Option<Decimal>,
    pub autopilot_state: AutopilotState,
    pub autopilot_daily_budget: Option<Decimal>,
    pub changed_by: String,
}

impl AdGroupSettingsRow {
    /// Derived running status: active state and `date` inside the flight.
    pub fn is_running_on(&self, date: NaiveDate) -> bool {
        self.state == SettingsState::Active
            && self.start_date <= date
            && self.end_date.map_or(true, |end| end >= date)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettingsRow {
    pub id: Option<i64>,
    pub ad_group_source_id: AdGroupSourceId,
    pub created_dt: NaiveDateTime,
    pub cpc_cc: Option<Decimal>,
    pub cpm: Option<Decimal>,
    pub daily_budget_cc: Option<Decimal>,
    pub state: SettingsState,
    pub changed_by: String,
}

/// An ad group source with its source, source type id and current settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AdGroupSourceState {
    pub ad_group_source: AdGroupSourceRow,
    pub source: SourceRow,
    pub settings: SourceSettingsRow,
}

// ── Autopilot log ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct AutopilotLogRow {
    pub id: Option<i64>,
    pub date: NaiveDate,
    pub created_dt: NaiveDateTime,
    pub campaign_id: CampaignId,
    pub ad_group_id: AdGroupId,
    pub source_id: SourceId,
    pub autopilot_type: AutopilotState,
    pub previous_cpc_cc: Option<Decimal>,
    pub new_cpc_cc: Option<Decimal>,
    pub previous_daily_budget: Option<Decimal>,
    pub new_daily_budget: Option<Decimal>,
    pub yesterday_spend: Decimal,
    pub yesterday_clicks: i64,
    pub cpc_comments: Vec<String>,
    pub budget_comments: Vec<String>,
}

// ── Warehouse / outbox ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WarehouseRow {
    pub date: NaiveDate,
    pub account_id: AccountId,
    pub campaign_id: CampaignId,
    pub ad_group_id: AdGroupId,
    pub source_id: SourceId,
    pub media_spend_nano: Nano,
    pub data_spend_nano: Nano,
    pub license_fee_nano: Nano,
    pub margin_nano: Nano,
    pub clicks: i64,
    pub impressions: i64,
}

/// Summed nano costs of one day, either side of the spend integrity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpendTotals {
    pub media_spend_nano: Nano,
    pub data_spend_nano: Nano,
    pub license_fee_nano: Nano,
    pub margin_nano: Nano,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRow {
    pub id: i64,
    pub kind: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub created_dt: NaiveDateTime,
}
