use super::{
    dec_col, dec_param, opt_dec_col, opt_dec_param, BudgetRow, BudgetWithCredit, CreditRow,
    PacingStore, SpendTotals, StatementRow,
};
use crate::{
    error::{PacingError, PacingResult},
    types::{BudgetId, Nano},
};
use chrono::NaiveDate;
use rusqlite::params;
use rust_decimal::Decimal;

impl PacingStore {
    // ── Credits and budgets ───────────────────────────────────────

    pub fn insert_credit(&self, credit: &CreditRow) -> PacingResult<()> {
        self.conn.execute(
            "INSERT INTO credit_line_item
             (id, account_id, agency_id, start_date, end_date, amount, license_fee, flat_fee)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                credit.id,
                credit.account_id,
                credit.agency_id,
                credit.start_date,
                credit.end_date,
                dec_param(credit.amount),
                dec_param(credit.license_fee),
                dec_param(credit.flat_fee),
            ],
        )?;
        Ok(())
    }

    pub fn insert_budget(&self, budget: &BudgetRow) -> PacingResult<()> {
        self.conn.execute(
            "INSERT INTO budget_line_item
             (id, campaign_id, credit_id, start_date, end_date, amount, freed_amount, margin)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                budget.id,
                budget.campaign_id,
                budget.credit_id,
                budget.start_date,
                budget.end_date,
                dec_param(budget.amount),
                dec_param(budget.freed_amount),
                opt_dec_param(budget.margin),
            ],
        )?;
        Ok(())
    }

    /// True once any statement of the budget records spend.
    pub fn budget_has_spend(&self, budget_id: BudgetId) -> PacingResult<bool> {
        let spent: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM budget_daily_statement
             WHERE budget_id = ?1 AND media_spend_nano + data_spend_nano > 0",
            params![budget_id],
            |row| row.get(0),
        )?;
        Ok(spent > 0)
    }

    /// Change a budget's amount. Refused once spend has started.
    pub fn update_budget_amount(&self, budget_id: BudgetId, amount: Decimal) -> PacingResult<()> {
        self.transaction(|store| {
            if store.budget_has_spend(budget_id)? {
                return Err(PacingError::BudgetAmountLocked { budget_id });
            }
            let changed = store.conn.execute(
                "UPDATE budget_line_item SET amount = ?1 WHERE id = ?2",
                params![dec_param(amount), budget_id],
            )?;
            if changed == 0 {
                return Err(PacingError::NotFound { entity: "budget", id: budget_id });
            }
            Ok(())
        })
    }

    /// Release unspent budget back to the credit.
    pub fn set_budget_freed_amount(&self, budget_id: BudgetId, freed: Decimal) -> PacingResult<()> {
        let changed = self.conn.execute(
            "UPDATE budget_line_item SET freed_amount = ?1 WHERE id = ?2",
            params![dec_param(freed), budget_id],
        )?;
        if changed == 0 {
            return Err(PacingError::NotFound { entity: "budget", id: budget_id });
        }
        Ok(())
    }

    /// Budgets whose flight intersects `[start, end]`, joined with their
    /// credit and their campaign's account and agency.
    pub fn budgets_overlapping(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> PacingResult<Vec<BudgetWithCredit>> {
        let mut stmt = self.conn.prepare(
            "SELECT b.id, b.campaign_id, b.credit_id, b.start_date, b.end_date,
                    b.amount, b.freed_amount, b.margin,
                    c.account_id, a.agency_id,
                    cr.id, cr.account_id, cr.agency_id, cr.start_date, cr.end_date,
                    cr.amount, cr.license_fee, cr.flat_fee
             FROM budget_line_item b
             JOIN campaign c ON c.id = b.campaign_id
             JOIN account a ON a.id = c.account_id
             JOIN credit_line_item cr ON cr.id = b.credit_id
             WHERE b.start_date <= ?1 AND b.end_date >= ?2
             ORDER BY b.id ASC",
        )?;
        let rows = stmt
            .query_map(params![end, start], |row| {
                Ok(BudgetWithCredit {
                    budget: BudgetRow {
                        id: row.get(0)?,
                        campaign_id: row.get(1)?,
                        credit_id: row.get(2)?,
                        start_date: row.get(3)?,
                        end_date: row.get(4)?,
                        amount: dec_col(row, 5)?,
                        freed_amount: dec_col(row, 6)?,
                        margin: opt_dec_col(row, 7)?,
                    },
                    account_id: row.get(8)?,
                    agency_id: row.get(9)?,
                    credit: CreditRow {
                        id: row.get(10)?,
                        account_id: row.get(11)?,
                        agency_id: row.get(12)?,
                        start_date: row.get(13)?,
                        end_date: row.get(14)?,
                        amount: dec_col(row, 15)?,
                        license_fee: dec_col(row, 16)?,
                        flat_fee: dec_col(row, 17)?,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Daily statements ──────────────────────────────────────────

    pub fn insert_statement(&self, s: &StatementRow) -> PacingResult<()> {
        self.conn.execute(
            "INSERT INTO budget_daily_statement
             (date, budget_id, media_spend_nano, data_spend_nano, license_fee_nano, margin_nano)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                s.date,
                s.budget_id,
                s.media_spend_nano,
                s.data_spend_nano,
                s.license_fee_nano,
                s.margin_nano,
            ],
        )?;
        Ok(())
    }

    /// ETL reprocessing: every statement of `date` is replaced wholesale.
    pub fn replace_statements_for_date(
        &self,
        date: NaiveDate,
        rows: &[StatementRow],
    ) -> PacingResult<()> {
        self.transaction(|store| {
            store.conn.execute(
                "DELETE FROM budget_daily_statement WHERE date = ?1",
                params![date],
            )?;
            for s in rows.iter().filter(|s| s.date == date) {
                store.insert_statement(s)?;
            }
            Ok(())
        })?;
        log::debug!("replaced {} statements for {date}", rows.len());
        Ok(())
    }

    pub fn statements_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> PacingResult<Vec<StatementRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, budget_id, media_spend_nano, data_spend_nano,
                    license_fee_nano, margin_nano
             FROM budget_daily_statement
             WHERE date >= ?1 AND date <= ?2
             ORDER BY date ASC, budget_id ASC",
        )?;
        let rows = stmt
            .query_map(params![start, end], |row| {
                Ok(StatementRow {
                    date: row.get(0)?,
                    budget_id: row.get(1)?,
                    media_spend_nano: row.get(2)?,
                    data_spend_nano: row.get(3)?,
                    license_fee_nano: row.get(4)?,
                    margin_nano: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn statement_totals_for_date(&self, date: NaiveDate) -> PacingResult<SpendTotals> {
        let totals = self.conn.query_row(
            "SELECT COALESCE(SUM(media_spend_nano), 0), COALESCE(SUM(data_spend_nano), 0),
                    COALESCE(SUM(license_fee_nano), 0), COALESCE(SUM(margin_nano), 0)
             FROM budget_daily_statement WHERE date = ?1",
            params![date],
            |row| {
                Ok(SpendTotals {
                    media_spend_nano: row.get(0)?,
                    data_spend_nano: row.get(1)?,
                    license_fee_nano: row.get(2)?,
                    margin_nano: row.get(3)?,
                })
            },
        )?;
        Ok(totals)
    }

    /// Media + data spend of one day across every budget.
    pub fn statement_spend_for_date(&self, date: NaiveDate) -> PacingResult<Nano> {
        let totals = self.statement_totals_for_date(date)?;
        Ok(totals.media_spend_nano + totals.data_spend_nano)
    }
}
