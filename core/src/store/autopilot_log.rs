use super::{
    autopilot_state_col, dec_col, dec_param, opt_dec_col, opt_dec_param, AutopilotLogRow,
    PacingStore,
};
use crate::{error::PacingResult, types::AdGroupId};
use chrono::NaiveDate;
use rusqlite::{params, Row};

impl PacingStore {
    // ── Autopilot log (append-only) ───────────────────────────────

    pub fn insert_autopilot_log(&self, log: &AutopilotLogRow) -> PacingResult<i64> {
        self.conn.execute(
            "INSERT INTO autopilot_log
             (date, created_dt, campaign_id, ad_group_id, source_id, autopilot_type,
              previous_cpc_cc, new_cpc_cc, previous_daily_budget, new_daily_budget,
              yesterday_spend, yesterday_clicks, cpc_comments, budget_comments)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                log.date,
                log.created_dt,
                log.campaign_id,
                log.ad_group_id,
                log.source_id,
                log.autopilot_type.as_str(),
                opt_dec_param(log.previous_cpc_cc),
                opt_dec_param(log.new_cpc_cc),
                opt_dec_param(log.previous_daily_budget),
                opt_dec_param(log.new_daily_budget),
                dec_param(log.yesterday_spend),
                log.yesterday_clicks,
                log.cpc_comments.join(","),
                log.budget_comments.join(","),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn autopilot_logs_for_date(&self, date: NaiveDate) -> PacingResult<Vec<AutopilotLogRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, date, created_dt, campaign_id, ad_group_id, source_id, autopilot_type,
                    previous_cpc_cc, new_cpc_cc, previous_daily_budget, new_daily_budget,
                    yesterday_spend, yesterday_clicks, cpc_comments, budget_comments
             FROM autopilot_log WHERE date = ?1
             ORDER BY ad_group_id ASC, source_id ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![date], map_log)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn autopilot_logs_for_ad_group(
        &self,
        ad_group_id: AdGroupId,
        date: NaiveDate,
    ) -> PacingResult<Vec<AutopilotLogRow>> {
        Ok(self
            .autopilot_logs_for_date(date)?
            .into_iter()
            .filter(|l| l.ad_group_id == ad_group_id)
            .collect())
    }

    pub fn has_autopilot_log(&self, ad_group_id: AdGroupId, date: NaiveDate) -> PacingResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM autopilot_log WHERE ad_group_id = ?1 AND date = ?2",
            params![ad_group_id, date],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn autopilot_log_count(&self) -> PacingResult<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM autopilot_log", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn split_comments(raw: String) -> Vec<String> {
    raw.split(',')
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn map_log(row: &Row<'_>) -> rusqlite::Result<AutopilotLogRow> {
    Ok(AutopilotLogRow {
        id: Some(row.get(0)?),
        date: row.get(1)?,
        created_dt: row.get(2)?,
        campaign_id: row.get(3)?,
        ad_group_id: row.get(4)?,
        source_id: row.get(5)?,
        autopilot_type: autopilot_state_col(row, 6)?,
        previous_cpc_cc: opt_dec_col(row, 7)?,
        new_cpc_cc: opt_dec_col(row, 8)?,
        previous_daily_budget: opt_dec_col(row, 9)?,
        new_daily_budget: opt_dec_col(row, 10)?,
        yesterday_spend: dec_col(row, 11)?,
        yesterday_clicks: row.get(12)?,
        cpc_comments: split_comments(row.get(13)?),
        budget_comments: split_comments(row.get(14)?),
    })
}
