use super::{
    autopilot_state_col, opt_dec_col, opt_dec_param, state_col, AdGroupSettingsRow,
    AdGroupSourceRow, AdGroupSourceState, PacingStore, SourceRow, SourceSettingsRow,
};
use crate::{
    error::PacingResult,
    types::{AdGroupId, AdGroupSourceId},
};
use rusqlite::{params, OptionalExtension, Row};

const AD_GROUP_SETTINGS_COLUMNS: &str = "id, ad_group_id, created_dt, state, start_date, end_date,
     max_cpc, autopilot_state, autopilot_daily_budget, changed_by";

const SOURCE_SETTINGS_COLUMNS: &str =
    "id, ad_group_source_id, created_dt, cpc_cc, cpm, daily_budget_cc, state, changed_by";

impl PacingStore {
    // ── Ad group settings (append-only) ───────────────────────────

    /// Append a new settings version. Returns its id.
    pub fn insert_ad_group_settings(&self, s: &AdGroupSettingsRow) -> PacingResult<i64> {
        self.conn.execute(
            "INSERT INTO ad_group_settings
             (ad_group_id, created_dt, state, start_date, end_date, max_cpc,
              autopilot_state, autopilot_daily_budget, changed_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                s.ad_group_id,
                s.created_dt,
                s.state.as_str(),
                s.start_date,
                s.end_date,
                opt_dec_param(s.max_cpc),
                s.autopilot_state.as_str(),
                opt_dec_param(s.autopilot_daily_budget),
                s.changed_by,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn current_ad_group_settings(
        &self,
        ad_group_id: AdGroupId,
    ) -> PacingResult<Option<AdGroupSettingsRow>> {
        let sql = format!(
            "SELECT {AD_GROUP_SETTINGS_COLUMNS} FROM ad_group_settings
             WHERE ad_group_id = ?1
             ORDER BY created_dt DESC, id DESC LIMIT 1"
        );
        let row = self
            .conn
            .query_row(&sql, params![ad_group_id], map_ad_group_settings)
            .optional()?;
        Ok(row)
    }

    pub fn ad_group_settings_history(
        &self,
        ad_group_id: AdGroupId,
    ) -> PacingResult<Vec<AdGroupSettingsRow>> {
        let sql = format!(
            "SELECT {AD_GROUP_SETTINGS_COLUMNS} FROM ad_group_settings
             WHERE ad_group_id = ?1
             ORDER BY created_dt ASC, id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![ad_group_id], map_ad_group_settings)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Ad group source settings (append-only) ────────────────────

    /// Append a new settings version. Returns its id.
    pub fn insert_source_settings(&self, s: &SourceSettingsRow) -> PacingResult<i64> {
        self.conn.execute(
            "INSERT INTO ad_group_source_settings
             (ad_group_source_id, created_dt, cpc_cc, cpm, daily_budget_cc, state, changed_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                s.ad_group_source_id,
                s.created_dt,
                opt_dec_param(s.cpc_cc),
                opt_dec_param(s.cpm),
                opt_dec_param(s.daily_budget_cc),
                s.state.as_str(),
                s.changed_by,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn current_source_settings(
        &self,
        ad_group_source_id: AdGroupSourceId,
    ) -> PacingResult<Option<SourceSettingsRow>> {
        let sql = format!(
            "SELECT {SOURCE_SETTINGS_COLUMNS} FROM ad_group_source_settings
             WHERE ad_group_source_id = ?1
             ORDER BY created_dt DESC, id DESC LIMIT 1"
        );
        let row = self
            .conn
            .query_row(&sql, params![ad_group_source_id], map_source_settings)
            .optional()?;
        Ok(row)
    }

    pub fn source_settings_history(
        &self,
        ad_group_source_id: AdGroupSourceId,
    ) -> PacingResult<Vec<SourceSettingsRow>> {
        let sql = format!(
            "SELECT {SOURCE_SETTINGS_COLUMNS} FROM ad_group_source_settings
             WHERE ad_group_source_id = ?1
             ORDER BY created_dt ASC, id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![ad_group_source_id], map_source_settings)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn source_settings_count(&self) -> PacingResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM ad_group_source_settings",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Every source of an ad group with its current settings, ordered by
    /// source id. Sources that were never configured are left out.
    pub fn ad_group_source_states(
        &self,
        ad_group_id: AdGroupId,
    ) -> PacingResult<Vec<AdGroupSourceState>> {
        let mut stmt = self.conn.prepare(
            "SELECT ags.id, ags.ad_group_id, ags.source_id, s.name, s.source_type_id
             FROM ad_group_source ags
             JOIN source s ON s.id = ags.source_id
             WHERE ags.ad_group_id = ?1
             ORDER BY ags.source_id ASC",
        )?;
        let links = stmt
            .query_map(params![ad_group_id], |row| {
                Ok((
                    AdGroupSourceRow {
                        id: row.get(0)?,
                        ad_group_id: row.get(1)?,
                        source_id: row.get(2)?,
                    },
                    SourceRow {
                        id: row.get(2)?,
                        name: row.get(3)?,
                        source_type_id: row.get(4)?,
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut states = Vec::with_capacity(links.len());
        for (ad_group_source, source) in links {
            if let Some(settings) = self.current_source_settings(ad_group_source.id)? {
                states.push(AdGroupSourceState {
                    ad_group_source,
                    source,
                    settings,
                });
            }
        }
        Ok(states)
    }
}

fn map_ad_group_settings(row: &Row<'_>) -> rusqlite::Result<AdGroupSettingsRow> {
    Ok(AdGroupSettingsRow {
        id: Some(row.get(0)?),
        ad_group_id: row.get(1)?,
        created_dt: row.get(2)?,
        state: state_col(row, 3)?,
        start_date: row.get(4)?,
        end_date: row.get(5)?,
        max_cpc: opt_dec_col(row, 6)?,
        autopilot_state: autopilot_state_col(row, 7)?,
        autopilot_daily_budget: opt_dec_col(row, 8)?,
        changed_by: row.get(9)?,
    })
}

fn map_source_settings(row: &Row<'_>) -> rusqlite::Result<SourceSettingsRow> {
    Ok(SourceSettingsRow {
        id: Some(row.get(0)?),
        ad_group_source_id: row.get(1)?,
        created_dt: row.get(2)?,
        cpc_cc: opt_dec_col(row, 3)?,
        cpm: opt_dec_col(row, 4)?,
        daily_budget_cc: opt_dec_col(row, 5)?,
        state: state_col(row, 6)?,
        changed_by: row.get(7)?,
    })
}
