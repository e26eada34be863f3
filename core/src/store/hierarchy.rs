use super::{
    dec_col, dec_param, opt_dec_col, opt_dec_param, AccountRow, AdGroupRow, AdGroupSourceRow,
    CampaignRow, PacingStore, SourceRow,
};
use crate::{
    config::SourceType,
    error::{PacingError, PacingResult},
    types::{AccountId, AdGroupId, AgencyId, CampaignId, SourceId, SourceTypeId},
};
use rusqlite::{params, OptionalExtension};

impl PacingStore {
    // ── Agency / account / campaign ───────────────────────────────

    pub fn insert_agency(&self, id: AgencyId, name: &str) -> PacingResult<()> {
        self.conn.execute(
            "INSERT INTO agency (id, name) VALUES (?1, ?2)",
            params![id, name],
        )?;
        Ok(())
    }

    pub fn insert_account(&self, account: &AccountRow) -> PacingResult<()> {
        self.conn.execute(
            "INSERT INTO account (id, name, agency_id) VALUES (?1, ?2, ?3)",
            params![account.id, account.name, account.agency_id],
        )?;
        Ok(())
    }

    pub fn get_account(&self, id: AccountId) -> PacingResult<AccountRow> {
        self.conn
            .query_row(
                "SELECT id, name, agency_id FROM account WHERE id = ?1",
                params![id],
                |row| {
                    Ok(AccountRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        agency_id: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or(PacingError::NotFound { entity: "account", id })
    }

    pub fn accounts_for_agency(&self, agency_id: AgencyId) -> PacingResult<Vec<AccountRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, agency_id FROM account WHERE agency_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![agency_id], |row| {
                Ok(AccountRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    agency_id: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn insert_campaign(&self, campaign: &CampaignRow) -> PacingResult<()> {
        self.conn.execute(
            "INSERT INTO campaign (id, account_id, name, landing_mode, account_manager_email)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                campaign.id,
                campaign.account_id,
                campaign.name,
                campaign.landing_mode as i32,
                campaign.account_manager_email,
            ],
        )?;
        Ok(())
    }

    pub fn get_campaign(&self, id: CampaignId) -> PacingResult<CampaignRow> {
        self.conn
            .query_row(
                "SELECT id, account_id, name, landing_mode, account_manager_email
                 FROM campaign WHERE id = ?1",
                params![id],
                |row| {
                    Ok(CampaignRow {
                        id: row.get(0)?,
                        account_id: row.get(1)?,
                        name: row.get(2)?,
                        landing_mode: row.get::<_, i32>(3)? != 0,
                        account_manager_email: row.get(4)?,
                    })
                },
            )
            .optional()?
            .ok_or(PacingError::NotFound { entity: "campaign", id })
    }

    pub fn set_campaign_landing_mode(&self, id: CampaignId, landing_mode: bool) -> PacingResult<()> {
        let changed = self.conn.execute(
            "UPDATE campaign SET landing_mode = ?1 WHERE id = ?2",
            params![landing_mode as i32, id],
        )?;
        if changed == 0 {
            return Err(PacingError::NotFound { entity: "campaign", id });
        }
        Ok(())
    }

    // ── Source catalog ────────────────────────────────────────────

    pub fn upsert_source_type(&self, st: &SourceType) -> PacingResult<()> {
        self.conn.execute(
            "INSERT INTO source_type (id, slug, min_cpc, max_cpc, min_daily_budget,
                max_daily_budget, supports_cpm, min_cpm, max_cpm, cpc_decimal_places)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                slug = excluded.slug,
                min_cpc = excluded.min_cpc,
                max_cpc = excluded.max_cpc,
                min_daily_budget = excluded.min_daily_budget,
                max_daily_budget = excluded.max_daily_budget,
                supports_cpm = excluded.supports_cpm,
                min_cpm = excluded.min_cpm,
                max_cpm = excluded.max_cpm,
                cpc_decimal_places = excluded.cpc_decimal_places",
            params![
                st.id,
                st.slug,
                dec_param(st.min_cpc),
                dec_param(st.max_cpc),
                dec_param(st.min_daily_budget),
                dec_param(st.max_daily_budget),
                st.supports_cpm as i32,
                opt_dec_param(st.min_cpm),
                opt_dec_param(st.max_cpm),
                st.cpc_decimal_places,
            ],
        )?;
        Ok(())
    }

    pub fn get_source_type(&self, id: SourceTypeId) -> PacingResult<SourceType> {
        self.conn
            .query_row(
                "SELECT id, slug, min_cpc, max_cpc, min_daily_budget, max_daily_budget,
                        supports_cpm, min_cpm, max_cpm, cpc_decimal_places
                 FROM source_type WHERE id = ?1",
                params![id],
                |row| {
                    Ok(SourceType {
                        id: row.get(0)?,
                        slug: row.get(1)?,
                        min_cpc: dec_col(row, 2)?,
                        max_cpc: dec_col(row, 3)?,
                        min_daily_budget: dec_col(row, 4)?,
                        max_daily_budget: dec_col(row, 5)?,
                        supports_cpm: row.get::<_, i32>(6)? != 0,
                        min_cpm: opt_dec_col(row, 7)?,
                        max_cpm: opt_dec_col(row, 8)?,
                        cpc_decimal_places: row.get(9)?,
                    })
                },
            )
            .optional()?
            .ok_or(PacingError::NotFound { entity: "source type", id })
    }

    pub fn insert_source(&self, source: &SourceRow) -> PacingResult<()> {
        self.conn.execute(
            "INSERT INTO source (id, name, source_type_id) VALUES (?1, ?2, ?3)",
            params![source.id, source.name, source.source_type_id],
        )?;
        Ok(())
    }

    // ── Ad groups ─────────────────────────────────────────────────

    pub fn insert_ad_group(&self, ad_group: &AdGroupRow) -> PacingResult<()> {
        self.conn.execute(
            "INSERT INTO ad_group (id, campaign_id, name) VALUES (?1, ?2, ?3)",
            params![ad_group.id, ad_group.campaign_id, ad_group.name],
        )?;
        Ok(())
    }

    pub fn get_ad_group(&self, id: AdGroupId) -> PacingResult<AdGroupRow> {
        self.conn
            .query_row(
                "SELECT id, campaign_id, name FROM ad_group WHERE id = ?1",
                params![id],
                |row| {
                    Ok(AdGroupRow {
                        id: row.get(0)?,
                        campaign_id: row.get(1)?,
                        name: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or(PacingError::NotFound { entity: "ad group", id })
    }

    pub fn all_ad_groups(&self) -> PacingResult<Vec<AdGroupRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, campaign_id, name FROM ad_group ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AdGroupRow {
                    id: row.get(0)?,
                    campaign_id: row.get(1)?,
                    name: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Link a source to an ad group. Returns the ad group source id.
    pub fn insert_ad_group_source(
        &self,
        ad_group_id: AdGroupId,
        source_id: SourceId,
    ) -> PacingResult<i64> {
        self.conn.execute(
            "INSERT INTO ad_group_source (ad_group_id, source_id) VALUES (?1, ?2)",
            params![ad_group_id, source_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_ad_group_source(
        &self,
        ad_group_id: AdGroupId,
        source_id: SourceId,
    ) -> PacingResult<AdGroupSourceRow> {
        self.conn
            .query_row(
                "SELECT id, ad_group_id, source_id FROM ad_group_source
                 WHERE ad_group_id = ?1 AND source_id = ?2",
                params![ad_group_id, source_id],
                |row| {
                    Ok(AdGroupSourceRow {
                        id: row.get(0)?,
                        ad_group_id: row.get(1)?,
                        source_id: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or(PacingError::NotFound {
                entity: "ad group source",
                id: source_id,
            })
    }

    pub fn get_ad_group_source_by_id(&self, id: i64) -> PacingResult<AdGroupSourceRow> {
        self.conn
            .query_row(
                "SELECT id, ad_group_id, source_id FROM ad_group_source WHERE id = ?1",
                params![id],
                |row| {
                    Ok(AdGroupSourceRow {
                        id: row.get(0)?,
                        ad_group_id: row.get(1)?,
                        source_id: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or(PacingError::NotFound { entity: "ad group source", id })
    }

    pub fn get_source(&self, id: SourceId) -> PacingResult<SourceRow> {
        self.conn
            .query_row(
                "SELECT id, name, source_type_id FROM source WHERE id = ?1",
                params![id],
                |row| {
                    Ok(SourceRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        source_type_id: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or(PacingError::NotFound { entity: "source", id })
    }
}
