use super::{PacingStore, SpendTotals, WarehouseRow};
use crate::{
    error::PacingResult,
    types::{AdGroupId, SourceId},
};
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};

impl PacingStore {
    // ── Warehouse (mv_master) ─────────────────────────────────────

    /// Insert or overwrite one pre-aggregated row.
    pub fn upsert_warehouse_row(&self, r: &WarehouseRow) -> PacingResult<()> {
        self.conn.execute(
            "INSERT INTO mv_master
             (date, account_id, campaign_id, ad_group_id, source_id, media_spend_nano,
              data_spend_nano, license_fee_nano, margin_nano, clicks, impressions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(date, ad_group_id, source_id) DO UPDATE SET
                account_id = excluded.account_id,
                campaign_id = excluded.campaign_id,
                media_spend_nano = excluded.media_spend_nano,
                data_spend_nano = excluded.data_spend_nano,
                license_fee_nano = excluded.license_fee_nano,
                margin_nano = excluded.margin_nano,
                clicks = excluded.clicks,
                impressions = excluded.impressions",
            params![
                r.date,
                r.account_id,
                r.campaign_id,
                r.ad_group_id,
                r.source_id,
                r.media_spend_nano,
                r.data_spend_nano,
                r.license_fee_nano,
                r.margin_nano,
                r.clicks,
                r.impressions,
            ],
        )?;
        Ok(())
    }

    pub fn warehouse_totals_for_date(&self, date: NaiveDate) -> PacingResult<SpendTotals> {
        let totals = self.conn.query_row(
            "SELECT COALESCE(SUM(media_spend_nano), 0), COALESCE(SUM(data_spend_nano), 0),
                    COALESCE(SUM(license_fee_nano), 0), COALESCE(SUM(margin_nano), 0)
             FROM mv_master WHERE date = ?1",
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

    /// One ad group source's warehouse row for `date`, if the ETL produced one.
    pub fn warehouse_row(
        &self,
        date: NaiveDate,
        ad_group_id: AdGroupId,
        source_id: SourceId,
    ) -> PacingResult<Option<WarehouseRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT date, account_id, campaign_id, ad_group_id, source_id,
                        media_spend_nano, data_spend_nano, license_fee_nano, margin_nano,
                        clicks, impressions
                 FROM mv_master WHERE date = ?1 AND ad_group_id = ?2 AND source_id = ?3",
                params![date, ad_group_id, source_id],
                |row| {
                    Ok(WarehouseRow {
                        date: row.get(0)?,
                        account_id: row.get(1)?,
                        campaign_id: row.get(2)?,
                        ad_group_id: row.get(3)?,
                        source_id: row.get(4)?,
                        media_spend_nano: row.get(5)?,
                        data_spend_nano: row.get(6)?,
                        license_fee_nano: row.get(7)?,
                        margin_nano: row.get(8)?,
                        clicks: row.get(9)?,
                        impressions: row.get(10)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}
