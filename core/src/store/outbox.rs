use super::{OutboxRow, PacingStore};
use crate::error::PacingResult;
use chrono::NaiveDateTime;
use rusqlite::params;

impl PacingStore {
    // ── Notification outbox ───────────────────────────────────────

    pub fn insert_outbox(
        &self,
        kind: &str,
        recipient: &str,
        subject: &str,
        body: &str,
        created_dt: NaiveDateTime,
    ) -> PacingResult<i64> {
        self.conn.execute(
            "INSERT INTO notification_outbox (kind, recipient, subject, body, created_dt)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![kind, recipient, subject, body, created_dt],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn outbox(&self, kind: Option<&str>) -> PacingResult<Vec<OutboxRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, recipient, subject, body, created_dt
             FROM notification_outbox
             WHERE ?1 IS NULL OR kind = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![kind], |row| {
                Ok(OutboxRow {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    recipient: row.get(2)?,
                    subject: row.get(3)?,
                    body: row.get(4)?,
                    created_dt: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
