use super::Sql;
use crate::{
    audit::AuditEntry,
    error::{LedgerError, LedgerResult},
};
use chrono::{DateTime, Utc};
use rusqlite::params;

impl Sql<'_> {
    pub fn insert_audit(&self, entry: &AuditEntry) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO audit_log (entity_type, entity_id, action, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.entity_type,
                entry.entity_id,
                entry.action,
                serde_json::to_string(&entry.details)?,
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    /// Audit rows for one entity, oldest first.
    pub fn audit_trail(&self, entity_type: &str, entity_id: &str) -> LedgerResult<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT audit_id, entity_type, entity_id, action, details, created_at
             FROM audit_log
             WHERE entity_type = ?1 AND entity_id = ?2
             ORDER BY audit_id ASC",
        )?;
        let raw = stmt
            .query_map(params![entity_type, entity_id], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, DateTime<Utc>>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(audit_id, entity_type, entity_id, action, details, created_at)| {
                let details: serde_json::Value = serde_json::from_str(&details)?;
                Ok::<_, LedgerError>(AuditEntry {
                    audit_id: Some(audit_id),
                    entity_type,
                    entity_id,
                    action,
                    details,
                    created_at,
                })
            })
            .collect::<LedgerResult<Vec<_>>>()
    }

    pub fn audit_count(&self) -> LedgerResult<i64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM audit_log", [], |r| r.get(0))?;
        Ok(n)
    }
}
