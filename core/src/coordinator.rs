//! Transaction coordinator.
//!
//! RULE: every mutating ledger operation runs through `atomically`.
//! Validation reads, row writes across deposits, movements, settlements and
//! adjustments, and the audit record commit together or not at all.

use crate::{
    audit::AuditEntry,
    clock::LedgerClock,
    error::{LedgerError, LedgerResult},
    store::{LedgerStore, Sql},
};
use chrono::{DateTime, Utc};
use rusqlite::Transaction;

/// The open transaction handed to an operation body.
pub struct UnitOfWork<'t> {
    tx: Transaction<'t>,
    now: DateTime<Utc>,
    audits: usize,
    unchanged: bool,
}

impl<'t> UnitOfWork<'t> {
    pub fn sql(&self) -> Sql<'_> {
        Sql::new(&self.tx)
    }

    /// The instant stamped on every row this unit of work writes.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Declare that the operation found nothing to do. The transaction is
    /// rolled back instead of committed, so no audit record is required.
    pub fn unchanged(&mut self) {
        self.unchanged = true;
    }

    /// Write an audit record inside the transaction. A failure here fails
    /// the whole operation.
    pub fn audit(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        action: &str,
        details: serde_json::Value,
    ) -> LedgerResult<()> {
        let entry = AuditEntry {
            audit_id: None,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            action: action.to_string(),
            details,
            created_at: self.now,
        };
        self.sql().insert_audit(&entry)?;
        self.audits += 1;
        Ok(())
    }
}

/// Run `body` in one IMMEDIATE transaction and commit it with its audit trail.
///
/// Errors roll back every row touched, are logged, and come back tagged with
/// `operation` and `entity_id`.
pub fn atomically<T, F>(
    store: &mut LedgerStore,
    clock: &LedgerClock,
    operation: &'static str,
    entity_id: &str,
    body: F,
) -> LedgerResult<T>
where
    F: FnOnce(&mut UnitOfWork<'_>) -> LedgerResult<T>,
{
    match run(store, clock.now(), operation, body) {
        Ok(value) => {
            log::debug!("{operation} committed for {entity_id}");
            Ok(value)
        }
        Err(err) => {
            log::error!("{operation} rolled back for {entity_id}: {err}");
            Err(err.in_operation(operation, entity_id))
        }
    }
}

fn run<T, F>(
    store: &mut LedgerStore,
    now: DateTime<Utc>,
    operation: &'static str,
    body: F,
) -> LedgerResult<T>
where
    F: FnOnce(&mut UnitOfWork<'_>) -> LedgerResult<T>,
{
    let tx = store.begin_immediate()?;
    let mut uow = UnitOfWork {
        tx,
        now,
        audits: 0,
        unchanged: false,
    };
    // Dropping `uow` on any early return rolls the transaction back.
    let value = body(&mut uow)?;
    if uow.unchanged && uow.audits == 0 {
        uow.tx.rollback()?;
        return Ok(value);
    }
    if uow.audits == 0 {
        return Err(LedgerError::Other(anyhow::anyhow!(
            "{operation} produced no audit record"
        )));
    }
    uow.tx.commit()?;
    Ok(value)
}
