//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Ledger components call `Sql` methods and never execute SQL directly.

mod audit;
mod contract;
mod deposit;
mod movement;
mod settlement;

use crate::{
    config::LedgerConfig,
    deposit_ledger::DepositStatus,
    error::LedgerResult,
    movement_journal::MovementType,
    settlement_engine::SettlementStatus,
};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use std::time::Duration;

pub struct LedgerStore {
    conn: Connection,
}

impl LedgerStore {
    pub fn open(path: &str, busy_timeout: Duration) -> LedgerResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(busy_timeout)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> LedgerResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open whatever the config points at.
    pub fn from_config(config: &LedgerConfig) -> LedgerResult<Self> {
        if config.database_path == ":memory:" {
            Self::in_memory()
        } else {
            Self::open(
                &config.database_path,
                Duration::from_millis(config.busy_timeout_ms),
            )
        }
    }

    /// Apply all schema migrations in order. Safe to run more than once.
    pub fn migrate(&self) -> LedgerResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_contracts_deposits.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_settlements.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_audit_log.sql"))?;
        Ok(())
    }

    /// Read-only query surface outside any explicit transaction.
    pub fn sql(&self) -> Sql<'_> {
        Sql { conn: &self.conn }
    }

    /// Start a write transaction that takes the database write lock up front,
    /// so validation reads and writes see one consistent state.
    pub fn begin_immediate(&mut self) -> LedgerResult<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Raw connection for tooling and fault-injection tests.
    /// Ledger code never uses this.
    pub fn raw(&self) -> &Connection {
        &self.conn
    }
}

/// The SQL surface, borrowed from either a plain connection or an open
/// transaction (`Transaction` derefs to `Connection`).
#[derive(Clone, Copy)]
pub struct Sql<'c> {
    conn: &'c Connection,
}

impl<'c> Sql<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

// ── Enum columns ───────────────────────────────────────────────

macro_rules! text_enum_sql {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                s.parse::<$ty>()
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

text_enum_sql!(DepositStatus);
text_enum_sql!(MovementType);
text_enum_sql!(SettlementStatus);
