use super::Sql;
use crate::{
    deposit_ledger::{Deposit, DepositFilters, DepositStatus, Receivable},
    error::LedgerResult,
    types::{from_cents, to_cents, Cents},
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, ToSql};

const DEPOSIT_COLUMNS: &str = "d.deposit_id, d.contract_id, d.property_id, d.tenant_id,
        d.deposit_amount, d.current_balance, d.status, d.payment_date,
        d.return_date, d.return_method, d.return_amount, d.notes,
        d.created_at, d.updated_at";

impl Sql<'_> {
    // ── Deposit rows ───────────────────────────────────────────

    pub fn insert_deposit(&self, d: &Deposit) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO security_deposit (
                deposit_id, contract_id, property_id, tenant_id,
                deposit_amount, current_balance, status, payment_date,
                return_date, return_method, return_amount, notes,
                created_at, updated_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            params![
                d.deposit_id,
                d.contract_id,
                d.property_id,
                d.tenant_id,
                to_cents("deposit_amount", d.deposit_amount)?,
                to_cents("current_balance", d.current_balance)?,
                d.status,
                d.payment_date,
                d.return_date,
                d.return_method,
                d.return_amount
                    .map(|a| to_cents("return_amount", a))
                    .transpose()?,
                d.notes,
                d.created_at,
                d.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_deposit(&self, deposit_id: &str) -> LedgerResult<Option<Deposit>> {
        let sql = format!("SELECT {DEPOSIT_COLUMNS} FROM security_deposit d WHERE d.deposit_id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![deposit_id], map_deposit_row)
            .optional()?;
        Ok(row)
    }

    pub fn get_deposit_by_contract(&self, contract_id: &str) -> LedgerResult<Option<Deposit>> {
        let sql = format!("SELECT {DEPOSIT_COLUMNS} FROM security_deposit d WHERE d.contract_id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![contract_id], map_deposit_row)
            .optional()?;
        Ok(row)
    }

    /// Rewrite the agreed amount of a live deposit with its shifted balance.
    #[allow(clippy::too_many_arguments)]
    pub fn update_deposit_terms(
        &self,
        deposit_id: &str,
        deposit_amount: Cents,
        current_balance: Cents,
        status: DepositStatus,
        payment_date: NaiveDate,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE security_deposit
             SET deposit_amount = ?1, current_balance = ?2, status = ?3,
                 payment_date = ?4, notes = COALESCE(?5, notes), updated_at = ?6
             WHERE deposit_id = ?7",
            params![
                deposit_amount,
                current_balance,
                status,
                payment_date,
                notes,
                now,
                deposit_id
            ],
        )?;
        Ok(())
    }

    /// Atomically move the balance by `delta` cents.
    ///
    /// Matches no row (returns false) when the deposit is missing, returned
    /// or archived, or when the result would be negative. The status follows
    /// the balance: below the agreed amount is `partial`, otherwise `active`.
    pub fn apply_balance_delta(
        &self,
        deposit_id: &str,
        delta: Cents,
        now: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        let changed = self.conn.execute(
            "UPDATE security_deposit
             SET current_balance = current_balance + ?1,
                 status = CASE WHEN current_balance + ?1 < deposit_amount
                               THEN 'partial' ELSE 'active' END,
                 updated_at = ?2
             WHERE deposit_id = ?3
               AND status IN ('active','partial')
               AND current_balance + ?1 >= 0",
            params![delta, now, deposit_id],
        )?;
        Ok(changed == 1)
    }

    /// Close out a deposit whose balance has already been paid out.
    pub fn mark_deposit_returned(
        &self,
        deposit_id: &str,
        return_date: NaiveDate,
        return_method: &str,
        return_amount: Cents,
        now: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        let changed = self.conn.execute(
            "UPDATE security_deposit
             SET status = 'returned', current_balance = 0,
                 return_date = ?1, return_method = ?2, return_amount = ?3,
                 updated_at = ?4
             WHERE deposit_id = ?5
               AND status IN ('active','partial')
               AND current_balance = 0",
            params![return_date, return_method, return_amount, now, deposit_id],
        )?;
        Ok(changed == 1)
    }

    /// Soft delete. Balance and journal are left exactly as they are.
    pub fn archive_deposit(&self, deposit_id: &str, now: DateTime<Utc>) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE security_deposit SET status = 'archived', updated_at = ?1
             WHERE deposit_id = ?2",
            params![now, deposit_id],
        )?;
        Ok(())
    }

    pub fn list_deposits(&self, f: &DepositFilters, limit: u32) -> LedgerResult<Vec<Deposit>> {
        let mut sql = format!(
            "SELECT {DEPOSIT_COLUMNS}
             FROM security_deposit d
             LEFT JOIN rental_contract c ON c.contract_id = d.contract_id
             WHERE 1=1"
        );
        let mut args: Vec<&dyn ToSql> = Vec::new();
        if let Some(status) = &f.status {
            args.push(status);
            sql.push_str(&format!(" AND d.status = ?{}", args.len()));
        }
        if let Some(contract_id) = &f.contract_id {
            args.push(contract_id);
            sql.push_str(&format!(" AND d.contract_id = ?{}", args.len()));
        }
        if let Some(property_id) = &f.property_id {
            args.push(property_id);
            sql.push_str(&format!(" AND d.property_id = ?{}", args.len()));
        }
        if let Some(tenant_id) = &f.tenant_id {
            args.push(tenant_id);
            sql.push_str(&format!(" AND d.tenant_id = ?{}", args.len()));
        }
        if let Some(owner_id) = &f.owner_id {
            args.push(owner_id);
            sql.push_str(&format!(" AND c.owner_id = ?{}", args.len()));
        }
        sql.push_str(&format!(
            " ORDER BY d.created_at DESC, d.deposit_id ASC LIMIT {limit}"
        ));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(args.as_slice(), map_deposit_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Receivables ────────────────────────────────────────────

    pub fn insert_receivable(&self, r: &Receivable) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO deposit_receivable
             (receivable_id, deposit_id, contract_id, amount, reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                r.receivable_id,
                r.deposit_id,
                r.contract_id,
                to_cents("amount", r.amount)?,
                r.reason,
                r.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn receivables_for_deposit(&self, deposit_id: &str) -> LedgerResult<Vec<Receivable>> {
        let mut stmt = self.conn.prepare(
            "SELECT receivable_id, deposit_id, contract_id, amount, reason, created_at
             FROM deposit_receivable
             WHERE deposit_id = ?1
             ORDER BY created_at ASC, receivable_id ASC",
        )?;
        let rows = stmt
            .query_map(params![deposit_id], |r| {
                Ok(Receivable {
                    receivable_id: r.get(0)?,
                    deposit_id: r.get(1)?,
                    contract_id: r.get(2)?,
                    amount: from_cents(r.get(3)?),
                    reason: r.get(4)?,
                    created_at: r.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Test helper methods ────────────────────────────────────

    pub fn deposit_count_for_contract(&self, contract_id: &str) -> LedgerResult<i64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM security_deposit WHERE contract_id = ?1",
            params![contract_id],
            |r| r.get(0),
        )?;
        Ok(n)
    }
}

fn map_deposit_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Deposit> {
    Ok(Deposit {
        deposit_id: r.get(0)?,
        contract_id: r.get(1)?,
        property_id: r.get(2)?,
        tenant_id: r.get(3)?,
        deposit_amount: from_cents(r.get(4)?),
        current_balance: from_cents(r.get(5)?),
        status: r.get(6)?,
        payment_date: r.get(7)?,
        return_date: r.get(8)?,
        return_method: r.get(9)?,
        return_amount: r.get::<_, Option<i64>>(10)?.map(from_cents),
        notes: r.get(11)?,
        created_at: r.get(12)?,
        updated_at: r.get(13)?,
    })
}
