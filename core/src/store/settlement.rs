use super::Sql;
use crate::{
    error::LedgerResult,
    settlement_engine::{ChargeAdjustment, Settlement, SettlementFilters, SettlementStatus},
    types::{from_cents, signed_cents, to_cents, Cents},
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, ToSql};

const SETTLEMENT_COLUMNS: &str = "settlement_id, contract_id, settlement_year, settlement_date,
        total_provisioning_paid, total_actual_cost, balance, status,
        approved_by, approval_date, notes, created_at, updated_at";

impl Sql<'_> {
    // ── Settlements ────────────────────────────────────────────

    pub fn insert_settlement(&self, s: &Settlement) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO charge_settlement (
                settlement_id, contract_id, settlement_year, settlement_date,
                total_provisioning_paid, total_actual_cost, balance, status,
                approved_by, approval_date, notes, created_at, updated_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            params![
                s.settlement_id,
                s.contract_id,
                s.settlement_year,
                s.settlement_date,
                to_cents("total_provisioning_paid", s.total_provisioning_paid)?,
                to_cents("total_actual_cost", s.total_actual_cost)?,
                signed_cents("balance", s.balance)?,
                s.status,
                s.approved_by,
                s.approval_date,
                s.notes,
                s.created_at,
                s.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_settlement(&self, settlement_id: &str) -> LedgerResult<Option<Settlement>> {
        let sql = format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM charge_settlement WHERE settlement_id = ?1"
        );
        let row = self
            .conn
            .query_row(&sql, params![settlement_id], map_settlement_row)
            .optional()?;
        Ok(row)
    }

    pub fn get_settlement_by_contract_year(
        &self,
        contract_id: &str,
        settlement_year: i32,
    ) -> LedgerResult<Option<Settlement>> {
        let sql = format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM charge_settlement
             WHERE contract_id = ?1 AND settlement_year = ?2"
        );
        let row = self
            .conn
            .query_row(&sql, params![contract_id, settlement_year], map_settlement_row)
            .optional()?;
        Ok(row)
    }

    pub fn list_settlements(
        &self,
        contract_id: &str,
        f: &SettlementFilters,
    ) -> LedgerResult<Vec<Settlement>> {
        let mut sql = format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM charge_settlement WHERE contract_id = ?1"
        );
        let mut args: Vec<&dyn ToSql> = vec![&contract_id];
        if let Some(status) = &f.status {
            args.push(status);
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        if let Some(year) = &f.year {
            args.push(year);
            sql.push_str(&format!(" AND settlement_year = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY settlement_year DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(args.as_slice(), map_settlement_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn update_settlement_totals(
        &self,
        settlement_id: &str,
        total_provisioning_paid: Cents,
        total_actual_cost: Cents,
        status: SettlementStatus,
        now: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE charge_settlement
             SET total_provisioning_paid = ?1, total_actual_cost = ?2,
                 balance = ?2 - ?1, status = ?3, updated_at = ?4
             WHERE settlement_id = ?5",
            params![
                total_provisioning_paid,
                total_actual_cost,
                status,
                now,
                settlement_id
            ],
        )?;
        Ok(())
    }

    /// Terminal transition. Matches nothing if the settlement is already approved.
    pub fn approve_settlement(
        &self,
        settlement_id: &str,
        approved_by: &str,
        approval_date: NaiveDate,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        let changed = self.conn.execute(
            "UPDATE charge_settlement
             SET status = 'approved', approved_by = ?1, approval_date = ?2,
                 notes = COALESCE(?3, notes), updated_at = ?4
             WHERE settlement_id = ?5 AND status <> 'approved'",
            params![approved_by, approval_date, notes, now, settlement_id],
        )?;
        Ok(changed == 1)
    }

    pub fn settlement_count(&self, contract_id: &str, settlement_year: i32) -> LedgerResult<i64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM charge_settlement
             WHERE contract_id = ?1 AND settlement_year = ?2",
            params![contract_id, settlement_year],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    // ── Charge adjustments ─────────────────────────────────────

    pub fn insert_adjustment(&self, a: &ChargeAdjustment) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO charge_adjustment (
                adjustment_id, settlement_id, charge_type,
                provisioning_paid, actual_cost, balance, created_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                a.adjustment_id,
                a.settlement_id,
                a.charge_type,
                to_cents("provisioning_paid", a.provisioning_paid)?,
                to_cents("actual_cost", a.actual_cost)?,
                signed_cents("balance", a.balance)?,
                a.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn adjustments_for_settlement(
        &self,
        settlement_id: &str,
    ) -> LedgerResult<Vec<ChargeAdjustment>> {
        let mut stmt = self.conn.prepare(
            "SELECT adjustment_id, settlement_id, charge_type,
                    provisioning_paid, actual_cost, balance, created_at
             FROM charge_adjustment
             WHERE settlement_id = ?1
             ORDER BY charge_type ASC",
        )?;
        let rows = stmt
            .query_map(params![settlement_id], |r| {
                Ok(ChargeAdjustment {
                    adjustment_id: r.get(0)?,
                    settlement_id: r.get(1)?,
                    charge_type: r.get(2)?,
                    provisioning_paid: from_cents(r.get(3)?),
                    actual_cost: from_cents(r.get(4)?),
                    balance: from_cents(r.get(5)?),
                    created_at: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// (Σ provisioning_paid, Σ actual_cost) over a settlement's adjustments.
    pub fn sum_adjustments(&self, settlement_id: &str) -> LedgerResult<(Cents, Cents)> {
        let totals = self.conn.query_row(
            "SELECT COALESCE(SUM(provisioning_paid), 0), COALESCE(SUM(actual_cost), 0)
             FROM charge_adjustment WHERE settlement_id = ?1",
            params![settlement_id],
            |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)),
        )?;
        Ok(totals)
    }
}

fn map_settlement_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Settlement> {
    Ok(Settlement {
        settlement_id: r.get(0)?,
        contract_id: r.get(1)?,
        settlement_year: r.get(2)?,
        settlement_date: r.get(3)?,
        total_provisioning_paid: from_cents(r.get(4)?),
        total_actual_cost: from_cents(r.get(5)?),
        balance: from_cents(r.get(6)?),
        status: r.get(7)?,
        approved_by: r.get(8)?,
        approval_date: r.get(9)?,
        notes: r.get(10)?,
        created_at: r.get(11)?,
        updated_at: r.get(12)?,
    })
}
