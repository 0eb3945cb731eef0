use super::Sql;
use crate::{
    error::LedgerResult,
    movement_journal::{Movement, MovementType},
    types::{from_cents, signed_cents, to_cents, Cents},
};
use rusqlite::{params, OptionalExtension};

const MOVEMENT_COLUMNS: &str = "movement_id, deposit_id, movement_type, amount, delta,
        reason, description, reference_date, settlement_id,
        reverses_movement_id, seq, created_at";

impl Sql<'_> {
    pub fn next_movement_seq(&self, deposit_id: &str) -> LedgerResult<i64> {
        let seq: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM deposit_movement WHERE deposit_id = ?1",
            params![deposit_id],
            |r| r.get(0),
        )?;
        Ok(seq)
    }

    pub fn insert_movement(&self, m: &Movement) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO deposit_movement (
                movement_id, deposit_id, movement_type, amount, delta,
                reason, description, reference_date, settlement_id,
                reverses_movement_id, seq, created_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            params![
                m.movement_id,
                m.deposit_id,
                m.movement_type,
                to_cents("amount", m.amount)?,
                signed_cents("delta", m.delta)?,
                m.reason,
                m.description,
                m.reference_date,
                m.settlement_id,
                m.reverses_movement_id,
                m.seq,
                m.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_movement(&self, movement_id: &str) -> LedgerResult<Option<Movement>> {
        let sql = format!("SELECT {MOVEMENT_COLUMNS} FROM deposit_movement WHERE movement_id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![movement_id], map_movement_row)
            .optional()?;
        Ok(row)
    }

    /// The offsetting movement that reversed `movement_id`, if any.
    pub fn reversal_of(&self, movement_id: &str) -> LedgerResult<Option<Movement>> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM deposit_movement WHERE reverses_movement_id = ?1"
        );
        let row = self
            .conn
            .query_row(&sql, params![movement_id], map_movement_row)
            .optional()?;
        Ok(row)
    }

    /// Full journal for a deposit in append order.
    pub fn movements_for_deposit(&self, deposit_id: &str) -> LedgerResult<Vec<Movement>> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM deposit_movement
             WHERE deposit_id = ?1
             ORDER BY seq ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![deposit_id], map_movement_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Movements of one type, newest reference date first.
    pub fn movements_of_type(
        &self,
        deposit_id: &str,
        movement_type: MovementType,
    ) -> LedgerResult<Vec<Movement>> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM deposit_movement
             WHERE deposit_id = ?1 AND movement_type = ?2
             ORDER BY reference_date DESC, seq DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![deposit_id, movement_type], map_movement_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Net cents debited by deduct movements raised during the tenancy,
    /// i.e. not produced by a charge settlement.
    pub fn tenancy_deductions_debited(&self, deposit_id: &str) -> LedgerResult<Cents> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(-SUM(delta), 0) FROM deposit_movement
             WHERE deposit_id = ?1 AND movement_type = 'deduct' AND settlement_id IS NULL",
            params![deposit_id],
            |r| r.get(0),
        )?;
        Ok(total)
    }

    /// Σ delta over the journal, in cents.
    pub fn sum_movement_deltas(&self, deposit_id: &str) -> LedgerResult<Cents> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(delta), 0) FROM deposit_movement WHERE deposit_id = ?1",
            params![deposit_id],
            |r| r.get(0),
        )?;
        Ok(total)
    }

    pub fn movement_count(&self, deposit_id: &str) -> LedgerResult<i64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM deposit_movement WHERE deposit_id = ?1",
            params![deposit_id],
            |r| r.get(0),
        )?;
        Ok(n)
    }
}

fn map_movement_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Movement> {
    Ok(Movement {
        movement_id: r.get(0)?,
        deposit_id: r.get(1)?,
        movement_type: r.get(2)?,
        amount: from_cents(r.get(3)?),
        delta: from_cents(r.get(4)?),
        reason: r.get(5)?,
        description: r.get(6)?,
        reference_date: r.get(7)?,
        settlement_id: r.get(8)?,
        reverses_movement_id: r.get(9)?,
        seq: r.get(10)?,
        created_at: r.get(11)?,
    })
}
