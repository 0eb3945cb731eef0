use super::Sql;
use crate::{
    contract::Contract,
    error::LedgerResult,
    types::{from_cents, to_cents},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

impl Sql<'_> {
    /// Insert or update a contract. Returns true when the row is new.
    pub fn upsert_contract(&self, c: &Contract, now: DateTime<Utc>) -> LedgerResult<bool> {
        let exists = self.get_contract(&c.contract_id)?.is_some();
        self.conn.execute(
            "INSERT INTO rental_contract (
                contract_id, contract_number, property_id, tenant_id, owner_id,
                monthly_rent, start_date, end_date, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
             ON CONFLICT (contract_id) DO UPDATE SET
                contract_number = excluded.contract_number,
                property_id     = excluded.property_id,
                tenant_id       = excluded.tenant_id,
                owner_id        = excluded.owner_id,
                monthly_rent    = excluded.monthly_rent,
                start_date      = excluded.start_date,
                end_date        = excluded.end_date,
                updated_at      = excluded.updated_at",
            params![
                c.contract_id,
                c.contract_number,
                c.property_id,
                c.tenant_id,
                c.owner_id,
                to_cents("monthly_rent", c.monthly_rent)?,
                c.start_date,
                c.end_date,
                now,
            ],
        )?;
        Ok(!exists)
    }

    pub fn get_contract(&self, contract_id: &str) -> LedgerResult<Option<Contract>> {
        let row = self
            .conn
            .query_row(
                "SELECT contract_id, contract_number, property_id, tenant_id, owner_id,
                        monthly_rent, start_date, end_date
                 FROM rental_contract WHERE contract_id = ?1",
                params![contract_id],
                |r| {
                    Ok(Contract {
                        contract_id: r.get(0)?,
                        contract_number: r.get(1)?,
                        property_id: r.get(2)?,
                        tenant_id: r.get(3)?,
                        owner_id: r.get(4)?,
                        monthly_rent: from_cents(r.get(5)?),
                        start_date: r.get(6)?,
                        end_date: r.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}
