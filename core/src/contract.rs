//! Contract registry: the rental contracts deposits and settlements hang off.

use crate::{
    audit::ENTITY_CONTRACT,
    clock::LedgerClock,
    coordinator::atomically,
    error::{LedgerError, LedgerResult},
    store::LedgerStore,
    types::{to_cents, ContractId},
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contract {
    pub contract_id: ContractId,
    pub contract_number: String,
    pub property_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    pub monthly_rent: Decimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl Contract {
    fn validate(&self) -> LedgerResult<()> {
        for (field, value) in [
            ("contract_id", &self.contract_id),
            ("contract_number", &self.contract_number),
            ("property_id", &self.property_id),
            ("tenant_id", &self.tenant_id),
        ] {
            if value.trim().is_empty() {
                return Err(LedgerError::Validation(format!("{field} is required")));
            }
        }
        to_cents("monthly_rent", self.monthly_rent)?;
        if self.end_date <= self.start_date {
            return Err(LedgerError::Validation(format!(
                "end_date {} must be after start_date {}",
                self.end_date, self.start_date
            )));
        }
        Ok(())
    }
}

pub struct ContractRegistry<'a> {
    pub(crate) store: &'a mut LedgerStore,
    pub(crate) clock: &'a LedgerClock,
}

impl ContractRegistry<'_> {
    /// Create or replace a contract's terms.
    pub fn register(&mut self, contract: &Contract) -> LedgerResult<Contract> {
        const OP: &str = "register_contract";
        contract
            .validate()
            .map_err(|e| e.in_operation(OP, &contract.contract_id))?;

        atomically(self.store, self.clock, OP, &contract.contract_id, |uow| {
            let created = uow.sql().upsert_contract(contract, uow.now())?;
            uow.audit(
                ENTITY_CONTRACT,
                &contract.contract_id,
                if created { "registered" } else { "updated" },
                serde_json::to_value(contract)?,
            )?;
            Ok(contract.clone())
        })
    }

    pub fn get(&self, contract_id: &str) -> LedgerResult<Contract> {
        self.store
            .sql()
            .get_contract(contract_id)?
            .ok_or_else(|| LedgerError::not_found("contract", contract_id))
    }
}
