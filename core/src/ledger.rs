//! `LeaseLedger`: the entry point that owns the store, config and clock
//! and hands out the component views operations run through.

use crate::{
    audit::AuditEntry,
    clock::LedgerClock,
    config::LedgerConfig,
    contract::ContractRegistry,
    deposit_ledger::DepositLedger,
    error::LedgerResult,
    settlement_engine::SettlementEngine,
    store::LedgerStore,
};

pub struct LeaseLedger {
    pub store: LedgerStore,
    pub config: LedgerConfig,
    pub clock: LedgerClock,
}

impl LeaseLedger {
    /// Open (and migrate) the database named by `config`.
    pub fn open(config: LedgerConfig) -> LedgerResult<Self> {
        let store = LedgerStore::from_config(&config)?;
        store.migrate()?;
        log::debug!("ledger opened at {}", config.database_path);
        Ok(Self {
            store,
            config,
            clock: LedgerClock::default(),
        })
    }

    /// In-memory ledger with test defaults.
    pub fn build_test() -> LedgerResult<Self> {
        Self::open(LedgerConfig::default_test())
    }

    pub fn with_clock(mut self, clock: LedgerClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn contracts(&mut self) -> ContractRegistry<'_> {
        ContractRegistry {
            store: &mut self.store,
            clock: &self.clock,
        }
    }

    pub fn deposits(&mut self) -> DepositLedger<'_> {
        DepositLedger {
            store: &mut self.store,
            config: &self.config,
            clock: &self.clock,
        }
    }

    pub fn settlements(&mut self) -> SettlementEngine<'_> {
        SettlementEngine {
            store: &mut self.store,
            clock: &self.clock,
        }
    }

    /// Audit rows for one entity, oldest first.
    pub fn audit_trail(&self, entity_type: &str, entity_id: &str) -> LedgerResult<Vec<AuditEntry>> {
        self.store.sql().audit_trail(entity_type, entity_id)
    }
}
