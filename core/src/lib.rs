pub mod audit;
pub mod clock;
pub mod config;
pub mod contract;
pub mod coordinator;
pub mod deposit_ledger;
pub mod error;
pub mod ledger;
pub mod movement_journal;
pub mod settlement_engine;
pub mod store;
pub mod types;
