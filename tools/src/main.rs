//! ledger-runner: headless JSON-lines front end for the lease ledger.
//!
//! Usage:
//!   ledger-runner --db ledger.db
//!   ledger-runner --config ledger.json
//!
//! Reads one command per stdin line, e.g.
//!   {"op": "get_deposit", "deposit_id": "..."}
//! and writes one response per line:
//!   {"status": 200, "data": {...}}  or  {"status": 404, "error": "..."}

use anyhow::Result;
use chrono::NaiveDate;
use leaseledger_core::{
    config::LedgerConfig,
    contract::Contract,
    deposit_ledger::{DepositFilters, MovementRequest, ReturnRequest},
    error::LedgerResult,
    ledger::LeaseLedger,
    settlement_engine::{
        ApprovalRequest, ChargeInput, ProvisioningRequest, SettlementFilters, SettlementRequest,
    },
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;
use std::io::{self, BufRead, Write};

const OK: u16 = 200;
const CREATED: u16 = 201;
const BAD_REQUEST: u16 = 400;

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LedgerCommand {
    RegisterContract {
        contract: Contract,
    },
    GetContract {
        contract_id: String,
    },
    CreateOrUpdateDeposit {
        contract_id: String,
        amount: Decimal,
        payment_date: NaiveDate,
        #[serde(default)]
        notes: Option<String>,
    },
    AppendMovement {
        deposit_id: String,
        movement: MovementRequest,
    },
    ReverseMovement {
        movement_id: String,
        reason: String,
    },
    ReturnDeposit {
        deposit_id: String,
        request: ReturnRequest,
    },
    GetDeposit {
        deposit_id: String,
    },
    GetDepositForContract {
        contract_id: String,
    },
    GetDepositDetails {
        deposit_id: String,
    },
    GetDeductions {
        deposit_id: String,
    },
    ListDeposits {
        #[serde(default)]
        filters: DepositFilters,
    },
    ListReceivables {
        deposit_id: String,
    },
    DeleteDeposit {
        deposit_id: String,
    },
    PerformAnnualSettlement {
        contract_id: String,
        request: SettlementRequest,
    },
    AmendSettlement {
        settlement_id: String,
        charge: ChargeInput,
    },
    ApproveSettlement {
        settlement_id: String,
        request: ApprovalRequest,
    },
    GetSettlementReport {
        contract_id: String,
        year: i32,
    },
    ListSettlements {
        contract_id: String,
        #[serde(default)]
        filters: SettlementFilters,
    },
    CalculateProvisioning {
        contract_id: String,
        request: ProvisioningRequest,
    },
    AuditTrail {
        entity_type: String,
        entity_id: String,
    },
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let mut config = match arg_value(&args, "--config") {
        Some(path) => LedgerConfig::load(path)?,
        None => LedgerConfig::default(),
    };
    if let Some(db) = arg_value(&args, "--db") {
        config.database_path = db.to_string();
    }

    let mut ledger = LeaseLedger::open(config)?;
    log::info!("ledger-runner ready on {}", ledger.config.database_path);
    run_loop(&mut ledger)
}

fn run_loop(ledger: &mut LeaseLedger) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<LedgerCommand>(&buffer) {
            Ok(LedgerCommand::Quit) => break,
            Ok(cmd) => match dispatch(ledger, cmd) {
                Ok((status, data)) => json!({ "status": status, "data": data }),
                Err(e) => {
                    let status = e.kind().status_code();
                    json!({ "status": status, "error": e.to_string() })
                }
            },
            Err(e) => json!({ "status": BAD_REQUEST, "error": e.to_string() }),
        };
        writeln!(stdout, "{response}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn dispatch(ledger: &mut LeaseLedger, cmd: LedgerCommand) -> LedgerResult<(u16, Value)> {
    let reply = match cmd {
        LedgerCommand::RegisterContract { contract } => {
            (CREATED, serde_json::to_value(ledger.contracts().register(&contract)?)?)
        }
        LedgerCommand::GetContract { contract_id } => {
            (OK, serde_json::to_value(ledger.contracts().get(&contract_id)?)?)
        }
        LedgerCommand::CreateOrUpdateDeposit {
            contract_id,
            amount,
            payment_date,
            notes,
        } => {
            let deposit = ledger.deposits().create_or_update_deposit(
                &contract_id,
                amount,
                payment_date,
                notes.as_deref(),
            )?;
            (CREATED, serde_json::to_value(deposit)?)
        }
        LedgerCommand::AppendMovement { deposit_id, movement } => {
            let movement = ledger.deposits().append_movement(&deposit_id, &movement)?;
            (CREATED, serde_json::to_value(movement)?)
        }
        LedgerCommand::ReverseMovement { movement_id, reason } => {
            let reversal = ledger.deposits().reverse_movement(&movement_id, &reason)?;
            (CREATED, serde_json::to_value(reversal)?)
        }
        LedgerCommand::ReturnDeposit { deposit_id, request } => {
            (OK, serde_json::to_value(ledger.deposits().return_deposit(&deposit_id, &request)?)?)
        }
        LedgerCommand::GetDeposit { deposit_id } => {
            (OK, serde_json::to_value(ledger.deposits().get_deposit(&deposit_id)?)?)
        }
        LedgerCommand::GetDepositForContract { contract_id } => (
            OK,
            serde_json::to_value(ledger.deposits().get_deposit_for_contract(&contract_id)?)?,
        ),
        LedgerCommand::GetDepositDetails { deposit_id } => {
            (OK, serde_json::to_value(ledger.deposits().get_deposit_details(&deposit_id)?)?)
        }
        LedgerCommand::GetDeductions { deposit_id } => {
            (OK, serde_json::to_value(ledger.deposits().get_deductions(&deposit_id)?)?)
        }
        LedgerCommand::ListDeposits { filters } => {
            (OK, serde_json::to_value(ledger.deposits().list_deposits(&filters)?)?)
        }
        LedgerCommand::ListReceivables { deposit_id } => {
            (OK, serde_json::to_value(ledger.deposits().list_receivables(&deposit_id)?)?)
        }
        LedgerCommand::DeleteDeposit { deposit_id } => {
            (OK, serde_json::to_value(ledger.deposits().delete_deposit(&deposit_id)?)?)
        }
        LedgerCommand::PerformAnnualSettlement { contract_id, request } => {
            let outcome = ledger
                .settlements()
                .perform_annual_settlement(&contract_id, &request)?;
            (CREATED, serde_json::to_value(outcome)?)
        }
        LedgerCommand::AmendSettlement { settlement_id, charge } => {
            let outcome = ledger.settlements().amend_settlement(&settlement_id, &charge)?;
            (OK, serde_json::to_value(outcome)?)
        }
        LedgerCommand::ApproveSettlement { settlement_id, request } => {
            let settlement = ledger
                .settlements()
                .approve_settlement(&settlement_id, &request)?;
            (OK, serde_json::to_value(settlement)?)
        }
        LedgerCommand::GetSettlementReport { contract_id, year } => {
            let report = ledger.settlements().get_settlement_report(&contract_id, year)?;
            (OK, serde_json::to_value(report)?)
        }
        LedgerCommand::ListSettlements { contract_id, filters } => {
            let rows = ledger.settlements().list_settlements(&contract_id, &filters)?;
            (OK, serde_json::to_value(rows)?)
        }
        LedgerCommand::CalculateProvisioning { contract_id, request } => {
            let plan = ledger
                .settlements()
                .calculate_provisioning(&contract_id, &request)?;
            (OK, serde_json::to_value(plan)?)
        }
        LedgerCommand::AuditTrail {
            entity_type,
            entity_id,
        } => (OK, serde_json::to_value(ledger.audit_trail(&entity_type, &entity_id)?)?),
        LedgerCommand::Quit => (OK, Value::Null),
    };
    Ok(reply)
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
