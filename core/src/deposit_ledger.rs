//! Deposit ledger: owns a security deposit's lifecycle and balance.
//!
//! Lifecycle:
//!   created at contract signing (active)
//!   → movements journaled over the tenancy (active ⇄ partial)
//!   → returned at lease end via a terminal `return` movement
//!   → optionally archived (soft delete, history untouched)
//!
//! Every mutation goes through the transaction coordinator; reads go
//! straight to the store and never write.

use crate::{
    audit::{ENTITY_DEPOSIT, ENTITY_RECEIVABLE},
    clock::LedgerClock,
    config::LedgerConfig,
    coordinator::{atomically, UnitOfWork},
    error::{LedgerError, LedgerResult},
    movement_journal::{self, JournalEntry, Movement, MovementType},
    store::LedgerStore,
    types::{from_cents, new_id, signed_cents, to_cents, total_cents, Cents, ContractId, DepositId, UnknownVariant},
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Active,
    /// Part of the agreed amount has been consumed by movements.
    Partial,
    Returned,
    Archived,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Partial => "partial",
            Self::Returned => "returned",
            Self::Archived => "archived",
        }
    }

    /// No further movements may land on a deposit in this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Returned | Self::Archived)
    }

    fn for_balance(balance: Cents, deposit_amount: Cents) -> Self {
        if balance < deposit_amount {
            Self::Partial
        } else {
            Self::Active
        }
    }
}

impl FromStr for DepositStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "partial" => Ok(Self::Partial),
            "returned" => Ok(Self::Returned),
            "archived" => Ok(Self::Archived),
            other => Err(UnknownVariant {
                kind: "deposit status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deposit {
    pub deposit_id: DepositId,
    pub contract_id: ContractId,
    pub property_id: String,
    pub tenant_id: String,
    pub deposit_amount: Decimal,
    pub current_balance: Decimal,
    pub status: DepositStatus,
    pub payment_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub return_method: Option<String>,
    pub return_amount: Option<Decimal>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepositFilters {
    pub status: Option<DepositStatus>,
    pub contract_id: Option<String>,
    pub property_id: Option<String>,
    pub tenant_id: Option<String>,
    pub owner_id: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementRequest {
    pub movement_type: MovementType,
    pub amount: Decimal,
    pub reason: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Defaults to today.
    #[serde(default)]
    pub reference_date: Option<NaiveDate>,
}

/// One line of the lease-end deduction statement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deduction {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub amount: Decimal,
    #[serde(default)]
    pub description: Option<String>,
}

impl Deduction {
    pub fn new(kind: &str, amount: Decimal) -> Self {
        Self {
            kind: Some(kind.to_string()),
            amount,
            description: None,
        }
    }

    fn reason(&self) -> String {
        match self.kind.as_deref().map(str::trim) {
            Some(k) if !k.is_empty() => k.to_string(),
            _ => "deduction".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub return_date: NaiveDate,
    /// Every amount retained from the deposit over the tenancy.
    #[serde(default)]
    pub deductions: Vec<Deduction>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Amount the tenant still owes after the deposit was exhausted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Receivable {
    pub receivable_id: String,
    pub deposit_id: DepositId,
    pub contract_id: ContractId,
    pub amount: Decimal,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnOutcome {
    pub deposit: Deposit,
    pub return_movement: Movement,
    pub refund_amount: Decimal,
    /// Total of the deduction statement, whether newly journaled or not.
    pub total_deductions: Decimal,
    /// Deduct movements journaled by this return.
    pub deductions: Vec<Movement>,
    pub receivable: Option<Receivable>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeductionSummary {
    pub deposit_id: DepositId,
    pub deductions: Vec<Movement>,
    pub total_deductions: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementSummary {
    pub total_deductions: Decimal,
    pub total_holds: Decimal,
    pub total_returned: Decimal,
    pub movement_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositDetails {
    pub deposit: Deposit,
    /// Newest reference date first.
    pub movements: Vec<Movement>,
    pub summary: MovementSummary,
}

pub struct DepositLedger<'a> {
    pub(crate) store: &'a mut LedgerStore,
    pub(crate) config: &'a LedgerConfig,
    pub(crate) clock: &'a LedgerClock,
}

impl DepositLedger<'_> {
    // ── Mutations ──────────────────────────────────────────────

    /// Create the deposit for a contract, or update its agreed amount.
    ///
    /// Keyed by contract: repeated calls leave one row holding the latest
    /// amount. On update the balance shifts by the change in amount so the
    /// journal still explains it.
    pub fn create_or_update_deposit(
        &mut self,
        contract_id: &str,
        amount: Decimal,
        payment_date: NaiveDate,
        notes: Option<&str>,
    ) -> LedgerResult<Deposit> {
        const OP: &str = "create_or_update_deposit";
        let amount = to_cents("deposit_amount", amount).map_err(|e| e.in_operation(OP, contract_id))?;

        atomically(self.store, self.clock, OP, contract_id, |uow| {
            let contract = uow
                .sql()
                .get_contract(contract_id)?
                .ok_or_else(|| LedgerError::not_found("contract", contract_id))?;
            let now = uow.now();

            let (deposit_id, action) = match uow.sql().get_deposit_by_contract(contract_id)? {
                None => {
                    let deposit = Deposit {
                        deposit_id: new_id(),
                        contract_id: contract.contract_id.clone(),
                        property_id: contract.property_id.clone(),
                        tenant_id: contract.tenant_id.clone(),
                        deposit_amount: from_cents(amount),
                        current_balance: from_cents(amount),
                        status: DepositStatus::Active,
                        payment_date,
                        return_date: None,
                        return_method: None,
                        return_amount: None,
                        notes: notes.map(str::to_string),
                        created_at: now,
                        updated_at: now,
                    };
                    uow.sql().insert_deposit(&deposit)?;
                    (deposit.deposit_id, "created")
                }
                Some(existing) => {
                    if existing.status.is_terminal() {
                        return Err(LedgerError::Conflict(format!(
                            "deposit {} is {} and can no longer be amended",
                            existing.deposit_id,
                            existing.status.as_str()
                        )));
                    }
                    let old_amount = to_cents("deposit_amount", existing.deposit_amount)?;
                    let old_balance = to_cents("current_balance", existing.current_balance)?;
                    let new_balance = old_balance + (amount - old_amount);
                    if new_balance < 0 {
                        return Err(LedgerError::Conflict(format!(
                            "deposit amount {} is below the {} already consumed",
                            from_cents(amount),
                            from_cents(old_amount - old_balance)
                        )));
                    }
                    uow.sql().update_deposit_terms(
                        &existing.deposit_id,
                        amount,
                        new_balance,
                        DepositStatus::for_balance(new_balance, amount),
                        payment_date,
                        notes,
                        now,
                    )?;
                    (existing.deposit_id, "updated")
                }
            };

            let deposit = load_deposit(uow, &deposit_id)?;
            uow.audit(
                ENTITY_DEPOSIT,
                &deposit_id,
                action,
                serde_json::json!({
                    "contract_id": deposit.contract_id,
                    "deposit_amount": deposit.deposit_amount,
                    "current_balance": deposit.current_balance,
                    "status": deposit.status,
                    "payment_date": deposit.payment_date,
                }),
            )?;
            Ok(deposit)
        })
    }

    /// Journal one debit against the deposit.
    ///
    /// Debits beyond the available balance are refused, so of two concurrent
    /// debits that together exceed it exactly one lands.
    pub fn append_movement(
        &mut self,
        deposit_id: &str,
        request: &MovementRequest,
    ) -> LedgerResult<Movement> {
        const OP: &str = "append_movement";
        let amount = validate_movement(request).map_err(|e| e.in_operation(OP, deposit_id))?;
        let reference_date = request.reference_date.unwrap_or_else(|| self.clock.today());

        atomically(self.store, self.clock, OP, deposit_id, |uow| {
            load_deposit(uow, deposit_id)?;
            let entry = JournalEntry::debit(
                request.movement_type,
                amount,
                request.reason.trim(),
                reference_date,
            )
            .described(request.description.clone());
            movement_journal::append(uow, deposit_id, entry)
        })
    }

    /// Offset an earlier movement with an equal and opposite one.
    pub fn reverse_movement(&mut self, movement_id: &str, reason: &str) -> LedgerResult<Movement> {
        const OP: &str = "reverse_movement";
        if reason.trim().is_empty() {
            return Err(LedgerError::Validation("reason is required".into()).in_operation(OP, movement_id));
        }
        let today = self.clock.today();

        atomically(self.store, self.clock, OP, movement_id, |uow| {
            let original = uow
                .sql()
                .get_movement(movement_id)?
                .ok_or_else(|| LedgerError::not_found("movement", movement_id))?;
            if original.movement_type == MovementType::Return {
                return Err(LedgerError::Conflict(format!(
                    "return movement {movement_id} cannot be reversed"
                )));
            }
            if original.reverses_movement_id.is_some() {
                return Err(LedgerError::Conflict(format!(
                    "movement {movement_id} is itself a reversal"
                )));
            }
            if let Some(existing) = uow.sql().reversal_of(movement_id)? {
                return Err(LedgerError::Conflict(format!(
                    "movement {movement_id} was already reversed by {}",
                    existing.movement_id
                )));
            }

            let amount = to_cents("amount", original.amount)?;
            let entry = JournalEntry {
                movement_type: original.movement_type,
                amount,
                delta: -signed_cents("delta", original.delta)?,
                reason: reason.trim().to_string(),
                description: Some(format!("reversal of {movement_id}")),
                reference_date: today,
                settlement_id: original.settlement_id.clone(),
                reverses_movement_id: Some(movement_id.to_string()),
            };
            movement_journal::append(uow, &original.deposit_id, entry)
        })
    }

    /// Settle the deposit at lease end.
    ///
    /// `request.deductions` is the full statement of amounts retained.
    /// Deductions already journaled during the tenancy count toward it, so
    /// only the uncovered part of each line is journaled now. New deductions
    /// never take the balance below zero: whatever the balance cannot cover
    /// is recorded as a receivable against the tenant and the refund is zero.
    pub fn return_deposit(
        &mut self,
        deposit_id: &str,
        request: &ReturnRequest,
    ) -> LedgerResult<ReturnOutcome> {
        const OP: &str = "return_deposit";
        let claims = request
            .deductions
            .iter()
            .map(|d| to_cents("deduction amount", d.amount))
            .collect::<LedgerResult<Vec<Cents>>>()
            .map_err(|e| e.in_operation(OP, deposit_id))?;
        let total_claimed = total_cents("total deductions", claims.iter().copied())
            .map_err(|e| e.in_operation(OP, deposit_id))?;
        let method = match request.method.as_deref().map(str::trim) {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => self.config.default_return_method.clone(),
        };

        let outcome = atomically(self.store, self.clock, OP, deposit_id, |uow| {
            let deposit = load_deposit(uow, deposit_id)?;
            if deposit.status.is_terminal() {
                return Err(LedgerError::Conflict(format!(
                    "deposit {deposit_id} is already {}",
                    deposit.status.as_str()
                )));
            }

            let mut available = to_cents("current_balance", deposit.current_balance)?;
            let mut already_deducted = uow.sql().tenancy_deductions_debited(deposit_id)?.max(0);
            let mut shortfall: Cents = 0;
            let mut journaled = Vec::new();

            for (deduction, &claim) in request.deductions.iter().zip(&claims) {
                let covered = claim.min(already_deducted);
                already_deducted -= covered;
                let uncovered = claim - covered;
                let debit = uncovered.min(available);
                // Bounded by `total_claimed`.
                shortfall += uncovered - debit;
                if debit == 0 {
                    continue;
                }
                let entry = JournalEntry::debit(
                    MovementType::Deduct,
                    debit,
                    deduction.reason(),
                    request.return_date,
                )
                .described(deduction.description.clone());
                journaled.push(movement_journal::append(uow, deposit_id, entry)?);
                available -= debit;
            }

            let receivable = if shortfall > 0 {
                Some(record_receivable(uow, &deposit, shortfall)?)
            } else {
                None
            };

            let refund = available;
            let return_movement = movement_journal::append(
                uow,
                deposit_id,
                JournalEntry::debit(
                    MovementType::Return,
                    refund,
                    format!("refund via {method}"),
                    request.return_date,
                )
                .described(request.notes.clone()),
            )?;

            let closed = uow.sql().mark_deposit_returned(
                deposit_id,
                request.return_date,
                &method,
                refund,
                uow.now(),
            )?;
            if !closed {
                return Err(LedgerError::Other(anyhow::anyhow!(
                    "deposit {deposit_id} still carries a balance after its return movement"
                )));
            }

            let total_deductions = from_cents(total_claimed);
            uow.audit(
                ENTITY_DEPOSIT,
                deposit_id,
                "returned",
                serde_json::json!({
                    "refund_amount": from_cents(refund),
                    "total_deductions": total_deductions,
                    "method": method,
                    "deductions": request.deductions,
                    "receivable": receivable.as_ref().map(|r| r.amount),
                }),
            )?;

            Ok(ReturnOutcome {
                deposit: load_deposit(uow, deposit_id)?,
                return_movement,
                refund_amount: from_cents(refund),
                total_deductions,
                deductions: journaled,
                receivable,
            })
        })?;

        log::info!(
            "deposit {deposit_id} returned: refund {} via {method}",
            outcome.refund_amount
        );
        Ok(outcome)
    }

    /// Soft delete. Archiving twice is a no-op.
    pub fn delete_deposit(&mut self, deposit_id: &str) -> LedgerResult<Deposit> {
        const OP: &str = "delete_deposit";
        atomically(self.store, self.clock, OP, deposit_id, |uow| {
            let deposit = load_deposit(uow, deposit_id)?;
            if deposit.status == DepositStatus::Archived {
                uow.unchanged();
                return Ok(deposit);
            }
            uow.sql().archive_deposit(deposit_id, uow.now())?;
            uow.audit(
                ENTITY_DEPOSIT,
                deposit_id,
                "archived",
                serde_json::json!({
                    "previous_status": deposit.status,
                    "current_balance": deposit.current_balance,
                }),
            )?;
            load_deposit(uow, deposit_id)
        })
    }

    // ── Reads ──────────────────────────────────────────────────

    pub fn get_deposit(&self, deposit_id: &str) -> LedgerResult<Deposit> {
        self.store
            .sql()
            .get_deposit(deposit_id)?
            .ok_or_else(|| LedgerError::not_found("deposit", deposit_id))
    }

    pub fn get_deposit_for_contract(&self, contract_id: &str) -> LedgerResult<Deposit> {
        self.store
            .sql()
            .get_deposit_by_contract(contract_id)?
            .ok_or_else(|| LedgerError::not_found("deposit for contract", contract_id))
    }

    /// Deduct-type movements (reversals included) and their net total.
    pub fn get_deductions(&self, deposit_id: &str) -> LedgerResult<DeductionSummary> {
        self.get_deposit(deposit_id)?;
        let deductions = self
            .store
            .sql()
            .movements_of_type(deposit_id, MovementType::Deduct)?;
        let total_deductions = movement_journal::net_debit(&deductions);
        Ok(DeductionSummary {
            deposit_id: deposit_id.to_string(),
            deductions,
            total_deductions,
        })
    }

    pub fn get_deposit_details(&self, deposit_id: &str) -> LedgerResult<DepositDetails> {
        let deposit = self.get_deposit(deposit_id)?;
        let mut movements = self.store.sql().movements_for_deposit(deposit_id)?;
        let summary = MovementSummary {
            total_deductions: movement_journal::net_debit_of(&movements, MovementType::Deduct),
            total_holds: movement_journal::net_debit_of(&movements, MovementType::Hold),
            total_returned: movement_journal::net_debit_of(&movements, MovementType::Return),
            movement_count: movements.len(),
        };
        movements.sort_by(|a, b| {
            b.reference_date
                .cmp(&a.reference_date)
                .then(b.seq.cmp(&a.seq))
        });
        Ok(DepositDetails {
            deposit,
            movements,
            summary,
        })
    }

    pub fn list_deposits(&self, filters: &DepositFilters) -> LedgerResult<Vec<Deposit>> {
        let limit = filters.limit.unwrap_or(self.config.list_limit);
        self.store.sql().list_deposits(filters, limit)
    }

    pub fn list_receivables(&self, deposit_id: &str) -> LedgerResult<Vec<Receivable>> {
        self.get_deposit(deposit_id)?;
        self.store.sql().receivables_for_deposit(deposit_id)
    }
}

fn validate_movement(request: &MovementRequest) -> LedgerResult<Cents> {
    if request.movement_type == MovementType::Return {
        return Err(LedgerError::Validation(
            "return movements are written by return_deposit".into(),
        ));
    }
    if request.reason.trim().is_empty() {
        return Err(LedgerError::Validation("reason is required".into()));
    }
    to_cents("amount", request.amount)
}

fn load_deposit(uow: &UnitOfWork<'_>, deposit_id: &str) -> LedgerResult<Deposit> {
    uow.sql()
        .get_deposit(deposit_id)?
        .ok_or_else(|| LedgerError::not_found("deposit", deposit_id))
}

fn record_receivable(
    uow: &mut UnitOfWork<'_>,
    deposit: &Deposit,
    shortfall: Cents,
) -> LedgerResult<Receivable> {
    let receivable = Receivable {
        receivable_id: new_id(),
        deposit_id: deposit.deposit_id.clone(),
        contract_id: deposit.contract_id.clone(),
        amount: from_cents(shortfall),
        reason: "deductions exceed deposit balance at return".into(),
        created_at: uow.now(),
    };
    uow.sql().insert_receivable(&receivable)?;
    uow.audit(
        ENTITY_RECEIVABLE,
        &receivable.receivable_id,
        "created",
        serde_json::json!({
            "deposit_id": receivable.deposit_id,
            "amount": receivable.amount,
        }),
    )?;
    log::warn!(
        "deposit {} short by {} at return; receivable {} recorded",
        deposit.deposit_id,
        receivable.amount,
        receivable.receivable_id
    );
    Ok(receivable)
}
