//! Settlement engine: the yearly reconciliation of provisional charge
//! payments against actual costs, one settlement per contract and year.
//!
//! A settlement is written together with one charge adjustment per charge
//! category and, when requested, the deposit deductions it implies. All of
//! it lands in one unit of work or none of it does.
//!
//! Status machine: created as `balance_due` or `refund_due` (sign of the
//! balance), then `approved`, which is terminal.

use crate::{
    audit::ENTITY_SETTLEMENT,
    clock::LedgerClock,
    contract::Contract,
    coordinator::{atomically, UnitOfWork},
    error::{LedgerError, LedgerResult},
    movement_journal::{self, JournalEntry, Movement, MovementType},
    store::LedgerStore,
    types::{from_cents, new_id, to_cents, total_cents, Cents, ContractId, SettlementId, UnknownVariant},
};
use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 9999;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    /// Tenant owes the owner.
    BalanceDue,
    /// Owner owes the tenant, or nobody owes anything.
    RefundDue,
    Approved,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BalanceDue => "balance_due",
            Self::RefundDue => "refund_due",
            Self::Approved => "approved",
        }
    }

    pub fn for_balance(balance: Cents) -> Self {
        if balance > 0 {
            Self::BalanceDue
        } else {
            Self::RefundDue
        }
    }
}

impl FromStr for SettlementStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balance_due" => Ok(Self::BalanceDue),
            "refund_due" => Ok(Self::RefundDue),
            "approved" => Ok(Self::Approved),
            other => Err(UnknownVariant {
                kind: "settlement status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    TenantPays,
    OwnerRefunds,
}

impl Direction {
    pub fn of(balance: Decimal) -> Self {
        if balance > Decimal::ZERO {
            Self::TenantPays
        } else {
            Self::OwnerRefunds
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settlement {
    pub settlement_id: SettlementId,
    pub contract_id: ContractId,
    pub settlement_year: i32,
    pub settlement_date: NaiveDate,
    pub total_provisioning_paid: Decimal,
    pub total_actual_cost: Decimal,
    /// `total_actual_cost - total_provisioning_paid`.
    pub balance: Decimal,
    pub status: SettlementStatus,
    pub approved_by: Option<String>,
    pub approval_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChargeAdjustment {
    pub adjustment_id: String,
    pub settlement_id: SettlementId,
    pub charge_type: String,
    pub provisioning_paid: Decimal,
    pub actual_cost: Decimal,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChargeInput {
    #[serde(rename = "type")]
    pub charge_type: String,
    pub provisioning_paid: Decimal,
    pub actual_cost: Decimal,
}

impl ChargeInput {
    pub fn new(charge_type: &str, provisioning_paid: Decimal, actual_cost: Decimal) -> Self {
        Self {
            charge_type: charge_type.to_string(),
            provisioning_paid,
            actual_cost,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DepositDeductionInput {
    #[serde(rename = "type")]
    pub deduction_type: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChargeBreakdown {
    pub charge_type: String,
    pub provisioning_paid: Decimal,
    pub actual_cost: Decimal,
    pub balance: Decimal,
    pub direction: Direction,
}

impl From<&ChargeAdjustment> for ChargeBreakdown {
    fn from(a: &ChargeAdjustment) -> Self {
        Self {
            charge_type: a.charge_type.clone(),
            provisioning_paid: a.provisioning_paid,
            actual_cost: a.actual_cost,
            balance: a.balance,
            direction: Direction::of(a.balance),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRequest {
    pub settlement_year: i32,
    #[serde(default)]
    pub charges: Vec<ChargeInput>,
    #[serde(default)]
    pub deposit_deductions: Vec<DepositDeductionInput>,
    /// Defaults to today.
    #[serde(default)]
    pub settlement_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementOutcome {
    pub settlement: Settlement,
    pub charges_breakdown: Vec<ChargeBreakdown>,
    pub adjustments: Vec<ChargeAdjustment>,
    /// Deposit deductions journaled in the same unit of work.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deposit_movements: Vec<Movement>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettlementSummary {
    pub provisioning_paid: Decimal,
    pub actual_cost: Decimal,
    pub balance: Decimal,
    pub balance_due_to_tenant: Decimal,
    pub balance_due_to_owner: Decimal,
}

impl SettlementSummary {
    fn of(s: &Settlement) -> Self {
        Self {
            provisioning_paid: s.total_provisioning_paid,
            actual_cost: s.total_actual_cost,
            balance: s.balance,
            balance_due_to_tenant: (-s.balance).max(Decimal::ZERO),
            balance_due_to_owner: s.balance.max(Decimal::ZERO),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReport {
    pub settlement: Settlement,
    pub contract: Contract,
    pub charges_breakdown: Vec<ChargeBreakdown>,
    pub summary: SettlementSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettlementFilters {
    pub status: Option<SettlementStatus>,
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub approved_by: String,
    /// Defaults to today.
    #[serde(default)]
    pub approval_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningRequest {
    pub charge_type: String,
    pub monthly_amount: Decimal,
    pub start_date: NaiveDate,
    /// Defaults to twelve monthly payments.
    #[serde(default)]
    pub annual_estimated: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvisioningMonth {
    pub month: NaiveDate,
    pub amount: Decimal,
    pub days_in_month: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningPlan {
    pub contract_id: ContractId,
    pub charge_type: String,
    pub monthly_amount: Decimal,
    pub annual_estimated: Decimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub schedule: Vec<ProvisioningMonth>,
    pub total_provisioning: Decimal,
}

/// One validated charge line, in cents.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChargeLine {
    charge_type: String,
    provisioning_paid: Cents,
    actual_cost: Cents,
}

impl ChargeLine {
    fn balance(&self) -> Cents {
        self.actual_cost - self.provisioning_paid
    }
}

fn charge_line(c: &ChargeInput) -> LedgerResult<ChargeLine> {
    let charge_type = c.charge_type.trim();
    if charge_type.is_empty() {
        return Err(LedgerError::Validation("charge type is required".into()));
    }
    Ok(ChargeLine {
        charge_type: charge_type.to_string(),
        provisioning_paid: to_cents("provisioning_paid", c.provisioning_paid)?,
        actual_cost: to_cents("actual_cost", c.actual_cost)?,
    })
}

/// Validate charge inputs and convert them to cents. Charge types must be
/// distinct within one settlement.
fn reconcile_charges(charges: &[ChargeInput]) -> LedgerResult<Vec<ChargeLine>> {
    let mut seen = HashSet::new();
    charges
        .iter()
        .map(|c| {
            let line = charge_line(c)?;
            if !seen.insert(line.charge_type.clone()) {
                return Err(LedgerError::Validation(format!(
                    "charge type '{}' appears more than once",
                    line.charge_type
                )));
            }
            Ok(line)
        })
        .collect()
}

/// Settlement totals as (provisioning paid, actual cost).
fn charge_totals(lines: &[ChargeLine]) -> LedgerResult<(Cents, Cents)> {
    Ok((
        total_cents("total_provisioning_paid", lines.iter().map(|l| l.provisioning_paid))?,
        total_cents("total_actual_cost", lines.iter().map(|l| l.actual_cost))?,
    ))
}

fn validate_deductions(deductions: &[DepositDeductionInput]) -> LedgerResult<Vec<(String, Cents)>> {
    deductions
        .iter()
        .map(|d| {
            let kind = d.deduction_type.trim();
            if kind.is_empty() {
                return Err(LedgerError::Validation("deduction type is required".into()));
            }
            Ok((kind.to_string(), to_cents("deduction amount", d.amount)?))
        })
        .collect()
}

fn validate_request(
    request: &SettlementRequest,
) -> LedgerResult<(Vec<ChargeLine>, Vec<(String, Cents)>)> {
    let year = request.settlement_year;
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(LedgerError::Validation(format!(
            "settlement_year {year} is outside {MIN_YEAR}..={MAX_YEAR}"
        )));
    }
    Ok((
        reconcile_charges(&request.charges)?,
        validate_deductions(&request.deposit_deductions)?,
    ))
}

fn days_in_month(date: NaiveDate) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?;
    let next = first.checked_add_months(Months::new(1))?;
    u32::try_from(next.signed_duration_since(first).num_days()).ok()
}

/// Month-by-month provisioning from `start` while before `end`. Month `i`
/// falls on `start + i months`, clamped to the end of shorter months.
fn monthly_schedule(start: NaiveDate, end: NaiveDate, monthly: Cents) -> Vec<ProvisioningMonth> {
    (0u32..)
        .map_while(|i| start.checked_add_months(Months::new(i)))
        .take_while(|month| *month < end)
        .filter_map(|month| {
            Some(ProvisioningMonth {
                month,
                amount: from_cents(monthly),
                days_in_month: days_in_month(month)?,
            })
        })
        .collect()
}

pub struct SettlementEngine<'a> {
    pub(crate) store: &'a mut LedgerStore,
    pub(crate) clock: &'a LedgerClock,
}

impl SettlementEngine<'_> {
    // ── Mutations ──────────────────────────────────────────────

    /// Reconcile one contract-year and persist the result.
    ///
    /// A second call for the same contract and year is a Conflict. Deposit
    /// deductions are journaled against the contract's deposit in the same
    /// unit of work as the settlement rows.
    pub fn perform_annual_settlement(
        &mut self,
        contract_id: &str,
        request: &SettlementRequest,
    ) -> LedgerResult<SettlementOutcome> {
        const OP: &str = "perform_annual_settlement";
        let year = request.settlement_year;
        let (lines, deductions) =
            validate_request(request).map_err(|e| e.in_operation(OP, contract_id))?;
        let (total_provisioning, total_actual) =
            charge_totals(&lines).map_err(|e| e.in_operation(OP, contract_id))?;
        let settlement_date = request.settlement_date.unwrap_or_else(|| self.clock.today());

        let outcome = atomically(self.store, self.clock, OP, contract_id, |uow| {
            uow.sql()
                .get_contract(contract_id)?
                .ok_or_else(|| LedgerError::not_found("contract", contract_id))?;
            if let Some(existing) = uow.sql().get_settlement_by_contract_year(contract_id, year)? {
                return Err(LedgerError::Conflict(format!(
                    "contract {contract_id} already has settlement {} for {year}",
                    existing.settlement_id
                )));
            }

            let now = uow.now();
            let balance = total_actual - total_provisioning;
            let settlement = Settlement {
                settlement_id: new_id(),
                contract_id: contract_id.to_string(),
                settlement_year: year,
                settlement_date,
                total_provisioning_paid: from_cents(total_provisioning),
                total_actual_cost: from_cents(total_actual),
                balance: from_cents(balance),
                status: SettlementStatus::for_balance(balance),
                approved_by: None,
                approval_date: None,
                notes: request.notes.clone(),
                created_at: now,
                updated_at: now,
            };
            uow.sql().insert_settlement(&settlement)?;

            let adjustments = lines
                .iter()
                .map(|line| insert_adjustment(uow, &settlement.settlement_id, line))
                .collect::<LedgerResult<Vec<_>>>()?;

            let deposit_movements = if deductions.is_empty() {
                Vec::new()
            } else {
                let deposit = uow
                    .sql()
                    .get_deposit_by_contract(contract_id)?
                    .ok_or_else(|| LedgerError::not_found("deposit for contract", contract_id))?;
                let mut movements = Vec::with_capacity(deductions.len());
                for (kind, amount) in &deductions {
                    let entry = JournalEntry::debit(
                        MovementType::Deduct,
                        *amount,
                        kind.as_str(),
                        settlement_date,
                    )
                    .described(Some(format!("charge settlement {year}")))
                    .for_settlement(&settlement.settlement_id);
                    movements.push(movement_journal::append(uow, &deposit.deposit_id, entry)?);
                }
                movements
            };

            uow.audit(
                ENTITY_SETTLEMENT,
                &settlement.settlement_id,
                "created",
                serde_json::json!({
                    "contract_id": contract_id,
                    "settlement_year": year,
                    "total_provisioning_paid": settlement.total_provisioning_paid,
                    "total_actual_cost": settlement.total_actual_cost,
                    "balance": settlement.balance,
                    "status": settlement.status,
                    "charges": lines.len(),
                    "deposit_deductions": movements_total(&deposit_movements),
                }),
            )?;

            Ok(SettlementOutcome {
                charges_breakdown: adjustments.iter().map(ChargeBreakdown::from).collect(),
                settlement,
                adjustments,
                deposit_movements,
            })
        })?;

        log::info!(
            "settlement {} created for {contract_id}/{year}: balance {} ({})",
            outcome.settlement.settlement_id,
            outcome.settlement.balance,
            outcome.settlement.status.as_str()
        );
        Ok(outcome)
    }

    /// Attach one more charge category to a settlement that is not yet
    /// approved, recomputing its totals and status.
    pub fn amend_settlement(
        &mut self,
        settlement_id: &str,
        charge: &ChargeInput,
    ) -> LedgerResult<SettlementOutcome> {
        const OP: &str = "amend_settlement";
        let line = charge_line(charge).map_err(|e| e.in_operation(OP, settlement_id))?;

        atomically(self.store, self.clock, OP, settlement_id, |uow| {
            let settlement = load_settlement(uow, settlement_id)?;
            if settlement.status == SettlementStatus::Approved {
                return Err(LedgerError::Conflict(format!(
                    "settlement {settlement_id} is approved and can no longer be amended"
                )));
            }
            let existing = uow.sql().adjustments_for_settlement(settlement_id)?;
            if existing.iter().any(|a| a.charge_type == line.charge_type) {
                return Err(LedgerError::Conflict(format!(
                    "settlement {settlement_id} already reconciles '{}'",
                    line.charge_type
                )));
            }
            // Stored totals equal the adjustment sums; reject before SUM overflows.
            let held = to_cents("total_provisioning_paid", settlement.total_provisioning_paid)?;
            total_cents("total_provisioning_paid", [held, line.provisioning_paid])?;
            let held = to_cents("total_actual_cost", settlement.total_actual_cost)?;
            total_cents("total_actual_cost", [held, line.actual_cost])?;
            insert_adjustment(uow, settlement_id, &line)?;

            let (provisioning, actual) = uow.sql().sum_adjustments(settlement_id)?;
            let status = SettlementStatus::for_balance(actual - provisioning);
            uow.sql()
                .update_settlement_totals(settlement_id, provisioning, actual, status, uow.now())?;
            uow.audit(
                ENTITY_SETTLEMENT,
                settlement_id,
                "amended",
                serde_json::json!({
                    "charge_type": line.charge_type,
                    "provisioning_paid": from_cents(line.provisioning_paid),
                    "actual_cost": from_cents(line.actual_cost),
                    "balance": from_cents(actual - provisioning),
                    "status": status,
                }),
            )?;

            let adjustments = uow.sql().adjustments_for_settlement(settlement_id)?;
            Ok(SettlementOutcome {
                settlement: load_settlement(uow, settlement_id)?,
                charges_breakdown: adjustments.iter().map(ChargeBreakdown::from).collect(),
                adjustments,
                deposit_movements: Vec::new(),
            })
        })
    }

    /// Terminal transition. Re-approval is a Conflict and never rewrites
    /// the recorded approver or date.
    pub fn approve_settlement(
        &mut self,
        settlement_id: &str,
        request: &ApprovalRequest,
    ) -> LedgerResult<Settlement> {
        const OP: &str = "approve_settlement";
        let approved_by = request.approved_by.trim();
        if approved_by.is_empty() {
            return Err(LedgerError::Validation("approved_by is required".into())
                .in_operation(OP, settlement_id));
        }
        let approval_date = request.approval_date.unwrap_or_else(|| self.clock.today());

        let settlement = atomically(self.store, self.clock, OP, settlement_id, |uow| {
            let current = load_settlement(uow, settlement_id)?;
            if current.status == SettlementStatus::Approved {
                return Err(already_approved(&current));
            }
            let approved = uow.sql().approve_settlement(
                settlement_id,
                approved_by,
                approval_date,
                request.notes.as_deref(),
                uow.now(),
            )?;
            if !approved {
                return Err(already_approved(&current));
            }
            uow.audit(
                ENTITY_SETTLEMENT,
                settlement_id,
                "approved",
                serde_json::json!({
                    "approved_by": approved_by,
                    "approval_date": approval_date,
                    "previous_status": current.status,
                }),
            )?;
            load_settlement(uow, settlement_id)
        })?;

        log::info!("settlement {settlement_id} approved by {approved_by}");
        Ok(settlement)
    }

    // ── Reads ──────────────────────────────────────────────────

    pub fn get_settlement(&self, settlement_id: &str) -> LedgerResult<Settlement> {
        self.store
            .sql()
            .get_settlement(settlement_id)?
            .ok_or_else(|| LedgerError::not_found("settlement", settlement_id))
    }

    pub fn get_settlement_report(
        &self,
        contract_id: &str,
        settlement_year: i32,
    ) -> LedgerResult<SettlementReport> {
        let sql = self.store.sql();
        let contract = sql
            .get_contract(contract_id)?
            .ok_or_else(|| LedgerError::not_found("contract", contract_id))?;
        let settlement = sql
            .get_settlement_by_contract_year(contract_id, settlement_year)?
            .ok_or_else(|| {
                LedgerError::not_found("settlement", format!("{contract_id}/{settlement_year}"))
            })?;
        let adjustments = sql.adjustments_for_settlement(&settlement.settlement_id)?;
        Ok(SettlementReport {
            summary: SettlementSummary::of(&settlement),
            charges_breakdown: adjustments.iter().map(ChargeBreakdown::from).collect(),
            settlement,
            contract,
        })
    }

    pub fn list_settlements(
        &self,
        contract_id: &str,
        filters: &SettlementFilters,
    ) -> LedgerResult<Vec<Settlement>> {
        let sql = self.store.sql();
        sql.get_contract(contract_id)?
            .ok_or_else(|| LedgerError::not_found("contract", contract_id))?;
        sql.list_settlements(contract_id, filters)
    }

    pub fn adjustments(&self, settlement_id: &str) -> LedgerResult<Vec<ChargeAdjustment>> {
        self.get_settlement(settlement_id)?;
        self.store.sql().adjustments_for_settlement(settlement_id)
    }

    /// Plan monthly provisioning up to the contract end date. Writes nothing.
    pub fn calculate_provisioning(
        &self,
        contract_id: &str,
        request: &ProvisioningRequest,
    ) -> LedgerResult<ProvisioningPlan> {
        let charge_type = request.charge_type.trim();
        if charge_type.is_empty() {
            return Err(LedgerError::Validation("charge_type is required".into()));
        }
        let monthly = to_cents("monthly_amount", request.monthly_amount)?;
        let annual_estimated = match request.annual_estimated {
            Some(estimate) => from_cents(to_cents("annual_estimated", estimate)?),
            None => from_cents(monthly.checked_mul(12).ok_or_else(|| {
                LedgerError::Validation(format!(
                    "annual estimate for monthly_amount {} is out of range",
                    request.monthly_amount
                ))
            })?),
        };

        let contract = self
            .store
            .sql()
            .get_contract(contract_id)?
            .ok_or_else(|| LedgerError::not_found("contract", contract_id))?;
        let schedule = monthly_schedule(request.start_date, contract.end_date, monthly);
        let total_provisioning = schedule.iter().map(|m| m.amount).sum();

        Ok(ProvisioningPlan {
            contract_id: contract.contract_id,
            charge_type: charge_type.to_string(),
            monthly_amount: from_cents(monthly),
            annual_estimated,
            start_date: request.start_date,
            end_date: contract.end_date,
            schedule,
            total_provisioning,
        })
    }
}

fn load_settlement(uow: &UnitOfWork<'_>, settlement_id: &str) -> LedgerResult<Settlement> {
    uow.sql()
        .get_settlement(settlement_id)?
        .ok_or_else(|| LedgerError::not_found("settlement", settlement_id))
}

fn insert_adjustment(
    uow: &UnitOfWork<'_>,
    settlement_id: &str,
    line: &ChargeLine,
) -> LedgerResult<ChargeAdjustment> {
    let adjustment = ChargeAdjustment {
        adjustment_id: new_id(),
        settlement_id: settlement_id.to_string(),
        charge_type: line.charge_type.clone(),
        provisioning_paid: from_cents(line.provisioning_paid),
        actual_cost: from_cents(line.actual_cost),
        balance: from_cents(line.balance()),
        created_at: uow.now(),
    };
    uow.sql().insert_adjustment(&adjustment)?;
    Ok(adjustment)
}

fn already_approved(s: &Settlement) -> LedgerError {
    LedgerError::Conflict(format!(
        "settlement {} was already approved by {} on {}",
        s.settlement_id,
        s.approved_by.as_deref().unwrap_or("unknown"),
        s.approval_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "an unknown date".into())
    ))
}

fn movements_total(movements: &[Movement]) -> Decimal {
    movement_journal::net_debit(movements)
}
