//! Movement journal: the append-only record of every balance-affecting
//! event on a deposit.
//!
//! Each movement carries a signed `delta` (negative debits the deposit,
//! positive credits it back). `movement_type` is reporting metadata only;
//! the balance effect never depends on it. Invariant maintained here:
//!
//!   current_balance == deposit_amount + Σ delta
//!
//! The balance update and the journal insert happen in the caller's
//! unit of work, together with an audit record per movement.

use crate::{
    audit::ENTITY_MOVEMENT,
    coordinator::UnitOfWork,
    error::{LedgerError, LedgerResult},
    types::{from_cents, new_id, Cents, DepositId, MovementId, SettlementId, UnknownVariant},
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Hold,
    Deduct,
    Return,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hold => "hold",
            Self::Deduct => "deduct",
            Self::Return => "return",
        }
    }
}

impl FromStr for MovementType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hold" => Ok(Self::Hold),
            "deduct" => Ok(Self::Deduct),
            "return" => Ok(Self::Return),
            other => Err(UnknownVariant {
                kind: "movement type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Movement {
    pub movement_id: MovementId,
    pub deposit_id: DepositId,
    pub movement_type: MovementType,
    /// Magnitude as recorded, never negative.
    pub amount: Decimal,
    /// Signed balance effect.
    pub delta: Decimal,
    pub reason: String,
    pub description: Option<String>,
    pub reference_date: NaiveDate,
    pub settlement_id: Option<SettlementId>,
    pub reverses_movement_id: Option<MovementId>,
    /// Per-deposit append order.
    pub seq: i64,
    pub created_at: DateTime<Utc>,
}

/// A movement about to be journaled, amounts in cents.
#[derive(Debug, Clone)]
pub(crate) struct JournalEntry {
    pub movement_type: MovementType,
    pub amount: Cents,
    pub delta: Cents,
    pub reason: String,
    pub description: Option<String>,
    pub reference_date: NaiveDate,
    pub settlement_id: Option<SettlementId>,
    pub reverses_movement_id: Option<MovementId>,
}

impl JournalEntry {
    /// The common case: a movement that debits `amount` from the deposit.
    pub fn debit(
        movement_type: MovementType,
        amount: Cents,
        reason: impl Into<String>,
        reference_date: NaiveDate,
    ) -> Self {
        Self {
            movement_type,
            amount,
            delta: -amount,
            reason: reason.into(),
            description: None,
            reference_date,
            settlement_id: None,
            reverses_movement_id: None,
        }
    }

    pub fn described(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn for_settlement(mut self, settlement_id: &str) -> Self {
        self.settlement_id = Some(settlement_id.to_string());
        self
    }
}

/// Apply `entry` to the deposit balance and journal it.
///
/// The balance change is a single conditional UPDATE that refuses to take
/// the balance below zero or touch a returned/archived deposit, so two
/// writers can never both spend the same funds.
pub(crate) fn append(
    uow: &mut UnitOfWork<'_>,
    deposit_id: &str,
    entry: JournalEntry,
) -> LedgerResult<Movement> {
    let now = uow.now();
    let applied = uow
        .sql()
        .apply_balance_delta(deposit_id, entry.delta, now)?;
    if !applied {
        return Err(explain_rejected(uow, deposit_id, entry.delta)?);
    }

    let movement = Movement {
        movement_id: new_id(),
        deposit_id: deposit_id.to_string(),
        movement_type: entry.movement_type,
        amount: from_cents(entry.amount),
        delta: from_cents(entry.delta),
        reason: entry.reason,
        description: entry.description,
        reference_date: entry.reference_date,
        settlement_id: entry.settlement_id,
        reverses_movement_id: entry.reverses_movement_id,
        seq: uow.sql().next_movement_seq(deposit_id)?,
        created_at: now,
    };
    uow.sql().insert_movement(&movement)?;

    uow.audit(
        ENTITY_MOVEMENT,
        &movement.movement_id,
        movement.movement_type.as_str(),
        serde_json::json!({
            "deposit_id": movement.deposit_id,
            "amount": movement.amount,
            "delta": movement.delta,
            "reason": movement.reason,
            "reference_date": movement.reference_date,
            "settlement_id": movement.settlement_id,
            "reverses_movement_id": movement.reverses_movement_id,
        }),
    )?;
    Ok(movement)
}

/// Work out why the conditional balance update matched no row.
fn explain_rejected(
    uow: &UnitOfWork<'_>,
    deposit_id: &str,
    delta: Cents,
) -> LedgerResult<LedgerError> {
    let deposit = uow
        .sql()
        .get_deposit(deposit_id)?
        .ok_or_else(|| LedgerError::not_found("deposit", deposit_id))?;
    if deposit.status.is_terminal() {
        return Ok(LedgerError::Conflict(format!(
            "deposit {deposit_id} is {}",
            deposit.status.as_str()
        )));
    }
    Ok(LedgerError::Conflict(format!(
        "insufficient balance on deposit {deposit_id}: available {}, requested {}",
        deposit.current_balance,
        from_cents(-delta)
    )))
}

/// Net amount debited by the given movements (debits positive).
pub fn net_debit<'m>(movements: impl IntoIterator<Item = &'m Movement>) -> Decimal {
    -movements.into_iter().map(|m| m.delta).sum::<Decimal>()
}

/// Net debit of one movement type.
pub fn net_debit_of(movements: &[Movement], movement_type: MovementType) -> Decimal {
    net_debit(movements.iter().filter(|m| m.movement_type == movement_type))
}
