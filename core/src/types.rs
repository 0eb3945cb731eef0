//! Shared primitive types and money conversion used across the ledger.
//!
//! Public amounts are `Decimal`. The store keeps integer cents so SQL
//! arithmetic on balances stays exact.

use crate::error::{LedgerError, LedgerResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Caller-supplied identifier of a rental contract.
pub type ContractId = String;

/// Ledger-generated identifiers (UUID v4 strings).
pub type DepositId = String;
pub type MovementId = String;
pub type SettlementId = String;

/// Integer minor units (cents). The only representation the store sees.
pub type Cents = i64;

/// Monetary scale used everywhere: two decimal places.
pub const MONEY_SCALE: u32 = 2;

/// Convert a non-negative amount to cents.
///
/// Rejects negative amounts, more than two decimal places, and values
/// that do not fit in `i64` cents.
pub fn to_cents(field: &str, amount: Decimal) -> LedgerResult<Cents> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(LedgerError::Validation(format!(
            "{field} must not be negative (got {amount})"
        )));
    }
    signed_cents(field, amount)
}

/// Convert a signed amount (balances, deltas) to cents.
pub fn signed_cents(field: &str, amount: Decimal) -> LedgerResult<Cents> {
    if amount.normalize().scale() > MONEY_SCALE {
        return Err(LedgerError::Validation(format!(
            "{field} has more than {MONEY_SCALE} decimal places (got {amount})"
        )));
    }
    (amount * Decimal::ONE_HUNDRED)
        .to_i64()
        .ok_or_else(|| LedgerError::Validation(format!("{field} is out of range (got {amount})")))
}

/// Sum amounts already in cents. A total that does not fit in `i64` is a
/// validation error, never a wrap.
pub fn total_cents<I>(field: &str, amounts: I) -> LedgerResult<Cents>
where
    I: IntoIterator<Item = Cents>,
{
    amounts
        .into_iter()
        .try_fold(0 as Cents, Cents::checked_add)
        .ok_or_else(|| LedgerError::Validation(format!("{field} is out of range")))
}

/// Convert stored cents back to a two-place decimal.
pub fn from_cents(cents: Cents) -> Decimal {
    Decimal::new(cents, MONEY_SCALE)
}

/// A stored enum column held a value this build does not know.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
