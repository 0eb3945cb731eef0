//! Audit records written alongside every ledger mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ENTITY_CONTRACT: &str = "contract";
pub const ENTITY_DEPOSIT: &str = "security_deposit";
pub const ENTITY_MOVEMENT: &str = "deposit_movement";
pub const ENTITY_RECEIVABLE: &str = "deposit_receivable";
pub const ENTITY_SETTLEMENT: &str = "charge_settlement";

/// One row of the audit log as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub audit_id: Option<i64>,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
