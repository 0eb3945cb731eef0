//! Ledger clock. Supplies timestamps and the default business date.
//!
//! Every row timestamp and every defaulted date flows through here so
//! tests can pin time.

use chrono::{DateTime, NaiveDate, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerClock {
    /// Wall-clock time.
    System,
    /// A frozen instant (tests, replays).
    Fixed(DateTime<Utc>),
}

impl LedgerClock {
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }

    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Self::System => Utc::now(),
            Self::Fixed(at) => *at,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

impl Default for LedgerClock {
    fn default() -> Self {
        Self::System
    }
}
