use serde::{Deserialize, Serialize};

fn default_database_path() -> String {
    "leaseledger.db".into()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_list_limit() -> u32 {
    100
}

fn default_return_method() -> String {
    "bank_transfer".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerConfig {
    /// SQLite file, or `:memory:`.
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// How long a writer waits for the database lock before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Row cap for list queries without an explicit limit.
    #[serde(default = "default_list_limit")]
    pub list_limit: u32,
    /// Used by `return_deposit` when the caller names no method.
    #[serde(default = "default_return_method")]
    pub default_return_method: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            list_limit: default_list_limit(),
            default_return_method: default_return_method(),
        }
    }
}

impl LedgerConfig {
    /// Load from a JSON file. Missing keys take their defaults.
    /// In tests, use LedgerConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: LedgerConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// In-memory database with defaults.
    pub fn default_test() -> Self {
        Self {
            database_path: ":memory:".into(),
            ..Self::default()
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.database_path.trim().is_empty() {
            anyhow::bail!("database_path must not be empty");
        }
        if self.list_limit == 0 {
            anyhow::bail!("list_limit must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: LedgerConfig = serde_json::from_str(r#"{ "list_limit": 25 }"#).unwrap();
        assert_eq!(cfg.list_limit, 25);
        assert_eq!(cfg.busy_timeout_ms, 5_000);
        assert_eq!(cfg.default_return_method, "bank_transfer");
    }

    #[test]
    fn load_reports_missing_file() {
        let err = LedgerConfig::load("/nonexistent/ledger.json").unwrap_err();
        assert!(err.to_string().contains("Cannot read"));
    }
}
