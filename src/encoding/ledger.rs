//! Running balance reported in the cost footer.
//!
//! Each AI provider has its own ledger. Cost is charged when an answer is
//! encoded, not when it is confirmed delivered, and is never rolled back.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rust_decimal::Decimal;

use crate::error::ConfigError;

/// A balance that can be charged.
pub trait BalanceLedger: Send + Sync {
    /// Subtract `amount` and return the new balance.
    fn charge(&self, amount: Decimal) -> Decimal;

    /// Current balance.
    fn balance(&self) -> Decimal;
}

/// Process-local ledger.
#[derive(Debug)]
pub struct InMemoryLedger {
    balance: Mutex<Decimal>,
}

impl InMemoryLedger {
    pub fn new(initial: Decimal) -> Self {
        Self {
            balance: Mutex::new(initial),
        }
    }
}

impl BalanceLedger for InMemoryLedger {
    fn charge(&self, amount: Decimal) -> Decimal {
        let mut balance = self.balance.lock().unwrap_or_else(|e| e.into_inner());
        *balance -= amount;
        *balance
    }

    fn balance(&self) -> Decimal {
        *self.balance.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Ledger persisted to a JSON file shared by all providers.
///
/// The file maps ledger names to balances:
/// `{"claude": "4.9877", "mistral": "5.00"}`.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    name: String,
    balance: Mutex<Decimal>,
}

impl FileLedger {
    /// Open the ledger `name` stored at `path`, starting from `initial` if
    /// the file or the entry does not exist yet.
    pub fn open(
        path: impl Into<PathBuf>,
        name: impl Into<String>,
        initial: Decimal,
    ) -> Result<Self, ConfigError> {
        let path = path.into();
        let name = name.into();
        let balance = read_entries(&path)?.get(&name).copied().unwrap_or(initial);
        tracing::debug!(ledger = %name, %balance, path = %path.display(), "Opened ledger");
        Ok(Self {
            path,
            name,
            balance: Mutex::new(balance),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn persist(&self, balance: Decimal) -> Result<(), ConfigError> {
        let mut entries = read_entries(&self.path)?;
        entries.insert(self.name.clone(), balance);
        let json = serde_json::to_string_pretty(&entries).map_err(|e| ConfigError::InvalidValue {
            key: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl BalanceLedger for FileLedger {
    fn charge(&self, amount: Decimal) -> Decimal {
        let mut balance = self.balance.lock().unwrap_or_else(|e| e.into_inner());
        *balance -= amount;
        // The charge stands even if it cannot be written out.
        if let Err(e) = self.persist(*balance) {
            tracing::warn!(ledger = %self.name, error = %e, "Failed to persist ledger");
        }
        *balance
    }

    fn balance(&self) -> Decimal {
        *self.balance.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn read_entries(path: &Path) -> Result<BTreeMap<String, Decimal>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
        Ok(raw) => serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidValue {
            key: path.display().to_string(),
            message: e.to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_in_memory_ledger_subtracts_each_charge() {
        let ledger = InMemoryLedger::new(dec!(5.00));
        let costs = [dec!(0.0123), dec!(0.2), dec!(0.0045)];
        for cost in costs {
            ledger.charge(cost);
        }
        assert_eq!(ledger.balance(), dec!(5.00) - costs.iter().sum::<Decimal>());
    }

    #[test]
    fn test_in_memory_ledger_may_go_negative() {
        let ledger = InMemoryLedger::new(dec!(0.01));
        assert_eq!(ledger.charge(dec!(0.05)), dec!(-0.04));
    }

    #[test]
    fn test_file_ledger_starts_from_initial() {
        let dir = tempdir().unwrap();
        let ledger = FileLedger::open(dir.path().join("ledger.json"), "claude", dec!(5.00)).unwrap();
        assert_eq!(ledger.balance(), dec!(5.00));
    }

    #[test]
    fn test_file_ledger_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let ledger = FileLedger::open(&path, "claude", dec!(5.00)).unwrap();
        assert_eq!(ledger.charge(dec!(0.25)), dec!(4.75));
        drop(ledger);

        let reopened = FileLedger::open(&path, "claude", dec!(5.00)).unwrap();
        assert_eq!(reopened.balance(), dec!(4.75));
    }

    #[test]
    fn test_file_ledgers_share_one_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.json");

        let claude = FileLedger::open(&path, "claude", dec!(5.00)).unwrap();
        let mistral = FileLedger::open(&path, "mistral", dec!(3.00)).unwrap();
        claude.charge(dec!(1));
        mistral.charge(dec!(0.5));

        let raw = std::fs::read_to_string(&path).unwrap();
        let entries: BTreeMap<String, Decimal> = serde_json::from_str(&raw).unwrap();
        assert_eq!(entries["claude"], dec!(4));
        assert_eq!(entries["mistral"], dec!(2.5));
    }

    #[test]
    fn test_file_ledger_rejects_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "not json").unwrap();
        let err = FileLedger::open(&path, "claude", dec!(5.00)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
