use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("operation time store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("operation time store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Durable home of the cumulative operation time.
pub trait OperationTimeStore: Send {
    /// Returns 0 when nothing has been stored yet.
    fn load(&mut self) -> Result<u64, StoreError>;
    fn save(&mut self, total_ms: u64) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SaveFile {
    #[serde(rename = "InsulinPump", default)]
    pump: PumpSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PumpSection {
    #[serde(rename = "TotalOperationTime", default)]
    total_operation_time_ms: u64,
}

/// JSON settings file, written through a staging file and renamed into place.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl OperationTimeStore for JsonFileStore {
    fn load(&mut self) -> Result<u64, StoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let file: SaveFile = serde_json::from_str(&raw)?;
        Ok(file.pump.total_operation_time_ms)
    }

    fn save(&mut self, total_ms: u64) -> Result<(), StoreError> {
        let file = SaveFile {
            pump: PumpSection {
                total_operation_time_ms: total_ms,
            },
        };
        let json = serde_json::to_string_pretty(&file)?;
        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        std::fs::write(&staging, json)?;
        std::fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

/// Volatile store; clones share the stored value.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    total_ms: Arc<Mutex<u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_total(total_ms: u64) -> Self {
        Self {
            total_ms: Arc::new(Mutex::new(total_ms)),
        }
    }

    pub fn total_ms(&self) -> u64 {
        match self.total_ms.lock() {
            Ok(total) => *total,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl OperationTimeStore for MemoryStore {
    fn load(&mut self) -> Result<u64, StoreError> {
        Ok(self.total_ms())
    }

    fn save(&mut self, total_ms: u64) -> Result<(), StoreError> {
        match self.total_ms.lock() {
            Ok(mut total) => *total = total_ms,
            Err(poisoned) => *poisoned.into_inner() = total_ms,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_loads_zero() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::new(dir.path().join("InsulinPump.json"));
        assert_eq!(store.load().unwrap(), 0);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("InsulinPump.json");

        JsonFileStore::new(&path).save(7_200_000).unwrap();
        assert_eq!(JsonFileStore::new(&path).load().unwrap(), 7_200_000);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("TotalOperationTime"));
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("InsulinPump.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(JsonFileStore::new(&path).load(), Err(StoreError::Corrupt(_))));
    }
}
