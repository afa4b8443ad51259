//! Document store backends
//!
//! This module provides the `DocumentStore` trait and its implementations:
//! - `MemoryStore` - In-memory storage for development and tests
//! - `SqliteStore` - Durable storage using SQLite
//!
//! The control plane relies on the store for per-document atomicity: the
//! unique constraint on zone names, and single-statement conditional updates
//! that never upsert. No component keeps its own copy of zone or agent state.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::dns::{DnsRecord, Zone};
use crate::eca::{Eca, EcaId};

/// Errors from storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Result of a conditional update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOutcome {
    /// Documents that matched the filter
    pub matched: u64,
    /// Documents whose contents changed
    pub modified: u64,
}

impl UpdateOutcome {
    /// True when the filter matched no document
    pub fn is_unmatched(&self) -> bool {
        self.matched == 0
    }
}

/// Storage backend for zone and agent documents
///
/// The trait is object-safe and is handed to components as
/// `Arc<dyn DocumentStore>`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    // === Zone Operations ===

    /// Insert a new zone. Fails with `AlreadyExists` if the name is taken.
    async fn insert_zone(&self, zone: &Zone) -> Result<()>;

    /// Append `record` to the zone and raise its serial to at least `serial`,
    /// in one atomic update. Never creates the zone.
    async fn push_record(&self, zone: &str, record: &DnsRecord, serial: u64) -> Result<UpdateOutcome>;

    /// Get a zone by name
    async fn find_zone(&self, zone: &str) -> Result<Option<Zone>>;

    /// List all zones
    async fn list_zones(&self) -> Result<Vec<Zone>>;

    // === Agent Operations ===

    /// Insert a new agent identity
    async fn insert_eca(&self, eca: &Eca) -> Result<()>;

    /// Get an agent by ID
    async fn find_eca(&self, id: &EcaId) -> Result<Option<Eca>>;

    /// Set the authorization flag of an existing agent
    async fn set_eca_authorized(&self, id: &EcaId, authorized: bool) -> Result<UpdateOutcome>;
}

/// Storage configuration
#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// In-memory storage (development)
    Memory,

    /// SQLite database file
    Sqlite { path: PathBuf },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory
    }
}

/// Create a store from configuration
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreConfig::Sqlite { path } => Ok(Arc::new(SqliteStore::open(path)?)),
    }
}

/// Pick the higher of a stored serial and a candidate.
///
/// Serials that do not parse as integers are replaced.
pub(crate) fn next_serial(current: &str, candidate: u64) -> String {
    match current.parse::<u64>() {
        Ok(existing) if existing > candidate => current.to_string(),
        _ => candidate.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_serial_never_decreases() {
        assert_eq!(next_serial("1700000000", 1700000005), "1700000005");
        assert_eq!(next_serial("1700000005", 1700000000), "1700000005");
        assert_eq!(next_serial("1700000005", 1700000005), "1700000005");
        assert_eq!(next_serial("garbage", 1700000000), "1700000000");
    }

    #[test]
    fn test_update_outcome() {
        assert!(UpdateOutcome::default().is_unmatched());
        assert!(!UpdateOutcome { matched: 1, modified: 1 }.is_unmatched());
    }

    #[tokio::test]
    async fn test_create_memory_store() {
        let store = create_store(&StoreConfig::Memory).unwrap();
        assert!(store.list_zones().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.db");
        let store = create_store(&StoreConfig::Sqlite { path: path.clone() }).unwrap();
        assert!(store.list_zones().await.unwrap().is_empty());
        assert!(path.exists());
    }
}
