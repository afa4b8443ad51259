//! In-memory storage backend
//!
//! Used for development and tests. Each operation runs under a single lock
//! acquisition, which gives the same per-document atomicity as the SQLite
//! backend.

use super::{next_serial, DocumentStore, Result, StoreError, UpdateOutcome};
use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::dns::{DnsRecord, Zone};
use crate::eca::{Eca, EcaId};

/// In-memory storage backend
pub struct MemoryStore {
    zones: RwLock<HashMap<String, Zone>>,
    ecas: RwLock<HashMap<EcaId, Eca>>,
}

impl MemoryStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self {
            zones: RwLock::new(HashMap::new()),
            ecas: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Database(format!("lock poisoned: {}", e))
}

#[async_trait]
impl DocumentStore for MemoryStore {
    // === Zone Operations ===

    async fn insert_zone(&self, zone: &Zone) -> Result<()> {
        let mut zones = self.zones.write().map_err(poisoned)?;
        match zones.entry(zone.zone.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(zone.zone.clone())),
            Entry::Vacant(slot) => {
                slot.insert(zone.clone());
                Ok(())
            }
        }
    }

    async fn push_record(&self, zone: &str, record: &DnsRecord, serial: u64) -> Result<UpdateOutcome> {
        let mut zones = self.zones.write().map_err(poisoned)?;
        let Some(doc) = zones.get_mut(zone) else {
            return Ok(UpdateOutcome::default());
        };

        doc.records.push(record.clone());
        doc.serial = next_serial(&doc.serial, serial);

        Ok(UpdateOutcome {
            matched: 1,
            modified: 1,
        })
    }

    async fn find_zone(&self, zone: &str) -> Result<Option<Zone>> {
        let zones = self.zones.read().map_err(poisoned)?;
        Ok(zones.get(zone).cloned())
    }

    async fn list_zones(&self) -> Result<Vec<Zone>> {
        let zones = self.zones.read().map_err(poisoned)?;
        let mut list: Vec<Zone> = zones.values().cloned().collect();
        list.sort_by(|a, b| a.zone.cmp(&b.zone));
        Ok(list)
    }

    // === Agent Operations ===

    async fn insert_eca(&self, eca: &Eca) -> Result<()> {
        let mut ecas = self.ecas.write().map_err(poisoned)?;
        match ecas.entry(eca.id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(eca.id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(eca.clone());
                Ok(())
            }
        }
    }

    async fn find_eca(&self, id: &EcaId) -> Result<Option<Eca>> {
        let ecas = self.ecas.read().map_err(poisoned)?;
        Ok(ecas.get(id).cloned())
    }

    async fn set_eca_authorized(&self, id: &EcaId, authorized: bool) -> Result<UpdateOutcome> {
        let mut ecas = self.ecas.write().map_err(poisoned)?;
        let Some(eca) = ecas.get_mut(id) else {
            return Ok(UpdateOutcome::default());
        };

        let modified = eca.authorized != Some(authorized);
        eca.authorized = Some(authorized);

        Ok(UpdateOutcome {
            matched: 1,
            modified: modified as u64,
        })
    }
}
