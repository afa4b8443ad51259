//! Zone Store
//!
//! Owns every mutation of zone documents. Creation relies on the store's
//! unique constraint and record appends are a single conditional update, so
//! there is no check-then-write window for concurrent operators to race in.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use super::{normalize_zone_name, validate_zone_name, DnsError, DnsRecord};
use crate::store::DocumentStore;

/// A DNS zone document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// The zone name (e.g., "example.com")
    pub zone: String,
    /// Records in append order
    #[serde(default)]
    pub records: Vec<DnsRecord>,
    /// Change counter, Unix seconds as a decimal string
    pub serial: String,
    /// Users allowed to manage this zone
    #[serde(default)]
    pub users: Vec<String>,
}

impl Zone {
    /// Create a new, empty zone
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            records: Vec::new(),
            serial: current_timestamp().to_string(),
            users: Vec::new(),
        }
    }

    /// Set the owning users
    pub fn with_users(mut self, users: Vec<String>) -> Self {
        self.users = users;
        self
    }

    /// Serial as a number, if it parses
    pub fn serial_number(&self) -> Option<u64> {
        self.serial.parse().ok()
    }
}

/// Source of Unix seconds for serials
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Zone operations against a document store
pub struct ZoneStore {
    store: Arc<dyn DocumentStore>,
    clock: Clock,
}

impl ZoneStore {
    /// Create a zone store on top of `store`
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            clock: Arc::new(current_timestamp),
        }
    }

    /// Replace the serial clock
    pub fn with_clock(mut self, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Create a zone.
    ///
    /// The name is validated and normalized, and the serial is stamped with
    /// the current time. A second zone with the same name is rejected by the
    /// store, not by a lookup here.
    pub async fn create_zone(&self, mut zone: Zone) -> Result<Zone, DnsError> {
        if !validate_zone_name(&zone.zone) {
            return Err(DnsError::InvalidName(zone.zone));
        }

        zone.zone = normalize_zone_name(&zone.zone);
        zone.serial = (self.clock)().to_string();

        self.store.insert_zone(&zone).await?;

        info!("Created zone: {}", zone.zone);
        Ok(zone)
    }

    /// Append a record to an existing zone and bump its serial.
    ///
    /// Fails with `ZoneNotFound` when the update matched nothing. The zone is
    /// never created implicitly.
    pub async fn append_record(&self, zone_name: &str, record: DnsRecord) -> Result<(), DnsError> {
        let zone_name = normalize_zone_name(zone_name);
        let serial = (self.clock)();

        let outcome = self.store.push_record(&zone_name, &record, serial).await?;
        if outcome.is_unmatched() {
            debug!("Append to missing zone {} rejected", zone_name);
            return Err(DnsError::ZoneNotFound(zone_name));
        }

        info!(
            "Added {} record {} -> {} to zone {}",
            record.record_type,
            record.fqdn(&zone_name),
            record.value.to_display_string(),
            zone_name
        );
        Ok(())
    }

    /// Get a zone by name
    pub async fn get_zone(&self, zone_name: &str) -> Result<Zone, DnsError> {
        let zone_name = normalize_zone_name(zone_name);
        self.store
            .find_zone(&zone_name)
            .await?
            .ok_or(DnsError::ZoneNotFound(zone_name))
    }

    /// List all zones
    pub async fn list_zones(&self) -> Result<Vec<Zone>, DnsError> {
        Ok(self.store.list_zones().await?)
    }
}

/// Get current Unix timestamp
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
