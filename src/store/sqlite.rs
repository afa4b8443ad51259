//! SQLite storage backend
//!
//! Zones and agents are stored as rows holding JSON documents. The zone name
//! column carries a UNIQUE constraint, and a record append is one UPDATE
//! statement, so SQLite itself provides the atomicity the zone store needs.

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{DocumentStore, Result, StoreError, UpdateOutcome};
use crate::dns::{DnsRecord, Zone};
use crate::eca::{Eca, EcaConfig, EcaId};

/// SQLite persistence for zones and agents
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| StoreError::Database(format!("Failed to open database: {}", e)))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| StoreError::Database(format!("Failed to set busy timeout: {}", e)))?;

        Self::create_tables(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (useful for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Database(format!("Failed to open in-memory database: {}", e)))?;

        Self::create_tables(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create database tables
    fn create_tables(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS zones (
                zone TEXT NOT NULL UNIQUE,
                serial TEXT NOT NULL,
                records_json TEXT NOT NULL DEFAULT '[]',
                users_json TEXT NOT NULL DEFAULT '[]'
            )",
            [],
        )
        .map_err(|e| StoreError::Database(format!("Failed to create zones table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS ecas (
                id TEXT PRIMARY KEY,
                config_json TEXT NOT NULL,
                authorized INTEGER,
                registered_at INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| StoreError::Database(format!("Failed to create ecas table: {}", e)))?;

        Ok(())
    }

    fn zone_from_row(zone: String, serial: String, records_json: String, users_json: String) -> Result<Zone> {
        let records: Vec<DnsRecord> = serde_json::from_str(&records_json)
            .map_err(|e| StoreError::Serialization(format!("Bad records for zone {}: {}", zone, e)))?;
        let users: Vec<String> = serde_json::from_str(&users_json)
            .map_err(|e| StoreError::Serialization(format!("Bad users for zone {}: {}", zone, e)))?;

        Ok(Zone {
            zone,
            records,
            serial,
            users,
        })
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

#[async_trait]
impl DocumentStore for SqliteStore {
    // === Zone Operations ===

    async fn insert_zone(&self, zone: &Zone) -> Result<()> {
        let records_json = serde_json::to_string(&zone.records)
            .map_err(|e| StoreError::Serialization(format!("Failed to serialize records: {}", e)))?;
        let users_json = serde_json::to_string(&zone.users)
            .map_err(|e| StoreError::Serialization(format!("Failed to serialize users: {}", e)))?;

        let conn = self.conn.lock().await;
        match conn.execute(
            "INSERT INTO zones (zone, serial, records_json, users_json) VALUES (?1, ?2, ?3, ?4)",
            params![zone.zone, zone.serial, records_json, users_json],
        ) {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(StoreError::AlreadyExists(zone.zone.clone())),
            Err(e) => Err(StoreError::Database(format!("Failed to insert zone: {}", e))),
        }
    }

    async fn push_record(&self, zone: &str, record: &DnsRecord, serial: u64) -> Result<UpdateOutcome> {
        let record_json = serde_json::to_string(record)
            .map_err(|e| StoreError::Serialization(format!("Failed to serialize record: {}", e)))?;

        let conn = self.conn.lock().await;
        let rows = conn
            .execute(
                "UPDATE zones SET
                    records_json = json_insert(records_json, '$[#]', json(?1)),
                    serial = CASE
                        WHEN CAST(serial AS INTEGER) > ?2 THEN serial
                        ELSE CAST(?2 AS TEXT)
                    END
                 WHERE zone = ?3",
                params![record_json, serial as i64, zone],
            )
            .map_err(|e| StoreError::Database(format!("Failed to append record: {}", e)))?;

        Ok(UpdateOutcome {
            matched: rows as u64,
            modified: rows as u64,
        })
    }

    async fn find_zone(&self, zone: &str) -> Result<Option<Zone>> {
        let conn = self.conn.lock().await;

        let row: Option<(String, String, String, String)> = conn
            .query_row(
                "SELECT zone, serial, records_json, users_json FROM zones WHERE zone = ?1",
                params![zone],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .map_err(|e| StoreError::Database(format!("Failed to load zone: {}", e)))?;

        row.map(|(zone, serial, records, users)| Self::zone_from_row(zone, serial, records, users))
            .transpose()
    }

    async fn list_zones(&self) -> Result<Vec<Zone>> {
        let conn = self.conn.lock().await;

        let mut stmt = conn
            .prepare("SELECT zone, serial, records_json, users_json FROM zones ORDER BY zone")
            .map_err(|e| StoreError::Database(format!("Failed to prepare statement: {}", e)))?;

        let rows: Vec<(String, String, String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
            .map_err(|e| StoreError::Database(format!("Failed to query zones: {}", e)))?
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| StoreError::Database(format!("Failed to read zone row: {}", e)))?;

        rows.into_iter()
            .map(|(zone, serial, records, users)| Self::zone_from_row(zone, serial, records, users))
            .collect()
    }

    // === Agent Operations ===

    async fn insert_eca(&self, eca: &Eca) -> Result<()> {
        let config_json = serde_json::to_string(&eca.config)
            .map_err(|e| StoreError::Serialization(format!("Failed to serialize ECA config: {}", e)))?;

        let conn = self.conn.lock().await;
        match conn.execute(
            "INSERT INTO ecas (id, config_json, authorized, registered_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                eca.id.to_string(),
                config_json,
                eca.authorized.map(|a| a as i32),
                eca.registered_at as i64,
            ],
        ) {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(StoreError::AlreadyExists(eca.id.to_string())),
            Err(e) => Err(StoreError::Database(format!("Failed to insert ECA: {}", e))),
        }
    }

    async fn find_eca(&self, id: &EcaId) -> Result<Option<Eca>> {
        let conn = self.conn.lock().await;

        let row: Option<(String, Option<i32>, i64)> = conn
            .query_row(
                "SELECT config_json, authorized, registered_at FROM ecas WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|e| StoreError::Database(format!("Failed to load ECA: {}", e)))?;

        let Some((config_json, authorized, registered_at)) = row else {
            return Ok(None);
        };

        let config: EcaConfig = serde_json::from_str(&config_json)
            .map_err(|e| StoreError::Serialization(format!("Bad config for ECA {}: {}", id, e)))?;

        Ok(Some(Eca {
            id: *id,
            config,
            authorized: authorized.map(|a| a != 0),
            registered_at: registered_at as u64,
        }))
    }

    async fn set_eca_authorized(&self, id: &EcaId, authorized: bool) -> Result<UpdateOutcome> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Database(format!("Failed to begin transaction: {}", e)))?;

        let current: Option<Option<i32>> = tx
            .query_row(
                "SELECT authorized FROM ecas WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Database(format!("Failed to load ECA: {}", e)))?;

        let Some(current) = current else {
            return Ok(UpdateOutcome::default());
        };

        tx.execute(
            "UPDATE ecas SET authorized = ?1 WHERE id = ?2",
            params![authorized as i32, id.to_string()],
        )
        .map_err(|e| StoreError::Database(format!("Failed to update ECA: {}", e)))?;
        tx.commit()
            .map_err(|e| StoreError::Database(format!("Failed to commit: {}", e)))?;

        Ok(UpdateOutcome {
            matched: 1,
            modified: (current.map(|a| a != 0) != Some(authorized)) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eca() -> Eca {
        Eca::new(EcaConfig {
            name: "edge-1".to_string(),
            ipv4: Some("198.51.100.7".parse().unwrap()),
            region: Some("us-east".to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_zone_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let zone = Zone::new("example.com").with_users(vec!["alice".to_string()]);
        store.insert_zone(&zone).await.unwrap();

        let loaded = store.find_zone("example.com").await.unwrap().unwrap();
        assert_eq!(loaded, zone);
        assert!(store.find_zone("other.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unique_zone_name() {
        let store = SqliteStore::in_memory().unwrap();
        store.insert_zone(&Zone::new("example.com")).await.unwrap();

        let err = store.insert_zone(&Zone::new("example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(name) if name == "example.com"));
        assert_eq!(store.list_zones().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_push_record_appends_and_raises_serial() {
        let store = SqliteStore::in_memory().unwrap();
        let mut zone = Zone::new("example.com");
        zone.serial = "1700000000".to_string();
        store.insert_zone(&zone).await.unwrap();

        let first = DnsRecord::a("www", "10.0.0.1".parse().unwrap(), 300);
        let second = DnsRecord::mx("@", "mail.example.com", 10, 300);

        let outcome = store.push_record("example.com", &first, 1_700_000_010).await.unwrap();
        assert_eq!(outcome.matched, 1);
        store.push_record("example.com", &second, 1_700_000_005).await.unwrap();

        let loaded = store.find_zone("example.com").await.unwrap().unwrap();
        assert_eq!(loaded.records, vec![first, second]);
        assert_eq!(loaded.serial, "1700000010");
    }

    #[tokio::test]
    async fn test_push_record_missing_zone() {
        let store = SqliteStore::in_memory().unwrap();
        let record = DnsRecord::a("www", "10.0.0.1".parse().unwrap(), 300);

        let outcome = store.push_record("missing.com", &record, 1).await.unwrap();
        assert!(outcome.is_unmatched());
        assert!(store.list_zones().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_eca_round_trip_and_authorize() {
        let store = SqliteStore::in_memory().unwrap();
        let eca = eca();
        store.insert_eca(&eca).await.unwrap();

        let loaded = store.find_eca(&eca.id).await.unwrap().unwrap();
        assert_eq!(loaded, eca);

        let outcome = store.set_eca_authorized(&eca.id, true).await.unwrap();
        assert_eq!(outcome, UpdateOutcome { matched: 1, modified: 1 });
        let outcome = store.set_eca_authorized(&eca.id, true).await.unwrap();
        assert_eq!(outcome, UpdateOutcome { matched: 1, modified: 0 });

        let loaded = store.find_eca(&eca.id).await.unwrap().unwrap();
        assert_eq!(loaded.authorized, Some(true));

        let outcome = store.set_eca_authorized(&EcaId::generate(), true).await.unwrap();
        assert!(outcome.is_unmatched());
    }

    #[tokio::test]
    async fn test_null_authorized_reads_as_none() {
        let store = SqliteStore::in_memory().unwrap();
        let mut eca = eca();
        eca.authorized = None;
        store.insert_eca(&eca).await.unwrap();

        let loaded = store.find_eca(&eca.id).await.unwrap().unwrap();
        assert_eq!(loaded.authorized, None);
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_zone(&Zone::new("example.com")).await.unwrap();
            let record = DnsRecord::a("www", "10.0.0.1".parse().unwrap(), 300);
            store.push_record("example.com", &record, 1_700_000_000).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let zone = store.find_zone("example.com").await.unwrap().unwrap();
        assert_eq!(zone.records.len(), 1);
    }
}
