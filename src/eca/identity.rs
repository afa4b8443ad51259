//! Edge Compute Agent identities
//!
//! An ECA is identified by a 12-byte id rendered as 24 lowercase hex
//! characters: four bytes of big-endian Unix seconds followed by eight random
//! bytes. Anything else is not an id and is rejected before any lookup.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of an ECA id in bytes
pub const ECA_ID_LEN: usize = 12;

/// A string that is not a well-formed ECA id
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid ECA id: {0:?}")]
pub struct InvalidEcaId(pub String);

/// Unique identifier of an edge agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EcaId([u8; ECA_ID_LEN]);

impl EcaId {
    /// Generate a fresh id
    pub fn generate() -> Self {
        use rand::Rng;
        let mut bytes = [0u8; ECA_ID_LEN];
        bytes[..4].copy_from_slice(&(current_timestamp() as u32).to_be_bytes());
        rand::thread_rng().fill(&mut bytes[4..]);
        Self(bytes)
    }

    /// Unix seconds embedded in the id at generation time
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }
}

impl fmt::Display for EcaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for EcaId {
    type Err = InvalidEcaId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ECA_ID_LEN * 2 {
            return Err(InvalidEcaId(s.to_string()));
        }
        let mut bytes = [0u8; ECA_ID_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| InvalidEcaId(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for EcaId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EcaId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Registration metadata supplied by the agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EcaConfig {
    /// Human readable node name
    pub name: String,
    /// Node's public IPv4 address
    #[serde(default)]
    pub ipv4: Option<Ipv4Addr>,
    /// Node's public IPv6 address
    #[serde(default)]
    pub ipv6: Option<Ipv6Addr>,
    /// Deployment region (e.g., "us-east")
    #[serde(default)]
    pub region: Option<String>,
    /// Optional metadata
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

/// An edge agent identity document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Eca {
    pub id: EcaId,
    pub config: EcaConfig,
    /// Authorization flag. A missing flag means not authorized.
    #[serde(default)]
    pub authorized: Option<bool>,
    /// Registration timestamp (Unix seconds)
    pub registered_at: u64,
}

impl Eca {
    /// Create a new, unauthorized agent
    pub fn new(config: EcaConfig) -> Self {
        Self {
            id: EcaId::generate(),
            config,
            authorized: Some(false),
            registered_at: current_timestamp(),
        }
    }
}

/// Get current Unix timestamp
pub(crate) fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
