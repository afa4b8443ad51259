//! DNS Record Type Definitions
//!
//! Defines the record types operators can submit to a zone.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use super::ValidationError;
use crate::store::StoreError;

/// Default TTL applied when a submission does not carry one
pub const DEFAULT_TTL: u32 = 300;

/// DNS record types accepted by the control plane
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum DnsRecordType {
    /// IPv4 address record
    A,
    /// IPv6 address record
    AAAA,
    /// Canonical name (alias)
    CNAME,
    /// Mail exchange
    MX,
    /// Text record
    TXT,
    /// Name server
    NS,
}

impl fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsRecordType::A => write!(f, "A"),
            DnsRecordType::AAAA => write!(f, "AAAA"),
            DnsRecordType::CNAME => write!(f, "CNAME"),
            DnsRecordType::MX => write!(f, "MX"),
            DnsRecordType::TXT => write!(f, "TXT"),
            DnsRecordType::NS => write!(f, "NS"),
        }
    }
}

impl FromStr for DnsRecordType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "A" => Ok(DnsRecordType::A),
            "AAAA" => Ok(DnsRecordType::AAAA),
            "CNAME" => Ok(DnsRecordType::CNAME),
            "MX" => Ok(DnsRecordType::MX),
            "TXT" => Ok(DnsRecordType::TXT),
            "NS" => Ok(DnsRecordType::NS),
            _ => Err(ValidationError::UnsupportedRecordType(s.to_string())),
        }
    }
}

/// Values for different DNS record types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum DnsRecordValue {
    /// IPv4 address
    A(Ipv4Addr),
    /// IPv6 address
    AAAA(Ipv6Addr),
    /// Canonical name
    CNAME(String),
    /// Mail exchange with priority handled separately
    MX { exchange: String },
    /// Text record
    TXT(String),
    /// Name server
    NS(String),
}

impl DnsRecordValue {
    /// Get the record type for this value
    pub fn record_type(&self) -> DnsRecordType {
        match self {
            DnsRecordValue::A(_) => DnsRecordType::A,
            DnsRecordValue::AAAA(_) => DnsRecordType::AAAA,
            DnsRecordValue::CNAME(_) => DnsRecordType::CNAME,
            DnsRecordValue::MX { .. } => DnsRecordType::MX,
            DnsRecordValue::TXT(_) => DnsRecordType::TXT,
            DnsRecordValue::NS(_) => DnsRecordType::NS,
        }
    }

    /// Format the value as a string for display
    pub fn to_display_string(&self) -> String {
        match self {
            DnsRecordValue::A(ip) => ip.to_string(),
            DnsRecordValue::AAAA(ip) => ip.to_string(),
            DnsRecordValue::CNAME(name) => name.clone(),
            DnsRecordValue::MX { exchange } => exchange.clone(),
            DnsRecordValue::TXT(text) => format!("\"{}\"", text),
            DnsRecordValue::NS(name) => name.clone(),
        }
    }
}

/// A DNS record as stored in a zone document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DnsRecord {
    /// Record name (e.g., "www" or "@" for the zone apex)
    pub name: String,
    /// Record type
    pub record_type: DnsRecordType,
    /// Time to live in seconds
    pub ttl: u32,
    /// Record value
    pub value: DnsRecordValue,
    /// Priority (MX only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u16>,
}

impl DnsRecord {
    /// Create a new DNS record
    pub fn new(name: impl Into<String>, ttl: u32, value: DnsRecordValue) -> Self {
        Self {
            name: name.into(),
            record_type: value.record_type(),
            ttl,
            value,
            priority: None,
        }
    }

    /// Create an A record
    pub fn a(name: impl Into<String>, ip: Ipv4Addr, ttl: u32) -> Self {
        Self::new(name, ttl, DnsRecordValue::A(ip))
    }

    /// Create an AAAA record
    pub fn aaaa(name: impl Into<String>, ip: Ipv6Addr, ttl: u32) -> Self {
        Self::new(name, ttl, DnsRecordValue::AAAA(ip))
    }

    /// Create an MX record
    pub fn mx(name: impl Into<String>, exchange: impl Into<String>, priority: u16, ttl: u32) -> Self {
        let mut record = Self::new(
            name,
            ttl,
            DnsRecordValue::MX {
                exchange: exchange.into(),
            },
        );
        record.priority = Some(priority);
        record
    }

    /// Get the fully qualified domain name for this record
    pub fn fqdn(&self, zone: &str) -> String {
        if self.name == "@" || self.name.is_empty() {
            zone.to_string()
        } else {
            format!("{}.{}", self.name, zone)
        }
    }
}

/// Zone management errors
#[derive(Debug, thiserror::Error)]
pub enum DnsError {
    #[error("Invalid DNS zone: {0}")]
    InvalidName(String),

    #[error("Zone already exists: {0}")]
    AlreadyExists(String),

    #[error("Zone doesn't exist: {0}")]
    ZoneNotFound(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for DnsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists(name) => DnsError::AlreadyExists(name),
            other => DnsError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_parsing() {
        assert_eq!(DnsRecordType::from_str("A").unwrap(), DnsRecordType::A);
        assert_eq!(DnsRecordType::from_str("aaaa").unwrap(), DnsRecordType::AAAA);
        assert_eq!(DnsRecordType::from_str("Mx").unwrap(), DnsRecordType::MX);
        assert!(matches!(
            DnsRecordType::from_str("FOO"),
            Err(ValidationError::UnsupportedRecordType(t)) if t == "FOO"
        ));
    }

    #[test]
    fn test_record_type_follows_value() {
        let record = DnsRecord::a("www", "10.0.0.1".parse().unwrap(), 300);
        assert_eq!(record.record_type, DnsRecordType::A);

        let record = DnsRecord::mx("@", "mail.example.com", 10, 300);
        assert_eq!(record.record_type, DnsRecordType::MX);
        assert_eq!(record.priority, Some(10));
    }

    #[test]
    fn test_fqdn() {
        let record = DnsRecord::a("www", "192.168.1.1".parse().unwrap(), 300);
        assert_eq!(record.fqdn("example.com"), "www.example.com");

        let apex = DnsRecord::a("@", "192.168.1.1".parse().unwrap(), 300);
        assert_eq!(apex.fqdn("example.com"), "example.com");
    }

    #[test]
    fn test_record_document_shape() {
        let record = DnsRecord::aaaa("www", "2001:db8::1".parse().unwrap(), 60);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["record_type"], "AAAA");
        assert_eq!(json["value"]["type"], "AAAA");
        assert_eq!(json["value"]["data"], "2001:db8::1");
        assert!(json.get("priority").is_none());
    }

    #[test]
    fn test_store_conflict_maps_to_already_exists() {
        let err: DnsError = StoreError::AlreadyExists("example.com".to_string()).into();
        assert!(matches!(err, DnsError::AlreadyExists(name) if name == "example.com"));
    }
}
