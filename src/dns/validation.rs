//! Record Validator
//!
//! Pure checks for zone names and operator-submitted record payloads.
//! Nothing here touches storage; a payload that passes comes back as a
//! typed [`DnsRecord`] ready to be appended to a zone.

use serde_json::{Map, Value};

use super::{DnsRecord, DnsRecordType, DnsRecordValue, DEFAULT_TTL};

/// Maximum length of a single label in octets (RFC 1035)
pub const MAX_LABEL_LEN: usize = 63;

/// Maximum length of a name in wire format, including the root label
pub const MAX_NAME_WIRE_LEN: usize = 255;

/// Largest TTL accepted (RFC 2181 section 8)
pub const MAX_TTL: u32 = 2_147_483_647;

/// Largest TXT payload accepted, in bytes
pub const MAX_TXT_LEN: usize = 4096;

/// Record validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid DNS zone: {0}")]
    InvalidZoneName(String),

    #[error("Invalid record type: {0}")]
    UnsupportedRecordType(String),

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
}

impl ValidationError {
    /// Field-level error for `field`
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Check that `name` is a syntactically valid DNS zone.
///
/// A single trailing dot is accepted as the explicit root. The root on its
/// own is not a zone operators can create.
pub fn validate_zone_name(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() {
        return false;
    }

    let mut wire_len = 1;
    for label in name.split('.') {
        if !is_valid_label(label, false) {
            return false;
        }
        wire_len += label.len() + 1;
    }

    wire_len <= MAX_NAME_WIRE_LEN
}

/// Check a record owner name relative to its zone.
///
/// `@` is the apex. Service labels (`_sip._tcp`) and a single leading
/// wildcard label (`*.cdn`) are accepted.
pub fn validate_record_name(name: &str) -> bool {
    if name == "@" {
        return true;
    }
    if name.is_empty() {
        return false;
    }

    let mut wire_len = 1;
    for (i, label) in name.split('.').enumerate() {
        let ok = (i == 0 && label == "*") || is_valid_label(label, true);
        if !ok {
            return false;
        }
        wire_len += label.len() + 1;
    }

    wire_len <= MAX_NAME_WIRE_LEN
}

/// Normalize a zone name (lowercase, remove trailing dot)
pub fn normalize_zone_name(name: &str) -> String {
    name.strip_suffix('.').unwrap_or(name).to_ascii_lowercase()
}

/// Validate a record payload, dispatching on its `type` field.
pub fn validate_record(fields: &Value) -> Result<DnsRecord, ValidationError> {
    let record_type = match fields.get("type") {
        Some(Value::String(t)) => t.as_str(),
        Some(_) => return Err(ValidationError::invalid_field("type", "must be a string")),
        None => return Err(ValidationError::invalid_field("type", "missing")),
    };
    validate_record_fields(record_type, fields)
}

/// Validate the fields of a record of an explicit type.
pub fn validate_record_fields(record_type: &str, fields: &Value) -> Result<DnsRecord, ValidationError> {
    let record_type: DnsRecordType = record_type.parse()?;
    let fields = fields
        .as_object()
        .ok_or_else(|| ValidationError::invalid_field("record", "must be a JSON object"))?;

    let name = parse_name(fields)?;
    let ttl = parse_ttl(fields)?;
    let raw = required_str(fields, "value")?;

    let mut priority = None;
    let value = match record_type {
        DnsRecordType::A => DnsRecordValue::A(raw.parse().map_err(|_| {
            ValidationError::invalid_field("value", format!("'{}' is not a valid IPv4 address", raw))
        })?),
        DnsRecordType::AAAA => DnsRecordValue::AAAA(raw.parse().map_err(|_| {
            ValidationError::invalid_field("value", format!("'{}' is not a valid IPv6 address", raw))
        })?),
        DnsRecordType::CNAME => DnsRecordValue::CNAME(parse_hostname(raw)?),
        DnsRecordType::NS => DnsRecordValue::NS(parse_hostname(raw)?),
        DnsRecordType::MX => {
            priority = Some(parse_priority(fields)?);
            DnsRecordValue::MX {
                exchange: parse_hostname(raw)?,
            }
        }
        DnsRecordType::TXT => DnsRecordValue::TXT(parse_txt(raw)?),
    };

    Ok(DnsRecord {
        name,
        record_type,
        ttl,
        value,
        priority,
    })
}

fn is_valid_label(label: &str, allow_underscore: bool) -> bool {
    if label.is_empty() || label.len() > MAX_LABEL_LEN {
        return false;
    }
    if label.starts_with('-') || label.ends_with('-') {
        return false;
    }
    label
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || (allow_underscore && b == b'_'))
}

fn parse_name(fields: &Map<String, Value>) -> Result<String, ValidationError> {
    match fields.get("name") {
        None | Some(Value::Null) => Ok("@".to_string()),
        Some(Value::String(name)) if validate_record_name(name) => Ok(name.to_ascii_lowercase()),
        Some(Value::String(name)) => Err(ValidationError::invalid_field(
            "name",
            format!("'{}' is not a valid record name", name),
        )),
        Some(_) => Err(ValidationError::invalid_field("name", "must be a string")),
    }
}

fn parse_ttl(fields: &Map<String, Value>) -> Result<u32, ValidationError> {
    match fields.get("ttl") {
        None | Some(Value::Null) => Ok(DEFAULT_TTL),
        Some(v) => v
            .as_u64()
            .filter(|ttl| *ttl <= MAX_TTL as u64)
            .map(|ttl| ttl as u32)
            .ok_or_else(|| {
                ValidationError::invalid_field("ttl", format!("must be an integer between 0 and {}", MAX_TTL))
            }),
    }
}

fn parse_priority(fields: &Map<String, Value>) -> Result<u16, ValidationError> {
    let priority = fields
        .get("priority")
        .ok_or_else(|| ValidationError::invalid_field("priority", "required for MX records"))?;
    priority
        .as_u64()
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| ValidationError::invalid_field("priority", "must be an integer between 0 and 65535"))
}

fn required_str<'a>(fields: &'a Map<String, Value>, field: &str) -> Result<&'a str, ValidationError> {
    match fields.get(field) {
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(_) => Err(ValidationError::invalid_field(field, "must be a string")),
        None => Err(ValidationError::invalid_field(field, "missing")),
    }
}

fn parse_hostname(raw: &str) -> Result<String, ValidationError> {
    if validate_zone_name(raw) {
        Ok(normalize_zone_name(raw))
    } else {
        Err(ValidationError::invalid_field(
            "value",
            format!("'{}' is not a valid hostname", raw),
        ))
    }
}

fn parse_txt(raw: &str) -> Result<String, ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::invalid_field("value", "TXT value is empty"));
    }
    if raw.len() > MAX_TXT_LEN {
        return Err(ValidationError::invalid_field(
            "value",
            format!("TXT value exceeds {} bytes", MAX_TXT_LEN),
        ));
    }
    if raw.chars().any(char::is_control) {
        return Err(ValidationError::invalid_field("value", "TXT value contains control characters"));
    }
    Ok(raw.to_string())
}
