//! Identity types for ledger records.
//!
//! Checkout and return records have no surrogate id. They are addressed by a
//! composite natural key of instance, employee and timestamp. Ids coming from
//! form input and ids coming from stored records do not always share a JSON
//! type (`"12"` vs `12`), so every id is normalized once, at construction.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Opaque record identifier, normalized across numeric and textual forms.
///
/// A string that is exactly the canonical decimal form of an `i64` (no
/// leading zeros, no `+`, no `-0`) is stored as [`EntityId::Number`]; anything
/// else is kept as text. Equality, ordering and hashing therefore treat `"12"`
/// and `12` as the same entity, while `"007"` keeps its zeros and displays as
/// it came in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityId {
    Number(i64),
    Text(String),
}

impl EntityId {
    /// Normalize a textual id. Surrounding whitespace is dropped.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<i64>() {
            Ok(n) if n.to_string() == trimmed => EntityId::Number(n),
            _ => EntityId::Text(trimmed.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            EntityId::Number(n) => Some(*n),
            EntityId::Text(_) => None,
        }
    }

    /// True for an empty textual id, which no store accepts.
    pub fn is_blank(&self) -> bool {
        matches!(self, EntityId::Text(s) if s.is_empty())
    }

    /// URL-encoded form for use as a single path segment.
    pub fn to_path_segment(&self) -> String {
        urlencoding::encode(&self.to_string()).into_owned()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Number(n) => write!(f, "{}", n),
            EntityId::Text(s) => f.write_str(s),
        }
    }
}

impl FromStr for EntityId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EntityId::parse(s))
    }
}

impl From<i64> for EntityId {
    fn from(n: i64) -> Self {
        EntityId::Number(n)
    }
}

impl From<i32> for EntityId {
    fn from(n: i32) -> Self {
        EntityId::Number(i64::from(n))
    }
}

impl From<u32> for EntityId {
    fn from(n: u32) -> Self {
        EntityId::Number(i64::from(n))
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId::parse(s)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        EntityId::parse(&s)
    }
}

impl From<&EntityId> for serde_json::Value {
    fn from(id: &EntityId) -> Self {
        match id {
            EntityId::Number(n) => serde_json::Value::from(*n),
            EntityId::Text(s) => serde_json::Value::from(s.as_str()),
        }
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            EntityId::Number(n) => serializer.serialize_i64(*n),
            EntityId::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Signed(i64),
            Unsigned(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Signed(n) => Ok(EntityId::Number(n)),
            Raw::Unsigned(n) => Ok(EntityId::Text(n.to_string())),
            Raw::Text(s) => Ok(EntityId::parse(&s)),
        }
    }
}

/// Parse a timestamp from an API payload or a form field.
///
/// Accepts RFC 3339, and the naive shapes `YYYY-MM-DDTHH:MM[:SS]` and
/// `YYYY-MM-DD HH:MM[:SS]`, which are read as UTC.
pub fn parse_timestamp(field: &str, raw: &str) -> Result<Timestamp, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        });
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(ValidationError::InvalidValue {
        field: field.to_string(),
        reason: format!("'{}' is not a recognised timestamp", trimmed),
    })
}

/// Parse a calendar date (`YYYY-MM-DD`).
pub fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| ValidationError::InvalidValue {
        field: field.to_string(),
        reason: format!("'{}' is not a YYYY-MM-DD date", raw.trim()),
    })
}

/// Canonical text form of a key timestamp.
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Composite natural key of a checkout or return record.
///
/// Two keys are equal iff instance, employee and timestamp are all equal after
/// normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementKey {
    pub instance_id: EntityId,
    pub employee_id: EntityId,
    pub timestamp: Timestamp,
}

impl MovementKey {
    pub fn new(
        instance_id: impl Into<EntityId>,
        employee_id: impl Into<EntityId>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            employee_id: employee_id.into(),
            timestamp,
        }
    }

    /// Build a key from raw form values.
    pub fn parse(instance_id: &str, employee_id: &str, timestamp: &str) -> Result<Self, ValidationError> {
        let key = Self {
            instance_id: EntityId::parse(instance_id),
            employee_id: EntityId::parse(employee_id),
            timestamp: parse_timestamp("timestamp", timestamp)?,
        };
        if key.instance_id.is_blank() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "instanceId".to_string(),
            });
        }
        if key.employee_id.is_blank() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "employeeId".to_string(),
            });
        }
        Ok(key)
    }

    /// `{instanceId}/{employeeId}/{timestamp}`, each segment URL-encoded.
    pub fn to_path(&self) -> String {
        format!(
            "{}/{}/{}",
            self.instance_id.to_path_segment(),
            self.employee_id.to_path_segment(),
            urlencoding::encode(&format_timestamp(&self.timestamp))
        )
    }

    /// Whether this key belongs to the given instance/employee pair.
    pub fn same_holder(&self, other: &MovementKey) -> bool {
        self.instance_id == other.instance_id && self.employee_id == other.employee_id
    }
}

impl fmt::Display for MovementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.instance_id,
            self.employee_id,
            format_timestamp(&self.timestamp)
        )
    }
}

/// Build a composite key.
pub fn make_key(
    instance_id: impl Into<EntityId>,
    employee_id: impl Into<EntityId>,
    timestamp: Timestamp,
) -> MovementKey {
    MovementKey::new(instance_id, employee_id, timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_numeric_string_normalizes_to_number() {
        assert_eq!(EntityId::from("12"), EntityId::from(12i64));
        assert_eq!(EntityId::from(" 12 "), EntityId::Number(12));
        assert_eq!(EntityId::from("-3"), EntityId::Number(-3));
    }

    #[test]
    fn test_non_numeric_string_stays_text() {
        assert_eq!(EntityId::from("A-12"), EntityId::Text("A-12".to_string()));
        assert_eq!(EntityId::from("12a"), EntityId::Text("12a".to_string()));
        assert_ne!(EntityId::from("012x"), EntityId::from(12i64));
        // Too large for i64 stays textual rather than wrapping.
        assert!(matches!(
            EntityId::from("99999999999999999999"),
            EntityId::Text(_)
        ));
    }

    #[test]
    fn test_non_canonical_digits_keep_their_spelling() {
        for raw in ["007", "+7", "-0", "00"] {
            let id = EntityId::parse(raw);
            assert_eq!(id, EntityId::Text(raw.to_string()));
            assert_eq!(id.to_string(), raw);
            assert_eq!(EntityId::parse(&id.to_string()), id);
        }
        assert_ne!(EntityId::from("007"), EntityId::from(7i64));
        assert_eq!(EntityId::from("0"), EntityId::Number(0));
    }

    #[test]
    fn test_entity_id_json_forms() {
        let from_number: EntityId = serde_json::from_str("42").unwrap();
        let from_string: EntityId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(from_number, from_string);
        assert_eq!(serde_json::to_string(&from_string).unwrap(), "42");

        let text: EntityId = serde_json::from_str("\"BON-7\"").unwrap();
        assert_eq!(serde_json::to_string(&text).unwrap(), "\"BON-7\"");
    }

    #[test]
    fn test_keys_from_different_sources_compare_equal() {
        let ts = Utc.with_ymd_and_hms(2025, 5, 1, 10, 0, 0).unwrap();
        let from_form = MovementKey::parse("42", "7", "2025-05-01T10:00").unwrap();
        let from_record = make_key(42i64, 7i64, ts);
        assert_eq!(from_form, from_record);
    }

    #[test]
    fn test_keys_differ_on_any_field() {
        let ts = Utc.with_ymd_and_hms(2025, 5, 1, 10, 0, 0).unwrap();
        let key = make_key(42i64, 7i64, ts);
        assert_ne!(key, make_key(43i64, 7i64, ts));
        assert_ne!(key, make_key(42i64, 8i64, ts));
        assert_ne!(key, make_key(42i64, 7i64, ts + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_parse_timestamp_shapes() {
        let expected = Utc.with_ymd_and_hms(2025, 5, 1, 10, 0, 0).unwrap();
        for raw in [
            "2025-05-01T10:00",
            "2025-05-01T10:00:00",
            "2025-05-01 10:00",
            "2025-05-01T10:00:00Z",
            "2025-05-01T12:00:00+02:00",
        ] {
            assert_eq!(parse_timestamp("ts", raw).unwrap(), expected, "{}", raw);
        }
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(matches!(
            parse_timestamp("checkedOutAt", ""),
            Err(ValidationError::RequiredFieldMissing { .. })
        ));
        let err = parse_timestamp("checkedOutAt", "yesterday").unwrap_err();
        assert_eq!(err.field(), "checkedOutAt");
    }

    #[test]
    fn test_key_path_is_url_encoded() {
        let ts = Utc.with_ymd_and_hms(2025, 5, 1, 10, 0, 0).unwrap();
        let key = make_key("SN 1", 7i64, ts);
        assert_eq!(key.to_path(), "SN%201/7/2025-05-01T10%3A00%3A00Z");
    }

    #[test]
    fn test_key_parse_requires_ids() {
        assert!(MovementKey::parse("", "7", "2025-05-01T10:00").is_err());
        assert!(MovementKey::parse("42", " ", "2025-05-01T10:00").is_err());
    }
}
