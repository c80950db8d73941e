//! Record model

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Prefix that marks a locally generated identifier
pub const TEMP_ID_PREFIX: &str = "temp_";

/// Keys owned by the sync engine rather than the application payload
const RESERVED_KEYS: [&str; 4] = ["id", "archived", "isOfflineCreated", "lastModified"];

/// Identifier of a record.
///
/// Records created while offline carry a `Temporary` id until the remote
/// authority accepts them and hands back a `Persistent` one. On the wire a
/// temporary id is a string and a persistent id is a number; numeric strings
/// are accepted as persistent ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordId {
    /// Locally generated, prefixed with [`TEMP_ID_PREFIX`]
    Temporary(String),
    /// Assigned by the remote authority
    Persistent(u64),
}

impl RecordId {
    /// Generate a fresh temporary id
    #[must_use]
    pub fn temporary() -> Self {
        Self::Temporary(format!("{TEMP_ID_PREFIX}{}", Uuid::now_v7().simple()))
    }

    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// The authoritative id, if this is one
    #[must_use]
    pub const fn as_persistent(&self) -> Option<u64> {
        match self {
            Self::Persistent(id) => Some(*id),
            Self::Temporary(_) => None,
        }
    }

    /// Key used for this id in the local store
    #[must_use]
    pub fn storage_key(&self) -> String {
        self.to_string()
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self::Persistent(id)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temporary(id) => f.write_str(id),
            Self::Persistent(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() > TEMP_ID_PREFIX.len() && s.starts_with(TEMP_ID_PREFIX) {
            return Ok(Self::Temporary(s.to_string()));
        }
        s.parse::<u64>()
            .map(Self::Persistent)
            .map_err(|_| Error::InvalidInput(format!("invalid record id: {s:?}")))
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Temporary(id) => serializer.serialize_str(id),
            Self::Persistent(id) => serializer.serialize_u64(*id),
        }
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecordIdVisitor;

        impl Visitor<'_> for RecordIdVisitor {
            type Value = RecordId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative integer or a temporary id string")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<RecordId, E> {
                Ok(RecordId::Persistent(value))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<RecordId, E> {
                u64::try_from(value)
                    .map(RecordId::Persistent)
                    .map_err(|_| E::custom(format!("negative record id {value}")))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<RecordId, E> {
                value.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(RecordIdVisitor)
    }
}

/// Which side of the archived index to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFilter {
    /// Records whose `archived` flag is false
    Active,
    /// Records whose `archived` flag is true
    Archived,
}

impl ArchiveFilter {
    pub(crate) const fn archived_flag(self) -> i64 {
        match self {
            Self::Active => 0,
            Self::Archived => 1,
        }
    }
}

/// A property entry managed by the sync engine.
///
/// Apart from the reserved fields the payload is opaque: whatever the
/// application stores is kept in `fields` and round-trips untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Temporary or authoritative identifier
    pub id: RecordId,
    /// Archived records are hidden from the default listing
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub archived: bool,
    /// True until the remote authority accepts a locally created record
    #[serde(
        default,
        deserialize_with = "deserialize_flag",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub is_offline_created: bool,
    /// Unix ms of the last local write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
    /// Application payload
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Build a record from application data, lifting reserved keys out of the payload.
    ///
    /// A missing or unparseable `id` becomes a fresh temporary id.
    #[must_use]
    pub fn from_fields(mut fields: Map<String, Value>) -> Self {
        let id = fields
            .get("id")
            .and_then(|value| serde_json::from_value::<RecordId>(value.clone()).ok())
            .unwrap_or_else(RecordId::temporary);
        let archived = fields.get("archived").is_some_and(is_truthy);
        let is_offline_created = fields.get("isOfflineCreated").is_some_and(is_truthy);
        for key in RESERVED_KEYS {
            fields.remove(key);
        }

        Self {
            id,
            archived,
            is_offline_created,
            last_modified: None,
            fields,
        }
    }

    /// Create a not-yet-synced record with a temporary id
    #[must_use]
    pub fn new_local(fields: Map<String, Value>) -> Self {
        let mut record = Self::from_fields(fields);
        record.id = RecordId::temporary();
        record.is_offline_created = true;
        record
    }

    /// Body sent to the remote authority: the payload and `archived`, without
    /// the id or any local-only field.
    #[must_use]
    pub fn remote_payload(&self) -> Map<String, Value> {
        let mut payload = self.fields.clone();
        payload.insert("archived".to_string(), Value::Bool(self.archived));
        payload
    }

    /// Compare everything except the local write stamp
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.id == other.id
            && self.archived == other.archived
            && self.is_offline_created == other.is_offline_created
            && self.fields == other.fields
    }

    /// Read a payload field
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Set a payload field, returning the record for chaining
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
        Value::Null => false,
    }
}

fn deserialize_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(is_truthy(&value))
}
