use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::{self, StoredValue};

/// Category of protocol key material (one namespace per record kind)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalDataCategory {
    PreKey,
    Session,
    SenderKey,
    AppStateSyncKey,
    AppStateSyncVersion,
    SenderKeyMemory,
}

impl SignalDataCategory {
    pub const ALL: [SignalDataCategory; 6] = [
        SignalDataCategory::PreKey,
        SignalDataCategory::Session,
        SignalDataCategory::SenderKey,
        SignalDataCategory::AppStateSyncKey,
        SignalDataCategory::AppStateSyncVersion,
        SignalDataCategory::SenderKeyMemory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalDataCategory::PreKey => "pre-key",
            SignalDataCategory::Session => "session",
            SignalDataCategory::SenderKey => "sender-key",
            SignalDataCategory::AppStateSyncKey => "app-state-sync-key",
            SignalDataCategory::AppStateSyncVersion => "app-state-sync-version",
            SignalDataCategory::SenderKeyMemory => "sender-key-memory",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl fmt::Display for SignalDataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed address of one categorized record within a session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalKey {
    pub category: SignalDataCategory,
    pub id: String,
}

impl SignalKey {
    pub fn new(category: SignalDataCategory, id: impl Into<String>) -> Self {
        Self {
            category,
            id: id.into(),
        }
    }

    /// Flat record id as persisted: `<category>-<id>`. Ids may themselves
    /// contain `-`, so this mapping is one-way.
    pub fn record_id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.category.as_str(), self.id)
    }
}

/// A batch of staged writes and deletes, grouped by category.
///
/// `None` entries delete the record; so do falsy values, see
/// [`StoredValue::is_falsy`].
#[derive(Debug, Clone, Default)]
pub struct SignalDataPatch {
    entries: HashMap<SignalDataCategory, HashMap<String, Option<StoredValue>>>,
}

impl SignalDataPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        category: SignalDataCategory,
        id: impl Into<String>,
        value: Option<StoredValue>,
    ) {
        self.entries
            .entry(category)
            .or_default()
            .insert(id.into(), value);
    }

    /// Stage a write for `(category, id)`.
    pub fn set(
        mut self,
        category: SignalDataCategory,
        id: impl Into<String>,
        value: impl Into<StoredValue>,
    ) -> Self {
        self.insert(category, id, Some(value.into()));
        self
    }

    /// Stage a delete for `(category, id)`.
    pub fn unset(mut self, category: SignalDataCategory, id: impl Into<String>) -> Self {
        self.insert(category, id, None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|ids| ids.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(|ids| ids.len()).sum()
    }

    pub fn iter(
        &self,
    ) -> impl Iterator<Item = (SignalDataCategory, &str, Option<&StoredValue>)> + '_ {
        self.entries.iter().flat_map(|(category, ids)| {
            ids.iter()
                .map(move |(id, value)| (*category, id.as_str(), value.as_ref()))
        })
    }
}

/// Decoded `app-state-sync-key` record payload.
///
/// Stored copies may carry byte fields in either tagged or array form and
/// 64-bit timestamps as numbers, decimal strings or `{low, high}` pairs.
/// Parsing and re-emitting through this type yields one canonical shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStateSyncKeyData {
    #[serde(
        default,
        with = "codec::buffer_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub key_data: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<AppStateSyncKeyFingerprint>,
    #[serde(
        default,
        deserialize_with = "de_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStateSyncKeyFingerprint {
    #[serde(default)]
    pub raw_id: u32,
    #[serde(default)]
    pub current_index: u32,
    #[serde(default)]
    pub device_indexes: Vec<u32>,
}

impl AppStateSyncKeyData {
    /// Parse a raw stored record into the typed message shape.
    pub fn from_stored(value: &StoredValue) -> serde_json::Result<Self> {
        serde_json::from_value(value.to_json())
    }

    /// Re-emit in canonical stored form.
    pub fn to_stored(&self) -> serde_json::Result<StoredValue> {
        StoredValue::from_serialize(self)
    }
}

fn de_timestamp<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error as _;

    match Option::<StoredValue>::deserialize(deserializer)? {
        None | Some(StoredValue::Null) => Ok(None),
        Some(StoredValue::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| D::Error::custom("timestamp out of range")),
        Some(StoredValue::String(s)) => s.parse::<u64>().map(Some).map_err(D::Error::custom),
        Some(StoredValue::Object(map)) => {
            // {low, high, unsigned} pair from a stored 64-bit integer
            let low = match map.get("low") {
                Some(StoredValue::Number(n)) => n.as_i64(),
                _ => None,
            };
            let high = match map.get("high") {
                Some(StoredValue::Number(n)) => n.as_i64(),
                _ => None,
            };
            match (low, high) {
                (Some(low), Some(high)) => {
                    Ok(Some((((high & 0xffff_ffff) << 32) | (low as u32 as i64)) as u64))
                }
                _ => Err(D::Error::custom("unsupported timestamp encoding")),
            }
        }
        Some(other) => Err(D::Error::custom(format!(
            "unsupported timestamp value: {other:?}"
        ))),
    }
}
