//! Binary-safe value codec.
//!
//! Stored records are JSON documents in which raw byte fields are carried as
//! tagged objects of the form `{"type": "Buffer", "data": "<base64>"}`. The
//! codec round-trips those documents through [`StoredValue`], a JSON-shaped
//! tree whose `Bytes` variant survives encode/decode without base64 leaking
//! into application types.

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Number;

/// A stored record value: JSON plus a first-class binary variant.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum StoredValue {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    /// Raw bytes. Decoding revives every map shaped like the buffer tag
    /// into this variant, so a tag-shaped `Object` comes back as `Bytes`.
    Bytes(Vec<u8>),
    Array(Vec<StoredValue>),
    Object(BTreeMap<String, StoredValue>),
}

impl StoredValue {
    /// Parse a plain JSON tree, reviving tagged byte objects into `Bytes`.
    pub fn from_json(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    /// Convert any serializable type into a stored value.
    pub fn from_serialize<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        Self::from_json(serde_json::to_value(value)?)
    }

    /// Lower into a plain JSON tree, tagging `Bytes` for transport.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            StoredValue::Null => serde_json::Value::Null,
            StoredValue::Bool(v) => serde_json::Value::Bool(*v),
            StoredValue::Number(n) => serde_json::Value::Number(n.clone()),
            StoredValue::String(v) => serde_json::Value::String(v.clone()),
            StoredValue::Bytes(bytes) => serde_json::json!({
                "type": "Buffer",
                "data": STANDARD.encode(bytes),
            }),
            StoredValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            StoredValue::Object(fields) => serde_json::Value::Object(
                fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Loose-truthiness check used by the key patch API: null, false, zero
    /// and the empty string all mean "no value" and delete the record.
    pub fn is_falsy(&self) -> bool {
        match self {
            StoredValue::Null => true,
            StoredValue::Bool(v) => !v,
            StoredValue::Number(n) => n.as_f64().map(|f| f == 0.0).unwrap_or(false),
            StoredValue::String(v) => v.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StoredValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            StoredValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            StoredValue::Null => "null",
            StoredValue::Bool(_) => "bool",
            StoredValue::Number(_) => "number",
            StoredValue::String(_) => "string",
            StoredValue::Bytes(_) => "bytes",
            StoredValue::Array(_) => "array",
            StoredValue::Object(_) => "object",
        }
    }
}

/// Encode a stored value as JSON text for persistence.
pub fn encode(value: &StoredValue) -> serde_json::Result<String> {
    serde_json::to_string(value)
}

/// Decode persisted JSON text back into a stored value.
pub fn decode(text: &str) -> serde_json::Result<StoredValue> {
    serde_json::from_str(text)
}

impl From<bool> for StoredValue {
    fn from(v: bool) -> Self {
        StoredValue::Bool(v)
    }
}

impl From<i64> for StoredValue {
    fn from(v: i64) -> Self {
        StoredValue::Number(Number::from(v))
    }
}

impl From<u64> for StoredValue {
    fn from(v: u64) -> Self {
        StoredValue::Number(Number::from(v))
    }
}

impl From<u32> for StoredValue {
    fn from(v: u32) -> Self {
        StoredValue::Number(Number::from(v))
    }
}

impl From<&str> for StoredValue {
    fn from(v: &str) -> Self {
        StoredValue::String(v.to_owned())
    }
}

impl From<String> for StoredValue {
    fn from(v: String) -> Self {
        StoredValue::String(v)
    }
}

impl From<Vec<u8>> for StoredValue {
    fn from(v: Vec<u8>) -> Self {
        StoredValue::Bytes(v)
    }
}

impl From<&[u8]> for StoredValue {
    fn from(v: &[u8]) -> Self {
        StoredValue::Bytes(v.to_vec())
    }
}

impl Serialize for StoredValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            StoredValue::Null => serializer.serialize_unit(),
            StoredValue::Bool(v) => serializer.serialize_bool(*v),
            StoredValue::Number(n) => n.serialize(serializer),
            StoredValue::String(v) => serializer.serialize_str(v),
            StoredValue::Bytes(bytes) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", "Buffer")?;
                map.serialize_entry("data", &STANDARD.encode(bytes))?;
                map.end()
            }
            StoredValue::Array(items) => serializer.collect_seq(items),
            StoredValue::Object(fields) => serializer.collect_map(fields),
        }
    }
}

/// Revive a decoded map: tagged byte objects become `Bytes`, everything else
/// stays an `Object`. Accepts both the `type: "Buffer"` tag and the legacy
/// `buffer: true` marker, and both base64 and array-of-numbers payloads.
fn revive_object(map: BTreeMap<String, StoredValue>) -> Result<StoredValue, String> {
    let tagged = matches!(map.get("type"), Some(StoredValue::String(t)) if t == "Buffer")
        || matches!(map.get("buffer"), Some(StoredValue::Bool(true)));
    if !tagged {
        return Ok(StoredValue::Object(map));
    }
    let payload = map.get("data").or_else(|| map.get("value"));
    match payload {
        None | Some(StoredValue::Null) => Ok(StoredValue::Bytes(Vec::new())),
        Some(StoredValue::String(text)) => STANDARD
            .decode(text)
            .map(StoredValue::Bytes)
            .map_err(|e| format!("invalid base64 in buffer payload: {e}")),
        Some(StoredValue::Array(items)) => {
            let mut bytes = Vec::with_capacity(items.len());
            for item in items {
                let byte = match item {
                    StoredValue::Number(n) => n.as_u64().filter(|b| *b <= u8::MAX as u64),
                    _ => None,
                };
                match byte {
                    Some(b) => bytes.push(b as u8),
                    None => return Err("buffer payload array must contain bytes".to_owned()),
                }
            }
            Ok(StoredValue::Bytes(bytes))
        }
        Some(other) => Err(format!("unsupported buffer payload of kind {}", other.kind())),
    }
}

impl<'de> Deserialize<'de> for StoredValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = StoredValue;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON value")
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(StoredValue::Null)
            }

            fn visit_none<E>(self) -> Result<Self::Value, E> {
                Ok(StoredValue::Null)
            }

            fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
            where
                D: Deserializer<'de>,
            {
                StoredValue::deserialize(deserializer)
            }

            fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E> {
                Ok(StoredValue::Bool(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
                Ok(StoredValue::Number(Number::from(v)))
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
                Ok(StoredValue::Number(Number::from(v)))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Number::from_f64(v)
                    .map(StoredValue::Number)
                    .ok_or_else(|| E::custom("non-finite number"))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
                Ok(StoredValue::String(v.to_owned()))
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
                Ok(StoredValue::String(v))
            }

            fn visit_seq<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut items = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(item) = access.next_element()? {
                    items.push(item);
                }
                Ok(StoredValue::Array(items))
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut fields = BTreeMap::new();
                while let Some((key, value)) = access.next_entry::<String, StoredValue>()? {
                    fields.insert(key, value);
                }
                revive_object(fields).map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

/// Serde adapter for `Vec<u8>` fields carried as tagged byte objects.
pub mod buffer {
    use super::*;

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", "Buffer")?;
        map.serialize_entry("data", &STANDARD.encode(bytes))?;
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match StoredValue::deserialize(deserializer)? {
            StoredValue::Bytes(bytes) => Ok(bytes),
            other => Err(serde::de::Error::custom(format!(
                "expected buffer, got {}",
                other.kind()
            ))),
        }
    }
}

/// Serde adapter for optional byte fields.
pub mod buffer_opt {
    use super::*;

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(b) => buffer::serialize(b, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<StoredValue>::deserialize(deserializer)? {
            None | Some(StoredValue::Null) => Ok(None),
            Some(StoredValue::Bytes(bytes)) => Ok(Some(bytes)),
            Some(other) => Err(serde::de::Error::custom(format!(
                "expected buffer, got {}",
                other.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(entries: Vec<(&str, StoredValue)>) -> StoredValue {
        StoredValue::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect(),
        )
    }

    #[test]
    fn bytes_encode_as_tagged_object() {
        let text = encode(&StoredValue::from(vec![1u8, 2, 255])).unwrap();
        assert_eq!(text, r#"{"type":"Buffer","data":"AQL/"}"#);
    }

    #[test]
    fn tagged_object_decodes_to_bytes() {
        let value = decode(r#"{"type":"Buffer","data":"AQL/"}"#).unwrap();
        assert_eq!(value, StoredValue::Bytes(vec![1, 2, 255]));
    }

    #[test]
    fn legacy_array_payload_decodes_to_bytes() {
        let value = decode(r#"{"type":"Buffer","data":[0,127,255]}"#).unwrap();
        assert_eq!(value, StoredValue::Bytes(vec![0, 127, 255]));
    }

    #[test]
    fn buffer_marker_with_value_field_decodes_to_bytes() {
        let value = decode(r#"{"buffer":true,"value":"AQID"}"#).unwrap();
        assert_eq!(value, StoredValue::Bytes(vec![1, 2, 3]));
    }

    #[test]
    fn tagged_object_without_payload_is_empty_bytes() {
        let value = decode(r#"{"type":"Buffer"}"#).unwrap();
        assert_eq!(value, StoredValue::Bytes(Vec::new()));
    }

    #[test]
    fn invalid_base64_payload_is_an_error() {
        assert!(decode(r#"{"type":"Buffer","data":"!!!"}"#).is_err());
    }

    #[test]
    fn untagged_object_stays_an_object() {
        let value = decode(r#"{"type":"other","data":"AQID"}"#).unwrap();
        assert_eq!(
            value,
            object(vec![
                ("type", StoredValue::from("other")),
                ("data", StoredValue::from("AQID")),
            ])
        );
    }

    #[test]
    fn tag_shaped_object_comes_back_as_bytes() {
        let tag_shaped = object(vec![
            ("type", StoredValue::from("Buffer")),
            ("data", StoredValue::from("AQL/")),
        ]);
        let text = encode(&tag_shaped).unwrap();
        assert_eq!(decode(&text).unwrap(), StoredValue::Bytes(vec![1, 2, 255]));
    }

    #[test]
    fn nested_document_round_trips() {
        let original = object(vec![
            ("registered", StoredValue::Bool(false)),
            ("counter", StoredValue::from(7u64)),
            ("name", StoredValue::from("primary")),
            ("nothing", StoredValue::Null),
            (
                "keys",
                StoredValue::Array(vec![
                    StoredValue::from(vec![9u8, 8, 7]),
                    object(vec![("public", StoredValue::from(vec![4u8, 5]))]),
                ]),
            ),
        ]);
        let text = encode(&original).unwrap();
        assert_eq!(decode(&text).unwrap(), original);
    }

    #[test]
    fn json_tree_conversion_round_trips() {
        let original = object(vec![("blob", StoredValue::from(vec![42u8; 3]))]);
        let revived = StoredValue::from_json(original.to_json()).unwrap();
        assert_eq!(revived, original);
    }

    #[test]
    fn falsy_values() {
        assert!(StoredValue::Null.is_falsy());
        assert!(StoredValue::Bool(false).is_falsy());
        assert!(StoredValue::from(0u64).is_falsy());
        assert!(StoredValue::from("").is_falsy());
        assert!(!StoredValue::Bool(true).is_falsy());
        assert!(!StoredValue::from("x").is_falsy());
        assert!(!StoredValue::Bytes(Vec::new()).is_falsy());
        assert!(!StoredValue::Object(BTreeMap::new()).is_falsy());
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "crate::codec::buffer")]
        blob: Vec<u8>,
        #[serde(default, with = "crate::codec::buffer_opt")]
        extra: Option<Vec<u8>>,
    }

    #[test]
    fn buffer_field_adapters_round_trip() {
        let wrapper = Wrapper {
            blob: vec![1, 2, 3],
            extra: None,
        };
        let text = serde_json::to_string(&wrapper).unwrap();
        assert!(text.contains(r#""type":"Buffer""#));
        assert_eq!(serde_json::from_str::<Wrapper>(&text).unwrap(), wrapper);

        let with_extra = Wrapper {
            blob: vec![1],
            extra: Some(vec![9, 9]),
        };
        let text = serde_json::to_string(&with_extra).unwrap();
        assert_eq!(serde_json::from_str::<Wrapper>(&text).unwrap(), with_extra);
    }
}
