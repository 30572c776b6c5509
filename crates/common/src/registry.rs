//! On-disk format of the key registry file.
//!
//! The registry is a single flat JSON object mapping names to values. A name is
//! either a master key id, whose value is the KMS-wrapped data key, or an
//! auxiliary item stored by callers (any JSON value).
//!
//! Wrapped keys use the `{"type":"Buffer","data":[...]}` byte-array shape so
//! that registry files written by earlier deployments stay readable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The whole registry document. Ordered so that serialisation is stable.
pub type RegistryDocument = BTreeMap<String, RegistryEntry>;

/// A single registry value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegistryEntry {
    /// Ciphertext blob of a data key, wrapped under the master key named by
    /// the entry's key.
    WrappedKey(ByteBlob),
    /// Opaque auxiliary value.
    Item(serde_json::Value),
}

impl RegistryEntry {
    /// Build a wrapped-key entry from raw ciphertext bytes.
    pub fn wrapped_key(ciphertext: impl Into<Vec<u8>>) -> Self {
        RegistryEntry::WrappedKey(ByteBlob::new(ciphertext))
    }

    /// Returns the ciphertext bytes if this entry is a wrapped key.
    pub fn as_wrapped_key(&self) -> Option<&[u8]> {
        match self {
            RegistryEntry::WrappedKey(blob) => Some(blob.as_bytes()),
            RegistryEntry::Item(_) => None,
        }
    }

    /// Returns the string value if this entry is an auxiliary string item.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RegistryEntry::Item(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for RegistryEntry {
    fn from(value: serde_json::Value) -> Self {
        RegistryEntry::Item(value)
    }
}

/// Byte array serialised as `{"type":"Buffer","data":[..]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteBlob {
    #[serde(rename = "type")]
    kind: BlobKind,
    data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum BlobKind {
    Buffer,
}

impl ByteBlob {
    /// Wrap raw bytes.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: BlobKind::Buffer,
            data: data.into(),
        }
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wrapped_key_uses_buffer_shape() {
        let entry = RegistryEntry::wrapped_key(vec![0xBB, 0x01]);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value, json!({"type": "Buffer", "data": [187, 1]}));
    }

    #[test]
    fn parses_mixed_document() {
        let raw = r#"{
            "id-A": {"type": "Buffer", "data": [1, 2, 3]},
            "webBoxIP": "10.10.10.12",
            "limits": {"max": 4}
        }"#;
        let doc: RegistryDocument = serde_json::from_str(raw).unwrap();
        assert_eq!(doc["id-A"].as_wrapped_key(), Some(&[1u8, 2, 3][..]));
        assert_eq!(doc["webBoxIP"].as_str(), Some("10.10.10.12"));
        assert!(doc["limits"].as_wrapped_key().is_none());
    }

    #[test]
    fn non_buffer_object_is_an_item() {
        let entry: RegistryEntry =
            serde_json::from_value(json!({"type": "Other", "data": [1]})).unwrap();
        assert!(matches!(entry, RegistryEntry::Item(_)));

        let entry: RegistryEntry =
            serde_json::from_value(json!({"type": "Buffer", "data": [300]})).unwrap();
        assert!(matches!(entry, RegistryEntry::Item(_)));
    }
}
