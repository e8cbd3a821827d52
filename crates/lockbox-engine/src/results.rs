//! Immutable result snapshots handed to the client by handle.

use bytes::Bytes;

use crate::error::{EngineError, Result};
use crate::filter::Tags;
use crate::keys::{LocalKey, StoredKey};
use crate::sqlite::Entry;

/// Tag carrying a stored key's algorithm.
pub const ALG_TAG: &str = "~alg";
/// Tag carrying a stored key's thumbprint.
pub const THUMBPRINT_TAG: &str = "~thumbprint";

fn out_of_range(index: usize, len: usize) -> EngineError {
    EngineError::Input(format!(
        "Index out of range: {} (list has {} entries)",
        index, len
    ))
}

/// A snapshot of records.
#[derive(Debug, Clone, Default)]
pub struct EntrySet(Vec<Entry>);

impl EntrySet {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self(entries)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Entry> {
        self.0.get(index).ok_or_else(|| out_of_range(index, self.0.len()))
    }
}

/// A stored key with its record attributes.
#[derive(Debug, Clone)]
pub struct KeyEntry {
    pub name: String,
    pub metadata: Option<String>,
    /// User tags; the algorithm and thumbprint tags are stripped.
    pub tags: Tags,
    pub key: LocalKey,
}

impl KeyEntry {
    /// Decode a key record.
    pub fn from_entry(entry: Entry) -> Result<Self> {
        let stored = StoredKey::decode(&entry.value)?;
        let mut tags = entry.tags;
        tags.remove(ALG_TAG);
        tags.remove(THUMBPRINT_TAG);
        Ok(Self {
            name: entry.name,
            metadata: stored.metadata,
            tags,
            key: stored.key,
        })
    }

    pub fn algorithm(&self) -> &str {
        self.key.algorithm()
    }
}

/// A snapshot of stored keys.
#[derive(Debug, Clone, Default)]
pub struct KeyEntrySet(Vec<KeyEntry>);

impl KeyEntrySet {
    /// Decode a list of key records.
    pub fn from_entries(entries: Vec<Entry>) -> Result<Self> {
        entries
            .into_iter()
            .map(KeyEntry::from_entry)
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&KeyEntry> {
        self.0.get(index).ok_or_else(|| out_of_range(index, self.0.len()))
    }
}

/// Record value bytes for a key.
pub(crate) fn key_value(key: &LocalKey, metadata: Option<&str>) -> Result<Bytes> {
    StoredKey {
        key: key.clone(),
        metadata: metadata.map(str::to_owned),
    }
    .encode()
    .map(Bytes::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range() {
        let set = EntrySet::new(vec![Entry {
            category: "c".into(),
            name: "n".into(),
            value: Bytes::from_static(b"v"),
            tags: Tags::default(),
        }]);
        assert_eq!(set.get(0).unwrap().name, "n");
        assert!(matches!(set.get(1), Err(EngineError::Input(_))));
    }

    #[test]
    fn test_key_entry_strips_system_tags() {
        let key = LocalKey::generate("ed25519", false).unwrap();
        let mut tags = Tags::parse(Some(r#"{"user":"x"}"#)).unwrap();
        tags.insert(ALG_TAG, "ed25519");
        tags.insert(THUMBPRINT_TAG, key.thumbprint().unwrap());

        let entry = Entry {
            category: String::new(),
            name: "k".into(),
            value: key_value(&key, Some("meta")).unwrap(),
            tags,
        };
        let key_entry = KeyEntry::from_entry(entry).unwrap();
        assert_eq!(key_entry.algorithm(), "ed25519");
        assert_eq!(key_entry.metadata.as_deref(), Some("meta"));
        assert_eq!(key_entry.tags.to_json(), r#"{"user":"x"}"#);
    }
}
