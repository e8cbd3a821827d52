//! Readers over engine-held result lists.
//!
//! A list is a snapshot owned by the engine and addressed by handle. Reads
//! are synchronous. Reading out of range, reading after [`EntryList::free`],
//! or freeing twice fails with the engine's `Input` error.

use bytes::Bytes;
use lockbox_core::Handle;

use crate::client::Client;
use crate::error::Result;
use crate::key::LocalKey;

/// An owned copy of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub category: String,
    pub name: String,
    pub value: Bytes,
    /// Tags as a JSON object.
    pub tags: String,
}

impl Entry {
    /// The tags parsed as JSON.
    pub fn tags_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.tags)
    }
}

/// A list of records returned by a fetch or a scan page.
#[derive(Debug)]
pub struct EntryList {
    client: Client,
    handle: Handle,
}

impl EntryList {
    pub(crate) fn new(client: &Client, handle: Handle) -> Self {
        Self {
            client: client.clone(),
            handle,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn count(&self) -> Result<usize> {
        self.client
            .read(self.client.engine().entry_list_count(self.handle))
    }

    pub fn category(&self, index: usize) -> Result<String> {
        self.client
            .read(self.client.engine().entry_list_get_category(self.handle, index))
    }

    pub fn name(&self, index: usize) -> Result<String> {
        self.client
            .read(self.client.engine().entry_list_get_name(self.handle, index))
    }

    pub fn value(&self, index: usize) -> Result<Bytes> {
        self.client
            .read(self.client.engine().entry_list_get_value(self.handle, index))
    }

    /// Tags of the entry at `index` as a JSON object.
    pub fn tags(&self, index: usize) -> Result<String> {
        self.client
            .read(self.client.engine().entry_list_get_tags(self.handle, index))
    }

    /// Copy out the entry at `index`.
    pub fn entry(&self, index: usize) -> Result<Entry> {
        Ok(Entry {
            category: self.category(index)?,
            name: self.name(index)?,
            value: self.value(index)?,
            tags: self.tags(index)?,
        })
    }

    /// Copy out every entry.
    pub fn to_entries(&self) -> Result<Vec<Entry>> {
        (0..self.count()?).map(|i| self.entry(i)).collect()
    }

    /// Release the list in the engine.
    pub fn free(&self) -> Result<()> {
        self.client
            .check(self.client.engine().entry_list_free(self.handle))
    }
}

/// A list of stored keys.
#[derive(Debug)]
pub struct KeyEntryList {
    client: Client,
    handle: Handle,
}

impl KeyEntryList {
    pub(crate) fn new(client: &Client, handle: Handle) -> Self {
        Self {
            client: client.clone(),
            handle,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn count(&self) -> Result<usize> {
        self.client
            .read(self.client.engine().key_entry_list_count(self.handle))
    }

    pub fn algorithm(&self, index: usize) -> Result<String> {
        self.client
            .read(self.client.engine().key_entry_list_get_algorithm(self.handle, index))
    }

    pub fn name(&self, index: usize) -> Result<String> {
        self.client
            .read(self.client.engine().key_entry_list_get_name(self.handle, index))
    }

    pub fn metadata(&self, index: usize) -> Result<Option<String>> {
        self.client
            .read(self.client.engine().key_entry_list_get_metadata(self.handle, index))
    }

    pub fn tags(&self, index: usize) -> Result<String> {
        self.client
            .read(self.client.engine().key_entry_list_get_tags(self.handle, index))
    }

    /// Load the key at `index` as a new local key. The key must be freed
    /// separately from the list.
    pub fn load_key(&self, index: usize) -> Result<LocalKey> {
        let key = self
            .client
            .read(self.client.engine().key_entry_list_load_local(self.handle, index))?;
        Ok(LocalKey::new(&self.client, key))
    }

    pub fn free(&self) -> Result<()> {
        self.client
            .check(self.client.engine().key_entry_list_free(self.handle))
    }
}
