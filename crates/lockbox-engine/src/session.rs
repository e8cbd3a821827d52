//! Sessions and scans over an open store.

use std::sync::{Arc, Mutex, PoisonError};

use lockbox_core::{KeyQuery, KeyRecord, UpdateOperation};

use crate::error::{EngineError, Result};
use crate::filter::{TagFilter, Tags};
use crate::keys::LocalKey;
use crate::results::{self, EntrySet, KeyEntrySet, ALG_TAG, THUMBPRINT_TAG};
use crate::sqlite::{Cursor, Profile, Selection, SqliteStore, KIND_KEY, KIND_RECORD};

/// Category under which stored keys live.
const KEY_CATEGORY: &str = "";

/// Entries per scan page.
pub const SCAN_PAGE_SIZE: usize = 32;

/// An open session: a profile of a store, optionally inside a transaction.
#[derive(Debug)]
pub struct SessionState {
    store: Arc<SqliteStore>,
    profile: Arc<Profile>,
    transaction: bool,
}

impl SessionState {
    /// Start a session, beginning a transaction when requested.
    pub fn start(store: Arc<SqliteStore>, profile: Option<&str>, transaction: bool) -> Result<Self> {
        let profile = store.profile(profile)?;
        if transaction {
            store.begin()?;
        }
        Ok(Self {
            store,
            profile,
            transaction,
        })
    }

    pub fn is_transaction(&self) -> bool {
        self.transaction
    }

    /// Whether this session runs against `store`.
    pub fn is_bound_to(&self, store: &Arc<SqliteStore>) -> bool {
        Arc::ptr_eq(&self.store, store)
    }

    pub fn profile_name(&self) -> &str {
        &self.profile.name
    }

    /// End the session. Only transactions have anything to commit or roll back.
    pub fn close(&self, commit: bool) -> Result<()> {
        if self.transaction {
            self.store.finish(commit)?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Records
    // ─────────────────────────────────────────────────────────────────────────

    pub fn count(&self, category: &str, filter: Option<&TagFilter>) -> Result<i64> {
        self.store.count(&self.profile, records(category, filter))
    }

    pub fn fetch(&self, category: &str, name: &str) -> Result<Option<EntrySet>> {
        Ok(self
            .store
            .fetch(&self.profile, KIND_RECORD, category, name)?
            .map(|entry| EntrySet::new(vec![entry])))
    }

    pub fn fetch_all(&self, category: &str, filter: Option<&TagFilter>, limit: i64) -> Result<EntrySet> {
        self.store
            .fetch_all(&self.profile, records(category, filter), limit)
            .map(EntrySet::new)
    }

    pub fn remove_all(&self, category: &str, filter: Option<&TagFilter>) -> Result<i64> {
        self.store.delete_all(&self.profile, records(category, filter))
    }

    /// Apply one insert, replace or remove.
    pub fn update(
        &self,
        operation: UpdateOperation,
        category: &str,
        name: &str,
        value: Option<&[u8]>,
        tags: &Tags,
        expiry_ms: i64,
    ) -> Result<()> {
        let profile = &self.profile;
        match operation {
            UpdateOperation::Insert => self.store.insert(
                profile,
                KIND_RECORD,
                category,
                name,
                require_value(value)?,
                tags,
                expiry_ms,
            ),
            UpdateOperation::Replace => self.store.replace(
                profile,
                KIND_RECORD,
                category,
                name,
                require_value(value)?,
                tags,
                expiry_ms,
            ),
            UpdateOperation::Remove => self.store.delete(profile, KIND_RECORD, category, name),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Keys
    // ─────────────────────────────────────────────────────────────────────────

    pub fn insert_key(&self, key: &LocalKey, record: &KeyRecord<'_>) -> Result<()> {
        let mut tags = Tags::parse(record.tags)?;
        tags.insert(ALG_TAG, key.algorithm());
        tags.insert(THUMBPRINT_TAG, key.thumbprint()?);
        let value = results::key_value(key, record.metadata)?;

        self.store.insert(
            &self.profile,
            KIND_KEY,
            KEY_CATEGORY,
            record.name,
            &value,
            &tags,
            record.expiry_ms,
        )
    }

    pub fn fetch_key(&self, name: &str) -> Result<Option<KeyEntrySet>> {
        self.store
            .fetch(&self.profile, KIND_KEY, KEY_CATEGORY, name)?
            .map(|entry| KeyEntrySet::from_entries(vec![entry]))
            .transpose()
    }

    pub fn fetch_all_keys(&self, query: &KeyQuery<'_>) -> Result<KeyEntrySet> {
        let mut clauses = Vec::new();
        if let Some(filter) = TagFilter::parse(query.tag_filter)? {
            clauses.push(filter);
        }
        if let Some(alg) = query.alg {
            clauses.push(TagFilter::eq(ALG_TAG, alg));
        }
        if let Some(thumbprint) = query.thumbprint {
            clauses.push(TagFilter::eq(THUMBPRINT_TAG, thumbprint));
        }
        let filter = (!clauses.is_empty()).then(|| TagFilter::all(clauses));

        let sel = Selection {
            kind: KIND_KEY,
            category: KEY_CATEGORY,
            filter: filter.as_ref(),
        };
        KeyEntrySet::from_entries(self.store.fetch_all(&self.profile, sel, query.limit)?)
    }

    /// Replace a stored key's metadata, tags and expiry. The key material
    /// itself is unchanged.
    pub fn update_key(&self, record: &KeyRecord<'_>) -> Result<()> {
        let existing = self
            .store
            .fetch(&self.profile, KIND_KEY, KEY_CATEGORY, record.name)?
            .ok_or_else(|| EngineError::NotFound(format!("Key not found: {}", record.name)))?;

        let key = results::KeyEntry::from_entry(existing)?.key;
        let mut tags = Tags::parse(record.tags)?;
        tags.insert(ALG_TAG, key.algorithm());
        tags.insert(THUMBPRINT_TAG, key.thumbprint()?);
        let value = results::key_value(&key, record.metadata)?;

        self.store.replace(
            &self.profile,
            KIND_KEY,
            KEY_CATEGORY,
            record.name,
            &value,
            &tags,
            record.expiry_ms,
        )
    }

    pub fn remove_key(&self, name: &str) -> Result<()> {
        self.store.delete(&self.profile, KIND_KEY, KEY_CATEGORY, name)
    }
}

/// A paged read over one category.
#[derive(Debug)]
pub struct ScanState {
    store: Arc<SqliteStore>,
    profile: Arc<Profile>,
    category: String,
    filter: Option<TagFilter>,
    progress: Mutex<ScanProgress>,
}

#[derive(Debug)]
struct ScanProgress {
    cursor: Cursor,
    /// Entries still to return; `None` is unbounded.
    remaining: Option<usize>,
}

impl ScanState {
    /// Prepare a scan. Nothing is read until the first page.
    pub fn start(
        store: Arc<SqliteStore>,
        profile: Option<&str>,
        category: String,
        filter: Option<TagFilter>,
        offset: i64,
        limit: i64,
    ) -> Result<Self> {
        if offset < 0 {
            return Err(EngineError::Input(format!("Invalid scan offset: {}", offset)));
        }
        if limit < -1 {
            return Err(EngineError::Input(format!("Invalid scan limit: {}", limit)));
        }
        let profile = store.profile(profile)?;
        Ok(Self {
            store,
            profile,
            category,
            filter,
            progress: Mutex::new(ScanProgress {
                cursor: Cursor::with_offset(offset),
                remaining: usize::try_from(limit).ok(),
            }),
        })
    }

    /// Whether this scan reads from `store`.
    pub fn is_bound_to(&self, store: &Arc<SqliteStore>) -> bool {
        Arc::ptr_eq(&self.store, store)
    }

    /// Read the next page; `None` once the scan is exhausted.
    pub fn next_page(&self) -> Result<Option<EntrySet>> {
        let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);

        let page = progress
            .remaining
            .map_or(SCAN_PAGE_SIZE, |r| r.min(SCAN_PAGE_SIZE));
        if page == 0 || progress.cursor.is_exhausted() {
            return Ok(None);
        }

        let sel = records(&self.category, self.filter.as_ref());
        let entries = self
            .store
            .read_page(&self.profile, sel, &mut progress.cursor, page)?;
        if entries.is_empty() {
            return Ok(None);
        }

        if let Some(remaining) = progress.remaining.as_mut() {
            *remaining -= entries.len();
        }
        Ok(Some(EntrySet::new(entries)))
    }
}

fn records<'a>(category: &'a str, filter: Option<&'a TagFilter>) -> Selection<'a> {
    Selection {
        kind: KIND_RECORD,
        category,
        filter,
    }
}

fn require_value(value: Option<&[u8]>) -> Result<&[u8]> {
    value.ok_or_else(|| EngineError::Input("Entry value is required".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use lockbox_core::KeyMethod;

    use crate::uri::StoreUri;

    fn store() -> Arc<SqliteStore> {
        Arc::new(
            SqliteStore::provision(&StoreUri::Memory, KeyMethod::None, None, None, false).unwrap(),
        )
    }

    fn insert(session: &SessionState, name: &str, tags: &str) {
        session
            .update(
                UpdateOperation::Insert,
                "cat",
                name,
                Some(b"value"),
                &Tags::parse(Some(tags)).unwrap(),
                -1,
            )
            .unwrap();
    }

    #[test]
    fn test_update_requires_value() {
        let session = SessionState::start(store(), None, false).unwrap();
        assert!(matches!(
            session.update(UpdateOperation::Insert, "c", "n", None, &Tags::default(), -1),
            Err(EngineError::Input(_))
        ));
        // Remove ignores the value but still requires the record.
        assert!(matches!(
            session.update(UpdateOperation::Remove, "c", "n", None, &Tags::default(), -1),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_scan_cardinalities() {
        let store = store();
        let session = SessionState::start(store.clone(), None, false).unwrap();
        for name in ["a", "b", "c"] {
            insert(&session, name, "{}");
        }

        let drain = |offset, limit| {
            let scan =
                ScanState::start(store.clone(), None, "cat".into(), None, offset, limit).unwrap();
            let mut total = 0;
            while let Some(page) = scan.next_page().unwrap() {
                total += page.len();
            }
            assert!(scan.next_page().unwrap().is_none());
            total
        };

        assert_eq!(drain(0, -1), 3);
        assert_eq!(drain(1, -1), 2);
        assert_eq!(drain(0, 1), 1);
        assert_eq!(drain(5, -1), 0);
    }

    #[test]
    fn test_scan_pages_of_32() {
        let store = store();
        let session = SessionState::start(store.clone(), None, false).unwrap();
        for i in 0..40 {
            insert(&session, &format!("n{}", i), "{}");
        }

        let scan = ScanState::start(store, None, "cat".into(), None, 0, 35).unwrap();
        assert_eq!(scan.next_page().unwrap().unwrap().len(), 32);
        assert_eq!(scan.next_page().unwrap().unwrap().len(), 3);
        assert!(scan.next_page().unwrap().is_none());
    }

    #[test]
    fn test_negative_offset_rejected() {
        assert!(matches!(
            ScanState::start(store(), None, "cat".into(), None, -1, -1),
            Err(EngineError::Input(_))
        ));
    }

    #[test]
    fn test_limit_below_unbounded_rejected() {
        assert!(matches!(
            ScanState::start(store(), None, "cat".into(), None, 0, -5),
            Err(EngineError::Input(_))
        ));
        assert!(ScanState::start(store(), None, "cat".into(), None, 0, -1).is_ok());
    }

    #[test]
    fn test_key_lifecycle() {
        let session = SessionState::start(store(), None, false).unwrap();
        let key = LocalKey::generate("ed25519", false).unwrap();
        let record = KeyRecord {
            name: "signer",
            metadata: Some("meta"),
            tags: Some(r#"{"role":"sign"}"#),
            expiry_ms: -1,
        };
        session.insert_key(&key, &record).unwrap();
        assert!(matches!(
            session.insert_key(&key, &record),
            Err(EngineError::Duplicate(_))
        ));

        let fetched = session.fetch_key("signer").unwrap().unwrap();
        assert_eq!(fetched.get(0).unwrap().metadata.as_deref(), Some("meta"));

        let by_thumbprint = session
            .fetch_all_keys(&KeyQuery {
                thumbprint: Some(&key.thumbprint().unwrap()),
                limit: -1,
                ..KeyQuery::default()
            })
            .unwrap();
        assert_eq!(by_thumbprint.len(), 1);

        let by_alg = session
            .fetch_all_keys(&KeyQuery {
                alg: Some("x25519"),
                limit: -1,
                ..KeyQuery::default()
            })
            .unwrap();
        assert!(by_alg.is_empty());

        session
            .update_key(&KeyRecord {
                name: "signer",
                metadata: None,
                tags: Some(r#"{"role":"retired"}"#),
                expiry_ms: -1,
            })
            .unwrap();
        let updated = session.fetch_key("signer").unwrap().unwrap();
        let entry = updated.get(0).unwrap();
        assert_eq!(entry.metadata, None);
        assert_eq!(entry.tags.to_json(), r#"{"role":"retired"}"#);

        session.remove_key("signer").unwrap();
        assert!(session.fetch_key("signer").unwrap().is_none());
        assert!(matches!(
            session.remove_key("signer"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_transaction_session_commit() {
        let store = store();
        let txn = SessionState::start(store.clone(), None, true).unwrap();
        assert!(txn.is_transaction());
        assert!(matches!(
            SessionState::start(store.clone(), None, true),
            Err(EngineError::Busy(_))
        ));
        insert(&txn, "kept", "{}");
        txn.close(true).unwrap();

        let session = SessionState::start(store, None, false).unwrap();
        assert!(session.fetch("cat", "kept").unwrap().is_some());
    }
}
