//! SQLite-backed encrypted store.
//!
//! One [`SqliteStore`] is one open store handle: a connection, the derived
//! store key and a cache of unwrapped profile keys. All methods are
//! blocking; the engine runs them on `spawn_blocking` workers.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use bytes::Bytes;
use lockbox_core::KeyMethod;
use rand::RngCore;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use crate::crypto::{self, ProfileKey, StoreKey};
use crate::error::{EngineError, Result};
use crate::filter::{TagFilter, Tags};
use crate::migration;
use crate::uri::StoreUri;

/// Item kind of a plain record.
pub const KIND_RECORD: i64 = 1;
/// Item kind of a stored key.
pub const KIND_KEY: i64 = 2;

const CATEGORY_DOMAIN: &str = "category";
const NAME_DOMAIN: &str = "name";

/// Rows decrypted per round trip when filtering.
const BATCH_SIZE: i64 = 64;

/// A decrypted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub category: String,
    pub name: String,
    pub value: Bytes,
    pub tags: Tags,
}

/// A profile with its unwrapped key.
pub struct Profile {
    pub id: i64,
    pub name: String,
    key: ProfileKey,
}

impl std::fmt::Debug for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profile")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Position of an incremental read over one category.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    /// Highest row id already visited.
    last_id: i64,
    /// Matching rows still to skip before collecting.
    skip: i64,
    /// No rows remain past `last_id`.
    exhausted: bool,
}

impl Cursor {
    /// A cursor that skips the first `offset` matches.
    pub fn with_offset(offset: i64) -> Self {
        Self {
            skip: offset.max(0),
            ..Self::default()
        }
    }

    /// Whether the underlying rows are exhausted.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// What to read: one category of one item kind within a profile.
#[derive(Debug, Clone, Copy)]
pub struct Selection<'a> {
    pub kind: i64,
    pub category: &'a str,
    pub filter: Option<&'a TagFilter>,
}

/// An open store.
pub struct SqliteStore {
    uri: StoreUri,
    conn: Mutex<Connection>,
    key: RwLock<StoreKey>,
    default_profile: String,
    profiles: Mutex<HashMap<String, Arc<Profile>>>,
    in_transaction: AtomicBool,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("uri", &self.uri)
            .field("default_profile", &self.default_profile)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Create a new store.
    ///
    /// With `recreate`, an existing store file is deleted first; without it,
    /// an existing file is a `Duplicate` error.
    pub fn provision(
        uri: &StoreUri,
        method: KeyMethod,
        pass_key: Option<&str>,
        profile: Option<&str>,
        recreate: bool,
    ) -> Result<Self> {
        let mut conn = match uri {
            StoreUri::Memory => Connection::open_in_memory()?,
            StoreUri::File(path) => {
                if path.exists() {
                    if !recreate {
                        return Err(EngineError::Duplicate(format!(
                            "Store already exists: {}",
                            path.display()
                        )));
                    }
                    remove_files(path)?;
                }
                Connection::open(path)?
            }
        };
        migration::migrate(&mut conn)?;

        let salt = match method {
            KeyMethod::Argon2i => Some(crypto::generate_salt()),
            _ => None,
        };
        let store_key = StoreKey::derive(method, pass_key, salt.as_ref().map(|s| &s[..]))?;
        let default_profile = profile.map_or_else(random_profile_name, str::to_owned);

        atomically(&mut conn, |conn| {
            write_key_config(conn, method, salt.as_ref().map(|s| &s[..]), &store_key)?;
            set_config(conn, "default_profile", Some(&default_profile))?;
            insert_profile(conn, &store_key, &default_profile)?;
            Ok(())
        })?;

        Ok(Self::new(uri.clone(), conn, store_key, default_profile))
    }

    /// Open an existing store file.
    ///
    /// `method` must match the key method the store was provisioned with;
    /// `None` accepts the stored method. `profile` overrides the store's
    /// default profile for this handle.
    pub fn open(
        uri: &StoreUri,
        method: Option<KeyMethod>,
        pass_key: Option<&str>,
        profile: Option<&str>,
    ) -> Result<Self> {
        let path = match uri {
            StoreUri::Memory => {
                return Err(EngineError::NotFound(
                    "In-memory stores cannot be reopened".into(),
                ))
            }
            StoreUri::File(path) => path,
        };
        if !path.exists() {
            return Err(EngineError::NotFound(format!(
                "Store not found: {}",
                path.display()
            )));
        }

        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;

        let stored = get_config(&conn, "key_method")?
            .ok_or_else(|| EngineError::NotFound("Store is not provisioned".into()))?;
        let stored = KeyMethod::parse(&stored).ok_or_else(|| {
            EngineError::Unsupported(format!("Unsupported stored key method: {}", stored))
        })?;
        if method.is_some_and(|m| m != stored) {
            return Err(EngineError::Encryption("Store key method mismatch".into()));
        }

        let salt = get_config(&conn, "salt")?.map(|s| decode_hex(&s)).transpose()?;
        let store_key = StoreKey::derive(stored, pass_key, salt.as_deref())?;

        let check = get_config(&conn, "key_check")?
            .ok_or_else(|| EngineError::Unexpected("Store key check is missing".into()))?;
        store_key.verify(&decode_hex(&check)?)?;

        let default_profile = match profile {
            Some(name) => name.to_owned(),
            None => get_config(&conn, "default_profile")?
                .ok_or_else(|| EngineError::Unexpected("Default profile is missing".into()))?,
        };

        let store = Self::new(uri.clone(), conn, store_key, default_profile);
        store.profile(None)?;
        Ok(store)
    }

    /// Delete a store's backing storage. Returns whether anything was removed.
    pub fn remove_backing(uri: &StoreUri) -> Result<bool> {
        match uri {
            StoreUri::Memory => Ok(true),
            StoreUri::File(path) if path.exists() => {
                remove_files(path)?;
                Ok(true)
            }
            StoreUri::File(_) => Ok(false),
        }
    }

    fn new(uri: StoreUri, conn: Connection, key: StoreKey, default_profile: String) -> Self {
        Self {
            uri,
            conn: Mutex::new(conn),
            key: RwLock::new(key),
            default_profile,
            profiles: Mutex::new(HashMap::new()),
            in_transaction: AtomicBool::new(false),
        }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut conn)
    }

    fn store_key(&self) -> StoreKey {
        self.key.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The locator this store was opened from.
    pub fn uri(&self) -> &StoreUri {
        &self.uri
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Profiles
    // ─────────────────────────────────────────────────────────────────────────

    /// The default profile for this handle.
    pub fn default_profile(&self) -> &str {
        &self.default_profile
    }

    /// Resolve a profile by name, defaulting to the handle's default profile.
    pub fn profile(&self, name: Option<&str>) -> Result<Arc<Profile>> {
        let name = name.unwrap_or(&self.default_profile);

        if let Some(profile) = self
            .profiles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(Arc::clone(profile));
        }

        let row: Option<(i64, Vec<u8>)> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, profile_key FROM profiles WHERE name = ?1",
                    params![name],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?)
        })?;
        let (id, wrapped) =
            row.ok_or_else(|| EngineError::NotFound(format!("Profile not found: {}", name)))?;

        let profile = Arc::new(Profile {
            id,
            name: name.to_owned(),
            key: self.store_key().unwrap_profile_key(&wrapped)?,
        });
        self.profiles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_owned(), Arc::clone(&profile));
        Ok(profile)
    }

    /// Create a profile, named randomly when `name` is `None`.
    pub fn create_profile(&self, name: Option<&str>) -> Result<String> {
        let name = name.map_or_else(random_profile_name, str::to_owned);
        let store_key = self.store_key();
        self.with_conn(|conn| insert_profile(conn, &store_key, &name))?;
        Ok(name)
    }

    /// Remove a profile and all of its items. Returns whether it existed.
    pub fn remove_profile(&self, name: &str) -> Result<bool> {
        if name == self.default_profile {
            return Err(EngineError::Input(
                "The default profile cannot be removed".into(),
            ));
        }

        let removed = self.with_conn(|conn| {
            atomically(conn, |conn| {
                let id: Option<i64> = conn
                    .query_row(
                        "SELECT id FROM profiles WHERE name = ?1",
                        params![name],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(id) = id else {
                    return Ok(false);
                };
                conn.execute("DELETE FROM items WHERE profile_id = ?1", params![id])?;
                conn.execute("DELETE FROM profiles WHERE id = ?1", params![id])?;
                Ok(true)
            })
        })?;

        self.profiles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        Ok(removed)
    }

    /// Replace the store key, re-wrapping every profile key.
    pub fn rekey(&self, method: KeyMethod, pass_key: Option<&str>) -> Result<()> {
        let salt = match method {
            KeyMethod::Argon2i => Some(crypto::generate_salt()),
            _ => None,
        };
        let new_key = StoreKey::derive(method, pass_key, salt.as_ref().map(|s| &s[..]))?;
        let old_key = self.store_key();

        self.with_conn(|conn| {
            atomically(conn, |conn| {
                let rows: Vec<(i64, Vec<u8>)> = conn
                    .prepare("SELECT id, profile_key FROM profiles")?
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<_>>()?;

                for (id, wrapped) in rows {
                    let profile_key = old_key.unwrap_profile_key(&wrapped)?;
                    conn.execute(
                        "UPDATE profiles SET profile_key = ?1 WHERE id = ?2",
                        params![new_key.wrap_profile_key(&profile_key)?, id],
                    )?;
                }

                write_key_config(conn, method, salt.as_ref().map(|s| &s[..]), &new_key)
            })
        })?;

        *self.key.write().unwrap_or_else(PoisonError::into_inner) = new_key;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transactions
    // ─────────────────────────────────────────────────────────────────────────

    /// Begin a write transaction on this handle.
    pub fn begin(&self) -> Result<()> {
        if self.in_transaction.swap(true, Ordering::AcqRel) {
            return Err(EngineError::Busy(
                "Store already has an active transaction".into(),
            ));
        }
        let begun = self.with_conn(|conn| Ok(conn.execute_batch("BEGIN IMMEDIATE")?));
        if begun.is_err() {
            self.in_transaction.store(false, Ordering::Release);
        }
        begun
    }

    /// Commit or roll back the active transaction.
    pub fn finish(&self, commit: bool) -> Result<()> {
        let sql = if commit { "COMMIT" } else { "ROLLBACK" };
        let result = self.with_conn(|conn| {
            if conn.is_autocommit() {
                return Ok(());
            }
            Ok(conn.execute_batch(sql)?)
        });
        self.in_transaction.store(false, Ordering::Release);
        result
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Items
    // ─────────────────────────────────────────────────────────────────────────

    /// Count live items matching `sel`.
    pub fn count(&self, profile: &Profile, sel: Selection<'_>) -> Result<i64> {
        if sel.filter.is_none() {
            let category_hash = profile.key.index_hash(CATEGORY_DOMAIN, sel.category);
            return self.with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM items
                     WHERE profile_id = ?1 AND kind = ?2 AND category_hash = ?3
                       AND (expiry IS NULL OR expiry > ?4)",
                    params![profile.id, sel.kind, category_hash, crate::now_millis()],
                    |row| row.get(0),
                )?)
            });
        }

        let mut cursor = Cursor::default();
        let rows = self.with_conn(|conn| collect(conn, profile, sel, &mut cursor, None))?;
        Ok(rows.len() as i64)
    }

    /// Fetch one live item by name.
    pub fn fetch(&self, profile: &Profile, kind: i64, category: &str, name: &str) -> Result<Option<Entry>> {
        let category_hash = profile.key.index_hash(CATEGORY_DOMAIN, category);
        let name_hash = profile.key.index_hash(NAME_DOMAIN, name);

        let row: Option<(Vec<u8>, Vec<u8>)> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value, tags FROM items
                     WHERE profile_id = ?1 AND kind = ?2 AND category_hash = ?3
                       AND name_hash = ?4 AND (expiry IS NULL OR expiry > ?5)",
                    params![profile.id, kind, category_hash, name_hash, crate::now_millis()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?)
        })?;

        row.map(|(value, tags)| {
            Ok(Entry {
                category: category.to_owned(),
                name: name.to_owned(),
                value: Bytes::from(profile.key.decrypt(&value)?),
                tags: Tags::parse(Some(&profile.key.decrypt_text(&tags)?))?,
            })
        })
        .transpose()
    }

    /// Fetch up to `limit` live items matching `sel`; `limit < 0` is unbounded.
    pub fn fetch_all(&self, profile: &Profile, sel: Selection<'_>, limit: i64) -> Result<Vec<Entry>> {
        let want = usize::try_from(limit).ok();
        let mut cursor = Cursor::default();
        let rows = self.with_conn(|conn| collect(conn, profile, sel, &mut cursor, want))?;
        Ok(rows.into_iter().map(|(_, entry)| entry).collect())
    }

    /// Read the next page of up to `page` items at `cursor`.
    pub fn read_page(
        &self,
        profile: &Profile,
        sel: Selection<'_>,
        cursor: &mut Cursor,
        page: usize,
    ) -> Result<Vec<Entry>> {
        let rows = self.with_conn(|conn| collect(conn, profile, sel, cursor, Some(page)))?;
        Ok(rows.into_iter().map(|(_, entry)| entry).collect())
    }

    /// Insert a new item. An existing live item is a `Duplicate` error.
    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        &self,
        profile: &Profile,
        kind: i64,
        category: &str,
        name: &str,
        value: &[u8],
        tags: &Tags,
        expiry_ms: i64,
    ) -> Result<()> {
        let key = &profile.key;
        let category_hash = key.index_hash(CATEGORY_DOMAIN, category);
        let name_hash = key.index_hash(NAME_DOMAIN, name);
        let now = crate::now_millis();

        let enc_category = key.encrypt(category.as_bytes())?;
        let enc_name = key.encrypt(name.as_bytes())?;
        let enc_value = key.encrypt(value)?;
        let enc_tags = key.encrypt(tags.to_json().as_bytes())?;

        self.with_conn(|conn| {
            atomically(conn, |conn| {
                // An expired item no longer occupies its name.
                conn.execute(
                    "DELETE FROM items
                     WHERE profile_id = ?1 AND kind = ?2 AND category_hash = ?3
                       AND name_hash = ?4 AND expiry IS NOT NULL AND expiry <= ?5",
                    params![profile.id, kind, category_hash, name_hash, now],
                )?;

                let inserted = conn.execute(
                    "INSERT INTO items (profile_id, kind, category_hash, name_hash,
                                        category, name, value, tags, expiry)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        profile.id,
                        kind,
                        category_hash,
                        name_hash,
                        enc_category,
                        enc_name,
                        enc_value,
                        enc_tags,
                        expiry_at(now, expiry_ms),
                    ],
                );
                match inserted {
                    Ok(_) => Ok(()),
                    Err(err) if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                        Err(EngineError::Duplicate("Duplicate entry".into()))
                    }
                    Err(err) => Err(err.into()),
                }
            })
        })
    }

    /// Replace the value, tags and expiry of a live item.
    #[allow(clippy::too_many_arguments)]
    pub fn replace(
        &self,
        profile: &Profile,
        kind: i64,
        category: &str,
        name: &str,
        value: &[u8],
        tags: &Tags,
        expiry_ms: i64,
    ) -> Result<()> {
        let key = &profile.key;
        let category_hash = key.index_hash(CATEGORY_DOMAIN, category);
        let name_hash = key.index_hash(NAME_DOMAIN, name);
        let now = crate::now_millis();
        let enc_value = key.encrypt(value)?;
        let enc_tags = key.encrypt(tags.to_json().as_bytes())?;

        let updated = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE items SET value = ?1, tags = ?2, expiry = ?3
                 WHERE profile_id = ?4 AND kind = ?5 AND category_hash = ?6
                   AND name_hash = ?7 AND (expiry IS NULL OR expiry > ?8)",
                params![
                    enc_value,
                    enc_tags,
                    expiry_at(now, expiry_ms),
                    profile.id,
                    kind,
                    category_hash,
                    name_hash,
                    now,
                ],
            )?)
        })?;

        if updated == 0 {
            return Err(EngineError::NotFound("Entry not found".into()));
        }
        Ok(())
    }

    /// Delete a live item.
    pub fn delete(&self, profile: &Profile, kind: i64, category: &str, name: &str) -> Result<()> {
        let category_hash = profile.key.index_hash(CATEGORY_DOMAIN, category);
        let name_hash = profile.key.index_hash(NAME_DOMAIN, name);

        let deleted = self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM items
                 WHERE profile_id = ?1 AND kind = ?2 AND category_hash = ?3
                   AND name_hash = ?4 AND (expiry IS NULL OR expiry > ?5)",
                params![profile.id, kind, category_hash, name_hash, crate::now_millis()],
            )?)
        })?;

        if deleted == 0 {
            return Err(EngineError::NotFound("Entry not found".into()));
        }
        Ok(())
    }

    /// Delete every live item matching `sel`. Returns the number removed.
    pub fn delete_all(&self, profile: &Profile, sel: Selection<'_>) -> Result<i64> {
        self.with_conn(|conn| {
            atomically(conn, |conn| {
                let mut cursor = Cursor::default();
                let rows = collect(conn, profile, sel, &mut cursor, None)?;
                let mut stmt = conn.prepare("DELETE FROM items WHERE id = ?1")?;
                for (id, _) in &rows {
                    stmt.execute(params![id])?;
                }
                Ok(rows.len() as i64)
            })
        })
    }
}

/// Collect matching rows past `cursor`, at most `want` of them.
fn collect(
    conn: &Connection,
    profile: &Profile,
    sel: Selection<'_>,
    cursor: &mut Cursor,
    want: Option<usize>,
) -> Result<Vec<(i64, Entry)>> {
    let category_hash = profile.key.index_hash(CATEGORY_DOMAIN, sel.category);
    let now = crate::now_millis();
    let mut stmt = conn.prepare(
        "SELECT id, name, value, tags FROM items
         WHERE profile_id = ?1 AND kind = ?2 AND category_hash = ?3
           AND (expiry IS NULL OR expiry > ?4) AND id > ?5
         ORDER BY id LIMIT ?6",
    )?;

    let mut out = Vec::new();
    while !cursor.exhausted && want.map_or(true, |w| out.len() < w) {
        let batch: Vec<(i64, Vec<u8>, Vec<u8>, Vec<u8>)> = stmt
            .query_map(
                params![profile.id, sel.kind, category_hash, now, cursor.last_id, BATCH_SIZE],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?
            .collect::<rusqlite::Result<_>>()?;

        if (batch.len() as i64) < BATCH_SIZE {
            cursor.exhausted = true;
        }

        for (id, name, value, tags) in batch {
            if want.is_some_and(|w| out.len() >= w) {
                // Leave the remaining rows for the next read.
                cursor.exhausted = false;
                break;
            }
            cursor.last_id = id;

            let tags = Tags::parse(Some(&profile.key.decrypt_text(&tags)?))?;
            if sel.filter.is_some_and(|f| !f.matches(&tags)) {
                continue;
            }
            if cursor.skip > 0 {
                cursor.skip -= 1;
                continue;
            }

            out.push((
                id,
                Entry {
                    category: sel.category.to_owned(),
                    name: profile.key.decrypt_text(&name)?,
                    value: Bytes::from(profile.key.decrypt(&value)?),
                    tags,
                },
            ));
        }
    }

    Ok(out)
}

/// Run `f` in a transaction unless one is already open on `conn`.
fn atomically<T>(conn: &mut Connection, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    if !conn.is_autocommit() {
        return f(conn);
    }
    let tx = conn.transaction()?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

fn insert_profile(conn: &Connection, store_key: &StoreKey, name: &str) -> Result<()> {
    let wrapped = store_key.wrap_profile_key(&ProfileKey::generate())?;
    match conn.execute(
        "INSERT INTO profiles (name, profile_key) VALUES (?1, ?2)",
        params![name, wrapped],
    ) {
        Ok(_) => Ok(()),
        Err(err) if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => Err(
            EngineError::Duplicate(format!("Duplicate profile: {}", name)),
        ),
        Err(err) => Err(err.into()),
    }
}

fn write_key_config(
    conn: &Connection,
    method: KeyMethod,
    salt: Option<&[u8]>,
    key: &StoreKey,
) -> Result<()> {
    set_config(conn, "key_method", Some(method.as_str()))?;
    set_config(conn, "salt", salt.map(hex::encode).as_deref())?;
    set_config(conn, "key_check", Some(&hex::encode(key.key_check()?)))
}

fn get_config(conn: &Connection, name: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM config WHERE name = ?1",
            params![name],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?
        .flatten())
}

fn set_config(conn: &Connection, name: &str, value: Option<&str>) -> Result<()> {
    conn.execute(
        "INSERT INTO config (name, value) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET value = excluded.value",
        params![name, value],
    )?;
    Ok(())
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    hex::decode(s).map_err(|e| EngineError::Serialization(e.to_string()))
}

fn expiry_at(now: i64, expiry_ms: i64) -> Option<i64> {
    (expiry_ms >= 0).then(|| now.saturating_add(expiry_ms))
}

fn random_profile_name() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn remove_files(path: &Path) -> Result<()> {
    std::fs::remove_file(path)?;
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(suffix);
        match std::fs::remove_file(&sidecar) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => return Err(err.into()),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_store() -> SqliteStore {
        SqliteStore::provision(&StoreUri::Memory, KeyMethod::None, None, Some("main"), false).unwrap()
    }

    fn tags(json: &str) -> Tags {
        Tags::parse(Some(json)).unwrap()
    }

    fn records(category: &str) -> Selection<'_> {
        Selection {
            kind: KIND_RECORD,
            category,
            filter: None,
        }
    }

    #[test]
    fn test_insert_and_fetch() {
        let store = memory_store();
        let profile = store.profile(None).unwrap();
        store
            .insert(&profile, KIND_RECORD, "cat", "one", b"v1", &tags(r#"{"a":"1"}"#), -1)
            .unwrap();

        let entry = store.fetch(&profile, KIND_RECORD, "cat", "one").unwrap().unwrap();
        assert_eq!(entry.value.as_ref(), b"v1");
        assert_eq!(entry.tags, tags(r#"{"a":"1"}"#));
        assert!(store.fetch(&profile, KIND_RECORD, "cat", "two").unwrap().is_none());
        assert!(store.fetch(&profile, KIND_KEY, "cat", "one").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_and_missing() {
        let store = memory_store();
        let profile = store.profile(None).unwrap();
        let empty = Tags::default();
        store.insert(&profile, KIND_RECORD, "c", "n", b"v", &empty, -1).unwrap();

        assert!(matches!(
            store.insert(&profile, KIND_RECORD, "c", "n", b"v", &empty, -1),
            Err(EngineError::Duplicate(_))
        ));
        assert!(matches!(
            store.replace(&profile, KIND_RECORD, "c", "missing", b"v", &empty, -1),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            store.delete(&profile, KIND_RECORD, "c", "missing"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_expired_items_are_invisible() {
        let store = memory_store();
        let profile = store.profile(None).unwrap();
        let empty = Tags::default();
        store.insert(&profile, KIND_RECORD, "c", "n", b"old", &empty, 0).unwrap();

        assert!(store.fetch(&profile, KIND_RECORD, "c", "n").unwrap().is_none());
        assert_eq!(store.count(&profile, records("c")).unwrap(), 0);
        store.insert(&profile, KIND_RECORD, "c", "n", b"new", &empty, -1).unwrap();
        assert_eq!(store.count(&profile, records("c")).unwrap(), 1);
    }

    #[test]
    fn test_paging_with_filter_and_offset() {
        let store = memory_store();
        let profile = store.profile(None).unwrap();
        for i in 0..150 {
            let t = tags(&format!(r#"{{"even":"{}"}}"#, i % 2 == 0));
            store
                .insert(&profile, KIND_RECORD, "c", &format!("n{}", i), b"v", &t, -1)
                .unwrap();
        }

        let filter = TagFilter::parse(Some(r#"{"even":"true"}"#)).unwrap().unwrap();
        let sel = Selection {
            kind: KIND_RECORD,
            category: "c",
            filter: Some(&filter),
        };
        assert_eq!(store.count(&profile, sel).unwrap(), 75);

        let mut cursor = Cursor::with_offset(5);
        let mut seen = Vec::new();
        loop {
            let page = store.read_page(&profile, sel, &mut cursor, 32).unwrap();
            if page.is_empty() {
                break;
            }
            assert!(page.len() <= 32);
            seen.extend(page.into_iter().map(|e| e.name));
        }
        assert_eq!(seen.len(), 70);
        assert_eq!(seen[0], "n10");
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn test_fetch_all_limit_and_delete_all() {
        let store = memory_store();
        let profile = store.profile(None).unwrap();
        for i in 0..5 {
            store
                .insert(&profile, KIND_RECORD, "c", &format!("n{}", i), b"v", &Tags::default(), -1)
                .unwrap();
        }
        assert_eq!(store.fetch_all(&profile, records("c"), 2).unwrap().len(), 2);
        assert_eq!(store.fetch_all(&profile, records("c"), -1).unwrap().len(), 5);
        assert_eq!(store.delete_all(&profile, records("c")).unwrap(), 5);
        assert_eq!(store.count(&profile, records("c")).unwrap(), 0);
    }

    #[test]
    fn test_profiles() {
        let store = memory_store();
        assert_eq!(store.default_profile(), "main");

        let created = store.create_profile(None).unwrap();
        assert_eq!(created.len(), 32);
        assert!(matches!(
            store.create_profile(Some(&created)),
            Err(EngineError::Duplicate(_))
        ));

        let other = store.profile(Some(&created)).unwrap();
        store
            .insert(&other, KIND_RECORD, "c", "n", b"v", &Tags::default(), -1)
            .unwrap();
        let main = store.profile(None).unwrap();
        assert!(store.fetch(&main, KIND_RECORD, "c", "n").unwrap().is_none());

        assert!(store.remove_profile(&created).unwrap());
        assert!(!store.remove_profile(&created).unwrap());
        assert!(matches!(
            store.remove_profile("main"),
            Err(EngineError::Input(_))
        ));
        assert!(matches!(
            store.profile(Some(&created)),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_transaction_rollback() {
        let store = memory_store();
        let profile = store.profile(None).unwrap();
        store.begin().unwrap();
        assert!(matches!(store.begin(), Err(EngineError::Busy(_))));
        store
            .insert(&profile, KIND_RECORD, "c", "n", b"v", &Tags::default(), -1)
            .unwrap();
        store.finish(false).unwrap();

        assert!(store.fetch(&profile, KIND_RECORD, "c", "n").unwrap().is_none());
        store.begin().unwrap();
        store.finish(true).unwrap();
    }

    #[test]
    fn test_file_store_reopen_and_rekey() {
        let dir = tempfile::tempdir().unwrap();
        let uri = StoreUri::File(dir.path().join("store.db"));
        let raw = crypto::generate_raw_key(None);

        let store = SqliteStore::provision(&uri, KeyMethod::Raw, Some(&raw), None, false).unwrap();
        let profile = store.profile(None).unwrap();
        store
            .insert(&profile, KIND_RECORD, "c", "n", b"secret", &Tags::default(), -1)
            .unwrap();
        store.rekey(KeyMethod::Argon2i, Some("new pass")).unwrap();
        drop(profile);
        drop(store);

        assert!(matches!(
            SqliteStore::provision(&uri, KeyMethod::None, None, None, false),
            Err(EngineError::Duplicate(_))
        ));
        assert!(matches!(
            SqliteStore::open(&uri, Some(KeyMethod::Raw), Some(&raw), None),
            Err(EngineError::Encryption(_))
        ));
        assert!(matches!(
            SqliteStore::open(&uri, Some(KeyMethod::Argon2i), Some("wrong"), None),
            Err(EngineError::Encryption(_))
        ));

        let store = SqliteStore::open(&uri, Some(KeyMethod::Argon2i), Some("new pass"), None).unwrap();
        let profile = store.profile(None).unwrap();
        let entry = store.fetch(&profile, KIND_RECORD, "c", "n").unwrap().unwrap();
        assert_eq!(entry.value.as_ref(), b"secret");
        drop(store);

        assert!(SqliteStore::remove_backing(&uri).unwrap());
        assert!(!SqliteStore::remove_backing(&uri).unwrap());
        assert!(matches!(
            SqliteStore::open(&uri, None, None, None),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_memory_store_cannot_reopen() {
        assert!(matches!(
            SqliteStore::open(&StoreUri::Memory, None, None, None),
            Err(EngineError::NotFound(_))
        ));
        assert!(SqliteStore::remove_backing(&StoreUri::Memory).unwrap());
    }
}
