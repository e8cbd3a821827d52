//! Handle tables for engine-owned objects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lockbox_core::Handle;

use crate::error::{EngineError, Result};

/// Handles are unique across every table in the process, so a handle of
/// one kind can never be mistaken for another.
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Objects of one kind, addressed by handle.
pub struct HandleTable<T> {
    kind: &'static str,
    entries: Mutex<HashMap<Handle, Arc<T>>>,
}

impl<T> HandleTable<T> {
    /// Create an empty table; `kind` names the object in error messages.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Handle, Arc<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an object and return its new handle.
    pub fn insert(&self, value: T) -> Handle {
        self.insert_arc(Arc::new(value))
    }

    /// Register a shared object and return its new handle.
    pub fn insert_arc(&self, value: Arc<T>) -> Handle {
        let handle = loop {
            if let Some(h) = Handle::from_raw(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)) {
                break h;
            }
        };
        self.lock().insert(handle, value);
        handle
    }

    /// Look up a live object.
    pub fn get(&self, handle: Handle) -> Result<Arc<T>> {
        self.lock()
            .get(&handle)
            .cloned()
            .ok_or_else(|| self.invalid(handle))
    }

    /// Remove an object. Fails if the handle is unknown or already removed.
    pub fn remove(&self, handle: Handle) -> Result<Arc<T>> {
        self.lock().remove(&handle).ok_or_else(|| self.invalid(handle))
    }

    /// Remove every object matching `pred`, returning them.
    pub fn remove_where(&self, mut pred: impl FnMut(&T) -> bool) -> Vec<Arc<T>> {
        let mut entries = self.lock();
        let doomed: Vec<Handle> = entries
            .iter()
            .filter(|(_, value)| pred(value))
            .map(|(handle, _)| *handle)
            .collect();
        doomed
            .into_iter()
            .filter_map(|handle| entries.remove(&handle))
            .collect()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every object.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn invalid(&self, handle: Handle) -> EngineError {
        EngineError::Input(format!("Invalid {} handle: {}", self.kind, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let table = HandleTable::new("entry list");
        let h = table.insert(7u32);
        assert_eq!(*table.get(h).unwrap(), 7);
        assert_eq!(table.len(), 1);

        table.remove(h).unwrap();
        assert!(table.is_empty());
        assert!(matches!(table.get(h), Err(EngineError::Input(_))));
        assert!(matches!(table.remove(h), Err(EngineError::Input(_))));
    }

    #[test]
    fn test_remove_where() {
        let table = HandleTable::new("number");
        let odd = table.insert(1u32);
        let even = table.insert(2u32);
        table.insert(3u32);

        let removed = table.remove_where(|n| n % 2 == 1);
        assert_eq!(removed.len(), 2);
        assert_eq!(table.len(), 1);
        assert!(table.get(odd).is_err());
        assert_eq!(*table.get(even).unwrap(), 2);
    }

    #[test]
    fn test_handles_unique_across_tables() {
        let a = HandleTable::new("a");
        let b = HandleTable::new("b");
        let ha = a.insert(());
        let hb = b.insert(());
        assert_ne!(ha, hb);
        assert!(b.get(ha).is_err());
    }
}
