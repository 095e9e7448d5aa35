//! Storage and change-notification protocols.
//!
//! DESIGN
//! ======
//! A backend is a synchronous string-to-string area addressable by key and
//! enumerable by ordinal index (the shape of the browser `Storage` API), plus
//! a change feed that pushes [`StorageChange`] events whenever *another*
//! context writes to the same area. Stores hold backends as
//! `Rc<dyn Backend>` so production (`localStorage`) and in-memory areas are
//! interchangeable.

#[cfg(test)]
#[path = "storage_test.rs"]
mod storage_test;

use std::rc::Rc;

use crate::error::StorageError;

/// Synchronous key/value storage area.
pub trait Storage {
    /// Read the text stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the area cannot be read.
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous text.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::QuotaExceeded`] when the area is full and
    /// [`StorageError::Unavailable`] when writes are blocked.
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove the slot for `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the area cannot be written.
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    /// Number of slots in the area.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the area cannot be read.
    fn length(&self) -> Result<usize, StorageError>;

    /// Key of the slot at ordinal `index`, or `None` past the end.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the area cannot be read.
    fn key(&self, index: usize) -> Result<Option<String>, StorageError>;

    /// Every key in ordinal order. Backends that can snapshot their keys
    /// directly should override the index walk.
    ///
    /// # Errors
    ///
    /// Returns the first [`StorageError`] raised while enumerating.
    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let len = self.length()?;
        let mut keys = Vec::with_capacity(len);
        for index in 0..len {
            if let Some(key) = self.key(index)? {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

/// A write performed by another context on the shared area.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StorageChange {
    /// Changed key, or `None` when the whole area was cleared.
    pub key: Option<String>,
    /// Text now stored, or `None` when the slot was removed.
    pub new_value: Option<String>,
    /// Text stored before the write, if any.
    pub old_value: Option<String>,
}

/// Handle identifying a registered change listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// Callback invoked for each cross-context change.
pub type ChangeListener = Rc<dyn Fn(&StorageChange)>;

/// Push feed of cross-context storage changes.
pub trait ChangeFeed {
    /// Register `listener`; it stays registered until removed.
    fn add_listener(&self, listener: ChangeListener) -> ListenerId;

    /// Unregister a listener. Returns `false` if it was not registered.
    fn remove_listener(&self, id: ListenerId) -> bool;
}

/// A storage area with its change feed.
pub trait Backend: Storage + ChangeFeed {}

impl<B: Storage + ChangeFeed + ?Sized> Backend for B {}

/// Collect every key in `storage` that starts with `prefix`.
///
/// Keys are snapshotted before returning, so callers may write to the area
/// while iterating the result.
///
/// # Errors
///
/// Returns the first [`StorageError`] raised while enumerating.
pub fn keys_with_prefix<S: Storage + ?Sized>(
    storage: &S,
    prefix: &str,
) -> Result<Vec<String>, StorageError> {
    let mut keys = storage.keys()?;
    keys.retain(|key| key.starts_with(prefix));
    Ok(keys)
}

/// Join a namespace prefix and key as `prefix:key`.
#[must_use]
pub fn namespaced_key(prefix: &str, key: &str) -> String {
    format!("{prefix}:{key}")
}
