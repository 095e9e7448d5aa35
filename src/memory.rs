//! In-memory storage area shared by several simulated contexts.
//!
//! DESIGN
//! ======
//! `MemoryArea` owns the slots; each `MemoryContext` stands in for one tab
//! attached to the same origin. A write through one context queues a
//! [`StorageChange`] for every other context, never for the writer itself.
//! Queued changes are delivered by [`MemoryArea::dispatch_pending`], which
//! models the browser delivering `storage` events on a later task.
//!
//! Capacity is measured the way browsers do it: UTF-16 code units of every
//! key plus every value.

#[cfg(test)]
#[path = "memory_test.rs"]
mod memory_test;

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use tracing::debug;

use crate::error::StorageError;
use crate::storage::{ChangeFeed, ChangeListener, ListenerId, Storage, StorageChange};

/// Default capacity in UTF-16 code units (5 MiB, the common browser limit).
pub const DEFAULT_QUOTA_UNITS: usize = 5 * 1024 * 1024;

struct Registration {
    context: u64,
    id: ListenerId,
    listener: ChangeListener,
}

struct AreaShared {
    slots: RefCell<BTreeMap<String, String>>,
    quota: usize,
    disabled: Cell<bool>,
    next_context: Cell<u64>,
    next_listener: Cell<u64>,
    listeners: RefCell<Vec<Registration>>,
    pending: RefCell<VecDeque<(u64, StorageChange)>>,
    writes: Cell<u64>,
}

/// A storage area shared by every context created from it.
#[derive(Clone)]
pub struct MemoryArea {
    shared: Rc<AreaShared>,
}

impl Default for MemoryArea {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryArea")
            .field("slots", &self.shared.slots.borrow().len())
            .field("quota", &self.shared.quota)
            .field("pending", &self.shared.pending.borrow().len())
            .finish_non_exhaustive()
    }
}

impl MemoryArea {
    /// Create an empty area with [`DEFAULT_QUOTA_UNITS`] capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_quota(DEFAULT_QUOTA_UNITS)
    }

    /// Create an empty area holding at most `quota` UTF-16 code units.
    #[must_use]
    pub fn with_quota(quota: usize) -> Self {
        Self {
            shared: Rc::new(AreaShared {
                slots: RefCell::new(BTreeMap::new()),
                quota,
                disabled: Cell::new(false),
                next_context: Cell::new(1),
                next_listener: Cell::new(1),
                listeners: RefCell::new(Vec::new()),
                pending: RefCell::new(VecDeque::new()),
                writes: Cell::new(0),
            }),
        }
    }

    /// Attach a new context (one simulated tab) to this area.
    #[must_use]
    pub fn context(&self) -> MemoryContext {
        let id = self.shared.next_context.get();
        self.shared.next_context.set(id + 1);
        MemoryContext {
            shared: Rc::clone(&self.shared),
            id,
        }
    }

    /// Block or unblock every read and write, as when storage is disabled.
    pub fn set_disabled(&self, disabled: bool) {
        self.shared.disabled.set(disabled);
    }

    /// Deliver queued changes until the queue is empty.
    ///
    /// Listeners may write while being notified; the changes those writes
    /// queue are delivered in the same call. Returns the number of listener
    /// invocations.
    pub fn dispatch_pending(&self) -> usize {
        let mut delivered = 0;
        loop {
            let Some((origin, change)) = self.shared.pending.borrow_mut().pop_front() else {
                break;
            };
            let targets: Vec<ChangeListener> = self
                .shared
                .listeners
                .borrow()
                .iter()
                .filter(|r| r.context != origin)
                .map(|r| Rc::clone(&r.listener))
                .collect();
            for listener in targets {
                listener(&change);
                delivered += 1;
            }
        }
        delivered
    }

    /// Number of changes waiting for [`dispatch_pending`](Self::dispatch_pending).
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.shared.pending.borrow().len()
    }

    /// Number of listeners registered across all contexts.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.borrow().len()
    }

    /// Total successful `set_item` calls since the area was created.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.shared.writes.get()
    }

    /// Raw slot contents, bypassing the disabled flag.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<String> {
        self.shared.slots.borrow().get(key).cloned()
    }

    /// UTF-16 code units currently in use.
    #[must_use]
    pub fn used_units(&self) -> usize {
        self.shared
            .slots
            .borrow()
            .iter()
            .map(|(k, v)| utf16_len(k) + utf16_len(v))
            .sum()
    }
}

/// One context attached to a [`MemoryArea`].
#[derive(Clone)]
pub struct MemoryContext {
    shared: Rc<AreaShared>,
    id: u64,
}

impl std::fmt::Debug for MemoryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryContext").field("id", &self.id).finish_non_exhaustive()
    }
}

impl MemoryContext {
    /// Remove every slot, notifying other contexts with a key-less change.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] when the area is disabled.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.check_enabled()?;
        let had_slots = {
            let mut slots = self.shared.slots.borrow_mut();
            let had = !slots.is_empty();
            slots.clear();
            had
        };
        if had_slots {
            self.enqueue(StorageChange::default());
        }
        Ok(())
    }

    fn check_enabled(&self) -> Result<(), StorageError> {
        if self.shared.disabled.get() {
            return Err(StorageError::Unavailable("storage is disabled".to_owned()));
        }
        Ok(())
    }

    fn enqueue(&self, change: StorageChange) {
        self.shared.pending.borrow_mut().push_back((self.id, change));
    }
}

impl Storage for MemoryContext {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check_enabled()?;
        Ok(self.shared.slots.borrow().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check_enabled()?;
        let old_value = {
            let mut slots = self.shared.slots.borrow_mut();
            let used: usize = slots
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| utf16_len(k) + utf16_len(v))
                .sum();
            let needed = used + utf16_len(key) + utf16_len(value);
            if needed > self.shared.quota {
                debug!(key, needed, quota = self.shared.quota, "memory area over quota");
                return Err(StorageError::QuotaExceeded { key: key.to_owned() });
            }
            slots.insert(key.to_owned(), value.to_owned())
        };
        self.shared.writes.set(self.shared.writes.get() + 1);
        // Rewriting identical text is not a change.
        if old_value.as_deref() != Some(value) {
            self.enqueue(StorageChange {
                key: Some(key.to_owned()),
                new_value: Some(value.to_owned()),
                old_value,
            });
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.check_enabled()?;
        let removed = self.shared.slots.borrow_mut().remove(key);
        if let Some(old_value) = removed {
            self.enqueue(StorageChange {
                key: Some(key.to_owned()),
                new_value: None,
                old_value: Some(old_value),
            });
        }
        Ok(())
    }

    fn length(&self) -> Result<usize, StorageError> {
        self.check_enabled()?;
        Ok(self.shared.slots.borrow().len())
    }

    fn key(&self, index: usize) -> Result<Option<String>, StorageError> {
        self.check_enabled()?;
        Ok(self.shared.slots.borrow().keys().nth(index).cloned())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.check_enabled()?;
        Ok(self.shared.slots.borrow().keys().cloned().collect())
    }
}

impl ChangeFeed for MemoryContext {
    fn add_listener(&self, listener: ChangeListener) -> ListenerId {
        let id = ListenerId(self.shared.next_listener.get());
        self.shared.next_listener.set(id.0 + 1);
        self.shared.listeners.borrow_mut().push(Registration {
            context: self.id,
            id,
            listener,
        });
        debug!(context = self.id, listener = id.0, "memory listener added");
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|r| !(r.context == self.id && r.id == id));
        before != listeners.len()
    }
}

fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}
