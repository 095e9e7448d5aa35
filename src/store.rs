//! Persistent reactive store.
//!
//! DESIGN
//! ======
//! A `ReaperStore<T>` holds one value, mirrors it into a storage slot named
//! by its key, and adopts values written to that slot by other contexts.
//! Handles are cheap `Rc` clones of one shared interior.
//!
//! Every observable change (wholesale `set`, in-place mutation through
//! `update` or a view, adoption of an external value) bumps the version by
//! exactly one and notifies subscribers. Local changes re-persist the whole
//! root value; adopted values are never written back, so two contexts do
//! not echo each other's writes.
//!
//! ERROR HANDLING
//! ==============
//! Persistence is best-effort. Failed reads or decodes at construction fall
//! back to the initial value without persisting it. Failed writes are
//! logged and the in-memory change stands; there is no retry.
//!
//! No `RefCell` borrow of the value is held while calling storage or
//! observers, so observers may read and write the store re-entrantly.

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;

use std::cell::{Cell, Ref, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use crate::codec::Codec;
use crate::error::StoreError;
use crate::options::{Options, SyncPolicy};
use crate::storage::{Backend, ListenerId, StorageChange, keys_with_prefix, namespaced_key};
use crate::subscription::{ObserverList, Subscription};
use crate::view::{View, ViewCache};

/// Shared interior of a store. Views hold it strongly; subscriptions and the
/// storage listener hold it weakly.
pub(crate) struct StoreInner<T: 'static> {
    key: String,
    backend: Rc<dyn Backend>,
    codec: Codec<T>,
    sync: SyncPolicy,
    state: RefCell<T>,
    version: Cell<u64>,
    generation: Cell<u64>,
    pub(crate) views: ViewCache,
    observers: ObserverList,
    listener: Cell<Option<ListenerId>>,
    destroyed: Cell<bool>,
    this: Weak<StoreInner<T>>,
}

impl<T: 'static> StoreInner<T> {
    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.get()
    }

    pub(crate) fn state(&self) -> Ref<'_, T> {
        self.state.borrow()
    }

    /// Mutate the value in place, then bump, persist, and notify.
    ///
    /// `f` may restructure any nested composite, so every JSON view is
    /// detached.
    pub(crate) fn mutate<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let out = f(&mut self.state.borrow_mut());
        self.views.invalidate_json_views();
        self.commit_local();
        out
    }

    /// Like [`mutate`](Self::mutate), but the caller has already detached
    /// whatever views the change affects.
    pub(crate) fn mutate_in_place<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let out = f(&mut self.state.borrow_mut());
        self.commit_local();
        out
    }

    /// Bookkeeping shared by every local change.
    fn commit_local(&self) {
        let version = self.bump();
        self.persist();
        self.observers.notify(version);
    }

    fn bump(&self) -> u64 {
        let version = self.version.get() + 1;
        self.version.set(version);
        version
    }

    /// Swap in a new value and start a new generation of views.
    fn replace(&self, value: T) {
        *self.state.borrow_mut() = value;
        self.generation.set(self.generation.get() + 1);
        self.views.invalidate_all();
    }

    fn persist(&self) {
        let encoded = self.codec.encode(&self.state.borrow());
        let text = match encoded {
            Ok(text) => text,
            Err(e) => {
                error!(key = %self.key, error = %e, "failed to encode store value");
                return;
            }
        };
        if let Err(e) = self.backend.set_item(&self.key, &text) {
            error!(key = %self.key, error = %e, "failed to persist store");
        }
    }

    fn detach_listener(&self) {
        if let Some(id) = self.listener.take() {
            self.backend.remove_listener(id);
            debug!(key = %self.key, listener = id.0, "storage listener detached");
        }
    }

    fn unsubscribe(&self, id: u64) {
        let Some(remaining) = self.observers.remove(id) else {
            return;
        };
        if remaining == 0 && self.sync == SyncPolicy::WhileObserved {
            self.detach_listener();
        }
    }
}

impl<T: PartialEq + 'static> StoreInner<T> {
    fn attach_listener(&self) {
        if self.listener.get().is_some() || self.destroyed.get() {
            return;
        }
        let weak = self.this.clone();
        let id = self.backend.add_listener(Rc::new(move |change: &StorageChange| {
            if let Some(inner) = weak.upgrade() {
                inner.reconcile(change);
            }
        }));
        self.listener.set(Some(id));
        debug!(key = %self.key, listener = id.0, "storage listener attached");
    }

    /// Adopt a value another context wrote to this store's slot.
    fn reconcile(&self, change: &StorageChange) {
        if change.key.as_deref() != Some(self.key.as_str()) {
            return;
        }
        let Some(text) = change.new_value.as_deref() else {
            return;
        };
        let incoming = match self.codec.decode(text) {
            Ok(value) => value,
            Err(e) => {
                error!(key = %self.key, error = %e, "failed to handle storage change");
                return;
            }
        };
        if *self.state.borrow() == incoming {
            return;
        }
        self.replace(incoming);
        let version = self.bump();
        debug!(key = %self.key, version, "adopted value from another context");
        self.observers.notify(version);
    }
}

impl<T: 'static> Drop for StoreInner<T> {
    fn drop(&mut self) {
        self.detach_listener();
    }
}

/// A reactive value persisted under one storage key.
///
/// Cloning a `ReaperStore` creates a new handle to the **same** store.
pub struct ReaperStore<T: 'static> {
    inner: Rc<StoreInner<T>>,
}

impl<T: 'static> Clone for ReaperStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug + 'static> std::fmt::Debug for ReaperStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaperStore")
            .field("key", &self.inner.key)
            .field("value", &*self.inner.state.borrow())
            .field("version", &self.inner.version.get())
            .field("listening", &self.inner.listener.get().is_some())
            .finish_non_exhaustive()
    }
}

impl<T> ReaperStore<T>
where
    T: Serialize + DeserializeOwned + PartialEq + 'static,
{
    /// Open `key` with the JSON codec, adopting any stored value.
    ///
    /// If the slot is empty, `initial` is adopted and persisted.
    pub fn new(backend: Rc<dyn Backend>, key: impl Into<String>, initial: T) -> Self {
        Self::with_options(backend, key, initial, Options::new())
    }
}

impl<T: PartialEq + 'static> ReaperStore<T> {
    /// Open `key`, adopting any stored value.
    ///
    /// If the slot is empty, `initial` is adopted and persisted immediately.
    /// If the slot cannot be read or decoded, the failure is logged and
    /// `initial` is used in memory without touching the slot.
    pub fn with_options(
        backend: Rc<dyn Backend>,
        key: impl Into<String>,
        initial: T,
        options: Options<T>,
    ) -> Self {
        let key = key.into();
        let (value, fresh) = match read_slot(backend.as_ref(), &key, &options.codec) {
            Ok(Some(stored)) => (stored, false),
            Ok(None) => (initial, true),
            Err(e) => {
                error!(key = %key, error = %e, "failed to initialize store; using initial value");
                (initial, false)
            }
        };
        let store = Self::assemble(backend, key, value, options);
        if fresh {
            store.inner.persist();
        }
        store
    }

    /// Open an existing slot. Returns `None` if the slot is absent or cannot
    /// be decoded; never creates the slot.
    pub fn load_existing(
        backend: Rc<dyn Backend>,
        key: impl Into<String>,
        options: Options<T>,
    ) -> Option<Self> {
        let key = key.into();
        match read_slot(backend.as_ref(), &key, &options.codec) {
            Ok(Some(value)) => Some(Self::assemble(backend, key, value, options)),
            Ok(None) => {
                warn!(key = %key, "key not found in storage");
                None
            }
            Err(e) => {
                error!(key = %key, error = %e, "failed to load store from storage");
                None
            }
        }
    }

    /// Open every slot whose key starts with `prefix`, keyed by full key.
    ///
    /// Slots that cannot be read or decoded are skipped with a warning.
    pub fn load_all_with_prefix(
        backend: Rc<dyn Backend>,
        prefix: &str,
        options: Options<T>,
    ) -> BTreeMap<String, Self> {
        let keys = match keys_with_prefix(backend.as_ref(), prefix) {
            Ok(keys) => keys,
            Err(e) => {
                error!(prefix, error = %e, "failed to enumerate storage");
                return BTreeMap::new();
            }
        };

        let mut stores = BTreeMap::new();
        for key in keys {
            match read_slot(backend.as_ref(), &key, &options.codec) {
                Ok(Some(value)) => {
                    let store = Self::assemble(Rc::clone(&backend), key.clone(), value, options.clone());
                    stores.insert(key, store);
                }
                // Removed between enumeration and read.
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "skipping unreadable store"),
            }
        }
        stores
    }

    /// Open `"{prefix}:{key}"`; otherwise identical to [`with_options`](Self::with_options).
    pub fn create_namespaced(
        backend: Rc<dyn Backend>,
        prefix: &str,
        key: &str,
        initial: T,
        options: Options<T>,
    ) -> Self {
        Self::with_options(backend, namespaced_key(prefix, key), initial, options)
    }

    fn assemble(backend: Rc<dyn Backend>, key: String, value: T, options: Options<T>) -> Self {
        let inner = Rc::new_cyclic(|this| StoreInner {
            key,
            backend,
            codec: options.codec,
            sync: options.sync,
            state: RefCell::new(value),
            version: Cell::new(0),
            generation: Cell::new(0),
            views: ViewCache::default(),
            observers: ObserverList::default(),
            listener: Cell::new(None),
            destroyed: Cell::new(false),
            this: this.clone(),
        });
        if inner.sync == SyncPolicy::Eager {
            inner.attach_listener();
        }
        Self { inner }
    }

    /// Register `observer`, called with the new version after every change.
    ///
    /// Under [`SyncPolicy::WhileObserved`] the first live subscription
    /// attaches the cross-context listener and dropping the last one
    /// detaches it.
    pub fn subscribe(&self, observer: impl Fn(u64) + 'static) -> Subscription {
        let (id, count) = self.inner.observers.insert(Rc::new(observer));
        if count == 1 && self.inner.sync == SyncPolicy::WhileObserved {
            self.inner.attach_listener();
        }
        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.unsubscribe(id);
            }
        })
    }
}

impl<T: 'static> ReaperStore<T> {
    /// Storage key of this store.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Current version; starts at 0 and grows by one per observable change.
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// Generation of the held value; grows on each wholesale replacement.
    pub fn generation(&self) -> u64 {
        self.inner.generation.get()
    }

    /// Clone of the current value.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.inner.state.borrow().clone()
    }

    /// Borrow the current value for the duration of `f`.
    ///
    /// # Panics
    ///
    /// Panics if `f` writes to this store.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.state.borrow())
    }

    /// Reactive view of the current value.
    ///
    /// Repeated calls return the same view until the value is replaced
    /// wholesale.
    pub fn view(&self) -> View<T> {
        View::root(&self.inner)
    }

    /// Replace the value wholesale, persist it, and notify observers.
    ///
    /// Views issued before the call become stale.
    pub fn set(&self, value: T) {
        self.inner.replace(value);
        self.inner.commit_local();
    }

    /// Mutate the value in place, persist the whole value, and notify
    /// observers. Root views and projections stay valid; JSON views are
    /// detached, since `f` may have moved what they pointed at.
    ///
    /// # Panics
    ///
    /// Panics if `f` accesses this store.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.inner.mutate(f)
    }

    /// Number of live subscriptions.
    pub fn listener_count(&self) -> usize {
        self.inner.observers.len()
    }

    /// Whether the cross-context listener is currently attached.
    pub fn is_listening(&self) -> bool {
        self.inner.listener.get().is_some()
    }

    /// Stop listening for cross-context changes. Idempotent.
    ///
    /// The store stays readable and writable; it just no longer adopts
    /// values written by other contexts.
    pub fn destroy(&self) {
        self.inner.destroyed.set(true);
        self.inner.detach_listener();
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    #[cfg(test)]
    pub(crate) fn views(&self) -> &ViewCache {
        &self.inner.views
    }
}

fn read_slot<T>(backend: &dyn Backend, key: &str, codec: &Codec<T>) -> Result<Option<T>, StoreError> {
    let Some(text) = backend.get_item(key)? else {
        return Ok(None);
    };
    Ok(Some(codec.decode(&text)?))
}
