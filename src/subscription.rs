//! Explicit observer registration.
//!
//! Observers register a callback and receive a [`Subscription`] guard.
//! Dropping the guard unregisters the callback; the owning store uses the
//! live subscription count to decide whether to listen for changes made by
//! other contexts.

#[cfg(test)]
#[path = "subscription_test.rs"]
mod subscription_test;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Callback receiving the store version after each observable change.
pub type Observer = Rc<dyn Fn(u64)>;

/// RAII guard for a registered observer.
///
/// The callback stays registered until the guard is dropped or
/// [`unsubscribe`](Subscription::unsubscribe) is called.
#[must_use = "dropping a Subscription unregisters the observer immediately"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub(crate) fn new(detach: impl FnOnce() + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// Unregister now. Equivalent to dropping the guard.
    pub fn unsubscribe(mut self) {
        self.run_detach();
    }

    fn run_detach(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.detach.is_some())
            .finish()
    }
}

/// Ordered observer registry with stable ids.
#[derive(Default)]
pub(crate) struct ObserverList {
    entries: RefCell<Vec<(u64, Observer)>>,
    next_id: Cell<u64>,
}

impl ObserverList {
    /// Register `observer`, returning its id and the new observer count.
    pub(crate) fn insert(&self, observer: Observer) -> (u64, usize) {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let mut entries = self.entries.borrow_mut();
        entries.push((id, observer));
        (id, entries.len())
    }

    /// Remove `id`, returning the remaining count if it was present.
    pub(crate) fn remove(&self, id: u64) -> Option<usize> {
        let mut entries = self.entries.borrow_mut();
        let index = entries.iter().position(|(entry, _)| *entry == id)?;
        entries.remove(index);
        Some(entries.len())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Call every observer in registration order.
    ///
    /// The registry is snapshotted first, so observers may subscribe or
    /// unsubscribe while being notified.
    pub(crate) fn notify(&self, version: u64) {
        let snapshot: Vec<Observer> = self
            .entries
            .borrow()
            .iter()
            .map(|(_, observer)| Rc::clone(observer))
            .collect();
        for observer in snapshot {
            observer(version);
        }
    }
}
