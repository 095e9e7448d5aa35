//! Reactive views over a store's value.
//!
//! DESIGN
//! ======
//! A view is an owned handle for reading and mutating the held value (or a
//! nested part of it). Every mutation through a view bumps the store version
//! once and re-persists the whole root value.
//!
//! Views are cached per store, keyed by a path token:
//!
//! | Token | View |
//! |-------|------|
//! | `""` | [`View`] of the root value |
//! | `"#label"` | [`Projection`] of a typed field |
//! | `"json:/a/b"` | [`JsonView`] of a composite inside a `serde_json::Value` |
//!
//! The cache holds views weakly, so a view lives as long as some caller holds
//! it; while it does, repeated lookups return the same `Rc`. Replacing the
//! value wholesale detaches every cached view and starts a new generation.
//! Replacing a composite child through a [`JsonView`] detaches the views at
//! and below that child. Closure mutations can reshape anything beneath the
//! node they run on, so they detach every JSON view beneath it.

#[cfg(test)]
#[path = "view_test.rs"]
mod view_test;

use std::any::Any;
use std::cell::{Cell, Ref, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::error::StoreError;
use crate::store::StoreInner;

const ROOT_TOKEN: &str = "";

/// A cached view that can be invalidated without knowing its concrete type.
pub(crate) trait CachedView: Any {
    fn detach(&self);
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

/// Weak, path-keyed registry of issued views.
#[derive(Default)]
pub(crate) struct ViewCache {
    entries: RefCell<HashMap<String, Weak<dyn CachedView>>>,
}

impl ViewCache {
    fn lookup<V: CachedView>(&self, token: &str) -> Option<Rc<V>> {
        let view = self.entries.borrow().get(token)?.upgrade()?;
        match view.into_any().downcast::<V>() {
            Ok(view) => Some(view),
            Err(_) => None,
        }
    }

    fn insert<V: CachedView>(&self, token: String, view: &Rc<V>) {
        let weak: Weak<dyn CachedView> = Rc::downgrade(view) as Weak<dyn CachedView>;
        let replaced = {
            let mut entries = self.entries.borrow_mut();
            entries.retain(|_, entry| entry.strong_count() > 0);
            entries.insert(token, weak)
        };
        // A label reused for another field type evicts the old projection.
        if let Some(view) = replaced.and_then(|entry| entry.upgrade()) {
            view.detach();
        }
    }

    /// Detach and forget every cached view.
    pub(crate) fn invalidate_all(&self) {
        let drained: Vec<_> = self.entries.borrow_mut().drain().collect();
        for (_, entry) in drained {
            if let Some(view) = entry.upgrade() {
                view.detach();
            }
        }
    }

    /// Detach every JSON view, root included.
    pub(crate) fn invalidate_json_views(&self) {
        self.invalidate_below(&json_token(ROOT_TOKEN));
    }

    /// Detach views whose token is `token` or lies beneath it.
    fn invalidate_below(&self, token: &str) {
        let nested = format!("{token}/");
        self.invalidate_where(|key| key == token || key.starts_with(&nested));
    }

    /// Detach views strictly beneath `token`.
    fn invalidate_children(&self, token: &str) {
        let nested = format!("{token}/");
        self.invalidate_where(|key| key.starts_with(&nested));
    }

    fn invalidate_where(&self, hit: impl Fn(&str) -> bool) {
        let mut removed = Vec::new();
        self.entries.borrow_mut().retain(|key, entry| {
            if hit(key) {
                removed.push(entry.clone());
                return false;
            }
            true
        });
        for entry in removed {
            if let Some(view) = entry.upgrade() {
                view.detach();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn live_len(&self) -> usize {
        self.entries
            .borrow()
            .values()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }
}

/// Validity shared by every view kind.
struct Issued {
    generation: u64,
    detached: Cell<bool>,
}

impl Issued {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            detached: Cell::new(false),
        }
    }

    fn check<T: 'static>(&self, store: &Rc<StoreInner<T>>) -> Result<(), StoreError> {
        let current = store.generation();
        if self.detached.get() || self.generation != current {
            return Err(StoreError::StaleView {
                key: store.key().to_owned(),
                issued: self.generation,
                current,
            });
        }
        Ok(())
    }

    fn is_stale<T: 'static>(&self, store: &Rc<StoreInner<T>>) -> bool {
        self.check(store).is_err()
    }
}

// =============================================================================
// ROOT VIEW
// =============================================================================

struct ViewCore<T: 'static> {
    store: Rc<StoreInner<T>>,
    issued: Issued,
}

impl<T: 'static> CachedView for ViewCore<T> {
    fn detach(&self) {
        self.issued.detached.set(true);
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// View of a store's whole value.
///
/// Cloning a `View` creates a new handle to the **same** view.
pub struct View<T: 'static> {
    core: Rc<ViewCore<T>>,
}

impl<T: 'static> Clone for View<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: 'static> std::fmt::Debug for View<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("key", &self.core.store.key())
            .field("generation", &self.core.issued.generation)
            .field("stale", &self.is_stale())
            .finish()
    }
}

impl<T: 'static> View<T> {
    pub(crate) fn root(store: &Rc<StoreInner<T>>) -> Self {
        if let Some(core) = store.views.lookup::<ViewCore<T>>(ROOT_TOKEN) {
            if !core.issued.is_stale(store) {
                return Self { core };
            }
        }
        let core = Rc::new(ViewCore {
            store: Rc::clone(store),
            issued: Issued::new(store.generation()),
        });
        store.views.insert(ROOT_TOKEN.to_owned(), &core);
        Self { core }
    }

    /// Whether both handles refer to the same view.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.core, &b.core)
    }

    /// Generation this view was issued for.
    pub fn generation(&self) -> u64 {
        self.core.issued.generation
    }

    /// Whether the value has been replaced since this view was issued.
    pub fn is_stale(&self) -> bool {
        self.core.issued.is_stale(&self.core.store)
    }

    /// Borrow the value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StaleView`] if the value was replaced wholesale.
    pub fn get_ref(&self) -> Result<Ref<'_, T>, StoreError> {
        self.core.issued.check(&self.core.store)?;
        Ok(self.core.store.state())
    }

    /// Run `f` with the value borrowed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StaleView`] if the value was replaced wholesale.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, StoreError> {
        Ok(f(&*self.get_ref()?))
    }

    /// Clone of the value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StaleView`] if the value was replaced wholesale.
    pub fn get(&self) -> Result<T, StoreError>
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Mutate the value in place; bumps the version once and persists the
    /// whole value. JSON views issued from this store are detached.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StaleView`] if the value was replaced wholesale.
    ///
    /// # Panics
    ///
    /// Panics if a [`get_ref`](Self::get_ref) borrow is still alive or `f`
    /// accesses the store.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, StoreError> {
        self.core.issued.check(&self.core.store)?;
        Ok(self.core.store.mutate(f))
    }

    /// View of one field, cached under `label`.
    ///
    /// Labels identify projections: asking twice for the same label returns
    /// the same projection, whatever accessors are passed the second time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StaleView`] if the value was replaced wholesale.
    pub fn project<U: 'static>(
        &self,
        label: &str,
        get: fn(&T) -> &U,
        get_mut: fn(&mut T) -> &mut U,
    ) -> Result<Projection<T, U>, StoreError> {
        let store = &self.core.store;
        self.core.issued.check(store)?;
        let token = format!("#{label}");
        if let Some(core) = store.views.lookup::<ProjectionCore<T, U>>(&token) {
            if !core.issued.is_stale(store) {
                return Ok(Projection { core });
            }
        }
        let core = Rc::new(ProjectionCore {
            store: Rc::clone(store),
            issued: Issued::new(store.generation()),
            label: label.to_owned(),
            get,
            get_mut,
        });
        store.views.insert(token, &core);
        Ok(Projection { core })
    }
}

// =============================================================================
// TYPED PROJECTIONS
// =============================================================================

struct ProjectionCore<T: 'static, U: 'static> {
    store: Rc<StoreInner<T>>,
    issued: Issued,
    label: String,
    get: fn(&T) -> &U,
    get_mut: fn(&mut T) -> &mut U,
}

impl<T: 'static, U: 'static> CachedView for ProjectionCore<T, U> {
    fn detach(&self) {
        self.issued.detached.set(true);
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// View of one field of a store's value.
pub struct Projection<T: 'static, U: 'static> {
    core: Rc<ProjectionCore<T, U>>,
}

impl<T: 'static, U: 'static> Clone for Projection<T, U> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: 'static, U: 'static> std::fmt::Debug for Projection<T, U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Projection")
            .field("key", &self.core.store.key())
            .field("label", &self.core.label)
            .field("stale", &self.is_stale())
            .finish()
    }
}

impl<T: 'static, U: 'static> Projection<T, U> {
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.core, &b.core)
    }

    pub fn label(&self) -> &str {
        &self.core.label
    }

    pub fn is_stale(&self) -> bool {
        self.core.issued.is_stale(&self.core.store)
    }

    /// Run `f` with the field borrowed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StaleView`] if the value was replaced wholesale.
    pub fn with<R>(&self, f: impl FnOnce(&U) -> R) -> Result<R, StoreError> {
        self.core.issued.check(&self.core.store)?;
        let state = self.core.store.state();
        Ok(f((self.core.get)(&state)))
    }

    /// Clone of the field.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StaleView`] if the value was replaced wholesale.
    pub fn get(&self) -> Result<U, StoreError>
    where
        U: Clone,
    {
        self.with(U::clone)
    }

    /// Mutate the field in place; persists the whole root value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StaleView`] if the value was replaced wholesale.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut U) -> R) -> Result<R, StoreError> {
        self.core.issued.check(&self.core.store)?;
        let get_mut = self.core.get_mut;
        Ok(self.core.store.mutate(|root| f(get_mut(root))))
    }

    /// Overwrite the field; persists the whole root value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StaleView`] if the value was replaced wholesale.
    pub fn set(&self, value: U) -> Result<(), StoreError> {
        self.mutate(|field| *field = value)
    }
}

// =============================================================================
// DYNAMIC JSON VIEWS
// =============================================================================

/// Result of walking into a JSON value.
#[derive(Debug, Clone)]
pub enum Entry {
    /// An object or array, wrapped so its mutations are tracked.
    Composite(JsonView),
    /// A scalar (string, number, bool, null), passed through unwrapped.
    Scalar(Value),
}

impl Entry {
    pub fn into_composite(self) -> Option<JsonView> {
        match self {
            Self::Composite(view) => Some(view),
            Self::Scalar(_) => None,
        }
    }

    pub fn into_scalar(self) -> Option<Value> {
        match self {
            Self::Composite(_) => None,
            Self::Scalar(value) => Some(value),
        }
    }
}

struct JsonCore {
    store: Rc<StoreInner<Value>>,
    issued: Issued,
    pointer: String,
}

impl CachedView for JsonCore {
    fn detach(&self) {
        self.issued.detached.set(true);
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// View of an object or array inside a `serde_json::Value` store, addressed
/// by JSON pointer.
#[derive(Clone)]
pub struct JsonView {
    core: Rc<JsonCore>,
}

impl std::fmt::Debug for JsonView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonView")
            .field("key", &self.core.store.key())
            .field("pointer", &self.core.pointer)
            .field("stale", &self.is_stale())
            .finish()
    }
}

fn json_token(pointer: &str) -> String {
    format!("json:{pointer}")
}

/// Escape one reference token per RFC 6901.
fn escape_token(field: &str) -> String {
    field.replace('~', "~0").replace('/', "~1")
}

/// Resolve `pointer` against the current value, wrapping composites.
fn resolve(store: &Rc<StoreInner<Value>>, pointer: &str) -> Result<Entry, StoreError> {
    {
        let state = store.state();
        match state.pointer(pointer) {
            None => {
                return Err(StoreError::PathNotFound {
                    key: store.key().to_owned(),
                    path: pointer.to_owned(),
                });
            }
            Some(found) if !(found.is_object() || found.is_array()) => {
                return Ok(Entry::Scalar(found.clone()));
            }
            Some(_) => {}
        }
    }

    let token = json_token(pointer);
    if let Some(core) = store.views.lookup::<JsonCore>(&token) {
        if !core.issued.is_stale(store) {
            return Ok(Entry::Composite(JsonView { core }));
        }
    }
    let core = Rc::new(JsonCore {
        store: Rc::clone(store),
        issued: Issued::new(store.generation()),
        pointer: pointer.to_owned(),
    });
    store.views.insert(token, &core);
    Ok(Entry::Composite(JsonView { core }))
}

impl View<Value> {
    /// Walk a JSON pointer (`""` is the root) from the store's value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StaleView`] for a replaced value and
    /// [`StoreError::PathNotFound`] when the pointer does not resolve.
    pub fn entry(&self, pointer: &str) -> Result<Entry, StoreError> {
        self.core.issued.check(&self.core.store)?;
        resolve(&self.core.store, pointer)
    }
}

/// Parse an RFC 6901 array index: digits only, no leading zero.
fn array_index(field: &str) -> Option<usize> {
    let canonical = !field.is_empty()
        && field.bytes().all(|b| b.is_ascii_digit())
        && (field == "0" || !field.starts_with('0'));
    if !canonical {
        return None;
    }
    match field.parse() {
        Ok(index) => Some(index),
        Err(_) => None,
    }
}

enum Slot {
    Field(String),
    Index(usize),
    Append,
}

impl JsonView {
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.core, &b.core)
    }

    /// JSON pointer of this view from the root.
    pub fn pointer(&self) -> &str {
        &self.core.pointer
    }

    pub fn is_stale(&self) -> bool {
        self.core.issued.is_stale(&self.core.store)
    }

    fn check(&self) -> Result<(), StoreError> {
        self.core.issued.check(&self.core.store)
    }

    fn not_found(&self, path: String) -> StoreError {
        StoreError::PathNotFound {
            key: self.core.store.key().to_owned(),
            path,
        }
    }

    fn child_pointer(&self, field: &str) -> String {
        format!("{}/{}", self.core.pointer, escape_token(field))
    }

    /// Run `f` with the composite borrowed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StaleView`] or [`StoreError::PathNotFound`].
    pub fn with<R>(&self, f: impl FnOnce(&Value) -> R) -> Result<R, StoreError> {
        self.check()?;
        let state = self.core.store.state();
        let node = state
            .pointer(&self.core.pointer)
            .ok_or_else(|| self.not_found(self.core.pointer.clone()))?;
        Ok(f(node))
    }

    /// Clone of the composite.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StaleView`] or [`StoreError::PathNotFound`].
    pub fn get(&self) -> Result<Value, StoreError> {
        self.with(Value::clone)
    }

    /// Read a child: composites come back wrapped, scalars unwrapped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StaleView`] or [`StoreError::PathNotFound`].
    pub fn entry(&self, field: &str) -> Result<Entry, StoreError> {
        self.check()?;
        resolve(&self.core.store, &self.child_pointer(field))
    }

    /// Work out where `field` lands in this composite.
    fn slot(&self, field: &str, for_insert: bool) -> Result<Slot, StoreError> {
        self.with(|node| match node {
            Value::Object(map) if for_insert || map.contains_key(field) => {
                Ok(Slot::Field(field.to_owned()))
            }
            Value::Object(_) => Err(self.not_found(self.child_pointer(field))),
            Value::Array(items) => {
                if for_insert && field == "-" {
                    return Ok(Slot::Append);
                }
                match array_index(field) {
                    Some(index) if index < items.len() => Ok(Slot::Index(index)),
                    Some(index) if for_insert && index == items.len() => Ok(Slot::Append),
                    _ => Err(self.not_found(self.child_pointer(field))),
                }
            }
            _ => Err(StoreError::NotComposite {
                path: self.core.pointer.clone(),
            }),
        })?
    }

    /// Mutate the composite in place; persists the whole root value.
    ///
    /// `f` may move or replace anything below this node, so views of
    /// descendants are detached. This view stays valid.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StaleView`] or [`StoreError::PathNotFound`].
    pub fn mutate<R>(&self, f: impl FnOnce(&mut Value) -> R) -> Result<R, StoreError> {
        self.with(|_| ())?;
        self.core
            .store
            .views
            .invalidate_children(&json_token(&self.core.pointer));
        self.edit(f)
    }

    /// Apply `f` to this node without touching the view cache.
    fn edit<R>(&self, f: impl FnOnce(&mut Value) -> R) -> Result<R, StoreError> {
        let pointer = self.core.pointer.clone();
        self.core
            .store
            .mutate_in_place(|root| root.pointer_mut(&pointer).map(f))
            .ok_or_else(|| self.not_found(pointer.clone()))
    }

    /// Write `value` into field `field` (object key, array index, or `-`
    /// to append). A composite previously at that field is detached from
    /// its views.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StaleView`], [`StoreError::PathNotFound`] for an
    /// out-of-range index, or [`StoreError::NotComposite`].
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<(), StoreError> {
        let slot = self.slot(field, true)?;
        let value = value.into();
        if !matches!(slot, Slot::Append) {
            self.core.store.views.invalidate_below(&json_token(&self.child_pointer(field)));
        }
        self.edit(|node| match (slot, node) {
            (Slot::Field(name), Value::Object(map)) => {
                map.insert(name, value);
            }
            (Slot::Index(index), Value::Array(items)) => items[index] = value,
            (Slot::Append, Value::Array(items)) => items.push(value),
            _ => {}
        })
    }

    /// Remove field `field` and return its value. Removing an array element
    /// shifts later elements, so views of every element are detached.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StaleView`], [`StoreError::PathNotFound`] for a
    /// missing key or out-of-range index, or [`StoreError::NotComposite`].
    pub fn remove(&self, field: &str) -> Result<Option<Value>, StoreError> {
        let slot = self.slot(field, false)?;
        let token = match slot {
            Slot::Index(_) => json_token(&self.core.pointer),
            _ => json_token(&self.child_pointer(field)),
        };
        // Keep this view itself valid when shifting array children.
        if matches!(slot, Slot::Index(_)) {
            self.core.store.views.invalidate_children(&token);
        } else {
            self.core.store.views.invalidate_below(&token);
        }
        self.edit(|node| match (slot, node) {
            (Slot::Field(name), Value::Object(map)) => map.remove(&name),
            (Slot::Index(index), Value::Array(items)) => Some(items.remove(index)),
            _ => None,
        })
    }
}
