//! Browser `localStorage` backend.
//!
//! SYSTEM CONTEXT
//! ==============
//! Wraps `window.localStorage` and the window `storage` event. The browser
//! fires `storage` only in *other* documents of the same origin, which is
//! exactly the cross-context feed stores need. One `wasm_bindgen` closure is
//! attached while at least one listener is registered and fans each event
//! out to the registered listeners.
//!
//! Only compiled with the `hydrate` feature.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::{debug, warn};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};

use crate::error::StorageError;
use crate::storage::{ChangeFeed, ChangeListener, ListenerId, Storage, StorageChange};

type EventClosure = Closure<dyn FnMut(web_sys::StorageEvent)>;

struct Hub {
    window: web_sys::Window,
    storage: web_sys::Storage,
    listeners: RefCell<Vec<(ListenerId, ChangeListener)>>,
    next_id: Cell<u64>,
    closure: RefCell<Option<EventClosure>>,
}

impl Hub {
    fn dispatch(&self, event: &web_sys::StorageEvent) {
        // `storage` also fires for sessionStorage; only follow our own area.
        if let Some(area) = event.storage_area() {
            if !js_sys::Object::is(&area, &self.storage) {
                return;
            }
        }
        let change = StorageChange {
            key: event.key(),
            new_value: event.new_value(),
            old_value: event.old_value(),
        };
        let snapshot: Vec<ChangeListener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(&change);
        }
    }

    fn attach(self: &Rc<Self>) {
        if self.closure.borrow().is_some() {
            return;
        }
        let weak: Weak<Hub> = Rc::downgrade(self);
        let closure = Closure::wrap(Box::new(move |event: web_sys::StorageEvent| {
            if let Some(hub) = weak.upgrade() {
                hub.dispatch(&event);
            }
        }) as Box<dyn FnMut(web_sys::StorageEvent)>);
        if self
            .window
            .add_event_listener_with_callback("storage", closure.as_ref().unchecked_ref())
            .is_ok()
        {
            debug!("window storage listener attached");
            *self.closure.borrow_mut() = Some(closure);
        }
    }

    fn detach(&self) {
        let mut slot = self.closure.borrow_mut();
        let Some(closure) = slot.as_ref() else {
            return;
        };
        let removed = self
            .window
            .remove_event_listener_with_callback("storage", closure.as_ref().unchecked_ref());
        // The window still references the callback; it must outlive the hub.
        if let Err(e) = removed {
            warn!(error = ?e, "failed to detach window storage listener");
            if let Some(closure) = slot.take() {
                closure.forget();
            }
            return;
        }
        *slot = None;
        debug!("window storage listener detached");
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.detach();
    }
}

/// `window.localStorage` with its cross-document change feed.
#[derive(Clone)]
pub struct LocalStorage {
    hub: Rc<Hub>,
}

impl LocalStorage {
    /// Open the window's `localStorage`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] outside a browser window or when
    /// storage is blocked (private browsing, security settings).
    pub fn new() -> Result<Self, StorageError> {
        let window = web_sys::window()
            .ok_or_else(|| StorageError::Unavailable("no window".to_owned()))?;
        let storage = window
            .local_storage()
            .map_err(|e| js_error(&e))?
            .ok_or_else(|| StorageError::Unavailable("localStorage is disabled".to_owned()))?;
        Ok(Self {
            hub: Rc::new(Hub {
                window,
                storage,
                listeners: RefCell::new(Vec::new()),
                next_id: Cell::new(1),
                closure: RefCell::new(None),
            }),
        })
    }
}

impl Storage for LocalStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.hub.storage.get_item(key).map_err(|e| js_error(&e))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.hub.storage.set_item(key, value).map_err(|e| {
            if is_quota_error(&e) {
                StorageError::QuotaExceeded { key: key.to_owned() }
            } else {
                js_error(&e)
            }
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.hub.storage.remove_item(key).map_err(|e| js_error(&e))
    }

    fn length(&self) -> Result<usize, StorageError> {
        let len = self.hub.storage.length().map_err(|e| js_error(&e))?;
        Ok(len as usize)
    }

    fn key(&self, index: usize) -> Result<Option<String>, StorageError> {
        let Ok(index) = u32::try_from(index) else {
            return Ok(None);
        };
        self.hub.storage.key(index).map_err(|e| js_error(&e))
    }
}

impl ChangeFeed for LocalStorage {
    fn add_listener(&self, listener: ChangeListener) -> ListenerId {
        let id = ListenerId(self.hub.next_id.get());
        self.hub.next_id.set(id.0 + 1);
        self.hub.listeners.borrow_mut().push((id, listener));
        self.hub.attach();
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let remaining = {
            let mut listeners = self.hub.listeners.borrow_mut();
            let before = listeners.len();
            listeners.retain(|(entry, _)| *entry != id);
            if listeners.len() == before {
                return false;
            }
            listeners.len()
        };
        if remaining == 0 {
            self.hub.detach();
        }
        true
    }
}

fn is_quota_error(err: &JsValue) -> bool {
    err.dyn_ref::<web_sys::DomException>()
        .is_some_and(|dom| dom.name() == "QuotaExceededError")
}

fn js_error(err: &JsValue) -> StorageError {
    if let Some(dom) = err.dyn_ref::<web_sys::DomException>() {
        if dom.name() == "SecurityError" {
            return StorageError::Unavailable(dom.message());
        }
        return StorageError::Backend(format!("{}: {}", dom.name(), dom.message()));
    }
    if let Some(error) = err.dyn_ref::<js_sys::Error>() {
        return StorageError::Backend(String::from(error.message()));
    }
    StorageError::Backend(err.as_string().unwrap_or_else(|| format!("{err:?}")))
}
