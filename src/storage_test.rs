use std::cell::RefCell;

use super::*;
use crate::memory::MemoryArea;

/// Backend with only the required methods, so `keys` uses the index walk.
#[derive(Default)]
struct Slots(RefCell<Vec<(String, String)>>);

impl Storage for Slots {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.0.borrow().iter().find(|(k, _)| k == key).map(|(_, v)| v.clone()))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.remove_item(key)?;
        self.0.borrow_mut().push((key.to_owned(), value.to_owned()));
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.0.borrow_mut().retain(|(k, _)| k != key);
        Ok(())
    }

    fn length(&self) -> Result<usize, StorageError> {
        Ok(self.0.borrow().len())
    }

    fn key(&self, index: usize) -> Result<Option<String>, StorageError> {
        Ok(self.0.borrow().get(index).map(|(k, _)| k.clone()))
    }
}

#[test]
fn default_keys_walks_ordinal_indices() {
    let slots = Slots::default();
    slots.set_item("app:b", "1").expect("write");
    slots.set_item("x", "2").expect("write");
    slots.set_item("app:a", "3").expect("write");
    assert_eq!(slots.keys().expect("keys"), ["app:b", "x", "app:a"]);
    assert_eq!(keys_with_prefix(&slots, "app:").expect("enumerate"), ["app:b", "app:a"]);
}

#[test]
fn keys_with_prefix_filters_by_prefix() {
    let area = MemoryArea::new();
    let ctx = area.context();
    ctx.set_item("app:theme", "\"dark\"").expect("write");
    ctx.set_item("app:layout", "{}").expect("write");
    ctx.set_item("other", "1").expect("write");

    let mut keys = keys_with_prefix(&ctx, "app:").expect("enumerate");
    keys.sort();
    assert_eq!(keys, vec!["app:layout".to_owned(), "app:theme".to_owned()]);
}

#[test]
fn keys_with_prefix_empty_prefix_matches_all() {
    let area = MemoryArea::new();
    let ctx = area.context();
    ctx.set_item("a", "1").expect("write");
    ctx.set_item("b", "2").expect("write");
    assert_eq!(keys_with_prefix(&ctx, "").expect("enumerate").len(), 2);
}

#[test]
fn keys_with_prefix_propagates_backend_errors() {
    let area = MemoryArea::new();
    let ctx = area.context();
    area.set_disabled(true);
    assert!(matches!(
        keys_with_prefix(&ctx, "x"),
        Err(StorageError::Unavailable(_))
    ));
}

#[test]
fn namespaced_key_joins_with_colon() {
    assert_eq!(namespaced_key("settings", "theme"), "settings:theme");
    assert_eq!(namespaced_key("", "theme"), ":theme");
}

#[test]
fn storage_change_default_is_a_clear() {
    let change = StorageChange::default();
    assert_eq!(change.key, None);
    assert_eq!(change.new_value, None);
    assert_eq!(change.old_value, None);
}
