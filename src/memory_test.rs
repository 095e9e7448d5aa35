use std::cell::RefCell;
use std::rc::Rc;

use super::*;

fn recorder(ctx: &MemoryContext) -> Rc<RefCell<Vec<StorageChange>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    ctx.add_listener(Rc::new(move |change: &StorageChange| {
        sink.borrow_mut().push(change.clone());
    }));
    seen
}

// =============================================================
// Slots
// =============================================================

#[test]
fn contexts_share_slots() {
    let area = MemoryArea::new();
    let a = area.context();
    let b = area.context();
    a.set_item("k", "v").expect("write");
    assert_eq!(b.get_item("k").expect("read"), Some("v".to_owned()));
}

#[test]
fn missing_key_reads_none() {
    let area = MemoryArea::new();
    assert_eq!(area.context().get_item("nope").expect("read"), None);
}

#[test]
fn keys_enumerate_by_index_in_sorted_order() {
    let area = MemoryArea::new();
    let ctx = area.context();
    ctx.set_item("b", "2").expect("write");
    ctx.set_item("a", "1").expect("write");
    assert_eq!(ctx.length().expect("len"), 2);
    assert_eq!(ctx.key(0).expect("key"), Some("a".to_owned()));
    assert_eq!(ctx.key(1).expect("key"), Some("b".to_owned()));
    assert_eq!(ctx.key(2).expect("key"), None);
}

#[test]
fn remove_item_deletes_slot() {
    let area = MemoryArea::new();
    let ctx = area.context();
    ctx.set_item("k", "v").expect("write");
    ctx.remove_item("k").expect("remove");
    assert_eq!(area.peek("k"), None);
    ctx.remove_item("k").expect("removing a missing key is fine");
}

// =============================================================
// Quota and availability
// =============================================================

#[test]
fn write_over_quota_fails_and_keeps_old_text() {
    let area = MemoryArea::with_quota(8);
    let ctx = area.context();
    ctx.set_item("k", "1234").expect("fits");
    let err = ctx.set_item("k", "123456789").expect_err("over quota");
    assert_eq!(err, StorageError::QuotaExceeded { key: "k".to_owned() });
    assert_eq!(area.peek("k"), Some("1234".to_owned()));
}

#[test]
fn quota_counts_utf16_units() {
    let area = MemoryArea::new();
    let ctx = area.context();
    // U+1F600 is two UTF-16 code units.
    ctx.set_item("k", "\u{1F600}").expect("write");
    assert_eq!(area.used_units(), 3);
}

#[test]
fn replacing_a_slot_does_not_double_count_it() {
    let area = MemoryArea::with_quota(6);
    let ctx = area.context();
    ctx.set_item("k", "abcde").expect("fits");
    ctx.set_item("k", "vwxyz").expect("replacement fits too");
}

#[test]
fn disabled_area_rejects_reads_and_writes() {
    let area = MemoryArea::new();
    let ctx = area.context();
    area.set_disabled(true);
    assert!(matches!(ctx.get_item("k"), Err(StorageError::Unavailable(_))));
    assert!(matches!(ctx.set_item("k", "v"), Err(StorageError::Unavailable(_))));
    area.set_disabled(false);
    ctx.set_item("k", "v").expect("enabled again");
}

// =============================================================
// Change feed
// =============================================================

#[test]
fn writer_does_not_see_its_own_changes() {
    let area = MemoryArea::new();
    let a = area.context();
    let b = area.context();
    let seen_a = recorder(&a);
    let seen_b = recorder(&b);

    a.set_item("k", "v").expect("write");
    assert_eq!(area.dispatch_pending(), 1);

    assert!(seen_a.borrow().is_empty());
    assert_eq!(
        seen_b.borrow().as_slice(),
        &[StorageChange {
            key: Some("k".to_owned()),
            new_value: Some("v".to_owned()),
            old_value: None,
        }]
    );
}

#[test]
fn changes_wait_for_dispatch() {
    let area = MemoryArea::new();
    let a = area.context();
    let b = area.context();
    let seen = recorder(&b);

    a.set_item("k", "1").expect("write");
    a.set_item("k", "2").expect("write");
    assert_eq!(area.pending_len(), 2);
    assert!(seen.borrow().is_empty());

    area.dispatch_pending();
    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].old_value.as_deref(), Some("1"));
    assert_eq!(seen[1].new_value.as_deref(), Some("2"));
}

#[test]
fn identical_rewrite_is_not_a_change() {
    let area = MemoryArea::new();
    let a = area.context();
    a.set_item("k", "v").expect("write");
    area.dispatch_pending();
    a.set_item("k", "v").expect("rewrite");
    assert_eq!(area.pending_len(), 0);
    assert_eq!(area.write_count(), 2);
}

#[test]
fn remove_and_clear_notify_with_missing_values() {
    let area = MemoryArea::new();
    let a = area.context();
    let b = area.context();
    let seen = recorder(&b);

    a.set_item("k", "v").expect("write");
    a.remove_item("k").expect("remove");
    a.set_item("j", "w").expect("write");
    a.clear().expect("clear");
    area.dispatch_pending();

    let seen = seen.borrow();
    assert_eq!(seen.len(), 4);
    assert_eq!(seen[1].new_value, None);
    assert_eq!(seen[1].old_value.as_deref(), Some("v"));
    assert_eq!(seen[3], StorageChange::default());
}

#[test]
fn removed_listener_is_not_called() {
    let area = MemoryArea::new();
    let a = area.context();
    let b = area.context();
    let calls = Rc::new(RefCell::new(0));
    let sink = Rc::clone(&calls);
    let id = b.add_listener(Rc::new(move |_: &StorageChange| *sink.borrow_mut() += 1));

    assert!(b.remove_listener(id));
    assert!(!b.remove_listener(id));
    assert_eq!(area.listener_count(), 0);

    a.set_item("k", "v").expect("write");
    area.dispatch_pending();
    assert_eq!(*calls.borrow(), 0);
}

#[test]
fn listener_writes_are_delivered_in_the_same_dispatch() {
    let area = MemoryArea::new();
    let a = area.context();
    let b = area.context();
    let seen_a = recorder(&a);

    let echo = b.clone();
    b.add_listener(Rc::new(move |change: &StorageChange| {
        if change.key.as_deref() == Some("ping") {
            echo.set_item("pong", "1").expect("write from listener");
        }
    }));

    a.set_item("ping", "1").expect("write");
    area.dispatch_pending();

    let seen = seen_a.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].key.as_deref(), Some("pong"));
}

#[test]
fn keys_snapshot_matches_ordinal_enumeration() {
    let area = MemoryArea::new();
    let ctx = area.context();
    for key in ["c", "a", "b"] {
        ctx.set_item(key, "1").expect("write");
    }
    let by_index: Vec<String> = (0..ctx.length().expect("len"))
        .filter_map(|i| ctx.key(i).expect("key"))
        .collect();
    assert_eq!(ctx.keys().expect("keys"), by_index);

    area.set_disabled(true);
    assert!(matches!(ctx.keys(), Err(StorageError::Unavailable(_))));
}
