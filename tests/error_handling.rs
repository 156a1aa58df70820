//! Error handling and edge case tests.

use app_state::{
    Generation, Node, RootStore, Store, StoreError, Subscription, UndoManager, MAX_ARRAY_PAD,
};
use serde_json::json;
use std::cell::Cell;
use std::rc::Rc;

// --- Write Errors ---

#[test]
fn test_orphaned_write_fails_without_mutation() {
    let root = RootStore::new(json!({"a": null}));
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let _sub = root.subscribe(move |_| counter.set(counter.get() + 1));

    let result = root.child("a").child("b").set(Node::from(1i64));

    match result {
        Err(StoreError::OrphanedWrite { path }) => assert_eq!(path.to_string(), "/a/b"),
        other => panic!("expected orphaned write, got {:?}", other),
    }
    assert_eq!(root.value().to_json(), json!({"a": null}));
    assert_eq!(root.generation(), Generation(0));
    assert_eq!(calls.get(), 0);
}

#[test]
fn test_key_kind_mismatch() {
    let root = RootStore::new(json!({"list": [1, 2], "obj": {"a": 1}, "n": 3}));

    let result = root.child("list").child("a").set(Node::from(1i64));
    assert!(matches!(result, Err(StoreError::NotAContainer { .. })));

    let result = root.child("obj").child(0usize).set(Node::from(1i64));
    assert!(matches!(result, Err(StoreError::NotAContainer { .. })));

    let result = root.child("n").child("x").set(Node::from(1i64));
    assert!(matches!(result, Err(StoreError::NotAContainer { .. })));

    assert_eq!(root.generation(), Generation(0));
}

#[test]
fn test_error_display() {
    let root = RootStore::new(json!({}));
    let err = root.child("x").child("y").set(Node::null()).unwrap_err();
    assert!(err.to_string().contains("/x/y"));
}

// --- Non-errors ---

#[test]
fn test_absent_reads_are_not_errors() {
    let root = RootStore::new(json!({"a": [1]}));

    assert!(root.child("missing").state().is_none());
    assert!(root.child("a").child(5usize).state().is_none());
    assert!(root.child("a").child(0usize).child("deeper").state().is_none());
    assert!(root.child("missing").state_as::<i64>().unwrap().is_none());
}

#[test]
fn test_array_write_past_end_pads_with_null() {
    let root = RootStore::new(json!({"a": [1]}));
    root.child("a").child(3usize).set(Node::from(4i64)).unwrap();
    assert_eq!(root.value().to_json(), json!({"a": [1, null, null, 4]}));
}

#[test]
fn test_array_write_far_past_end_is_rejected() {
    let root = RootStore::new(json!([1]));
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let _sub = root.subscribe(move |_| counter.set(counter.get() + 1));

    for index in [usize::MAX, 2 + MAX_ARRAY_PAD] {
        let result = root.child(index).set(Node::from(2i64));
        assert!(matches!(
            result,
            Err(StoreError::IndexOutOfRange { index: i, len: 1, .. }) if i == index
        ));
    }

    assert_eq!(root.value().to_json(), json!([1]));
    assert_eq!(root.generation(), Generation(0));
    assert_eq!(calls.get(), 0);
}

#[test]
fn test_array_delete_shifts() {
    let root = RootStore::new(json!([10, 20, 30]));
    root.child(1usize).delete().unwrap();
    assert_eq!(root.value().to_json(), json!([10, 30]));
}

#[test]
fn test_state_as_wrong_type() {
    let root = RootStore::new(json!({"name": "ada"}));
    let result = root.child("name").state_as::<u32>();
    assert!(matches!(result, Err(StoreError::Deserialization(_))));
}

// --- Subscription Edge Cases ---

#[test]
fn test_subscription_outlives_store() {
    let sub = {
        let root = RootStore::new(json!({"a": 1}));
        root.child("a").subscribe(|_| {})
    };
    // the tree is gone; unsubscribing is still fine
    sub.unsubscribe();
    assert!(!sub.is_live());
}

#[test]
fn test_unsubscribe_from_inside_callback() {
    let root = RootStore::new(json!({"a": 0}));
    let holder: Rc<std::cell::RefCell<Option<app_state::Subscription>>> =
        Rc::new(std::cell::RefCell::new(None));
    let calls = Rc::new(Cell::new(0));

    let inner_holder = Rc::clone(&holder);
    let counter = Rc::clone(&calls);
    let sub = root.child("a").subscribe(move |_| {
        counter.set(counter.get() + 1);
        if let Some(sub) = inner_holder.borrow().as_ref() {
            sub.unsubscribe();
        }
    });
    *holder.borrow_mut() = Some(sub);

    root.child("a").set(Node::from(1i64)).unwrap();
    root.child("a").set(Node::from(2i64)).unwrap();

    assert_eq!(calls.get(), 1);
    assert_eq!(root.subscriber_count(), 0);
    assert!(root.active_paths().is_empty());
}

#[test]
fn test_unsubscribe_releases_nested_subscription() {
    let root = RootStore::new(json!({"a": 0, "b": 0}));
    let inner = Rc::new(std::cell::RefCell::new(Some(root.child("b").subscribe(|_| {}))));

    let owned = Rc::clone(&inner);
    let outer = root.child("a").subscribe(move |_| {
        let _ = owned.borrow().as_ref().map(Subscription::is_live);
    });
    drop(inner);
    assert_eq!(root.subscriber_count(), 2);

    // dropping the outer callback drops the inner subscription with it
    outer.unsubscribe();

    assert_eq!(root.subscriber_count(), 0);
    assert!(root.active_paths().is_empty());
}

#[test]
fn test_dropping_outer_subscription_releases_nested_one() {
    let root = RootStore::new(json!({"a": 0}));
    let inner = root.child("a").subscribe(|_| {});
    let outer = root.subscribe(move |_| {
        let _ = inner.is_live();
    });
    assert_eq!(root.subscriber_count(), 2);

    drop(outer);
    assert_eq!(root.subscriber_count(), 0);
}

// --- Undo Edge Cases ---

#[test]
fn test_undo_on_empty_history() {
    let root = RootStore::new(json!(1));
    let undo = UndoManager::new(root, 0);

    assert!(matches!(undo.undo(), Err(StoreError::NothingToUndo)));
    assert!(matches!(undo.redo(), Err(StoreError::NothingToRedo)));
}

#[test]
fn test_failed_undo_keeps_cursor() {
    let root = RootStore::new(json!({"a": {"b": 1}}));
    let b = root.child("a").child("b");
    let undo = UndoManager::new(b.clone(), 0);
    b.set(Node::from(2i64)).unwrap();
    undo.push_current_state();

    // parent disappears, so restoring the child is an orphaned write
    root.set(Node::from(json!({}))).unwrap();
    assert!(matches!(undo.undo(), Err(StoreError::OrphanedWrite { .. })));
    assert_eq!(undo.undo_depth(), 1);
}
