//! Activation and read-consistency properties over random write sequences.

use app_state::{Key, Node, Path, RootStore, Store, Subscription};
use proptest::prelude::*;
use serde_json::json;

const BRANCHES: [&str; 2] = ["a", "b"];
const LEAVES: [&str; 2] = ["x", "y"];

fn initial() -> serde_json::Value {
    json!({"a": {"x": 0, "y": 0}, "b": {"x": 0, "y": 0}})
}

fn pointer(branch: usize, leaf: usize) -> String {
    format!("/{}/{}", BRANCHES[branch], LEAVES[leaf])
}

#[derive(Clone, Debug)]
enum Step {
    Write { branch: usize, leaf: usize, value: i64 },
    WriteBranch { branch: usize, value: i64 },
    Subscribe { branch: usize, leaf: Option<usize> },
    Unsubscribe { index: usize },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..2usize, 0..2usize, -100..100i64)
            .prop_map(|(branch, leaf, value)| Step::Write { branch, leaf, value }),
        (0..2usize, -100..100i64).prop_map(|(branch, value)| Step::WriteBranch { branch, value }),
        (0..2usize, proptest::option::of(0..2usize))
            .prop_map(|(branch, leaf)| Step::Subscribe { branch, leaf }),
        (0..8usize).prop_map(|index| Step::Unsubscribe { index }),
    ]
}

proptest! {
    #[test]
    fn prop_every_handle_reads_current_state(steps in proptest::collection::vec(step(), 1..40)) {
        let root = RootStore::new(initial());
        let mut subs: Vec<Subscription> = Vec::new();

        for step in steps {
            match step {
                Step::Write { branch, leaf, value } => {
                    // a branch replaced by a scalar has no leaves to write
                    let writable = root
                        .value()
                        .field(BRANCHES[branch])
                        .map_or(false, |n| n.as_object().is_some());
                    let result = root.child(BRANCHES[branch]).child(LEAVES[leaf]).set(Node::from(value));
                    prop_assert_eq!(result.is_ok(), writable);
                }
                Step::WriteBranch { branch, value } => {
                    let next = if value % 2 == 0 {
                        Node::from(json!({"x": value, "y": -value}))
                    } else {
                        Node::from(value)
                    };
                    root.child(BRANCHES[branch]).set(next).unwrap();
                }
                Step::Subscribe { branch, leaf } => {
                    let store = root.child(BRANCHES[branch]);
                    let sub = match leaf {
                        Some(leaf) => store.child(LEAVES[leaf]).subscribe(|_| {}),
                        None => store.subscribe(|_| {}),
                    };
                    subs.push(sub);
                }
                Step::Unsubscribe { index } => {
                    if !subs.is_empty() {
                        let sub = subs.remove(index % subs.len());
                        sub.unsubscribe();
                    }
                }
            }

            let canonical = root.value().to_json();
            for branch in 0..2 {
                let expected = canonical.get(BRANCHES[branch]).cloned();
                let actual = root.child(BRANCHES[branch]).state().map(|n| n.to_json());
                prop_assert_eq!(actual, expected);

                for leaf in 0..2 {
                    let expected = canonical.pointer(&pointer(branch, leaf)).cloned();
                    let actual = root
                        .child(BRANCHES[branch])
                        .child(LEAVES[leaf])
                        .state()
                        .map(|n| n.to_json());
                    prop_assert_eq!(actual, expected);
                }
            }
        }

        drop(subs);
        prop_assert!(root.active_paths().is_empty());
        prop_assert_eq!(root.subscriber_count(), 0);
    }

    #[test]
    fn prop_old_snapshots_never_change(values in proptest::collection::vec((0..2usize, 0..2usize, any::<i64>()), 1..30)) {
        let root = RootStore::new(initial());
        let mut history = vec![(root.value(), root.value().to_json())];

        for (branch, leaf, value) in values {
            root.child(BRANCHES[branch]).child(LEAVES[leaf]).set(Node::from(value)).unwrap();
            history.push((root.value(), root.value().to_json()));
        }

        for (node, json) in &history {
            prop_assert_eq!(&node.to_json(), json);
        }
    }

    #[test]
    fn prop_path_display_round_trips_keys(keys in proptest::collection::vec(
        prop_oneof![
            "[a-z]{1,8}".prop_map(Key::Field),
            (0..1000usize).prop_map(Key::Index),
        ],
        0..6,
    )) {
        let path = Path::from_keys(keys.clone());
        prop_assert_eq!(path.depth(), keys.len());
        prop_assert_eq!(path.keys(), keys.as_slice());

        let rendered = path.to_string();
        let expected: String = if keys.is_empty() {
            "/".to_string()
        } else {
            keys.iter().map(|k| format!("/{}", k)).collect()
        };
        prop_assert_eq!(rendered, expected);

        if let Some(parent) = path.parent() {
            prop_assert_eq!(parent.child(path.last().unwrap().clone()), path.clone());
            prop_assert_eq!(&path.keys()[..parent.depth()], parent.keys());
        }
    }
}

#[test]
fn test_subscribing_deep_activates_ancestors() {
    let root = RootStore::new(initial());
    let leaf = root.child("a").child("x");

    let sub = leaf.subscribe(|_| {});
    assert_eq!(
        root.active_paths(),
        vec![
            Path::from_keys(vec![Key::from("a")]),
            Path::from_keys(vec![Key::from("a"), Key::from("x")]),
        ]
    );
    assert!(root.child("a").is_active());
    assert!(!root.child("b").is_active());

    drop(sub);
    assert!(!root.child("a").is_active());
}

#[test]
fn test_activation_shared_between_handles() {
    let root = RootStore::new(initial());
    let one = root.child("b");
    let two = root.child("b");

    let _sub = one.subscribe(|_| {});
    assert!(two.is_active());
}
