use crate::radix_map::tests::assert_invariants;
use crate::{KeyPolicy, RadixMap};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread;

fn key_value_pairs(
    min_pairs: usize,
    max_pairs: usize,
) -> impl Strategy<Value = Vec<(String, i32)>> {
    proptest::collection::vec(
        (
            // A small alphabet so that keys share prefixes and labels split
            "[abc]{1,6}".prop_map(String::from),
            proptest::num::i32::ANY,
        ),
        min_pairs..max_pairs,
    )
}

fn prefixed_keys(
    prefixes: Vec<&'static str>,
    min_pairs: usize,
    max_pairs: usize,
) -> impl Strategy<Value = Vec<(String, i32)>> {
    let prefixes_strategy = proptest::sample::select(prefixes);
    proptest::collection::vec(
        (
            prefixes_strategy.prop_flat_map(|prefix| {
                "[a-z0-9]{0,4}".prop_map(move |s| format!("{}{}", prefix, s))
            }),
            proptest::num::i32::ANY,
        ),
        min_pairs..max_pairs,
    )
}

#[derive(Debug, Clone)]
enum Operation {
    Insert(String, i32),
    GetOrInsert(String, i32),
    Remove(String),
    Prune(String),
}

fn operations(max_ops: usize) -> impl Strategy<Value = Vec<Operation>> {
    let key = "[abc]{1,5}";
    proptest::collection::vec(
        prop_oneof![
            4 => (key, any::<i32>()).prop_map(|(k, v)| Operation::Insert(k, v)),
            2 => (key, any::<i32>()).prop_map(|(k, v)| Operation::GetOrInsert(k, v)),
            3 => key.prop_map(Operation::Remove),
            1 => "[abc]{0,3}".prop_map(Operation::Prune),
        ],
        1..max_ops,
    )
}

fn entries(map: &RadixMap<i32>) -> Vec<(String, i32)> {
    map.iter().map(|(k, v)| (k, *v)).collect()
}

fn model_with_prefix(model: &BTreeMap<String, i32>, prefix: &str) -> Vec<(String, i32)> {
    model
        .iter()
        .filter(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), *v))
        .collect()
}

#[test]
fn test_empty_radix_map_behavior() {
    let map: RadixMap<i32> = RadixMap::new();

    assert!(map.is_empty());
    assert_eq!(map.len(), 0);
    assert_eq!(map.get("anything"), None);
    assert_eq!(map.get(""), None);
    assert_eq!(map.remove("anything").unwrap(), None);
    assert_eq!(map.search("a").count(), 0);

    let (pruned, subtree) = map.prune("a");
    assert!(!pruned);
    assert!(subtree.is_empty());

    assert!(map.is_empty());
    assert_invariants(&map);
}

#[test]
fn test_very_long_and_unicode_keys() {
    let map = RadixMap::new();
    let long_key = "a".repeat(1000);
    map.insert(&long_key, 1).unwrap();
    map.insert(&long_key[..500], 2).unwrap();
    map.insert("ünïcödé", 3).unwrap();
    map.insert("ünïcorn", 4).unwrap();

    assert_eq!(map.get(&long_key).as_deref(), Some(&1));
    assert_eq!(map.get(&long_key[..500]).as_deref(), Some(&2));
    assert_eq!(map.search_keys("ünïc").count(), 2);
    assert_eq!(map.len(), 4);
    assert_invariants(&map);
}

proptest! {
    #[test]
    fn radix_map_btree_map_equivalence(pairs in key_value_pairs(1, 100)) {
        let map = RadixMap::new();
        let mut reference_map = BTreeMap::new();

        for (key, value) in &pairs {
            let previous = map.insert(key, *value).unwrap();
            let expected = reference_map.insert(key.clone(), *value);
            prop_assert_eq!(previous.as_deref().copied(), expected);
        }

        for (key, value) in &reference_map {
            let stored = map.get(key);
            prop_assert_eq!(stored.as_deref(), Some(value));
        }
        prop_assert_eq!(map.len(), reference_map.len());

        // Pre-order with children in code point order is lexicographic order
        let expected: Vec<_> = reference_map.into_iter().collect();
        prop_assert_eq!(entries(&map), expected);
        assert_invariants(&map);
    }

    #[test]
    fn removal_works_correctly(
        pairs in key_value_pairs(5, 100),
        to_remove in key_value_pairs(1, 50)
    ) {
        let map = RadixMap::new();
        let mut reference_map = BTreeMap::new();

        for (key, value) in &pairs {
            map.insert(key, *value).unwrap();
            reference_map.insert(key.clone(), *value);
        }

        for (key, _) in &to_remove {
            let removed = map.remove(key).unwrap();
            prop_assert_eq!(removed.as_deref().copied(), reference_map.remove(key));
            prop_assert_eq!(map.get(key), None);
        }

        for (key, value) in &reference_map {
            let stored = map.get(key);
            prop_assert_eq!(stored.as_deref(), Some(value));
        }
        prop_assert_eq!(map.len(), reference_map.len());
        assert_invariants(&map);
    }

    #[test]
    fn insert_then_remove_everything_leaves_an_empty_root(pairs in key_value_pairs(1, 100)) {
        let map = RadixMap::new();
        for (key, value) in &pairs {
            map.insert(key, *value).unwrap();
        }
        for (key, _) in &pairs {
            map.remove(key).unwrap();
        }

        prop_assert!(map.is_empty());
        prop_assert!(map.root_node().children.read().map.is_empty());
    }

    #[test]
    fn search_matches_prefix_filter(
        pairs in key_value_pairs(1, 100),
        prefix in "[abc]{0,4}"
    ) {
        let map = RadixMap::new();
        let mut reference_map = BTreeMap::new();
        for (key, value) in &pairs {
            map.insert(key, *value).unwrap();
            reference_map.insert(key.clone(), *value);
        }

        let found: Vec<_> = map.search(&prefix).map(|(k, v)| (k, *v)).collect();
        let expected = model_with_prefix(&reference_map, &prefix);
        prop_assert_eq!(map.starts_with(&prefix), !expected.is_empty());
        prop_assert_eq!(found, expected);
    }

    #[test]
    fn prune_detaches_exactly_the_prefix(
        pairs in prefixed_keys(vec!["user:", "group:", "user:admin:", "role"], 1, 60),
        prefix in proptest::sample::select(vec!["user:", "group:", "user:admin:", "role", "us", "zzz"])
    ) {
        let map = RadixMap::new();
        let mut reference_map = BTreeMap::new();
        for (key, value) in &pairs {
            map.insert(key, *value).unwrap();
            reference_map.insert(key.clone(), *value);
        }

        let (pruned, subtree) = map.prune(prefix);
        let expected = model_with_prefix(&reference_map, prefix);

        if reference_map.contains_key(prefix) {
            prop_assert!(pruned, "an exact key always ends on a node boundary");
        }
        if pruned {
            prop_assert_eq!(entries(&subtree), expected);
            reference_map.retain(|k, _| !k.starts_with(prefix));
            assert_invariants(&subtree);
        } else {
            prop_assert!(subtree.is_empty());
        }

        let remaining: Vec<_> = reference_map.into_iter().collect();
        prop_assert_eq!(entries(&map), remaining);
        assert_invariants(&map);
    }

    #[test]
    fn operation_sequences_match_the_model(ops in operations(80)) {
        let map = RadixMap::new();
        let mut reference_map: BTreeMap<String, i32> = BTreeMap::new();

        for op in ops {
            match op {
                Operation::Insert(key, value) => {
                    let previous = map.insert(&key, value).unwrap();
                    prop_assert_eq!(previous.as_deref().copied(), reference_map.insert(key, value));
                }
                Operation::GetOrInsert(key, value) => {
                    let stored = map.get_or_insert(&key, value).unwrap();
                    let expected = *reference_map.entry(key).or_insert(value);
                    prop_assert_eq!(*stored, expected);
                }
                Operation::Remove(key) => {
                    let removed = map.remove(&key).unwrap();
                    prop_assert_eq!(removed.as_deref().copied(), reference_map.remove(&key));
                }
                Operation::Prune(prefix) => {
                    let (pruned, subtree) = map.prune(&prefix);
                    if pruned {
                        prop_assert_eq!(entries(&subtree), model_with_prefix(&reference_map, &prefix));
                        reference_map.retain(|k, _| !k.starts_with(&prefix));
                    } else {
                        prop_assert!(subtree.is_empty());
                    }
                }
            }
            assert_invariants(&map);
        }

        let expected: Vec<_> = reference_map.into_iter().collect();
        prop_assert_eq!(entries(&map), expected);
    }

    #[test]
    fn case_insensitive_map_matches_lowercased_model(
        pairs in proptest::collection::vec(("[aAbB]{1,5}", any::<i32>()), 1..60)
    ) {
        let map = RadixMap::builder().key_policy(KeyPolicy::CaseInsensitive).build().unwrap();
        let mut reference_map = HashMap::new();
        for (key, value) in &pairs {
            map.insert(key, *value).unwrap();
            reference_map.insert(key.to_lowercase(), *value);
        }

        for (key, _) in &pairs {
            let expected = reference_map.get(&key.to_lowercase());
            let stored = map.get(&key.to_uppercase());
            prop_assert_eq!(stored.as_deref(), expected);
        }
        prop_assert!(map.keys().all(|k| k == k.to_lowercase()));
        prop_assert_eq!(map.len(), reference_map.len());
    }

    #[test]
    fn concurrent_disjoint_writers_match_the_model(pairs in key_value_pairs(1, 80)) {
        let map = Arc::new(RadixMap::new());
        let mut reference_map = BTreeMap::new();

        // Each writer owns the keys starting with its digit, so the final
        // state does not depend on the interleaving
        let handles: Vec<_> = (0..4)
            .map(|writer| {
                let map = Arc::clone(&map);
                let pairs = pairs.clone();
                thread::spawn(move || {
                    for (key, value) in &pairs {
                        map.insert(&format!("{writer}{key}"), *value).unwrap();
                    }
                    for (key, _) in pairs.iter().step_by(3) {
                        map.remove(&format!("{writer}{key}")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for writer in 0..4 {
            for (key, value) in &pairs {
                reference_map.insert(format!("{writer}{key}"), *value);
            }
            for (key, _) in pairs.iter().step_by(3) {
                reference_map.remove(&format!("{writer}{key}"));
            }
        }

        let expected: Vec<_> = reference_map.into_iter().collect();
        prop_assert_eq!(entries(&map), expected);
        assert_invariants(&map);
    }
}
