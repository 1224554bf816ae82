//! Property-Based Tests for the Ordered Index
//!
//! # Test Properties
//!
//! 1. **Ordering**: in-order traversal is strictly increasing after any
//!    insert/remove sequence
//! 2. **Balance**: every node's balance factor stays in {-1, 0, 1} and its
//!    height is 1 + max(child heights)
//! 3. **Membership**: the index holds exactly the distinct keys a `BTreeSet`
//!    model holds, and `lookup` finds each of them

#![cfg(test)]

use std::collections::BTreeSet;

use proptest::prelude::*;

use super::ordered::tests::{nodes, TestAdapter};
use super::ordered::OrderedIndex;

// =============================================================================
// Property Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Insert(usize),
    Remove(usize),
}

/// Operations over a pool of 64 nodes with keys drawn from a narrow range so
/// duplicate keys and repeated removals are common.
fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0usize..64).prop_map(Op::Insert),
        2 => (0usize..64).prop_map(Op::Remove),
    ]
}

fn keys_strategy() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(-40i64..40, 64)
}

// =============================================================================
// Structural Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: after every operation the tree is ordered, balanced and
    /// agrees with a set model.
    #[test]
    fn prop_matches_set_model(
        keys in keys_strategy(),
        ops in prop::collection::vec(op_strategy(), 1..300),
    ) {
        let mut store = nodes(&keys);
        let mut index = OrderedIndex::new(TestAdapter);
        let mut model = BTreeSet::new();

        for op in ops {
            match op {
                Op::Insert(n) => {
                    if store[n].links.is_linked() {
                        continue;
                    }
                    let inserted = index.insert(&mut store, n);
                    prop_assert_eq!(inserted, model.insert(keys[n]));
                }
                Op::Remove(n) => {
                    let was_linked = store[n].links.is_linked();
                    prop_assert_eq!(index.remove(&mut store, n), was_linked);
                    if was_linked {
                        model.remove(&keys[n]);
                    }
                }
            }
            prop_assert!(index.verify_invariants(&store).is_ok());
        }

        let in_order: Vec<i64> = index.iter(&store).map(|n| store[n].key).collect();
        let expected: Vec<i64> = model.iter().copied().collect();
        prop_assert_eq!(in_order, expected);
        prop_assert_eq!(index.count(), model.len());

        for key in &model {
            let found = index.lookup(&store, key);
            prop_assert!(found.is_some());
            prop_assert_eq!(store[found.unwrap()].key, *key);
        }
    }

    /// Property: `lookup_equal_or_next` agrees with the set model's range query.
    #[test]
    fn prop_equal_or_next_matches_model(
        keys in prop::collection::vec(-1000i64..1000, 1..128),
        probes in prop::collection::vec(-1100i64..1100, 1..32),
    ) {
        let mut store = nodes(&keys);
        let mut index = OrderedIndex::new(TestAdapter);
        let mut model = BTreeSet::new();
        for n in 0..store.len() {
            if index.insert(&mut store, n) {
                model.insert(keys[n]);
            }
        }

        for probe in probes {
            let got = index.lookup_equal_or_next(&store, &probe).map(|n| store[n].key);
            prop_assert_eq!(got, model.range(probe..).next().copied());

            let got = index.lookup_equal_or_previous(&store, &probe).map(|n| store[n].key);
            prop_assert_eq!(got, model.range(..=probe).next_back().copied());
        }
    }
}
