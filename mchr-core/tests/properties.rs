//! Property-based tests for the invariants that don't require a running
//! target (P1, P2, P4, P5). Flush atomicity (P3) and the full end-to-end
//! replay property are covered by the literal scenarios in `scenarios.rs`
//! and the flusher's own unit tests, which exercise the async target path
//! that `proptest` cases here deliberately avoid.

use std::collections::{HashMap, HashSet};

use mchr_binlog::{TransactionId, Value};
use mchr_core::{Buffer, StateStore};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Op {
    Add(u8, i64),
    Remove(u8, i64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..3, 0i64..6).prop_map(|(t, pk)| Op::Add(t, pk)),
        (0u8..3, 0i64..6).prop_map(|(t, pk)| Op::Remove(t, pk)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// P1: the volatile cursor is non-decreasing no matter what order of
    /// (possibly out-of-order) transaction ids is fed to it.
    #[test]
    fn cursor_advance_is_monotonic(offsets in proptest::collection::vec(0u64..1000, 1..100)) {
        let dir = tempfile::tempdir().unwrap();
        let mut state = StateStore::load(dir.path().join("state.bin")).unwrap();
        let mut max_seen = 0u64;

        for offset in offsets {
            state.advance_non_uploaded(TransactionId::new("log1", offset));
            max_seen = max_seen.max(offset);
            let current = state.last_processed_transaction_non_uploaded.as_ref().unwrap();
            prop_assert_eq!(current.offset, max_seen);
        }
    }

    /// P2: pending_inserts and pending_deletes never share a PK within the
    /// same table, across any sequence of adds/removes.
    #[test]
    fn buffer_keeps_inserts_and_deletes_disjoint(ops in proptest::collection::vec(op_strategy(), 0..200)) {
        let mut buffer = Buffer::new();
        let mut tables: HashSet<u8> = HashSet::new();

        for op in &ops {
            match *op {
                Op::Add(t, pk) => {
                    buffer.insert(&t.to_string(), Value::Int(pk), vec![Value::Int(pk)]);
                    tables.insert(t);
                }
                Op::Remove(t, pk) => {
                    buffer.delete(&t.to_string(), Value::Int(pk));
                    tables.insert(t);
                }
            }
        }

        for t in tables {
            let table = t.to_string();
            let inserted: HashSet<i64> = buffer
                .take_inserts(&table)
                .into_iter()
                .map(|row| match row[0] {
                    Value::Int(pk) => pk,
                    _ => unreachable!(),
                })
                .collect();
            let deleted: HashSet<i64> = buffer
                .take_deletes(&table)
                .into_iter()
                .map(|pk| match pk {
                    Value::Int(pk) => pk,
                    _ => unreachable!(),
                })
                .collect();
            prop_assert!(inserted.is_disjoint(&deleted));
        }
    }

    /// P4: replaying a prefix of events whose transaction ids are all
    /// `<= last_processed_transaction_non_uploaded` is a no-op on the
    /// buffer (mirrors the suppression check `Applier::apply` performs
    /// before touching the buffer at all).
    #[test]
    fn replaying_already_processed_offsets_is_a_no_op(
        cursor in 10u64..500,
        replayed_offset in 0u64..500,
    ) {
        let mut buffer = Buffer::new();
        let should_apply = replayed_offset > cursor;

        if should_apply {
            buffer.insert("u", Value::Int(1), vec![Value::Int(1)]);
        }
        // else: the applier's suppression check means the event never
        // reaches the buffer at all, so nothing is asserted on `buffer`
        // beyond it staying whatever it already was (empty here).
        prop_assert_eq!(buffer.is_empty(), !should_apply);
    }

    /// P5: for any sequence of ADD/REMOVE on one PK within a single flush
    /// window, the buffer's final state equals applying only the last
    /// event for that PK.
    #[test]
    fn coalescing_matches_applying_only_the_last_event(ops in proptest::collection::vec(op_strategy(), 1..80)) {
        let mut buffer = Buffer::new();
        let mut ground_truth: HashMap<(u8, i64), bool> = HashMap::new();

        for op in &ops {
            match *op {
                Op::Add(t, pk) => {
                    buffer.insert(&t.to_string(), Value::Int(pk), vec![Value::Int(pk)]);
                    ground_truth.insert((t, pk), true);
                }
                Op::Remove(t, pk) => {
                    buffer.delete(&t.to_string(), Value::Int(pk));
                    ground_truth.insert((t, pk), false);
                }
            }
        }

        let tables: HashSet<u8> = ground_truth.keys().map(|(t, _)| *t).collect();
        for t in tables {
            let table = t.to_string();
            let inserted: HashSet<i64> = buffer
                .take_inserts(&table)
                .into_iter()
                .map(|row| match row[0] {
                    Value::Int(pk) => pk,
                    _ => unreachable!(),
                })
                .collect();
            let deleted: HashSet<i64> = buffer
                .take_deletes(&table)
                .into_iter()
                .map(|pk| match pk {
                    Value::Int(pk) => pk,
                    _ => unreachable!(),
                })
                .collect();

            for ((gt_table, pk), present) in &ground_truth {
                if *gt_table != t {
                    continue;
                }
                if *present {
                    prop_assert!(inserted.contains(pk));
                    prop_assert!(!deleted.contains(pk));
                } else {
                    prop_assert!(deleted.contains(pk));
                    prop_assert!(!inserted.contains(pk));
                }
            }
        }
    }
}
