//! Property tests for spec §8 invariants 1 ("MS monotonic revisions") and
//! 2 ("Txn atomicity"). `proptest` drives random sequences of Put/Delete
//! operations over a handful of keys; each property function spins its own
//! `tokio` runtime since `proptest!` bodies are synchronous.

use proptest::prelude::*;
use yr_metastore::{
    Compare, CompareResult, CompareTarget, CompareValue, LeaseConfig, MetaStore, PutRequest,
    RangeRequest, RequestOp, TxnRequest,
};

#[derive(Debug, Clone)]
enum Op {
    Put { key_idx: usize, value: Vec<u8> },
    Delete { key_idx: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..4usize, prop::collection::vec(any::<u8>(), 0..8))
            .prop_map(|(key_idx, value)| Op::Put { key_idx, value }),
        (0..4usize).prop_map(|key_idx| Op::Delete { key_idx }),
    ]
}

proptest! {
    /// After any sequence of Put/Delete operations, the global revision is
    /// strictly increasing per mutating call, and each individual key's
    /// observed mod_revision sequence never decreases.
    #[test]
    fn revisions_never_go_backwards(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let store = MetaStore::spawn(LeaseConfig::default()).await;
            let mut last_global_revision = 0i64;
            let mut last_mod_revision = [0i64; 4];

            for op in ops {
                match op {
                    Op::Put { key_idx, value } => {
                        let key = format!("k{key_idx}");
                        let response = store
                            .put(PutRequest { key, value, lease_id: 0, prev_kv: false })
                            .await
                            .unwrap();
                        prop_assert!(response.revision > last_global_revision);
                        last_global_revision = response.revision;
                        prop_assert!(response.revision >= last_mod_revision[key_idx]);
                        last_mod_revision[key_idx] = response.revision;
                    }
                    Op::Delete { key_idx } => {
                        let key = format!("k{key_idx}");
                        let deleted = store
                            .delete(yr_metastore::DeleteRangeRequest {
                                key,
                                range_end: None,
                                prev_kv: false,
                            })
                            .await
                            .unwrap();
                        if deleted.deleted > 0 {
                            prop_assert!(deleted.revision > last_global_revision);
                            last_global_revision = deleted.revision;
                            last_mod_revision[key_idx] = deleted.revision;
                        }
                    }
                }
            }
            Ok(())
        })?;
    }

    /// A Txn whose compare branch fails commits none of the success
    /// branch's writes; one whose compare succeeds commits all of them.
    #[test]
    fn txn_is_all_or_nothing(initial in any::<u8>(), compare_matches in any::<bool>()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let store = MetaStore::spawn(LeaseConfig::default()).await;
            store
                .put(PutRequest {
                    key: "txn-key".to_string(),
                    value: vec![initial],
                    lease_id: 0,
                    prev_kv: false,
                })
                .await
                .unwrap();

            // version is 1 right after the first Put; choose the compare
            // target so `compare_matches` controls which branch commits.
            let expected_version = if compare_matches { 1 } else { 999 };

            let result = store
                .txn(TxnRequest {
                    compare: vec![Compare {
                        key: "txn-key".to_string(),
                        target: CompareTarget::Version,
                        result: CompareResult::Equal,
                        value: CompareValue::Int(expected_version),
                    }],
                    success: vec![
                        RequestOp::Put(PutRequest {
                            key: "a".to_string(),
                            value: b"success".to_vec(),
                            lease_id: 0,
                            prev_kv: false,
                        }),
                        RequestOp::Put(PutRequest {
                            key: "b".to_string(),
                            value: b"success".to_vec(),
                            lease_id: 0,
                            prev_kv: false,
                        }),
                    ],
                    failure: vec![],
                })
                .await
                .unwrap();

            prop_assert_eq!(result.succeeded, compare_matches);

            let a = store.get(RangeRequest::point("a")).await.unwrap();
            let b = store.get(RangeRequest::point("b")).await.unwrap();
            if compare_matches {
                prop_assert_eq!(a.count, 1);
                prop_assert_eq!(b.count, 1);
            } else {
                prop_assert_eq!(a.count, 0);
                prop_assert_eq!(b.count, 0);
            }
            Ok(())
        })?;
    }
}
