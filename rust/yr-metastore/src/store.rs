//! KV service actor (spec §4.1 Put/Get/Delete/Txn/GetAndWatch).
//!
//! All mutations go through this actor's serial mailbox, so a Put, Delete or
//! Txn is atomic with respect to concurrent Gets and Watches without any
//! further locking (§5). The actor bumps the store's single revision
//! counter exactly once per mutating request, including multi-key Deletes
//! and Txns (§8 invariant 2 and the S1-S3 scenarios).

use std::collections::BTreeMap;
use std::sync::Arc;

use yr_base::actor::{spawn_actor, ActorHandle, Reply};
use yr_base::error::CoreError;
use yr_base::revision::MonotonicRevision;

use crate::backup::{BackupRecord, BackupWriter};
use crate::lease::{LeaseHandle, LeaseMsg};
use crate::types::{
    Compare, CompareResult, CompareTarget, CompareValue, DeleteRangeRequest, DeleteRangeResponse,
    KeyRange, KeyValue, OpResponse, PutRequest, PutResponse, RangeRequest, RangeResponse,
    RequestOp, SortOrder, SortTarget, TxnRequest, TxnResponse, WatchEvent,
};
use crate::watch::{create_watch, WatchHandle, WatchId, WatchMsg};

/// Key tag that forces a synchronous backup mirror when
/// [`KvBackup::enable_sync_sys_func`] is set (spec §6.1
/// `/metastore-system-func/<functionKey>`).
pub const SYSTEM_FUNC_PREFIX: &str = "/metastore-system-func/";

/// Wires a [`BackupWriter`] into the KV actor so every committed mutation is
/// mirrored to the external backend (spec §4.1 "Persistence and recovery").
pub struct KvBackup {
    pub writer: Arc<BackupWriter>,
    pub enable_sync_sys_func: bool,
}

pub enum KvMsg {
    Put {
        request: PutRequest,
        reply: Reply<Result<PutResponse, CoreError>>,
    },
    Get {
        request: RangeRequest,
        reply: Reply<Result<RangeResponse, CoreError>>,
    },
    Delete {
        request: DeleteRangeRequest,
        reply: Reply<Result<DeleteRangeResponse, CoreError>>,
    },
    Txn {
        request: TxnRequest,
        reply: Reply<Result<TxnResponse, CoreError>>,
    },
    GetAndWatch {
        request: RangeRequest,
        range: KeyRange,
        include_prev_kv: bool,
        reply: Reply<Result<(RangeResponse, WatchId, tokio::sync::mpsc::Receiver<WatchEvent>), CoreError>>,
    },
    /// Called by the lease actor when a lease is revoked or swept; deletes
    /// the given keys atomically and bumps the revision once for the batch.
    OnRevoke {
        keys: Vec<String>,
        reply: Reply<Result<(), CoreError>>,
    },
    SetLeaseHandle(LeaseHandle),
}

pub type KvHandle = ActorHandle<KvMsg>;

struct KvState {
    cache: BTreeMap<String, KeyValue>,
    revision: MonotonicRevision,
    watch_handle: WatchHandle,
    lease_handle: Option<LeaseHandle>,
    backup: Option<KvBackup>,
}

/// Spawns the KV actor. `recovered` seeds the cache from a prior backup
/// replay (empty for a fresh node); `backup`, if set, mirrors every commit
/// per spec §4.1.
pub fn spawn_kv_actor(
    mailbox_size: usize,
    watch_handle: WatchHandle,
    recovered: Vec<KeyValue>,
    backup: Option<KvBackup>,
) -> KvHandle {
    let mut cache = BTreeMap::new();
    let mut max_revision = 0;
    for kv in recovered {
        max_revision = max_revision.max(kv.mod_revision);
        cache.insert(kv.key.clone(), kv);
    }
    let state = KvState {
        cache,
        revision: MonotonicRevision::starting_at(max_revision),
        watch_handle,
        lease_handle: None,
        backup,
    };
    spawn_actor(mailbox_size, state, |state, msg| handle_msg(state, msg))
}

fn record_key(record: &BackupRecord) -> &str {
    match record {
        BackupRecord::Put(kv) => &kv.key,
        BackupRecord::Delete { key, .. } => key,
    }
}

/// Mirrors committed records to the backup sink, synchronously when any
/// record's key carries the `/metastore-system-func/` tag and sync mirroring
/// is enabled (spec §6.1), asynchronously otherwise so the write path is
/// never blocked on the external backend (spec §5).
async fn mirror(state: &KvState, records: Vec<BackupRecord>) {
    let Some(backup) = &state.backup else { return };
    if records.is_empty() {
        return;
    }
    let force_sync = backup.enable_sync_sys_func
        && records.iter().any(|r| record_key(r).starts_with(SYSTEM_FUNC_PREFIX));
    let writer = backup.writer.clone();
    if force_sync {
        if let Err(err) = writer.flush(records).await {
            tracing::warn!(%err, "synchronous backup flush failed");
        }
    } else {
        tokio::spawn(async move {
            if let Err(err) = writer.flush(records).await {
                tracing::warn!(%err, "asynchronous backup flush failed");
            }
        });
    }
}

async fn handle_msg(state: &mut KvState, msg: KvMsg) {
    match msg {
        KvMsg::Put { request, reply } => {
            let result = put(state, request).await;
            let _ = reply.send(result);
        }
        KvMsg::Get { request, reply } => {
            let result = get(state, &request);
            let _ = reply.send(result);
        }
        KvMsg::Delete { request, reply } => {
            let result = delete(state, request).await;
            let _ = reply.send(result);
        }
        KvMsg::Txn { request, reply } => {
            let result = txn(state, request).await;
            let _ = reply.send(result);
        }
        KvMsg::GetAndWatch {
            request,
            range,
            include_prev_kv,
            reply,
        } => {
            let result = get_and_watch(state, request, range, include_prev_kv).await;
            let _ = reply.send(result);
        }
        KvMsg::OnRevoke { keys, reply } => {
            let result = on_revoke(state, keys).await;
            let _ = reply.send(result);
        }
        KvMsg::SetLeaseHandle(handle) => {
            state.lease_handle = Some(handle);
        }
    }
}

async fn put(state: &mut KvState, request: PutRequest) -> Result<PutResponse, CoreError> {
    if request.lease_id != 0 {
        let Some(lease_handle) = state.lease_handle.clone() else {
            return Err(CoreError::InnerSystemError(
                "lease service not wired into kv actor".into(),
            ));
        };
        lease_handle
            .ask(|reply| LeaseMsg::Attach {
                key: request.key.clone(),
                id: yr_base::ids::LeaseId(request.lease_id),
                reply,
            })
            .await??;
    }

    let prior = state.cache.get(&request.key).cloned();
    if let Some(prior) = &prior {
        if prior.lease_id != 0 && prior.lease_id != request.lease_id {
            if let Some(lease_handle) = &state.lease_handle {
                lease_handle
                    .tell(LeaseMsg::Detach {
                        key: request.key.clone(),
                        id: yr_base::ids::LeaseId(prior.lease_id),
                    })
                    .await
                    .ok();
            }
        }
    }

    let revision = state.revision.advance();
    let create_revision = prior.as_ref().map(|kv| kv.create_revision).unwrap_or(revision);
    let version = prior.as_ref().map(|kv| kv.version + 1).unwrap_or(1);

    let new_kv = KeyValue {
        key: request.key.clone(),
        value: request.value,
        create_revision,
        mod_revision: revision,
        version,
        lease_id: request.lease_id,
    };
    state.cache.insert(request.key.clone(), new_kv.clone());

    state
        .watch_handle
        .tell(WatchMsg::Publish(vec![WatchEvent::Put {
            kv: new_kv.clone(),
            prev_kv: prior.clone(),
        }]))
        .await
        .ok();
    mirror(state, vec![BackupRecord::Put(new_kv)]).await;

    Ok(PutResponse {
        revision,
        prev_kv: if request.prev_kv { prior } else { None },
    })
}

fn get(state: &KvState, request: &RangeRequest) -> Result<RangeResponse, CoreError> {
    let mut kvs: Vec<KeyValue> = if request.is_point() {
        state.cache.get(&request.key).cloned().into_iter().collect()
    } else {
        let end = request.range_end.clone().unwrap_or_default();
        state
            .cache
            .range(request.key.clone()..end)
            .map(|(_, v)| v.clone())
            .collect()
    };

    if let Some((target, order)) = request.sort {
        sort_kvs(&mut kvs, target, order);
    }

    let count = kvs.len();
    if let Some(limit) = request.limit {
        kvs.truncate(limit);
    }
    if request.count_only {
        kvs.clear();
    } else if request.keys_only {
        for kv in &mut kvs {
            kv.value.clear();
        }
    }

    Ok(RangeResponse { kvs, count })
}

fn sort_kvs(kvs: &mut [KeyValue], target: SortTarget, order: SortOrder) {
    kvs.sort_by(|a, b| {
        let ord = match target {
            SortTarget::Key => a.key.cmp(&b.key),
            SortTarget::Version => a.version.cmp(&b.version).then_with(|| a.key.cmp(&b.key)),
            SortTarget::CreateRevision => a
                .create_revision
                .cmp(&b.create_revision)
                .then_with(|| a.key.cmp(&b.key)),
            SortTarget::ModRevision => a
                .mod_revision
                .cmp(&b.mod_revision)
                .then_with(|| a.key.cmp(&b.key)),
            SortTarget::Value => a.value.cmp(&b.value).then_with(|| a.key.cmp(&b.key)),
        };
        match order {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        }
    });
}

async fn delete(
    state: &mut KvState,
    request: DeleteRangeRequest,
) -> Result<DeleteRangeResponse, CoreError> {
    let keys: Vec<String> = if request.range_end.is_none() {
        if state.cache.contains_key(&request.key) {
            vec![request.key.clone()]
        } else {
            Vec::new()
        }
    } else {
        let end = request.range_end.clone().unwrap_or_default();
        state
            .cache
            .range(request.key.clone()..end)
            .map(|(k, _)| k.clone())
            .collect()
    };

    if keys.is_empty() {
        return Ok(DeleteRangeResponse {
            deleted: 0,
            revision: state.revision.current(),
            prev_kvs: Vec::new(),
        });
    }

    let revision = state.revision.advance();
    let mut prev_kvs = Vec::with_capacity(keys.len());
    let mut events = Vec::with_capacity(keys.len());
    for key in &keys {
        if let Some(prior) = state.cache.remove(key) {
            detach_lease(state, &prior).await;
            let deleted_kv = KeyValue {
                key: key.clone(),
                value: Vec::new(),
                create_revision: prior.create_revision,
                mod_revision: revision,
                version: prior.version,
                lease_id: 0,
            };
            events.push(WatchEvent::Delete {
                kv: deleted_kv,
                prev_kv: Some(prior.clone()),
            });
            prev_kvs.push(prior);
        }
    }
    events.sort_by(|a, b| a.key().cmp(b.key()));
    state.watch_handle.tell(WatchMsg::Publish(events)).await.ok();
    let records = prev_kvs
        .iter()
        .map(|kv| BackupRecord::Delete { key: kv.key.clone(), revision })
        .collect();
    mirror(state, records).await;

    Ok(DeleteRangeResponse {
        deleted: prev_kvs.len() as i64,
        revision,
        prev_kvs: if request.prev_kv { prev_kvs } else { Vec::new() },
    })
}

async fn detach_lease(state: &KvState, kv: &KeyValue) {
    if kv.lease_id != 0 {
        if let Some(lease_handle) = &state.lease_handle {
            lease_handle
                .tell(LeaseMsg::Detach {
                    key: kv.key.clone(),
                    id: yr_base::ids::LeaseId(kv.lease_id),
                })
                .await
                .ok();
        }
    }
}

fn eval_compare(cache: &BTreeMap<String, KeyValue>, cmp: &Compare) -> bool {
    let kv = cache.get(&cmp.key);
    match cmp.target {
        CompareTarget::Value => {
            let actual = kv.map(|k| k.value.as_slice()).unwrap_or(&[]);
            let CompareValue::Bytes(expected) = &cmp.value else {
                return false;
            };
            compare_ord(actual.cmp(expected.as_slice()), cmp.result)
        }
        _ => {
            let actual = match cmp.target {
                CompareTarget::Version => kv.map(|k| k.version).unwrap_or(0),
                CompareTarget::CreateRevision => kv.map(|k| k.create_revision).unwrap_or(0),
                CompareTarget::ModRevision => kv.map(|k| k.mod_revision).unwrap_or(0),
                CompareTarget::Lease => kv.map(|k| k.lease_id).unwrap_or(0),
                CompareTarget::Value => unreachable!(),
            };
            let CompareValue::Int(expected) = &cmp.value else {
                return false;
            };
            compare_ord(actual.cmp(expected), cmp.result)
        }
    }
}

fn compare_ord(ord: std::cmp::Ordering, result: CompareResult) -> bool {
    use std::cmp::Ordering::*;
    match (ord, result) {
        (Equal, CompareResult::Equal) => true,
        (Greater, CompareResult::Greater) => true,
        (Less, CompareResult::Less) => true,
        (_, CompareResult::NotEqual) => ord != Equal,
        _ => false,
    }
}

async fn txn(state: &mut KvState, request: TxnRequest) -> Result<TxnResponse, CoreError> {
    let succeeded = request.compare.iter().all(|cmp| eval_compare(&state.cache, cmp));
    let branch = if succeeded {
        &request.success
    } else {
        &request.failure
    };

    let has_mutation = branch
        .iter()
        .any(|op| matches!(op, RequestOp::Put(_) | RequestOp::Delete(_)));
    let revision = if has_mutation {
        state.revision.advance()
    } else {
        state.revision.current()
    };

    let mut responses = Vec::with_capacity(branch.len());
    let mut events: Vec<WatchEvent> = Vec::new();
    let mut records: Vec<BackupRecord> = Vec::new();

    for op in branch {
        match op {
            RequestOp::Get(req) => {
                responses.push(OpResponse::Get(get(state, req)?));
            }
            RequestOp::Put(req) => {
                let prior = state.cache.get(&req.key).cloned();
                let create_revision = prior
                    .as_ref()
                    .map(|kv| kv.create_revision)
                    .unwrap_or(revision);
                let version = prior.as_ref().map(|kv| kv.version + 1).unwrap_or(1);
                let new_kv = KeyValue {
                    key: req.key.clone(),
                    value: req.value.clone(),
                    create_revision,
                    mod_revision: revision,
                    version,
                    lease_id: req.lease_id,
                };
                state.cache.insert(req.key.clone(), new_kv.clone());
                records.push(BackupRecord::Put(new_kv.clone()));
                events.push(WatchEvent::Put {
                    kv: new_kv,
                    prev_kv: prior.clone(),
                });
                responses.push(OpResponse::Put(PutResponse {
                    revision,
                    prev_kv: if req.prev_kv { prior } else { None },
                }));
            }
            RequestOp::Delete(req) => {
                let keys: Vec<String> = if req.range_end.is_none() {
                    if state.cache.contains_key(&req.key) {
                        vec![req.key.clone()]
                    } else {
                        Vec::new()
                    }
                } else {
                    let end = req.range_end.clone().unwrap_or_default();
                    state
                        .cache
                        .range(req.key.clone()..end)
                        .map(|(k, _)| k.clone())
                        .collect()
                };
                let mut prev_kvs = Vec::with_capacity(keys.len());
                for key in &keys {
                    if let Some(prior) = state.cache.remove(key) {
                        let deleted_kv = KeyValue {
                            key: key.clone(),
                            value: Vec::new(),
                            create_revision: prior.create_revision,
                            mod_revision: revision,
                            version: prior.version,
                            lease_id: 0,
                        };
                        records.push(BackupRecord::Delete { key: key.clone(), revision });
                        events.push(WatchEvent::Delete {
                            kv: deleted_kv,
                            prev_kv: Some(prior.clone()),
                        });
                        prev_kvs.push(prior);
                    }
                }
                responses.push(OpResponse::Delete(DeleteRangeResponse {
                    deleted: prev_kvs.len() as i64,
                    revision,
                    prev_kvs: if req.prev_kv { prev_kvs } else { Vec::new() },
                }));
            }
        }
    }

    if !events.is_empty() {
        events.sort_by(|a, b| a.mod_revision().cmp(&b.mod_revision()).then_with(|| a.key().cmp(b.key())));
        state.watch_handle.tell(WatchMsg::Publish(events)).await.ok();
    }
    mirror(state, records).await;

    Ok(TxnResponse {
        succeeded,
        responses,
        revision,
    })
}

async fn get_and_watch(
    state: &mut KvState,
    request: RangeRequest,
    range: KeyRange,
    include_prev_kv: bool,
) -> Result<(RangeResponse, WatchId, tokio::sync::mpsc::Receiver<WatchEvent>), CoreError> {
    let snapshot = get(state, &request)?;
    let start_revision = state.revision.current() + 1;
    let (watch_id, rx) = create_watch(&state.watch_handle, range, start_revision, include_prev_kv).await?;
    Ok((snapshot, watch_id, rx))
}

async fn on_revoke(state: &mut KvState, keys: Vec<String>) -> Result<(), CoreError> {
    let present: Vec<String> = keys
        .into_iter()
        .filter(|k| state.cache.contains_key(k))
        .collect();
    if present.is_empty() {
        return Ok(());
    }
    delete_many(state, present).await
}

/// Deletes an explicit set of keys (not necessarily contiguous) as a single
/// atomic, single-revision operation, used by lease expiry/revoke.
async fn delete_many(state: &mut KvState, keys: Vec<String>) -> Result<(), CoreError> {
    let revision = state.revision.advance();
    let mut events = Vec::with_capacity(keys.len());
    let mut records = Vec::with_capacity(keys.len());
    for key in &keys {
        if let Some(prior) = state.cache.remove(key) {
            let deleted_kv = KeyValue {
                key: key.clone(),
                value: Vec::new(),
                create_revision: prior.create_revision,
                mod_revision: revision,
                version: prior.version,
                lease_id: 0,
            };
            records.push(BackupRecord::Delete { key: key.clone(), revision });
            events.push(WatchEvent::Delete {
                kv: deleted_kv,
                prev_kv: Some(prior),
            });
        }
    }
    events.sort_by(|a, b| a.key().cmp(b.key()));
    state.watch_handle.tell(WatchMsg::Publish(events)).await.ok();
    mirror(state, records).await;
    Ok(())
}
