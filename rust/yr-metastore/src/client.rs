//! Public facade over the watch/kv/lease actor trio (spec §4.1). Other
//! crates (local/domain/global schedulers, group controller, bundle
//! manager) depend on this type rather than reaching into the actors
//! directly, mirroring how the original exposes a single `MetaStoreClient`
//! façade over its three service actors.

use std::sync::Arc;

use tokio::sync::mpsc;

use yr_base::error::CoreError;
use yr_base::ids::LeaseId;

use crate::backup::{BackupConfig, BackupSink};
use crate::lease::{spawn_lease_actor, LeaseConfig, LeaseHandle, LeaseMsg};
use crate::store::{spawn_kv_actor, KvBackup, KvHandle, KvMsg};
use crate::types::{
    DeleteRangeRequest, DeleteRangeResponse, Lease, PutRequest, PutResponse, RangeRequest,
    RangeResponse, TxnRequest, TxnResponse, WatchEvent,
};
use crate::watch::{spawn_watch_actor, WatchHandle, WatchId, WatchMsg};

#[derive(Clone)]
pub struct MetaStore {
    kv: KvHandle,
    lease: LeaseHandle,
    watch: WatchHandle,
}

impl MetaStore {
    /// Spins up the watch, kv and lease actors and wires the lease actor's
    /// handle back into the kv actor, breaking the construction cycle the
    /// two services otherwise have on each other (kv calls lease's
    /// Attach/Detach on Put; lease calls kv's OnRevoke on expiry). No backup
    /// sink is wired in, so nothing is mirrored or recovered on restart; use
    /// [`MetaStore::spawn_with_backup`] for a node that must survive a
    /// restart (spec §4.1 "Persistence and recovery").
    pub async fn spawn(config: LeaseConfig) -> Self {
        let watch_handle = spawn_watch_actor(1024);
        let kv_handle = spawn_kv_actor(1024, watch_handle.clone(), Vec::new(), None);
        let lease_handle = spawn_lease_actor(kv_handle.clone(), config);
        // best-effort: the kv actor's mailbox was just created, so this send
        // cannot fail under normal startup.
        let _ = kv_handle.tell(KvMsg::SetLeaseHandle(lease_handle.clone())).await;

        Self {
            kv: kv_handle,
            lease: lease_handle,
            watch: watch_handle,
        }
    }

    /// Like [`MetaStore::spawn`], but mirrors every committed mutation to
    /// `sink` and replays the sink's contents back into the cache before
    /// serving any request, advancing the revision counter to the max
    /// recovered `mod_revision` (spec §4.1). `enable_sync_sys_func` forces a
    /// synchronous mirror for keys under `/metastore-system-func/` (§6.1),
    /// matching the `enableSyncSysFunc` config knob (§6.3).
    pub async fn spawn_with_backup(
        config: LeaseConfig,
        sink: Arc<dyn BackupSink>,
        backup_config: BackupConfig,
        enable_sync_sys_func: bool,
    ) -> Self {
        let writer = Arc::new(crate::backup::BackupWriter::new(sink, backup_config));
        let recovered = match writer.recover("").await {
            Ok(kvs) => kvs,
            Err(err) => {
                tracing::warn!(%err, "backup recovery failed, starting with an empty store");
                Vec::new()
            }
        };
        let backup = KvBackup {
            writer,
            enable_sync_sys_func,
        };

        let watch_handle = spawn_watch_actor(1024);
        let kv_handle = spawn_kv_actor(1024, watch_handle.clone(), recovered, Some(backup));
        let lease_handle = spawn_lease_actor(kv_handle.clone(), config);
        let _ = kv_handle.tell(KvMsg::SetLeaseHandle(lease_handle.clone())).await;

        Self {
            kv: kv_handle,
            lease: lease_handle,
            watch: watch_handle,
        }
    }

    /// Explicitly cancels a watch by id (spec line 73). The watcher's
    /// channel receives a final [`WatchEvent::Canceled`] before closing.
    pub async fn cancel_watch(&self, id: WatchId) -> Result<(), CoreError> {
        self.watch
            .tell(WatchMsg::Cancel {
                id,
                reason: "canceled by client".to_string(),
            })
            .await
    }

    pub async fn put(&self, request: PutRequest) -> Result<PutResponse, CoreError> {
        self.kv.ask(|reply| KvMsg::Put { request, reply }).await?
    }

    pub async fn get(&self, request: RangeRequest) -> Result<RangeResponse, CoreError> {
        self.kv.ask(|reply| KvMsg::Get { request, reply }).await?
    }

    pub async fn delete(&self, request: DeleteRangeRequest) -> Result<DeleteRangeResponse, CoreError> {
        self.kv.ask(|reply| KvMsg::Delete { request, reply }).await?
    }

    pub async fn txn(&self, request: TxnRequest) -> Result<TxnResponse, CoreError> {
        self.kv.ask(|reply| KvMsg::Txn { request, reply }).await?
    }

    pub async fn get_and_watch(
        &self,
        request: RangeRequest,
        range: crate::types::KeyRange,
        include_prev_kv: bool,
    ) -> Result<(RangeResponse, WatchId, mpsc::Receiver<WatchEvent>), CoreError> {
        self.kv
            .ask(|reply| KvMsg::GetAndWatch {
                request,
                range,
                include_prev_kv,
                reply,
            })
            .await?
    }

    pub async fn grant_lease(&self, ttl_ms: i64) -> Result<Lease, CoreError> {
        self.lease
            .ask(|reply| LeaseMsg::Grant {
                ttl_ms,
                requested_id: 0,
                reply,
            })
            .await?
    }

    pub async fn revoke_lease(&self, id: LeaseId) -> Result<(), CoreError> {
        self.lease.ask(|reply| LeaseMsg::Revoke { id, reply }).await?
    }

    pub async fn keep_alive_lease(&self, id: LeaseId) -> Result<i64, CoreError> {
        self.lease.ask(|reply| LeaseMsg::KeepAlive { id, reply }).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KeyRange;

    #[tokio::test]
    async fn lease_expiry_deletes_attached_key() {
        let store = MetaStore::spawn(LeaseConfig {
            node_id: 1,
            sweep_interval_ms: 10,
        })
        .await;

        let lease = store.grant_lease(20).await.unwrap();
        store
            .put(PutRequest {
                key: "/sn/ephemeral".to_string(),
                value: b"x".to_vec(),
                lease_id: lease.id.0,
                prev_kv: false,
            })
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(120)).await;

        let response = store.get(RangeRequest::point("/sn/ephemeral")).await.unwrap();
        assert!(response.kvs.is_empty());
    }

    #[tokio::test]
    async fn get_and_watch_only_sees_events_after_the_snapshot() {
        let store = MetaStore::spawn(LeaseConfig::default()).await;
        store
            .put(PutRequest {
                key: "/sn/a".to_string(),
                value: b"before".to_vec(),
                lease_id: 0,
                prev_kv: false,
            })
            .await
            .unwrap();

        let (snapshot, _id, mut rx) = store
            .get_and_watch(
                RangeRequest::prefix("/sn/"),
                KeyRange::Prefix("/sn/".to_string()),
                false,
            )
            .await
            .unwrap();
        assert_eq!(snapshot.kvs.len(), 1);

        store
            .put(PutRequest {
                key: "/sn/b".to_string(),
                value: b"after".to_vec(),
                lease_id: 0,
                prev_kv: false,
            })
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.key(), "/sn/b");
    }
}
