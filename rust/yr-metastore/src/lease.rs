//! Lease service actor (spec §4.1 "Leases"). Grants TTL-bound lease ids,
//! tracks attached keys, and sweeps expired leases on a timer, calling back
//! into the KV actor's `OnRevoke` to delete the attached keys atomically
//! with the lease itself.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use yr_base::actor::{spawn_actor, ActorHandle, Reply};
use yr_base::error::CoreError;
use yr_base::ids::LeaseId;
use yr_base::revision::{now_micros, now_millis};

use crate::store::{KvHandle, KvMsg};
use crate::types::Lease;

pub enum LeaseMsg {
    Grant {
        ttl_ms: i64,
        requested_id: i64,
        reply: Reply<Result<Lease, CoreError>>,
    },
    Revoke {
        id: LeaseId,
        reply: Reply<Result<(), CoreError>>,
    },
    KeepAlive {
        id: LeaseId,
        reply: Reply<Result<i64, CoreError>>,
    },
    Attach {
        key: String,
        id: LeaseId,
        reply: Reply<Result<(), CoreError>>,
    },
    Detach {
        key: String,
        id: LeaseId,
    },
    Sweep,
}

pub type LeaseHandle = ActorHandle<LeaseMsg>;

struct LeaseState {
    node_id: u16,
    counter: u8,
    leases: HashMap<i64, Lease>,
    kv_handle: KvHandle,
}

pub struct LeaseConfig {
    pub node_id: u16,
    pub sweep_interval_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            sweep_interval_ms: 500,
        }
    }
}

pub fn spawn_lease_actor(kv_handle: KvHandle, config: LeaseConfig) -> LeaseHandle {
    let state = LeaseState {
        node_id: config.node_id,
        counter: 0,
        leases: HashMap::new(),
        kv_handle,
    };
    let handle = spawn_actor(256, state, |state, msg| handle_msg(state, msg));

    let sweep_handle = handle.clone();
    let interval_ms = config.sweep_interval_ms;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            ticker.tick().await;
            if sweep_handle.tell(LeaseMsg::Sweep).await.is_err() {
                break;
            }
        }
    });

    handle
}

async fn handle_msg(state: &mut LeaseState, msg: LeaseMsg) {
    match msg {
        LeaseMsg::Grant {
            ttl_ms,
            requested_id,
            reply,
        } => {
            let id = if requested_id != 0 {
                LeaseId(requested_id)
            } else {
                state.counter = state.counter.wrapping_add(1);
                LeaseId::pack(state.node_id, now_micros(), state.counter)
            };
            let lease = Lease {
                id,
                ttl_ms,
                expiry_ms: now_millis() + ttl_ms,
                attached_keys: BTreeSet::new(),
            };
            state.leases.insert(id.0, lease.clone());
            let _ = reply.send(Ok(lease));
        }
        LeaseMsg::Revoke { id, reply } => {
            let result = revoke(state, id).await;
            let _ = reply.send(result);
        }
        LeaseMsg::KeepAlive { id, reply } => {
            let result = match state.leases.get_mut(&id.0) {
                Some(lease) => {
                    lease.expiry_ms = now_millis() + lease.ttl_ms;
                    Ok(lease.expiry_ms)
                }
                None => Err(CoreError::EtcdOperationError(format!(
                    "lease {} not found",
                    id
                ))),
            };
            let _ = reply.send(result);
        }
        LeaseMsg::Attach { key, id, reply } => {
            let result = match state.leases.get_mut(&id.0) {
                Some(lease) => {
                    lease.attached_keys.insert(key);
                    Ok(())
                }
                None => Err(CoreError::EtcdOperationError(format!(
                    "lease {} not found",
                    id
                ))),
            };
            let _ = reply.send(result);
        }
        LeaseMsg::Detach { key, id } => {
            if let Some(lease) = state.leases.get_mut(&id.0) {
                lease.attached_keys.remove(&key);
            }
        }
        LeaseMsg::Sweep => {
            sweep(state).await;
        }
    }
}

async fn revoke(state: &mut LeaseState, id: LeaseId) -> Result<(), CoreError> {
    let Some(lease) = state.leases.remove(&id.0) else {
        return Err(CoreError::EtcdOperationError(format!(
            "lease {} not found",
            id
        )));
    };
    let keys: Vec<String> = lease.attached_keys.into_iter().collect();
    if !keys.is_empty() {
        state
            .kv_handle
            .ask(|reply| KvMsg::OnRevoke { keys, reply })
            .await??;
    }
    Ok(())
}

async fn sweep(state: &mut LeaseState) {
    let now = now_millis();
    let expired: Vec<i64> = state
        .leases
        .iter()
        .filter(|(_, lease)| lease.expiry_ms <= now)
        .map(|(id, _)| *id)
        .collect();

    if expired.is_empty() {
        return;
    }

    let mut all_keys: Vec<String> = Vec::new();
    for id in &expired {
        if let Some(lease) = state.leases.remove(id) {
            all_keys.extend(lease.attached_keys);
        }
    }

    tracing::debug!(count = expired.len(), "sweeping expired leases");

    if !all_keys.is_empty() {
        match state
            .kv_handle
            .ask(|reply| KvMsg::OnRevoke {
                keys: all_keys,
                reply,
            })
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) | Err(err) => {
                tracing::warn!(%err, "lease sweep failed to delete attached keys");
            }
        }
    }
}
