//! Registration protocol (spec §4.2) and topology ownership. A
//! `RegistrationService` owns the in-memory [`Topology`] for one tree,
//! persists it to the metadata store on every mutation, and lets other
//! components pick it up again through [`yr_metastore::MetaStore::get`]
//! on the same key — a watch on that key is how "the parent MUST publish
//! the updated topology to the child's peers" is satisfied without a
//! separate fan-out mechanism.
//!
//! Persists are coalesced through [`PersistCoalescer`]: a persist request
//! never waits for its put to land, so the mailbox keeps draining while one
//! is outstanding, and any mutation that arrives in the meantime overwrites
//! `pending` instead of queuing a put of its own. Exactly one follow-up put
//! carries the latest topology once the in-flight one completes (spec §4.6,
//! "single pending promise collects all further updates").

use std::sync::Arc;

use tokio::sync::Mutex;

use yr_base::actor::{spawn_actor, ActorHandle, Reply};
use yr_base::error::CoreError;
use yr_metastore::{MetaStore, PutRequest};

use crate::topology::Topology;

pub const TOPOLOGY_KEY: &str = "/yr/scheduler/topology";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterCode {
    Success,
    Rejected,
}

pub struct RegisterRequest {
    pub parent: Option<String>,
    pub name: String,
    pub address: String,
}

pub struct RegisteredResponse {
    pub code: RegisterCode,
    pub message: String,
    pub topology: Topology,
}

pub enum RegistrationMsg {
    Register {
        request: RegisterRequest,
        reply: Reply<Result<RegisteredResponse, CoreError>>,
    },
    Unregister {
        name: String,
        reply: Reply<Result<(), CoreError>>,
    },
    MarkBroken {
        name: String,
    },
    /// Forced removal after a heartbeat timeout: marks BROKEN then removes,
    /// matching §4.2's "forced removal ... marks the node BROKEN before
    /// removal, so that replacement selection has a slot to fill".
    RemoveBroken {
        name: String,
        reply: Reply<Option<crate::topology::Node>>,
    },
    Snapshot {
        reply: Reply<Topology>,
    },
    /// Moves an already-registered, currently-orphaned node under a new
    /// parent without recreating it (spec §4.6 replacement handling).
    Reparent {
        parent: String,
        name: String,
        reply: Reply<Result<(), CoreError>>,
    },
}

pub type RegistrationHandle = ActorHandle<RegistrationMsg>;

/// Coalesces concurrent topology persists: while a put is in flight, further
/// mutations just overwrite `pending` with their snapshot instead of
/// queuing their own put, so exactly one follow-up put carries the latest
/// topology once the in-flight one completes (spec §4.6, "single pending
/// promise collects all further updates").
#[derive(Default)]
struct PersistCoalescer {
    in_flight: bool,
    pending: Option<Topology>,
}

struct RegistrationState {
    topology: Topology,
    meta_store: MetaStore,
    coalescer: Arc<Mutex<PersistCoalescer>>,
}

pub async fn spawn_registration_service(
    mailbox_size: usize,
    meta_store: MetaStore,
    root_name: Option<(String, String)>,
) -> RegistrationHandle {
    let mut topology = Topology::new();
    if let Some((name, address)) = root_name {
        topology
            .set_root(&name, &address)
            .expect("fresh topology always accepts its own root");
    }
    persist(&meta_store, &topology).await;

    let state = RegistrationState {
        topology,
        meta_store,
        coalescer: Arc::new(Mutex::new(PersistCoalescer::default())),
    };
    spawn_actor(mailbox_size, state, |state, msg| handle(state, msg))
}

async fn persist(meta_store: &MetaStore, topology: &Topology) {
    if let Err(err) = meta_store
        .put(PutRequest {
            key: TOPOLOGY_KEY.to_string(),
            value: topology.to_bytes(),
            lease_id: 0,
            prev_kv: false,
        })
        .await
    {
        tracing::warn!(%err, "failed to persist topology");
    }
}

/// Requests a persist of the current topology. Returns as soon as the
/// snapshot is either handed to a freshly spawned put or folded into the
/// pending state of one already in flight — it never waits for the put
/// itself, which is what lets the mailbox keep draining while a slow put
/// is outstanding.
async fn request_persist(state: &RegistrationState) {
    let mut guard = state.coalescer.lock().await;
    if guard.in_flight {
        guard.pending = Some(state.topology.clone());
        return;
    }
    guard.in_flight = true;
    drop(guard);
    spawn_persist_loop(state.coalescer.clone(), state.meta_store.clone(), state.topology.clone());
}

fn spawn_persist_loop(coalescer: Arc<Mutex<PersistCoalescer>>, meta_store: MetaStore, mut snapshot: Topology) {
    tokio::spawn(async move {
        loop {
            persist(&meta_store, &snapshot).await;
            let mut guard = coalescer.lock().await;
            match guard.pending.take() {
                Some(next) => snapshot = next,
                None => {
                    guard.in_flight = false;
                    return;
                }
            }
        }
    });
}

async fn handle(state: &mut RegistrationState, msg: RegistrationMsg) {
    match msg {
        RegistrationMsg::Register { request, reply } => {
            let result = register(state, request).await;
            let _ = reply.send(result);
        }
        RegistrationMsg::Unregister { name, reply } => {
            state.topology.remove(&name);
            request_persist(state).await;
            let _ = reply.send(Ok(()));
        }
        RegistrationMsg::MarkBroken { name } => {
            state.topology.mark_broken(&name);
            request_persist(state).await;
        }
        RegistrationMsg::RemoveBroken { name, reply } => {
            state.topology.mark_broken(&name);
            let removed = state.topology.remove(&name);
            request_persist(state).await;
            let _ = reply.send(removed);
        }
        RegistrationMsg::Snapshot { reply } => {
            let _ = reply.send(state.topology.clone());
        }
        RegistrationMsg::Reparent { parent, name, reply } => {
            let result = state.topology.reparent(&parent, &name);
            if result.is_ok() {
                request_persist(state).await;
            }
            let _ = reply.send(result);
        }
    }
}

/// On a name collision with an existing node, registration is rejected
/// rather than replacing the incumbent (resolves an explicit open question
/// in the spec in favor of the source's behavior).
async fn register(
    state: &mut RegistrationState,
    request: RegisterRequest,
) -> Result<RegisteredResponse, CoreError> {
    if state.topology.contains(&request.name) {
        return Ok(RegisteredResponse {
            code: RegisterCode::Rejected,
            message: format!("name {} already registered", request.name),
            topology: state.topology.clone(),
        });
    }

    let outcome = match &request.parent {
        Some(parent) => state.topology.attach_child(parent, &request.name, &request.address),
        None => state.topology.set_root(&request.name, &request.address),
    };

    match outcome {
        Ok(()) => {
            request_persist(state).await;
            Ok(RegisteredResponse {
                code: RegisterCode::Success,
                message: "registered".to_string(),
                topology: state.topology.clone(),
            })
        }
        Err(err) => Ok(RegisteredResponse {
            code: RegisterCode::Rejected,
            message: err.to_string(),
            topology: state.topology.clone(),
        }),
    }
}
