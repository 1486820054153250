//! The Global Scheduler actor (spec §4.6): root of the topology, sole owner
//! of Domain Scheduler activation/placement, active-standby leadership.
//!
//! Topology mutations go through [`yr_heartbeat`]'s registration actor,
//! which owns the persist-coalescing required by spec §4.6 ("single pending
//! promise collects all further updates") itself — see
//! `yr_heartbeat::registration`'s `PersistCoalescer`. This actor does not
//! need a coalescing layer of its own.

use std::sync::Arc;

use yr_base::actor::{spawn_actor, ActorHandle, Reply};
use yr_base::error::CoreError;
use yr_heartbeat::{
    RegisterCode, RegisterRequest, RegisteredResponse, RegistrationHandle, RegistrationMsg, Topology,
};

use crate::placement::select_target_ds;
use crate::replacement::{BrokenDsSlot, PendingLs, PendingLsQueue, ReplacementQueue};

/// Outcome of a Local Scheduler registration attempt, distinct from
/// [`RegisteredResponse`] because an LS can also end up queued rather than
/// attached or outright rejected (spec §4.6, "queue the LS and activate a
/// new DS").
#[derive(Debug, Clone)]
pub enum LsRegisterOutcome {
    Attached(RegisteredResponse),
    QueuedAwaitingDs,
    Rejected { message: String },
}

pub enum GlobalSchedulerMsg {
    SetLeadership {
        is_leader: bool,
    },
    IsLeader {
        reply: Reply<bool>,
    },
    RegisterDs {
        name: String,
        address: String,
        reply: Reply<Result<RegisteredResponse, CoreError>>,
    },
    RegisterLs {
        name: String,
        address: String,
        reply: Reply<Result<LsRegisterOutcome, CoreError>>,
    },
    DsHeartbeatTimeout {
        name: String,
    },
    LsHeartbeatTimeout {
        name: String,
    },
    Snapshot {
        reply: Reply<Topology>,
    },
}

pub type GlobalSchedulerHandle = ActorHandle<GlobalSchedulerMsg>;

struct GlobalSchedulerState {
    registration: RegistrationHandle,
    is_leader: bool,
    ds_round_robin_cursor: usize,
    ds_replacement: ReplacementQueue,
    pending_ls: PendingLsQueue,
    on_ls_abnormal_exit: Arc<dyn Fn(String) + Send + Sync>,
}

/// `is_leader` seeds the active-standby flag; leadership itself is driven
/// externally (spec §4.6, "leadership signal arrives from an external
/// election layer") via [`GlobalSchedulerMsg::SetLeadership`].
pub fn spawn_global_scheduler(
    mailbox_size: usize,
    registration: RegistrationHandle,
    is_leader: bool,
    on_ls_abnormal_exit: Arc<dyn Fn(String) + Send + Sync>,
) -> GlobalSchedulerHandle {
    let state = GlobalSchedulerState {
        registration,
        is_leader,
        ds_round_robin_cursor: 0,
        ds_replacement: ReplacementQueue::new(),
        pending_ls: PendingLsQueue::new(),
        on_ls_abnormal_exit,
    };
    spawn_actor(mailbox_size, state, |state, msg| handle(state, msg))
}

async fn handle(state: &mut GlobalSchedulerState, msg: GlobalSchedulerMsg) {
    match msg {
        GlobalSchedulerMsg::SetLeadership { is_leader } => {
            state.is_leader = is_leader;
        }
        GlobalSchedulerMsg::IsLeader { reply } => {
            let _ = reply.send(state.is_leader);
        }
        GlobalSchedulerMsg::RegisterDs { name, address, reply } => {
            let result = register_ds(state, name, address).await;
            let _ = reply.send(result);
        }
        GlobalSchedulerMsg::RegisterLs { name, address, reply } => {
            let result = register_ls(state, name, address).await;
            let _ = reply.send(result);
        }
        GlobalSchedulerMsg::DsHeartbeatTimeout { name } => {
            ds_heartbeat_timeout(state, name).await;
        }
        GlobalSchedulerMsg::LsHeartbeatTimeout { name } => {
            ls_heartbeat_timeout(state, name).await;
        }
        GlobalSchedulerMsg::Snapshot { reply } => {
            let topology = state.registration.ask(|reply| RegistrationMsg::Snapshot { reply }).await;
            if let Ok(topology) = topology {
                let _ = reply.send(topology);
            }
        }
    }
}

fn not_leader() -> CoreError {
    CoreError::InnerCommunication("not leader; forward this request to the leader".to_string())
}

/// Spec §4.6, "On DS register: attach as child of root (or promote to new
/// root if none)". If a broken-DS slot is waiting, the new DS takes it over
/// and its former children are reparented onto it.
async fn register_ds(
    state: &mut GlobalSchedulerState,
    name: String,
    address: String,
) -> Result<RegisteredResponse, CoreError> {
    if !state.is_leader {
        return Err(not_leader());
    }

    let topology = state.registration.ask(|reply| RegistrationMsg::Snapshot { reply }).await?;
    let parent = topology.root().map(|root| root.to_string());

    let response = state
        .registration
        .ask(|reply| RegistrationMsg::Register {
            request: RegisterRequest { parent, name: name.clone(), address },
            reply,
        })
        .await??;

    if response.code == RegisterCode::Success {
        if let Some(slot) = state.ds_replacement.pop_front() {
            reattach_orphans(state, &name, slot).await;
        }
        drain_pending_ls(state).await;
    }

    Ok(response)
}

async fn reattach_orphans(state: &mut GlobalSchedulerState, new_parent: &str, slot: BrokenDsSlot) {
    for child in slot.orphaned_children {
        let result = state
            .registration
            .ask(|reply| RegistrationMsg::Reparent {
                parent: new_parent.to_string(),
                name: child.name.clone(),
                reply,
            })
            .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(%err, child = %child.name, "failed to reparent orphaned node onto replacement DS"),
            Err(err) => tracing::warn!(%err, child = %child.name, "registration service unreachable while reparenting"),
        }
    }
}

/// Spec §4.6, "On LS register: find a DS with capacity ... if no DS is
/// available queue the LS and activate a new DS, then attach on its
/// registration." Activating a replacement DS process is outside this
/// crate's scope (process lifecycle, like the Function Agent's launcher,
/// lives with the deployment layer); this only maintains the queue so the
/// LS attaches automatically once one registers.
async fn register_ls(
    state: &mut GlobalSchedulerState,
    name: String,
    address: String,
) -> Result<LsRegisterOutcome, CoreError> {
    if !state.is_leader {
        return Err(not_leader());
    }

    let topology = state.registration.ask(|reply| RegistrationMsg::Snapshot { reply }).await?;
    match select_target_ds(&topology, &mut state.ds_round_robin_cursor) {
        Some(ds_name) => {
            let response = state
                .registration
                .ask(|reply| RegistrationMsg::Register {
                    request: RegisterRequest { parent: Some(ds_name), name, address },
                    reply,
                })
                .await??;
            match response.code {
                RegisterCode::Success => Ok(LsRegisterOutcome::Attached(response)),
                RegisterCode::Rejected => Ok(LsRegisterOutcome::Rejected { message: response.message }),
            }
        }
        None => {
            state.pending_ls.push_back(PendingLs { name, address });
            Ok(LsRegisterOutcome::QueuedAwaitingDs)
        }
    }
}

/// Drains as much of the pending-LS queue as current DS capacity allows,
/// stopping (and requeuing the head) the moment no DS is available.
async fn drain_pending_ls(state: &mut GlobalSchedulerState) {
    loop {
        let Some(entry) = state.pending_ls.pop_front() else { break };
        let topology = match state.registration.ask(|reply| RegistrationMsg::Snapshot { reply }).await {
            Ok(t) => t,
            Err(_) => {
                state.pending_ls.push_front(entry);
                break;
            }
        };
        match select_target_ds(&topology, &mut state.ds_round_robin_cursor) {
            Some(ds_name) => {
                let result = state
                    .registration
                    .ask(|reply| RegistrationMsg::Register {
                        request: RegisterRequest {
                            parent: Some(ds_name),
                            name: entry.name.clone(),
                            address: entry.address.clone(),
                        },
                        reply,
                    })
                    .await;
                if !matches!(result, Ok(Ok(RegisteredResponse { code: RegisterCode::Success, .. }))) {
                    tracing::warn!(name = %entry.name, "pending LS failed to attach to newly available DS");
                }
            }
            None => {
                state.pending_ls.push_front(entry);
                break;
            }
        }
    }
}

/// Spec §4.6, "On LS/DS heartbeat timeout: mark the node BROKEN, drop it
/// from the tree, enqueue it for replacement, and persist the new
/// topology." For a DS this also captures its orphaned former children so
/// its replacement can pick them back up.
async fn ds_heartbeat_timeout(state: &mut GlobalSchedulerState, name: String) {
    let topology = match state.registration.ask(|reply| RegistrationMsg::Snapshot { reply }).await {
        Ok(t) => t,
        Err(_) => return,
    };
    let orphaned_children = topology
        .children_of(&name)
        .iter()
        .filter_map(|child_name| topology.get(child_name).cloned())
        .collect::<Vec<_>>();

    let _ = state
        .registration
        .ask(|reply| RegistrationMsg::RemoveBroken { name: name.clone(), reply })
        .await;

    state.ds_replacement.push_back(BrokenDsSlot { broken_name: name, orphaned_children });
}

/// Spec §4.6, "On LS abnormal exit: invoke an LS-abnormal callback (used,
/// for instance, by the GC to fail any pending group it owned)."
async fn ls_heartbeat_timeout(state: &mut GlobalSchedulerState, name: String) {
    let _ = state
        .registration
        .ask(|reply| RegistrationMsg::RemoveBroken { name: name.clone(), reply })
        .await;
    (state.on_ls_abnormal_exit)(name);
}
