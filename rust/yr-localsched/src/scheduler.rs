//! The Local Scheduler actor (spec §4.4): admission for one host's worth of
//! resource units, the reserve/bind/unreserve/unbind callee side of §4.8,
//! agent eviction and group kill.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use yr_base::actor::{spawn_actor, ActorHandle, Reply};
use yr_base::error::CoreError;
use yr_base::ids::{AgentId, GroupId, InstanceId, RequestId, UnitId};
use yr_base::reservation::ReservationTable;
use yr_metastore::{MetaStore, PutRequest};
use yr_resourceview::{Allocation, ResourceView};

use crate::decision::find_fit;
use crate::instance::{Instance, InstanceState};
use crate::parent::{ParentLink, ReserveOutcome};

/// What's recorded once a fit is found locally: the unit chosen and the
/// allocation it was reserved for, so Bind can re-apply it without
/// re-running the decision.
#[derive(Debug, Clone)]
struct Decision {
    instance_id: InstanceId,
    unit_id: UnitId,
    allocation: Allocation,
}

#[derive(Debug, Clone)]
pub enum ScheduleOutcome {
    Placed { unit_id: UnitId },
    ForwardedAndPlaced { agent_id: String },
    Infeasible,
}

pub struct LocalSchedulerConfig {
    pub reservation_ttl_ms: i64,
    pub reservation_sweep_interval_ms: u64,
}

impl Default for LocalSchedulerConfig {
    fn default() -> Self {
        // reservedTimeoutMs default (spec §6.3).
        Self {
            reservation_ttl_ms: 120_000,
            reservation_sweep_interval_ms: 1_000,
        }
    }
}

pub enum LocalSchedulerMsg {
    Schedule {
        instance: Instance,
        reply: Reply<Result<ScheduleOutcome, CoreError>>,
    },
    Reserve {
        request_id: RequestId,
        instance_id: InstanceId,
        requested: Allocation,
        reply: Reply<Result<ReserveOutcome, CoreError>>,
    },
    Bind {
        request_id: RequestId,
        reply: Reply<Result<(), CoreError>>,
    },
    UnReserve {
        request_id: RequestId,
        reply: Reply<Result<(), CoreError>>,
    },
    UnBind {
        request_id: RequestId,
        reply: Reply<Result<(), CoreError>>,
    },
    EvictAgent {
        agent_id: AgentId,
        reply: Reply<Result<(), CoreError>>,
    },
    KillGroup {
        group_id: GroupId,
        reply: Reply<Result<usize, CoreError>>,
    },
    SweepReservations,
}

pub type LocalSchedulerHandle = ActorHandle<LocalSchedulerMsg>;

struct LocalSchedulerState {
    view: ResourceView,
    reservations: ReservationTable<Decision>,
    instances: BTreeMap<InstanceId, Instance>,
    groups: BTreeMap<GroupId, HashSet<InstanceId>>,
    meta_store: MetaStore,
    parent: Arc<dyn ParentLink>,
    config: LocalSchedulerConfig,
}

pub fn spawn_local_scheduler(
    mailbox_size: usize,
    view: ResourceView,
    meta_store: MetaStore,
    parent: Arc<dyn ParentLink>,
    config: LocalSchedulerConfig,
) -> LocalSchedulerHandle {
    let sweep_interval_ms = config.reservation_sweep_interval_ms;
    let state = LocalSchedulerState {
        view,
        reservations: ReservationTable::new(),
        instances: BTreeMap::new(),
        groups: BTreeMap::new(),
        meta_store,
        parent,
        config,
    };
    let handle = spawn_actor(mailbox_size, state, |state, msg| handle_msg(state, msg));

    let sweep_handle = handle.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(sweep_interval_ms));
        loop {
            ticker.tick().await;
            if sweep_handle.tell(LocalSchedulerMsg::SweepReservations).await.is_err() {
                break;
            }
        }
    });

    handle
}

async fn handle_msg(state: &mut LocalSchedulerState, msg: LocalSchedulerMsg) {
    match msg {
        LocalSchedulerMsg::Schedule { instance, reply } => {
            let result = schedule(state, instance).await;
            let _ = reply.send(result);
        }
        LocalSchedulerMsg::Reserve {
            request_id,
            instance_id,
            requested,
            reply,
        } => {
            let result = reserve(state, request_id, instance_id, requested);
            let _ = reply.send(result);
        }
        LocalSchedulerMsg::Bind { request_id, reply } => {
            let result = bind(state, request_id).await;
            let _ = reply.send(result);
        }
        LocalSchedulerMsg::UnReserve { request_id, reply } => {
            let result = unreserve(state, &request_id);
            let _ = reply.send(result);
        }
        LocalSchedulerMsg::UnBind { request_id, reply } => {
            let result = unbind(state, &request_id).await;
            let _ = reply.send(result);
        }
        LocalSchedulerMsg::EvictAgent { agent_id, reply } => {
            let result = evict_agent(state, &agent_id).await;
            let _ = reply.send(result);
        }
        LocalSchedulerMsg::KillGroup { group_id, reply } => {
            let result = kill_group(state, &group_id).await;
            let _ = reply.send(result);
        }
        LocalSchedulerMsg::SweepReservations => {
            sweep(state);
        }
    }
}

/// §4.4 Schedule flow: transition to SCHEDULING, run the local decision; on
/// a local fit reserve+bind immediately; on no fit forward to the parent.
async fn schedule(state: &mut LocalSchedulerState, instance: Instance) -> Result<ScheduleOutcome, CoreError> {
    if let Some(unit_id) = find_fit(&state.view, &instance.requested_resources) {
        let allocation = Allocation {
            requested: instance.requested_resources.clone(),
            exclusive: false,
        };
        let mut batch = BTreeMap::new();
        batch.insert(instance.id.clone(), allocation);
        state.view.add_instances(&unit_id, batch)?;

        instance.placement.unit_id = Some(unit_id.clone());
        instance.transition(InstanceState::Creating)?;
        instance.transition(InstanceState::Running)?;
        persist_instance(&state.meta_store, &instance).await;
        track_group(state, &instance);
        state.instances.insert(instance.id.clone(), instance);
        return Ok(ScheduleOutcome::Placed { unit_id });
    }

    let request_id = RequestId::generate();
    let allocation = Allocation {
        requested: instance.requested_resources.clone(),
        exclusive: false,
    };
    match state.parent.forward_reserve(request_id.clone(), allocation).await? {
        ReserveOutcome::Success { agent_id, .. } => {
            state.parent.forward_bind(request_id).await?;
            instance.transition(InstanceState::Creating)?;
            persist_instance(&state.meta_store, &instance).await;
            track_group(state, &instance);
            state.instances.insert(instance.id.clone(), instance);
            Ok(ScheduleOutcome::ForwardedAndPlaced { agent_id })
        }
        ReserveOutcome::NoFit => {
            instance.transition(InstanceState::Failed)?;
            persist_instance(&state.meta_store, &instance).await;
            Ok(ScheduleOutcome::Infeasible)
        }
    }
}

fn track_group(state: &mut LocalSchedulerState, instance: &Instance) {
    if let Some(group) = &instance.schedule_options.grouping {
        state
            .groups
            .entry(GroupId::new(group.clone()))
            .or_default()
            .insert(instance.id.clone());
    }
}

fn untrack_group(state: &mut LocalSchedulerState, instance: &Instance) {
    if let Some(group) = &instance.schedule_options.grouping {
        let group_id = GroupId::new(group.clone());
        if let Some(members) = state.groups.get_mut(&group_id) {
            members.remove(&instance.id);
            if members.is_empty() {
                state.groups.remove(&group_id);
            }
        }
    }
}

async fn persist_instance(meta_store: &MetaStore, instance: &Instance) {
    let Ok(bytes) = bincode::serialize(instance) else {
        tracing::warn!(instance = %instance.id, "failed to encode instance record");
        return;
    };
    if let Err(err) = meta_store
        .put(PutRequest {
            key: format!("/yr/instance/{}", instance.id),
            value: bytes,
            lease_id: 0,
            prev_kv: false,
        })
        .await
    {
        tracing::warn!(%err, instance = %instance.id, "failed to persist instance record");
    }
}

/// Callee-side Reserve (spec §4.8): a parent Domain Scheduler is asking this
/// Local Scheduler to hold a slot. Idempotent on duplicate request ids.
fn reserve(
    state: &mut LocalSchedulerState,
    request_id: RequestId,
    instance_id: InstanceId,
    requested: Allocation,
) -> Result<ReserveOutcome, CoreError> {
    if let Some(existing) = state.reservations.existing(&request_id) {
        return Ok(ReserveOutcome::Success {
            agent_id: existing.unit_id.to_string(),
            unit_id: existing.unit_id.to_string(),
        });
    }

    let Some(unit_id) = find_fit(&state.view, &requested.requested) else {
        return Ok(ReserveOutcome::NoFit);
    };

    let mut batch = BTreeMap::new();
    batch.insert(instance_id.clone(), requested.clone());
    state.view.add_instances(&unit_id, batch)?;

    state.reservations.reserve(
        request_id,
        Decision {
            instance_id,
            unit_id: unit_id.clone(),
            allocation: requested,
        },
        state.config.reservation_ttl_ms,
    );

    Ok(ReserveOutcome::Success {
        agent_id: unit_id.to_string(),
        unit_id: unit_id.to_string(),
    })
}

/// Callee-side Bind. Per §4.8's edge case, binding is attempted even if the
/// reservation timer already fired, as long as the entry is still present
/// (not yet swept).
async fn bind(state: &mut LocalSchedulerState, request_id: RequestId) -> Result<(), CoreError> {
    let Some(decision) = state.reservations.bind(&request_id) else {
        return Err(CoreError::InnerSystemError(format!(
            "no reservation for request {request_id} to bind"
        )));
    };

    if let Some(instance) = state.instances.get_mut(&decision.instance_id) {
        instance.placement.unit_id = Some(decision.unit_id.clone());
        instance.transition(InstanceState::Creating).ok();
        persist_instance(&state.meta_store, instance).await;
    }
    Ok(())
}

/// Explicit rollback (spec §4.8): credits resources back on the primary
/// view. Used both for an unreserved-but-not-bound entry and, via the same
/// code path from `sweep`, for timer-expired ones.
fn unreserve(state: &mut LocalSchedulerState, request_id: &RequestId) -> Result<(), CoreError> {
    let Some(decision) = state.reservations.unreserve(request_id) else {
        return Ok(());
    };
    state.view.delete_instances(&decision.unit_id, &[decision.instance_id])?;
    Ok(())
}

async fn unbind(state: &mut LocalSchedulerState, request_id: &RequestId) -> Result<(), CoreError> {
    let Some(decision) = state.reservations.unreserve(request_id) else {
        return Ok(());
    };
    state.view.delete_instances(&decision.unit_id, &[decision.instance_id.clone()])?;
    if let Some(mut instance) = state.instances.remove(&decision.instance_id) {
        instance.transition(InstanceState::Exited).ok();
        persist_instance(&state.meta_store, &instance).await;
    }
    Ok(())
}

fn sweep(state: &mut LocalSchedulerState) {
    let expired = state.reservations.sweep_expired();
    for (request_id, decision) in expired {
        tracing::info!(%request_id, unit = %decision.unit_id, "reservation expired, releasing");
        if let Err(err) = state.view.delete_instances(&decision.unit_id, &[decision.instance_id]) {
            tracing::warn!(%err, "failed to credit back expired reservation");
        }
    }
}

/// §4.4 EvictAgent: drain and remove every instance on the unit(s) backing
/// this agent, then drop the unit itself.
async fn evict_agent(state: &mut LocalSchedulerState, agent_id: &AgentId) -> Result<(), CoreError> {
    let unit_id = UnitId::new(agent_id.as_str());
    let Some(unit) = state.view.get(&unit_id) else {
        return Ok(());
    };
    let instance_ids: Vec<InstanceId> = unit.instances.keys().cloned().collect();
    if !instance_ids.is_empty() {
        state.view.delete_instances(&unit_id, &instance_ids)?;
    }
    for instance_id in &instance_ids {
        if let Some(mut instance) = state.instances.remove(instance_id) {
            instance.transition(InstanceState::Exited).ok();
            persist_instance(&state.meta_store, &instance).await;
        }
    }
    state.view.delete_resource_unit(&unit_id);
    Ok(())
}

/// §4.4 KillGroup: cascade-deletes all instances tracked under `group_id`.
async fn kill_group(state: &mut LocalSchedulerState, group_id: &GroupId) -> Result<usize, CoreError> {
    let Some(instance_ids) = state.groups.remove(group_id) else {
        return Ok(0);
    };
    let mut killed = 0;
    for instance_id in instance_ids {
        if let Some(instance) = state.instances.get(&instance_id) {
            if let Some(unit_id) = instance.placement.unit_id.clone() {
                state.view.delete_instances(&unit_id, &[instance_id.clone()]).ok();
            }
        }
        if let Some(mut instance) = state.instances.remove(&instance_id) {
            instance.transition(InstanceState::Exited).ok();
            persist_instance(&state.meta_store, &instance).await;
            killed += 1;
        }
    }
    Ok(killed)
}
