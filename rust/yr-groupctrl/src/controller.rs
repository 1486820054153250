//! Group Controller actor (spec §4.9): gang-scheduled creation and teardown
//! of a fixed-size or range-sized set of instances, all-or-nothing.

use std::collections::BTreeMap;
use std::sync::Arc;

use yr_base::actor::{spawn_actor, ActorHandle, Reply};
use yr_base::error::CoreError;
use yr_base::ids::{GroupId, InstanceId};
use yr_localsched::{Instance, InstanceState};
use yr_metastore::{DeleteRangeRequest, MetaStore, PutRequest};
use yr_resourceview::{Allocation, ResourceView, Value};

use crate::decision::{group_decision, PlacedInstance};
use crate::group::{validate_group_request, Group, GroupPolicy, GroupState, InstanceRequest, RangeRequest};
use crate::parent::{GroupParentLink, GroupPlacementOutcome};

#[derive(Debug, Clone)]
pub enum GroupScheduleOutcome {
    Placed { instance_ids: Vec<InstanceId> },
    ForwardedAndPlaced { instance_ids: Vec<InstanceId> },
    Infeasible,
}

pub enum GroupControllerMsg {
    CreateGroup {
        group_id: GroupId,
        owner_address: String,
        requests: Vec<InstanceRequest>,
        range_request: Option<RangeRequest>,
        range_template: Option<InstanceRequest>,
        policy: GroupPolicy,
        reply: Reply<Result<GroupScheduleOutcome, CoreError>>,
    },
    ClearGroup {
        group_id: GroupId,
        reply: Reply<Result<usize, CoreError>>,
    },
}

pub type GroupControllerHandle = ActorHandle<GroupControllerMsg>;

struct GroupControllerState {
    view: ResourceView,
    meta_store: MetaStore,
    parent: Arc<dyn GroupParentLink>,
    groups: BTreeMap<GroupId, Group>,
    instances: BTreeMap<InstanceId, Instance>,
}

pub fn spawn_group_controller(
    mailbox_size: usize,
    view: ResourceView,
    meta_store: MetaStore,
    parent: Arc<dyn GroupParentLink>,
) -> GroupControllerHandle {
    let state = GroupControllerState {
        view,
        meta_store,
        parent,
        groups: BTreeMap::new(),
        instances: BTreeMap::new(),
    };
    spawn_actor(mailbox_size, state, |state, msg| handle_msg(state, msg))
}

async fn handle_msg(state: &mut GroupControllerState, msg: GroupControllerMsg) {
    match msg {
        GroupControllerMsg::CreateGroup {
            group_id,
            owner_address,
            requests,
            range_request,
            range_template,
            policy,
            reply,
        } => {
            let result = create_group(state, group_id, owner_address, requests, range_request, range_template, policy).await;
            let _ = reply.send(result);
        }
        GroupControllerMsg::ClearGroup { group_id, reply } => {
            let result = clear_group(state, &group_id).await;
            let _ = reply.send(result);
        }
    }
}

/// §4.9 CreateGroup: dedup by `group_id`, validate, transition to SCHEDULING
/// and persist, run the local decision trying member counts from `max` down
/// to `min` for range requests, commit all-or-nothing locally or forward the
/// whole group to the parent, and force-delete every synthesized instance if
/// nothing works.
#[allow(clippy::too_many_arguments)]
async fn create_group(
    state: &mut GroupControllerState,
    group_id: GroupId,
    owner_address: String,
    requests: Vec<InstanceRequest>,
    range_request: Option<RangeRequest>,
    range_template: Option<InstanceRequest>,
    policy: GroupPolicy,
) -> Result<GroupScheduleOutcome, CoreError> {
    if let Some(existing) = state.groups.get(&group_id) {
        return Ok(GroupScheduleOutcome::Placed { instance_ids: existing.members.clone() });
    }

    create_group_inner(state, group_id, owner_address, requests, range_request, range_template, policy).await
}

#[allow(clippy::too_many_arguments)]
async fn create_group_inner(
    state: &mut GroupControllerState,
    group_id: GroupId,
    owner_address: String,
    requests: Vec<InstanceRequest>,
    range_request: Option<RangeRequest>,
    range_template: Option<InstanceRequest>,
    policy: GroupPolicy,
) -> Result<GroupScheduleOutcome, CoreError> {
    validate_group_request(&requests, &range_request, policy)?;

    let counts = candidate_counts(&requests, &range_request);

    // The largest count is attempted first so a group only shrinks toward
    // `min` when the full size truly doesn't fit (spec §4.9 range request).
    let chosen = counts
        .first()
        .copied()
        .ok_or_else(|| CoreError::ParamInvalid("group request yields no candidate size".to_string()))?;

    let member_requests = synthesize_requests(&group_id, &requests, range_template.as_ref(), chosen);

    let mut group = Group {
        id: group_id.clone(),
        owner_address,
        requests: member_requests.1.clone(),
        range_request,
        state: GroupState::Scheduling,
        policy,
        members: member_requests.0.iter().map(|(id, _)| id.clone()).collect(),
    };
    persist_group(&state.meta_store, &group).await;

    let mut synthesized = Vec::with_capacity(member_requests.0.len());
    for (instance_id, spec) in &member_requests.0 {
        let mut instance = Instance::new(instance_id.clone(), spec.tenant.clone(), spec.function_spec.clone(), spec.requested_resources.clone());
        instance.schedule_options = spec.schedule_options.clone();
        persist_instance(&state.meta_store, &instance).await;
        synthesized.push(instance.id.clone());
        state.instances.insert(instance.id.clone(), instance);
    }

    for count in &counts {
        let attempt: Vec<(InstanceId, BTreeMap<String, Value>)> = member_requests
            .0
            .iter()
            .take(*count as usize)
            .map(|(id, spec)| (id.clone(), spec.requested_resources.clone()))
            .collect();

        if let Some(placements) = group_decision(&state.view, &attempt, policy) {
            if commit_locally(state, &placements).await.is_ok() {
                // A partial range success only placed `count` of the
                // `chosen`-sized synthesized set; the unplaced tail was
                // never passed to `commit_locally` and must be torn down,
                // not left to leak in `state.instances`/the metastore.
                let achieved = *count as usize;
                let (placed, excess) = synthesized.split_at(achieved);
                for instance_id in excess {
                    state.instances.remove(instance_id);
                    delete_instance_record(&state.meta_store, instance_id).await;
                }
                group.members = placed.to_vec();
                group.state = GroupState::Running;
                persist_group(&state.meta_store, &group).await;
                let instance_ids = group.members.clone();
                state.groups.insert(group_id, group);
                return Ok(GroupScheduleOutcome::Placed { instance_ids });
            }
        }
    }

    let forward_requests: Vec<(InstanceId, BTreeMap<String, Value>)> = member_requests
        .0
        .iter()
        .map(|(id, spec)| (id.clone(), spec.requested_resources.clone()))
        .collect();

    match state.parent.forward_group(group_id.clone(), forward_requests, policy).await {
        Ok(GroupPlacementOutcome::Success { placements }) => {
            for placement in &placements {
                if let Some(instance) = state.instances.get_mut(&placement.instance_id) {
                    instance.placement.unit_id = Some(placement.unit_id.clone());
                    instance.placement.agent_id = Some(placement.agent_id.clone());
                    instance.transition(InstanceState::Creating).ok();
                    persist_instance(&state.meta_store, instance).await;
                }
            }
            group.state = GroupState::Running;
            persist_group(&state.meta_store, &group).await;
            state.groups.insert(group_id, group.clone());
            Ok(GroupScheduleOutcome::ForwardedAndPlaced { instance_ids: group.members })
        }
        Ok(GroupPlacementOutcome::Failure { reason }) => {
            tracing::warn!(%group_id, %reason, "group forward failed, tearing down synthesized instances");
            fail_group(state, &group_id, &synthesized).await;
            Ok(GroupScheduleOutcome::Infeasible)
        }
        Err(err) => {
            tracing::warn!(%group_id, %err, "group forward errored, tearing down synthesized instances");
            fail_group(state, &group_id, &synthesized).await;
            Ok(GroupScheduleOutcome::Infeasible)
        }
    }
}

/// Range requests are tried from `max` down to `min` in steps of `step`,
/// always including `min` itself even if the stride overshoots it.
fn candidate_counts(requests: &[InstanceRequest], range_request: &Option<RangeRequest>) -> Vec<u32> {
    match range_request {
        Some(range) => {
            let mut counts = Vec::new();
            let mut n = range.max;
            while n > range.min {
                counts.push(n);
                n = n.saturating_sub(range.step);
            }
            counts.push(range.min);
            counts
        }
        None => vec![requests.len() as u32],
    }
}

/// Builds the member list: a `range_template` clone per member for range
/// requests, or the caller-supplied list verbatim otherwise. Instance ids
/// are always synthesized here (spec §4.9: a caller-designated instance id
/// is invalid on a group request).
fn synthesize_requests(
    group_id: &GroupId,
    requests: &[InstanceRequest],
    range_template: Option<&InstanceRequest>,
    count: u32,
) -> (Vec<(InstanceId, InstanceRequest)>, Vec<InstanceRequest>) {
    let members: Vec<InstanceRequest> = match range_template {
        Some(template) => (0..count).map(|_| template.clone()).collect(),
        None => requests.to_vec(),
    };
    let with_ids: Vec<(InstanceId, InstanceRequest)> = members
        .iter()
        .enumerate()
        .map(|(i, spec)| (InstanceId::new(format!("{group_id}-{i}")), spec.clone()))
        .collect();
    (with_ids, members)
}

/// Applies every placement to the view, rolling back whatever was already
/// applied if a later one fails (spec §4.9: rollback-all-on-any-failure).
async fn commit_locally(state: &mut GroupControllerState, placements: &[PlacedInstance]) -> Result<(), CoreError> {
    let mut applied = Vec::with_capacity(placements.len());
    for placement in placements {
        let mut batch = BTreeMap::new();
        let Some(instance) = state.instances.get(&placement.instance_id) else {
            continue;
        };
        batch.insert(
            placement.instance_id.clone(),
            Allocation { requested: instance.requested_resources.clone(), exclusive: false },
        );
        match state.view.add_instances(&placement.unit_id, batch) {
            Ok(()) => applied.push(placement.clone()),
            Err(err) => {
                for done in &applied {
                    let _ = state.view.delete_instances(&done.unit_id, &[done.instance_id.clone()]);
                }
                return Err(err);
            }
        }
    }

    for placement in placements {
        if let Some(instance) = state.instances.get_mut(&placement.instance_id) {
            instance.placement.unit_id = Some(placement.unit_id.clone());
            instance.transition(InstanceState::Creating).ok();
            instance.transition(InstanceState::Running).ok();
            persist_instance(&state.meta_store, instance).await;
        }
    }
    Ok(())
}

/// Total failure: force-deletes every synthesized instance's record (not
/// merely a state transition) and marks the group Failed.
async fn fail_group(state: &mut GroupControllerState, group_id: &GroupId, instance_ids: &[InstanceId]) {
    for instance_id in instance_ids {
        state.instances.remove(instance_id);
        delete_instance_record(&state.meta_store, instance_id).await;
    }
    // Nothing is left behind on total failure: no group record, no member
    // instances, matching the force-delete (not just a state transition).
    state.groups.remove(group_id);
    delete_group_record(&state.meta_store, group_id).await;
}

/// §4.9 ClearGroup: cascading deletion of every member instance plus the
/// group record itself.
async fn clear_group(state: &mut GroupControllerState, group_id: &GroupId) -> Result<usize, CoreError> {
    let Some(group) = state.groups.remove(group_id) else {
        return Ok(0);
    };

    let mut cleared = 0;
    for instance_id in &group.members {
        if let Some(instance) = state.instances.remove(instance_id) {
            if let Some(unit_id) = &instance.placement.unit_id {
                let _ = state.view.delete_instances(unit_id, &[instance_id.clone()]);
            }
        }
        delete_instance_record(&state.meta_store, instance_id).await;
        cleared += 1;
    }
    delete_group_record(&state.meta_store, group_id).await;
    Ok(cleared)
}

async fn persist_group(meta_store: &MetaStore, group: &Group) {
    let Ok(bytes) = bincode::serialize(group) else {
        tracing::warn!(group = %group.id, "failed to encode group record");
        return;
    };
    if let Err(err) = meta_store
        .put(PutRequest { key: format!("/yr/group/{}", group.id), value: bytes, lease_id: 0, prev_kv: false })
        .await
    {
        tracing::warn!(%err, group = %group.id, "failed to persist group record");
    }
}

async fn persist_instance(meta_store: &MetaStore, instance: &Instance) {
    let Ok(bytes) = bincode::serialize(instance) else {
        tracing::warn!(instance = %instance.id, "failed to encode instance record");
        return;
    };
    if let Err(err) = meta_store
        .put(PutRequest { key: format!("/yr/instance/{}", instance.id), value: bytes, lease_id: 0, prev_kv: false })
        .await
    {
        tracing::warn!(%err, instance = %instance.id, "failed to persist instance record");
    }
}

async fn delete_instance_record(meta_store: &MetaStore, instance_id: &InstanceId) {
    let _ = meta_store
        .delete(DeleteRangeRequest { key: format!("/yr/instance/{instance_id}"), range_end: None, prev_kv: false })
        .await;
}

async fn delete_group_record(meta_store: &MetaStore, group_id: &GroupId) {
    let _ = meta_store
        .delete(DeleteRangeRequest { key: format!("/yr/group/{group_id}"), range_end: None, prev_kv: false })
        .await;
}
