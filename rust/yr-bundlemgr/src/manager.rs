//! Bundle Manager actor (spec §4.10): the Reserve/Bind/UnReserve/UnBind
//! callee side for bundles (not instances — a bundle itself is the thing
//! being reserved here), `RemoveBundle`'s cascading teardown, agent-abnormal
//! cleanup, and metadata-store reconciliation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use yr_base::actor::{spawn_actor, ActorHandle, Reply};
use yr_base::error::CoreError;
use yr_base::ids::{AgentId, BundleId, NodeId, RequestId, UnitId};
use yr_base::reservation::ReservationTable;
use yr_metastore::{MetaStore, PutRequest, RangeRequest};
use yr_resourceview::{ResourceUnit, ResourceView, Value};

use crate::bundle::{virtual_unit_labels, Bundle, BundleCollection, BundleStatus};
use crate::report::ResourceGroupLink;

#[derive(Debug, Clone)]
pub enum ReserveOutcome {
    Success { bundle_id: BundleId },
    /// The bundle id is already Bound; a bundle can't be re-reserved once
    /// materialized.
    NoFit,
}

pub struct BundleManagerConfig {
    pub reservation_ttl_ms: i64,
    pub reservation_sweep_interval_ms: u64,
}

impl Default for BundleManagerConfig {
    fn default() -> Self {
        Self {
            // reservedTimeoutMs default (spec §6.3).
            reservation_ttl_ms: 120_000,
            reservation_sweep_interval_ms: 1_000,
        }
    }
}

pub enum BundleManagerMsg {
    Reserve {
        request_id: RequestId,
        bundle_id: BundleId,
        owner_rg: String,
        parent_rg: Option<String>,
        agent_id: AgentId,
        labels: BTreeMap<String, Value>,
        reserved_resources: BTreeMap<String, Value>,
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
    RemoveBundle {
        bundle_id: BundleId,
        reply: Reply<Result<usize, CoreError>>,
    },
    AgentAbnormal {
        agent_id: AgentId,
        reply: Reply<Result<usize, CoreError>>,
    },
    Reconcile {
        reply: Reply<Result<(), CoreError>>,
    },
    SweepReservations,
}

pub type BundleManagerHandle = ActorHandle<BundleManagerMsg>;

struct BundleManagerState {
    node_id: NodeId,
    view: ResourceView,
    bundles: BundleCollection,
    reservations: ReservationTable<BundleId>,
    meta_store: MetaStore,
    resource_group: Arc<dyn ResourceGroupLink>,
    config: BundleManagerConfig,
}

pub fn spawn_bundle_manager(
    mailbox_size: usize,
    node_id: NodeId,
    meta_store: MetaStore,
    resource_group: Arc<dyn ResourceGroupLink>,
    config: BundleManagerConfig,
) -> BundleManagerHandle {
    let sweep_interval_ms = config.reservation_sweep_interval_ms;
    let state = BundleManagerState {
        node_id,
        view: ResourceView::new(),
        bundles: BundleCollection::new(),
        reservations: ReservationTable::new(),
        meta_store,
        resource_group,
        config,
    };
    let handle = spawn_actor(mailbox_size, state, |state, msg| handle_msg(state, msg));

    let sweep_handle = handle.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(sweep_interval_ms));
        loop {
            ticker.tick().await;
            if sweep_handle.tell(BundleManagerMsg::SweepReservations).await.is_err() {
                break;
            }
        }
    });

    handle
}

#[allow(clippy::too_many_arguments)]
async fn handle_msg(state: &mut BundleManagerState, msg: BundleManagerMsg) {
    match msg {
        BundleManagerMsg::Reserve {
            request_id,
            bundle_id,
            owner_rg,
            parent_rg,
            agent_id,
            labels,
            reserved_resources,
            reply,
        } => {
            let result = reserve(state, request_id, bundle_id, owner_rg, parent_rg, agent_id, labels, reserved_resources).await;
            let _ = reply.send(result);
        }
        BundleManagerMsg::Bind { request_id, reply } => {
            let result = bind(state, request_id).await;
            let _ = reply.send(result);
        }
        BundleManagerMsg::UnReserve { request_id, reply } => {
            let result = unreserve(state, &request_id).await;
            let _ = reply.send(result);
        }
        BundleManagerMsg::UnBind { request_id, reply } => {
            let result = unbind(state, &request_id).await;
            let _ = reply.send(result);
        }
        BundleManagerMsg::RemoveBundle { bundle_id, reply } => {
            let result = remove_bundle(state, &bundle_id).await;
            let _ = reply.send(result);
        }
        BundleManagerMsg::AgentAbnormal { agent_id, reply } => {
            let result = agent_abnormal(state, &agent_id).await;
            let _ = reply.send(result);
        }
        BundleManagerMsg::Reconcile { reply } => {
            let result = reconcile(state).await;
            let _ = reply.send(result);
        }
        BundleManagerMsg::SweepReservations => {
            sweep(state).await;
        }
    }
}

/// Callee-side Reserve (spec §4.10/§4.8): idempotent on duplicate request
/// ids; rejects re-reserving a bundle id already materialized (Bound).
#[allow(clippy::too_many_arguments)]
async fn reserve(
    state: &mut BundleManagerState,
    request_id: RequestId,
    bundle_id: BundleId,
    owner_rg: String,
    parent_rg: Option<String>,
    agent_id: AgentId,
    labels: BTreeMap<String, Value>,
    reserved_resources: BTreeMap<String, Value>,
) -> Result<ReserveOutcome, CoreError> {
    if let Some(existing) = state.reservations.existing(&request_id) {
        return Ok(ReserveOutcome::Success { bundle_id: existing });
    }
    if matches!(state.bundles.get(&bundle_id), Some(b) if b.status == BundleStatus::Bound) {
        return Ok(ReserveOutcome::NoFit);
    }

    state.bundles.insert(
        bundle_id.clone(),
        Bundle {
            bundle_id: bundle_id.clone(),
            owner_rg,
            parent_rg,
            agent_id,
            labels,
            reserved_resources,
            status: BundleStatus::Reserved,
        },
    );
    state.reservations.reserve(request_id, bundle_id.clone(), state.config.reservation_ttl_ms);
    Ok(ReserveOutcome::Success { bundle_id })
}

/// Callee-side Bind: materializes the bundle's virtual resource unit in
/// the view and persists the collection (spec §4.10).
async fn bind(state: &mut BundleManagerState, request_id: RequestId) -> Result<(), CoreError> {
    let Some(bundle_id) = state.reservations.bind(&request_id) else {
        return Err(CoreError::InnerSystemError(format!(
            "no reservation for request {request_id} to bind"
        )));
    };
    let Some(bundle) = state.bundles.get_mut(&bundle_id) else {
        return Err(CoreError::InnerSystemError(format!("bundle {bundle_id} not found for bind")));
    };
    bundle.status = BundleStatus::Bound;

    let index = state.bundles.values().filter(|b| b.owner_rg == state.bundles[&bundle_id].owner_rg).count();
    let bundle = &state.bundles[&bundle_id];
    let labels = virtual_unit_labels(bundle, index);
    let mut unit = ResourceUnit::new(UnitId::new(bundle_id.as_str()), bundle.reserved_resources.clone());
    unit.labels = labels;
    state.view.add_resource_unit(unit)?;

    persist_bundles(state).await;
    Ok(())
}

/// Explicit rollback before Bind: drops the Reserved bundle record.
async fn unreserve(state: &mut BundleManagerState, request_id: &RequestId) -> Result<(), CoreError> {
    let Some(bundle_id) = state.reservations.unreserve(request_id) else {
        return Ok(());
    };
    state.bundles.remove(&bundle_id);
    persist_bundles(state).await;
    Ok(())
}

/// Releases an already-Bound bundle: drops its virtual unit and record.
async fn unbind(state: &mut BundleManagerState, request_id: &RequestId) -> Result<(), CoreError> {
    let Some(bundle_id) = state.reservations.unreserve(request_id) else {
        return Ok(());
    };
    state.view.delete_resource_unit(&UnitId::new(bundle_id.as_str()));
    state.bundles.remove(&bundle_id);
    persist_bundles(state).await;
    Ok(())
}

/// §4.10 RemoveBundle: force-deletes instances landed in the bundle, cascades
/// into child bundles rooted in this bundle's resource group, releases the
/// virtual unit, deletes the record. Returns the number of bundles removed
/// (this one plus its descendants).
async fn remove_bundle(state: &mut BundleManagerState, bundle_id: &BundleId) -> Result<usize, CoreError> {
    let removed = remove_bundle_cascade(state, bundle_id);
    persist_bundles(state).await;
    Ok(removed)
}

fn remove_bundle_cascade(state: &mut BundleManagerState, bundle_id: &BundleId) -> usize {
    let Some(bundle) = state.bundles.remove(bundle_id) else {
        return 0;
    };
    let unit_id = UnitId::new(bundle_id.as_str());
    if let Some(unit) = state.view.get(&unit_id) {
        let instance_ids: Vec<_> = unit.instances.keys().cloned().collect();
        if !instance_ids.is_empty() {
            let _ = state.view.delete_instances(&unit_id, &instance_ids);
        }
    }
    state.view.delete_resource_unit(&unit_id);

    let child_ids: Vec<BundleId> = state
        .bundles
        .values()
        .filter(|b| b.parent_rg.as_deref() == Some(bundle.owner_rg.as_str()))
        .map(|b| b.bundle_id.clone())
        .collect();

    let mut total = 1;
    for child_id in child_ids {
        total += remove_bundle_cascade(state, &child_id);
    }
    total
}

/// §4.10 agent failure path: reports the agent to the resource-group manager
/// and, on acknowledgment, deletes every bundle owned on that agent.
async fn agent_abnormal(state: &mut BundleManagerState, agent_id: &AgentId) -> Result<usize, CoreError> {
    let acknowledged = state.resource_group.report_agent_abnormal(agent_id.clone()).await?;
    if !acknowledged {
        return Ok(0);
    }

    let affected: Vec<BundleId> = state
        .bundles
        .values()
        .filter(|b| &b.agent_id == agent_id)
        .map(|b| b.bundle_id.clone())
        .collect();

    let mut total = 0;
    for bundle_id in affected {
        if state.bundles.contains_key(&bundle_id) {
            total += remove_bundle_cascade(state, &bundle_id);
        }
    }
    persist_bundles(state).await;
    Ok(total)
}

/// §4.10 "on metadata-store recovery the BM reconciles its in-memory map
/// with MS": reloads the persisted collection and rebuilds virtual units
/// for every Bound bundle found there.
async fn reconcile(state: &mut BundleManagerState) -> Result<(), CoreError> {
    let response = state.meta_store.get(RangeRequest::point(bundle_key(&state.node_id))).await?;
    let Some(kv) = response.kvs.into_iter().next() else {
        return Ok(());
    };
    let loaded: BundleCollection = bincode::deserialize(&kv.value)
        .map_err(|err| CoreError::InnerSystemError(format!("failed to decode bundle collection: {err}")))?;

    state.view = ResourceView::new();
    for (index, bundle) in loaded.values().enumerate() {
        if bundle.status != BundleStatus::Bound {
            continue;
        }
        let mut unit = ResourceUnit::new(UnitId::new(bundle.bundle_id.as_str()), bundle.reserved_resources.clone());
        unit.labels = virtual_unit_labels(bundle, index);
        let _ = state.view.add_resource_unit(unit);
    }
    state.bundles = loaded;
    Ok(())
}

async fn sweep(state: &mut BundleManagerState) {
    let expired = state.reservations.sweep_expired();
    if expired.is_empty() {
        return;
    }
    for (request_id, bundle_id) in &expired {
        tracing::info!(%request_id, %bundle_id, "bundle reservation expired, releasing");
        state.bundles.remove(bundle_id);
    }
    persist_bundles(state).await;
}

fn bundle_key(node_id: &NodeId) -> String {
    format!("/yr/bundle/{node_id}")
}

async fn persist_bundles(state: &BundleManagerState) {
    let Ok(bytes) = bincode::serialize(&state.bundles) else {
        tracing::warn!(node = %state.node_id, "failed to encode bundle collection");
        return;
    };
    if let Err(err) = state
        .meta_store
        .put(PutRequest { key: bundle_key(&state.node_id), value: bytes, lease_id: 0, prev_kv: false })
        .await
    {
        tracing::warn!(%err, node = %state.node_id, "failed to persist bundle collection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::NoResourceGroupManager;
    use yr_metastore::LeaseConfig;

    async fn handle() -> BundleManagerHandle {
        let meta_store = MetaStore::spawn(LeaseConfig::default()).await;
        spawn_bundle_manager(
            16,
            NodeId::new("node-1"),
            meta_store,
            Arc::new(NoResourceGroupManager),
            BundleManagerConfig::default(),
        )
    }

    fn cpu(n: i64) -> BTreeMap<String, Value> {
        let mut m = BTreeMap::new();
        m.insert("cpu".to_string(), Value::Scalar(n));
        m
    }

    async fn reserve_and_bind(handle: &BundleManagerHandle, bundle_id: &str, owner_rg: &str, parent_rg: Option<&str>) -> RequestId {
        let request_id = RequestId::generate();
        handle
            .ask(|reply| BundleManagerMsg::Reserve {
                request_id: request_id.clone(),
                bundle_id: BundleId::new(bundle_id),
                owner_rg: owner_rg.to_string(),
                parent_rg: parent_rg.map(|s| s.to_string()),
                agent_id: AgentId::new("agent-1"),
                labels: BTreeMap::new(),
                reserved_resources: cpu(4),
                reply,
            })
            .await
            .unwrap()
            .unwrap();
        handle.ask(|reply| BundleManagerMsg::Bind { request_id: request_id.clone(), reply }).await.unwrap().unwrap();
        request_id
    }

    #[tokio::test]
    async fn bind_materializes_a_virtual_unit() {
        let handle = handle().await;
        reserve_and_bind(&handle, "b1", "rg-a", None).await;
        // No direct accessor on the handle for the view in this test setup;
        // RemoveBundle exercises the unit's presence indirectly below.
        let removed = handle
            .ask(|reply| BundleManagerMsg::RemoveBundle { bundle_id: BundleId::new("b1"), reply })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn remove_bundle_cascades_into_child_bundles() {
        let handle = handle().await;
        reserve_and_bind(&handle, "parent", "rg-parent", None).await;
        reserve_and_bind(&handle, "child", "rg-child", Some("rg-parent")).await;

        let removed = handle
            .ask(|reply| BundleManagerMsg::RemoveBundle { bundle_id: BundleId::new("parent"), reply })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(removed, 2);
    }

    #[tokio::test]
    async fn duplicate_reserve_is_idempotent() {
        let handle = handle().await;
        let request_id = RequestId::generate();

        let first = handle
            .ask(|reply| BundleManagerMsg::Reserve {
                request_id: request_id.clone(),
                bundle_id: BundleId::new("b1"),
                owner_rg: "rg-a".to_string(),
                parent_rg: None,
                agent_id: AgentId::new("agent-1"),
                labels: BTreeMap::new(),
                reserved_resources: cpu(4),
                reply,
            })
            .await
            .unwrap()
            .unwrap();
        let second = handle
            .ask(|reply| BundleManagerMsg::Reserve {
                request_id: request_id.clone(),
                bundle_id: BundleId::new("b1"),
                owner_rg: "rg-a".to_string(),
                parent_rg: None,
                agent_id: AgentId::new("agent-1"),
                labels: BTreeMap::new(),
                reserved_resources: cpu(4),
                reply,
            })
            .await
            .unwrap()
            .unwrap();

        match (first, second) {
            (ReserveOutcome::Success { bundle_id: a }, ReserveOutcome::Success { bundle_id: b }) => assert_eq!(a, b),
            other => panic!("expected two successes, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn agent_abnormal_removes_every_bundle_on_that_agent() {
        let handle = handle().await;
        reserve_and_bind(&handle, "b1", "rg-a", None).await;
        reserve_and_bind(&handle, "b2", "rg-b", None).await;

        let removed = handle
            .ask(|reply| BundleManagerMsg::AgentAbnormal { agent_id: AgentId::new("agent-1"), reply })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(removed, 2);
    }

    #[tokio::test]
    async fn reconcile_rebuilds_from_persisted_collection() {
        let handle = handle().await;
        reserve_and_bind(&handle, "b1", "rg-a", None).await;

        handle.ask(|reply| BundleManagerMsg::Reconcile { reply }).await.unwrap().unwrap();

        let removed = handle
            .ask(|reply| BundleManagerMsg::RemoveBundle { bundle_id: BundleId::new("b1"), reply })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(removed, 1);
    }
}
