//! Domain Scheduler actor (spec §4.7): placement over the aggregated view
//! of a subtree, plus the callee side of §4.8's Reserve/Bind/UnReserve/
//! UnBind protocol one level up (toward this DS's own parent).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use yr_base::actor::{spawn_actor, ActorHandle, Reply};
use yr_base::error::CoreError;
use yr_base::ids::RequestId;
use yr_base::reservation::ReservationTable;
use yr_resourceview::{Allocation, ResourceView};

use crate::child::{ChildLink, ParentLink, ReserveOutcome};
use crate::decision::candidate_children;

#[derive(Debug, Clone)]
pub enum ScheduleOutcome {
    Placed { child_id: String },
    ForwardedAndPlaced { agent_id: String },
    Infeasible,
}

pub struct DomainSchedulerConfig {
    pub reservation_ttl_ms: i64,
    pub reservation_sweep_interval_ms: u64,
    pub max_candidates: usize,
}

impl Default for DomainSchedulerConfig {
    fn default() -> Self {
        Self {
            // reservedTimeoutMs default (spec §6.3).
            reservation_ttl_ms: 120_000,
            reservation_sweep_interval_ms: 1_000,
            max_candidates: 3,
        }
    }
}

/// What's recorded for a reservation this DS placed with a child, so Bind
/// can re-dispatch to the same one without re-running the decision.
#[derive(Debug, Clone)]
struct Decision {
    child_id: String,
}

pub enum DomainSchedulerMsg {
    /// A child forwarded a request this DS couldn't place locally.
    Schedule {
        requested: Allocation,
        reply: Reply<Result<ScheduleOutcome, CoreError>>,
    },
    AttachChild {
        child_id: String,
        link: Arc<dyn ChildLink>,
        reply: Reply<()>,
    },
    DetachChild {
        child_id: String,
        reply: Reply<()>,
    },
    UpdateChildView {
        child_id: String,
        view: ResourceView,
        reply: Reply<()>,
    },
    /// Callee side: this DS's own parent is asking it to reserve.
    Reserve {
        request_id: RequestId,
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
    SweepReservations,
}

pub type DomainSchedulerHandle = ActorHandle<DomainSchedulerMsg>;

struct ChildEntry {
    view: ResourceView,
    link: Arc<dyn ChildLink>,
}

struct DomainSchedulerState {
    children: BTreeMap<String, ChildEntry>,
    reservations: ReservationTable<Decision>,
    parent: Arc<dyn ParentLink>,
    config: DomainSchedulerConfig,
}

pub fn spawn_domain_scheduler(
    mailbox_size: usize,
    parent: Arc<dyn ParentLink>,
    config: DomainSchedulerConfig,
) -> DomainSchedulerHandle {
    let sweep_interval_ms = config.reservation_sweep_interval_ms;
    let state = DomainSchedulerState {
        children: BTreeMap::new(),
        reservations: ReservationTable::new(),
        parent,
        config,
    };
    let handle = spawn_actor(mailbox_size, state, |state, msg| handle_msg(state, msg));

    let sweep_handle = handle.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(sweep_interval_ms));
        loop {
            ticker.tick().await;
            if sweep_handle.tell(DomainSchedulerMsg::SweepReservations).await.is_err() {
                break;
            }
        }
    });

    handle
}

async fn handle_msg(state: &mut DomainSchedulerState, msg: DomainSchedulerMsg) {
    match msg {
        DomainSchedulerMsg::Schedule { requested, reply } => {
            let result = schedule(state, requested).await;
            let _ = reply.send(result);
        }
        DomainSchedulerMsg::AttachChild { child_id, link, reply } => {
            state.children.insert(child_id, ChildEntry { view: ResourceView::new(), link });
            let _ = reply.send(());
        }
        DomainSchedulerMsg::DetachChild { child_id, reply } => {
            state.children.remove(&child_id);
            let _ = reply.send(());
        }
        DomainSchedulerMsg::UpdateChildView { child_id, view, reply } => {
            if let Some(entry) = state.children.get_mut(&child_id) {
                entry.view = view;
            }
            let _ = reply.send(());
        }
        DomainSchedulerMsg::Reserve { request_id, requested, reply } => {
            let result = reserve(state, request_id, requested).await;
            let _ = reply.send(result);
        }
        DomainSchedulerMsg::Bind { request_id, reply } => {
            let result = bind(state, request_id).await;
            let _ = reply.send(result);
        }
        DomainSchedulerMsg::UnReserve { request_id, reply } => {
            let result = unreserve(state, &request_id).await;
            let _ = reply.send(result);
        }
        DomainSchedulerMsg::UnBind { request_id, reply } => {
            let result = unbind(state, &request_id).await;
            let _ = reply.send(result);
        }
        DomainSchedulerMsg::SweepReservations => {
            sweep(state).await;
        }
    }
}

fn views_map(state: &DomainSchedulerState) -> BTreeMap<String, ResourceView> {
    state
        .children
        .iter()
        .map(|(id, entry)| (id.clone(), entry.view.clone()))
        .collect()
}

/// §4.7 Schedule flow: try candidate children in order, falling back to
/// forwarding the whole request to this DS's own parent if none succeed.
async fn schedule(state: &mut DomainSchedulerState, requested: Allocation) -> Result<ScheduleOutcome, CoreError> {
    let views = views_map(state);
    let candidates = candidate_children(&views, &requested.requested, state.config.max_candidates);

    for child_id in candidates {
        let Some(link) = state.children.get(&child_id).map(|c| c.link.clone()) else {
            continue;
        };
        let request_id = RequestId::generate();
        match link.reserve(request_id.clone(), requested.clone()).await {
            Ok(ReserveOutcome::Success { agent_id, .. }) => match link.bind(request_id.clone()).await {
                Ok(()) => return Ok(ScheduleOutcome::Placed { child_id }),
                Err(err) => {
                    tracing::warn!(%child_id, %err, "bind failed on candidate child, rolling back and trying next");
                    let _ = link.unreserve(request_id).await;
                    let _ = agent_id;
                }
            },
            Ok(ReserveOutcome::NoFit) => continue,
            Err(err) => {
                tracing::warn!(%child_id, %err, "reserve failed on candidate child, trying next");
                continue;
            }
        }
    }

    let request_id = RequestId::generate();
    match state.parent.forward_reserve(request_id.clone(), requested).await? {
        ReserveOutcome::Success { agent_id, .. } => {
            state.parent.forward_bind(request_id).await?;
            Ok(ScheduleOutcome::ForwardedAndPlaced { agent_id })
        }
        ReserveOutcome::NoFit => Ok(ScheduleOutcome::Infeasible),
    }
}

/// Callee-side Reserve (spec §4.8): this DS's parent is asking it to hold a
/// slot somewhere in its subtree. Idempotent on duplicate request ids.
async fn reserve(
    state: &mut DomainSchedulerState,
    request_id: RequestId,
    requested: Allocation,
) -> Result<ReserveOutcome, CoreError> {
    if let Some(existing) = state.reservations.existing(&request_id) {
        return Ok(ReserveOutcome::Success {
            agent_id: existing.child_id.clone(),
            unit_id: existing.child_id,
        });
    }

    let views = views_map(state);
    let candidates = candidate_children(&views, &requested.requested, state.config.max_candidates);

    for child_id in candidates {
        let Some(link) = state.children.get(&child_id).map(|c| c.link.clone()) else {
            continue;
        };
        match link.reserve(request_id.clone(), requested.clone()).await {
            Ok(ReserveOutcome::Success { .. }) => {
                state.reservations.reserve(
                    request_id,
                    Decision { child_id: child_id.clone() },
                    state.config.reservation_ttl_ms,
                );
                return Ok(ReserveOutcome::Success {
                    agent_id: child_id.clone(),
                    unit_id: child_id,
                });
            }
            Ok(ReserveOutcome::NoFit) => continue,
            Err(err) => {
                tracing::warn!(%child_id, %err, "reserve failed on candidate child");
                continue;
            }
        }
    }
    Ok(ReserveOutcome::NoFit)
}

/// Callee-side Bind: re-dispatches the same `request_id` down to the child
/// chosen at Reserve time. Per §4.8's edge case this is attempted even if
/// the reservation timer already fired, as long as the entry is present.
async fn bind(state: &mut DomainSchedulerState, request_id: RequestId) -> Result<(), CoreError> {
    let Some(decision) = state.reservations.bind(&request_id) else {
        return Err(CoreError::InnerSystemError(format!(
            "no reservation for request {request_id} to bind"
        )));
    };
    let Some(link) = state.children.get(&decision.child_id).map(|c| c.link.clone()) else {
        return Err(CoreError::InnerSystemError(format!(
            "child {} for reservation {request_id} no longer attached",
            decision.child_id
        )));
    };
    link.bind(request_id).await
}

async fn unreserve(state: &mut DomainSchedulerState, request_id: &RequestId) -> Result<(), CoreError> {
    let Some(decision) = state.reservations.unreserve(request_id) else {
        return Ok(());
    };
    if let Some(entry) = state.children.get(&decision.child_id) {
        entry.link.unreserve(request_id.clone()).await?;
    }
    Ok(())
}

async fn unbind(state: &mut DomainSchedulerState, request_id: &RequestId) -> Result<(), CoreError> {
    unreserve(state, request_id).await
}

async fn sweep(state: &mut DomainSchedulerState) {
    let expired = state.reservations.sweep_expired();
    for (request_id, decision) in expired {
        tracing::info!(%request_id, child = %decision.child_id, "domain scheduler reservation expired, unreserving");
        if let Some(entry) = state.children.get(&decision.child_id) {
            if let Err(err) = entry.link.unreserve(request_id).await {
                tracing::warn!(%err, "failed to unreserve expired reservation on child");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::child::NoParent;
    use std::sync::atomic::{AtomicU32, Ordering};
    use yr_base::ids::UnitId;
    use yr_resourceview::{ResourceUnit, Value};

    struct FakeChild {
        fit: bool,
        bind_fails: bool,
        reserve_calls: AtomicU32,
        unreserve_calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl ChildLink for FakeChild {
        async fn reserve(&self, _request_id: RequestId, _requested: Allocation) -> Result<ReserveOutcome, CoreError> {
            self.reserve_calls.fetch_add(1, Ordering::SeqCst);
            if self.fit {
                Ok(ReserveOutcome::Success { agent_id: "agent-1".to_string(), unit_id: "unit-1".to_string() })
            } else {
                Ok(ReserveOutcome::NoFit)
            }
        }

        async fn bind(&self, _request_id: RequestId) -> Result<(), CoreError> {
            if self.bind_fails {
                Err(CoreError::InnerSystemError("bind race lost".to_string()))
            } else {
                Ok(())
            }
        }

        async fn unreserve(&self, _request_id: RequestId) -> Result<(), CoreError> {
            self.unreserve_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn view_with_cpu(cpu: i64) -> ResourceView {
        let mut view = ResourceView::new();
        let mut capacity = BTreeMap::new();
        capacity.insert("cpu".to_string(), Value::Scalar(cpu));
        view.add_resource_unit(ResourceUnit::new(UnitId::new("u1"), capacity)).unwrap();
        view
    }

    fn requested(cpu: i64) -> Allocation {
        let mut m = BTreeMap::new();
        m.insert("cpu".to_string(), Value::Scalar(cpu));
        Allocation { requested: m, exclusive: false }
    }

    async fn attach(handle: &DomainSchedulerHandle, child_id: &str, link: Arc<dyn ChildLink>, view_cpu: i64) {
        handle
            .ask(|reply| DomainSchedulerMsg::AttachChild { child_id: child_id.to_string(), link, reply })
            .await
            .unwrap();
        handle
            .ask(|reply| DomainSchedulerMsg::UpdateChildView {
                child_id: child_id.to_string(),
                view: view_with_cpu(view_cpu),
                reply,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn schedule_places_on_first_fitting_child() {
        let handle = spawn_domain_scheduler(16, Arc::new(NoParent), DomainSchedulerConfig::default());
        let child = Arc::new(FakeChild {
            fit: true,
            bind_fails: false,
            reserve_calls: AtomicU32::new(0),
            unreserve_calls: AtomicU32::new(0),
        });
        attach(&handle, "ls-1", child, 8).await;

        let outcome = handle
            .ask(|reply| DomainSchedulerMsg::Schedule { requested: requested(4), reply })
            .await
            .unwrap()
            .unwrap();
        match outcome {
            ScheduleOutcome::Placed { child_id } => assert_eq!(child_id, "ls-1"),
            other => panic!("expected Placed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn schedule_rolls_back_and_retries_next_candidate_on_bind_failure() {
        let handle = spawn_domain_scheduler(16, Arc::new(NoParent), DomainSchedulerConfig::default());
        let failing = Arc::new(FakeChild {
            fit: true,
            bind_fails: true,
            reserve_calls: AtomicU32::new(0),
            unreserve_calls: AtomicU32::new(0),
        });
        let succeeding = Arc::new(FakeChild {
            fit: true,
            bind_fails: false,
            reserve_calls: AtomicU32::new(0),
            unreserve_calls: AtomicU32::new(0),
        });
        attach(&handle, "ls-a", failing.clone(), 8).await;
        attach(&handle, "ls-b", succeeding, 8).await;

        let outcome = handle
            .ask(|reply| DomainSchedulerMsg::Schedule { requested: requested(4), reply })
            .await
            .unwrap()
            .unwrap();
        match outcome {
            ScheduleOutcome::Placed { child_id } => assert_eq!(child_id, "ls-b"),
            other => panic!("expected Placed on ls-b, got {other:?}"),
        }
        assert_eq!(failing.unreserve_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn schedule_with_no_fitting_child_and_no_parent_is_infeasible() {
        let handle = spawn_domain_scheduler(16, Arc::new(NoParent), DomainSchedulerConfig::default());
        let child = Arc::new(FakeChild {
            fit: false,
            bind_fails: false,
            reserve_calls: AtomicU32::new(0),
            unreserve_calls: AtomicU32::new(0),
        });
        attach(&handle, "ls-1", child, 8).await;

        let outcome = handle
            .ask(|reply| DomainSchedulerMsg::Schedule { requested: requested(4), reply })
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, ScheduleOutcome::Infeasible));
    }

    #[tokio::test]
    async fn callee_reserve_then_bind_dispatches_to_chosen_child() {
        let handle = spawn_domain_scheduler(16, Arc::new(NoParent), DomainSchedulerConfig::default());
        let child = Arc::new(FakeChild {
            fit: true,
            bind_fails: false,
            reserve_calls: AtomicU32::new(0),
            unreserve_calls: AtomicU32::new(0),
        });
        attach(&handle, "ls-1", child, 8).await;

        let request_id = RequestId::generate();
        let outcome = handle
            .ask(|reply| DomainSchedulerMsg::Reserve { request_id: request_id.clone(), requested: requested(4), reply })
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, ReserveOutcome::Success { .. }));

        handle
            .ask(|reply| DomainSchedulerMsg::Bind { request_id, reply })
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn reservation_sweep_releases_expired_reservation_on_its_child() {
        let handle = spawn_domain_scheduler(
            16,
            Arc::new(NoParent),
            DomainSchedulerConfig { reservation_ttl_ms: -5, reservation_sweep_interval_ms: 10, max_candidates: 3 },
        );
        let child = Arc::new(FakeChild {
            fit: true,
            bind_fails: false,
            reserve_calls: AtomicU32::new(0),
            unreserve_calls: AtomicU32::new(0),
        });
        attach(&handle, "ls-1", child.clone(), 8).await;

        let request_id = RequestId::generate();
        handle
            .ask(|reply| DomainSchedulerMsg::Reserve { request_id, requested: requested(4), reply })
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(child.unreserve_calls.load(Ordering::SeqCst) >= 1);
    }
}
