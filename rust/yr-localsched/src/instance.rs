//! Instance record (spec §3, "Instance").

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use yr_base::ids::{AgentId, InstanceId, UnitId};
use yr_resourceview::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Scheduling,
    Creating,
    Running,
    Exited,
    Failed,
}

impl InstanceState {
    /// Enforces "transitions SCHEDULING→CREATING→RUNNING are monotone".
    pub fn can_advance_to(self, next: InstanceState) -> bool {
        use InstanceState::*;
        matches!(
            (self, next),
            (Scheduling, Creating)
                | (Creating, Running)
                | (Scheduling, Failed)
                | (Creating, Failed)
                | (Running, Exited)
                | (Scheduling, Exited)
                | (Creating, Exited)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceState::Exited | InstanceState::Failed)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleOptions {
    pub resource_group: Option<String>,
    pub affinity: Option<String>,
    pub grouping: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Placement {
    pub unit_id: Option<UnitId>,
    pub agent_id: Option<AgentId>,
    pub runtime_id: Option<String>,
}

impl Placement {
    pub fn is_empty(&self) -> bool {
        self.unit_id.is_none() && self.agent_id.is_none() && self.runtime_id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub tenant: String,
    pub function_spec: String,
    pub schedule_options: ScheduleOptions,
    pub requested_resources: BTreeMap<String, Value>,
    pub state: InstanceState,
    pub placement: Placement,
    pub revision: i64,
}

impl Instance {
    pub fn new(
        id: InstanceId,
        tenant: impl Into<String>,
        function_spec: impl Into<String>,
        requested_resources: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            id,
            tenant: tenant.into(),
            function_spec: function_spec.into(),
            schedule_options: ScheduleOptions::default(),
            requested_resources,
            state: InstanceState::Scheduling,
            placement: Placement::default(),
            revision: 0,
        }
    }

    /// Applies a state transition, enforcing monotonicity and the
    /// RUNNING-implies-placement invariant.
    pub fn transition(&mut self, next: InstanceState) -> Result<(), yr_base::error::CoreError> {
        if self.state.is_terminal() {
            return Err(yr_base::error::CoreError::InnerSystemError(format!(
                "instance {} is in terminal state {:?}, cannot transition to {:?}",
                self.id, self.state, next
            )));
        }
        if !self.state.can_advance_to(next) {
            return Err(yr_base::error::CoreError::InnerSystemError(format!(
                "instance {} cannot move from {:?} to {:?}",
                self.id, self.state, next
            )));
        }
        if next == InstanceState::Running && self.placement.is_empty() {
            return Err(yr_base::error::CoreError::InnerSystemError(format!(
                "instance {} entering RUNNING without a placement",
                self.id
            )));
        }
        self.state = next;
        self.revision += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> Instance {
        Instance::new(InstanceId::new("i1"), "tenant-a", "fn:hello", BTreeMap::new())
    }

    #[test]
    fn running_requires_a_placement() {
        let mut inst = instance();
        inst.transition(InstanceState::Creating).unwrap();
        let err = inst.transition(InstanceState::Running).unwrap_err();
        assert_eq!(err.kind(), yr_base::error::ErrorKind::InnerSystemError);
    }

    #[test]
    fn running_succeeds_once_placement_is_set() {
        let mut inst = instance();
        inst.placement.unit_id = Some(UnitId::new("u1"));
        inst.transition(InstanceState::Creating).unwrap();
        inst.transition(InstanceState::Running).unwrap();
        assert_eq!(inst.state, InstanceState::Running);
        assert_eq!(inst.revision, 2);
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        let mut inst = instance();
        inst.transition(InstanceState::Failed).unwrap();
        assert!(inst.transition(InstanceState::Creating).is_err());
    }

    #[test]
    fn skipping_creating_is_rejected() {
        let mut inst = instance();
        inst.placement.unit_id = Some(UnitId::new("u1"));
        assert!(inst.transition(InstanceState::Running).is_err());
    }
}
