//! The link from a Group Controller up to its parent (spec §4.9's "forward
//! the whole group request to the parent" fallback). Distinct from the
//! per-instance [`yr_localsched::ParentLink`] shape: a group forward must
//! return an aggregate placement-or-failure outcome for the whole batch at
//! once, not a single reserve/bind pair.

use std::collections::BTreeMap;

use async_trait::async_trait;

use yr_base::error::CoreError;
use yr_base::ids::{AgentId, GroupId, InstanceId, UnitId};
use yr_resourceview::Value;

use crate::group::GroupPolicy;

#[derive(Debug, Clone)]
pub struct InstancePlacement {
    pub instance_id: InstanceId,
    pub unit_id: UnitId,
    pub agent_id: AgentId,
}

#[derive(Debug, Clone)]
pub enum GroupPlacementOutcome {
    Success { placements: Vec<InstancePlacement> },
    Failure { reason: String },
}

#[async_trait]
pub trait GroupParentLink: Send + Sync {
    async fn forward_group(
        &self,
        group_id: GroupId,
        requests: Vec<(InstanceId, BTreeMap<String, Value>)>,
        policy: GroupPolicy,
    ) -> Result<GroupPlacementOutcome, CoreError>;
}

/// No parent attached: every group forward fails fast rather than hanging,
/// mirroring [`yr_localsched::NoParent`] and [`yr_domainsched`]'s own copy.
pub struct NoParent;

#[async_trait]
impl GroupParentLink for NoParent {
    async fn forward_group(
        &self,
        _group_id: GroupId,
        _requests: Vec<(InstanceId, BTreeMap<String, Value>)>,
        _policy: GroupPolicy,
    ) -> Result<GroupPlacementOutcome, CoreError> {
        Ok(GroupPlacementOutcome::Failure { reason: "no parent attached".to_string() })
    }
}
