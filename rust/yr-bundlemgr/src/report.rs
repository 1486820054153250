//! The upward link to the resource-group manager (spec §4.10: "the BM
//! forwards an 'agent abnormal' report to the resource-group manager ...
//! on acknowledgment the BM deletes affected bundles"). The resource-group
//! manager itself lives above this core and is out of scope; this trait is
//! the seam a real deployment wires a transport into.

use async_trait::async_trait;

use yr_base::error::CoreError;
use yr_base::ids::AgentId;

#[async_trait]
pub trait ResourceGroupLink: Send + Sync {
    /// Reports an agent as abnormal (heartbeat lost, eviction, etc). The
    /// bool return is the acknowledgment the BM waits for before deleting
    /// the affected bundles from its view and MS.
    async fn report_agent_abnormal(&self, agent_id: AgentId) -> Result<bool, CoreError>;
}

/// No resource-group manager attached: acknowledges immediately so BM
/// cleanup proceeds rather than stalling (e.g. single-node deployments,
/// test fixtures).
pub struct NoResourceGroupManager;

#[async_trait]
impl ResourceGroupLink for NoResourceGroupManager {
    async fn report_agent_abnormal(&self, _agent_id: AgentId) -> Result<bool, CoreError> {
        Ok(true)
    }
}
