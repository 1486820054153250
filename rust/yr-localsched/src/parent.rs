//! The link from a Local Scheduler up to its parent Domain Scheduler. Kept
//! as a trait so `yr-localsched` doesn't depend on `yr-domainsched` (which
//! itself depends on the same reserve/bind shapes one layer up) — whoever
//! wires the daemon together supplies the real transport.

use async_trait::async_trait;

use yr_base::error::CoreError;
use yr_base::ids::RequestId;
use yr_resourceview::Allocation;

/// What the LS asks its parent for when its own view can't satisfy a
/// request: the same reserve/bind shape as §4.8, one level up.
#[async_trait]
pub trait ParentLink: Send + Sync {
    async fn forward_reserve(
        &self,
        request_id: RequestId,
        requested: Allocation,
    ) -> Result<ReserveOutcome, CoreError>;

    async fn forward_bind(&self, request_id: RequestId) -> Result<(), CoreError>;

    async fn forward_unreserve(&self, request_id: RequestId) -> Result<(), CoreError>;
}

#[derive(Debug, Clone)]
pub enum ReserveOutcome {
    Success { agent_id: String, unit_id: String },
    NoFit,
}

/// A link with no parent attached (e.g. a single-node deployment, or a test
/// fixture): every forward fails fast rather than hanging.
pub struct NoParent;

#[async_trait]
impl ParentLink for NoParent {
    async fn forward_reserve(
        &self,
        _request_id: RequestId,
        _requested: Allocation,
    ) -> Result<ReserveOutcome, CoreError> {
        Ok(ReserveOutcome::NoFit)
    }

    async fn forward_bind(&self, _request_id: RequestId) -> Result<(), CoreError> {
        Err(CoreError::InnerCommunication("no parent attached".to_string()))
    }

    async fn forward_unreserve(&self, _request_id: RequestId) -> Result<(), CoreError> {
        Ok(())
    }
}
