//! The link from a Domain Scheduler down to one of its children — another
//! Domain Scheduler or a Local Scheduler; the wire shape is the same either
//! way (spec §6.2 lists one Reserve/Bind/UnReserve/UnBind family between
//! "any two schedulers"). Kept as a trait per child, mirroring
//! `yr_localsched::parent::ParentLink`'s shape one level up.

use async_trait::async_trait;

use yr_base::error::CoreError;
use yr_base::ids::RequestId;
use yr_resourceview::Allocation;

#[derive(Debug, Clone)]
pub enum ReserveOutcome {
    Success { agent_id: String, unit_id: String },
    NoFit,
}

#[async_trait]
pub trait ChildLink: Send + Sync {
    async fn reserve(&self, request_id: RequestId, requested: Allocation) -> Result<ReserveOutcome, CoreError>;
    async fn bind(&self, request_id: RequestId) -> Result<(), CoreError>;
    async fn unreserve(&self, request_id: RequestId) -> Result<(), CoreError>;
}

/// The same shape, one level up: what this Domain Scheduler asks its own
/// parent (another Domain Scheduler, or the Global Scheduler) when none of
/// its own children has a fit.
#[async_trait]
pub trait ParentLink: Send + Sync {
    async fn forward_reserve(&self, request_id: RequestId, requested: Allocation) -> Result<ReserveOutcome, CoreError>;
    async fn forward_bind(&self, request_id: RequestId) -> Result<(), CoreError>;
    async fn forward_unreserve(&self, request_id: RequestId) -> Result<(), CoreError>;
}

/// A Domain Scheduler with no parent attached — it is the root of the
/// topology. Every forward fails fast with `NoFit` rather than hanging.
pub struct NoParent;

#[async_trait]
impl ParentLink for NoParent {
    async fn forward_reserve(&self, _request_id: RequestId, _requested: Allocation) -> Result<ReserveOutcome, CoreError> {
        Ok(ReserveOutcome::NoFit)
    }

    async fn forward_bind(&self, _request_id: RequestId) -> Result<(), CoreError> {
        Err(CoreError::InnerCommunication("no parent attached".to_string()))
    }

    async fn forward_unreserve(&self, _request_id: RequestId) -> Result<(), CoreError> {
        Ok(())
    }
}
