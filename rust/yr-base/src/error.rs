//! Error taxonomy shared by every component, matching spec §7. The variant
//! names are the stable "kind" the spec documents; callers should match on
//! [`CoreError::kind`] rather than the variant itself when deciding recovery,
//! since new context fields may be added to a variant over time.

use thiserror::Error;

/// Stable error kind, independent of the message carried alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ParamInvalid,
    ResourceNotEnough,
    InstanceDuplicated,
    EtcdOperationError,
    InnerCommunication,
    InnerSystemError,
    GroupScheduleFailed,
    InstanceHealthCheckError,
    HeartbeatLost,
    RegisterError,
}

#[derive(Debug, Error, Clone)]
pub enum CoreError {
    #[error("param invalid: {0}")]
    ParamInvalid(String),

    #[error("resource not enough: {0}")]
    ResourceNotEnough(String),

    #[error("instance duplicated: {0}")]
    InstanceDuplicated(String),

    #[error("metadata store operation failed: {0}")]
    EtcdOperationError(String),

    #[error("inner communication error: {0}")]
    InnerCommunication(String),

    #[error("inner system error (invariant violation): {0}")]
    InnerSystemError(String),

    #[error("group schedule failed: {0}")]
    GroupScheduleFailed(String),

    #[error("instance health check error: {0}")]
    InstanceHealthCheckError(String),

    #[error("heartbeat lost: {0}")]
    HeartbeatLost(String),

    #[error("register error: {0}")]
    RegisterError(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::ParamInvalid(_) => ErrorKind::ParamInvalid,
            CoreError::ResourceNotEnough(_) => ErrorKind::ResourceNotEnough,
            CoreError::InstanceDuplicated(_) => ErrorKind::InstanceDuplicated,
            CoreError::EtcdOperationError(_) => ErrorKind::EtcdOperationError,
            CoreError::InnerCommunication(_) => ErrorKind::InnerCommunication,
            CoreError::InnerSystemError(_) => ErrorKind::InnerSystemError,
            CoreError::GroupScheduleFailed(_) => ErrorKind::GroupScheduleFailed,
            CoreError::InstanceHealthCheckError(_) => ErrorKind::InstanceHealthCheckError,
            CoreError::HeartbeatLost(_) => ErrorKind::HeartbeatLost,
            CoreError::RegisterError(_) => ErrorKind::RegisterError,
        }
    }

    /// §7 propagation policy: MS-transient errors are retried locally and
    /// surfaced only on exhaustion.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::EtcdOperationError | ErrorKind::InnerCommunication
        )
    }

    /// A race lost against another writer's Txn is not a caller-visible
    /// failure: the caller should proceed as if its own request won.
    pub fn is_idempotent_success(&self) -> bool {
        self.kind() == ErrorKind::InstanceDuplicated
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for CoreError {
    fn from(err: tokio::sync::oneshot::error::RecvError) -> Self {
        CoreError::InnerCommunication(format!("actor reply channel dropped: {err}"))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
