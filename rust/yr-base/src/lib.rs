//! Shared building blocks for the scheduling and metadata control plane:
//! stable ids, time/revision helpers, the error taxonomy of spec §7, and a
//! small actor-mailbox runtime used by every component in §4.

pub mod actor;
pub mod error;
pub mod ids;
pub mod reservation;
pub mod revision;

pub use actor::{ActorHandle, Reply};
pub use error::{CoreError, ErrorKind};
pub use ids::{AgentId, BundleId, GroupId, InstanceId, LeaseId, NodeId, RequestId, UnitId};
pub use reservation::{ReservationStatus, ReservationTable};
pub use revision::{MonotonicRevision, now_millis};
