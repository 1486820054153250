//! Local Scheduler: per-host admission, the reserve/bind protocol callee
//! side, group kill and agent eviction (spec §4.4).

mod decision;
mod instance;
mod parent;
mod scheduler;

pub use decision::find_fit;
pub use instance::{Instance, InstanceState, Placement, ScheduleOptions};
pub use parent::{NoParent, ParentLink, ReserveOutcome};
pub use scheduler::{
    spawn_local_scheduler, LocalSchedulerConfig, LocalSchedulerHandle, LocalSchedulerMsg,
    ScheduleOutcome,
};
