//! Global Scheduler: topology root, Domain Scheduler activation and
//! placement, active-standby leadership over the tree (spec §4.6). Owns no
//! transport of its own — registration, persistence and the topology data
//! type are all [`yr_heartbeat`]; this crate adds the policy layered on
//! top of them.

mod placement;
mod replacement;
mod scheduler;

pub use placement::select_target_ds;
pub use replacement::{BrokenDsSlot, PendingLs, PendingLsQueue, ReplacementQueue};
pub use scheduler::{
    spawn_global_scheduler, GlobalSchedulerHandle, GlobalSchedulerMsg, LsRegisterOutcome,
};
