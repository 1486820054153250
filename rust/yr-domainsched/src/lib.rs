//! Domain Scheduler: mid-tier placement over a subtree's aggregated
//! resource view, and the callee side of the Reserve/Bind/UnReserve/UnBind
//! protocol one level up toward its own parent (spec §4.7, §4.8). A Domain
//! Scheduler's children are either Local Schedulers or nested Domain
//! Schedulers; both are addressed through the same [`child::ChildLink`].

mod child;
mod decision;
mod scheduler;

pub use child::{ChildLink, NoParent, ParentLink, ReserveOutcome};
pub use decision::candidate_children;
pub use scheduler::{
    spawn_domain_scheduler, DomainSchedulerConfig, DomainSchedulerHandle, DomainSchedulerMsg,
    ScheduleOutcome,
};
