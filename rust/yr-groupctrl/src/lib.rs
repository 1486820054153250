//! Group Controller: gang scheduling, all-or-nothing multi-instance
//! placement under a single policy (spec §4.9).

mod controller;
mod decision;
mod group;
mod parent;

pub use controller::{spawn_group_controller, GroupControllerHandle, GroupControllerMsg, GroupScheduleOutcome};
pub use decision::{group_decision, PlacedInstance};
pub use group::{validate_group_request, Group, GroupPolicy, GroupState, InstanceRequest, RangeRequest, MAX_GROUP_SIZE};
pub use parent::{GroupParentLink, GroupPlacementOutcome, InstancePlacement, NoParent};
