//! Bundle Manager: pre-reserved resource-group slots on agents, joinable by
//! a later instance-create through label matching (spec §4.10).

mod bundle;
mod manager;
mod report;

pub use bundle::{virtual_unit_labels, Bundle, BundleCollection, BundleStatus};
pub use manager::{
    spawn_bundle_manager, BundleManagerConfig, BundleManagerHandle, BundleManagerMsg, ReserveOutcome,
};
pub use report::{NoResourceGroupManager, ResourceGroupLink};
