//! Resource View (spec §4.3): authoritative per-host capacity/allocation
//! accounting, the `Value` tagged union it's built from, and the
//! incremental-diff/virtual-aggregation machinery a Domain Scheduler uses
//! over its children's views (§4.5).

mod diff;
mod unit;
mod value;
mod view;

pub use diff::{ResourceDiff, RevisionCursor, VirtualResourceView};
pub use unit::{Allocation, ResourceUnit, UnitStatus};
pub use value::Value;
pub use view::ResourceView;
