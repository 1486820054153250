//! Local placement decision: picks the first NORMAL unit whose free
//! capacity covers a request, a first-fit (not optimal-search) style shared
//! with the group controller's local decision step.

use std::collections::BTreeMap;

use yr_base::ids::UnitId;
use yr_resourceview::{ResourceView, Value};

pub fn find_fit(view: &ResourceView, requested: &BTreeMap<String, Value>) -> Option<UnitId> {
    for unit in view.units() {
        if unit.status != yr_resourceview::UnitStatus::Normal {
            continue;
        }
        let fits = requested.iter().all(|(name, requested_value)| {
            let Some(capacity_value) = unit.capacity.get(name) else {
                return false;
            };
            let Some(allocated_value) = unit.allocated.get(name) else {
                return false;
            };
            let Ok(free) = capacity_value.sub(allocated_value) else {
                return false;
            };
            requested_value.le(&free).unwrap_or(false)
        });
        if fits {
            return Some(unit.id.clone());
        }
    }
    None
}
