//! Group placement decision (spec §4.9): PACK/STRICT_PACK try to land every
//! member on one host; SPREAD/STRICT_SPREAD try to land each on a distinct
//! one. Built on the same first-fit style as the local scheduler's decision,
//! extended to reason about a whole batch at once.

use std::collections::{BTreeMap, HashSet};

use yr_base::ids::{InstanceId, UnitId};
use yr_resourceview::{Allocation, ResourceUnit, ResourceView, UnitStatus, Value};

use crate::group::GroupPolicy;

#[derive(Debug, Clone)]
pub struct PlacedInstance {
    pub instance_id: InstanceId,
    pub unit_id: UnitId,
}

/// Attempts to place every `(instance_id, requested)` pair in `requests`
/// according to `policy`. Returns `None` if the policy's requirement
/// (same host for STRICT_PACK, distinct hosts for STRICT_SPREAD) can't be
/// met for the whole batch; partial results are never returned — the caller
/// decides whether a smaller batch (range requests) should be retried.
pub fn group_decision(
    view: &ResourceView,
    requests: &[(InstanceId, BTreeMap<String, Value>)],
    policy: GroupPolicy,
) -> Option<Vec<PlacedInstance>> {
    match policy {
        GroupPolicy::StrictPack => strict_pack(view, requests),
        GroupPolicy::Pack => strict_pack(view, requests).or_else(|| independent_fit(view, requests, false)),
        GroupPolicy::StrictSpread => independent_fit(view, requests, true),
        GroupPolicy::Spread => independent_fit(view, requests, true).or_else(|| independent_fit(view, requests, false)),
    }
}

fn fits(unit: &ResourceUnit, requested: &BTreeMap<String, Value>) -> bool {
    requested.iter().all(|(name, want)| {
        let Some(capacity) = unit.capacity.get(name) else { return false };
        let Some(allocated) = unit.allocated.get(name) else { return false };
        let Ok(free) = capacity.sub(allocated) else { return false };
        want.le(&free).unwrap_or(false)
    })
}

fn sum_requested(requests: &[(InstanceId, BTreeMap<String, Value>)]) -> BTreeMap<String, Value> {
    let mut total: BTreeMap<String, Value> = BTreeMap::new();
    for (_, requested) in requests {
        for (name, value) in requested {
            total
                .entry(name.clone())
                .and_modify(|existing| {
                    if let Ok(sum) = existing.add(value) {
                        *existing = sum;
                    }
                })
                .or_insert_with(|| value.clone());
        }
    }
    total
}

/// STRICT_PACK (and PACK's first attempt): every instance lands on the same
/// unit, so a single unit must cover the sum of every member's request.
fn strict_pack(
    view: &ResourceView,
    requests: &[(InstanceId, BTreeMap<String, Value>)],
) -> Option<Vec<PlacedInstance>> {
    let total = sum_requested(requests);
    let unit_id = view
        .units()
        .filter(|unit| unit.status == UnitStatus::Normal)
        .find(|unit| fits(unit, &total))?
        .id
        .clone();

    Some(
        requests
            .iter()
            .map(|(instance_id, _)| PlacedInstance { instance_id: instance_id.clone(), unit_id: unit_id.clone() })
            .collect(),
    )
}

/// SPREAD/STRICT_SPREAD (and PACK's fallback): places each instance
/// independently against a working copy of the view so earlier placements
/// in the same batch are accounted for. `distinct` forces each instance
/// onto a unit none of its siblings already used.
fn independent_fit(
    view: &ResourceView,
    requests: &[(InstanceId, BTreeMap<String, Value>)],
    distinct: bool,
) -> Option<Vec<PlacedInstance>> {
    let mut working = view.clone();
    let mut used_units: HashSet<UnitId> = HashSet::new();
    let mut placements = Vec::with_capacity(requests.len());

    for (instance_id, requested) in requests {
        let unit_id = working
            .units()
            .filter(|unit| unit.status == UnitStatus::Normal)
            .filter(|unit| !distinct || !used_units.contains(&unit.id))
            .find(|unit| fits(unit, requested))?
            .id
            .clone();

        let mut batch = BTreeMap::new();
        batch.insert(instance_id.clone(), Allocation { requested: requested.clone(), exclusive: false });
        working.add_instances(&unit_id, batch).ok()?;
        used_units.insert(unit_id.clone());
        placements.push(PlacedInstance { instance_id: instance_id.clone(), unit_id });
    }
    Some(placements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use yr_base::ids::UnitId as Uid;

    fn view_with_two_units(cpu_a: i64, cpu_b: i64) -> ResourceView {
        let mut view = ResourceView::new();
        let mut cap_a = BTreeMap::new();
        cap_a.insert("cpu".to_string(), Value::Scalar(cpu_a));
        view.add_resource_unit(ResourceUnit::new(Uid::new("a"), cap_a)).unwrap();

        let mut cap_b = BTreeMap::new();
        cap_b.insert("cpu".to_string(), Value::Scalar(cpu_b));
        view.add_resource_unit(ResourceUnit::new(Uid::new("b"), cap_b)).unwrap();
        view
    }

    fn want(cpu: i64) -> BTreeMap<String, Value> {
        let mut m = BTreeMap::new();
        m.insert("cpu".to_string(), Value::Scalar(cpu));
        m
    }

    #[test]
    fn strict_pack_lands_every_member_on_the_same_unit() {
        let view = view_with_two_units(8, 2);
        let requests = vec![
            (InstanceId::new("i1"), want(3)),
            (InstanceId::new("i2"), want(3)),
        ];
        let placements = group_decision(&view, &requests, GroupPolicy::StrictPack).unwrap();
        assert_eq!(placements[0].unit_id, placements[1].unit_id);
        assert_eq!(placements[0].unit_id, Uid::new("a"));
    }

    #[test]
    fn strict_pack_fails_when_no_single_unit_covers_the_sum() {
        let view = view_with_two_units(4, 4);
        let requests = vec![
            (InstanceId::new("i1"), want(3)),
            (InstanceId::new("i2"), want(3)),
        ];
        assert!(group_decision(&view, &requests, GroupPolicy::StrictPack).is_none());
    }

    #[test]
    fn strict_spread_lands_members_on_distinct_units() {
        let view = view_with_two_units(8, 8);
        let requests = vec![
            (InstanceId::new("i1"), want(2)),
            (InstanceId::new("i2"), want(2)),
        ];
        let placements = group_decision(&view, &requests, GroupPolicy::StrictSpread).unwrap();
        assert_ne!(placements[0].unit_id, placements[1].unit_id);
    }

    #[test]
    fn strict_spread_fails_when_fewer_units_than_members() {
        let view = view_with_two_units(8, 8);
        let requests = vec![
            (InstanceId::new("i1"), want(2)),
            (InstanceId::new("i2"), want(2)),
            (InstanceId::new("i3"), want(2)),
        ];
        assert!(group_decision(&view, &requests, GroupPolicy::StrictSpread).is_none());
    }

    #[test]
    fn pack_falls_back_to_independent_fit_when_no_single_unit_fits_all() {
        let view = view_with_two_units(3, 3);
        let requests = vec![
            (InstanceId::new("i1"), want(3)),
            (InstanceId::new("i2"), want(3)),
        ];
        let placements = group_decision(&view, &requests, GroupPolicy::Pack).unwrap();
        assert_eq!(placements.len(), 2);
    }
}
