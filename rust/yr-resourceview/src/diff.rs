//! Incremental diffs (spec §4.3, "incremental diffs") and the aggregated
//! Virtual Resource View a Domain Scheduler builds over its children
//! (§4.5: "placement decision over its aggregated Virtual Resource View
//! (sum of children's views)").

use std::collections::BTreeMap;

use yr_base::ids::UnitId;

use crate::unit::ResourceUnit;
use crate::view::ResourceView;

/// What changed in a [`ResourceView`] since the last revision a subscriber
/// observed, so a parent doesn't need to re-ship the whole view on every
/// mutation — only units whose revision moved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceDiff {
    pub added: Vec<UnitId>,
    pub updated: Vec<UnitId>,
    pub removed: Vec<UnitId>,
}

impl ResourceDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Tracks per-unit revisions observed so far and produces a [`ResourceDiff`]
/// against a fresh snapshot of the same view.
#[derive(Debug, Clone, Default)]
pub struct RevisionCursor {
    last_seen: BTreeMap<UnitId, i64>,
}

impl RevisionCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diff(&mut self, view: &ResourceView) -> ResourceDiff {
        let mut diff = ResourceDiff::default();
        let mut still_present: Vec<UnitId> = Vec::new();

        for unit in view.units() {
            still_present.push(unit.id.clone());
            match self.last_seen.get(&unit.id) {
                None => diff.added.push(unit.id.clone()),
                Some(seen_revision) if *seen_revision != unit.revision => {
                    diff.updated.push(unit.id.clone())
                }
                Some(_) => {}
            }
            self.last_seen.insert(unit.id.clone(), unit.revision);
        }

        let removed: Vec<UnitId> = self
            .last_seen
            .keys()
            .filter(|id| !still_present.contains(id))
            .cloned()
            .collect();
        for id in &removed {
            self.last_seen.remove(id);
        }
        diff.removed = removed;

        diff
    }
}

/// A read-only sum of several children's [`ResourceView`]s, rebuilt from
/// scratch on demand. Units are kept distinct by id across children, so a
/// Domain Scheduler sees one flattened pool of units spanning its whole
/// subtree without needing to special-case which child owns which unit.
pub struct VirtualResourceView<'a> {
    children: Vec<&'a ResourceView>,
}

impl<'a> VirtualResourceView<'a> {
    pub fn new(children: Vec<&'a ResourceView>) -> Self {
        Self { children }
    }

    pub fn units(&self) -> impl Iterator<Item = &ResourceUnit> {
        self.children.iter().flat_map(|view| view.units())
    }

    pub fn get(&self, unit_id: &UnitId) -> Option<&ResourceUnit> {
        self.children.iter().find_map(|view| view.get(unit_id))
    }

    pub fn total_free(&self) -> BTreeMap<String, crate::value::Value> {
        let mut totals: BTreeMap<String, crate::value::Value> = BTreeMap::new();
        for view in &self.children {
            for (name, free) in view.total_free() {
                totals
                    .entry(name)
                    .and_modify(|existing| {
                        if let Ok(sum) = existing.add(&free) {
                            *existing = sum;
                        }
                    })
                    .or_insert(free);
            }
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::ResourceUnit;
    use crate::value::Value;

    fn unit(id: &str, cpu: i64) -> ResourceUnit {
        let mut capacity = BTreeMap::new();
        capacity.insert("cpu".to_string(), Value::Scalar(cpu));
        ResourceUnit::new(UnitId::new(id), capacity)
    }

    #[test]
    fn first_diff_reports_everything_as_added() {
        let mut view = ResourceView::new();
        view.add_resource_unit(unit("u1", 4)).unwrap();
        let mut cursor = RevisionCursor::new();

        let diff = cursor.diff(&view);
        assert_eq!(diff.added, vec![UnitId::new("u1")]);
        assert!(diff.updated.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn subsequent_diff_only_reports_changed_units() {
        let mut view = ResourceView::new();
        view.add_resource_unit(unit("u1", 4)).unwrap();
        view.add_resource_unit(unit("u2", 4)).unwrap();
        let mut cursor = RevisionCursor::new();
        cursor.diff(&view);

        view.update_resource_unit(&UnitId::new("u1"), BTreeMap::new(), false).unwrap();
        let diff = cursor.diff(&view);
        assert_eq!(diff.updated, vec![UnitId::new("u1")]);
        assert!(diff.added.is_empty());
    }

    #[test]
    fn removed_unit_is_reported_once() {
        let mut view = ResourceView::new();
        view.add_resource_unit(unit("u1", 4)).unwrap();
        let mut cursor = RevisionCursor::new();
        cursor.diff(&view);

        view.delete_resource_unit(&UnitId::new("u1"));
        let diff = cursor.diff(&view);
        assert_eq!(diff.removed, vec![UnitId::new("u1")]);

        let diff_again = cursor.diff(&view);
        assert!(diff_again.is_empty());
    }

    #[test]
    fn virtual_view_sums_free_capacity_across_children() {
        let mut child_a = ResourceView::new();
        child_a.add_resource_unit(unit("u1", 4)).unwrap();
        let mut child_b = ResourceView::new();
        child_b.add_resource_unit(unit("u2", 6)).unwrap();

        let virtual_view = VirtualResourceView::new(vec![&child_a, &child_b]);
        let free = virtual_view.total_free();
        assert_eq!(free.get("cpu").unwrap(), &Value::Scalar(10));
    }
}
