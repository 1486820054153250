//! The Resource View proper (spec §4.3): a per-host (or, aggregated, a
//! per-subtree virtual) collection of [`ResourceUnit`]s with the four
//! administrative/bookkeeping operations the spec names.

use std::collections::BTreeMap;

use yr_base::error::CoreError;
use yr_base::ids::{InstanceId, UnitId};

use crate::unit::{Allocation, ResourceUnit};
use crate::value::Value;

#[derive(Debug, Clone, Default)]
pub struct ResourceView {
    units: BTreeMap<UnitId, ResourceUnit>,
}

impl ResourceView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, unit_id: &UnitId) -> Option<&ResourceUnit> {
        self.units.get(unit_id)
    }

    pub fn units(&self) -> impl Iterator<Item = &ResourceUnit> {
        self.units.values()
    }

    pub fn add_resource_unit(&mut self, unit: ResourceUnit) -> Result<(), CoreError> {
        if self.units.contains_key(&unit.id) {
            return Err(CoreError::ParamInvalid(format!(
                "resource unit {} already exists",
                unit.id
            )));
        }
        self.units.insert(unit.id.clone(), unit);
        Ok(())
    }

    pub fn delete_resource_unit(&mut self, unit_id: &UnitId) -> Option<ResourceUnit> {
        self.units.remove(unit_id)
    }

    pub fn update_resource_unit(
        &mut self,
        unit_id: &UnitId,
        delta_or_full: BTreeMap<String, Value>,
        is_full: bool,
    ) -> Result<(), CoreError> {
        let unit = self
            .units
            .get_mut(unit_id)
            .ok_or_else(|| CoreError::ParamInvalid(format!("resource unit {unit_id} not found")))?;
        unit.update_capacity(delta_or_full, is_full)
    }

    pub fn add_instances(
        &mut self,
        unit_id: &UnitId,
        instances: BTreeMap<InstanceId, Allocation>,
    ) -> Result<(), CoreError> {
        let unit = self
            .units
            .get_mut(unit_id)
            .ok_or_else(|| CoreError::ParamInvalid(format!("resource unit {unit_id} not found")))?;
        unit.add_instances(instances)
    }

    pub fn delete_instances(
        &mut self,
        unit_id: &UnitId,
        instance_ids: &[InstanceId],
    ) -> Result<(), CoreError> {
        let unit = self
            .units
            .get_mut(unit_id)
            .ok_or_else(|| CoreError::ParamInvalid(format!("resource unit {unit_id} not found")))?;
        unit.delete_instances(instance_ids)
    }

    /// Total free (capacity minus allocated) per resource dimension across
    /// every NORMAL unit, used by a scheduler's quick feasibility check
    /// before running full placement.
    pub fn total_free(&self) -> BTreeMap<String, Value> {
        let mut totals: BTreeMap<String, Value> = BTreeMap::new();
        for unit in self.units.values() {
            if unit.status != crate::unit::UnitStatus::Normal {
                continue;
            }
            for (name, capacity_value) in &unit.capacity {
                let allocated_value = unit
                    .allocated
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| capacity_value.zero_like());
                let Ok(free) = capacity_value.sub(&allocated_value) else {
                    continue;
                };
                totals
                    .entry(name.clone())
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

    fn unit(id: &str, cpu: i64) -> ResourceUnit {
        let mut capacity = BTreeMap::new();
        capacity.insert("cpu".to_string(), Value::Scalar(cpu));
        ResourceUnit::new(UnitId::new(id), capacity)
    }

    #[test]
    fn add_resource_unit_rejects_duplicate_ids() {
        let mut view = ResourceView::new();
        view.add_resource_unit(unit("u1", 4)).unwrap();
        assert!(view.add_resource_unit(unit("u1", 8)).is_err());
    }

    #[test]
    fn total_free_sums_across_units() {
        let mut view = ResourceView::new();
        view.add_resource_unit(unit("u1", 4)).unwrap();
        view.add_resource_unit(unit("u2", 6)).unwrap();

        let mut batch = BTreeMap::new();
        let mut requested = BTreeMap::new();
        requested.insert("cpu".to_string(), Value::Scalar(2));
        batch.insert(InstanceId::new("i1"), Allocation { requested, exclusive: false });
        view.add_instances(&UnitId::new("u1"), batch).unwrap();

        let free = view.total_free();
        assert_eq!(free.get("cpu").unwrap(), &Value::Scalar(8));
    }

    #[test]
    fn delete_resource_unit_removes_it_entirely() {
        let mut view = ResourceView::new();
        view.add_resource_unit(unit("u1", 4)).unwrap();
        assert!(view.delete_resource_unit(&UnitId::new("u1")).is_some());
        assert!(view.get(&UnitId::new("u1")).is_none());
    }
}
