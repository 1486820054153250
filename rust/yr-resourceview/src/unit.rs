//! Resource Unit (spec §3, "Resource Unit"): one host's capacity,
//! allocations, labels and live instance records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use yr_base::error::CoreError;
use yr_base::ids::{InstanceId, UnitId};

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitStatus {
    Normal,
    Disabled,
}

/// What one instance is holding against a unit. `exclusive` marks an
/// instance that monopolizes the agent (e.g. whole-accelerator access),
/// propagated into `yr-funcagent`'s agent-busy bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub requested: BTreeMap<String, Value>,
    pub exclusive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUnit {
    pub id: UnitId,
    pub capacity: BTreeMap<String, Value>,
    pub allocated: BTreeMap<String, Value>,
    pub labels: BTreeMap<String, Value>,
    pub instances: BTreeMap<InstanceId, Allocation>,
    pub status: UnitStatus,
    pub revision: i64,
}

impl ResourceUnit {
    pub fn new(id: UnitId, capacity: BTreeMap<String, Value>) -> Self {
        let allocated = capacity.iter().map(|(k, v)| (k.clone(), v.zero_like())).collect();
        Self {
            id,
            capacity,
            allocated,
            labels: BTreeMap::new(),
            instances: BTreeMap::new(),
            status: UnitStatus::Normal,
            revision: 0,
        }
    }

    /// Checks the invariant "allocated <= capacity pointwise" for every
    /// resource dimension present in `capacity`.
    pub fn check_within_capacity(&self) -> Result<(), CoreError> {
        for (name, capacity_value) in &self.capacity {
            let allocated_value = self
                .allocated
                .get(name)
                .ok_or_else(|| CoreError::InnerSystemError(format!("missing allocated entry for {name}")))?;
            if !allocated_value.le(capacity_value)? {
                return Err(CoreError::ResourceNotEnough(format!(
                    "allocated exceeds capacity for resource {name} on unit {}",
                    self.id
                )));
            }
        }
        Ok(())
    }

    /// Adds instances' requested resources into `allocated`, failing the
    /// whole batch (no partial mutation) if any dimension would exceed
    /// capacity.
    pub fn add_instances(
        &mut self,
        new_instances: BTreeMap<InstanceId, Allocation>,
    ) -> Result<(), CoreError> {
        let mut projected_allocated = self.allocated.clone();
        for allocation in new_instances.values() {
            for (name, requested_value) in &allocation.requested {
                let capacity_value = self.capacity.get(name).ok_or_else(|| {
                    CoreError::ParamInvalid(format!("unit {} has no capacity for resource {name}", self.id))
                })?;
                let current = projected_allocated
                    .entry(name.clone())
                    .or_insert_with(|| capacity_value.zero_like());
                let updated = current.add(requested_value)?;
                if !updated.le(capacity_value)? {
                    return Err(CoreError::ResourceNotEnough(format!(
                        "resource {name} insufficient on unit {}",
                        self.id
                    )));
                }
                *current = updated;
            }
        }

        self.allocated = projected_allocated;
        for (instance_id, allocation) in new_instances {
            self.instances.insert(instance_id, allocation);
        }
        self.revision += 1;
        Ok(())
    }

    /// Removes instances and subtracts their requested resources back out
    /// of `allocated`, atomically for the batch.
    pub fn delete_instances(&mut self, instance_ids: &[InstanceId]) -> Result<(), CoreError> {
        let mut projected_allocated = self.allocated.clone();
        let mut removed: Vec<(InstanceId, Allocation)> = Vec::with_capacity(instance_ids.len());

        for instance_id in instance_ids {
            let Some(allocation) = self.instances.get(instance_id) else {
                continue;
            };
            for (name, requested_value) in &allocation.requested {
                if let Some(current) = projected_allocated.get_mut(name) {
                    let updated = current.sub(requested_value)?;
                    if updated.has_negative_component() {
                        return Err(CoreError::InnerSystemError(format!(
                            "deleting instance {instance_id} would drive resource {name} negative on unit {}",
                            self.id
                        )));
                    }
                    *current = updated;
                }
            }
            removed.push((instance_id.clone(), allocation.clone()));
        }

        self.allocated = projected_allocated;
        for (instance_id, _) in removed {
            self.instances.remove(&instance_id);
        }
        self.revision += 1;
        Ok(())
    }

    /// Replaces capacity wholesale (a "full" update) or merges a partial
    /// delta into existing capacity (e.g. hot-adding a GPU card), per
    /// §4.3's `UpdateResourceUnit(delta | full)`.
    pub fn update_capacity(&mut self, delta_or_full: BTreeMap<String, Value>, is_full: bool) -> Result<(), CoreError> {
        if is_full {
            self.capacity = delta_or_full;
        } else {
            for (name, delta) in delta_or_full {
                match self.capacity.get(&name) {
                    Some(existing) => {
                        self.capacity.insert(name, existing.add(&delta)?);
                    }
                    None => {
                        self.capacity.insert(name, delta);
                    }
                }
            }
        }
        for (name, capacity_value) in &self.capacity {
            self.allocated.entry(name.clone()).or_insert_with(|| capacity_value.zero_like());
        }
        self.check_within_capacity()?;
        self.revision += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar_unit(cpu_capacity: i64) -> ResourceUnit {
        let mut capacity = BTreeMap::new();
        capacity.insert("cpu".to_string(), Value::Scalar(cpu_capacity));
        ResourceUnit::new(UnitId::new("unit-1"), capacity)
    }

    fn allocation(cpu: i64) -> Allocation {
        let mut requested = BTreeMap::new();
        requested.insert("cpu".to_string(), Value::Scalar(cpu));
        Allocation { requested, exclusive: false }
    }

    #[test]
    fn add_instances_within_capacity_succeeds_and_bumps_revision() {
        let mut unit = scalar_unit(8);
        let mut batch = BTreeMap::new();
        batch.insert(InstanceId::new("i1"), allocation(3));
        unit.add_instances(batch).unwrap();

        assert_eq!(unit.allocated.get("cpu").unwrap(), &Value::Scalar(3));
        assert_eq!(unit.revision, 1);
    }

    #[test]
    fn add_instances_exceeding_capacity_leaves_unit_unmodified() {
        let mut unit = scalar_unit(4);
        let mut batch = BTreeMap::new();
        batch.insert(InstanceId::new("i1"), allocation(5));
        let err = unit.add_instances(batch).unwrap_err();
        assert_eq!(err.kind(), yr_base::error::ErrorKind::ResourceNotEnough);
        assert_eq!(unit.allocated.get("cpu").unwrap(), &Value::Scalar(0));
        assert_eq!(unit.revision, 0);
    }

    #[test]
    fn delete_instances_credits_resources_back() {
        let mut unit = scalar_unit(8);
        let mut batch = BTreeMap::new();
        batch.insert(InstanceId::new("i1"), allocation(3));
        unit.add_instances(batch).unwrap();

        unit.delete_instances(&[InstanceId::new("i1")]).unwrap();
        assert_eq!(unit.allocated.get("cpu").unwrap(), &Value::Scalar(0));
        assert!(!unit.instances.contains_key(&InstanceId::new("i1")));
        assert_eq!(unit.revision, 2);
    }

    #[test]
    fn update_capacity_delta_merges_onto_existing() {
        let mut unit = scalar_unit(4);
        let mut delta = BTreeMap::new();
        delta.insert("cpu".to_string(), Value::Scalar(4));
        unit.update_capacity(delta, false).unwrap();
        assert_eq!(unit.capacity.get("cpu").unwrap(), &Value::Scalar(8));
    }
}
