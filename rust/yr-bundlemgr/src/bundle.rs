//! Bundle record (spec §3 "Bundle", §4.10): a named pre-allocation on one
//! agent that a later instance-create can land in by matching labels.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use yr_base::ids::{AgentId, BundleId};
use yr_resourceview::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleStatus {
    Reserved,
    Bound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub bundle_id: BundleId,
    pub owner_rg: String,
    pub parent_rg: Option<String>,
    pub agent_id: AgentId,
    pub labels: BTreeMap<String, Value>,
    pub reserved_resources: BTreeMap<String, Value>,
    pub status: BundleStatus,
}

/// What's persisted at `/yr/bundle/<nodeId>` (spec §6.1): every bundle a BM
/// instance currently holds for the node it's scoped to.
pub type BundleCollection = BTreeMap<BundleId, Bundle>;

/// Derives the virtual unit's labels from a bundle's resource-group name and
/// its index within that group (spec §4.10: "labels derived from the
/// bundle's resource-group name and bundle index").
pub fn virtual_unit_labels(bundle: &Bundle, index: usize) -> BTreeMap<String, Value> {
    let mut labels = bundle.labels.clone();
    labels.insert("resource_group".to_string(), Value::Set([bundle.owner_rg.clone()].into_iter().collect()));
    labels.insert("bundle_index".to_string(), Value::Scalar(index as i64));
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_unit_labels_carries_resource_group_and_index() {
        let bundle = Bundle {
            bundle_id: BundleId::new("b1"),
            owner_rg: "rg-a".to_string(),
            parent_rg: None,
            agent_id: AgentId::new("agent-1"),
            labels: BTreeMap::new(),
            reserved_resources: BTreeMap::new(),
            status: BundleStatus::Reserved,
        };
        let labels = virtual_unit_labels(&bundle, 3);
        assert_eq!(labels.get("bundle_index"), Some(&Value::Scalar(3)));
        assert!(matches!(labels.get("resource_group"), Some(Value::Set(_))));
    }
}
