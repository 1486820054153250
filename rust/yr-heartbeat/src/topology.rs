//! Scheduler topology (spec §4, "Scheduler topology"): a rooted tree of
//! `Node`s persisted to the metadata store so a restarted Global Scheduler
//! can recover it. Invariants held by construction here: at most one root,
//! unique names, deterministic serialization (BTreeMap iteration order).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use yr_base::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Healthy,
    Broken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub address: String,
    pub state: NodeState,
    pub children: Vec<String>,
}

/// A rooted tree keyed by node name. Leaves are expected to be Local
/// Schedulers and internal nodes Domain Schedulers, but that distinction is
/// enforced by the caller (the global scheduler knows which layer is
/// registering); this type only maintains tree shape and uniqueness.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topology {
    root: Option<String>,
    nodes: BTreeMap<String, Node>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Sets the root node. Only valid when the tree is empty or the root is
    /// being replaced by the same name (e.g. a restarted global scheduler
    /// re-asserting itself).
    pub fn set_root(&mut self, name: &str, address: &str) -> Result<(), CoreError> {
        if let Some(existing_root) = &self.root {
            if existing_root != name {
                return Err(CoreError::InnerSystemError(format!(
                    "topology already has root {existing_root}, cannot set {name}"
                )));
            }
        }
        self.root = Some(name.to_string());
        self.nodes.insert(
            name.to_string(),
            Node {
                name: name.to_string(),
                address: address.to_string(),
                state: NodeState::Healthy,
                children: self.nodes.get(name).map(|n| n.children.clone()).unwrap_or_default(),
            },
        );
        Ok(())
    }

    /// Attaches a newly-registered child under `parent`. Fails if the name
    /// is already taken by a different node (invariant: name unique across
    /// the tree).
    pub fn attach_child(
        &mut self,
        parent: &str,
        name: &str,
        address: &str,
    ) -> Result<(), CoreError> {
        if !self.nodes.contains_key(parent) {
            return Err(CoreError::RegisterError(format!(
                "parent {parent} not present in topology"
            )));
        }
        if self.nodes.contains_key(name) {
            return Err(CoreError::RegisterError(format!(
                "node name {name} already registered"
            )));
        }
        self.nodes.insert(
            name.to_string(),
            Node {
                name: name.to_string(),
                address: address.to_string(),
                state: NodeState::Healthy,
                children: Vec::new(),
            },
        );
        self.nodes
            .get_mut(parent)
            .expect("checked above")
            .children
            .push(name.to_string());
        Ok(())
    }

    /// Marks a node BROKEN in place (heartbeat timeout); it stays in the
    /// tree until `remove` drops it, giving callers a window to observe the
    /// transition before replacement (§4.6).
    pub fn mark_broken(&mut self, name: &str) {
        if let Some(node) = self.nodes.get_mut(name) {
            node.state = NodeState::Broken;
        }
    }

    /// Removes a node and its edge from its parent. Does not recurse into
    /// descendants: a Domain Scheduler's children are re-queued for
    /// reattachment rather than deleted (§4.6, "orphaned, pending
    /// reattachment").
    pub fn remove(&mut self, name: &str) -> Option<Node> {
        let removed = self.nodes.remove(name)?;
        for node in self.nodes.values_mut() {
            node.children.retain(|child| child != name);
        }
        if self.root.as_deref() == Some(name) {
            self.root = None;
        }
        Some(removed)
    }

    /// Reattaches an already-existing orphaned node under a new parent,
    /// without recreating its entry — used when a replacement Domain
    /// Scheduler registers and takes over a broken DS's former children
    /// (spec §4.6, "preserving child attachments where possible").
    pub fn reparent(&mut self, parent: &str, name: &str) -> Result<(), CoreError> {
        if !self.nodes.contains_key(parent) {
            return Err(CoreError::RegisterError(format!(
                "parent {parent} not present in topology"
            )));
        }
        if !self.nodes.contains_key(name) {
            return Err(CoreError::RegisterError(format!(
                "node {name} not present in topology, cannot reparent"
            )));
        }
        self.nodes
            .get_mut(parent)
            .expect("checked above")
            .children
            .push(name.to_string());
        Ok(())
    }

    pub fn children_of(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        bincode::deserialize(bytes)
            .map_err(|err| CoreError::InnerSystemError(format!("topology decode failed: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn attach_child_rejects_duplicate_names() {
        let mut topology = Topology::new();
        topology.set_root("gs-1", "10.0.0.1:7000").unwrap();
        topology.attach_child("gs-1", "ds-1", "10.0.0.2:7001").unwrap();

        let err = topology.attach_child("gs-1", "ds-1", "10.0.0.3:7002").unwrap_err();
        assert_eq!(err.kind(), yr_base::error::ErrorKind::RegisterError);
    }

    #[test]
    fn remove_detaches_from_parent_but_keeps_children_in_tree() {
        let mut topology = Topology::new();
        topology.set_root("gs-1", "addr-gs").unwrap();
        topology.attach_child("gs-1", "ds-1", "addr-ds").unwrap();
        topology.attach_child("ds-1", "ls-1", "addr-ls").unwrap();

        topology.remove("ds-1");
        assert!(!topology.children_of("gs-1").contains(&"ds-1".to_string()));
        // ls-1 is orphaned, not deleted: the global scheduler re-queues it.
        assert!(topology.contains("ls-1"));
    }

    #[test]
    fn reparent_moves_an_orphan_under_its_replacement() {
        let mut topology = Topology::new();
        topology.set_root("gs-1", "addr-gs").unwrap();
        topology.attach_child("gs-1", "ds-1", "addr-ds").unwrap();
        topology.attach_child("ds-1", "ls-1", "addr-ls").unwrap();

        topology.remove("ds-1");
        assert!(topology.contains("ls-1"));

        topology.attach_child("gs-1", "ds-2", "addr-ds-2").unwrap();
        topology.reparent("ds-2", "ls-1").unwrap();
        assert!(topology.children_of("ds-2").contains(&"ls-1".to_string()));
    }

    #[test]
    fn serialization_round_trips() {
        let mut topology = Topology::new();
        topology.set_root("gs-1", "addr-gs").unwrap();
        topology.attach_child("gs-1", "ds-1", "addr-ds").unwrap();

        let bytes = topology.to_bytes();
        let restored = Topology::from_bytes(&bytes).unwrap();
        assert_eq!(restored.root(), Some("gs-1"));
        assert_eq!(restored.children_of("gs-1"), &["ds-1".to_string()]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Attach { parent_idx: usize, name_idx: usize },
        Remove { name_idx: usize },
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..6usize, 0..6usize).prop_map(|(parent_idx, name_idx)| Op::Attach { parent_idx, name_idx }),
            (0..6usize).prop_map(|name_idx| Op::Remove { name_idx }),
        ]
    }

    proptest! {
        /// Spec §8 invariant 7: after every Add/Remove the topology is a
        /// tree with unique names and at most one root, and its serialized
        /// form round-trips through `bincode` unchanged.
        #[test]
        fn topology_stays_well_formed(ops in prop::collection::vec(op_strategy(), 0..40)) {
            let names: Vec<String> = (0..6).map(|i| format!("n{i}")).collect();
            let mut topology = Topology::new();
            topology.set_root(&names[0], "addr-root").unwrap();

            for op in ops {
                match op {
                    Op::Attach { parent_idx, name_idx } => {
                        let _ = topology.attach_child(&names[parent_idx], &names[name_idx], "addr");
                    }
                    Op::Remove { name_idx } => {
                        if names[name_idx] != names[0] {
                            topology.remove(&names[name_idx]);
                        }
                    }
                }

                // Every node name that exists appears exactly once (BTreeMap
                // keys are already unique by construction); check the root
                // count and the round-trip instead, which are the
                // properties `set_root`/`attach_child`/`remove` could get
                // wrong without the type system catching it.
                let root_count = if topology.root().is_some() { 1 } else { 0 };
                prop_assert!(root_count <= 1);

                let bytes = topology.to_bytes();
                let restored = Topology::from_bytes(&bytes).unwrap();
                prop_assert_eq!(restored.root(), topology.root());
                for name in &names {
                    prop_assert_eq!(restored.contains(name), topology.contains(name));
                }
            }
        }
    }
}
