//! Domain Scheduler placement policy for newly-registering Local Schedulers
//! (spec §4.6): "round-robin among healthy DS with fewest children".

use yr_heartbeat::{NodeState, Topology};

/// Picks a healthy DS (direct child of the root) with the fewest children,
/// breaking ties by rotating through a caller-held cursor so repeated calls
/// distribute evenly rather than always favoring the name-first candidate.
pub fn select_target_ds(topology: &Topology, cursor: &mut usize) -> Option<String> {
    let root = topology.root()?;
    let mut candidates: Vec<&str> = topology
        .children_of(root)
        .iter()
        .filter(|name| {
            topology
                .get(name)
                .map(|node| node.state == NodeState::Healthy)
                .unwrap_or(false)
        })
        .map(|s| s.as_str())
        .collect();
    if candidates.is_empty() {
        return None;
    }
    candidates.sort_unstable();

    let min_children = candidates
        .iter()
        .map(|name| topology.children_of(name).len())
        .min()
        .expect("candidates is non-empty");
    let tied: Vec<&str> = candidates
        .into_iter()
        .filter(|name| topology.children_of(name).len() == min_children)
        .collect();

    let chosen = tied[*cursor % tied.len()];
    *cursor = cursor.wrapping_add(1);
    Some(chosen.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology_with_two_ds() -> Topology {
        let mut topology = Topology::new();
        topology.set_root("gs-1", "addr-gs").unwrap();
        topology.attach_child("gs-1", "ds-a", "addr-a").unwrap();
        topology.attach_child("gs-1", "ds-b", "addr-b").unwrap();
        topology
    }

    #[test]
    fn picks_the_ds_with_fewer_children() {
        let mut topology = topology_with_two_ds();
        topology.attach_child("ds-a", "ls-1", "addr-ls1").unwrap();

        let mut cursor = 0;
        assert_eq!(select_target_ds(&topology, &mut cursor).as_deref(), Some("ds-b"));
    }

    #[test]
    fn rotates_round_robin_among_tied_candidates() {
        let topology = topology_with_two_ds();
        let mut cursor = 0;
        let first = select_target_ds(&topology, &mut cursor).unwrap();
        let second = select_target_ds(&topology, &mut cursor).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn broken_ds_is_excluded_from_candidates() {
        let mut topology = topology_with_two_ds();
        topology.mark_broken("ds-a");

        let mut cursor = 0;
        assert_eq!(select_target_ds(&topology, &mut cursor).as_deref(), Some("ds-b"));
    }

    #[test]
    fn no_ds_at_all_returns_none() {
        let mut topology = Topology::new();
        topology.set_root("gs-1", "addr-gs").unwrap();
        let mut cursor = 0;
        assert!(select_target_ds(&topology, &mut cursor).is_none());
    }
}
