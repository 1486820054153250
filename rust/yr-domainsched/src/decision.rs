//! Candidate-child selection over a Domain Scheduler's aggregated
//! (virtual) view of its children (spec §4.7). Returns children in a
//! deterministic order (by name) up to a bounded candidate count, matching
//! §4.7's "retried on an alternate child up to a bounded number of
//! candidates" and the first-fit style already used at the local level.

use std::collections::BTreeMap;

use yr_resourceview::{ResourceView, Value};

pub fn candidate_children(
    children: &BTreeMap<String, ResourceView>,
    requested: &BTreeMap<String, Value>,
    max_candidates: usize,
) -> Vec<String> {
    let mut candidates = Vec::new();
    for (child_id, view) in children {
        let free = view.total_free();
        let fits = requested.iter().all(|(name, want)| {
            free.get(name).map(|have| want.le(have).unwrap_or(false)).unwrap_or(false)
        });
        if fits {
            candidates.push(child_id.clone());
            if candidates.len() >= max_candidates {
                break;
            }
        }
    }
    candidates
}
