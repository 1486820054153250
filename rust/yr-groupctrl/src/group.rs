//! Group record and request validation (spec §3 "Group", §4.9 validation
//! rules).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use yr_base::error::CoreError;
use yr_base::ids::{GroupId, InstanceId};
use yr_localsched::ScheduleOptions;
use yr_resourceview::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupPolicy {
    Pack,
    StrictPack,
    Spread,
    StrictSpread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupState {
    Scheduling,
    Running,
    Failed,
}

/// One member of a group before an instance id has been assigned; §4.9's
/// "designated-instance-id not set" validation rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRequest {
    pub tenant: String,
    pub function_spec: String,
    pub requested_resources: BTreeMap<String, Value>,
    pub schedule_options: ScheduleOptions,
}

/// `{min, max, step}` admits a variable instance count in `(0, 256]`
/// (spec §4.9).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RangeRequest {
    pub min: u32,
    pub max: u32,
    pub step: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub owner_address: String,
    pub requests: Vec<InstanceRequest>,
    pub range_request: Option<RangeRequest>,
    pub state: GroupState,
    pub policy: GroupPolicy,
    pub members: Vec<InstanceId>,
}

pub const MAX_GROUP_SIZE: u32 = 256;

/// Validates a group request before any scheduling begins (spec §4.9):
/// `N` within `[1, 256]`, range requests well-formed and not mixed with
/// ordinary requests, and STRICT_PACK affinity consistency.
pub fn validate_group_request(
    requests: &[InstanceRequest],
    range_request: &Option<RangeRequest>,
    policy: GroupPolicy,
) -> Result<(), CoreError> {
    match (requests.is_empty(), range_request) {
        (false, Some(_)) => {
            return Err(CoreError::ParamInvalid(
                "range requests cannot mix with ordinary requests".to_string(),
            ));
        }
        (true, None) => {
            return Err(CoreError::ParamInvalid("group request has no members".to_string()));
        }
        _ => {}
    }

    if let Some(range) = range_request {
        if range.min == 0 || range.max == 0 || range.min > range.max || range.max > MAX_GROUP_SIZE {
            return Err(CoreError::ParamInvalid(format!(
                "range request [{}, {}] is out of bounds (0, {MAX_GROUP_SIZE}]",
                range.min, range.max
            )));
        }
        if range.step == 0 {
            return Err(CoreError::ParamInvalid("range request step must be nonzero".to_string()));
        }
    } else {
        let n = requests.len() as u32;
        if n == 0 || n > MAX_GROUP_SIZE {
            return Err(CoreError::ParamInvalid(format!(
                "group size {n} is out of bounds [1, {MAX_GROUP_SIZE}]"
            )));
        }
    }

    if policy == GroupPolicy::StrictPack {
        let affinities: Vec<&Option<String>> = requests.iter().map(|r| &r.schedule_options.affinity).collect();
        if let Some(first) = affinities.first() {
            if affinities.iter().any(|a| *a != *first) {
                return Err(CoreError::ParamInvalid(
                    "STRICT_PACK group members must share the same affinity key".to_string(),
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> InstanceRequest {
        InstanceRequest {
            tenant: "tenant-a".to_string(),
            function_spec: "fn:hello".to_string(),
            requested_resources: BTreeMap::new(),
            schedule_options: ScheduleOptions::default(),
        }
    }

    #[test]
    fn rejects_mixing_range_and_ordinary_requests() {
        let requests = vec![request()];
        let range = Some(RangeRequest { min: 1, max: 4, step: 1 });
        assert!(validate_group_request(&requests, &range, GroupPolicy::Pack).is_err());
    }

    #[test]
    fn rejects_oversized_group() {
        let requests: Vec<InstanceRequest> = (0..300).map(|_| request()).collect();
        assert!(validate_group_request(&requests, &None, GroupPolicy::Pack).is_err());
    }

    #[test]
    fn rejects_range_with_min_greater_than_max() {
        let range = Some(RangeRequest { min: 10, max: 4, step: 1 });
        assert!(validate_group_request(&[], &range, GroupPolicy::Pack).is_err());
    }

    #[test]
    fn strict_pack_requires_consistent_affinity() {
        let mut a = request();
        a.schedule_options.affinity = Some("zone-a".to_string());
        let mut b = request();
        b.schedule_options.affinity = Some("zone-b".to_string());
        assert!(validate_group_request(&[a, b], &None, GroupPolicy::StrictPack).is_err());
    }

    #[test]
    fn valid_group_passes() {
        let requests = vec![request(), request()];
        assert!(validate_group_request(&requests, &None, GroupPolicy::Pack).is_ok());
    }
}
