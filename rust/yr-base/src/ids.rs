//! Newtype identifiers. Kept as thin `String`/`i64` wrappers rather than
//! `uuid::Uuid` everywhere because several of these (node names, instance
//! ids) are caller- or topology-assigned, not randomly generated — `uuid` is
//! still used where the spec calls for a freshly minted id (request ids).

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(NodeId);
string_id!(InstanceId);
string_id!(GroupId);
string_id!(AgentId);
string_id!(UnitId);
string_id!(BundleId);

/// Request ids are generated fresh per schedule attempt (§4.4) and reused
/// verbatim across Reserve/Bind/UnReserve/UnBind for the same placement.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lease ids are packed as `(node_id: 16 bits | timestamp_us: 40 bits |
/// counter: 8 bits)` so that any writer of the store mints non-colliding
/// ids without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub i64);

impl LeaseId {
    pub fn pack(node_id: u16, timestamp_us: u64, counter: u8) -> Self {
        let ts = timestamp_us & 0xFF_FFFF_FFFF; // 40 bits
        let packed = ((node_id as i64) << 48) | ((ts as i64) << 8) | counter as i64;
        Self(packed)
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_ids_with_distinct_nodes_never_collide_for_same_tick() {
        let a = LeaseId::pack(1, 1_000, 0);
        let b = LeaseId::pack(2, 1_000, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn request_id_generate_is_unique() {
        assert_ne!(RequestId::generate(), RequestId::generate());
    }
}
