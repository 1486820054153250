//! Wire/record types for the metadata store, matching spec §4.1 and the
//! persisted-record shape of §6.1 (`/metastore/kv/<user-key>`,
//! `/metastore/lease/<leaseId>`).

use serde::{Deserialize, Serialize};
use yr_base::LeaseId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    pub create_revision: i64,
    pub mod_revision: i64,
    pub version: i64,
    pub lease_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortTarget {
    Key,
    Version,
    CreateRevision,
    ModRevision,
    Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// A point lookup has `range_end = None`; a half-open range `[key, range_end)`
/// otherwise. Use [`prefix_range_end`] to turn a prefix into the matching
/// `range_end`.
#[derive(Debug, Clone)]
pub struct RangeRequest {
    pub key: String,
    pub range_end: Option<String>,
    pub limit: Option<usize>,
    pub count_only: bool,
    pub keys_only: bool,
    pub sort: Option<(SortTarget, SortOrder)>,
}

impl RangeRequest {
    pub fn point(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            range_end: None,
            limit: None,
            count_only: false,
            keys_only: false,
            sort: None,
        }
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        let key = prefix.into();
        let range_end = prefix_range_end(&key);
        Self {
            key,
            range_end: Some(range_end),
            limit: None,
            count_only: false,
            keys_only: false,
            sort: None,
        }
    }

    pub fn is_point(&self) -> bool {
        self.range_end.is_none()
    }
}

/// The smallest key strictly greater than every key with `prefix` as a
/// prefix, obtained by incrementing the last byte (the standard etcd trick).
/// A prefix of all-`0xff` bytes has no such bound and maps to an end that
/// matches everything (empty string is treated as "no upper bound" by the
/// range scan).
pub fn prefix_range_end(prefix: &str) -> String {
    let mut bytes = prefix.as_bytes().to_vec();
    while let Some(&last) = bytes.last() {
        if last < 0xff {
            let idx = bytes.len() - 1;
            bytes[idx] += 1;
            bytes.truncate(idx + 1);
            return String::from_utf8(bytes).unwrap_or_default();
        }
        bytes.pop();
    }
    // prefix was empty or all 0xff: no upper bound.
    "\u{10FFFF}".to_string()
}

#[derive(Debug, Clone, Default)]
pub struct RangeResponse {
    pub kvs: Vec<KeyValue>,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct PutRequest {
    pub key: String,
    pub value: Vec<u8>,
    pub lease_id: i64,
    pub prev_kv: bool,
}

#[derive(Debug, Clone)]
pub struct PutResponse {
    pub revision: i64,
    pub prev_kv: Option<KeyValue>,
}

#[derive(Debug, Clone)]
pub struct DeleteRangeRequest {
    pub key: String,
    pub range_end: Option<String>,
    pub prev_kv: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteRangeResponse {
    pub deleted: i64,
    pub revision: i64,
    pub prev_kvs: Vec<KeyValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareTarget {
    Version,
    CreateRevision,
    ModRevision,
    Value,
    Lease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareResult {
    Equal,
    Greater,
    Less,
    NotEqual,
}

#[derive(Debug, Clone)]
pub enum CompareValue {
    Int(i64),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Compare {
    pub key: String,
    pub target: CompareTarget,
    pub result: CompareResult,
    pub value: CompareValue,
}

#[derive(Debug, Clone)]
pub enum RequestOp {
    Put(PutRequest),
    Get(RangeRequest),
    Delete(DeleteRangeRequest),
}

#[derive(Debug, Clone, Default)]
pub struct TxnRequest {
    pub compare: Vec<Compare>,
    pub success: Vec<RequestOp>,
    pub failure: Vec<RequestOp>,
}

#[derive(Debug, Clone)]
pub enum OpResponse {
    Put(PutResponse),
    Get(RangeResponse),
    Delete(DeleteRangeResponse),
}

#[derive(Debug, Clone)]
pub struct TxnResponse {
    pub succeeded: bool,
    pub responses: Vec<OpResponse>,
    pub revision: i64,
}

#[derive(Debug, Clone)]
pub struct Lease {
    pub id: LeaseId,
    pub ttl_ms: i64,
    pub expiry_ms: i64,
    pub attached_keys: std::collections::BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub enum WatchEvent {
    Put {
        kv: KeyValue,
        prev_kv: Option<KeyValue>,
    },
    Delete {
        kv: KeyValue,
        prev_kv: Option<KeyValue>,
    },
    Canceled {
        reason: String,
    },
}

impl WatchEvent {
    pub fn mod_revision(&self) -> i64 {
        match self {
            WatchEvent::Put { kv, .. } | WatchEvent::Delete { kv, .. } => kv.mod_revision,
            WatchEvent::Canceled { .. } => i64::MAX,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            WatchEvent::Put { kv, .. } | WatchEvent::Delete { kv, .. } => &kv.key,
            WatchEvent::Canceled { .. } => "",
        }
    }
}

#[derive(Debug, Clone)]
pub enum KeyRange {
    Single(String),
    Prefix(String),
}

impl KeyRange {
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyRange::Single(k) => k == key,
            KeyRange::Prefix(p) => key.starts_with(p.as_str()),
        }
    }
}
