//! Replicated metadata store (spec §4.1): a single logical key-value space
//! with etcd-shaped Put/Get/Delete/Txn/Watch/Lease semantics, backing every
//! other component's durable state (topology, resource views, reservations,
//! groups, bundles — spec §6.1's `/yr/...` key namespace).

pub mod backup;
mod client;
mod lease;
mod store;
pub mod types;
mod watch;

pub use client::MetaStore;
pub use lease::LeaseConfig;
pub use types::{
    Compare, CompareResult, CompareTarget, CompareValue, DeleteRangeRequest, DeleteRangeResponse,
    KeyRange, KeyValue, Lease, OpResponse, PutRequest, PutResponse, RangeRequest, RangeResponse,
    RequestOp, SortOrder, SortTarget, TxnRequest, TxnResponse, WatchEvent,
};
pub use watch::WatchId;
