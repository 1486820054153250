//! Generic Reserve/Bind/UnReserve/UnBind bookkeeping (spec §4.8), shared by
//! every component that plays the "child" role in the protocol: the Local
//! Scheduler (receiving from a Domain Scheduler), the Domain Scheduler
//! (receiving from the Global Scheduler), and the Bundle Manager. Each
//! holds one [`ReservationTable`] keyed by request id.

use std::collections::HashMap;

use crate::ids::RequestId;
use crate::revision::now_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStatus {
    Reserved,
    Bound,
}

#[derive(Debug, Clone)]
struct Entry<T> {
    payload: T,
    status: ReservationStatus,
    expires_at_ms: i64,
}

/// Holds in-flight reservations. Reserve is idempotent: a duplicate Reserve
/// for a request id already tracked returns the existing payload rather
/// than re-deciding (spec §4.8, "Duplicate Reserve ... is idempotent").
#[derive(Debug, Default)]
pub struct ReservationTable<T> {
    entries: HashMap<RequestId, Entry<T>>,
}

impl<T: Clone> ReservationTable<T> {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Returns `Some(existing payload)` if `request_id` is already tracked
    /// (the idempotent-duplicate case), without touching its timer.
    pub fn existing(&self, request_id: &RequestId) -> Option<T> {
        self.entries.get(request_id).map(|entry| entry.payload.clone())
    }

    pub fn reserve(&mut self, request_id: RequestId, payload: T, ttl_ms: i64) {
        self.entries.insert(
            request_id,
            Entry {
                payload,
                status: ReservationStatus::Reserved,
                expires_at_ms: now_millis() + ttl_ms,
            },
        );
    }

    /// Transitions a tracked reservation to Bound, stopping its expiry
    /// timer (bound placements don't expire; only UnBind releases them).
    /// Per §4.8's edge case, binding is allowed even after the
    /// reservation's TTL has nominally elapsed, as long as it has not yet
    /// been swept — the caller is expected to call this before `sweep`
    /// observes the same tick.
    pub fn bind(&mut self, request_id: &RequestId) -> Option<T> {
        let entry = self.entries.get_mut(request_id)?;
        entry.status = ReservationStatus::Bound;
        Some(entry.payload.clone())
    }

    pub fn unreserve(&mut self, request_id: &RequestId) -> Option<T> {
        self.entries.remove(request_id).map(|entry| entry.payload)
    }

    pub fn status(&self, request_id: &RequestId) -> Option<ReservationStatus> {
        self.entries.get(request_id).map(|entry| entry.status)
    }

    /// Removes and returns every still-Reserved (never Bound) entry whose
    /// TTL has elapsed, for the caller to credit resources back.
    pub fn sweep_expired(&mut self) -> Vec<(RequestId, T)> {
        let now = now_millis();
        let expired_ids: Vec<RequestId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.status == ReservationStatus::Reserved && entry.expires_at_ms <= now)
            .map(|(id, _)| id.clone())
            .collect();

        expired_ids
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|entry| (id, entry.payload)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_reserve_is_observed_via_existing_before_overwrite() {
        let mut table: ReservationTable<i64> = ReservationTable::new();
        let id = RequestId::generate();
        table.reserve(id.clone(), 42, 1000);
        assert_eq!(table.existing(&id), Some(42));
    }

    #[test]
    fn bind_marks_bound_and_keeps_payload() {
        let mut table: ReservationTable<&str> = ReservationTable::new();
        let id = RequestId::generate();
        table.reserve(id.clone(), "unit-1", 1000);
        assert_eq!(table.bind(&id), Some("unit-1"));
        assert_eq!(table.status(&id), Some(ReservationStatus::Bound));
    }

    #[test]
    fn sweep_expired_only_takes_reserved_not_bound() {
        let mut table: ReservationTable<i64> = ReservationTable::new();
        let reserved_id = RequestId::generate();
        let bound_id = RequestId::generate();
        table.reserve(reserved_id.clone(), 1, -5);
        table.reserve(bound_id.clone(), 2, -5);
        table.bind(&bound_id);

        let expired = table.sweep_expired();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, reserved_id);
        assert_eq!(table.status(&bound_id), Some(ReservationStatus::Bound));
    }

    #[test]
    fn unreserve_removes_entry_regardless_of_status() {
        let mut table: ReservationTable<i64> = ReservationTable::new();
        let id = RequestId::generate();
        table.reserve(id.clone(), 1, 1000);
        table.bind(&id);
        assert_eq!(table.unreserve(&id), Some(1));
        assert!(table.existing(&id).is_none());
    }
}
