//! FIFO bookkeeping for the two queues the Global Scheduler keeps (spec
//! §4.6): Domain Schedulers awaiting replacement after a heartbeat timeout,
//! and Local Schedulers awaiting a Domain Scheduler slot to attach to.

use std::collections::VecDeque;

use yr_heartbeat::Node;

/// What a broken DS left behind: its former children, orphaned but still
/// present in the topology, waiting to be reparented onto its replacement.
#[derive(Debug, Clone)]
pub struct BrokenDsSlot {
    pub broken_name: String,
    pub orphaned_children: Vec<Node>,
}

#[derive(Debug, Default)]
pub struct ReplacementQueue {
    slots: VecDeque<BrokenDsSlot>,
}

impl ReplacementQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, slot: BrokenDsSlot) {
        self.slots.push_back(slot);
    }

    /// Multiple outstanding BROKEN slots form a FIFO queue (spec §4.6): the
    /// first new DS to register takes over the oldest broken slot.
    pub fn pop_front(&mut self) -> Option<BrokenDsSlot> {
        self.slots.pop_front()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// A Local Scheduler registration that could not find a Domain Scheduler
/// with room and is waiting for one to be activated.
#[derive(Debug, Clone)]
pub struct PendingLs {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Default)]
pub struct PendingLsQueue {
    queue: VecDeque<PendingLs>,
}

impl PendingLsQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, entry: PendingLs) {
        self.queue.push_back(entry);
    }

    pub fn pop_front(&mut self) -> Option<PendingLs> {
        self.queue.pop_front()
    }

    pub fn push_front(&mut self, entry: PendingLs) {
        self.queue.push_front(entry);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
