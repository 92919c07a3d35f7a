//! Sliding window of recently processed events, shared read-only context for
//! the pattern and correlation stages.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::Event;

pub const DEFAULT_CAPACITY: usize = 1000;

/// Bounded ring of processed events, oldest first. Workers append after an
/// event finishes stages 1-3, so a snapshot taken during processing never
/// contains the event being processed.
pub struct HistoryRing {
    events: Mutex<VecDeque<Arc<Event>>>,
    capacity: usize,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, event: Arc<Event>) {
        let mut events = self.events.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Cheap snapshot (shared handles) in oldest-to-newest order.
    pub fn snapshot(&self) -> Vec<Arc<Event>> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
