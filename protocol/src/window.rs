use std::collections::{HashSet, VecDeque};

/// Default number of inbound sequence numbers remembered per circuit.
pub const DEFAULT_WINDOW: usize = 1024;

/// Bounded memory of recently received sequence numbers.
///
/// Oldest entries are forgotten first, so a duplicate that arrives after
/// `capacity` newer packets is no longer recognised.
#[derive(Debug, Clone)]
pub struct SequenceWindow {
    capacity: usize,
    order: VecDeque<u32>,
    seen: HashSet<u32>,
}

impl SequenceWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Records `sequence`. Returns `false` if it was already in the window.
    pub fn insert(&mut self, sequence: u32) -> bool {
        if !self.seen.insert(sequence) {
            return false;
        }
        self.order.push_back(sequence);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, sequence: u32) -> bool {
        self.seen.contains(&sequence)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SequenceWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
