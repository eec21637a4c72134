//! Ordering of queued jobs by `(priority, order_number)`.
//!
//! A binary heap has no sort stability, so every entry carries an order
//! number handed out at enqueue time. Jobs with equal priority then come out
//! in the order they went in.

use crate::error::OrderingError;
use crate::types::JobPriority;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// The sort key of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderKey {
    pub priority: JobPriority,
    pub order_number: Option<u64>,
}

impl OrderKey {
    pub fn new(priority: JobPriority, order_number: Option<u64>) -> Self {
        Self {
            priority,
            order_number,
        }
    }

    /// Key for a job that already holds its position in a queue.
    pub fn assigned(priority: JobPriority, order_number: u64) -> Self {
        Self::new(priority, Some(order_number))
    }

    pub fn is_assigned(&self) -> bool {
        self.order_number.is_some()
    }
}

/// Compare two keys. Lower priority values sort first, then lower order
/// numbers.
///
/// Fails with [`OrderingError::Unassigned`] if either side has not been
/// given an order number yet.
pub fn compare(a: &OrderKey, b: &OrderKey) -> Result<Ordering, OrderingError> {
    match (a.order_number, b.order_number) {
        (Some(left), Some(right)) => Ok(a.priority.cmp(&b.priority).then(left.cmp(&right))),
        _ => Err(OrderingError::Unassigned),
    }
}

struct Slot<T> {
    priority: JobPriority,
    order_number: u64,
    item: T,
}

impl<T> Slot<T> {
    fn key(&self) -> (JobPriority, u64) {
        (self.priority, self.order_number)
    }
}

impl<T> PartialEq for Slot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<T> Eq for Slot<T> {}

impl<T> PartialOrd for Slot<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Slot<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest key pops first
        other.key().cmp(&self.key())
    }
}

/// Min-heap keyed by `(priority, order_number)` that also owns the order
/// number counter.
///
/// The counter lives next to the heap so that assigning a number and
/// inserting happen under the same lock.
pub struct OrderedQueue<T> {
    heap: BinaryHeap<Slot<T>>,
    next_order: u64,
}

impl<T> Default for OrderedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OrderedQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_order: 0,
        }
    }

    /// Hand out the next order number. Numbers are never reused.
    pub fn next_order_number(&mut self) -> u64 {
        let current = self.next_order;
        self.next_order += 1;
        current
    }

    /// Insert an item at the given position.
    ///
    /// Callers either take a fresh number from
    /// [`next_order_number`](Self::next_order_number) or put back an item
    /// that was popped earlier with its original number.
    pub fn push(&mut self, priority: JobPriority, order_number: u64, item: T) {
        self.heap.push(Slot {
            priority,
            order_number,
            item,
        });
    }

    /// Remove the entry with the smallest key, returning its position so
    /// it can be pushed back unchanged.
    pub fn pop(&mut self) -> Option<(JobPriority, u64, T)> {
        self.heap
            .pop()
            .map(|slot| (slot.priority, slot.order_number, slot.item))
    }

    pub fn peek_key(&self) -> Option<OrderKey> {
        self.heap
            .peek()
            .map(|slot| OrderKey::assigned(slot.priority, slot.order_number))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
