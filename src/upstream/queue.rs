//! Strict-priority FIFO queue feeding the upstream worker.
//!
//! Priority classes are small integers, 1 = highest. Within a class, FIFO order is
//! strict; across classes, lower numbers always drain first.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;

/// Call priority, matching the spec's CRITICAL/HIGH/MEDIUM/LOW classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    Critical = 1,
    High = 2,
    Medium = 3,
    Low = 4,
}

struct Inner<T> {
    classes: BTreeMap<u8, VecDeque<T>>,
}

/// A FIFO-within-class priority queue, plus a reentry guard so a single background
/// worker can safely drain it without risking two drain loops racing each other.
pub struct PriorityQueue<T> {
    inner: Mutex<Inner<T>>,
    draining: AtomicBool,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                classes: BTreeMap::new(),
            }),
            draining: AtomicBool::new(false),
        }
    }

    pub fn add(&self, item: T, priority: Priority) {
        let mut inner = self.inner.lock();
        inner
            .classes
            .entry(priority as u8)
            .or_default()
            .push_back(item);
    }

    /// Pop the head of the lowest non-empty priority class.
    pub fn next(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        for queue in inner.classes.values_mut() {
            if let Some(item) = queue.pop_front() {
                return Some(item);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.inner.lock().classes.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len_of(&self, priority: Priority) -> usize {
        self.inner
            .lock()
            .classes
            .get(&(priority as u8))
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Drop every queued item in `priority`'s class. Used for backpressure: LOW items
    /// are shed first when the queue grows past its configured bound.
    pub fn drop_class(&self, priority: Priority) -> usize {
        let mut inner = self.inner.lock();
        inner
            .classes
            .get_mut(&(priority as u8))
            .map(|q| {
                let n = q.len();
                q.clear();
                n
            })
            .unwrap_or(0)
    }

    /// Acquire the single-worker drain guard. Returns `None` if another drain is
    /// already in progress; the returned guard releases it on drop.
    pub fn try_start_draining(&self) -> Option<DrainGuard<'_, T>> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(DrainGuard { queue: self })
        } else {
            None
        }
    }
}

/// RAII guard releasing the drain reentry lock.
pub struct DrainGuard<'a, T> {
    queue: &'a PriorityQueue<T>,
}

impl<T> Drop for DrainGuard<'_, T> {
    fn drop(&mut self) {
        self.queue.draining.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_priority_with_fifo_within_class() {
        let q = PriorityQueue::new();
        q.add("low-1", Priority::Low);
        q.add("high-1", Priority::High);
        q.add("low-2", Priority::Low);
        q.add("critical-1", Priority::Critical);
        q.add("high-2", Priority::High);

        assert_eq!(q.next(), Some("critical-1"));
        assert_eq!(q.next(), Some("high-1"));
        assert_eq!(q.next(), Some("high-2"));
        assert_eq!(q.next(), Some("low-1"));
        assert_eq!(q.next(), Some("low-2"));
        assert_eq!(q.next(), None);
    }

    #[test]
    fn reentry_guard_prevents_double_drain() {
        let q: PriorityQueue<()> = PriorityQueue::new();
        let first = q.try_start_draining();
        assert!(first.is_some());
        assert!(q.try_start_draining().is_none());
        drop(first);
        assert!(q.try_start_draining().is_some());
    }

    #[test]
    fn drop_class_clears_only_that_class() {
        let q = PriorityQueue::new();
        q.add(1, Priority::Low);
        q.add(2, Priority::Low);
        q.add(3, Priority::High);
        assert_eq!(q.drop_class(Priority::Low), 2);
        assert_eq!(q.next(), Some(3));
        assert_eq!(q.next(), None);
    }
}
