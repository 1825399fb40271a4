// packages/scheduler/src/events/event_queue.rs
//! Lock-free MPMC engine event queue
//!
//! Bounded so a missing consumer cannot grow memory without limit. A push
//! onto a full queue drops the event and bumps the drop counter.

use crate::events::event::EngineEvent;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Lock-free event queue
pub struct EventQueue {
    /// Underlying bounded queue
    queue: ArrayQueue<EngineEvent>,

    /// Push counter
    push_count: AtomicU64,

    /// Pop counter
    pop_count: AtomicU64,

    /// Drop counter (queue full)
    drop_count: AtomicU64,
}

impl EventQueue {
    /// Create a new event queue
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            push_count: AtomicU64::new(0),
            pop_count: AtomicU64::new(0),
            drop_count: AtomicU64::new(0),
        }
    }

    /// Push an event (non-blocking). Returns `false` if it was dropped.
    pub fn push(&self, event: EngineEvent) -> bool {
        match self.queue.push(event) {
            Ok(()) => {
                self.push_count.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(event) => {
                trace!("Event queue full, dropping {:?} event", event.kind);
                self.drop_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Try to pop an event (non-blocking)
    pub fn try_pop(&self) -> Option<EngineEvent> {
        let event = self.queue.pop()?;
        self.pop_count.fetch_add(1, Ordering::Relaxed);
        Some(event)
    }

    /// Pop everything currently buffered, oldest first
    pub fn drain(&self) -> Vec<EngineEvent> {
        let mut events = Vec::with_capacity(self.queue.len());
        while let Some(event) = self.try_pop() {
            events.push(event);
        }
        events
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            push_count: self.push_count.load(Ordering::Relaxed),
            pop_count: self.pop_count.load(Ordering::Relaxed),
            drop_count: self.drop_count.load(Ordering::Relaxed),
            current_size: self.queue.len(),
            capacity: self.queue.capacity(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(crate::events::EventsConfig::default().queue_capacity)
    }
}

/// Queue statistics
#[derive(Debug, Clone)]
pub struct QueueStats {
    /// Total events accepted
    pub push_count: u64,

    /// Total events consumed
    pub pop_count: u64,

    /// Total events dropped (queue full)
    pub drop_count: u64,

    /// Current queue size
    pub current_size: usize,

    /// Queue capacity
    pub capacity: usize,
}

impl QueueStats {
    /// Fill percentage
    pub fn fill_percentage(&self) -> f64 {
        (self.current_size as f64 / self.capacity as f64) * 100.0
    }

    /// Share of attempted pushes that were dropped, in percent
    pub fn drop_rate(&self) -> f64 {
        let attempted = self.push_count + self.drop_count;
        if attempted == 0 {
            0.0
        } else {
            (self.drop_count as f64 / attempted as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::EventKind;
    use std::sync::Arc;

    fn event(kind: EventKind) -> EngineEvent {
        EngineEvent::new(kind)
    }

    #[test]
    fn test_queue_creation() {
        let queue = EventQueue::new(100);
        assert_eq!(queue.capacity(), 100);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_pop_order() {
        let queue = EventQueue::new(10);

        assert!(queue.push(event(EventKind::TaskAssigned)));
        assert!(queue.push(event(EventKind::TaskFinished)));

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].kind, EventKind::TaskAssigned);
        assert_eq!(drained[1].kind, EventKind::TaskFinished);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_full_drops() {
        let queue = EventQueue::new(2);

        assert!(queue.push(event(EventKind::ContextAllocated)));
        assert!(queue.push(event(EventKind::ContextAllocated)));
        assert!(!queue.push(event(EventKind::ContextFreed)));

        let stats = queue.stats();
        assert_eq!(stats.push_count, 2);
        assert_eq!(stats.drop_count, 1);
        assert!((stats.drop_rate() - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.fill_percentage(), 100.0);
    }

    #[test]
    fn test_concurrent_producers() {
        use std::thread;

        let queue = Arc::new(EventQueue::new(1000));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let q = Arc::clone(&queue);
                thread::spawn(move || {
                    for _ in 0..100 {
                        q.push(event(EventKind::MessageDelivered));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = queue.stats();
        assert_eq!(stats.push_count + stats.drop_count, 1000);
        assert_eq!(queue.drain().len() as u64, stats.push_count);
    }
}
