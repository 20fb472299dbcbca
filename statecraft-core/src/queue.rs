//! Thread-safe event queue.
//!
//! Any thread may post; only the machine's owner thread dequeues. Internal
//! (high priority) events are always drained before external ones. Delayed
//! events wait in a timer table until they are due, then join the external
//! queue in deadline order.

use crate::error::CoreError;
use crate::event::Event;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Handle for a pending delayed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DelayedEventId(u64);

impl DelayedEventId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventPriority {
    #[default]
    Normal,
    /// Processed before any normal-priority event.
    High,
}

#[derive(Debug)]
struct DelayedEvent {
    due: Instant,
    event: Event,
}

#[derive(Debug, Default)]
pub(crate) struct EventQueue {
    internal: Mutex<VecDeque<Event>>,
    external: Mutex<VecDeque<Event>>,
    delayed: Mutex<BTreeMap<DelayedEventId, DelayedEvent>>,
    next_delayed_id: AtomicU64,
    accepting: AtomicBool,
    stop_requested: AtomicBool,
}

impl EventQueue {
    pub(crate) fn post(&self, event: Event, priority: EventPriority) -> Result<(), CoreError> {
        if !self.is_accepting() {
            tracing::warn!("cannot post event {} when the state machine is not running", event);
            return Err(CoreError::NotRunning);
        }
        match priority {
            EventPriority::Normal => self.external.lock().push_back(event),
            EventPriority::High => self.internal.lock().push_back(event),
        }
        Ok(())
    }

    pub(crate) fn post_delayed(
        &self,
        event: Event,
        delay: Duration,
    ) -> Result<DelayedEventId, CoreError> {
        if !self.is_accepting() {
            tracing::warn!("cannot post delayed event {} when the state machine is not running", event);
            return Err(CoreError::NotRunning);
        }
        let id = DelayedEventId(self.next_delayed_id.fetch_add(1, Ordering::Relaxed));
        let due = Instant::now() + delay;
        self.delayed.lock().insert(id, DelayedEvent { due, event });
        Ok(id)
    }

    pub(crate) fn cancel_delayed(&self, id: DelayedEventId) -> bool {
        self.delayed.lock().remove(&id).is_some()
    }

    /// Moves every delayed event due at `now` into the external queue.
    pub(crate) fn promote_due(&self, now: Instant) -> usize {
        let mut due: Vec<(Instant, DelayedEventId)> = {
            let delayed = self.delayed.lock();
            delayed
                .iter()
                .filter(|(_, d)| d.due <= now)
                .map(|(id, d)| (d.due, *id))
                .collect()
        };
        if due.is_empty() {
            return 0;
        }
        due.sort();

        let mut delayed = self.delayed.lock();
        let mut external = self.external.lock();
        let mut promoted = 0;
        for (_, id) in due {
            if let Some(d) = delayed.remove(&id) {
                external.push_back(d.event);
                promoted += 1;
            }
        }
        promoted
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.delayed.lock().values().map(|d| d.due).min()
    }

    pub(crate) fn dequeue(&self) -> Option<Event> {
        if let Some(event) = self.internal.lock().pop_front() {
            return Some(event);
        }
        self.external.lock().pop_front()
    }

    pub(crate) fn pending(&self) -> usize {
        self.internal.lock().len() + self.external.lock().len()
    }

    pub(crate) fn delayed_count(&self) -> usize {
        self.delayed.lock().len()
    }

    /// Drops every queued and delayed event.
    pub(crate) fn clear(&self) {
        self.internal.lock().clear();
        self.external.lock().clear();
        self.delayed.lock().clear();
        self.stop_requested.store(false, Ordering::SeqCst);
    }

    pub(crate) fn open(&self) {
        self.accepting.store(true, Ordering::SeqCst);
    }

    pub(crate) fn close(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub(crate) fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take_stop_request(&self) -> bool {
        self.stop_requested.swap(false, Ordering::SeqCst)
    }
}

/// Cloneable, thread-safe handle for posting events to a machine.
#[derive(Debug, Clone)]
pub struct EventPoster {
    queue: Arc<EventQueue>,
}

impl EventPoster {
    pub(crate) fn new(queue: Arc<EventQueue>) -> Self {
        Self { queue }
    }

    /// Posts an event to the external queue.
    pub fn post(&self, event: Event) -> Result<(), CoreError> {
        self.queue.post(event, EventPriority::Normal)
    }

    pub fn post_with_priority(&self, event: Event, priority: EventPriority) -> Result<(), CoreError> {
        self.queue.post(event, priority)
    }

    /// Posts an event that joins the external queue once `delay` has elapsed.
    pub fn post_delayed(&self, event: Event, delay: Duration) -> Result<DelayedEventId, CoreError> {
        self.queue.post_delayed(event, delay)
    }

    /// Cancels a delayed event. Returns false if it already fired or was cancelled.
    pub fn cancel_delayed(&self, id: DelayedEventId) -> bool {
        self.queue.cancel_delayed(id)
    }

    /// Asks the owner thread to stop the machine before its next step.
    pub fn request_stop(&self) {
        self.queue.request_stop();
    }

    pub fn is_accepting(&self) -> bool {
        self.queue.is_accepting()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_queue() -> EventQueue {
        let q = EventQueue::default();
        q.open();
        q
    }

    #[test]
    fn test_fifo_order() {
        let q = open_queue();
        q.post(Event::new("a"), EventPriority::Normal).unwrap();
        q.post(Event::new("b"), EventPriority::Normal).unwrap();
        assert_eq!(q.dequeue().unwrap().event_type.as_str(), "a");
        assert_eq!(q.dequeue().unwrap().event_type.as_str(), "b");
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn test_high_priority_first() {
        let q = open_queue();
        q.post(Event::new("normal"), EventPriority::Normal).unwrap();
        q.post(Event::new("high"), EventPriority::High).unwrap();
        assert_eq!(q.dequeue().unwrap().event_type.as_str(), "high");
        assert_eq!(q.dequeue().unwrap().event_type.as_str(), "normal");
    }

    #[test]
    fn test_closed_queue_rejects_posts() {
        let q = EventQueue::default();
        let result = q.post(Event::new("a"), EventPriority::Normal);
        assert!(matches!(result, Err(CoreError::NotRunning)));
        assert_eq!(q.pending(), 0);
    }

    #[test]
    fn test_delayed_events_promote_in_deadline_order() {
        let q = open_queue();
        let now = Instant::now();
        q.post_delayed(Event::new("late"), Duration::from_millis(20))
            .unwrap();
        q.post_delayed(Event::new("early"), Duration::from_millis(10))
            .unwrap();
        q.post_delayed(Event::new("never"), Duration::from_secs(3600))
            .unwrap();

        assert_eq!(q.promote_due(now), 0);
        assert_eq!(q.promote_due(now + Duration::from_millis(50)), 2);
        assert_eq!(q.dequeue().unwrap().event_type.as_str(), "early");
        assert_eq!(q.dequeue().unwrap().event_type.as_str(), "late");
        assert_eq!(q.delayed_count(), 1);
        assert!(q.next_deadline().is_some());
    }

    #[test]
    fn test_cancel_delayed() {
        let q = open_queue();
        let id = q
            .post_delayed(Event::new("a"), Duration::from_millis(1))
            .unwrap();
        assert!(q.cancel_delayed(id));
        assert!(!q.cancel_delayed(id));
        assert_eq!(q.promote_due(Instant::now() + Duration::from_secs(1)), 0);
    }

    #[test]
    fn test_posting_from_other_threads() {
        let q = Arc::new(open_queue());
        let poster = EventPoster::new(q.clone());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let p = poster.clone();
                std::thread::spawn(move || {
                    for j in 0..25 {
                        p.post(Event::new(format!("e{}-{}", i, j))).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(q.pending(), 100);
    }

    #[test]
    fn test_stop_request_is_taken_once() {
        let q = open_queue();
        q.request_stop();
        assert!(q.take_stop_request());
        assert!(!q.take_stop_request());
    }
}
