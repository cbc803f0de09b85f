//! Bounded multicast replay log.
//!
//! `HistoryBuffer` keeps the last `capacity` admitted messages in a ring and
//! fans every new admission out to all live subscribers. A new subscriber is
//! first handed every retained message (oldest first), then every message
//! admitted afterwards. Catch-up and registration happen under the same lock
//! as admission, so no subscriber sees a gap or a duplicate at the seam.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError, mpsc};

use tracing::trace;

use crate::bus::{EventBus, Subscription};

/// Default number of retained snapshots.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    #[error("history capacity must be at least 1")]
    ZeroCapacity,
}

#[derive(Debug)]
struct HistoryState<M> {
    ring: VecDeque<M>,
    subscribers: Vec<mpsc::Sender<M>>,
    admitted: u64,
}

#[derive(Debug)]
pub struct HistoryBuffer<M> {
    capacity: usize,
    state: Mutex<HistoryState<M>>,
}

impl<M> HistoryBuffer<M> {
    /// History with the default capacity of 50.
    pub fn new() -> Self {
        Self::build(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Result<Self, HistoryError> {
        if capacity == 0 {
            return Err(HistoryError::ZeroCapacity);
        }
        Ok(Self::build(capacity))
    }

    fn build(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(HistoryState {
                ring: VecDeque::with_capacity(capacity),
                subscribers: Vec::new(),
                admitted: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of retained messages (never above `capacity`).
    pub fn len(&self) -> usize {
        self.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total admissions since creation, including evicted ones.
    pub fn admitted(&self) -> u64 {
        self.lock().admitted
    }

    /// Live subscribers as of the last admission (dropped ones are pruned lazily).
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HistoryState<M>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<M: Clone> HistoryBuffer<M> {
    /// Copy of the retained messages, oldest first.
    pub fn snapshot(&self) -> Vec<M> {
        self.lock().ring.iter().cloned().collect()
    }
}

impl<M> Default for HistoryBuffer<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> EventBus<M> for HistoryBuffer<M>
where
    M: Clone + Send + 'static,
{
    type Error = HistoryError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut state = self.lock();

        if state.ring.len() == self.capacity {
            state.ring.pop_front();
        }
        state.ring.push_back(message.clone());
        state.admitted += 1;

        // Drop any dead subscribers while publishing.
        let before = state.subscribers.len();
        state.subscribers.retain(|tx| tx.send(message.clone()).is_ok());
        if state.subscribers.len() != before {
            trace!(
                pruned = before - state.subscribers.len(),
                "dropped disconnected history subscribers"
            );
        }

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();
        let mut state = self.lock();

        // The receiver is alive for the whole loop, so these sends cannot fail.
        for retained in &state.ring {
            let _ = tx.send(retained.clone());
        }
        state.subscribers.push(tx);

        Subscription::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(
            HistoryBuffer::<u32>::with_capacity(0).unwrap_err(),
            HistoryError::ZeroCapacity
        );
    }

    #[test]
    fn catch_up_yields_last_fifty_of_sixty_in_order() {
        let history = HistoryBuffer::new();
        for n in 0..60u32 {
            history.publish(n).unwrap();
        }

        assert_eq!(history.len(), 50);
        assert_eq!(history.admitted(), 60);

        let sub = history.subscribe();
        let caught_up = sub.drain_ready();
        assert_eq!(caught_up, (10..60).collect::<Vec<_>>());
    }

    #[test]
    fn subscriber_receives_catch_up_then_live() {
        let history = HistoryBuffer::with_capacity(3).unwrap();
        history.publish("a").unwrap();
        history.publish("b").unwrap();

        let sub = history.subscribe();
        history.publish("c").unwrap();
        history.publish("d").unwrap();

        assert_eq!(sub.drain_ready(), vec!["a", "b", "c", "d"]);
        // The ring itself still only retains the last three.
        assert_eq!(history.snapshot(), vec!["b", "c", "d"]);
    }

    #[test]
    fn concurrent_subscribers_each_get_the_full_sequence() {
        let history = Arc::new(HistoryBuffer::with_capacity(10).unwrap());
        history.publish(0u32).unwrap();

        let early = history.subscribe();
        history.publish(1).unwrap();
        let late = history.subscribe();
        history.publish(2).unwrap();

        assert_eq!(early.drain_ready(), vec![0, 1, 2]);
        assert_eq!(late.drain_ready(), vec![0, 1, 2]);
    }

    #[test]
    fn dropped_subscriptions_are_pruned() {
        let history = HistoryBuffer::with_capacity(4).unwrap();
        let keep = history.subscribe();
        let gone = history.subscribe();
        assert_eq!(history.subscriber_count(), 2);

        drop(gone);
        history.publish(7u8).unwrap();

        assert_eq!(history.subscriber_count(), 1);
        assert_eq!(keep.recv_timeout(Duration::from_secs(1)).unwrap(), 7);
    }

    #[test]
    fn live_delivery_crosses_threads() {
        let history = Arc::new(HistoryBuffer::with_capacity(50).unwrap());
        let sub = history.subscribe();

        let publisher = {
            let history = history.clone();
            thread::spawn(move || {
                for n in 0..20u32 {
                    history.publish(n).unwrap();
                }
            })
        };
        publisher.join().unwrap();

        let received: Vec<u32> = (0..20)
            .map(|_| sub.recv_timeout(Duration::from_secs(1)).unwrap())
            .collect();
        assert_eq!(received, (0..20).collect::<Vec<_>>());
    }

    fn panic_holding_lock<M>(history: &HistoryBuffer<M>) {
        let _state = history.state.lock().unwrap();
        panic!("panic while holding the history lock");
    }

    #[test]
    fn keeps_admitting_after_a_panicked_holder() {
        let history = Arc::new(HistoryBuffer::with_capacity(4).unwrap());
        history.publish(1u32).unwrap();

        let poisoner = history.clone();
        let _ = thread::spawn(move || panic_holding_lock(&poisoner)).join();
        assert!(history.state.is_poisoned());

        let sub = history.subscribe();
        history.publish(2).unwrap();

        assert_eq!(sub.drain_ready(), vec![1, 2]);
        assert_eq!(history.snapshot(), vec![1, 2]);
        assert_eq!(history.admitted(), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: the ring never exceeds capacity and always holds the most
        /// recent admissions in admission order.
        #[test]
        fn retains_most_recent_in_order(
            capacity in 1usize..64,
            items in prop::collection::vec(any::<u16>(), 0..200)
        ) {
            let history = HistoryBuffer::with_capacity(capacity).unwrap();
            for item in &items {
                history.publish(*item).unwrap();
            }

            let retained = history.snapshot();
            prop_assert!(retained.len() <= capacity);

            let start = items.len().saturating_sub(capacity);
            prop_assert_eq!(retained, items[start..].to_vec());
        }
    }
}
