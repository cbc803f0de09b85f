//! Publish/subscribe abstraction (mechanics only).
//!
//! A bus distributes messages to any number of independent subscribers. Each
//! subscriber owns a [`Subscription`]; dropping it unsubscribes, and the bus
//! prunes the dead sender on its next publish.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// A subscription to a message stream.
///
/// ## Usage Pattern
///
/// ```ignore
/// let sub = history.subscribe();
///
/// loop {
///     match sub.recv_timeout(Duration::from_secs(1)) {
///         Ok(snapshot) => render(snapshot),
///         Err(RecvTimeoutError::Timeout) => continue,      // check for shutdown
///         Err(RecvTimeoutError::Disconnected) => break,    // bus dropped
///     }
/// }
/// ```
///
/// A subscription is consumed by one thread. Messages arrive in the order the
/// bus admitted them.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything already delivered to this subscription, without blocking.
    pub fn drain_ready(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }

    /// Blocking iterator over the stream; ends only when the bus is dropped.
    pub fn iter(&self) -> mpsc::Iter<'_, M> {
        self.receiver.iter()
    }
}

impl<M> IntoIterator for Subscription<M> {
    type Item = M;
    type IntoIter = mpsc::IntoIter<M>;

    fn into_iter(self) -> Self::IntoIter {
        self.receiver.into_iter()
    }
}

/// Domain-agnostic pub/sub bus.
///
/// Implementations must be safe to share across threads; many threads may
/// publish concurrently.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
