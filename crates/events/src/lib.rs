//! Event distribution primitives: subscriptions and the bounded replay log.

pub mod bus;
pub mod history;

pub use bus::{EventBus, Subscription};
pub use history::{HistoryBuffer, HistoryError, DEFAULT_HISTORY_CAPACITY};
