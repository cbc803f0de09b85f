//! Delivery error model.

use thiserror::Error;

use crate::channel::Channel;

/// Result of a single delivery attempt.
pub type DeliveryResult<T = ()> = Result<T, DeliveryError>;

/// Failure reported by a delivery channel (or by the engine on its behalf).
///
/// These never escape the engine to producers: a pipeline folds them into a
/// terminal `FAILED` status.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The channel attempted delivery and it failed.
    #[error("{channel} delivery failed: {reason}")]
    Failed { channel: Channel, reason: String },

    /// The channel capability panicked while delivering.
    #[error("{channel} delivery aborted: {reason}")]
    Aborted { channel: Channel, reason: String },

    /// An identifier was blank or otherwise unusable.
    #[error("invalid notification id: {0:?}")]
    InvalidId(String),
}

impl DeliveryError {
    pub fn failed(channel: Channel, reason: impl Into<String>) -> Self {
        Self::Failed {
            channel,
            reason: reason.into(),
        }
    }

    pub fn aborted(channel: Channel, reason: impl Into<String>) -> Self {
        Self::Aborted {
            channel,
            reason: reason.into(),
        }
    }
}
