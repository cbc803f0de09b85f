//! `notifyhub-core`: notification domain primitives.
//!
//! This crate contains the **pure domain** types shared by the fan-out engine
//! (no threads, no IO).

pub mod channel;
pub mod error;
pub mod id;
pub mod notification;

pub use channel::Channel;
pub use error::{DeliveryError, DeliveryResult};
pub use id::NotificationId;
pub use notification::{NotificationEvent, NotificationStatus, Priority};
