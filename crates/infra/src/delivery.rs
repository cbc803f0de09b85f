//! The delivery capability boundary.
//!
//! The engine knows nothing about transports or payload formats; it only asks
//! a channel to attempt delivery and looks at the `Result`.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::RngExt;
use tracing::info;

use notifyhub_core::{Channel, DeliveryError, DeliveryResult, NotificationEvent};

/// An external delivery service (chat, email, phone gateway, ...).
///
/// Calls may block for a long time; pipelines invoke them from their own
/// worker threads only.
pub trait DeliveryChannel: Send + Sync {
    fn attempt_deliver(&self, event: &NotificationEvent) -> DeliveryResult;
}

/// The three capabilities a notification system is wired with.
#[derive(Clone)]
pub struct DeliveryChannels {
    pub chat: Arc<dyn DeliveryChannel>,
    pub email: Arc<dyn DeliveryChannel>,
    pub phone: Arc<dyn DeliveryChannel>,
}

impl DeliveryChannels {
    pub fn new(
        chat: Arc<dyn DeliveryChannel>,
        email: Arc<dyn DeliveryChannel>,
        phone: Arc<dyn DeliveryChannel>,
    ) -> Self {
        Self { chat, email, phone }
    }

    /// Stand-in services with realistic latency and failure rates.
    pub fn simulated() -> Self {
        Self {
            chat: Arc::new(SimulatedChannel::chat()),
            email: Arc::new(SimulatedChannel::email()),
            phone: Arc::new(SimulatedChannel::phone()),
        }
    }

    pub fn get(&self, channel: Channel) -> Arc<dyn DeliveryChannel> {
        match channel {
            Channel::Chat => self.chat.clone(),
            Channel::Email => self.email.clone(),
            Channel::Phone => self.phone.clone(),
        }
    }
}

impl core::fmt::Debug for DeliveryChannels {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeliveryChannels").finish_non_exhaustive()
    }
}

/// Simulated delivery service: sleeps for `latency`, then fails with
/// probability `failure_percent` / 100.
#[derive(Debug, Clone)]
pub struct SimulatedChannel {
    channel: Channel,
    latency: Duration,
    failure_percent: u32,
}

impl SimulatedChannel {
    pub fn new(channel: Channel, latency: Duration, failure_percent: u32) -> Self {
        Self {
            channel,
            latency,
            failure_percent: failure_percent.min(100),
        }
    }

    pub fn chat() -> Self {
        Self::new(Channel::Chat, Duration::from_millis(150), 10)
    }

    pub fn email() -> Self {
        Self::new(Channel::Email, Duration::from_millis(300), 15)
    }

    pub fn phone() -> Self {
        Self::new(Channel::Phone, Duration::from_millis(1000), 20)
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }
}

impl DeliveryChannel for SimulatedChannel {
    fn attempt_deliver(&self, event: &NotificationEvent) -> DeliveryResult {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }

        if rand::rng().random_range(0..100u32) < self.failure_percent {
            return Err(DeliveryError::failed(
                self.channel,
                format!("simulated {} outage", self.channel),
            ));
        }

        info!(
            channel = %self.channel,
            id = ?event.id,
            message = %event.message,
            "notification delivered"
        );
        Ok(())
    }
}
