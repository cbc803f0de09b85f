//! Notification fan-out engine: ingress, routing, per-channel pipelines,
//! status cache and history wiring.

pub mod cache;
pub mod config;
pub mod delivery;
pub mod error;
pub mod ingress;
pub mod pipeline;
pub mod retry;
pub mod router;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{RoundOutcome, StatusCache};
pub use config::{ChannelRetryConfig, ConfigError, NotificationConfig, OverflowPolicy};
pub use delivery::{DeliveryChannel, DeliveryChannels, SimulatedChannel};
pub use error::SetupError;
pub use ingress::{IngressStats, NotificationSystem, SystemStats};
pub use pipeline::{ChannelPipeline, DeliveryReport, PipelineHandle, PipelineSender, PipelineStats, RoutedEvent};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use router::PriorityRouter;
