//! Priority-based routing.

use std::collections::BTreeMap;

use tracing::{error, warn};

use notifyhub_core::{Channel, Priority};

use crate::pipeline::{PipelineSender, RoutedEvent};

/// Maps priorities to channel sets and enqueues onto the matching pipelines.
#[derive(Debug, Clone, Default)]
pub struct PriorityRouter {
    pipelines: BTreeMap<Channel, PipelineSender>,
}

impl PriorityRouter {
    pub fn new(pipelines: impl IntoIterator<Item = PipelineSender>) -> Self {
        Self {
            pipelines: pipelines
                .into_iter()
                .map(|sender| (sender.channel(), sender))
                .collect(),
        }
    }

    /// Channels an event of `priority` must reach.
    ///
    /// Total over every priority; an unrecognized one selects nothing.
    pub fn select(priority: Priority) -> &'static [Channel] {
        match priority {
            Priority::Low => &[Channel::Chat],
            Priority::Medium => &[Channel::Chat, Channel::Email],
            Priority::High => &[Channel::Chat, Channel::Email, Channel::Phone],
            Priority::Unrecognized => &[],
        }
    }

    /// Enqueue `routed` onto every channel in `channels`.
    ///
    /// Returns the channels that could not take the event (pipeline missing or
    /// shut down); the caller decides how to settle them.
    pub fn dispatch(&self, routed: &RoutedEvent, channels: &[Channel]) -> Vec<Channel> {
        if channels.is_empty() {
            warn!(
                id = %routed.id,
                priority = %routed.event.priority,
                "no channel selected for priority; notification left pending"
            );
            return Vec::new();
        }

        let mut undeliverable = Vec::new();
        for channel in channels {
            let accepted = self
                .pipelines
                .get(channel)
                .is_some_and(|sender| sender.enqueue(routed.clone()).is_ok());

            if !accepted {
                error!(id = %routed.id, channel = %channel, "channel pipeline unavailable");
                undeliverable.push(*channel);
            }
        }
        undeliverable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_reaches_chat_only() {
        assert_eq!(PriorityRouter::select(Priority::Low), &[Channel::Chat]);
    }

    #[test]
    fn medium_reaches_chat_and_email() {
        assert_eq!(
            PriorityRouter::select(Priority::Medium),
            &[Channel::Chat, Channel::Email]
        );
    }

    #[test]
    fn high_reaches_every_channel() {
        assert_eq!(PriorityRouter::select(Priority::High), &Channel::ALL);
    }

    #[test]
    fn unrecognized_priority_is_routed_nowhere() {
        assert!(PriorityRouter::select(Priority::Unrecognized).is_empty());
        assert!(PriorityRouter::select(Priority::parse("urgent")).is_empty());
    }

    #[test]
    fn missing_pipelines_are_reported() {
        let router = PriorityRouter::default();
        let routed = RoutedEvent {
            id: "r-1".into(),
            round: 1,
            event: notifyhub_core::NotificationEvent::new("t", "m", Priority::Medium),
        };

        let undeliverable = router.dispatch(&routed, PriorityRouter::select(Priority::Medium));
        assert_eq!(undeliverable, vec![Channel::Chat, Channel::Email]);
    }
}
