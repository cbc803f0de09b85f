//! Test doubles shared by the unit and integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use notifyhub_core::{Channel, DeliveryError, DeliveryResult, NotificationEvent, NotificationId, NotificationStatus};

use crate::delivery::DeliveryChannel;
use crate::ingress::NotificationSystem;

/// A delivery channel that fails its first `failures` calls, then succeeds.
#[derive(Debug)]
pub struct ScriptedChannel {
    channel: Channel,
    failures: usize,
    panic_first: bool,
    calls: AtomicUsize,
}

impl ScriptedChannel {
    pub fn succeeding(channel: Channel) -> Self {
        Self::failing_times(channel, 0)
    }

    pub fn failing(channel: Channel) -> Self {
        Self::failing_times(channel, usize::MAX)
    }

    pub fn failing_times(channel: Channel, failures: usize) -> Self {
        Self {
            channel,
            failures,
            panic_first: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn panicking_once(channel: Channel) -> Self {
        Self {
            panic_first: true,
            ..Self::succeeding(channel)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DeliveryChannel for ScriptedChannel {
    fn attempt_deliver(&self, _event: &NotificationEvent) -> DeliveryResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.panic_first && call == 1 {
            panic!("scripted {} panic", self.channel);
        }
        if call <= self.failures {
            return Err(DeliveryError::failed(self.channel, format!("scripted failure #{call}")));
        }
        Ok(())
    }
}

/// Poll `check` until it yields a value or `timeout` elapses.
pub fn eventually<T>(timeout: Duration, mut check: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = check() {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// Wait until `id` is cached with `status`.
pub fn wait_for_status(
    system: &NotificationSystem,
    id: &NotificationId,
    status: NotificationStatus,
) -> NotificationEvent {
    eventually(Duration::from_secs(5), || {
        system.get_by_id(id).filter(|event| event.status == status)
    })
    .unwrap_or_else(|| {
        panic!(
            "notification {id} never reached {status:?}; last seen {:?}",
            system.get_by_id(id)
        )
    })
}
