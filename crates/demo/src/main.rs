//! Publishes a batch of notifications through simulated channels and prints
//! the resulting history as JSON lines.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;

use notifyhub_core::{NotificationEvent, NotificationId, Priority};
use notifyhub_infra::{DeliveryChannels, NotificationConfig, NotificationSystem, PriorityRouter};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(15);

fn main() -> anyhow::Result<()> {
    notifyhub_observability::init();

    let config = NotificationConfig::from_env().context("loading configuration")?;
    let system = NotificationSystem::new(config, DeliveryChannels::simulated())
        .context("starting notification system")?;
    let history = system.history();

    let batch = [
        ("CI", "deploy-1", Priority::High),
        ("CI", "build finished", Priority::Low),
        ("BILLING", "invoice overdue", Priority::Medium),
        ("MONITORING", "disk at 91%", Priority::High),
        ("CRM", "new signup", Priority::Low),
        ("BILLING", "card declined", Priority::parse("URGENT")),
    ];

    let ids: Vec<NotificationId> = batch
        .into_iter()
        .map(|(source, message, priority)| {
            system.publish(NotificationEvent::new(source, message, priority))
        })
        .collect();

    if !wait_until_settled(&system, &ids, SETTLE_TIMEOUT) {
        tracing::warn!("some notifications did not settle in time");
    }

    let retried = system.retry_failed();
    tracing::info!(count = retried.len(), "retried failed notifications");

    // Shutdown drains the retries before returning.
    let stats = system.shutdown();

    for snapshot in history.drain_ready() {
        println!("{}", serde_json::to_string(&snapshot)?);
    }
    println!("{}", serde_json::to_string(&stats)?);
    Ok(())
}

/// Block until every routable notification in `ids` is SENT or FAILED.
fn wait_until_settled(system: &NotificationSystem, ids: &[NotificationId], timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let settled = ids.iter().all(|id| {
            system.get_by_id(id).is_some_and(|event| {
                event.status.is_terminal() || PriorityRouter::select(event.priority).is_empty()
            })
        });
        if settled {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(50));
    }
}
