//! Per-channel delivery pipelines.
//!
//! A pipeline owns a multi-producer queue of routed events and one or more
//! persistent worker threads draining it. For each event a worker calls the
//! channel's delivery capability, retrying per the channel's policy, then
//! commits the final outcome to the status cache (and, when that closes the
//! delivery round, to the history log). Workers survive failing and panicking
//! deliveries; they stop only once every sender is dropped and the queue is
//! empty.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use notifyhub_core::{Channel, DeliveryError, DeliveryResult, NotificationEvent, NotificationId};
use notifyhub_events::{EventBus, HistoryBuffer};

use crate::cache::{RoundOutcome, StatusCache};
use crate::delivery::DeliveryChannel;
use crate::error::SetupError;
use crate::retry::RetryPolicy;

/// An event handed to a pipeline for one delivery round.
#[derive(Debug, Clone)]
pub struct RoutedEvent {
    pub id: NotificationId,
    pub round: u64,
    pub event: NotificationEvent,
}

/// Producer side of a pipeline queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PipelineSender {
    channel: Channel,
    tx: mpsc::Sender<RoutedEvent>,
}

impl PipelineSender {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Queue an event; fails only when every worker is gone.
    pub fn enqueue(&self, routed: RoutedEvent) -> Result<(), RoutedEvent> {
        self.tx.send(routed).map_err(|mpsc::SendError(routed)| routed)
    }
}

/// Result of delivering one event on one channel, retries included.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub channel: Channel,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result: DeliveryResult,
}

/// Pipeline runtime statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineStats {
    pub channel: Channel,
    pub processed: u64,
    pub delivered: u64,
    pub gave_up: u64,
    pub attempts: u64,
    pub stale_outcomes: u64,
    pub last_finished_at: Option<DateTime<Utc>>,
}

impl PipelineStats {
    fn new(channel: Channel) -> Self {
        Self {
            channel,
            processed: 0,
            delivered: 0,
            gave_up: 0,
            attempts: 0,
            stale_outcomes: 0,
            last_finished_at: None,
        }
    }
}

/// Delivery logic for one channel, shared by all of its workers.
pub struct ChannelPipeline {
    channel: Channel,
    delivery: Arc<dyn DeliveryChannel>,
    policy: RetryPolicy,
    cache: Arc<StatusCache>,
    history: Arc<HistoryBuffer<NotificationEvent>>,
    stats: Arc<Mutex<PipelineStats>>,
}

impl ChannelPipeline {
    pub fn new(
        channel: Channel,
        delivery: Arc<dyn DeliveryChannel>,
        policy: RetryPolicy,
        cache: Arc<StatusCache>,
        history: Arc<HistoryBuffer<NotificationEvent>>,
    ) -> Self {
        Self {
            channel,
            delivery,
            policy,
            cache,
            history,
            stats: Arc::new(Mutex::new(PipelineStats::new(channel))),
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Deliver `event`, retrying per policy. Never panics.
    pub fn deliver(&self, event: &NotificationEvent) -> DeliveryReport {
        let started_at = Utc::now();
        let mut attempts = 0;

        let result = loop {
            attempts += 1;
            match self.attempt_once(event) {
                Ok(()) => break Ok(()),
                Err(err) if self.policy.should_retry(attempts) => {
                    let delay = self.policy.delay_for_attempt(attempts);
                    warn!(
                        channel = %self.channel,
                        id = ?event.id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "delivery attempt failed; retrying"
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
                Err(err) => break Err(err),
            }
        };

        DeliveryReport {
            channel: self.channel,
            attempts,
            started_at,
            finished_at: Utc::now(),
            result,
        }
    }

    fn attempt_once(&self, event: &NotificationEvent) -> DeliveryResult {
        panic::catch_unwind(AssertUnwindSafe(|| self.delivery.attempt_deliver(event)))
            .unwrap_or_else(|payload| {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".to_string());
                Err(DeliveryError::aborted(self.channel, reason))
            })
    }

    /// Deliver a routed event and commit the outcome.
    pub fn process(&self, routed: RoutedEvent) -> RoundOutcome {
        let report = self.deliver(&routed.event);

        match &report.result {
            Ok(()) => info!(
                channel = %self.channel,
                id = %routed.id,
                attempts = report.attempts,
                "notification sent"
            ),
            Err(err) => error!(
                channel = %self.channel,
                id = %routed.id,
                attempts = report.attempts,
                error = %err,
                "notification delivery failed"
            ),
        }

        let outcome = commit_outcome(
            &self.cache,
            &self.history,
            &routed.id,
            routed.round,
            self.channel,
            &report.result,
        );

        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.processed += 1;
        stats.attempts += u64::from(report.attempts);
        if report.result.is_ok() {
            stats.delivered += 1;
        } else {
            stats.gave_up += 1;
        }
        if matches!(outcome, RoundOutcome::Stale { .. }) {
            stats.stale_outcomes += 1;
        }
        stats.last_finished_at = Some(report.finished_at);

        outcome
    }

    /// Start `workers` threads draining a fresh queue.
    pub fn spawn(self, workers: usize) -> Result<(PipelineSender, PipelineHandle), SetupError> {
        let (tx, rx) = mpsc::channel::<RoutedEvent>();
        let rx = Arc::new(Mutex::new(rx));
        let channel = self.channel;
        let stats = self.stats.clone();
        let pipeline = Arc::new(self);

        let mut joins = Vec::with_capacity(workers);
        for worker in 0..workers.max(1) {
            let name = format!("pipeline-{channel}-{worker}");
            let rx = rx.clone();
            let pipeline = pipeline.clone();
            let worker_name = name.clone();
            let join = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(&worker_name, &pipeline, &rx))
                .map_err(|source| SetupError::Spawn { name, source })?;
            joins.push(join);
        }

        Ok((
            PipelineSender { channel, tx },
            PipelineHandle {
                channel,
                joins,
                stats,
            },
        ))
    }
}

impl core::fmt::Debug for ChannelPipeline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChannelPipeline")
            .field("channel", &self.channel)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Record a channel's final outcome; a settling outcome is also admitted to history.
pub(crate) fn commit_outcome(
    cache: &StatusCache,
    history: &HistoryBuffer<NotificationEvent>,
    id: &NotificationId,
    round: u64,
    channel: Channel,
    result: &DeliveryResult,
) -> RoundOutcome {
    let outcome = cache.record_outcome(id, round, channel, result, |record| {
        if let Err(err) = history.publish(record.clone()) {
            error!(id = %id, error = %err, "failed to admit settled snapshot to history");
        }
    });

    if let RoundOutcome::Settled(record) = &outcome {
        info!(id = %id, round, status = ?record.status, "notification settled");
    }
    outcome
}

fn worker_loop(name: &str, pipeline: &ChannelPipeline, rx: &Mutex<mpsc::Receiver<RoutedEvent>>) {
    debug!(worker = name, "pipeline worker started");

    loop {
        // Hold the queue lock only while waiting, never while delivering.
        let next = rx.lock().unwrap_or_else(PoisonError::into_inner).recv();
        match next {
            Ok(routed) => {
                pipeline.process(routed);
            }
            Err(mpsc::RecvError) => break,
        }
    }

    debug!(worker = name, "pipeline worker stopped");
}

/// Handle to join a pipeline's workers.
#[derive(Debug)]
pub struct PipelineHandle {
    channel: Channel,
    joins: Vec<thread::JoinHandle<()>>,
    stats: Arc<Mutex<PipelineStats>>,
}

impl PipelineHandle {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Wait for the workers to drain the queue and exit.
    ///
    /// Returns once every [`PipelineSender`] has been dropped.
    pub fn join(self) -> PipelineStats {
        for join in self.joins {
            if join.join().is_err() {
                error!(channel = %self.channel, "pipeline worker panicked");
            }
        }
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
