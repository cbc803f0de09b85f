//! The notification system façade (event ingress).
//!
//! ## Flow
//!
//! ```text
//! publish() ──► ingress queue ──► ingress worker
//!                                   ├─ StatusCache::admit   (record + open round)
//!                                   │    └─ HistoryBuffer::publish (PENDING snapshot)
//!                                   └─ PriorityRouter::dispatch
//!                                        ├─► chat pipeline  ─┐
//!                                        ├─► email pipeline ─┼─► StatusCache::record_outcome
//!                                        └─► phone pipeline ─┘     └─ HistoryBuffer::publish (settled)
//! ```
//!
//! `publish` only stamps the event and enqueues it, so producers never wait on
//! routing or delivery. The cache entry appears once the ingress worker has
//! admitted the event.

use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;

use tracing::{debug, error, info, warn};

use notifyhub_core::{
    Channel, DeliveryError, NotificationEvent, NotificationId, NotificationStatus,
};
use notifyhub_events::{EventBus, HistoryBuffer, Subscription};

use crate::cache::StatusCache;
use crate::config::{NotificationConfig, OverflowPolicy};
use crate::delivery::DeliveryChannels;
use crate::error::SetupError;
use crate::pipeline::{ChannelPipeline, PipelineHandle, PipelineStats, RoutedEvent, commit_outcome};
use crate::router::PriorityRouter;

/// Ingress counters.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IngressStats {
    /// Calls to `publish` (including retries).
    pub published: u64,
    /// Events discarded by the overflow policy or because ingress was gone.
    pub dropped: u64,
    /// Events recorded in the cache and history by the ingress worker.
    pub admitted: u64,
    /// Admitted events whose priority selected no channel.
    pub unroutable: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SystemStats {
    pub ingress: IngressStats,
    pub pipelines: Vec<PipelineStats>,
}

#[derive(Debug)]
enum IngestSender {
    Unbounded(mpsc::Sender<NotificationEvent>),
    Bounded(mpsc::SyncSender<NotificationEvent>),
}

/// The notification fan-out engine.
///
/// Safe to share across threads (`Arc<NotificationSystem>`); every method
/// takes `&self` except [`NotificationSystem::shutdown`].
#[derive(Debug)]
pub struct NotificationSystem {
    cache: Arc<StatusCache>,
    history: Arc<HistoryBuffer<NotificationEvent>>,
    ingest: IngestSender,
    ingest_worker: thread::JoinHandle<()>,
    pipelines: Vec<PipelineHandle>,
    stats: Arc<Mutex<IngressStats>>,
}

impl NotificationSystem {
    /// Validate `config`, spawn one pipeline per channel and the ingress worker.
    pub fn new(config: NotificationConfig, channels: DeliveryChannels) -> Result<Self, SetupError> {
        config.validate()?;

        let cache = Arc::new(StatusCache::new());
        let history = Arc::new(HistoryBuffer::with_capacity(config.history_capacity)?);

        let mut senders = Vec::with_capacity(Channel::ALL.len());
        let mut pipelines = Vec::with_capacity(Channel::ALL.len());
        for channel in Channel::ALL {
            let pipeline = ChannelPipeline::new(
                channel,
                channels.get(channel),
                config.retry.for_channel(channel).clone(),
                cache.clone(),
                history.clone(),
            );
            let (sender, handle) = pipeline.spawn(config.workers_per_channel)?;
            senders.push(sender);
            pipelines.push(handle);
        }
        let router = PriorityRouter::new(senders);

        let stats = Arc::new(Mutex::new(IngressStats::default()));
        let worker = IngestWorker {
            cache: cache.clone(),
            history: history.clone(),
            router,
            stats: stats.clone(),
        };

        let (ingest, ingest_worker) = match config.overflow {
            OverflowPolicy::Buffer => {
                let (tx, rx) = mpsc::channel();
                (IngestSender::Unbounded(tx), worker.spawn(rx)?)
            }
            OverflowPolicy::DropNewest { capacity } => {
                let (tx, rx) = mpsc::sync_channel(capacity);
                (IngestSender::Bounded(tx), worker.spawn(rx)?)
            }
        };

        info!(
            history_capacity = config.history_capacity,
            workers_per_channel = config.workers_per_channel,
            overflow = ?config.overflow,
            "notification system started"
        );

        Ok(Self {
            cache,
            history,
            ingest,
            ingest_worker,
            pipelines,
            stats,
        })
    }

    /// Accept an event for delivery and return its id.
    ///
    /// A missing id is minted here; a supplied one is kept. The status is
    /// reset to `PENDING`. Never blocks on routing or delivery and never
    /// fails: an event the overflow policy rejects is logged and counted.
    pub fn publish(&self, mut event: NotificationEvent) -> NotificationId {
        let id = event.ensure_id();
        event.status = NotificationStatus::Pending;

        let accepted = match &self.ingest {
            IngestSender::Unbounded(tx) => match tx.send(event) {
                Ok(()) => true,
                Err(_) => {
                    error!(id = %id, "ingress worker is gone; notification discarded");
                    false
                }
            },
            IngestSender::Bounded(tx) => match tx.try_send(event) {
                Ok(()) => true,
                Err(mpsc::TrySendError::Full(_)) => {
                    warn!(id = %id, "ingress buffer full; notification dropped");
                    false
                }
                Err(mpsc::TrySendError::Disconnected(_)) => {
                    error!(id = %id, "ingress worker is gone; notification discarded");
                    false
                }
            },
        };

        let mut stats = self.lock_stats();
        stats.published += 1;
        if !accepted {
            stats.dropped += 1;
        }
        id
    }

    /// Latest cached record for `id`, if it has been admitted.
    pub fn get_by_id(&self, id: &NotificationId) -> Option<NotificationEvent> {
        self.cache.get(id)
    }

    /// Live history: the retained snapshots, then every later admission.
    ///
    /// Drop the subscription to unsubscribe.
    pub fn history(&self) -> Subscription<NotificationEvent> {
        self.history.subscribe()
    }

    /// The retained snapshots, oldest first.
    pub fn history_snapshot(&self) -> Vec<NotificationEvent> {
        self.history.snapshot()
    }

    /// Re-publish every `FAILED` entry under its existing id.
    ///
    /// The entries read `PENDING` as soon as this returns, so a repeated or
    /// concurrent call does not re-send them.
    pub fn retry_failed(&self) -> Vec<NotificationId> {
        let failed = self.cache.reset_failed();

        if failed.is_empty() {
            debug!("no failed notifications to retry");
            return Vec::new();
        }

        info!(count = failed.len(), "retrying failed notifications");
        failed.into_iter().map(|event| self.publish(event)).collect()
    }

    /// Channels that failed during the current delivery round of `id`.
    pub fn failed_channels(&self, id: &NotificationId) -> Vec<Channel> {
        self.cache.failed_channels(id)
    }

    pub fn stats(&self) -> SystemStats {
        SystemStats {
            ingress: self.lock_stats().clone(),
            pipelines: self.pipelines.iter().map(PipelineHandle::stats).collect(),
        }
    }

    /// Stop accepting events, let ingress and every pipeline drain, and join
    /// all worker threads.
    pub fn shutdown(self) -> SystemStats {
        let Self {
            ingest,
            ingest_worker,
            pipelines,
            stats,
            ..
        } = self;

        // Dropping the sender ends the ingress loop, which drops the router and
        // with it every pipeline sender.
        drop(ingest);
        if ingest_worker.join().is_err() {
            error!("ingress worker panicked");
        }

        let pipelines = pipelines.into_iter().map(PipelineHandle::join).collect();
        let ingress = stats.lock().unwrap_or_else(PoisonError::into_inner).clone();

        info!("notification system stopped");
        SystemStats { ingress, pipelines }
    }

    #[cfg(test)]
    pub(crate) fn status_cache(&self) -> &StatusCache {
        &self.cache
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, IngressStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// State owned by the ingress thread.
struct IngestWorker {
    cache: Arc<StatusCache>,
    history: Arc<HistoryBuffer<NotificationEvent>>,
    router: PriorityRouter,
    stats: Arc<Mutex<IngressStats>>,
}

impl IngestWorker {
    fn spawn(self, rx: mpsc::Receiver<NotificationEvent>) -> Result<thread::JoinHandle<()>, SetupError> {
        let name = "notifyhub-ingress".to_string();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run(rx))
            .map_err(|source| SetupError::Spawn { name, source })
    }

    fn run(self, rx: mpsc::Receiver<NotificationEvent>) {
        debug!("ingress worker started");
        for event in rx {
            self.admit(event);
        }
        debug!("ingress worker stopped");
    }

    fn admit(&self, mut event: NotificationEvent) {
        let id = event.ensure_id();
        let channels = PriorityRouter::select(event.priority);

        info!(
            id = %id,
            source = %event.source,
            priority = %event.priority,
            "processing notification"
        );

        let history = &self.history;
        let round = self.cache.admit(id.clone(), event.clone(), channels, |snapshot| {
            if let Err(err) = history.publish(snapshot.clone()) {
                error!(id = %id, error = %err, "failed to admit snapshot to history");
            }
        });

        {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            stats.admitted += 1;
            if channels.is_empty() {
                stats.unroutable += 1;
            }
        }

        let routed = RoutedEvent { id, round, event };

        // A channel that cannot take the event still has to report, or the
        // round would never settle.
        for channel in self.router.dispatch(&routed, channels) {
            let unavailable = Err(DeliveryError::aborted(channel, "pipeline unavailable"));
            commit_outcome(
                &self.cache,
                &self.history,
                &routed.id,
                routed.round,
                channel,
                &unavailable,
            );
        }
    }
}
