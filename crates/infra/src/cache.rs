//! Latest-known state of every notification, keyed by id.
//!
//! Besides the record itself, each entry tracks its current *delivery round*:
//! every admission through ingress opens a new round listing the channels the
//! event was routed to. Pipelines report per-channel outcomes tagged with the
//! round they were working on; the report that closes the round settles the
//! status (`SENT` when every channel delivered, `FAILED` otherwise). Reports
//! for an older round are ignored.
//!
//! Mutating methods that take an `on_commit` callback run it while the map is
//! still write-locked, so whatever the callback publishes is ordered exactly
//! like the commits themselves.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use notifyhub_core::{Channel, DeliveryResult, NotificationEvent, NotificationId, NotificationStatus};

/// What a per-channel report did to its entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Recorded; other channels of the round are still outstanding.
    Open { outstanding: usize },
    /// This report closed the round. Carries the committed record.
    Settled(NotificationEvent),
    /// The entry has moved on to a newer round; the report was ignored.
    Stale { current: u64 },
    /// The channel was not outstanding in this round (duplicate report).
    Unexpected,
    /// No entry exists for the id.
    Missing,
}

#[derive(Debug)]
struct CacheEntry {
    record: NotificationEvent,
    round: u64,
    outstanding: BTreeSet<Channel>,
    failures: Vec<Channel>,
}

#[derive(Debug, Default)]
pub struct StatusCache {
    entries: RwLock<HashMap<NotificationId, CacheEntry>>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<NotificationId, CacheEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<NotificationId, CacheEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: &NotificationId) -> Option<NotificationEvent> {
        self.read().get(id).map(|entry| entry.record.clone())
    }

    /// Insert or overwrite the record for `id`, opening a round with no
    /// outstanding channels. Returns the new round number.
    pub fn put(&self, id: NotificationId, record: NotificationEvent) -> u64 {
        self.admit(id, record, &[], |_| {})
    }

    /// Insert or overwrite the record for `id` and open a round expecting one
    /// report from each of `channels`. `on_commit` sees the stored record
    /// before the lock is released.
    pub fn admit<F>(
        &self,
        id: NotificationId,
        mut record: NotificationEvent,
        channels: &[Channel],
        on_commit: F,
    ) -> u64
    where
        F: FnOnce(&NotificationEvent),
    {
        record.id = Some(id.clone());

        let mut entries = self.write();
        let round = entries.get(&id).map_or(1, |previous| previous.round + 1);
        let entry = CacheEntry {
            record,
            round,
            outstanding: channels.iter().copied().collect(),
            failures: Vec::new(),
        };

        on_commit(&entry.record);
        entries.insert(id, entry);
        round
    }

    /// Overwrite the status of an existing entry.
    ///
    /// Unknown ids are a logged no-op; this never creates an entry.
    pub fn update_status(
        &self,
        id: &NotificationId,
        status: NotificationStatus,
    ) -> Option<NotificationEvent> {
        let mut entries = self.write();
        match entries.get_mut(id) {
            Some(entry) => {
                entry.record.status = status;
                Some(entry.record.clone())
            }
            None => {
                warn!(id = %id, status = ?status, "status update for unknown notification ignored");
                None
            }
        }
    }

    /// Record one channel's final outcome for `round`.
    ///
    /// When this closes the round, the status is set and `on_settled` runs with
    /// the committed record while the entry is still locked.
    pub fn record_outcome<F>(
        &self,
        id: &NotificationId,
        round: u64,
        channel: Channel,
        outcome: &DeliveryResult,
        on_settled: F,
    ) -> RoundOutcome
    where
        F: FnOnce(&NotificationEvent),
    {
        let mut entries = self.write();
        let Some(entry) = entries.get_mut(id) else {
            warn!(id = %id, channel = %channel, "delivery outcome for unknown notification ignored");
            return RoundOutcome::Missing;
        };

        if entry.round != round {
            debug!(
                id = %id,
                channel = %channel,
                reported = round,
                current = entry.round,
                "stale delivery outcome ignored"
            );
            return RoundOutcome::Stale {
                current: entry.round,
            };
        }

        if !entry.outstanding.remove(&channel) {
            warn!(id = %id, channel = %channel, round, "unexpected delivery outcome ignored");
            return RoundOutcome::Unexpected;
        }

        if outcome.is_err() {
            entry.failures.push(channel);
        }

        if !entry.outstanding.is_empty() {
            return RoundOutcome::Open {
                outstanding: entry.outstanding.len(),
            };
        }

        entry.record.status = if entry.failures.is_empty() {
            NotificationStatus::Sent
        } else {
            NotificationStatus::Failed
        };

        on_settled(&entry.record);
        RoundOutcome::Settled(entry.record.clone())
    }

    /// Channels that gave up during the entry's current round.
    pub fn failed_channels(&self, id: &NotificationId) -> Vec<Channel> {
        self.read()
            .get(id)
            .map(|entry| entry.failures.clone())
            .unwrap_or_default()
    }

    /// All records matching `predicate`, oldest timestamp first.
    pub fn values_where<P>(&self, predicate: P) -> Vec<NotificationEvent>
    where
        P: Fn(&NotificationEvent) -> bool,
    {
        let mut matches: Vec<NotificationEvent> = self
            .read()
            .values()
            .map(|entry| &entry.record)
            .filter(|record| predicate(record))
            .cloned()
            .collect();

        sort_oldest_first(&mut matches);
        matches
    }

    /// Flip every `FAILED` entry back to `PENDING` and return the flipped
    /// records, oldest timestamp first.
    ///
    /// The scan and the flip happen under one write lock, so concurrent
    /// callers never claim the same entry twice.
    pub fn reset_failed(&self) -> Vec<NotificationEvent> {
        let mut reset: Vec<NotificationEvent> = self
            .write()
            .values_mut()
            .filter(|entry| entry.record.status == NotificationStatus::Failed)
            .map(|entry| {
                entry.record.status = NotificationStatus::Pending;
                entry.record.clone()
            })
            .collect();

        sort_oldest_first(&mut reset);
        reset
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Block every writer until the returned guard is dropped.
    #[cfg(test)]
    pub(crate) fn hold_writes(&self) -> impl Sized + '_ {
        self.write()
    }
}

fn sort_oldest_first(records: &mut [NotificationEvent]) {
    records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
}
