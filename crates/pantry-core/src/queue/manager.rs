//! Offline queue manager
//!
//! Owns every mutation record: enqueue validation and coalescing, the
//! prioritized drain loop, retry bookkeeping and eviction. All store access
//! goes through one async mutex, which is never held across a network send.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::backoff::Backoff;
use super::report::{DrainReport, DrainResult};
use super::store::{QueueStore, StatusChange};
use crate::config::QueueConfig;
use crate::error::{DrainError, QueueError, StorageError};
use crate::models::{
    ConflictId, MutationId, MutationKind, MutationRecord, MutationStatus, NewMutation,
    RecordSnapshot, ResolutionStrategy, MANUAL_CONFLICT_ERROR,
};
use crate::remote::{RemoteError, RemoteSender};
use crate::util::{compact_text, now_ms};

const REPEATED_CONFLICT: &str = "remote changed again while reconciling";

/// How a conflict reported by the remote was settled
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// Local and remote already agree
    Converged,
    /// Merged automatically; `corrective` carries what the remote still lacks
    AutoResolved {
        strategy: ResolutionStrategy,
        corrective: Option<NewMutation>,
    },
    /// Escalated; the mutation must wait for a manual decision
    Manual { conflict_id: ConflictId },
}

/// Receives conflicts surfaced while draining.
#[allow(async_fn_in_trait)]
pub trait ConflictHandler {
    async fn reconcile(
        &self,
        mutation: &MutationRecord,
        remote: &RecordSnapshot,
    ) -> Result<Reconciliation, DrainError>;
}

/// Result of a successful enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Stored as a new record; `superseded` queued edits were cancelled by it
    Appended { id: MutationId, superseded: usize },
    /// Folded into an existing pending record
    Coalesced { id: MutationId },
}

impl EnqueueOutcome {
    pub const fn id(self) -> MutationId {
        match self {
            Self::Appended { id, .. } | Self::Coalesced { id } => id,
        }
    }
}

/// Read-only snapshot of queue counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending_count: usize,
    /// Failed records still eligible for retry
    pub failed_count: usize,
    pub in_flight_count: usize,
    pub resolved_count: usize,
    /// Failed beyond the retry cap
    pub exhausted_count: usize,
    /// Held for a manual conflict decision
    pub awaiting_resolution: usize,
}

impl QueueStatus {
    /// Records that still represent unsynced local intent
    pub const fn outstanding(&self) -> usize {
        self.pending_count
            + self.failed_count
            + self.in_flight_count
            + self.exhausted_count
            + self.awaiting_resolution
    }
}

/// The offline mutation queue
pub struct QueueManager<S> {
    store: Mutex<S>,
    config: QueueConfig,
    backoff: Backoff,
    stop: Arc<AtomicBool>,
}

impl<S: QueueStore> QueueManager<S> {
    /// Wrap a store, returning records left `InFlight` by an interrupted drain to `Pending`.
    pub fn open(mut store: S, config: QueueConfig) -> Result<Self, StorageError> {
        let mut recovered = 0;
        for record in store.load_all()? {
            if record.status == MutationStatus::InFlight {
                store.update(
                    &record.id,
                    &StatusChange {
                        status: MutationStatus::Pending,
                        retry_count: record.retry_count,
                        last_error: None,
                        next_attempt_at: None,
                    },
                )?;
                recovered += 1;
            }
        }
        if recovered > 0 {
            tracing::info!(recovered, "Returned interrupted mutations to the queue");
        }

        Ok(Self {
            store: Mutex::new(store),
            backoff: Backoff::from_config(&config),
            config,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Validate and persist a mutation before returning.
    pub async fn enqueue(&self, mutation: NewMutation) -> Result<EnqueueOutcome, QueueError> {
        let (outcome, _) = self.enqueue_change(mutation).await?;
        Ok(outcome)
    }

    /// Like [`Self::enqueue`], also returning the change as it was queued.
    ///
    /// When the mutation was coalesced the returned record is the pending one
    /// it joined, carrying only the incoming payload.
    pub async fn enqueue_change(
        &self,
        mutation: NewMutation,
    ) -> Result<(EnqueueOutcome, MutationRecord), QueueError> {
        let mutation = validate(mutation)?;
        let mut store = self.store.lock().await;
        let records = store.load_all()?;

        if let Some(mut existing) = coalescing_target(&records, &mutation) {
            let mut change = existing.clone();
            change.payload.clone_from(&mutation.payload);
            for (field, value) in mutation.payload {
                existing.payload.insert(field, value);
            }
            store.replace(&existing)?;
            tracing::debug!(
                mutation_id = %existing.id,
                target_id = %existing.target_id,
                "Coalesced mutation into pending record"
            );
            return Ok((EnqueueOutcome::Coalesced { id: existing.id }, change));
        }

        let record = MutationRecord::from_new(mutation, now_ms());
        let doomed: Vec<MutationId> = if record.kind == MutationKind::Delete {
            records
                .iter()
                .filter(|r| r.target_id == record.target_id && is_superseded_by_delete(r))
                .map(|r| r.id)
                .collect()
        } else {
            Vec::new()
        };

        let live = records
            .iter()
            .filter(|r| r.status != MutationStatus::Resolved)
            .count();
        if records.len() >= self.config.soft_cap {
            let excess = records.len() + 1 - self.config.soft_cap;
            let evicted = self.evict(&mut *store, &records, Some(excess))?;
            if evicted < excess {
                tracing::warn!(
                    queued = live,
                    soft_cap = self.config.soft_cap,
                    "Queue above soft cap with nothing left to evict"
                );
            }
        }

        // Superseded edits go in the same write as the delete that cancels them
        let superseded = match store.append_and_remove(&record, &doomed) {
            Ok(superseded) => superseded,
            Err(StorageError::QuotaExceeded) => {
                let evicted = self.evict(&mut *store, &records, None)?;
                if evicted == 0 {
                    return Err(StorageError::QuotaExceeded.into());
                }
                tracing::warn!(evicted, "Storage quota hit, evicted records and retrying");
                store.append_and_remove(&record, &doomed)?
            }
            Err(error) => return Err(error.into()),
        };

        tracing::debug!(
            mutation_id = %record.id,
            target_id = %record.target_id,
            kind = %record.kind,
            superseded,
            "Enqueued mutation"
        );
        Ok((
            EnqueueOutcome::Appended {
                id: record.id,
                superseded,
            },
            record,
        ))
    }

    /// Remove reclaimable records oldest first: resolved ones, then exhausted ones.
    fn evict(
        &self,
        store: &mut S,
        records: &[MutationRecord],
        limit: Option<usize>,
    ) -> Result<usize, StorageError> {
        let mut candidates: Vec<&MutationRecord> = records
            .iter()
            .filter(|r| {
                r.status == MutationStatus::Resolved
                    || (r.status == MutationStatus::Failed
                        && r.is_exhausted(self.config.max_retries))
            })
            .collect();
        candidates.sort_by_key(|r| (r.status != MutationStatus::Resolved, r.created_at, r.id));
        let ids: Vec<MutationId> = candidates
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|r| r.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let evicted = store.remove_many(&ids)?;
        tracing::info!(evicted, "Evicted reclaimable mutations");
        Ok(evicted)
    }

    /// Send every drainable mutation in priority order.
    ///
    /// Per-record failures are reported in the returned [`DrainReport`];
    /// only fatal conditions abort the cycle with an error.
    pub async fn drain<R, H>(&self, sender: &R, handler: &H) -> Result<DrainReport, DrainError>
    where
        R: RemoteSender,
        H: ConflictHandler,
    {
        let started_at = now_ms();
        let (plan, mut blocked) = {
            let store = self.store.lock().await;
            let (drainable, waiting): (Vec<_>, Vec<_>) = store
                .load_all()?
                .into_iter()
                .partition(|r| self.is_drainable(r, started_at));
            // Later edits of a target wait behind a failed one still in backoff or held
            let blocked: HashSet<String> = waiting
                .into_iter()
                .filter(|r| {
                    r.status == MutationStatus::Failed && !r.is_exhausted(self.config.max_retries)
                })
                .map(|r| r.target_id)
                .collect();
            (plan(drainable), blocked)
        };

        let mut work: VecDeque<MutationId> = plan.iter().map(|r| r.id).collect();
        // Correctives queued by this drain; each gets one attempt per cycle
        let mut correctives: HashSet<MutationId> = HashSet::new();
        let mut report = DrainReport::default();

        tracing::debug!(queued = work.len(), "Draining mutation queue");

        while let Some(id) = work.pop_front() {
            if self.stop.load(Ordering::SeqCst) {
                tracing::info!(remaining = work.len() + 1, "Drain stopped on request");
                report.stopped = true;
                break;
            }

            let Some(mut record) = self.claim(&id, started_at, &blocked, &mut report).await? else {
                continue;
            };

            let sent = sender.send(&record).await;
            let now = now_ms();

            match sent {
                Ok(ack) => {
                    self.store.lock().await.remove(&record.id)?;
                    report.observe_version(ack.version);
                    report.push(record.id, &record.target_id, record.kind, DrainResult::Sent);
                    tracing::debug!(mutation_id = %record.id, target_id = %record.target_id, "Mutation sent");
                }
                Err(RemoteError::Conflict(remote)) if correctives.contains(&record.id) => {
                    report.observe_version(Some(remote.version));
                    tracing::warn!(
                        mutation_id = %record.id,
                        target_id = %record.target_id,
                        remote_version = remote.version,
                        "Corrective mutation conflicted again"
                    );
                    let result = self
                        .fail_attempt(&mut record, REPEATED_CONFLICT.to_string(), now, &mut blocked)
                        .await?;
                    report.push(record.id, &record.target_id, record.kind, result);
                }
                Err(RemoteError::Conflict(remote)) => {
                    report.observe_version(Some(remote.version));
                    let reconciliation = match handler.reconcile(&record, &remote).await {
                        Ok(reconciliation) => reconciliation,
                        Err(error) => {
                            self.release(&record).await?;
                            return Err(error);
                        }
                    };
                    if let Some(follow_up) = self
                        .settle_conflict(&mut record, reconciliation, &mut work, &mut blocked, &mut report)
                        .await?
                    {
                        correctives.insert(follow_up);
                    }
                }
                Err(RemoteError::Transient(reason)) => {
                    let result = self.fail_attempt(&mut record, reason, now, &mut blocked).await?;
                    report.push(record.id, &record.target_id, record.kind, result);
                }
                Err(RemoteError::Rejected { status, reason }) => {
                    self.store.lock().await.remove(&record.id)?;
                    tracing::warn!(
                        mutation_id = %record.id,
                        target_id = %record.target_id,
                        status,
                        %reason,
                        "Mutation rejected by remote, dropped"
                    );
                    report.push(
                        record.id,
                        &record.target_id,
                        record.kind,
                        DrainResult::Dropped { status, reason },
                    );
                }
                Err(RemoteError::Unauthorized(reason)) => {
                    self.release(&record).await?;
                    tracing::warn!(%reason, "Remote refused credentials, aborting drain");
                    return Err(DrainError::Unauthorized(reason));
                }
            }
        }

        Ok(report)
    }

    /// Count a failed attempt: back off, or give up once retries are exhausted.
    async fn fail_attempt(
        &self,
        record: &mut MutationRecord,
        reason: String,
        now: i64,
        blocked: &mut HashSet<String>,
    ) -> Result<DrainResult, StorageError> {
        record.retry_count = record.retry_count.saturating_add(1);
        record.status = MutationStatus::Failed;
        record.last_error = Some(compact_text(&reason));
        let exhausted = record.is_exhausted(self.config.max_retries);
        let delay = self.backoff.delay(record.retry_count);
        record.next_attempt_at = if exhausted {
            None
        } else {
            Some(now + i64::try_from(delay.as_millis()).unwrap_or(i64::MAX))
        };
        self.store
            .lock()
            .await
            .update(&record.id, &StatusChange::of(record))?;
        blocked.insert(record.target_id.clone());

        if exhausted {
            tracing::warn!(
                mutation_id = %record.id,
                target_id = %record.target_id,
                retry_count = record.retry_count,
                %reason,
                "Mutation permanently failed"
            );
            Ok(DrainResult::PermanentlyFailed {
                retry_count: record.retry_count,
                reason,
            })
        } else {
            tracing::warn!(
                mutation_id = %record.id,
                retry_count = record.retry_count,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                %reason,
                "Send failed, will retry"
            );
            Ok(DrainResult::Retrying {
                retry_count: record.retry_count,
                next_attempt_in: delay,
            })
        }
    }

    /// Re-read a planned record and mark it `InFlight`, or report why it is skipped.
    async fn claim(
        &self,
        id: &MutationId,
        started_at: i64,
        blocked: &HashSet<String>,
        report: &mut DrainReport,
    ) -> Result<Option<MutationRecord>, DrainError> {
        let mut store = self.store.lock().await;
        let Some(mut record) = store.get(id)? else {
            return Ok(None);
        };
        if !self.is_drainable(&record, started_at) {
            return Ok(None);
        }
        if blocked.contains(&record.target_id) {
            report.push(record.id, &record.target_id, record.kind, DrainResult::Deferred);
            return Ok(None);
        }

        record.status = MutationStatus::InFlight;
        record.last_error = None;
        record.next_attempt_at = None;
        store.update(&record.id, &StatusChange::of(&record))?;
        Ok(Some(record))
    }

    /// Return an in-flight record to `Pending` without counting a retry.
    async fn release(&self, record: &MutationRecord) -> Result<(), StorageError> {
        self.store.lock().await.update(
            &record.id,
            &StatusChange {
                status: MutationStatus::Pending,
                retry_count: record.retry_count,
                last_error: None,
                next_attempt_at: None,
            },
        )
    }

    async fn settle_conflict(
        &self,
        record: &mut MutationRecord,
        reconciliation: Reconciliation,
        work: &mut VecDeque<MutationId>,
        blocked: &mut HashSet<String>,
        report: &mut DrainReport,
    ) -> Result<Option<MutationId>, DrainError> {
        let mut store = self.store.lock().await;
        let mut queued = None;
        let result = match reconciliation {
            Reconciliation::Converged => {
                store.remove(&record.id)?;
                DrainResult::Converged
            }
            Reconciliation::AutoResolved {
                strategy,
                corrective,
            } => {
                record.status = MutationStatus::Resolved;
                store.update(&record.id, &StatusChange::of(record))?;
                let corrective = match corrective {
                    Some(mutation) => {
                        let follow_up = corrective_record(record, mutation);
                        store.append(&follow_up)?;
                        // Sent next so later edits of the target keep their order
                        work.push_front(follow_up.id);
                        queued = Some(follow_up.id);
                        queued
                    }
                    None => None,
                };
                tracing::info!(
                    mutation_id = %record.id,
                    target_id = %record.target_id,
                    %strategy,
                    corrective = corrective.is_some(),
                    "Conflict resolved automatically"
                );
                DrainResult::AutoResolved {
                    strategy,
                    corrective,
                }
            }
            Reconciliation::Manual { conflict_id } => {
                record.status = MutationStatus::Failed;
                record.last_error = Some(MANUAL_CONFLICT_ERROR.to_string());
                store.update(&record.id, &StatusChange::of(record))?;
                blocked.insert(record.target_id.clone());
                tracing::info!(
                    mutation_id = %record.id,
                    target_id = %record.target_id,
                    %conflict_id,
                    "Mutation held for manual conflict resolution"
                );
                DrainResult::HeldForManual { conflict_id }
            }
        };
        report.push(record.id, &record.target_id, record.kind, result);
        Ok(queued)
    }

    /// Settle a mutation held for manual resolution: mark it `Resolved` and
    /// queue the change the remote still lacks.
    pub async fn resolve_held(
        &self,
        id: &MutationId,
        corrective: Option<NewMutation>,
    ) -> Result<Option<MutationId>, QueueError> {
        let mut store = self.store.lock().await;
        let held = store.get(id)?;
        if let Some(record) = &held {
            let mut resolved = record.clone();
            resolved.status = MutationStatus::Resolved;
            resolved.last_error = None;
            resolved.next_attempt_at = None;
            store.update(&resolved.id, &StatusChange::of(&resolved))?;
        }

        let Some(corrective) = corrective else {
            return Ok(None);
        };
        let follow_up = match &held {
            Some(record) => corrective_record(record, corrective),
            None => MutationRecord::from_new(corrective, now_ms()),
        };
        store.append(&follow_up)?;
        Ok(Some(follow_up.id))
    }

    /// Reset retryable failed records to `Pending`, ignoring backoff timers.
    ///
    /// Exhausted records and records held for manual resolution are left alone.
    pub async fn retry_failed(&self) -> Result<usize, QueueError> {
        let mut store = self.store.lock().await;
        let mut reset = 0;
        for record in store.load_all()? {
            if record.status == MutationStatus::Failed
                && !record.awaits_manual_resolution()
                && !record.is_exhausted(self.config.max_retries)
            {
                store.update(
                    &record.id,
                    &StatusChange {
                        status: MutationStatus::Pending,
                        retry_count: record.retry_count,
                        last_error: None,
                        next_attempt_at: None,
                    },
                )?;
                reset += 1;
            }
        }
        if reset > 0 {
            tracing::info!(reset, "Failed mutations returned to the queue");
        }
        Ok(reset)
    }

    pub async fn status(&self) -> Result<QueueStatus, QueueError> {
        let store = self.store.lock().await;
        let mut status = QueueStatus::default();
        for record in store.load_all()? {
            match record.status {
                MutationStatus::Pending => status.pending_count += 1,
                MutationStatus::InFlight => status.in_flight_count += 1,
                MutationStatus::Resolved => status.resolved_count += 1,
                MutationStatus::Failed if record.awaits_manual_resolution() => {
                    status.awaiting_resolution += 1;
                }
                MutationStatus::Failed if record.is_exhausted(self.config.max_retries) => {
                    status.exhausted_count += 1;
                }
                MutationStatus::Failed => status.failed_count += 1,
            }
        }
        Ok(status)
    }

    /// Every record in enqueue order.
    pub async fn records(&self) -> Result<Vec<MutationRecord>, QueueError> {
        Ok(self.store.lock().await.load_all()?)
    }

    pub async fn get(&self, id: &MutationId) -> Result<Option<MutationRecord>, QueueError> {
        Ok(self.store.lock().await.get(id)?)
    }

    /// Permanently failed records, oldest first.
    pub async fn exhausted(&self) -> Result<Vec<MutationRecord>, QueueError> {
        let records = self.store.lock().await.load_all()?;
        Ok(records
            .into_iter()
            .filter(|r| {
                r.status == MutationStatus::Failed && r.is_exhausted(self.config.max_retries)
            })
            .collect())
    }

    /// Remove a permanently failed record.
    pub async fn discard(&self, id: &MutationId) -> Result<MutationRecord, QueueError> {
        let mut store = self.store.lock().await;
        let record = store.get(id)?.ok_or(StorageError::NotFound(*id))?;
        if record.status != MutationStatus::Failed || !record.is_exhausted(self.config.max_retries) {
            return Err(QueueError::NotExhausted(*id));
        }
        store.remove(id)?;
        tracing::info!(mutation_id = %id, target_id = %record.target_id, "Discarded failed mutation");
        Ok(record)
    }

    /// Drop every `Resolved` record.
    pub async fn sweep_resolved(&self) -> Result<usize, QueueError> {
        let mut store = self.store.lock().await;
        let resolved: Vec<MutationId> = store
            .load_all()?
            .into_iter()
            .filter(|r| r.status == MutationStatus::Resolved)
            .map(|r| r.id)
            .collect();
        if resolved.is_empty() {
            return Ok(0);
        }
        Ok(store.remove_many(&resolved)?)
    }

    /// Whether any unsynced local intent remains for `target_id`.
    pub async fn has_outstanding(&self, target_id: &str) -> Result<bool, QueueError> {
        let records = self.store.lock().await.load_all()?;
        Ok(records
            .iter()
            .any(|r| r.target_id == target_id && r.status != MutationStatus::Resolved))
    }

    /// Flag checked before each mutation of a drain; stays set until [`Self::resume`].
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn is_drainable(&self, record: &MutationRecord, now: i64) -> bool {
        match record.status {
            MutationStatus::Pending => true,
            MutationStatus::Failed => {
                !record.awaits_manual_resolution()
                    && !record.is_exhausted(self.config.max_retries)
                    && record.next_attempt_at.map_or(true, |at| at <= now)
            }
            MutationStatus::InFlight | MutationStatus::Resolved => false,
        }
    }
}

fn validate(mut mutation: NewMutation) -> Result<NewMutation, QueueError> {
    let target_id = mutation.target_id.trim();
    if target_id.is_empty() {
        return Err(QueueError::Malformed("target id is required".to_string()));
    }
    mutation.target_id = target_id.to_string();

    if mutation.payload.keys().any(|field| field.trim().is_empty()) {
        return Err(QueueError::Malformed("payload field names must not be empty".to_string()));
    }

    match mutation.kind {
        MutationKind::Update if mutation.payload.is_empty() => Err(QueueError::Malformed(
            "update requires at least one field".to_string(),
        )),
        MutationKind::SetFlag => {
            let mut fields = mutation.payload.values();
            match (fields.next(), fields.next()) {
                (Some(serde_json::Value::Bool(_)), None) => Ok(mutation),
                _ => Err(QueueError::Malformed(
                    "set_flag requires exactly one boolean field".to_string(),
                )),
            }
        }
        MutationKind::Delete => {
            mutation.payload.clear();
            Ok(mutation)
        }
        MutationKind::Create | MutationKind::Update => Ok(mutation),
    }
}

/// The newest live record of the target, when the new mutation can be folded into it.
fn coalescing_target(records: &[MutationRecord], mutation: &NewMutation) -> Option<MutationRecord> {
    if mutation.kind == MutationKind::Create {
        return None;
    }
    let latest = records
        .iter()
        .filter(|r| r.target_id == mutation.target_id && r.status != MutationStatus::Resolved)
        .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))?;

    let same_shape = match mutation.kind {
        MutationKind::Update => latest.kind == MutationKind::Update,
        MutationKind::SetFlag => {
            latest.kind == MutationKind::SetFlag
                && latest.payload.keys().eq(mutation.payload.keys())
        }
        MutationKind::Delete => latest.kind == MutationKind::Delete,
        MutationKind::Create => false,
    };
    (same_shape && latest.status == MutationStatus::Pending).then(|| latest.clone())
}

fn is_superseded_by_delete(record: &MutationRecord) -> bool {
    record.kind != MutationKind::Delete
        && match record.status {
            MutationStatus::Pending => true,
            MutationStatus::Failed => !record.awaits_manual_resolution(),
            MutationStatus::InFlight | MutationStatus::Resolved => false,
        }
}

/// Follow-up mutation that keeps the enqueue slot and retry count of the record it corrects.
fn corrective_record(original: &MutationRecord, mutation: NewMutation) -> MutationRecord {
    let mut record = MutationRecord::from_new(mutation, original.created_at);
    record.retry_count = original.retry_count;
    record
}

/// Order records by priority, keeping each target's records in enqueue order.
fn plan(mut records: Vec<MutationRecord>) -> Vec<MutationRecord> {
    records.sort_by(MutationRecord::drain_order);

    let mut by_target: HashMap<String, VecDeque<MutationRecord>> = HashMap::new();
    let mut fifo = records.clone();
    fifo.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    for record in fifo {
        by_target
            .entry(record.target_id.clone())
            .or_default()
            .push_back(record);
    }

    records
        .iter()
        .filter_map(|slot| by_target.get_mut(&slot.target_id)?.pop_front())
        .collect()
}
