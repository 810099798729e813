//! Sync coordinator
//!
//! Sequences one sync cycle: drain the queue (resolving conflicts as they
//! surface), re-fetch every target the remote accepted, and record the cycle
//! in the sync metadata. Exposes the observable state machine and trigger
//! arming to the host.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use super::breaker::CycleBreaker;
use super::state::{ListenerId, StateEvent, StatusBoard, SyncState};
use super::trigger::{Capabilities, TriggerKind};
use crate::config::{EngineConfig, SyncConfig};
use crate::conflict::{ConflictDetector, ConflictResolver, Resolution};
use crate::error::{DrainError, Error, QueueError, SyncError};
use crate::models::{
    ConflictId, MutationRecord, NewMutation, RecordSnapshot, ResolutionLogEntry, SyncMetadata,
};
use crate::queue::{
    ConflictHandler, DrainReport, DrainResult, EnqueueOutcome, QueueManager, QueueStatus,
    QueueStore, Reconciliation,
};
use crate::remote::{RemoteSender, Replicator};
use crate::services::SyncLedger;
use crate::util::now_ms;

/// What a completed cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub trigger: TriggerKind,
    pub report: DrainReport,
    /// Targets whose canonical remote state was written back locally
    pub refreshed: Vec<String>,
    pub metadata: SyncMetadata,
}

/// Result of a trigger
#[derive(Debug)]
pub enum SyncOutcome {
    Synced(CycleSummary),
    Failed(SyncError),
    /// Another cycle was already running; nothing was started
    Coalesced,
    /// The breaker is open after repeated failures
    ShortCircuited { retry_in: Duration },
    /// An automatic trigger fired that is not the armed one
    NotArmed(TriggerKind),
}

impl SyncOutcome {
    pub const fn summary(&self) -> Option<&CycleSummary> {
        match self {
            Self::Synced(summary) => Some(summary),
            _ => None,
        }
    }

    pub const fn error(&self) -> Option<&SyncError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// One engine instance: queue, conflict handling and sync state for a list database.
pub struct SyncCoordinator<S, R, P> {
    queue: QueueManager<S>,
    sender: R,
    replicator: P,
    detector: ConflictDetector,
    resolver: ConflictResolver,
    ledger: SyncLedger,
    config: SyncConfig,
    cycle: Mutex<()>,
    breaker: StdMutex<CycleBreaker>,
    board: Arc<StatusBoard>,
    armed: StdMutex<Option<TriggerKind>>,
}

impl<S, R, P> SyncCoordinator<S, R, P>
where
    S: QueueStore,
    R: RemoteSender,
    P: Replicator,
{
    pub fn new(
        queue: QueueManager<S>,
        sender: R,
        replicator: P,
        ledger: SyncLedger,
        config: &EngineConfig,
    ) -> Self {
        Self {
            queue,
            sender,
            replicator,
            detector: ConflictDetector::new(config.schema.clone(), config.resolver.max_compare_depth),
            resolver: ConflictResolver::new(config.schema.clone(), config.resolver.lww_threshold_ms),
            ledger,
            breaker: StdMutex::new(CycleBreaker::from_config(&config.sync)),
            config: config.sync.clone(),
            cycle: Mutex::new(()),
            board: Arc::new(StatusBoard::new()),
            armed: StdMutex::new(None),
        }
    }

    pub const fn queue(&self) -> &QueueManager<S> {
        &self.queue
    }

    pub const fn ledger(&self) -> &SyncLedger {
        &self.ledger
    }

    /// Queue a mutation and show it in the local cache straight away.
    ///
    /// The change is persisted before the cache is touched, so a failed
    /// cache write still leaves it queued for the next cycle.
    pub async fn enqueue(&self, mutation: NewMutation) -> Result<EnqueueOutcome, SyncError> {
        let (outcome, change) = self.queue.enqueue_change(mutation).await?;
        let now = now_ms();
        let client_id = self.config.client_id.as_str();
        let optimistic = self
            .replicator
            .local_snapshot(&change.target_id)
            .await
            .unwrap_or_else(|| RecordSnapshot::new(change.target_id.clone(), client_id, now))
            .apply_mutation(&change, client_id, now);
        self.replicator
            .apply_local(&optimistic)
            .await
            .map_err(|error| SyncError::Apply {
                target_id: change.target_id.clone(),
                reason: error.to_string(),
            })?;
        Ok(outcome)
    }

    pub async fn retry_failed(&self) -> Result<usize, QueueError> {
        self.queue.retry_failed().await
    }

    pub async fn status(&self) -> Result<QueueStatus, QueueError> {
        self.queue.status().await
    }

    pub fn state(&self) -> SyncState {
        self.board.state()
    }

    pub fn last_event(&self) -> Option<StateEvent> {
        self.board.last_event()
    }

    /// Register a callback invoked on every state transition.
    pub fn on_state_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StateEvent) + Send + Sync + 'static,
    {
        self.board.subscribe(Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.board.unsubscribe(id)
    }

    /// Arm `kind` as the automatic trigger, replacing the previous one.
    ///
    /// Manual triggers are always honored and need no registration.
    pub fn register_trigger(&self, kind: TriggerKind) {
        if !kind.is_automatic() {
            return;
        }
        let previous = self.armed_lock().replace(kind);
        if previous != Some(kind) {
            tracing::info!(trigger = %kind, "Armed sync trigger");
        }
    }

    /// Arm the best trigger the host supports.
    pub fn arm_best(&self, capabilities: &Capabilities) -> Option<TriggerKind> {
        let best = capabilities.best_trigger();
        match best {
            Some(kind) => self.register_trigger(kind),
            None => {
                self.armed_lock().take();
                tracing::info!("No automatic sync trigger available, manual sync only");
            }
        }
        best
    }

    pub fn armed_trigger(&self) -> Option<TriggerKind> {
        *self.armed_lock()
    }

    /// Run a cycle now on behalf of the application.
    pub async fn sync_now(&self) -> SyncOutcome {
        self.trigger(TriggerKind::Manual).await
    }

    /// React to a trigger. Never runs two cycles at once.
    pub async fn trigger(&self, kind: TriggerKind) -> SyncOutcome {
        if kind.is_automatic() && self.armed_trigger() != Some(kind) {
            tracing::debug!(trigger = %kind, "Ignoring trigger that is not armed");
            return SyncOutcome::NotArmed(kind);
        }

        let Ok(_running) = self.cycle.try_lock() else {
            tracing::debug!(trigger = %kind, "Sync already running, trigger coalesced");
            return SyncOutcome::Coalesced;
        };

        let retry_in = self.breaker_lock().remaining(Instant::now());
        if let Some(retry_in) = retry_in {
            tracing::debug!(
                trigger = %kind,
                retry_in_ms = u64::try_from(retry_in.as_millis()).unwrap_or(u64::MAX),
                "Sync breaker open, trigger short-circuited"
            );
            return SyncOutcome::ShortCircuited { retry_in };
        }

        self.board.transition(SyncState::Syncing, now_ms(), None);
        tracing::info!(trigger = %kind, "Sync cycle started");

        match self.run_cycle(kind).await {
            Ok(summary) => {
                {
                    let mut breaker = self.breaker_lock();
                    if summary.report.all_transient() {
                        breaker.record_failure(Instant::now());
                    } else {
                        breaker.record_success();
                    }
                }
                tracing::info!(
                    trigger = %kind,
                    sent = summary.report.count(DrainResult::reached_remote),
                    retrying = summary.report.count(DrainResult::is_transient),
                    held = summary
                        .report
                        .count(|result| matches!(result, DrainResult::HeldForManual { .. })),
                    refreshed = summary.refreshed.len(),
                    "Sync cycle finished"
                );
                let generation = self.board.transition(SyncState::Synced, now_ms(), None);
                self.schedule_idle(generation);
                SyncOutcome::Synced(summary)
            }
            Err(error) => {
                self.breaker_lock().record_failure(Instant::now());
                tracing::warn!(trigger = %kind, %error, "Sync cycle failed");
                let generation =
                    self.board
                        .transition(SyncState::Failed, now_ms(), Some(error.to_string()));
                self.schedule_idle(generation);
                SyncOutcome::Failed(error)
            }
        }
    }

    async fn run_cycle(&self, trigger: TriggerKind) -> Result<CycleSummary, SyncError> {
        let reconciler = Reconciler {
            replicator: &self.replicator,
            detector: &self.detector,
            resolver: &self.resolver,
            ledger: &self.ledger,
            client_id: &self.config.client_id,
        };
        let report = self.queue.drain(&self.sender, &reconciler).await?;

        let mut observed_version = report.observed_version;
        let mut refreshed = Vec::new();
        for target_id in report.reconciled_targets() {
            let snapshot = self
                .replicator
                .fetch_remote(&target_id)
                .await
                .map_err(|error| SyncError::Fetch {
                    target_id: target_id.clone(),
                    reason: error.to_string(),
                })?;
            observed_version = observed_version.max(Some(snapshot.version));

            // Local intent still queued for the target wins over the fetched state
            if self.queue.has_outstanding(&target_id).await? {
                continue;
            }
            self.replicator
                .apply_local(&snapshot)
                .await
                .map_err(|error| SyncError::Apply {
                    target_id: target_id.clone(),
                    reason: error.to_string(),
                })?;
            refreshed.push(target_id);
        }

        let metadata = self
            .ledger
            .advance_sync_metadata(now_ms(), observed_version)
            .await?;

        let mutation_ids = report.permanently_failed();
        if !mutation_ids.is_empty() {
            return Err(SyncError::RetriesExhausted { mutation_ids });
        }

        Ok(CycleSummary {
            trigger,
            report,
            refreshed,
            metadata,
        })
    }

    fn schedule_idle(&self, generation: u64) {
        let board = Arc::clone(&self.board);
        let display = self.config.status_display();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                tokio::time::sleep(display).await;
                board.settle_to_idle(generation, now_ms());
            });
        } else {
            board.settle_to_idle(generation, now_ms());
        }
    }

    /// Settle a conflict that was escalated for a person.
    ///
    /// `chosen` becomes the local record; whatever the remote still lacks is
    /// queued behind the held mutation's slot.
    pub async fn apply_manual_resolution(
        &self,
        conflict_id: &ConflictId,
        chosen: RecordSnapshot,
        resolved_by: &str,
    ) -> Result<ResolutionLogEntry, SyncError> {
        let mut conflict = self
            .ledger
            .pending_conflict(conflict_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("pending conflict {conflict_id}")))?;
        if chosen.target_id != conflict.target_id {
            return Err(Error::InvalidInput(format!(
                "resolution targets '{}' but conflict {conflict_id} is for '{}'",
                chosen.target_id, conflict.target_id
            ))
            .into());
        }
        let resolved_by = resolved_by.trim();
        if resolved_by.is_empty() {
            return Err(Error::InvalidInput("resolved_by must not be empty".to_string()).into());
        }

        self.replicator
            .apply_local(&chosen)
            .await
            .map_err(|error| SyncError::Apply {
                target_id: chosen.target_id.clone(),
                reason: error.to_string(),
            })?;

        let corrective = corrective_mutation(&self.detector, &conflict.remote_version, &chosen);
        match conflict.mutation_id {
            Some(mutation_id) => {
                self.queue.resolve_held(&mutation_id, corrective).await?;
            }
            None => {
                if let Some(mutation) = corrective {
                    self.queue.enqueue(mutation).await?;
                }
            }
        }

        let entry = conflict.resolve_manually(chosen, resolved_by, now_ms());
        let stored = self.ledger.settle_conflict(&entry).await?;
        tracing::info!(
            %conflict_id,
            target_id = %conflict.target_id,
            resolved_by,
            "Conflict resolved manually"
        );
        Ok(stored)
    }

    pub async fn pending_conflicts(&self) -> Result<Vec<crate::models::ConflictRecord>, SyncError> {
        Ok(self.ledger.pending_conflicts().await?)
    }

    pub async fn resolution_log(&self, limit: usize) -> Result<Vec<ResolutionLogEntry>, SyncError> {
        Ok(self.ledger.resolution_log(limit).await?)
    }

    pub async fn sync_metadata(&self) -> Result<SyncMetadata, SyncError> {
        Ok(self.ledger.sync_metadata().await?)
    }

    /// Flag that stops a running drain before its next mutation.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.queue.stop_handle()
    }

    /// Ask the running cycle to stop after the mutation currently on the wire.
    pub fn shutdown(&self) {
        tracing::info!("Sync shutdown requested");
        self.queue.request_stop();
    }

    pub fn resume(&self) {
        self.queue.resume();
    }

    fn breaker_lock(&self) -> MutexGuard<'_, CycleBreaker> {
        self.breaker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn armed_lock(&self) -> MutexGuard<'_, Option<TriggerKind>> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Conflict handling used while draining.
struct Reconciler<'a, P> {
    replicator: &'a P,
    detector: &'a ConflictDetector,
    resolver: &'a ConflictResolver,
    ledger: &'a SyncLedger,
    client_id: &'a str,
}

impl<P: Replicator> Reconciler<'_, P> {
    /// The local view the mutation was made against.
    async fn local_view(&self, mutation: &MutationRecord) -> RecordSnapshot {
        match self.replicator.local_snapshot(&mutation.target_id).await {
            Some(snapshot) => snapshot,
            None => RecordSnapshot::new(mutation.target_id.clone(), self.client_id, mutation.created_at)
                .apply_mutation(mutation, self.client_id, mutation.created_at),
        }
    }
}

impl<P: Replicator> ConflictHandler for Reconciler<'_, P> {
    async fn reconcile(
        &self,
        mutation: &MutationRecord,
        remote: &RecordSnapshot,
    ) -> Result<Reconciliation, DrainError> {
        let local = self.local_view(mutation).await;
        let Some(mut conflict) = self.detector.detect(&local, remote)? else {
            tracing::debug!(
                mutation_id = %mutation.id,
                target_id = %mutation.target_id,
                "Remote already matches local state"
            );
            return Ok(Reconciliation::Converged);
        };
        conflict.mutation_id = Some(mutation.id);

        match self.resolver.resolve(&conflict) {
            Resolution::AutoResolved { merged, strategy } => {
                self.replicator
                    .apply_local(&merged)
                    .await
                    .map_err(|error| DrainError::LocalApply(error.to_string()))?;
                let entry = conflict.resolve_automatically(merged.clone(), strategy, now_ms());
                self.ledger
                    .append_resolution(&entry)
                    .await
                    .map_err(|error| DrainError::Ledger(error.to_string()))?;
                Ok(Reconciliation::AutoResolved {
                    strategy,
                    corrective: corrective_mutation(self.detector, remote, &merged),
                })
            }
            Resolution::RequiresManual(conflict) => {
                self.ledger
                    .save_pending_conflict(&conflict)
                    .await
                    .map_err(|error| DrainError::Ledger(error.to_string()))?;
                tracing::info!(
                    conflict_id = %conflict.id,
                    target_id = %conflict.target_id,
                    fields = ?conflict.fields(),
                    "Conflict needs manual resolution"
                );
                Ok(Reconciliation::Manual {
                    conflict_id: conflict.id,
                })
            }
        }
    }
}

/// The mutation that brings `remote` to `merged`, if they differ.
fn corrective_mutation(
    detector: &ConflictDetector,
    remote: &RecordSnapshot,
    merged: &RecordSnapshot,
) -> Option<NewMutation> {
    let target_id = merged.target_id.clone();
    match (remote.deleted, merged.deleted) {
        (false, true) => Some(NewMutation::delete(target_id)),
        (true, true) => None,
        (true, false) => Some(NewMutation::create(target_id, merged.fields.clone())),
        (false, false) => {
            let changed = detector.diff_fields(remote, merged);
            (!changed.is_empty()).then(|| NewMutation::update(target_id, changed))
        }
    }
}
