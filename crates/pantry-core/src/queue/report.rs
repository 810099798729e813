//! Per-record results of a drain cycle

use std::collections::BTreeSet;
use std::time::Duration;

use crate::models::{ConflictId, MutationId, MutationKind, ResolutionStrategy};

/// What happened to one mutation during a drain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainResult {
    /// Accepted by the remote and removed from the queue
    Sent,
    /// The remote already held an equivalent version; removed
    Converged,
    /// Conflict merged automatically; the record is kept as `Resolved`
    AutoResolved {
        strategy: ResolutionStrategy,
        /// Follow-up update carrying the merged fields, if any differ from the remote
        corrective: Option<MutationId>,
    },
    /// Conflict needs a person; the record waits in the queue
    HeldForManual { conflict_id: ConflictId },
    /// Transient failure, retried by a later drain
    Retrying {
        retry_count: u32,
        next_attempt_in: Duration,
    },
    /// Transient failure beyond the retry cap; never retried again
    PermanentlyFailed { retry_count: u32, reason: String },
    /// Rejected by the remote and removed from the queue
    Dropped { status: u16, reason: String },
    /// Skipped because an earlier mutation for the same target did not go through
    Deferred,
}

impl DrainResult {
    /// The remote acknowledged or reconciled the mutation.
    pub const fn reached_remote(&self) -> bool {
        matches!(
            self,
            Self::Sent | Self::Converged | Self::AutoResolved { .. }
        )
    }

    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Retrying { .. } | Self::PermanentlyFailed { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainOutcome {
    pub mutation_id: MutationId,
    pub target_id: String,
    pub kind: MutationKind,
    pub result: DrainResult,
}

/// Summary of one drain cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Outcomes in processing order
    pub outcomes: Vec<DrainOutcome>,
    /// Highest server version acknowledged during the cycle
    pub observed_version: Option<i64>,
    /// The cycle ended early on a stop request
    pub stopped: bool,
}

impl DrainReport {
    pub(crate) fn push(
        &mut self,
        mutation_id: MutationId,
        target_id: &str,
        kind: MutationKind,
        result: DrainResult,
    ) {
        self.outcomes.push(DrainOutcome {
            mutation_id,
            target_id: target_id.to_string(),
            kind,
            result,
        });
    }

    pub(crate) fn observe_version(&mut self, version: Option<i64>) {
        self.observed_version = self.observed_version.max(version);
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Number of outcomes matching `predicate`
    pub fn count(&self, predicate: impl Fn(&DrainResult) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.result))
            .count()
    }

    /// Targets whose mutations reached the remote, in first-seen order
    pub fn reconciled_targets(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.outcomes
            .iter()
            .filter(|outcome| outcome.result.reached_remote())
            .filter(|outcome| seen.insert(outcome.target_id.clone()))
            .map(|outcome| outcome.target_id.clone())
            .collect()
    }

    /// At least one send was attempted and every attempt failed transiently.
    pub fn all_transient(&self) -> bool {
        let mut attempted = self
            .outcomes
            .iter()
            .filter(|outcome| outcome.result != DrainResult::Deferred)
            .peekable();
        attempted.peek().is_some() && attempted.all(|outcome| outcome.result.is_transient())
    }

    /// Mutations that exhausted their retries this cycle
    pub fn permanently_failed(&self) -> Vec<MutationId> {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.result, DrainResult::PermanentlyFailed { .. }))
            .map(|outcome| outcome.mutation_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(results: Vec<DrainResult>) -> DrainReport {
        let mut report = DrainReport::default();
        for (index, result) in results.into_iter().enumerate() {
            report.push(
                MutationId::new(),
                &format!("t{}", index % 2),
                MutationKind::Update,
                result,
            );
        }
        report
    }

    #[test]
    fn test_all_transient_requires_an_attempt() {
        assert!(!DrainReport::default().all_transient());
        assert!(!report(vec![DrainResult::Deferred]).all_transient());

        let retrying = DrainResult::Retrying {
            retry_count: 1,
            next_attempt_in: Duration::from_secs(2),
        };
        assert!(report(vec![retrying.clone(), DrainResult::Deferred]).all_transient());
        assert!(!report(vec![retrying, DrainResult::Sent]).all_transient());
    }

    #[test]
    fn test_reconciled_targets_are_unique() {
        let report = report(vec![
            DrainResult::Sent,
            DrainResult::Converged,
            DrainResult::Sent,
            DrainResult::Dropped {
                status: 422,
                reason: "invalid".to_string(),
            },
        ]);
        assert_eq!(report.reconciled_targets(), vec!["t0".to_string(), "t1".to_string()]);
    }

    #[test]
    fn test_observed_version_keeps_maximum() {
        let mut report = DrainReport::default();
        report.observe_version(Some(4));
        report.observe_version(None);
        report.observe_version(Some(2));
        assert_eq!(report.observed_version, Some(4));
    }
}
