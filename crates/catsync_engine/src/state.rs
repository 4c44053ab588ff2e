//! Operation lifecycle and reconciliation outcomes.

use crate::echo::EchoVerdict;
use crate::error::SyncError;
use catsync_protocol::{Operation, RecordId, ReferenceId};
use chrono::{DateTime, Utc};
use std::fmt;

/// Lifecycle of one logical operation.
///
/// `Pending → Filtered → Committed → Reconciled | Skipped | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Event received, filter phase not yet run.
    Pending,
    /// Filter phase done, mutation not yet committed.
    Filtered,
    /// Mutation committed, action phase running.
    Committed,
    /// Change mirrored and provenance written back.
    Reconciled,
    /// Suppressed as an echo.
    Skipped,
    /// Gave up.
    Failed,
}

impl OperationState {
    /// Returns true for `Reconciled`, `Skipped` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Reconciled | OperationState::Skipped | OperationState::Failed
        )
    }

    /// Returns true if `next` is a legal successor.
    pub fn can_transition_to(&self, next: OperationState) -> bool {
        use OperationState::*;
        matches!(
            (self, next),
            (Pending, Filtered)
                // hosts that do not run a filter phase commit straight away
                | (Pending, Committed)
                | (Filtered, Committed)
                | (Committed, Reconciled)
                | (Committed, Skipped)
                | (Committed, Failed)
        )
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Terminal result of reconciling one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Mirrored and stamped.
    Reconciled {
        /// Operation performed.
        operation: Operation,
        /// Source record.
        record_id: RecordId,
        /// Target entity.
        reference_id: ReferenceId,
    },
    /// Suppressed as an echo.
    Skipped {
        /// Operation that was suppressed.
        operation: Operation,
        /// Source record.
        record_id: RecordId,
        /// Guard's reasoning.
        verdict: EchoVerdict,
    },
    /// Gave up.
    Failed {
        /// Operation attempted.
        operation: Operation,
        /// Source record.
        record_id: RecordId,
        /// Last error seen.
        error: SyncError,
    },
}

impl Outcome {
    /// The terminal state this outcome represents.
    pub fn state(&self) -> OperationState {
        match self {
            Outcome::Reconciled { .. } => OperationState::Reconciled,
            Outcome::Skipped { .. } => OperationState::Skipped,
            Outcome::Failed { .. } => OperationState::Failed,
        }
    }

    /// The operation concerned.
    pub fn operation(&self) -> Operation {
        match self {
            Outcome::Reconciled { operation, .. }
            | Outcome::Skipped { operation, .. }
            | Outcome::Failed { operation, .. } => *operation,
        }
    }

    /// The Source record concerned.
    pub fn record_id(&self) -> &RecordId {
        match self {
            Outcome::Reconciled { record_id, .. }
            | Outcome::Skipped { record_id, .. }
            | Outcome::Failed { record_id, .. } => record_id,
        }
    }

    /// The error, if the outcome is a failure.
    pub fn error(&self) -> Option<&SyncError> {
        match self {
            Outcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Reconciled {
                operation,
                record_id,
                reference_id,
            } => write!(f, "{operation} {record_id}: reconciled as {reference_id}"),
            Outcome::Skipped {
                operation,
                record_id,
                verdict,
            } => write!(f, "{operation} {record_id}: skipped ({verdict})"),
            Outcome::Failed {
                operation,
                record_id,
                error,
            } => write!(f, "{operation} {record_id}: failed ({error})"),
        }
    }
}

/// Counters kept by the reconciler.
#[derive(Debug, Clone, Default)]
pub struct ReconcilerStats {
    /// Reconciliations that completed.
    pub reconciled: u64,
    /// Events suppressed as echoes.
    pub skipped: u64,
    /// Reconciliations that gave up.
    pub failed: u64,
    /// Retried store calls.
    pub retries: u64,
    /// Time of the last successful reconciliation.
    pub last_reconciled_at: Option<DateTime<Utc>>,
    /// Last error message.
    pub last_error: Option<String>,
}

impl ReconcilerStats {
    /// Total number of terminal outcomes recorded.
    pub fn total(&self) -> u64 {
        self.reconciled + self.skipped + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_checks() {
        assert!(OperationState::Reconciled.is_terminal());
        assert!(OperationState::Skipped.is_terminal());
        assert!(OperationState::Failed.is_terminal());
        assert!(!OperationState::Committed.is_terminal());

        assert!(OperationState::Pending.can_transition_to(OperationState::Filtered));
        assert!(OperationState::Filtered.can_transition_to(OperationState::Committed));
        assert!(OperationState::Committed.can_transition_to(OperationState::Skipped));
        assert!(!OperationState::Filtered.can_transition_to(OperationState::Reconciled));
        assert!(!OperationState::Reconciled.can_transition_to(OperationState::Committed));
    }

    #[test]
    fn outcome_accessors() {
        let outcome = Outcome::Failed {
            operation: Operation::Update,
            record_id: RecordId::new("9"),
            error: SyncError::not_found(RecordId::new("9"), "no reference id"),
        };
        assert_eq!(outcome.state(), OperationState::Failed);
        assert_eq!(outcome.operation(), Operation::Update);
        assert_eq!(outcome.record_id().as_str(), "9");
        assert!(outcome.error().is_some());
        assert!(outcome.to_string().starts_with("update 9: failed"));
    }

    #[test]
    fn stats_total() {
        let stats = ReconcilerStats {
            reconciled: 2,
            skipped: 1,
            failed: 3,
            ..ReconcilerStats::default()
        };
        assert_eq!(stats.total(), 6);
    }
}
