//! Rollback phase transitions.

use crate::error::StateMachineError;
use serde::{Deserialize, Serialize};

/// Lifecycle of the rollback coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPhase {
    /// No rollback has run since the last reset.
    Idle,
    /// A rollback holds the coordinator.
    RollbackInProgress,
    /// The last rollback made its target active.
    RollbackSucceeded,
    /// The last rollback missed its target, its deadline or was dropped.
    RollbackFailed,
}

impl RollbackPhase {
    /// Terminal phases are reset to `Idle` before the next attempt.
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::RollbackSucceeded | Self::RollbackFailed)
    }
}

/// Validates a phase transition.
///
/// Illegal transitions return an error. With the `strict-debug` feature they
/// panic instead, so simulations stop at the first bad transition.
pub fn validate_transition(
    from: RollbackPhase,
    to: RollbackPhase,
) -> Result<(), StateMachineError> {
    if allowed(from, to) {
        Ok(())
    } else {
        #[cfg(feature = "strict-debug")]
        panic!("Illegal rollback transition attempted: {from:?} -> {to:?}");

        #[cfg(not(feature = "strict-debug"))]
        Err(StateMachineError::IllegalTransition { from, to })
    }
}

#[must_use]
pub fn allowed_transitions(from: RollbackPhase) -> Vec<RollbackPhase> {
    use RollbackPhase::*;
    match from {
        Idle => vec![RollbackInProgress],
        RollbackInProgress => vec![RollbackSucceeded, RollbackFailed],
        RollbackSucceeded | RollbackFailed => vec![Idle],
    }
}

fn allowed(from: RollbackPhase, to: RollbackPhase) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}
