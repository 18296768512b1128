// Commit State Machine
//
// Tracks one commit through PROPOSED -> VALIDATED -> COMMITTED, through
// CONFLICT back to PROPOSED on a lost swap, or into REJECTED.

use tracing::debug;

/// Lifecycle state of a single commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    /// Changeset received, not yet checked against the observed metadata.
    Proposed,

    /// Candidate snapshot built and checked; ready for the pointer swap.
    Validated,

    /// Another writer moved the pointer first.
    Conflict,

    /// The swap succeeded. Terminal.
    Committed,

    /// Validation failed or retries ran out. Terminal.
    Rejected,
}

impl CommitState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommitState::Committed | CommitState::Rejected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitEvent {
    ValidationPassed,
    ValidationFailed,
    SwapSucceeded,
    SwapFailed,
    Rebased,
    RetriesExhausted,
}

/// Errors produced during state transitions.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateError {
    #[error("illegal commit transition: {0}")]
    IllegalTransition(String),
}

#[derive(Debug)]
pub struct CommitStateMachine {
    state: CommitState,
    attempts: u32,
}

impl Default for CommitStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitStateMachine {
    pub fn new() -> Self {
        Self {
            state: CommitState::Proposed,
            attempts: 1,
        }
    }

    pub fn apply(&mut self, event: CommitEvent) -> Result<CommitState, StateError> {
        use CommitEvent::*;
        use CommitState::*;

        let next = match (self.state, event) {
            (Proposed, ValidationPassed) => Validated,
            (Proposed, ValidationFailed) => Rejected,
            (Validated, SwapSucceeded) => Committed,
            (Validated, SwapFailed) => Conflict,
            (Conflict, Rebased) => {
                self.attempts += 1;
                Proposed
            }
            (Conflict, RetriesExhausted) => Rejected,

            (state, event) => {
                return Err(StateError::IllegalTransition(format!(
                    "cannot apply {event:?} while {state:?}"
                )))
            }
        };

        debug!(from = ?self.state, to = ?next, attempt = self.attempts, "commit transition");
        self.state = next;
        Ok(next)
    }

    pub fn current_state(&self) -> CommitState {
        self.state
    }

    /// Number of validate-and-swap attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
