//! Session state machine contract
//!
//! A session is a chain of states. Each state does one unit of protocol
//! work in `run` and hands back the state to continue with, or finishes.
//! The driver never knows the concrete states, so roles can add
//! intermediate states without touching it.

use std::fmt;

use async_trait::async_trait;

use crate::error::SessionError;

/// How a session ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Exit code to report, if the session produced one
    pub exit_code: Option<i32>,
}

impl Outcome {
    /// Ended without an exit code
    pub fn finished() -> Self {
        Self::default()
    }

    /// Ended with an exit code
    pub fn exited(code: Option<i32>) -> Self {
        Self { exit_code: code }
    }
}

/// Result of running one state
pub enum Step {
    /// Continue with this state
    Next(Box<dyn Session>),
    /// Stop the loop
    Done(Outcome),
}

impl Step {
    /// Continue with `state`
    pub fn next<S: Session + 'static>(state: S) -> Self {
        Step::Next(Box::new(state))
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Next(state) => f.debug_tuple("Next").field(&state.name()).finish(),
            Step::Done(outcome) => f.debug_tuple("Done").field(outcome).finish(),
        }
    }
}

/// One state of a role's session
#[async_trait]
pub trait Session: Send {
    /// State name for logs
    fn name(&self) -> &'static str;

    /// Perform one unit of work and return what comes next
    async fn run(self: Box<Self>) -> Result<Step, SessionError>;
}

/// Run states until one returns `Done`
pub async fn drive(first: Box<dyn Session>) -> Result<Outcome, SessionError> {
    let mut state = first;
    loop {
        let from = state.name();
        match state.run().await {
            Ok(Step::Next(next)) => {
                tracing::trace!("session: {} -> {}", from, next.name());
                state = next;
            }
            Ok(Step::Done(outcome)) => {
                tracing::debug!("session finished in {} ({:?})", from, outcome);
                return Ok(outcome);
            }
            Err(e) => {
                tracing::debug!("session failed in {}: {}", from, e);
                return Err(e);
            }
        }
    }
}
