use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{context::Context, error::Result};

/// Result of a single step execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult<S> {
    /// Response to send to the user, if any
    pub response: Option<String>,
    /// What the engine should do next
    pub outcome: StepOutcome<S>,
    /// Optional status line for observability
    pub status_message: Option<String>,
}

impl<S> StepResult<S> {
    pub fn new(response: Option<String>, outcome: StepOutcome<S>) -> Self {
        Self {
            response,
            outcome,
            status_message: None,
        }
    }

    pub fn with_status(
        response: Option<String>,
        outcome: StepOutcome<S>,
        status_message: impl Into<String>,
    ) -> Self {
        Self {
            response,
            outcome,
            status_message: Some(status_message.into()),
        }
    }
}

/// Explicit auto-chain vs. wait decision made by every step.
///
/// `Chain` keeps executing within the same turn without consuming new user
/// input; the other variants end the turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepOutcome<S> {
    /// Immediately execute the given step within the same turn
    Chain(S),
    /// End the turn; the current step is the entry point of the next turn
    Wait,
    /// End the turn; the given step is the entry point of the next turn
    WaitAt(S),
    /// End the turn; the conversation reached a terminal state
    Complete,
}

/// Core trait implemented by every conversation step
#[async_trait]
pub trait StepHandler<S>: Send + Sync {
    /// The step this handler owns
    fn step(&self) -> S;

    /// Execute the step against the shared session context
    async fn run(&self, context: Context) -> Result<StepResult<S>>;
}
