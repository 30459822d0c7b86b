use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::{
    context::Context,
    error::{FlowError, Result},
    step::{StepHandler, StepOutcome},
    storage::DialogueSession,
};

/// Identifier type of a closed set of conversation steps.
///
/// Implemented on a plain enum by the embedding service; the engine never
/// invents step values of its own.
pub trait StepKey:
    Copy + Eq + Hash + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Whether this step may be persisted as the entry point of a later turn.
    /// Internal-only steps (reached exclusively through chaining) return false.
    fn is_wait_point(&self) -> bool;

    /// Nearest wait-for-input step to fall back to when this step leaks into
    /// persisted state. Wait points return themselves.
    fn recovery_point(&self) -> Self;
}

/// Selects the entry step of a turn from the persisted step and the session
/// context — the dispatcher side of the transition table.
pub trait EntryRouter<S: StepKey>: Send + Sync {
    fn entry_step(&self, persisted: Option<S>, context: &Context) -> S;
}

/// Final result of one inbound-message turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Responses accumulated across all steps executed this turn, in order
    pub messages: Vec<String>,
    pub status: TurnStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    /// The turn ended at a step waiting for new user input
    WaitingForInput,
    /// The conversation reached a terminal step this turn
    Completed,
}

/// Dialogue engine: executes one turn per inbound message, chaining through
/// auto-chain steps until a wait-for-input step yields control.
pub struct DialogueEngine<S: StepKey> {
    handlers: HashMap<S, Arc<dyn StepHandler<S>>>,
    router: Arc<dyn EntryRouter<S>>,
    chain_limit: usize,
}

impl<S: StepKey> DialogueEngine<S> {
    pub fn new(router: Arc<dyn EntryRouter<S>>) -> Self {
        Self {
            handlers: HashMap::new(),
            router,
            chain_limit: 8,
        }
    }

    pub fn register(mut self, handler: Arc<dyn StepHandler<S>>) -> Self {
        self.handlers.insert(handler.step(), handler);
        self
    }

    pub fn with_chain_limit(mut self, limit: usize) -> Self {
        self.chain_limit = limit;
        self
    }

    /// Execute exactly one turn for the given session.
    ///
    /// The session's `current_step` on return always names a wait point, so
    /// the next turn can be routed even if this one chained through several
    /// internal steps.
    pub async fn run_turn(&self, session: &mut DialogueSession<S>) -> Result<TurnOutcome> {
        let persisted = match session.current_step {
            Some(step) if !step.is_wait_point() => {
                // Should not normally happen: an internal-only step was
                // persisted. Recover instead of failing the turn.
                let recovered = step.recovery_point();
                warn!(
                    session_id = %session.id,
                    step = ?step,
                    recovered = ?recovered,
                    "persisted step is not a wait point, recovering"
                );
                Some(recovered)
            }
            other => other,
        };

        let mut current = self.router.entry_step(persisted, &session.context);
        let mut messages = Vec::new();

        for _ in 0..self.chain_limit {
            let handler = self
                .handlers
                .get(&current)
                .ok_or_else(|| FlowError::StepNotFound(format!("{current:?}")))?;

            debug!(session_id = %session.id, step = ?current, "executing step");
            let result = handler.run(session.context.clone()).await?;

            if let Some(text) = result.response {
                messages.push(text);
            }
            if result.status_message.is_some() {
                session.status_message = result.status_message;
            }

            match result.outcome {
                StepOutcome::Chain(next) => {
                    debug!(session_id = %session.id, from = ?current, to = ?next, "chaining");
                    current = next;
                }
                StepOutcome::Wait => {
                    session.current_step = Some(Self::persistable(current));
                    return Ok(TurnOutcome {
                        messages,
                        status: TurnStatus::WaitingForInput,
                    });
                }
                StepOutcome::WaitAt(step) => {
                    session.current_step = Some(Self::persistable(step));
                    return Ok(TurnOutcome {
                        messages,
                        status: TurnStatus::WaitingForInput,
                    });
                }
                StepOutcome::Complete => {
                    session.current_step = Some(Self::persistable(current));
                    return Ok(TurnOutcome {
                        messages,
                        status: TurnStatus::Completed,
                    });
                }
            }
        }

        Err(FlowError::ChainLimitExceeded(self.chain_limit))
    }

    /// Persisted steps must be wait points; anything else is mapped to its
    /// recovery point so the invariant holds no matter what a handler returns.
    fn persistable(step: S) -> S {
        if step.is_wait_point() {
            step
        } else {
            let recovered = step.recovery_point();
            warn!(step = ?step, recovered = ?recovered, "refusing to persist non-wait step");
            recovered
        }
    }
}
