use async_trait::async_trait;
use dialogue_flow::{Context, Result, StepHandler, StepOutcome, StepResult};
use tracing::info;

use crate::agent::Step;
use crate::extract;
use crate::state::{ConversationState, Mode, Tri};

use super::user_input;

const OFFER_QUESTION: &str = "Perfeito! Quer agendar uma reunião (30-40 min, Google Meet) \
    para discutirmos como podemos ajudar sua empresa a alcançar seus objetivos?";

/// What to assume when the reply carries neither an accept nor a decline
/// signal. The shipped default is optimistic: the visitor is already inside
/// the scheduling branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDefault {
    Accept,
    Decline,
}

/// Asks whether the visitor wants to book a meeting, then classifies the
/// reply with keyword heuristics. Ambiguous replies (both signals present)
/// resolve conservatively to decline.
pub struct ScheduleOfferStep {
    no_signal_default: OfferDefault,
}

impl ScheduleOfferStep {
    pub fn new() -> Self {
        Self {
            no_signal_default: OfferDefault::Accept,
        }
    }

    pub fn with_default(mut self, default: OfferDefault) -> Self {
        self.no_signal_default = default;
        self
    }
}

impl Default for ScheduleOfferStep {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepHandler<Step> for ScheduleOfferStep {
    fn step(&self) -> Step {
        Step::OfferingSchedule
    }

    async fn run(&self, context: Context) -> Result<StepResult<Step>> {
        let mut state = ConversationState::load(&context).await;

        // First call: ask the question and wait
        if !state.asked_to_schedule {
            state.asked_to_schedule = true;
            state.mode = Mode::Scheduling;
            state.save(&context).await;
            return Ok(StepResult::new(
                Some(OFFER_QUESTION.to_string()),
                StepOutcome::Wait,
            ));
        }

        // Second call: analyze the reply
        let input = user_input(&context).await?;
        let wants = match extract::detect_yes_no(&input) {
            Some(answer) => answer,
            None => matches!(self.no_signal_default, OfferDefault::Accept),
        };

        info!(wants, "schedule offer answered");
        state.wants_to_schedule = Tri::from(wants);
        state.save(&context).await;

        if wants {
            Ok(StepResult::new(
                None,
                StepOutcome::Chain(Step::CollectingDatetime),
            ))
        } else {
            Ok(StepResult::new(None, StepOutcome::Chain(Step::Confirming)))
        }
    }
}
