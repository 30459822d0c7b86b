use async_trait::async_trait;
use dialogue_flow::{Context, Result, StepHandler, StepOutcome, StepResult};
use tracing::info;

use crate::agent::Step;
use crate::extract;
use crate::state::{ConversationState, Mode};

use super::user_input;

const ASK_EMAIL: &str = "Ótimo! E qual é o seu email?";
const ASK_INTEREST: &str =
    "Perfeito! Agora me conta, qual é o seu principal interesse ou necessidade?";

// Guided prompts when the message matched no missing field
const GUIDED_NAME: &str = "Para começarmos, qual é o seu nome completo?";
const GUIDED_EMAIL: &str = "Qual é o seu email?";
const GUIDED_INTEREST: &str = "O que você procura? Qual sua principal necessidade?";

/// Collects the three qualification fields (name, email, interest) with
/// deterministic extraction, one message at a time, in whatever order the
/// visitor supplies them.
pub struct LeadCollectorStep;

#[async_trait]
impl StepHandler<Step> for LeadCollectorStep {
    fn step(&self) -> Step {
        Step::CollectingLead
    }

    async fn run(&self, context: Context) -> Result<StepResult<Step>> {
        let input = user_input(&context).await?;
        let mut state = ConversationState::load(&context).await;

        let mut captured = false;

        if state.lead_name.is_none()
            && let Some(name) = extract::extract_name(&input)
        {
            info!(%name, "lead name captured");
            state.lead_name = Some(name);
            captured = true;
        }

        if state.lead_email.is_none()
            && let Some(email) = extract::extract_email(&input)
        {
            info!(%email, "lead email captured");
            state.lead_email = Some(email);
            captured = true;
        }

        if state.lead_interest.is_none()
            && let Some(interest) = extract::extract_interest(&input)
        {
            info!("lead interest captured");
            state.lead_interest = Some(interest);
            captured = true;
        }

        let complete = state.lead_name.is_some()
            && state.lead_email.is_some()
            && state.lead_interest.is_some();

        if complete {
            let first = state.first_name().unwrap_or_default().to_string();
            state.lead_collection_complete = true;
            state.mode = Mode::Scheduling;
            state.save(&context).await;
            info!("lead collection complete, offering to schedule");
            // The scheduling question itself is the next step's job
            return Ok(StepResult::with_status(
                Some(format!("Perfeito, {first}! Tenho tudo que preciso. 🎉")),
                StepOutcome::Chain(Step::OfferingSchedule),
                "lead collection complete",
            ));
        }

        let response = if captured {
            // Just captured something: ask for the next missing field
            if state.lead_name.is_none() {
                GUIDED_NAME
            } else if state.lead_email.is_none() {
                ASK_EMAIL
            } else {
                ASK_INTEREST
            }
        } else {
            // Nothing matched: guide toward the first missing field
            if state.lead_name.is_none() {
                GUIDED_NAME
            } else if state.lead_email.is_none() {
                GUIDED_EMAIL
            } else {
                GUIDED_INTEREST
            }
        };

        state.save(&context).await;
        Ok(StepResult::new(
            Some(response.to_string()),
            StepOutcome::Wait,
        ))
    }
}
