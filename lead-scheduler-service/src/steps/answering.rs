use std::sync::Arc;

use async_trait::async_trait;
use dialogue_flow::{Context, Result, StepHandler, StepOutcome, StepResult};
use tracing::{info, warn};

use crate::agent::Step;
use crate::extract;
use crate::nlu::{Intent, LanguageService};
use crate::state::{ConversationState, Mode, Tri};

use super::user_input;

const PERMISSION_ASK: &str = "Posso te fazer algumas perguntas rápidas \
    para entender melhor o seu negócio?";

const SCHEDULING_SHORTCUT: &str =
    "Perfeito! Vou te ajudar com isso. Primeiro, qual é o seu nome completo?";

const ACCEPTED_ASK_NAME: &str = "Ótimo! Vamos lá então. Qual é o seu nome completo?";

const EMAIL_CAPTURED_ASK_NAME: &str = "Anotei! Qual é o seu nome completo?";

const ANSWER_FALLBACK: &str = "Nós construímos sistemas de aquisição de clientes — \
    não somos uma agência tradicional. Posso te contar mais sobre como funcionamos! 😊";

/// Answers customer questions and steers the conversation toward
/// qualification: the first answer carries a soft permission ask, later
/// replies are analyzed for consent, volunteered data or scheduling intent.
pub struct AnsweringStep {
    nlu: Arc<dyn LanguageService>,
}

impl AnsweringStep {
    pub fn new(nlu: Arc<dyn LanguageService>) -> Self {
        Self { nlu }
    }

    async fn answer(&self, question: &str) -> String {
        match self.nlu.answer_question(question).await {
            Ok(answer) => answer,
            Err(err) => {
                warn!(error = %err, "question answering failed, using canned fallback");
                ANSWER_FALLBACK.to_string()
            }
        }
    }
}

#[async_trait]
impl StepHandler<Step> for AnsweringStep {
    fn step(&self) -> Step {
        Step::Answering
    }

    async fn run(&self, context: Context) -> Result<StepResult<Step>> {
        let input = user_input(&context).await?;
        let mut state = ConversationState::load(&context).await;

        let intent = match self.nlu.classify_intent(&input).await {
            Ok(intent) => intent,
            Err(err) => {
                warn!(error = %err, "intent classification failed, using keyword fallback");
                if extract::has_scheduling_intent(&input) {
                    Intent::SchedulingRequest
                } else {
                    Intent::Unknown
                }
            }
        };

        // Explicit scheduling intent short-circuits straight into lead collection
        if intent == Intent::SchedulingRequest {
            info!("scheduling intent detected, moving to lead collection");
            state.permission_granted = Tri::Yes;
            state.mode = Mode::Qualifying;
            state.save(&context).await;
            return Ok(StepResult::new(
                Some(SCHEDULING_SHORTCUT.to_string()),
                StepOutcome::WaitAt(Step::CollectingLead),
            ));
        }

        // Permission was asked and not answered yet: analyze this reply
        if state.permission_asked && state.permission_granted.is_unknown() {
            if let Some(email) = extract::extract_email(&input) {
                state.permission_granted = Tri::Yes;
                state.lead_email = Some(email);
                state.save(&context).await;
                return Ok(StepResult::new(
                    Some(EMAIL_CAPTURED_ASK_NAME.to_string()),
                    StepOutcome::WaitAt(Step::CollectingLead),
                ));
            }

            if input.split_whitespace().count() <= 5
                && let Some(name) = extract::extract_name(&input)
            {
                let first = name.split_whitespace().next().unwrap_or_default().to_string();
                state.permission_granted = Tri::Yes;
                state.lead_name = Some(name);
                state.save(&context).await;
                return Ok(StepResult::new(
                    Some(format!("Prazer, {first}! Qual é o seu email?")),
                    StepOutcome::WaitAt(Step::CollectingLead),
                ));
            }

            if intent == Intent::Agreement {
                state.permission_granted = Tri::Yes;
                state.save(&context).await;
                return Ok(StepResult::new(
                    Some(ACCEPTED_ASK_NAME.to_string()),
                    StepOutcome::WaitAt(Step::CollectingLead),
                ));
            }

            // Refused or asked something else: keep answering, never re-ask
            if intent == Intent::Refusal {
                state.permission_granted = Tri::No;
            }
            let answer = self.answer(&input).await;
            state.mode = Mode::Answering;
            state.save(&context).await;
            return Ok(StepResult::new(Some(answer), StepOutcome::Wait));
        }

        if !state.permission_asked {
            // First question: answer it and append the soft permission ask
            let answer = self.answer(&input).await;
            state.permission_asked = true;
            state.mode = Mode::Qualifying;
            state.save(&context).await;
            return Ok(StepResult::new(
                Some(format!("{answer}\n\n{PERMISSION_ASK}")),
                StepOutcome::Wait,
            ));
        }

        // Permission already refused: plain answers from here on
        let answer = self.answer(&input).await;
        state.mode = Mode::Answering;
        state.save(&context).await;
        Ok(StepResult::new(Some(answer), StepOutcome::Wait))
    }
}
