use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use dialogue_flow::{Context, Result, StepHandler, StepOutcome, StepResult};
use tracing::{info, warn};

use crate::agent::Step;
use crate::extract;
use crate::nlu::LanguageService;
use crate::scheduling::business_now;
use crate::state::{ConversationState, Tri};

use super::{ASK_FOR_DATETIME, user_input};

const UNPARSEABLE_AFTER_TIMEOUT: &str = "Desculpe, demorei muito para processar. \
    Pode repetir a data e horário? Ex: 'terça às 14h' ou '18/02 às 10h'";

const WEEKEND_MESSAGE: &str = "Esse dia é fim de semana. 😅 Atendemos apenas Segunda a Sexta, \
    das 9h às 12h e das 14h às 18h. Pode escolher outro dia?";

const OUT_OF_HOURS_MESSAGE: &str = "Esse horário está fora do nosso expediente. \
    Atendemos das 9h às 12h e das 14h às 18h. Pode escolher outro horário?";

const PAST_MESSAGE: &str = "Essa data/hora já passou. Pode escolher uma data futura?";

/// Collects the desired date and time: deterministic resolution of bare-time
/// follow-ups against the previous attempt's date, collaborator extraction
/// (bounded timeout, regex fallback) otherwise, then business-rule
/// validation. Any failure re-prompts without advancing.
pub struct DatetimeCollectorStep {
    nlu: Arc<dyn LanguageService>,
}

impl DatetimeCollectorStep {
    pub fn new(nlu: Arc<dyn LanguageService>) -> Self {
        Self { nlu }
    }
}

#[async_trait]
impl StepHandler<Step> for DatetimeCollectorStep {
    fn step(&self) -> Step {
        Step::CollectingDatetime
    }

    async fn run(&self, context: Context) -> Result<StepResult<Step>> {
        let mut state = ConversationState::load(&context).await;

        // Already extracted on a previous pass of this turn's chain
        if state.requested_datetime.is_some() {
            return Ok(StepResult::new(None, StepOutcome::Chain(Step::CheckingSlot)));
        }

        let input = user_input(&context).await?;
        let now = business_now();

        // A bare time ("pode ser... 15h" became just "15h") picks one of the
        // alternatives offered for the previously requested date
        let mut from_alternative = false;
        let candidate: NaiveDateTime = if let (Some(date), Some(time)) =
            (state.last_requested_date, extract::bare_time(&input))
        {
            from_alternative = true;
            date.and_time(time)
        } else {
            match self.nlu.extract_datetime(&input, state.last_requested_date).await {
                Ok(Some(extracted)) => extracted,
                Ok(None) => {
                    return Ok(StepResult::new(
                        Some(ASK_FOR_DATETIME.to_string()),
                        StepOutcome::Wait,
                    ));
                }
                Err(err) => {
                    warn!(error = %err, "datetime extraction failed, trying regex fallback");
                    match extract::fallback_datetime(&input, now.year()) {
                        Some(extracted) => extracted,
                        None => {
                            // Step stays unchanged so the next message
                            // retries the same extraction
                            return Ok(StepResult::new(
                                Some(UNPARSEABLE_AFTER_TIMEOUT.to_string()),
                                StepOutcome::Wait,
                            ));
                        }
                    }
                }
            }
        };

        // Business-rule validation: weekday, business windows, strictly future
        if matches!(candidate.weekday(), Weekday::Sat | Weekday::Sun) {
            return Ok(StepResult::new(
                Some(WEEKEND_MESSAGE.to_string()),
                StepOutcome::Wait,
            ));
        }
        let hour = candidate.hour();
        if !((9..12).contains(&hour) || (14..18).contains(&hour)) {
            return Ok(StepResult::new(
                Some(OUT_OF_HOURS_MESSAGE.to_string()),
                StepOutcome::Wait,
            ));
        }
        if candidate <= now {
            return Ok(StepResult::new(
                Some(PAST_MESSAGE.to_string()),
                StepOutcome::Wait,
            ));
        }

        info!(%candidate, from_alternative, "datetime collected");
        state.requested_datetime = Some(candidate);
        if from_alternative {
            state.chosen_slot = Some(candidate);
        }
        // New booking attempt: the availability verdict starts over
        state.slot_available = Tri::Unknown;
        state.save(&context).await;

        Ok(StepResult::new(None, StepOutcome::Chain(Step::CheckingSlot)))
    }
}
