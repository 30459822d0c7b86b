use std::sync::Arc;

use async_trait::async_trait;
use dialogue_flow::{Context, Result, StepHandler, StepOutcome, StepResult};
use tracing::{info, warn};

use crate::agent::Step;
use crate::extract;
use crate::scheduling::{BookingService, phone_from_session};
use crate::state::{ConversationState, Mode, session_keys};

use super::{step_failed, user_input};

const GREETING_MESSAGE: &str = "Oi! Sou o agente virtual do estúdio. Como posso ajudar?";

const CANCELLATION_ACK: &str = "Entendi! Seu agendamento foi cancelado. 😊\n\n\
    Se quiser reagendar ou precisar de qualquer informação, é só me chamar! Estou aqui para ajudar.";

const CANCELLATION_FAILED: &str =
    "Desculpe, tive um problema ao processar o cancelamento. Pode tentar novamente?";

/// Opens the conversation: presents the assistant to new visitors, recognizes
/// returning leads by their contact identifier, and honors cancellation
/// requests against a confirmed appointment.
pub struct GreetingStep {
    booking: Arc<BookingService>,
}

impl GreetingStep {
    pub fn new(booking: Arc<BookingService>) -> Self {
        Self { booking }
    }
}

#[async_trait]
impl StepHandler<Step> for GreetingStep {
    fn step(&self) -> Step {
        Step::Greeting
    }

    async fn run(&self, context: Context) -> Result<StepResult<Step>> {
        let input = user_input(&context).await?;
        let mut state = ConversationState::load(&context).await;

        // Cancellation request embedded in free text, only meaningful while
        // an appointment is confirmed
        if state.appointment_confirmed
            && let Some(appointment_id) = state.appointment_id
            && extract::is_cancellation_request(&input)
        {
            return match self
                .booking
                .cancel_appointment(appointment_id, "Cancelado pelo cliente via chat")
                .await
            {
                Ok(_) => {
                    state.appointment_confirmed = false;
                    state.appointment_id = None;
                    state.mode = Mode::Idle;
                    state.save(&context).await;
                    Ok(StepResult::with_status(
                        Some(CANCELLATION_ACK.to_string()),
                        StepOutcome::Wait,
                        "appointment cancelled by customer",
                    ))
                }
                Err(err) => {
                    warn!(error = %err, %appointment_id, "cancellation request failed");
                    Ok(StepResult::new(
                        Some(CANCELLATION_FAILED.to_string()),
                        StepOutcome::Wait,
                    ))
                }
            };
        }

        let session_id: String = context
            .get(session_keys::SESSION_ID)
            .await
            .unwrap_or_default();
        let phone = phone_from_session(&session_id);

        if let Some(lead) = self
            .booking
            .find_lead_by_phone(&phone)
            .await
            .map_err(step_failed)?
        {
            let active = self
                .booking
                .active_appointments(lead.id)
                .await
                .map_err(step_failed)?;

            info!(
                lead_id = %lead.id,
                active = active.len(),
                "returning lead recognized"
            );

            state.presentation_done = true;
            state.lead_id = Some(lead.id);
            state.lead_name = Some(lead.full_name());
            state.lead_email = lead.email.clone();
            state.lead_interest = lead.need.clone();
            state.mode = if active.is_empty() {
                Mode::ReturningWithoutAppointment
            } else {
                Mode::ReturningWithAppointment
            };
            if let Some(current) = active.first() {
                state.appointment_id = Some(current.id);
                state.appointment_confirmed = true;
            }
            state.save(&context).await;

            // No greeting for returning visitors: answer their message in
            // context within the same turn
            return Ok(StepResult::new(None, StepOutcome::Chain(Step::Answering)));
        }

        state.presentation_done = true;
        state.mode = Mode::Idle;
        state.save(&context).await;

        Ok(StepResult::new(
            Some(GREETING_MESSAGE.to_string()),
            StepOutcome::Wait,
        ))
    }
}
