use std::sync::Arc;

use async_trait::async_trait;
use dialogue_flow::{Context, FlowError, Result, StepHandler, StepOutcome, StepResult};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agent::Step;
use crate::scheduling::{Availability, BookingError, BookingService, phone_from_session};
use crate::state::{ConversationState, Tri, session_keys};

use super::{ASK_FOR_DATETIME, slot_checker::alternatives_message, step_failed};

const MEETING_TYPE: &str = "Consultoria Gratuita";
const MEETING_DURATION_MINUTES: u32 = 40;

const MISSING_LEAD_DATA: &str = "Ops! Ainda preciso do seu nome, email e o que você procura. \
    Pode me passar essas informações?";

const LEAD_CREATE_FAILED: &str =
    "Desculpe, tive um problema ao registrar seus dados. Pode tentar novamente?";

const BOOKING_FAILED: &str =
    "Desculpe, tive um problema ao criar o agendamento. Pode tentar novamente?";

/// Resolves the final timestamp and the lead record, then books through the
/// BookingService. Rescheduling and insert-time conflicts are handled here;
/// the confirmation message itself is the next step's job.
pub struct AppointmentCreatorStep {
    booking: Arc<BookingService>,
    availability: Arc<Availability>,
}

impl AppointmentCreatorStep {
    pub fn new(booking: Arc<BookingService>, availability: Arc<Availability>) -> Self {
        Self {
            booking,
            availability,
        }
    }

    async fn resolve_lead(
        &self,
        context: &Context,
        state: &ConversationState,
    ) -> Result<std::result::Result<Uuid, &'static str>> {
        if let Some(lead_id) = state.lead_id {
            return Ok(Ok(lead_id));
        }

        let (Some(name), Some(email), Some(interest)) = (
            state.lead_name.clone(),
            state.lead_email.clone(),
            state.lead_interest.clone(),
        ) else {
            return Ok(Err(MISSING_LEAD_DATA));
        };

        let session_id: String = context
            .get(session_keys::SESSION_ID)
            .await
            .unwrap_or_default();
        let phone = phone_from_session(&session_id);

        if let Some(existing) = self
            .booking
            .find_lead_by_phone(&phone)
            .await
            .map_err(step_failed)?
        {
            info!(lead_id = %existing.id, "reusing existing lead");
            return Ok(Ok(existing.id));
        }

        let mut parts = name.split_whitespace();
        let first = parts.next().unwrap_or_default().to_string();
        let rest = parts.collect::<Vec<_>>().join(" ");
        let last = if rest.is_empty() { first.clone() } else { rest };

        match self
            .booking
            .create_lead(
                &first,
                &last,
                &phone,
                Some(&email),
                Some(&interest),
                Some("Lead capturado via chat web"),
            )
            .await
        {
            Ok(lead) => Ok(Ok(lead.id)),
            Err(BookingError::DuplicateContact(_)) => {
                // Lost a creation race; the record exists now
                let lead = self
                    .booking
                    .find_lead_by_phone(&phone)
                    .await
                    .map_err(step_failed)?
                    .ok_or_else(|| {
                        FlowError::StepFailed(
                            "lead missing after duplicate-contact rejection".to_string(),
                        )
                    })?;
                Ok(Ok(lead.id))
            }
            Err(err) => {
                error!(error = %err, "failed to create lead");
                Ok(Err(LEAD_CREATE_FAILED))
            }
        }
    }
}

#[async_trait]
impl StepHandler<Step> for AppointmentCreatorStep {
    fn step(&self) -> Step {
        Step::CreatingAppointment
    }

    async fn run(&self, context: Context) -> Result<StepResult<Step>> {
        let mut state = ConversationState::load(&context).await;

        // Exact match uses the requested time; otherwise a chosen alternative
        let final_at = if state.slot_available.is_yes() {
            state.requested_datetime
        } else {
            state.chosen_slot
        };
        let Some(scheduled_at) = final_at else {
            warn!("appointment creation reached without a resolved timestamp");
            return Ok(StepResult::new(
                Some(ASK_FOR_DATETIME.to_string()),
                StepOutcome::WaitAt(Step::CollectingDatetime),
            ));
        };

        let lead_id = match self.resolve_lead(&context, &state).await? {
            Ok(lead_id) => lead_id,
            Err(message) => {
                return Ok(StepResult::new(
                    Some(message.to_string()),
                    StepOutcome::WaitAt(Step::CollectingLead),
                ));
            }
        };

        match self
            .booking
            .book_for_lead(
                lead_id,
                scheduled_at,
                MEETING_DURATION_MINUTES,
                Some(MEETING_TYPE),
                Some("Agendamento via chat web"),
            )
            .await
        {
            Ok((appointment, rescheduled)) => {
                info!(
                    appointment_id = %appointment.id,
                    %scheduled_at,
                    rescheduled,
                    "appointment booked"
                );
                state.lead_id = Some(lead_id);
                state.appointment_id = Some(appointment.id);
                state.appointment_confirmed = true;
                state.rescheduled = rescheduled;
                state.save(&context).await;
                Ok(StepResult::with_status(
                    None,
                    StepOutcome::Chain(Step::Confirming),
                    format!("appointment created for {scheduled_at}"),
                ))
            }
            Err(BookingError::SlotTaken(_)) => {
                // Taken between slot check and insert: degrade exactly like
                // an unavailable slot
                warn!(%scheduled_at, "slot taken at insert time");
                let date = scheduled_at.date();
                let time = scheduled_at.time();
                let alternatives = self
                    .availability
                    .nearest_alternatives(date, time)
                    .await
                    .map_err(step_failed)?;

                state.lead_id = Some(lead_id);
                state.slot_available = Tri::No;
                state.requested_datetime = None;
                state.chosen_slot = None;
                state.last_requested_date = Some(date);
                state.save(&context).await;

                Ok(StepResult::new(
                    Some(alternatives_message(date, time, &alternatives)),
                    StepOutcome::WaitAt(Step::CollectingDatetime),
                ))
            }
            Err(err) => {
                error!(error = %err, "failed to create appointment");
                state.lead_id = Some(lead_id);
                state.requested_datetime = None;
                state.chosen_slot = None;
                state.save(&context).await;
                Ok(StepResult::new(
                    Some(BOOKING_FAILED.to_string()),
                    StepOutcome::WaitAt(Step::CollectingDatetime),
                ))
            }
        }
    }
}
