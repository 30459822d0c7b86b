// Conversation step handlers, one per dialogue phase
pub mod answering;
pub mod appointment_creator;
pub mod confirmation;
pub mod datetime_collector;
pub mod greeting;
pub mod lead_collector;
pub mod schedule_offer;
pub mod slot_checker;

pub use answering::AnsweringStep;
pub use appointment_creator::AppointmentCreatorStep;
pub use confirmation::ConfirmationStep;
pub use datetime_collector::DatetimeCollectorStep;
pub use greeting::GreetingStep;
pub use lead_collector::LeadCollectorStep;
pub use schedule_offer::{OfferDefault, ScheduleOfferStep};
pub use slot_checker::SlotCheckerStep;

use dialogue_flow::{Context, FlowError};

use crate::state::session_keys;

/// Prompt reused wherever the flow needs a (new) date and time from the user
pub(crate) const ASK_FOR_DATETIME: &str = "Ótimo! Qual data e horário você prefere? \
    Atendemos Segunda a Sexta, das 9h às 12h e das 14h às 18h.";

pub(crate) async fn user_input(context: &Context) -> Result<String, FlowError> {
    context
        .get(session_keys::USER_INPUT)
        .await
        .ok_or_else(|| FlowError::ContextError("user_input not found".to_string()))
}

pub(crate) fn step_failed(err: impl std::fmt::Display) -> FlowError {
    FlowError::StepFailed(err.to_string())
}
