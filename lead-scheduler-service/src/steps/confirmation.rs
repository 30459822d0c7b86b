use async_trait::async_trait;
use chrono::{Datelike, NaiveDateTime, Timelike};
use dialogue_flow::{Context, Result, StepHandler, StepOutcome, StepResult};
use tracing::info;

use crate::agent::Step;
use crate::state::{ConversationState, Mode};

use super::user_input;

const WEEKDAY_NAMES: [&str; 7] = [
    "Segunda", "Terça", "Quarta", "Quinta", "Sexta", "Sábado", "Domingo",
];

fn weekday_name(datetime: NaiveDateTime) -> &'static str {
    WEEKDAY_NAMES[datetime.weekday().num_days_from_monday() as usize]
}

fn format_datetime(datetime: NaiveDateTime) -> String {
    if datetime.minute() > 0 {
        datetime.format("%d/%m/%Y às %Hh%M").to_string()
    } else {
        datetime.format("%d/%m/%Y às %Hh").to_string()
    }
}

/// The booking attempt is over; its scratch fields must not leak into a
/// later attempt on the same session
fn clear_attempt(state: &mut ConversationState) {
    state.requested_datetime = None;
    state.chosen_slot = None;
    state.slot_available = crate::state::Tri::Unknown;
    state.last_requested_date = None;
}

/// Final message of the flow: farewell when the visitor declined, booking
/// confirmation (with a reschedule variant) otherwise. Always leaves the
/// conversation completed.
pub struct ConfirmationStep;

#[async_trait]
impl StepHandler<Step> for ConfirmationStep {
    fn step(&self) -> Step {
        Step::Confirming
    }

    async fn run(&self, context: Context) -> Result<StepResult<Step>> {
        // Consume the input slot even though this step never parses it
        let _ = user_input(&context).await;
        let mut state = ConversationState::load(&context).await;

        if state.wants_to_schedule.is_no() {
            let first = state.first_name().unwrap_or("Você").to_string();
            state.mode = Mode::Completed;
            clear_attempt(&mut state);
            state.save(&context).await;
            info!("visitor declined scheduling, closing conversation");
            return Ok(StepResult::with_status(
                Some(format!(
                    "Sem problemas, {first}! 😊\n\n\
                     Quando quiser conversar sobre estratégias de marketing digital, \
                     é só voltar aqui. Estamos à disposição!\n\n\
                     Até mais! 👋"
                )),
                StepOutcome::Complete,
                "conversation completed without booking",
            ));
        }

        let first = state.first_name().unwrap_or("Cliente").to_string();
        let final_at = state.requested_datetime.or(state.chosen_slot);
        let (formatted, weekday) = match final_at {
            Some(datetime) => (format_datetime(datetime), weekday_name(datetime)),
            None => (String::new(), ""),
        };

        let message = if state.rescheduled {
            format!(
                "Pronto, {first}! Sua reunião foi remarcada com sucesso 🎉\n\n\
                 📅 {weekday}, {formatted}\n\
                 ⏱️ Duração: 40 minutos\n\
                 💻 Google Meet (link enviado por email)\n\n\
                 Qualquer coisa, é só chamar!"
            )
        } else {
            format!(
                "Pronto, {first}! 🎉\n\n\
                 Seu agendamento está confirmado para {formatted}!\n\n\
                 Em breve você receberá o link do Google Meet por email.\n\n\
                 📅 {weekday}, {formatted}\n\
                 ⏱️ Duração: 40 minutos\n\
                 💻 Google Meet\n\n\
                 Nos vemos em breve!"
            )
        };

        state.mode = Mode::Completed;
        clear_attempt(&mut state);
        state.save(&context).await;
        info!("conversation completed with booking");

        Ok(StepResult::with_status(
            Some(message),
            StepOutcome::Complete,
            "conversation completed with booking",
        ))
    }
}
