use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use dialogue_flow::{Context, Result, StepHandler, StepOutcome, StepResult};
use tracing::{info, warn};

use crate::agent::Step;
use crate::scheduling::Availability;
use crate::state::{ConversationState, Tri};

use super::{ASK_FOR_DATETIME, step_failed};

/// Checks the requested slot against the availability engine. An exact match
/// chains straight into appointment creation; otherwise the nearest
/// alternatives are offered and the flow returns to datetime collection.
pub struct SlotCheckerStep {
    availability: Arc<Availability>,
}

impl SlotCheckerStep {
    pub fn new(availability: Arc<Availability>) -> Self {
        Self { availability }
    }
}

pub(crate) fn format_slot(time: NaiveTime) -> String {
    time.format("%Hh").to_string()
}

pub(crate) fn alternatives_message(
    date: NaiveDate,
    requested: NaiveTime,
    alternatives: &[NaiveTime],
) -> String {
    let date_str = date.format("%d/%m");
    if alternatives.is_empty() {
        format!(
            "Não há horários disponíveis no dia {date_str}. 😕\n\n\
             Pode sugerir outra data? Atendemos Segunda a Sexta, das 9h às 12h e das 14h às 18h."
        )
    } else {
        let list = alternatives
            .iter()
            .map(|t| format_slot(*t))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Infelizmente o horário das {requested} não está disponível no dia {date_str}. 😕\n\n\
             Horários disponíveis mais próximos: **{list}**\n\n\
             Qual você prefere? Ou pode sugerir outra data!",
            requested = requested.format("%H:%M"),
        )
    }
}

#[async_trait]
impl StepHandler<Step> for SlotCheckerStep {
    fn step(&self) -> Step {
        Step::CheckingSlot
    }

    async fn run(&self, context: Context) -> Result<StepResult<Step>> {
        let mut state = ConversationState::load(&context).await;

        let Some(requested) = state.requested_datetime else {
            warn!("slot check reached without a requested datetime");
            return Ok(StepResult::new(
                Some(ASK_FOR_DATETIME.to_string()),
                StepOutcome::WaitAt(Step::CollectingDatetime),
            ));
        };

        let date = requested.date();
        let time = requested.time();
        let slots = self
            .availability
            .slots_for(date)
            .await
            .map_err(step_failed)?;

        if slots.contains(&time) {
            info!(%requested, "slot available");
            state.slot_available = Tri::Yes;
            state.save(&context).await;
            return Ok(StepResult::with_status(
                None,
                StepOutcome::Chain(Step::CreatingAppointment),
                format!("slot {requested} available, creating appointment"),
            ));
        }

        let alternatives = self
            .availability
            .nearest_alternatives(date, time)
            .await
            .map_err(step_failed)?;
        info!(%requested, ?alternatives, "slot unavailable, offering alternatives");

        // Remember the date as context for a follow-up attempt, drop the
        // rejected request
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
}
