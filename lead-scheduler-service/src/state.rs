use chrono::{NaiveDate, NaiveDateTime};
use dialogue_flow::Context;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Context keys shared across steps
pub mod session_keys {
    pub const USER_INPUT: &str = "user_input";
    pub const SESSION_ID: &str = "session_id";
    pub const CONVERSATION_STATE: &str = "conversation_state";
}

/// Coarse phase of the conversation, used for entry routing and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Idle,
    Qualifying,
    Answering,
    Scheduling,
    Completed,
    ReturningWithAppointment,
    ReturningWithoutAppointment,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Idle => "idle",
            Mode::Qualifying => "qualifying",
            Mode::Answering => "answering",
            Mode::Scheduling => "scheduling",
            Mode::Completed => "completed",
            Mode::ReturningWithAppointment => "returning_with_appointment",
            Mode::ReturningWithoutAppointment => "returning_without_appointment",
        }
    }
}

/// Three-valued answer: starts Unknown, becomes Yes/No exactly once per
/// attempt and is reset explicitly, never a nullable bool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tri {
    #[default]
    Unknown,
    Yes,
    No,
}

impl Tri {
    pub fn is_yes(&self) -> bool {
        matches!(self, Tri::Yes)
    }

    pub fn is_no(&self) -> bool {
        matches!(self, Tri::No)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Tri::Unknown)
    }
}

impl From<bool> for Tri {
    fn from(value: bool) -> Self {
        if value { Tri::Yes } else { Tri::No }
    }
}

/// Accumulated conversation state, one record per session.
///
/// Each field is written by exactly one step handler; everything else only
/// reads it. Datetimes are naive values in the fixed business timezone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    pub mode: Mode,

    // Presentation
    pub presentation_done: bool,

    // Qualification
    pub permission_asked: bool,
    pub permission_granted: Tri,

    // Lead fields
    pub lead_name: Option<String>,
    pub lead_email: Option<String>,
    pub lead_interest: Option<String>,
    pub lead_collection_complete: bool,

    // Scheduling
    pub asked_to_schedule: bool,
    pub wants_to_schedule: Tri,
    pub requested_datetime: Option<NaiveDateTime>,
    pub last_requested_date: Option<NaiveDate>,
    pub slot_available: Tri,
    pub chosen_slot: Option<NaiveDateTime>,

    // Booking outcome
    pub lead_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    pub appointment_confirmed: bool,
    pub rescheduled: bool,
}

impl ConversationState {
    pub async fn load(context: &Context) -> Self {
        context
            .get(session_keys::CONVERSATION_STATE)
            .await
            .unwrap_or_default()
    }

    /// Synchronous read for routing predicates
    pub fn load_sync(context: &Context) -> Self {
        context
            .get_sync(session_keys::CONVERSATION_STATE)
            .unwrap_or_default()
    }

    pub async fn save(&self, context: &Context) {
        context.set(session_keys::CONVERSATION_STATE, self).await;
    }

    /// First word of the lead name, used in user-facing copy
    pub fn first_name(&self) -> Option<&str> {
        self.lead_name
            .as_deref()
            .and_then(|name| name.split_whitespace().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_roundtrip_through_context() {
        let context = Context::new();
        let mut state = ConversationState::load(&context).await;
        assert_eq!(state.mode, Mode::Idle);
        assert!(state.wants_to_schedule.is_unknown());

        state.lead_name = Some("Maria Clara Souza".to_string());
        state.wants_to_schedule = Tri::Yes;
        state.mode = Mode::Scheduling;
        state.save(&context).await;

        let restored = ConversationState::load(&context).await;
        assert_eq!(restored.first_name(), Some("Maria"));
        assert!(restored.wants_to_schedule.is_yes());
        assert_eq!(restored.mode, Mode::Scheduling);
    }
}
