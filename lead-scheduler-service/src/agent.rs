use std::sync::Arc;

use dialogue_flow::{
    Context, DialogueEngine, DialogueSession, EntryRouter, Result, SessionGuard, SessionStorage,
    StepKey,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::nlu::LanguageService;
use crate::scheduling::{Availability, BookingService};
use crate::state::{ConversationState, Mode, Tri, session_keys};
use crate::steps::{
    AnsweringStep, AppointmentCreatorStep, ConfirmationStep, DatetimeCollectorStep, GreetingStep,
    LeadCollectorStep, ScheduleOfferStep, SlotCheckerStep,
};

const FALLBACK_REPLY: &str =
    "Desculpe, não consegui processar sua mensagem. Pode tentar novamente?";

/// The closed set of conversation steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Greeting,
    Answering,
    CollectingLead,
    OfferingSchedule,
    CollectingDatetime,
    CheckingSlot,
    CreatingAppointment,
    Confirming,
}

impl StepKey for Step {
    fn is_wait_point(&self) -> bool {
        // Slot checking and appointment creation are reached only by
        // chaining and never consume user input
        !matches!(self, Step::CheckingSlot | Step::CreatingAppointment)
    }

    fn recovery_point(&self) -> Self {
        match self {
            Step::CheckingSlot => Step::CollectingDatetime,
            Step::CreatingAppointment => Step::Confirming,
            other => *other,
        }
    }
}

/// Entry-step selection per turn, keyed by the persisted step and the
/// accumulated conversation state
pub struct Dispatcher;

impl EntryRouter<Step> for Dispatcher {
    fn entry_step(&self, persisted: Option<Step>, context: &Context) -> Step {
        let state = ConversationState::load_sync(context);

        // A completed conversation starts over from the greeting, which also
        // handles cancellation requests against the booked appointment
        if state.mode == Mode::Completed {
            return Step::Greeting;
        }

        match persisted {
            None | Some(Step::Greeting) => {
                if !state.presentation_done {
                    return Step::Greeting;
                }
                if state.lead_collection_complete {
                    return match state.wants_to_schedule {
                        Tri::Yes => Step::CollectingDatetime,
                        Tri::No => Step::Confirming,
                        Tri::Unknown => Step::OfferingSchedule,
                    };
                }
                Step::Answering
            }
            Some(Step::Answering) => {
                if state.lead_collection_complete {
                    Step::OfferingSchedule
                } else if state.permission_granted.is_yes() {
                    Step::CollectingLead
                } else {
                    // Permission pending or refused: keep answering
                    Step::Answering
                }
            }
            Some(Step::CollectingLead) => {
                if state.lead_collection_complete {
                    Step::OfferingSchedule
                } else {
                    Step::CollectingLead
                }
            }
            Some(Step::OfferingSchedule) => Step::OfferingSchedule,
            Some(Step::CollectingDatetime) => Step::CollectingDatetime,
            // Internal-only steps should never be persisted; route to their
            // wait-for-input ancestors
            Some(Step::CheckingSlot) => Step::CollectingDatetime,
            Some(Step::CreatingAppointment) => Step::Confirming,
            Some(Step::Confirming) => Step::Greeting,
        }
    }
}

/// Reply of one conversation turn
#[derive(Debug, Clone)]
pub struct TurnReply {
    pub outbound_text: String,
    pub mode: Mode,
}

/// Single entry point of the conversational assistant: serializes turns per
/// session, drives the dialogue engine and persists the session around each
/// turn.
pub struct ChatAgent {
    engine: DialogueEngine<Step>,
    sessions: Arc<dyn SessionStorage<Step>>,
    guard: SessionGuard,
}

impl ChatAgent {
    pub fn new(
        sessions: Arc<dyn SessionStorage<Step>>,
        booking: Arc<BookingService>,
        availability: Arc<Availability>,
        nlu: Arc<dyn LanguageService>,
    ) -> Self {
        let engine = DialogueEngine::new(Arc::new(Dispatcher))
            .register(Arc::new(GreetingStep::new(booking.clone())))
            .register(Arc::new(AnsweringStep::new(nlu.clone())))
            .register(Arc::new(LeadCollectorStep))
            .register(Arc::new(ScheduleOfferStep::new()))
            .register(Arc::new(DatetimeCollectorStep::new(nlu)))
            .register(Arc::new(SlotCheckerStep::new(availability.clone())))
            .register(Arc::new(AppointmentCreatorStep::new(booking, availability)))
            .register(Arc::new(ConfirmationStep));

        Self {
            engine,
            sessions,
            guard: SessionGuard::new(),
        }
    }

    /// Process one inbound message. The session guard is held for the whole
    /// load → execute → save cycle, including all chained steps.
    pub async fn handle_turn(&self, session_id: &str, user_text: &str) -> Result<TurnReply> {
        let _lock = self.guard.acquire(session_id).await;

        let mut session = match self.sessions.load(session_id).await? {
            Some(session) => session,
            None => {
                info!(%session_id, "creating new session");
                DialogueSession::new(session_id)
            }
        };

        session
            .context
            .set(session_keys::USER_INPUT, user_text)
            .await;
        session
            .context
            .set(session_keys::SESSION_ID, session_id)
            .await;

        let outcome = self.engine.run_turn(&mut session).await?;
        let state = ConversationState::load(&session.context).await;
        self.sessions.save(session).await?;

        let outbound_text = if outcome.messages.is_empty() {
            FALLBACK_REPLY.to_string()
        } else {
            outcome.messages.join("\n\n")
        };

        Ok(TurnReply {
            outbound_text,
            mode: state.mode,
        })
    }

    /// Discard the persisted session. Idempotent: resetting an unknown
    /// session is a no-op.
    pub async fn reset_session(&self, session_id: &str) -> Result<()> {
        let _lock = self.guard.acquire(session_id).await;
        self.sessions.delete(session_id).await?;
        self.guard.forget(session_id);
        info!(%session_id, "session reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlu::testing::StubLanguageService;
    use crate::scheduling::{
        InMemoryAppointmentStore, InMemoryLeadStore, business_now,
    };
    use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
    use dialogue_flow::InMemorySessionStorage;

    struct Harness {
        agent: ChatAgent,
        booking: Arc<BookingService>,
        sessions: Arc<InMemorySessionStorage<Step>>,
    }

    fn harness_with(nlu: Arc<dyn LanguageService>) -> Harness {
        let appointments = Arc::new(InMemoryAppointmentStore::new());
        let leads = Arc::new(InMemoryLeadStore::new());
        let booking = Arc::new(BookingService::new(appointments.clone(), leads));
        let availability = Arc::new(Availability::new(appointments));
        let sessions: Arc<InMemorySessionStorage<Step>> = Arc::new(InMemorySessionStorage::new());

        let agent = ChatAgent::new(sessions.clone(), booking.clone(), availability, nlu);
        Harness {
            agent,
            booking,
            sessions,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(StubLanguageService::default()))
    }

    impl Harness {
        async fn say(&self, session: &str, text: &str) -> TurnReply {
            self.agent.handle_turn(session, text).await.unwrap()
        }

        async fn state(&self, session: &str) -> ConversationState {
            let session = self.sessions.load(session).await.unwrap().unwrap();
            ConversationState::load(&session.context).await
        }

        async fn persisted_step(&self, session: &str) -> Step {
            let session = self.sessions.load(session).await.unwrap().unwrap();
            session.current_step.unwrap()
        }

        /// Drives a fresh session through qualification up to the point where
        /// a date is being asked for
        async fn drive_to_datetime(&self, session: &str) {
            self.say(session, "Oi").await;
            self.say(session, "quero agendar uma reunião").await;
            self.say(session, "Maria Clara Souza").await;
            self.say(session, "maria@ex.com").await;
            self.say(session, "Preciso de mais clientes para minha clínica")
                .await;
            self.say(session, "sim, pode ser").await;
        }
    }

    /// First weekday of the given kind at least a week out, so slots on it
    /// are always in the future
    fn next_weekday(target: Weekday) -> NaiveDate {
        let mut date = business_now().date() + Duration::days(7);
        while date.weekday() != target {
            date += Duration::days(1);
        }
        date
    }

    fn dmy(date: NaiveDate) -> String {
        date.format("%d/%m/%Y").to_string()
    }

    #[tokio::test]
    async fn test_full_booking_flow() {
        let h = harness();
        let s = "flow-session";

        let reply = h.say(s, "Oi").await;
        assert!(reply.outbound_text.contains("agente virtual"));

        let reply = h.say(s, "Quais serviços vocês oferecem?").await;
        assert!(reply.outbound_text.contains("Posso te fazer algumas perguntas"));
        assert_eq!(reply.mode, Mode::Qualifying);

        let reply = h.say(s, "sim").await;
        assert!(reply.outbound_text.contains("nome completo"));
        assert_eq!(h.persisted_step(s).await, Step::CollectingLead);

        let reply = h.say(s, "Maria Clara Souza").await;
        assert!(reply.outbound_text.contains("email"));

        let reply = h.say(s, "maria@ex.com").await;
        assert!(reply.outbound_text.contains("interesse"));

        // Third field: the completion ack and the scheduling question arrive
        // in the same turn
        let reply = h
            .say(s, "Preciso de mais clientes para minha clínica")
            .await;
        assert!(reply.outbound_text.contains("Perfeito, Maria!"));
        assert!(reply.outbound_text.contains("Quer agendar uma reunião"));
        assert_eq!(reply.mode, Mode::Scheduling);

        let state = h.state(s).await;
        assert_eq!(state.lead_name.as_deref(), Some("Maria Clara Souza"));
        assert_eq!(state.lead_email.as_deref(), Some("maria@ex.com"));
        assert!(state.lead_collection_complete);

        let reply = h.say(s, "sim, pode ser").await;
        assert!(reply.outbound_text.contains("Qual data e horário"));
        assert_eq!(h.persisted_step(s).await, Step::CollectingDatetime);

        let tuesday = next_weekday(Weekday::Tue);
        let reply = h.say(s, &format!("{} às 10h", dmy(tuesday))).await;
        assert!(reply.outbound_text.contains("confirmado"));
        assert_eq!(reply.mode, Mode::Completed);

        // Exactly one pending appointment at the requested slot
        let appointments = h.booking.list_all(None).await.unwrap();
        let active: Vec<_> = appointments.iter().filter(|a| a.is_active()).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(
            active[0].scheduled_at,
            tuesday.and_time(NaiveTime::from_hms_opt(10, 0, 0).unwrap())
        );

        // The persisted step is always a wait point from the closed set
        assert!(h.persisted_step(s).await.is_wait_point());
    }

    #[tokio::test]
    async fn test_out_of_order_email_before_name() {
        let h = harness();
        let s = "out-of-order";

        h.say(s, "Oi").await;
        h.say(s, "quero agendar uma reunião").await;

        // Email arrives first: it must land in the email slot
        let reply = h.say(s, "maria@ex.com").await;
        assert!(reply.outbound_text.contains("nome completo"));
        let state = h.state(s).await;
        assert_eq!(state.lead_email.as_deref(), Some("maria@ex.com"));
        assert!(state.lead_name.is_none());

        h.say(s, "Maria Clara Souza").await;
        let reply = h
            .say(s, "Preciso de mais clientes para minha clínica")
            .await;
        assert_eq!(reply.mode, Mode::Scheduling);

        let state = h.state(s).await;
        assert_eq!(state.lead_name.as_deref(), Some("Maria Clara Souza"));
        assert_eq!(state.lead_email.as_deref(), Some("maria@ex.com"));
        assert_eq!(
            state.lead_interest.as_deref(),
            Some("Preciso de mais clientes para minha clínica")
        );
    }

    #[tokio::test]
    async fn test_decline_ends_with_farewell() {
        let h = harness();
        let s = "decline";

        h.say(s, "Oi").await;
        h.say(s, "quero agendar uma reunião").await;
        h.say(s, "Maria Clara Souza").await;
        h.say(s, "maria@ex.com").await;
        h.say(s, "Preciso de mais clientes para minha clínica").await;

        let reply = h.say(s, "agora não, obrigada").await;
        assert!(reply.outbound_text.contains("Sem problemas, Maria!"));
        assert_eq!(reply.mode, Mode::Completed);
        assert!(h.booking.list_all(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_datetime_validation_rejections() {
        let h = harness();
        let s = "validation";
        h.drive_to_datetime(s).await;

        // Past datetime
        let reply = h.say(s, "10/01/2025 10:00").await;
        assert!(reply.outbound_text.contains("já passou"));
        assert_eq!(h.persisted_step(s).await, Step::CollectingDatetime);

        // Weekend
        let saturday = next_weekday(Weekday::Sat);
        let reply = h.say(s, &format!("{} às 10h", dmy(saturday))).await;
        assert!(reply.outbound_text.contains("fim de semana"));

        // Lunch break
        let tuesday = next_weekday(Weekday::Tue);
        let reply = h.say(s, &format!("{} às 13h", dmy(tuesday))).await;
        assert!(reply.outbound_text.contains("fora do nosso expediente"));

        // Valid future Tuesday 10:00
        let reply = h.say(s, &format!("{} às 10h", dmy(tuesday))).await;
        assert!(reply.outbound_text.contains("confirmado"));
    }

    #[tokio::test]
    async fn test_occupied_slot_offers_alternatives_and_books_follow_up() {
        let h = harness();
        let s = "alternatives";
        let tuesday = next_weekday(Weekday::Tue);
        let ten = NaiveTime::from_hms_opt(10, 0, 0).unwrap();

        // Another lead already holds Tuesday 10:00
        let other = h
            .booking
            .create_lead("Outro", "Cliente", "web-outro", None, None, None)
            .await
            .unwrap();
        h.booking
            .create_appointment(other.id, tuesday.and_time(ten), 40, None, None)
            .await
            .unwrap();

        h.drive_to_datetime(s).await;
        let reply = h.say(s, &format!("{} às 10h", dmy(tuesday))).await;
        assert!(reply.outbound_text.contains("não está disponível"));
        assert!(reply.outbound_text.contains("09h"));
        assert_eq!(h.persisted_step(s).await, Step::CollectingDatetime);

        let state = h.state(s).await;
        assert_eq!(state.last_requested_date, Some(tuesday));
        assert!(state.requested_datetime.is_none());
        assert!(state.slot_available.is_no());

        // A bare time picks an alternative on the remembered date
        let reply = h.say(s, "9h").await;
        assert!(reply.outbound_text.contains("confirmado"));

        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let active: Vec<_> = h
            .booking
            .list_all(None)
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.is_active())
            .collect();
        assert_eq!(active.len(), 2); // the other lead's plus ours
        assert!(active.iter().any(|a| a.scheduled_at == tuesday.and_time(nine)));
    }

    #[tokio::test]
    async fn test_reschedule_keeps_one_active_appointment() {
        let h = harness();
        let s = "reschedule";
        let tuesday = next_weekday(Weekday::Tue);

        h.drive_to_datetime(s).await;
        h.say(s, &format!("{} às 10h", dmy(tuesday))).await;

        // Returning on the same session: scheduling intent restarts the flow
        let reply = h.say(s, "quero remarcar a reunião").await;
        assert!(reply.outbound_text.contains("nome completo"));

        // Collection is still complete, so the accept lands on the standing
        // offer and the flow asks for a date
        let reply = h.say(s, "ok").await;
        assert!(reply.outbound_text.contains("Qual data e horário"));

        let reply = h.say(s, &format!("{} às 11h", dmy(tuesday))).await;
        assert!(reply.outbound_text.contains("remarcada"));

        let eleven = NaiveTime::from_hms_opt(11, 0, 0).unwrap();
        let appointments = h.booking.list_all(None).await.unwrap();
        let active: Vec<_> = appointments.iter().filter(|a| a.is_active()).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].scheduled_at, tuesday.and_time(eleven));
        // The original booking was cancelled, not silently dropped
        assert!(
            appointments
                .iter()
                .any(|a| a.status == crate::scheduling::AppointmentStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_cancellation_request_after_booking() {
        let h = harness();
        let s = "cancellation";
        let tuesday = next_weekday(Weekday::Tue);

        h.drive_to_datetime(s).await;
        h.say(s, &format!("{} às 10h", dmy(tuesday))).await;

        let reply = h.say(s, "preciso cancelar a reunião").await;
        assert!(reply.outbound_text.contains("cancelado"));
        assert_eq!(reply.mode, Mode::Idle);

        let state = h.state(s).await;
        assert!(!state.appointment_confirmed);
        assert!(state.appointment_id.is_none());

        let active: Vec<_> = h
            .booking
            .list_all(None)
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.is_active())
            .collect();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn test_reset_session_is_idempotent_and_leak_free() {
        let h = harness();
        let s = "reset";

        h.say(s, "Oi").await;
        h.say(s, "quero agendar uma reunião").await;
        h.say(s, "Maria Clara Souza").await;
        assert!(h.state(s).await.lead_name.is_some());

        h.agent.reset_session(s).await.unwrap();
        // Second reset is a no-op
        h.agent.reset_session(s).await.unwrap();

        // A fresh turn behaves like a brand-new session: presentation again,
        // no leaked lead name
        let reply = h.say(s, "Oi").await;
        assert!(reply.outbound_text.contains("agente virtual"));
        let state = h.state(s).await;
        assert!(state.lead_name.is_none());
        assert!(state.permission_granted.is_unknown());
    }

    #[tokio::test]
    async fn test_recovery_from_persisted_internal_step() {
        let h = harness();
        let s = "recovery";

        // Simulate a session that crashed mid-chain with an internal-only
        // step persisted
        let mut session: DialogueSession<Step> = DialogueSession::new(s);
        session.current_step = Some(Step::CheckingSlot);
        h.sessions.save(session).await.unwrap();

        let reply = h.say(s, "qualquer coisa").await;
        // Recovered into datetime collection, which re-prompts
        assert!(reply.outbound_text.contains("data e horário"));
        assert_eq!(h.persisted_step(s).await, Step::CollectingDatetime);
    }

    #[tokio::test]
    async fn test_collaborator_failure_degrades_deterministically() {
        let h = harness_with(Arc::new(StubLanguageService { fail: true }));
        let s = "degraded";

        h.say(s, "Oi").await;
        // Q&A falls back to the canned answer plus the permission ask
        let reply = h.say(s, "Quais serviços vocês oferecem?").await;
        assert!(reply.outbound_text.contains("sistemas de aquisição de clientes"));
        assert!(reply.outbound_text.contains("Posso te fazer algumas perguntas"));

        // Keyword fallback still catches scheduling intent
        let reply = h.say(s, "quero agendar uma reunião").await;
        assert!(reply.outbound_text.contains("nome completo"));

        h.say(s, "Maria Clara Souza").await;
        h.say(s, "maria@ex.com").await;
        h.say(s, "Preciso de mais clientes para minha clínica").await;
        h.say(s, "sim").await;

        // Extraction failure without a parseable fallback: corrective
        // message, step unchanged
        let reply = h.say(s, "quinta de manhã").await;
        assert!(reply.outbound_text.contains("Pode repetir a data"));
        assert_eq!(h.persisted_step(s).await, Step::CollectingDatetime);

        // The narrow regex fallback books without the collaborator
        let tuesday = next_weekday(Weekday::Tue);
        let reply = h.say(s, &format!("{} às 10h", dmy(tuesday))).await;
        assert!(reply.outbound_text.contains("confirmado"));
    }

    #[tokio::test]
    async fn test_refusal_keeps_answering_without_reasking() {
        let h = harness();
        let s = "refusal";

        h.say(s, "Oi").await;
        let reply = h.say(s, "Quais serviços vocês oferecem?").await;
        assert!(reply.outbound_text.contains("Posso te fazer algumas perguntas"));

        // Refusal: answered without the permission ask
        let reply = h.say(s, "agora não").await;
        assert!(!reply.outbound_text.contains("Posso te fazer algumas perguntas"));
        assert_eq!(reply.mode, Mode::Answering);
        assert!(h.state(s).await.permission_granted.is_no());

        // Further questions keep being answered in place
        let reply = h.say(s, "Vocês trabalham com tráfego pago?").await;
        assert!(!reply.outbound_text.contains("Posso te fazer algumas perguntas"));
        assert_eq!(h.persisted_step(s).await, Step::Answering);
    }
}
