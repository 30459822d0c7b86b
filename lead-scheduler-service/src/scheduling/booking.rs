use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use super::models::{Appointment, AppointmentStatus, Lead, block_tags, business_now};
use super::store::{AppointmentStore, LeadStore};

const RESCHEDULE_REASON: &str = "Remarcado pelo cliente via chat";

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("lead not found: {0}")]
    LeadNotFound(Uuid),

    #[error("appointment not found: {0}")]
    AppointmentNotFound(Uuid),

    #[error("cannot schedule in the past: {0}")]
    PastTimestamp(NaiveDateTime),

    #[error("slot already taken: {0}")]
    SlotTaken(NaiveDateTime),

    #[error("appointment already cancelled: {0}")]
    AlreadyCancelled(Uuid),

    #[error("cancelled appointments cannot change status: {0}")]
    CancelledIsTerminal(Uuid),

    #[error("cannot complete an appointment that has not happened yet: {0}")]
    CompletionBeforeMeeting(Uuid),

    #[error("contact already registered: {0}")]
    DuplicateContact(String),

    #[error("store error: {0}")]
    Store(String),
}

/// Half-day scope for administrative blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shift {
    Morning,
    Afternoon,
}

impl Shift {
    fn tag(&self) -> &'static str {
        match self {
            Shift::Morning => block_tags::MORNING,
            Shift::Afternoon => block_tags::AFTERNOON,
        }
    }
}

/// Owns the appointment lifecycle: creation, cancellation, rescheduling,
/// status transitions and administrative blocks. Step handlers request
/// transitions through it and never touch the stores directly.
pub struct BookingService {
    appointments: Arc<dyn AppointmentStore>,
    leads: Arc<dyn LeadStore>,
}

impl BookingService {
    pub fn new(appointments: Arc<dyn AppointmentStore>, leads: Arc<dyn LeadStore>) -> Self {
        Self {
            appointments,
            leads,
        }
    }

    /// Create a pending appointment. Validates the lead, rejects past
    /// timestamps, and relies on the store for the atomic exact-timestamp
    /// conflict check — re-validated here at insert time, not only at
    /// slot-check time.
    pub async fn create_appointment(
        &self,
        lead_id: Uuid,
        scheduled_at: NaiveDateTime,
        duration_minutes: u32,
        meeting_type: Option<&str>,
        notes: Option<&str>,
    ) -> Result<Appointment, BookingError> {
        if self.leads.get(lead_id).await?.is_none() {
            return Err(BookingError::LeadNotFound(lead_id));
        }
        if scheduled_at <= business_now() {
            return Err(BookingError::PastTimestamp(scheduled_at));
        }

        let appointment = Appointment {
            id: Uuid::new_v4(),
            lead_id: Some(lead_id),
            scheduled_at,
            duration_minutes,
            meeting_type: meeting_type.map(str::to_string),
            status: AppointmentStatus::Pending,
            notes: notes.map(str::to_string),
            cancelled_at: None,
            cancellation_reason: None,
            created_at: business_now(),
        };

        let appointment = self.appointments.insert_if_slot_free(appointment).await?;
        info!(appointment_id = %appointment.id, %scheduled_at, "appointment created");
        Ok(appointment)
    }

    /// Cancel an appointment, recording reason and timestamp. Cancelling an
    /// already-cancelled appointment is rejected.
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        reason: &str,
    ) -> Result<Appointment, BookingError> {
        let mut appointment = self
            .appointments
            .get(appointment_id)
            .await?
            .ok_or(BookingError::AppointmentNotFound(appointment_id))?;

        if appointment.status == AppointmentStatus::Cancelled {
            return Err(BookingError::AlreadyCancelled(appointment_id));
        }

        appointment.status = AppointmentStatus::Cancelled;
        appointment.cancelled_at = Some(business_now());
        appointment.cancellation_reason = Some(reason.to_string());
        self.appointments.update(appointment.clone()).await?;

        info!(appointment_id = %appointment_id, reason, "appointment cancelled");
        Ok(appointment)
    }

    /// Update an appointment status. Cancelled is terminal, and a meeting
    /// cannot be completed before it happens.
    pub async fn update_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Appointment, BookingError> {
        let mut appointment = self
            .appointments
            .get(appointment_id)
            .await?
            .ok_or(BookingError::AppointmentNotFound(appointment_id))?;

        if appointment.status == AppointmentStatus::Cancelled {
            return Err(BookingError::CancelledIsTerminal(appointment_id));
        }
        if status == AppointmentStatus::Completed && appointment.scheduled_at > business_now() {
            return Err(BookingError::CompletionBeforeMeeting(appointment_id));
        }

        appointment.status = status;
        self.appointments.update(appointment.clone()).await?;
        Ok(appointment)
    }

    pub async fn list_by_lead(&self, lead_id: Uuid) -> Result<Vec<Appointment>, BookingError> {
        self.appointments.list_by_lead(lead_id).await
    }

    pub async fn list_all(
        &self,
        status: Option<AppointmentStatus>,
    ) -> Result<Vec<Appointment>, BookingError> {
        let mut appointments = self.appointments.list_all().await?;
        if let Some(status) = status {
            appointments.retain(|a| a.status == status);
        }
        Ok(appointments)
    }

    /// Active (pending or confirmed) appointments for a lead
    pub async fn active_appointments(
        &self,
        lead_id: Uuid,
    ) -> Result<Vec<Appointment>, BookingError> {
        let mut appointments = self.appointments.list_by_lead(lead_id).await?;
        appointments.retain(Appointment::is_active);
        Ok(appointments)
    }

    /// Book a slot for a lead, cancelling any active appointment first so at
    /// most one pending/confirmed appointment exists per lead. Returns the
    /// new appointment and whether this was a reschedule.
    pub async fn book_for_lead(
        &self,
        lead_id: Uuid,
        scheduled_at: NaiveDateTime,
        duration_minutes: u32,
        meeting_type: Option<&str>,
        notes: Option<&str>,
    ) -> Result<(Appointment, bool), BookingError> {
        let active = self.active_appointments(lead_id).await?;
        let rescheduled = !active.is_empty();

        for previous in active {
            info!(appointment_id = %previous.id, "cancelling previous appointment for reschedule");
            self.cancel_appointment(previous.id, RESCHEDULE_REASON).await?;
        }

        let appointment = self
            .create_appointment(lead_id, scheduled_at, duration_minutes, meeting_type, notes)
            .await?;
        Ok((appointment, rescheduled))
    }

    /// Create a lead, rejecting duplicate phone contacts
    pub async fn create_lead(
        &self,
        first_name: &str,
        last_name: &str,
        phone: &str,
        email: Option<&str>,
        need: Option<&str>,
        notes: Option<&str>,
    ) -> Result<Lead, BookingError> {
        let lead = Lead {
            id: Uuid::new_v4(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            phone: phone.to_string(),
            email: email.map(str::to_string),
            need: need.map(str::to_string),
            notes: notes.map(str::to_string),
            created_at: business_now(),
        };
        let lead = self.leads.create(lead).await?;
        info!(lead_id = %lead.id, phone = %lead.phone, "lead created");
        Ok(lead)
    }

    pub async fn find_lead_by_phone(&self, phone: &str) -> Result<Option<Lead>, BookingError> {
        self.leads.find_by_phone(phone).await
    }

    pub async fn get_lead(&self, lead_id: Uuid) -> Result<Option<Lead>, BookingError> {
        self.leads.get(lead_id).await
    }

    pub async fn list_leads(&self) -> Result<Vec<Lead>, BookingError> {
        self.leads.list().await
    }

    /// Block a whole day with a marker appointment (no lead, cancelled
    /// status, reserved meeting-type tag)
    pub async fn block_full_day(&self, date: NaiveDate) -> Result<(), BookingError> {
        self.add_block_marker(date, block_tags::FULL_DAY, "Dia bloqueado administrativamente")
            .await
    }

    /// Block the morning or afternoon shift of a day
    pub async fn block_shift(&self, date: NaiveDate, shift: Shift) -> Result<(), BookingError> {
        let notes = match shift {
            Shift::Morning => "Manhã bloqueada administrativamente",
            Shift::Afternoon => "Tarde bloqueada administrativamente",
        };
        self.add_block_marker(date, shift.tag(), notes).await
    }

    /// Remove every block marker on the date, restoring its availability
    pub async fn unblock_date(&self, date: NaiveDate) -> Result<(), BookingError> {
        let day = self.appointments.list_on_date(date).await?;
        for marker in day.into_iter().filter(Appointment::is_block_marker) {
            self.appointments.remove(marker.id).await?;
        }
        info!(%date, "date unblocked");
        Ok(())
    }

    async fn add_block_marker(
        &self,
        date: NaiveDate,
        tag: &str,
        notes: &str,
    ) -> Result<(), BookingError> {
        let midnight = NaiveTime::from_hms_opt(0, 0, 0).expect("valid midnight");
        let marker = Appointment {
            id: Uuid::new_v4(),
            lead_id: None,
            scheduled_at: date.and_time(midnight),
            duration_minutes: 0,
            meeting_type: Some(tag.to_string()),
            status: AppointmentStatus::Cancelled,
            notes: Some(notes.to_string()),
            cancelled_at: None,
            cancellation_reason: None,
            created_at: business_now(),
        };
        self.appointments.add(marker).await?;
        info!(%date, tag, "block marker added");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::store::{InMemoryAppointmentStore, InMemoryLeadStore};
    use chrono::Duration;

    fn service() -> BookingService {
        BookingService::new(
            Arc::new(InMemoryAppointmentStore::new()),
            Arc::new(InMemoryLeadStore::new()),
        )
    }

    async fn lead(service: &BookingService, phone: &str) -> Lead {
        service
            .create_lead("Maria", "Souza", phone, Some("maria@ex.com"), None, None)
            .await
            .unwrap()
    }

    fn future_slot() -> NaiveDateTime {
        // Next occurrence of a weekday slot, far enough ahead to be future
        (business_now() + Duration::days(7))
            .date()
            .and_time(NaiveTime::from_hms_opt(10, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_double_booking_same_timestamp_conflicts() {
        let service = service();
        let first = lead(&service, "web-11111111").await;
        let second = lead(&service, "web-22222222").await;
        let at = future_slot();

        service
            .create_appointment(first.id, at, 40, None, None)
            .await
            .unwrap();
        let err = service
            .create_appointment(second.id, at, 40, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::SlotTaken(_)));

        // Exactly one active appointment holds the timestamp
        let active: Vec<_> = service
            .list_all(None)
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.scheduled_at == at && a.is_active())
            .collect();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_slot_can_be_rebooked() {
        let service = service();
        let first = lead(&service, "web-11111111").await;
        let second = lead(&service, "web-22222222").await;
        let at = future_slot();

        let appointment = service
            .create_appointment(first.id, at, 40, None, None)
            .await
            .unwrap();
        service
            .cancel_appointment(appointment.id, "mudou de ideia")
            .await
            .unwrap();

        service
            .create_appointment(second.id, at, 40, None, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reschedule_leaves_exactly_one_active() {
        let service = service();
        let maria = lead(&service, "web-11111111").await;
        let first_at = future_slot();
        let second_at = first_at + Duration::hours(1);

        let (_, rescheduled) = service
            .book_for_lead(maria.id, first_at, 40, None, None)
            .await
            .unwrap();
        assert!(!rescheduled);

        let (appointment, rescheduled) = service
            .book_for_lead(maria.id, second_at, 40, None, None)
            .await
            .unwrap();
        assert!(rescheduled);
        assert_eq!(appointment.scheduled_at, second_at);

        let active = service.active_appointments(maria.id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].scheduled_at, second_at);
    }

    #[tokio::test]
    async fn test_cancel_is_guarded_against_double_cancel() {
        let service = service();
        let maria = lead(&service, "web-11111111").await;
        let appointment = service
            .create_appointment(maria.id, future_slot(), 40, None, None)
            .await
            .unwrap();

        let cancelled = service
            .cancel_appointment(appointment.id, "teste")
            .await
            .unwrap();
        assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("teste"));
        assert!(cancelled.cancelled_at.is_some());

        let err = service
            .cancel_appointment(appointment.id, "de novo")
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::AlreadyCancelled(_)));
    }

    #[tokio::test]
    async fn test_status_transitions_out_of_cancelled_rejected() {
        let service = service();
        let maria = lead(&service, "web-11111111").await;
        let appointment = service
            .create_appointment(maria.id, future_slot(), 40, None, None)
            .await
            .unwrap();
        service
            .cancel_appointment(appointment.id, "teste")
            .await
            .unwrap();

        let err = service
            .update_status(appointment.id, AppointmentStatus::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::CancelledIsTerminal(_)));
    }

    #[tokio::test]
    async fn test_completing_future_appointment_rejected() {
        let service = service();
        let maria = lead(&service, "web-11111111").await;
        let appointment = service
            .create_appointment(maria.id, future_slot(), 40, None, None)
            .await
            .unwrap();

        let err = service
            .update_status(appointment.id, AppointmentStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::CompletionBeforeMeeting(_)));

        // Confirming a future appointment is fine
        let confirmed = service
            .update_status(appointment.id, AppointmentStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(confirmed.status, AppointmentStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_create_rejects_past_and_unknown_lead() {
        let service = service();
        let maria = lead(&service, "web-11111111").await;

        let past = business_now() - Duration::days(1);
        let err = service
            .create_appointment(maria.id, past, 40, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::PastTimestamp(_)));

        let err = service
            .create_appointment(Uuid::new_v4(), future_slot(), 40, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::LeadNotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_contact_rejected() {
        let service = service();
        lead(&service, "web-11111111").await;

        let err = service
            .create_lead("Outra", "Pessoa", "web-11111111", None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::DuplicateContact(_)));
    }

    #[tokio::test]
    async fn test_list_all_with_status_filter() {
        let service = service();
        let maria = lead(&service, "web-11111111").await;
        let appointment = service
            .create_appointment(maria.id, future_slot(), 40, None, None)
            .await
            .unwrap();
        service
            .create_appointment(maria.id, future_slot() + Duration::hours(1), 40, None, None)
            .await
            .unwrap();
        service
            .cancel_appointment(appointment.id, "teste")
            .await
            .unwrap();

        let pending = service
            .list_all(Some(AppointmentStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        let cancelled = service
            .list_all(Some(AppointmentStatus::Cancelled))
            .await
            .unwrap();
        assert_eq!(cancelled.len(), 1);
    }
}
