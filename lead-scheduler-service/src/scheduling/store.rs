use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use super::booking::BookingError;
use super::models::{Appointment, Lead};

/// Transactional appointment persistence.
///
/// Implementations must make every operation atomic; in particular
/// `insert_if_slot_free` is the single conflict-check-then-insert unit that
/// keeps two sessions from double-booking the same timestamp.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Insert without conflict checking (block markers)
    async fn add(&self, appointment: Appointment) -> Result<(), BookingError>;

    /// Insert only if no non-cancelled appointment holds the same timestamp.
    /// Check and insert happen atomically.
    async fn insert_if_slot_free(&self, appointment: Appointment)
    -> Result<Appointment, BookingError>;

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, BookingError>;

    /// Replace an existing record by id
    async fn update(&self, appointment: Appointment) -> Result<(), BookingError>;

    async fn remove(&self, id: Uuid) -> Result<bool, BookingError>;

    async fn list_by_lead(&self, lead_id: Uuid) -> Result<Vec<Appointment>, BookingError>;

    async fn list_all(&self) -> Result<Vec<Appointment>, BookingError>;

    /// All records (including markers) whose timestamp falls on the date
    async fn list_on_date(&self, date: NaiveDate) -> Result<Vec<Appointment>, BookingError>;
}

/// Lead persistence. `create` atomically rejects duplicate phone contacts.
#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn create(&self, lead: Lead) -> Result<Lead, BookingError>;
    async fn get(&self, id: Uuid) -> Result<Option<Lead>, BookingError>;
    async fn find_by_phone(&self, phone: &str) -> Result<Option<Lead>, BookingError>;
    async fn list(&self) -> Result<Vec<Lead>, BookingError>;
}

/// In-memory implementation of AppointmentStore. A single mutex makes each
/// operation a transaction.
pub struct InMemoryAppointmentStore {
    appointments: Mutex<HashMap<Uuid, Appointment>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self {
            appointments: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryAppointmentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn add(&self, appointment: Appointment) -> Result<(), BookingError> {
        let mut appointments = self.appointments.lock().expect("store mutex poisoned");
        appointments.insert(appointment.id, appointment);
        Ok(())
    }

    async fn insert_if_slot_free(
        &self,
        appointment: Appointment,
    ) -> Result<Appointment, BookingError> {
        let mut appointments = self.appointments.lock().expect("store mutex poisoned");
        let conflict = appointments.values().any(|existing| {
            existing.scheduled_at == appointment.scheduled_at
                && existing.status != super::models::AppointmentStatus::Cancelled
        });
        if conflict {
            return Err(BookingError::SlotTaken(appointment.scheduled_at));
        }
        appointments.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, BookingError> {
        let appointments = self.appointments.lock().expect("store mutex poisoned");
        Ok(appointments.get(&id).cloned())
    }

    async fn update(&self, appointment: Appointment) -> Result<(), BookingError> {
        let mut appointments = self.appointments.lock().expect("store mutex poisoned");
        if !appointments.contains_key(&appointment.id) {
            return Err(BookingError::AppointmentNotFound(appointment.id));
        }
        appointments.insert(appointment.id, appointment);
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<bool, BookingError> {
        let mut appointments = self.appointments.lock().expect("store mutex poisoned");
        Ok(appointments.remove(&id).is_some())
    }

    async fn list_by_lead(&self, lead_id: Uuid) -> Result<Vec<Appointment>, BookingError> {
        let appointments = self.appointments.lock().expect("store mutex poisoned");
        let mut result: Vec<Appointment> = appointments
            .values()
            .filter(|a| a.lead_id == Some(lead_id))
            .cloned()
            .collect();
        result.sort_by_key(|a| a.scheduled_at);
        Ok(result)
    }

    async fn list_all(&self) -> Result<Vec<Appointment>, BookingError> {
        let appointments = self.appointments.lock().expect("store mutex poisoned");
        let mut result: Vec<Appointment> = appointments.values().cloned().collect();
        result.sort_by_key(|a| a.scheduled_at);
        Ok(result)
    }

    async fn list_on_date(&self, date: NaiveDate) -> Result<Vec<Appointment>, BookingError> {
        let appointments = self.appointments.lock().expect("store mutex poisoned");
        let mut result: Vec<Appointment> = appointments
            .values()
            .filter(|a| a.scheduled_at.date() == date)
            .cloned()
            .collect();
        result.sort_by_key(|a| a.scheduled_at);
        Ok(result)
    }
}

/// In-memory implementation of LeadStore
pub struct InMemoryLeadStore {
    leads: Mutex<HashMap<Uuid, Lead>>,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self {
            leads: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryLeadStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn create(&self, lead: Lead) -> Result<Lead, BookingError> {
        let mut leads = self.leads.lock().expect("store mutex poisoned");
        if leads.values().any(|l| l.phone == lead.phone) {
            return Err(BookingError::DuplicateContact(lead.phone));
        }
        leads.insert(lead.id, lead.clone());
        Ok(lead)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Lead>, BookingError> {
        let leads = self.leads.lock().expect("store mutex poisoned");
        Ok(leads.get(&id).cloned())
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<Lead>, BookingError> {
        let leads = self.leads.lock().expect("store mutex poisoned");
        Ok(leads.values().find(|l| l.phone == phone).cloned())
    }

    async fn list(&self) -> Result<Vec<Lead>, BookingError> {
        let leads = self.leads.lock().expect("store mutex poisoned");
        Ok(leads.values().cloned().collect())
    }
}
