// Calendar domain: models, stores, availability computation and booking
pub mod availability;
pub mod booking;
pub mod models;
pub mod store;

pub use availability::Availability;
pub use booking::{BookingError, BookingService, Shift};
pub use models::{Appointment, AppointmentStatus, Lead, business_now, phone_from_session};
pub use store::{
    AppointmentStore, InMemoryAppointmentStore, InMemoryLeadStore, LeadStore,
};
