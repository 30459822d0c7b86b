use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved meeting-type tags for administrative block markers. Markers are
/// appointments with no lead, stored with status `Cancelled` so they never
/// collide with customer bookings.
pub mod block_tags {
    pub const FULL_DAY: &str = "FULL_DAY_BLOCK";
    pub const MORNING: &str = "MORNING_BLOCK";
    pub const AFTERNOON: &str = "AFTERNOON_BLOCK";
}

/// All appointment timestamps are naive values in the fixed business
/// timezone (UTC-3).
pub const BUSINESS_UTC_OFFSET_HOURS: i32 = -3;

/// Current wall-clock time in the business timezone
pub fn business_now() -> NaiveDateTime {
    let offset = chrono::FixedOffset::east_opt(BUSINESS_UTC_OFFSET_HOURS * 3600)
        .expect("valid fixed offset");
    Utc::now().with_timezone(&offset).naive_local()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    /// Administrative marker value kept for admin tooling; availability and
    /// conflict logic treat it like any other non-cancelled status
    Blocked,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Blocked => "blocked",
        }
    }
}

/// A booked meeting, or (with `lead_id: None`) an administrative block marker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub lead_id: Option<Uuid>,
    pub scheduled_at: NaiveDateTime,
    pub duration_minutes: u32,
    pub meeting_type: Option<String>,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub cancellation_reason: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Appointment {
    /// Active appointments occupy their slot and count against the
    /// one-active-per-lead rule
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed
        )
    }

    /// Administrative block marker, never surfaced to customers
    pub fn is_block_marker(&self) -> bool {
        self.lead_id.is_none()
    }
}

/// A prospective customer captured through the qualification flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    /// Contact identifier; synthesized from the session id for web visitors
    pub phone: String,
    pub email: Option<String>,
    /// Free-text need described by the lead
    pub need: Option<String>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Lead {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Phone synthesized for web sessions: `web-` plus the session id prefix
pub fn phone_from_session(session_id: &str) -> String {
    let prefix: String = session_id.chars().take(8).collect();
    format!("web-{prefix}")
}
