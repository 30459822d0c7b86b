use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use tracing::debug;

use super::booking::BookingError;
use super::models::block_tags;
use super::store::AppointmentStore;

// Business hours: two fixed windows, one slot per hour.
// Morning 09:00-11:00, afternoon 14:00-17:00; 12:00-14:00 is lunch.
const MORNING_HOURS: std::ops::Range<u32> = 9..12;
const AFTERNOON_HOURS: std::ops::Range<u32> = 14..18;

fn slot_time(hour: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, 0, 0).expect("valid slot hour")
}

/// Computes bookable time-of-day slots for a calendar date, after removing
/// weekends, administrative blocks and already-occupied slots.
pub struct Availability {
    appointments: Arc<dyn AppointmentStore>,
}

impl Availability {
    pub fn new(appointments: Arc<dyn AppointmentStore>) -> Self {
        Self { appointments }
    }

    /// Free slots for the date, ascending. Empty on weekends and fully
    /// blocked days.
    pub async fn slots_for(&self, date: NaiveDate) -> Result<Vec<NaiveTime>, BookingError> {
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return Ok(Vec::new());
        }

        let day = self.appointments.list_on_date(date).await?;

        let has_block = |tag: &str| {
            day.iter()
                .any(|a| a.is_block_marker() && a.meeting_type.as_deref() == Some(tag))
        };

        if has_block(block_tags::FULL_DAY) {
            return Ok(Vec::new());
        }

        let mut slots = Vec::new();
        if !has_block(block_tags::MORNING) {
            slots.extend(MORNING_HOURS.map(slot_time));
        }
        if !has_block(block_tags::AFTERNOON) {
            slots.extend(AFTERNOON_HOURS.map(slot_time));
        }

        let occupied: HashSet<NaiveTime> = day
            .iter()
            .filter(|a| a.is_active())
            .map(|a| a.scheduled_at.time())
            .collect();

        slots.retain(|slot| !occupied.contains(slot));

        debug!(%date, slots = slots.len(), "computed availability");
        Ok(slots)
    }

    /// Up to three free slots on the date, ordered by absolute minute
    /// distance from the requested time.
    pub async fn nearest_alternatives(
        &self,
        date: NaiveDate,
        requested: NaiveTime,
    ) -> Result<Vec<NaiveTime>, BookingError> {
        let mut slots = self.slots_for(date).await?;
        let minutes = |t: NaiveTime| t.signed_duration_since(requested).num_minutes().abs();
        slots.sort_by_key(|slot| minutes(*slot));
        slots.truncate(3);
        Ok(slots)
    }
}
