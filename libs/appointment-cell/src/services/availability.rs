// libs/appointment-cell/src/services/availability.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use tracing::debug;

use crate::models::{AppointmentError, Scope, SchedulingRules, Slot};
use crate::services::conflict::conflicts_in;
use crate::services::interval::Interval;
use crate::store::AppointmentStore;

/// Opening hours for a single day, in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessHours {
    pub open_hour: u32,
    pub close_hour: u32,
    pub granularity_minutes: i64,
}

impl BusinessHours {
    pub fn from_rules(rules: &SchedulingRules) -> Self {
        Self {
            open_hour: rules.business_open_hour,
            close_hour: rules.business_close_hour,
            granularity_minutes: rules.slot_granularity_minutes,
        }
    }

    /// The open/close window of `date`.
    pub fn window(&self, date: NaiveDate) -> Interval {
        Interval::new(at_hour(date, self.open_hour), at_hour(date, self.close_hour))
    }

    /// Every start on the fixed grid whose slot still ends by closing time.
    pub fn candidates(&self, date: NaiveDate, duration_minutes: i32) -> Vec<Interval> {
        let window = self.window(date);
        let step = Duration::minutes(self.granularity_minutes.max(1));

        let mut candidates = Vec::new();
        let mut start = window.start;
        while start < window.end {
            let candidate = Interval::from_duration(start, duration_minutes as i64);
            if !window.contains(&candidate) {
                break;
            }
            candidates.push(candidate);
            start += step;
        }
        candidates
    }
}

fn at_hour(date: NaiveDate, hour: u32) -> DateTime<Utc> {
    // Plain offset from midnight, so 24 lands on the next day's midnight.
    let midnight = date.and_time(NaiveTime::MIN).and_utc();
    midnight + Duration::hours(hour as i64)
}

pub struct AvailabilityService {
    store: Arc<dyn AppointmentStore>,
    hours: BusinessHours,
}

impl AvailabilityService {
    pub fn new(store: Arc<dyn AppointmentStore>, hours: BusinessHours) -> Self {
        Self { store, hours }
    }

    /// Bookable slots for `scope` on `date`, ascending by start.
    pub async fn get_available_slots(
        &self,
        date: NaiveDate,
        duration_minutes: i32,
        scope: &Scope,
    ) -> Result<Vec<Slot>, AppointmentError> {
        debug!("Calculating available slots for {} on {} ({} min)", scope, date, duration_minutes);

        let candidates = self.hours.candidates(date, duration_minutes);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        // One snapshot for the whole day, then the same predicate the
        // conflict checker uses for each candidate.
        let existing = if scope.is_empty() {
            Vec::new()
        } else {
            self.store
                .query_by_scope_and_window(scope, &self.hours.window(date), false)
                .await?
        };

        let slots: Vec<Slot> = candidates
            .into_iter()
            .filter(|candidate| conflicts_in(&existing, candidate, None).next().is_none())
            .map(|candidate| Slot {
                start_time: candidate.start,
                end_time: candidate.end,
                duration_minutes,
            })
            .collect();

        debug!("Found {} available slots", slots.len());
        Ok(slots)
    }
}
