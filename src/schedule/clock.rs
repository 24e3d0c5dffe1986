use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::models::UserSchedulePreference;

/// Decides whether a user's daily generation is due at a given instant.
///
/// A user is due while `now` lies in `[occurrence, occurrence + window)`, where
/// `occurrence` is the user's local generation time on some calendar day. The
/// window should be at least as long as the tick cadence so a late tick still
/// fires; the tick handler dedups on the occurrence itself.
#[derive(Debug, Clone, Copy)]
pub struct DueClock {
    window: Duration,
}

impl DueClock {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn is_due(&self, pref: &UserSchedulePreference, now_utc: DateTime<Utc>) -> bool {
        self.current_occurrence(pref, now_utc).is_some()
    }

    /// Start of the due window containing `now_utc`, if any.
    ///
    /// Yesterday's occurrence is considered too, so a window straddling local
    /// midnight still fires after the date rolls over.
    pub fn current_occurrence(
        &self,
        pref: &UserSchedulePreference,
        now_utc: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if !pref.daily_generation_enabled {
            return None;
        }

        let today = now_utc.with_timezone(&pref.timezone).date_naive();

        [Some(today), today.pred_opt()]
            .into_iter()
            .flatten()
            .filter_map(|date| occurrence_on(pref, date))
            .map(|at| at.with_timezone(&Utc))
            .find(|start| *start <= now_utc && now_utc < *start + self.window)
    }
}

/// The user's generation time on a local calendar date.
///
/// A time skipped by a DST jump resolves one hour later; a repeated time
/// resolves to its first instance.
fn occurrence_on(pref: &UserSchedulePreference, date: NaiveDate) -> Option<DateTime<Tz>> {
    let naive = date.and_time(pref.generation_time);
    pref.timezone
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            pref.timezone
                .from_local_datetime(&(naive + Duration::hours(1)))
                .earliest()
        })
}

/// Display string like "Tomorrow at 7:00 AM PST".
pub fn next_due_description(pref: &UserSchedulePreference, now_utc: DateTime<Utc>) -> String {
    if !pref.daily_generation_enabled {
        return "Daily generation is disabled".to_string();
    }

    let local_now = now_utc.with_timezone(&pref.timezone);
    let today = local_now.date_naive();

    if let Some(at) = occurrence_on(pref, today) {
        if local_now < at {
            return format!("Today at {}", at.format("%-I:%M %p %Z"));
        }
    }

    match today.succ_opt().and_then(|d| occurrence_on(pref, d)) {
        Some(at) => format!("Tomorrow at {}", at.format("%-I:%M %p %Z")),
        None => "Next generation time unavailable".to_string(),
    }
}
