use chrono::{DateTime, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::Los_Angeles;
pub const DEFAULT_PODCAST_STYLE: &str = "deep-dive";

const TIME_FORMAT_HINT: &str = "Invalid time format. Use HH:MM (e.g., 07:00)";

fn default_generation_time() -> NaiveTime {
    NaiveTime::from_hms_opt(7, 0, 0).unwrap_or_default()
}

/// Per-user daily schedule. Materialized with defaults on first access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSchedulePreference {
    pub user_id: String,
    pub daily_generation_enabled: bool,
    pub generation_time: NaiveTime,
    pub timezone: Tz,
    pub podcast_style: String,
    pub updated_at: DateTime<Utc>,
}

impl UserSchedulePreference {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            daily_generation_enabled: false,
            generation_time: default_generation_time(),
            timezone: DEFAULT_TIMEZONE,
            podcast_style: DEFAULT_PODCAST_STYLE.to_string(),
            updated_at: Utc::now(),
        }
    }

    pub fn apply(&mut self, update: &PreferenceUpdate) {
        if let Some(enabled) = update.daily_generation_enabled {
            self.daily_generation_enabled = enabled;
        }
        if let Some(time) = update.generation_time {
            // Minute precision only
            self.generation_time = time
                .with_second(0)
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(time);
        }
        if let Some(tz) = update.timezone {
            self.timezone = tz;
        }
        if let Some(style) = &update.podcast_style {
            self.podcast_style = style.clone();
        }
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferenceUpdate {
    pub daily_generation_enabled: Option<bool>,
    pub generation_time: Option<NaiveTime>,
    pub timezone: Option<Tz>,
    pub podcast_style: Option<String>,
}

impl PreferenceUpdate {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Parse a user-supplied "HH:MM" time of day.
pub fn parse_generation_time(input: &str) -> Result<NaiveTime> {
    let invalid = || AppError::InvalidTime(TIME_FORMAT_HINT.to_string());

    let (hours, minutes) = input.trim().split_once(':').ok_or_else(invalid)?;
    let hours: u32 = hours.parse().map_err(|_| invalid())?;
    let minutes: u32 = minutes.parse().map_err(|_| invalid())?;

    NaiveTime::from_hms_opt(hours, minutes, 0).ok_or_else(invalid)
}

pub fn parse_timezone(input: &str) -> Result<Tz> {
    input
        .trim()
        .parse::<Tz>()
        .map_err(|_| AppError::InvalidTimezone(input.to_string()))
}
