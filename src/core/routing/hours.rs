//! Per-agent service hours.
//!
//! A weekly schedule maps each day to a list of minute-of-day windows,
//! parsed from `"HH:MM-HH:MM"` strings. Evaluation happens in the
//! deployment's fixed reference time zone; a day with no entry, or no
//! window containing the current minute, means the agent is outside
//! service hours.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while parsing a weekly schedule.
#[derive(Debug, Error)]
pub enum ServiceHoursError {
    /// Window string is not "HH:MM-HH:MM"
    #[error("Invalid window '{0}', expected HH:MM-HH:MM")]
    InvalidWindow(String),

    /// Hour or minute out of range
    #[error("Invalid time of day '{0}'")]
    InvalidTime(String),
}

/// One open interval within a day, in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoursWindow {
    /// Opening minute (inclusive)
    pub start_minute: u32,
    /// Closing minute (exclusive)
    pub end_minute: u32,
}

impl HoursWindow {
    /// Parse a window from an `"HH:MM-HH:MM"` string.
    pub fn parse(s: &str) -> Result<Self, ServiceHoursError> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| ServiceHoursError::InvalidWindow(s.to_string()))?;
        Ok(HoursWindow {
            start_minute: parse_minute_of_day(start.trim())?,
            end_minute: parse_minute_of_day(end.trim())?,
        })
    }

    /// Whether the window contains the given minute of day.
    pub fn contains(&self, minute: u32) -> bool {
        minute >= self.start_minute && minute < self.end_minute
    }
}

fn parse_minute_of_day(s: &str) -> Result<u32, ServiceHoursError> {
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| ServiceHoursError::InvalidTime(s.to_string()))?;
    let hours: u32 = h
        .parse()
        .map_err(|_| ServiceHoursError::InvalidTime(s.to_string()))?;
    let minutes: u32 = m
        .parse()
        .map_err(|_| ServiceHoursError::InvalidTime(s.to_string()))?;
    if hours > 23 || minutes > 59 {
        return Err(ServiceHoursError::InvalidTime(s.to_string()));
    }
    Ok(hours * 60 + minutes)
}

/// A per-agent weekly schedule: day of week to open windows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeeklySchedule {
    /// Open windows keyed by day
    #[serde(default)]
    pub days: HashMap<Weekday, Vec<HoursWindow>>,
}

impl WeeklySchedule {
    /// Parse a schedule from day → list of `"HH:MM-HH:MM"` strings.
    pub fn parse(raw: &HashMap<Weekday, Vec<String>>) -> Result<Self, ServiceHoursError> {
        let mut days = HashMap::new();
        for (day, windows) in raw {
            let parsed = windows
                .iter()
                .map(|w| HoursWindow::parse(w))
                .collect::<Result<Vec<_>, _>>()?;
            days.insert(*day, parsed);
        }
        Ok(WeeklySchedule { days })
    }

    /// Whether the schedule has any open window at all.
    pub fn is_empty(&self) -> bool {
        self.days.values().all(|w| w.is_empty())
    }
}

/// Check whether the given instant falls within the agent's service hours,
/// evaluated in the deployment's reference time zone.
pub fn in_service_hours(schedule: &WeeklySchedule, now: DateTime<Utc>, zone: Tz) -> bool {
    let local = now.with_timezone(&zone);
    let minute = local.hour() * 60 + local.minute();

    match schedule.days.get(&local.weekday()) {
        Some(windows) => windows.iter().any(|w| w.contains(minute)),
        None => false,
    }
}

// =============================================================================
// Tests
// =============================================================================
