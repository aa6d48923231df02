//! Pod wall-clock time.
//!
//! The pod has no timezone database: the controller sends it a local wall
//! clock decomposed into calendar fields. This module converts a UTC instant
//! plus the user's offset into that representation.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Calendar fields of the pod's local wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl PodDateTime {
    /// Decomposes a UTC instant shifted by `utc_offset_minutes` into pod
    /// wall-clock fields.
    pub fn from_utc(utc: DateTime<Utc>, utc_offset_minutes: i32) -> Self {
        let local = utc + Duration::minutes(utc_offset_minutes as i64);
        Self {
            year: local.year() as u16,
            month: local.month() as u8,
            day: local.day() as u8,
            hour: local.hour() as u8,
            minute: local.minute() as u8,
            second: local.second() as u8,
        }
    }
}

impl std::fmt::Display for PodDateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}
