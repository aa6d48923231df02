//! Insulin quantities in the pod's native resolution.
//!
//! The pod meters insulin in discrete 0.05 U pulses; every therapy amount,
//! rate, and reservoir figure is a whole number of pulses. [`Units`] stores
//! the pulse count directly, so the 0.05 U discretization invariant is
//! carried by the type and the delivery wait loops can compute their delays
//! straight from the remaining pulse count.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PodError;

/// Size of one pod pulse in insulin units.
pub const PULSE_UNITS: f64 = 0.05;

/// Number of half-hour slots in a daily basal schedule.
pub const BASAL_SCHEDULE_SLOTS: usize = 48;

/// Largest single bolus the pod accepts.
pub const MAX_BOLUS: Units = Units::from_pulses(600); // 30.0 U

/// Largest basal rate the pod accepts, in U/h.
pub const MAX_RATE: Units = Units::from_pulses(600); // 30.0 U/h

/// Longest temp basal duration, in half-hour increments.
pub const MAX_TEMP_BASAL_HALF_HOURS: u8 = 24; // 12 hours

/// An insulin quantity (amount or U/h rate) as a whole number of 0.05 U
/// pulses.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Units(u32);

impl Units {
    /// Zero insulin.
    pub const ZERO: Units = Units(0);

    /// Creates a quantity from a raw pulse count.
    pub const fn from_pulses(pulses: u32) -> Self {
        Units(pulses)
    }

    /// Creates a quantity from decimal units.
    ///
    /// Fails with [`PodError::InvalidParameter`] when the value is negative,
    /// non-finite, or not a multiple of 0.05 U.
    pub fn from_f64(units: f64) -> Result<Self, PodError> {
        if !units.is_finite() || units < 0.0 {
            return Err(PodError::InvalidParameter(format!(
                "insulin amount must be a non-negative number, got {units}"
            )));
        }
        let pulses = units / PULSE_UNITS;
        let rounded = pulses.round();
        if (pulses - rounded).abs() > 1e-6 {
            return Err(PodError::InvalidParameter(format!(
                "insulin amount must be a multiple of {PULSE_UNITS} U, got {units}"
            )));
        }
        Ok(Units(rounded as u32))
    }

    /// Raw pulse count.
    pub const fn pulses(&self) -> u32 {
        self.0
    }

    /// Decimal units.
    pub fn units(&self) -> f64 {
        self.0 as f64 * PULSE_UNITS
    }

    /// True when no insulin remains.
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} U", self.units())
    }
}

/// A daily basal program: one U/h rate per half-hour of pod-local time.
///
/// Construction is deliberately unvalidated so that operations can reject a
/// bad schedule with [`PodError::InvalidParameter`] before issuing any radio
/// exchange; call [`BasalSchedule::validate`] at the operation boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasalSchedule {
    entries: Vec<Units>,
}

impl BasalSchedule {
    /// Creates a schedule from half-hour slot rates.
    pub fn new(entries: Vec<Units>) -> Self {
        Self { entries }
    }

    /// Creates a schedule with the same rate in all 48 slots.
    pub fn uniform(rate: Units) -> Self {
        Self {
            entries: vec![rate; BASAL_SCHEDULE_SLOTS],
        }
    }

    /// Slot rates in order from 00:00 to 24:00 pod-local time.
    pub fn entries(&self) -> &[Units] {
        &self.entries
    }

    /// Checks the 48-slot rule: every entry is a multiple of 0.05 U/h
    /// (by construction) within [0.05, 30.0].
    pub fn validate(&self) -> Result<(), PodError> {
        if self.entries.len() != BASAL_SCHEDULE_SLOTS {
            return Err(PodError::InvalidParameter(format!(
                "basal schedule must have {BASAL_SCHEDULE_SLOTS} half-hour entries, got {}",
                self.entries.len()
            )));
        }
        for (slot, rate) in self.entries.iter().enumerate() {
            if rate.is_zero() || *rate > MAX_RATE {
                return Err(PodError::InvalidParameter(format!(
                    "basal rate {rate} in slot {slot} is outside [{PULSE_UNITS}, {}]",
                    MAX_RATE.units()
                )));
            }
        }
        Ok(())
    }
}

/// Parameters of a time-bounded basal override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempBasal {
    rate: Units,
    half_hours: u8,
}

impl TempBasal {
    /// Creates a temp basal from a U/h rate and a duration in hours.
    ///
    /// The rate must not exceed 30.0 U/h (zero is allowed: a zero temp basal
    /// withholds scheduled basal for the duration). The duration must be a
    /// whole number of half-hours in [0.5, 12].
    pub fn new(rate: Units, duration_hours: f64) -> Result<Self, PodError> {
        if rate > MAX_RATE {
            return Err(PodError::InvalidParameter(format!(
                "temp basal rate {rate} exceeds {} U/h",
                MAX_RATE.units()
            )));
        }
        if !duration_hours.is_finite() || duration_hours <= 0.0 {
            return Err(PodError::InvalidParameter(format!(
                "temp basal duration must be positive, got {duration_hours}"
            )));
        }
        let half_hours = duration_hours * 2.0;
        let rounded = half_hours.round();
        if (half_hours - rounded).abs() > 1e-6 {
            return Err(PodError::InvalidParameter(format!(
                "temp basal duration must be a multiple of 0.5 h, got {duration_hours}"
            )));
        }
        let half_hours = rounded as u32;
        if half_hours == 0 || half_hours > MAX_TEMP_BASAL_HALF_HOURS as u32 {
            return Err(PodError::InvalidParameter(format!(
                "temp basal duration must be between 0.5 and 12 hours, got {duration_hours}"
            )));
        }
        Ok(Self {
            rate,
            half_hours: half_hours as u8,
        })
    }

    /// Override rate in U/h.
    pub fn rate(&self) -> Units {
        self.rate
    }

    /// Duration in half-hour increments.
    pub fn half_hours(&self) -> u8 {
        self.half_hours
    }

    /// Duration in hours.
    pub fn duration_hours(&self) -> f64 {
        self.half_hours as f64 / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_from_f64_accepts_pulse_multiples() {
        assert_eq!(Units::from_f64(0.0).unwrap(), Units::ZERO);
        assert_eq!(Units::from_f64(0.05).unwrap().pulses(), 1);
        assert_eq!(Units::from_f64(0.50).unwrap().pulses(), 10);
        assert_eq!(Units::from_f64(30.0).unwrap(), MAX_BOLUS);
    }

    #[test]
    fn test_units_from_f64_rejects_off_grid_values() {
        assert!(Units::from_f64(0.07).is_err());
        assert!(Units::from_f64(-0.05).is_err());
        assert!(Units::from_f64(f64::NAN).is_err());
        assert!(Units::from_f64(f64::INFINITY).is_err());
    }

    #[test]
    fn test_units_round_trips_and_formats() {
        let amount = Units::from_f64(1.35).unwrap();
        assert_eq!(amount.pulses(), 27);
        assert_eq!(amount.units(), 1.35);
        assert_eq!(format!("{}", amount), "1.35 U");
    }

    #[test]
    fn test_units_ordering_follows_amount() {
        assert!(Units::from_pulses(3) < Units::from_pulses(4));
        assert!(Units::ZERO.is_zero());
        assert!(!Units::from_pulses(1).is_zero());
    }

    #[test]
    fn test_basal_schedule_validate_accepts_uniform() {
        let schedule = BasalSchedule::uniform(Units::from_f64(0.85).unwrap());
        assert!(schedule.validate().is_ok());
        assert_eq!(schedule.entries().len(), BASAL_SCHEDULE_SLOTS);
    }

    #[test]
    fn test_basal_schedule_validate_rejects_wrong_length() {
        let schedule = BasalSchedule::new(vec![Units::from_pulses(10); 47]);
        let err = schedule.validate().unwrap_err();
        assert!(matches!(err, PodError::InvalidParameter(_)));
    }

    #[test]
    fn test_basal_schedule_validate_rejects_zero_and_excessive_rates() {
        let mut entries = vec![Units::from_pulses(10); BASAL_SCHEDULE_SLOTS];
        entries[7] = Units::ZERO;
        assert!(BasalSchedule::new(entries).validate().is_err());

        let mut entries = vec![Units::from_pulses(10); BASAL_SCHEDULE_SLOTS];
        entries[7] = Units::from_pulses(601);
        assert!(BasalSchedule::new(entries).validate().is_err());
    }

    #[test]
    fn test_temp_basal_validation() {
        let tb = TempBasal::new(Units::from_f64(0.8).unwrap(), 1.0).unwrap();
        assert_eq!(tb.half_hours(), 2);
        assert_eq!(tb.duration_hours(), 1.0);

        // Zero rate is a valid override
        assert!(TempBasal::new(Units::ZERO, 0.5).is_ok());

        assert!(TempBasal::new(Units::from_pulses(601), 1.0).is_err());
        assert!(TempBasal::new(Units::from_pulses(10), 0.75).is_err());
        assert!(TempBasal::new(Units::from_pulses(10), 0.0).is_err());
        assert!(TempBasal::new(Units::from_pulses(10), 12.5).is_err());
    }
}
