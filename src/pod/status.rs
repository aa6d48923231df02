//! Parsed pod status reports.

use serde::{Deserialize, Serialize};

use super::progress::PodProgress;
use crate::insulin::Units;

/// Basal delivery state reported by the pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BasalState {
    /// No basal running (suspended).
    Off,
    /// The programmed daily schedule is running.
    Scheduled,
    /// A temp basal override is running.
    Temporary,
}

/// Bolus delivery state reported by the pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BolusState {
    /// No bolus in progress.
    Inactive,
    /// An extended bolus is in progress.
    Extended,
    /// An immediate bolus is in progress.
    Immediate,
}

/// One decoded status report.
///
/// Updated by the exchange parser after every successful response; the
/// orchestrator reads it to gate preconditions and advance polling loops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodStatus {
    /// Lifecycle progress.
    pub progress: PodProgress,
    /// Basal delivery state.
    pub basal_state: BasalState,
    /// Bolus delivery state.
    pub bolus_state: BolusState,
    /// Bitmask of currently raised alert slots.
    pub alert_mask: u8,
    /// Total insulin delivered over the pod's life.
    pub delivered_insulin: Units,
    /// Insulin commanded but not yet delivered (remaining bolus/purge).
    pub not_delivered_insulin: Units,
    /// Insulin remaining in the reservoir.
    pub reservoir: Units,
    /// Pod-side message sequence (0..15).
    pub message_sequence: u8,
}

impl PodStatus {
    /// True when an immediate bolus is in progress.
    pub fn bolus_running(&self) -> bool {
        self.bolus_state == BolusState::Immediate
    }

    /// True when a temp basal override is running.
    pub fn temp_basal_running(&self) -> bool {
        self.basal_state == BasalState::Temporary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(bolus_state: BolusState, basal_state: BasalState) -> PodStatus {
        PodStatus {
            progress: PodProgress::Running,
            basal_state,
            bolus_state,
            alert_mask: 0,
            delivered_insulin: Units::from_pulses(100),
            not_delivered_insulin: Units::ZERO,
            reservoir: Units::from_pulses(3000),
            message_sequence: 4,
        }
    }

    #[test]
    fn test_bolus_running() {
        assert!(status(BolusState::Immediate, BasalState::Scheduled).bolus_running());
        assert!(!status(BolusState::Inactive, BasalState::Scheduled).bolus_running());
        assert!(!status(BolusState::Extended, BasalState::Scheduled).bolus_running());
    }

    #[test]
    fn test_temp_basal_running() {
        assert!(status(BolusState::Inactive, BasalState::Temporary).temp_basal_running());
        assert!(!status(BolusState::Inactive, BasalState::Scheduled).temp_basal_running());
        assert!(!status(BolusState::Inactive, BasalState::Off).temp_basal_running());
    }
}
