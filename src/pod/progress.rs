//! Pod lifecycle progress.

use serde::{Deserialize, Serialize};

/// Ordered lifecycle of a pod, from factory-fresh to shut down.
///
/// The ordering is meaningful and used throughout the command preconditions:
/// the protocol never walks a pod backwards, so `last_status.progress` is
/// monotonically non-decreasing across successful exchanges.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum PodProgress {
    /// Factory state, tank not yet powered.
    InitialState,
    /// Tank power on.
    TankPowerActivated,
    /// Reservoir filled.
    TankFillCompleted,
    /// Radio address assigned and setup accepted.
    PairingSuccess,
    /// Purging the fluid path.
    Purging,
    /// Purge complete, waiting for cannula insertion.
    ReadyForInjection,
    /// Basal program received.
    BasalScheduleSet,
    /// Priming the cannula.
    Priming,
    /// Delivering therapy.
    Running,
    /// Delivering therapy, reservoir below the low threshold.
    RunningLow,
    /// Fault raised, shutting down.
    ErrorShuttingDown,
    /// Auto-off alert expired, shutting down.
    AlertExpiredShuttingDown,
    /// Pod is dead.
    Inactive,
}

impl PodProgress {
    /// True while the pod is delivering therapy (normal or low-reservoir).
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::RunningLow)
    }

    /// True once the pod has entered any shutdown path.
    pub fn is_shutting_down(&self) -> bool {
        *self >= Self::ErrorShuttingDown
    }
}

impl std::fmt::Display for PodProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InitialState => "InitialState",
            Self::TankPowerActivated => "TankPowerActivated",
            Self::TankFillCompleted => "TankFillCompleted",
            Self::PairingSuccess => "PairingSuccess",
            Self::Purging => "Purging",
            Self::ReadyForInjection => "ReadyForInjection",
            Self::BasalScheduleSet => "BasalScheduleSet",
            Self::Priming => "Priming",
            Self::Running => "Running",
            Self::RunningLow => "RunningLow",
            Self::ErrorShuttingDown => "ErrorShuttingDown",
            Self::AlertExpiredShuttingDown => "AlertExpiredShuttingDown",
            Self::Inactive => "Inactive",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_ordering_matches_lifecycle() {
        assert!(PodProgress::InitialState < PodProgress::TankPowerActivated);
        assert!(PodProgress::TankFillCompleted < PodProgress::PairingSuccess);
        assert!(PodProgress::PairingSuccess < PodProgress::Purging);
        assert!(PodProgress::Purging < PodProgress::ReadyForInjection);
        assert!(PodProgress::ReadyForInjection < PodProgress::BasalScheduleSet);
        assert!(PodProgress::BasalScheduleSet < PodProgress::Priming);
        assert!(PodProgress::Priming < PodProgress::Running);
        assert!(PodProgress::Running < PodProgress::RunningLow);
        assert!(PodProgress::RunningLow < PodProgress::ErrorShuttingDown);
        assert!(PodProgress::ErrorShuttingDown < PodProgress::AlertExpiredShuttingDown);
        assert!(PodProgress::AlertExpiredShuttingDown < PodProgress::Inactive);
    }

    #[test]
    fn test_is_running_band() {
        assert!(PodProgress::Running.is_running());
        assert!(PodProgress::RunningLow.is_running());
        assert!(!PodProgress::BasalScheduleSet.is_running());
        assert!(!PodProgress::ErrorShuttingDown.is_running());
    }

    #[test]
    fn test_is_shutting_down() {
        assert!(PodProgress::ErrorShuttingDown.is_shutting_down());
        assert!(PodProgress::AlertExpiredShuttingDown.is_shutting_down());
        assert!(PodProgress::Inactive.is_shutting_down());
        assert!(!PodProgress::RunningLow.is_shutting_down());
    }

    #[test]
    fn test_progress_display() {
        assert_eq!(format!("{}", PodProgress::ReadyForInjection), "ReadyForInjection");
        assert_eq!(format!("{}", PodProgress::Inactive), "Inactive");
    }
}
