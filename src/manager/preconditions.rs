//! Command precondition predicates over the pod record.
//!
//! Each predicate fails with [`PodError::StateInvalidForCommand`] carrying a
//! message the caller surfaces on the conversation. Predicates short-circuit
//! on an absent status where the command requires a known pod state.

use crate::error::PodError;
use crate::pod::progress::PodProgress;
use crate::pod::state::ErosPod;
use crate::pod::status::BolusState;

/// Fails when an immediate bolus is in progress.
pub(crate) fn assert_immediate_bolus_inactive(pod: &ErosPod) -> Result<(), PodError> {
    if let Some(status) = &pod.last_status {
        if status.bolus_state == BolusState::Immediate {
            return Err(PodError::StateInvalidForCommand("bolus in progress".into()));
        }
    }
    Ok(())
}

/// Fails unless an immediate bolus is in progress.
pub(crate) fn assert_immediate_bolus_active(pod: &ErosPod) -> Result<(), PodError> {
    match &pod.last_status {
        Some(status) if status.bolus_state == BolusState::Immediate => Ok(()),
        _ => Err(PodError::StateInvalidForCommand(
            "no bolus in progress".into(),
        )),
    }
}

/// Fails when the pod has already completed pairing.
pub(crate) fn assert_not_paired(pod: &ErosPod) -> Result<(), PodError> {
    if let Some(status) = &pod.last_status {
        if status.progress >= PodProgress::PairingSuccess {
            return Err(PodError::StateInvalidForCommand(
                "pod is already paired".into(),
            ));
        }
    }
    Ok(())
}

/// Fails unless the pod has completed pairing.
pub(crate) fn assert_paired(pod: &ErosPod) -> Result<(), PodError> {
    match &pod.last_status {
        Some(status) if status.progress >= PodProgress::PairingSuccess => Ok(()),
        _ => Err(PodError::StateInvalidForCommand("pod is not paired".into())),
    }
}

/// Fails unless the pod is delivering therapy (Running or RunningLow).
pub(crate) fn assert_running_status(pod: &ErosPod) -> Result<(), PodError> {
    match &pod.last_status {
        Some(status) if status.progress.is_running() => Ok(()),
        _ => Err(PodError::StateInvalidForCommand("pod is not running".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insulin::Units;
    use crate::pod::status::{BasalState, PodStatus};

    fn pod_with(progress: PodProgress, bolus_state: BolusState) -> ErosPod {
        let mut pod = ErosPod::new(0x1F0E_89F1);
        pod.last_status = Some(PodStatus {
            progress,
            basal_state: BasalState::Scheduled,
            bolus_state,
            alert_mask: 0,
            delivered_insulin: Units::from_pulses(10),
            not_delivered_insulin: Units::ZERO,
            reservoir: Units::from_pulses(4000),
            message_sequence: 0,
        });
        pod
    }

    #[test]
    fn test_bolus_inactive_predicate() {
        let blank = ErosPod::new(0x1F0E_89F1);
        assert!(assert_immediate_bolus_inactive(&blank).is_ok());

        let idle = pod_with(PodProgress::Running, BolusState::Inactive);
        assert!(assert_immediate_bolus_inactive(&idle).is_ok());

        let bolusing = pod_with(PodProgress::Running, BolusState::Immediate);
        assert!(assert_immediate_bolus_inactive(&bolusing).is_err());
    }

    #[test]
    fn test_bolus_active_predicate() {
        let blank = ErosPod::new(0x1F0E_89F1);
        assert!(assert_immediate_bolus_active(&blank).is_err());

        let extended = pod_with(PodProgress::Running, BolusState::Extended);
        assert!(assert_immediate_bolus_active(&extended).is_err());

        let bolusing = pod_with(PodProgress::Running, BolusState::Immediate);
        assert!(assert_immediate_bolus_active(&bolusing).is_ok());
    }

    #[test]
    fn test_pairing_predicates() {
        let blank = ErosPod::new(0x1F0E_89F1);
        assert!(assert_not_paired(&blank).is_ok());
        assert!(assert_paired(&blank).is_err());

        let filled = pod_with(PodProgress::TankFillCompleted, BolusState::Inactive);
        assert!(assert_not_paired(&filled).is_ok());
        assert!(assert_paired(&filled).is_err());

        let paired = pod_with(PodProgress::PairingSuccess, BolusState::Inactive);
        assert!(assert_not_paired(&paired).is_err());
        assert!(assert_paired(&paired).is_ok());
    }

    #[test]
    fn test_running_predicate_bounds() {
        assert!(assert_running_status(&ErosPod::new(1)).is_err());
        assert!(
            assert_running_status(&pod_with(PodProgress::BasalScheduleSet, BolusState::Inactive))
                .is_err()
        );
        assert!(
            assert_running_status(&pod_with(PodProgress::Running, BolusState::Inactive)).is_ok()
        );
        assert!(
            assert_running_status(&pod_with(PodProgress::RunningLow, BolusState::Inactive)).is_ok()
        );
        assert!(
            assert_running_status(&pod_with(PodProgress::ErrorShuttingDown, BolusState::Inactive))
                .is_err()
        );
    }
}
