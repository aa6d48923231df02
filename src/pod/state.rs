//! The authoritative in-memory record of one pod.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::progress::PodProgress;
use super::status::PodStatus;
use crate::exchange::progress::ExchangeResult;
use crate::insulin::Units;
use crate::manager::conversation::RequestSource;

/// Shared handle to a pod record.
///
/// All accesses are short and synchronous; the lock is never held across an
/// await point. Mutation only happens inside the pod's single active
/// conversation, so there is no finer-grained locking.
pub type SharedPod = Arc<Mutex<ErosPod>>;

/// Volatile per-pod protocol state.
///
/// `nonce_sync` is the seed hint the response parser writes when the pod
/// rejects a nonce. It is non-empty only between that reject-parse step and
/// the completion of the retry exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeVariables {
    pub nonce_sync: Option<u16>,
}

/// Metadata of the conversation currently holding the pod's mutex.
#[derive(Debug, Clone)]
pub struct ConversationMeta {
    pub source: RequestSource,
    pub started: DateTime<Utc>,
}

/// Settings the user last sent to the pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    /// Offset from UTC of the pod's wall clock, in minutes.
    pub utc_offset_minutes: i32,
}

/// One physical pod: identity, last-known status, and runtime flags.
///
/// Created at pod registration and mutated only under the pod's conversation
/// mutex (by the orchestrator and by exchange parsing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErosPod {
    /// 32-bit radio address assigned to this pod.
    pub radio_address: u32,
    /// Manufacturing lot, known once the user registers the pod.
    pub lot: Option<u32>,
    /// Manufacturing serial (tid), known once the user registers the pod.
    pub serial: Option<u32>,
    /// When pairing completed.
    pub activation_date: Option<DateTime<Utc>>,
    /// When the cannula was inserted.
    pub insertion_date: Option<DateTime<Utc>>,
    /// Insulin consumed by purging and priming, excluded from therapy totals.
    pub reservoir_used_for_priming: Option<Units>,
    /// Last decoded status report.
    pub last_status: Option<PodStatus>,
    /// Last user settings sent to the pod.
    pub last_user_settings: Option<UserSettings>,
    /// Result of the exchange that started the running temp basal, if any.
    pub last_temp_basal_result: Option<ExchangeResult>,
    /// Metadata of the conversation currently holding the mutex.
    #[serde(skip)]
    pub active_conversation: Option<ConversationMeta>,
    /// Volatile protocol state.
    #[serde(skip)]
    pub runtime_variables: RuntimeVariables,
}

impl ErosPod {
    /// Creates a record for a pod that has not been registered yet.
    pub fn new(radio_address: u32) -> Self {
        Self {
            radio_address,
            lot: None,
            serial: None,
            activation_date: None,
            insertion_date: None,
            reservoir_used_for_priming: None,
            last_status: None,
            last_user_settings: None,
            last_temp_basal_result: None,
            active_conversation: None,
            runtime_variables: RuntimeVariables::default(),
        }
    }

    /// Creates a record for a registered pod with known lot and serial.
    pub fn registered(radio_address: u32, lot: u32, serial: u32) -> Self {
        let mut pod = Self::new(radio_address);
        pod.lot = Some(lot);
        pod.serial = Some(serial);
        pod
    }

    /// Wraps the record in a shared handle.
    pub fn into_shared(self) -> SharedPod {
        Arc::new(Mutex::new(self))
    }

    /// Lifecycle progress of the last status report, if any.
    pub fn progress(&self) -> Option<PodProgress> {
        self.last_status.as_ref().map(|s| s.progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_pod_is_blank() {
        let pod = ErosPod::new(0x1F0E_89F1);
        assert_eq!(pod.radio_address, 0x1F0E_89F1);
        assert!(pod.lot.is_none());
        assert!(pod.last_status.is_none());
        assert!(pod.active_conversation.is_none());
        assert!(pod.runtime_variables.nonce_sync.is_none());
        assert!(pod.progress().is_none());
    }

    #[test]
    fn test_registered_pod_carries_identity() {
        let pod = ErosPod::registered(0x1F0E_89F1, 44147, 1_234_567);
        assert_eq!(pod.lot, Some(44147));
        assert_eq!(pod.serial, Some(1_234_567));
    }

    #[test]
    fn test_progress_tracks_last_status() {
        use crate::pod::status::{BasalState, BolusState};

        let mut pod = ErosPod::new(0x1F0E_89F1);
        pod.last_status = Some(PodStatus {
            progress: PodProgress::Running,
            basal_state: BasalState::Scheduled,
            bolus_state: BolusState::Inactive,
            alert_mask: 0,
            delivered_insulin: Units::from_pulses(52),
            not_delivered_insulin: Units::ZERO,
            reservoir: Units::from_pulses(3948),
            message_sequence: 9,
        });
        assert_eq!(pod.progress(), Some(PodProgress::Running));
    }
}
