//! Typed pod commands and the decoded response envelope.

use bytes::Bytes;

use crate::insulin::{BasalSchedule, TempBasal, Units};
use crate::time::PodDateTime;

/// Which status page to request from the pod.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusRequestType {
    /// The standard delivery/reservoir/progress page.
    #[default]
    Standard,
    /// Alert slot details.
    Alerts,
    /// Fault event log.
    FaultEvents,
}

/// Beep pattern the pod plays when an alert fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BeepType {
    #[default]
    NoSound,
    Beep,
    BipBip,
    BipBeepFourTimes,
}

/// How often the pod repeats an alert beep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BeepRepeat {
    #[default]
    Once,
    OnceEveryMinuteForFifteenMinutes,
    OnceEveryFiveMinutes,
    OnceEveryHour,
}

/// Configuration of one of the pod's eight alert slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertConfiguration {
    /// Slot index, 0..=7.
    pub alert_index: u8,
    /// Whether the slot is armed.
    pub activate: bool,
    /// Whether expiry of this alert shuts the pod down.
    pub trigger_auto_off: bool,
    /// Minutes until the alert fires.
    pub alert_after_minutes: Option<u32>,
    /// Minutes the alert stays raised.
    pub duration_minutes: Option<u32>,
    /// Beep pattern when the alert fires.
    pub beep_type: BeepType,
    /// Beep repetition cadence.
    pub beep_repeat: BeepRepeat,
}

impl AlertConfiguration {
    /// A zeroed, disarmed slot.
    pub fn deactivated(alert_index: u8) -> Self {
        Self {
            alert_index,
            activate: false,
            trigger_auto_off: false,
            alert_after_minutes: None,
            duration_minutes: None,
            beep_type: BeepType::NoSound,
            beep_repeat: BeepRepeat::Once,
        }
    }
}

/// One typed therapy command, ready for the radio codec.
#[derive(Debug, Clone, PartialEq)]
pub enum PodRequest {
    /// Assign the pod its radio address (first pairing step).
    AssignAddress { address: u32 },
    /// Finish pairing: confirm identity and set the pod's wall clock.
    SetupPod {
        lot: u32,
        serial: u32,
        address: u32,
        date: PodDateTime,
    },
    /// Request a status page.
    Status { status_type: StatusRequestType },
    /// Arm or clear alert slots.
    ConfigureAlerts { alerts: Vec<AlertConfiguration> },
    /// Set the delivery restriction flags.
    SetDeliveryFlags { byte16: u8, byte17: u8 },
    /// Purge the fluid path.
    PrimeCannula,
    /// Insert and prime the cannula.
    InsertCannula,
    /// Program the daily basal schedule.
    SetBasalSchedule {
        schedule: BasalSchedule,
        pod_time: PodDateTime,
    },
    /// Deliver an immediate bolus.
    Bolus { amount: Units },
    /// Start a temp basal override.
    TempBasal { temp_basal: TempBasal },
    /// Cancel the running immediate bolus.
    CancelBolus,
    /// Cancel the running temp basal.
    CancelTempBasal,
    /// Acknowledge raised alert slots.
    AcknowledgeAlerts { mask: u8 },
    /// Shut the pod down permanently.
    Deactivate,
}

impl PodRequest {
    /// Short command name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AssignAddress { .. } => "assign_address",
            Self::SetupPod { .. } => "setup_pod",
            Self::Status { .. } => "status",
            Self::ConfigureAlerts { .. } => "configure_alerts",
            Self::SetDeliveryFlags { .. } => "set_delivery_flags",
            Self::PrimeCannula => "prime_cannula",
            Self::InsertCannula => "insert_cannula",
            Self::SetBasalSchedule { .. } => "set_basal_schedule",
            Self::Bolus { .. } => "bolus",
            Self::TempBasal { .. } => "temp_basal",
            Self::CancelBolus => "cancel_bolus",
            Self::CancelTempBasal => "cancel_temp_basal",
            Self::AcknowledgeAlerts { .. } => "acknowledge_alerts",
            Self::Deactivate => "deactivate",
        }
    }
}

impl std::fmt::Display for PodRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One received pod message, decoded by the external codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodResponse {
    /// Pod-side message sequence (0..15).
    pub sequence: u8,
    /// Undecoded message body; the parser interprets it.
    pub body: Bytes,
}

impl PodResponse {
    /// Creates a response envelope.
    pub fn new(sequence: u8, body: Bytes) -> Self {
        Self { sequence, body }
    }
}
