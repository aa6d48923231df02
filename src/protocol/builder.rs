//! Fluent assembly of pod requests.
//!
//! Therapy operations describe their intent through the builder and hand the
//! resulting [`PodRequest`] to the exchange layer. Exactly one intent must be
//! set; setting a second one replaces the first.
//!
//! # Example
//!
//! ```
//! use podcore::insulin::Units;
//! use podcore::protocol::RequestBuilder;
//!
//! let request = RequestBuilder::new()
//!     .bolus(Units::from_pulses(10))
//!     .build()
//!     .unwrap();
//! assert_eq!(request.name(), "bolus");
//! ```

use super::request::{AlertConfiguration, PodRequest, StatusRequestType};
use crate::error::PodError;
use crate::insulin::{BasalSchedule, TempBasal, Units};
use crate::time::PodDateTime;

/// Builder for one [`PodRequest`].
#[derive(Debug, Default)]
pub struct RequestBuilder {
    intent: Option<PodRequest>,
}

impl RequestBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pairing step one: assign the pod its radio address.
    pub fn assign_address(mut self, address: u32) -> Self {
        self.intent = Some(PodRequest::AssignAddress { address });
        self
    }

    /// Pairing step two: confirm identity and set the pod's clock.
    pub fn setup_pod(mut self, lot: u32, serial: u32, address: u32, date: PodDateTime) -> Self {
        self.intent = Some(PodRequest::SetupPod {
            lot,
            serial,
            address,
            date,
        });
        self
    }

    /// Request a status page.
    pub fn status(mut self, status_type: StatusRequestType) -> Self {
        self.intent = Some(PodRequest::Status { status_type });
        self
    }

    /// Arm or clear alert slots.
    pub fn configure_alerts(mut self, alerts: Vec<AlertConfiguration>) -> Self {
        self.intent = Some(PodRequest::ConfigureAlerts { alerts });
        self
    }

    /// Set the delivery restriction flags.
    pub fn delivery_flags(mut self, byte16: u8, byte17: u8) -> Self {
        self.intent = Some(PodRequest::SetDeliveryFlags { byte16, byte17 });
        self
    }

    /// Purge the fluid path.
    pub fn prime_cannula(mut self) -> Self {
        self.intent = Some(PodRequest::PrimeCannula);
        self
    }

    /// Insert and prime the cannula.
    pub fn insert_cannula(mut self) -> Self {
        self.intent = Some(PodRequest::InsertCannula);
        self
    }

    /// Program the daily basal schedule.
    pub fn basal_schedule(mut self, schedule: BasalSchedule, pod_time: PodDateTime) -> Self {
        self.intent = Some(PodRequest::SetBasalSchedule { schedule, pod_time });
        self
    }

    /// Deliver an immediate bolus.
    pub fn bolus(mut self, amount: Units) -> Self {
        self.intent = Some(PodRequest::Bolus { amount });
        self
    }

    /// Start a temp basal override.
    pub fn temp_basal(mut self, temp_basal: TempBasal) -> Self {
        self.intent = Some(PodRequest::TempBasal { temp_basal });
        self
    }

    /// Cancel the running immediate bolus.
    pub fn cancel_bolus(mut self) -> Self {
        self.intent = Some(PodRequest::CancelBolus);
        self
    }

    /// Cancel the running temp basal.
    pub fn cancel_temp_basal(mut self) -> Self {
        self.intent = Some(PodRequest::CancelTempBasal);
        self
    }

    /// Acknowledge raised alert slots.
    pub fn acknowledge_alerts(mut self, mask: u8) -> Self {
        self.intent = Some(PodRequest::AcknowledgeAlerts { mask });
        self
    }

    /// Shut the pod down permanently.
    pub fn deactivate(mut self) -> Self {
        self.intent = Some(PodRequest::Deactivate);
        self
    }

    /// Produces the request.
    ///
    /// Fails with [`PodError::Internal`] when no intent was set.
    pub fn build(self) -> Result<PodRequest, PodError> {
        self.intent
            .ok_or_else(|| PodError::Internal("request builder has no intent".into()))
    }
}
