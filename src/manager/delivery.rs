//! Running-pod therapy operations: bolus, temp basal, basal schedule, and
//! alert acknowledgement.
//!
//! The bolus wait loop is the only place that actively cancels delivery on
//! the pod: when the conversation's token fires mid-wait, a cancel exchange
//! is issued and the conversation ends up either `canceled` (pod confirmed)
//! or `failed` (cancel attempted, pod kept delivering).

use std::time::Duration;

use tracing::{info, warn};

use super::conversation::Conversation;
use super::preconditions::{
    assert_immediate_bolus_active, assert_immediate_bolus_inactive, assert_running_status,
};
use super::PodManager;
use crate::error::PodError;
use crate::exchange::progress::BasalSchedulePayload;
use crate::insulin::{BasalSchedule, TempBasal, Units, MAX_BOLUS};
use crate::pod::progress::PodProgress;
use crate::pod::state::UserSettings;
use crate::pod::status::{BasalState, BolusState};
use crate::protocol::builder::RequestBuilder;
use crate::protocol::request::StatusRequestType;
use crate::time::PodDateTime;

impl PodManager {
    /// Delivers an immediate bolus.
    ///
    /// With `wait_for_finish` the operation polls until the pod reports the
    /// bolus complete, observing the conversation's cancellation token
    /// between delays; a cancellation request triggers a cancel exchange on
    /// the pod.
    pub async fn bolus(
        &self,
        conversation: &mut Conversation,
        amount: Units,
        wait_for_finish: bool,
    ) {
        info!(amount = %amount, wait_for_finish, "Starting bolus");
        let outcome = self
            .bolus_inner(conversation, amount, wait_for_finish)
            .await;
        if let Err(error) = &outcome {
            warn!(%error, "Bolus failed");
        }
        conversation.record_outcome(outcome);
    }

    async fn bolus_inner(
        &self,
        conversation: &mut Conversation,
        amount: Units,
        wait_for_finish: bool,
    ) -> Result<(), PodError> {
        self.update_status_internal(conversation, StatusRequestType::Standard)
            .await?;
        {
            let pod = self.pod.lock().unwrap();
            assert_running_status(&pod)?;
            assert_immediate_bolus_inactive(&pod)?;
        }
        if amount.is_zero() {
            return Err(PodError::InvalidParameter(
                "bolus must be at least 0.05 U".into(),
            ));
        }
        if amount > MAX_BOLUS {
            return Err(PodError::InvalidParameter(format!(
                "bolus {amount} exceeds {}",
                MAX_BOLUS
            )));
        }

        let request = RequestBuilder::new().bolus(amount).build()?;
        self.require_exchange(conversation, request, self.parameters()?)
            .await?;
        if self.status()?.bolus_state != BolusState::Immediate {
            return Err(PodError::ResponseUnexpected(
                "pod did not start the bolus".into(),
            ));
        }
        if !wait_for_finish {
            return Ok(());
        }

        while self.status()?.bolus_state == BolusState::Immediate {
            let delay = self.bolus_poll_delay()?;
            if conversation.cancellable_delay(delay).await {
                self.update_status_internal(conversation, StatusRequestType::Standard)
                    .await?;
            } else {
                info!("Bolus cancellation requested");
                let request = RequestBuilder::new().cancel_bolus().build()?;
                let parameters = self.parameters()?;
                let cancel_sent = self
                    .perform_exchange(request, parameters, conversation, None)
                    .await;
                let still_running = self.status()?.bolus_state == BolusState::Immediate;
                if !cancel_sent || still_running {
                    conversation.cancel_failed();
                } else {
                    conversation.mark_canceled();
                }
                break;
            }
        }

        if !conversation.is_canceled() && !conversation.is_failed() {
            let status = self.status()?;
            if !status.not_delivered_insulin.is_zero() {
                return Err(PodError::ResponseUnexpected(
                    "bolus finished with undelivered insulin".into(),
                ));
            }
        }
        Ok(())
    }

    /// Cancels a running immediate bolus.
    pub async fn cancel_bolus(&self, conversation: &mut Conversation) {
        info!("Canceling bolus");
        let outcome = self.cancel_bolus_inner(conversation).await;
        if let Err(error) = &outcome {
            warn!(%error, "Bolus cancel failed");
        }
        conversation.record_outcome(outcome);
    }

    async fn cancel_bolus_inner(&self, conversation: &mut Conversation) -> Result<(), PodError> {
        {
            let pod = self.pod.lock().unwrap();
            assert_running_status(&pod)?;
            assert_immediate_bolus_active(&pod)?;
        }
        let request = RequestBuilder::new().cancel_bolus().build()?;
        self.require_exchange(conversation, request, self.parameters()?)
            .await?;
        if self.status()?.bolus_state != BolusState::Inactive {
            return Err(PodError::ResponseUnexpected(
                "pod did not cancel the bolus".into(),
            ));
        }
        Ok(())
    }

    /// Starts a temp basal override, replacing any running one.
    pub async fn set_temp_basal(
        &self,
        conversation: &mut Conversation,
        rate: Units,
        duration_hours: f64,
    ) {
        info!(rate = %rate, duration_hours, "Setting temp basal");
        let outcome = self
            .set_temp_basal_inner(conversation, rate, duration_hours)
            .await;
        if let Err(error) = &outcome {
            warn!(%error, "Temp basal failed");
        }
        conversation.record_outcome(outcome);
    }

    async fn set_temp_basal_inner(
        &self,
        conversation: &mut Conversation,
        rate: Units,
        duration_hours: f64,
    ) -> Result<(), PodError> {
        let temp_basal = TempBasal::new(rate, duration_hours)?;

        self.update_status_internal(conversation, StatusRequestType::Standard)
            .await?;
        {
            let pod = self.pod.lock().unwrap();
            assert_running_status(&pod)?;
            assert_immediate_bolus_inactive(&pod)?;
        }

        if self.status()?.basal_state == BasalState::Temporary {
            let request = RequestBuilder::new().cancel_temp_basal().build()?;
            self.require_exchange(conversation, request, self.parameters()?)
                .await?;
            if self.status()?.basal_state == BasalState::Temporary {
                return Err(PodError::ResponseUnexpected(
                    "running temp basal was not canceled".into(),
                ));
            }
        }

        let request = RequestBuilder::new().temp_basal(temp_basal).build()?;
        let handle = conversation.new_exchange(request.clone());
        handle.set_temp_basal(temp_basal);
        if !self
            .perform_exchange(request, self.parameters()?, conversation, Some(handle.clone()))
            .await
        {
            return Err(self.exchange_error(conversation));
        }
        if self.status()?.basal_state != BasalState::Temporary {
            return Err(PodError::ResponseUnexpected(
                "pod did not start the temp basal".into(),
            ));
        }
        self.pod.lock().unwrap().last_temp_basal_result = Some(handle.result());
        Ok(())
    }

    /// Cancels the running temp basal, returning the pod to its schedule.
    pub async fn cancel_temp_basal(&self, conversation: &mut Conversation) {
        info!("Canceling temp basal");
        let outcome = self.cancel_temp_basal_inner(conversation).await;
        if let Err(error) = &outcome {
            warn!(%error, "Temp basal cancel failed");
        }
        conversation.record_outcome(outcome);
    }

    async fn cancel_temp_basal_inner(
        &self,
        conversation: &mut Conversation,
    ) -> Result<(), PodError> {
        self.update_status_internal(conversation, StatusRequestType::Standard)
            .await?;
        {
            let pod = self.pod.lock().unwrap();
            assert_running_status(&pod)?;
            assert_immediate_bolus_inactive(&pod)?;
        }

        if self.status()?.basal_state == BasalState::Temporary {
            let request = RequestBuilder::new().cancel_temp_basal().build()?;
            self.require_exchange(conversation, request, self.parameters()?)
                .await?;
        }
        if self.status()?.basal_state != BasalState::Scheduled {
            return Err(PodError::ResponseUnexpected(
                "basal did not return to the schedule".into(),
            ));
        }
        self.pod.lock().unwrap().last_temp_basal_result = None;
        Ok(())
    }

    /// Programs a new daily basal schedule on a running pod.
    pub async fn set_basal_schedule(
        &self,
        conversation: &mut Conversation,
        schedule: &BasalSchedule,
        utc_offset_minutes: i32,
    ) {
        info!(utc_offset_minutes, "Setting basal schedule");
        let outcome = self
            .set_basal_schedule_inner(conversation, schedule, utc_offset_minutes)
            .await;
        if let Err(error) = &outcome {
            warn!(%error, "Basal schedule failed");
        }
        conversation.record_outcome(outcome);
    }

    async fn set_basal_schedule_inner(
        &self,
        conversation: &mut Conversation,
        schedule: &BasalSchedule,
        utc_offset_minutes: i32,
    ) -> Result<(), PodError> {
        // Reject a bad schedule before any radio traffic
        schedule.validate()?;

        self.update_status_internal(conversation, StatusRequestType::Standard)
            .await?;
        {
            let pod = self.pod.lock().unwrap();
            assert_running_status(&pod)?;
            assert_immediate_bolus_inactive(&pod)?;
        }

        if self.status()?.basal_state == BasalState::Temporary {
            let request = RequestBuilder::new().cancel_temp_basal().build()?;
            self.require_exchange(conversation, request, self.parameters()?)
                .await?;
            if self.status()?.basal_state == BasalState::Temporary {
                return Err(PodError::ResponseUnexpected(
                    "running temp basal was not canceled".into(),
                ));
            }
        }

        let pod_time = PodDateTime::from_utc(chrono::Utc::now(), utc_offset_minutes);
        self.pod.lock().unwrap().last_user_settings = Some(UserSettings { utc_offset_minutes });

        let request = RequestBuilder::new()
            .basal_schedule(schedule.clone(), pod_time)
            .build()?;
        let handle = conversation.new_exchange(request.clone());
        handle.set_basal_payload(BasalSchedulePayload {
            schedule: schedule.clone(),
            pod_time,
            utc_offset_minutes,
        });
        if !self
            .perform_exchange(request, self.parameters()?, conversation, Some(handle))
            .await
        {
            return Err(self.exchange_error(conversation));
        }
        Ok(())
    }

    /// Acknowledges raised alert slots.
    pub async fn acknowledge_alerts(&self, conversation: &mut Conversation, alert_mask: u8) {
        info!(alert_mask, "Acknowledging alerts");
        let outcome = self.acknowledge_alerts_inner(conversation, alert_mask).await;
        if let Err(error) = &outcome {
            warn!(%error, "Alert acknowledgement failed");
        }
        conversation.record_outcome(outcome);
    }

    async fn acknowledge_alerts_inner(
        &self,
        conversation: &mut Conversation,
        alert_mask: u8,
    ) -> Result<(), PodError> {
        self.update_status_internal(conversation, StatusRequestType::Standard)
            .await?;
        assert_immediate_bolus_inactive(&self.pod.lock().unwrap())?;

        let status = self.status()?;
        // The pod must be active: paired, and not on any shutdown path
        if status.progress < PodProgress::PairingSuccess
            || status.progress >= PodProgress::ErrorShuttingDown
        {
            return Err(PodError::StateInvalidForCommand("pod is not active".into()));
        }
        if status.alert_mask & alert_mask != alert_mask {
            return Err(PodError::StateInvalidForCommand(
                "alerts are not raised on the pod".into(),
            ));
        }

        let request = RequestBuilder::new().acknowledge_alerts(alert_mask).build()?;
        self.require_exchange(conversation, request, self.parameters()?)
            .await?;
        if self.status()?.alert_mask & alert_mask != 0 {
            return Err(PodError::ResponseUnexpected(
                "pod did not acknowledge the alerts".into(),
            ));
        }
        Ok(())
    }

    /// Poll delay while a bolus runs: two seconds per undelivered pulse
    /// plus the settle floor.
    fn bolus_poll_delay(&self) -> Result<Duration, PodError> {
        let status = self.status()?;
        let pulses = status.not_delivered_insulin.pulses() as u64;
        let config = self.config();
        Ok(Duration::from_millis(
            pulses * config.bolus_pulse_wait_ms + config.bolus_wait_floor_ms,
        ))
    }
}
