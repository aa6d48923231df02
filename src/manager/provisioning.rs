//! Pod provisioning operations: pair, activate, inject-and-start, deactivate.
//!
//! These walk the pod up (and finally down) its lifecycle. The purge and
//! prime phases are driven by wait-and-poll loops whose delay is derived
//! from the pod's own report of undelivered pulses; the loops observe the
//! conversation's cancellation token between delays.

use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use super::conversation::Conversation;
use super::preconditions::{assert_not_paired, assert_paired};
use super::PodManager;
use crate::error::PodError;
use crate::exchange::parameters::TransmissionPower;
use crate::exchange::progress::BasalSchedulePayload;
use crate::insulin::BasalSchedule;
use crate::pod::progress::PodProgress;
use crate::pod::state::UserSettings;
use crate::protocol::builder::RequestBuilder;
use crate::protocol::request::{AlertConfiguration, BeepRepeat, BeepType, StatusRequestType};
use crate::time::PodDateTime;

impl PodManager {
    /// Pairs with a factory-fresh pod: assigns the radio address, then
    /// confirms identity and sets the pod's wall clock.
    pub async fn pair(&self, conversation: &mut Conversation, utc_offset_minutes: i32) {
        info!(utc_offset_minutes, "Pairing pod");
        let outcome = self.pair_inner(conversation, utc_offset_minutes).await;
        if let Err(error) = &outcome {
            warn!(%error, "Pairing failed");
        }
        conversation.record_outcome(outcome);
    }

    async fn pair_inner(
        &self,
        conversation: &mut Conversation,
        utc_offset_minutes: i32,
    ) -> Result<(), PodError> {
        let radio_address = {
            let pod = self.pod.lock().unwrap();
            assert_not_paired(&pod)?;
            pod.radio_address
        };

        let progress = self.pod.lock().unwrap().progress();
        if progress.map_or(true, |p| p <= PodProgress::TankFillCompleted) {
            // The pod is still listening on the broadcast address
            let parameters = self
                .parameters()?
                .with_address_override(0xFFFF_FFFF)
                .with_ack_address_override(radio_address)
                .with_transmission_power(TransmissionPower::BelowNormal)
                .without_auto_level_adjustment();
            let request = RequestBuilder::new().assign_address(radio_address).build()?;
            self.perform_exchange(request, parameters, conversation, None)
                .await;

            match self.pod.lock().unwrap().progress() {
                None => {
                    return Err(PodError::RadioRecvTimeout(
                        "no response to address assignment".into(),
                    ))
                }
                Some(p) if p < PodProgress::TankFillCompleted => {
                    return Err(PodError::ResponseUnexpected("pod is not filled".into()))
                }
                _ => {}
            }
        }

        if self.progress()? < PodProgress::PairingSuccess {
            let activation_date = Utc::now();
            let (lot, serial) = {
                let mut pod = self.pod.lock().unwrap();
                pod.activation_date = Some(activation_date);
                pod.last_user_settings = Some(UserSettings { utc_offset_minutes });
                (pod.lot, pod.serial)
            };
            let (Some(lot), Some(serial)) = (lot, serial) else {
                return Err(PodError::Internal(
                    "pod lot and serial are not registered".into(),
                ));
            };
            let pod_date = PodDateTime::from_utc(activation_date, utc_offset_minutes);
            let parameters = self
                .parameters()?
                .with_address_override(0xFFFF_FFFF)
                .with_ack_address_override(radio_address)
                .with_transmission_power(TransmissionPower::BelowNormal)
                .without_auto_level_adjustment()
                .with_message_sequence(1);
            let request = RequestBuilder::new()
                .setup_pod(lot, serial, radio_address, pod_date)
                .build()?;
            self.perform_exchange(request, parameters, conversation, None)
                .await;
        }

        assert_paired(&self.pod.lock().unwrap())
    }

    /// Activates a paired pod: arms the setup alert, clears delivery flags,
    /// and purges the fluid path, polling until the pod is ready for
    /// injection.
    pub async fn activate(&self, conversation: &mut Conversation) {
        info!("Activating pod");
        let outcome = self.activate_inner(conversation).await;
        if let Err(error) = &outcome {
            warn!(%error, "Activation failed");
        }
        conversation.record_outcome(outcome);
    }

    async fn activate_inner(&self, conversation: &mut Conversation) -> Result<(), PodError> {
        self.update_status_internal(conversation, StatusRequestType::Standard)
            .await?;
        let progress = self.progress()?;
        if progress > PodProgress::ReadyForInjection {
            return Err(PodError::StateInvalidForCommand(
                "pod is already activated".into(),
            ));
        }

        if progress == PodProgress::PairingSuccess {
            let setup_alert = AlertConfiguration {
                alert_index: 7,
                activate: true,
                trigger_auto_off: false,
                alert_after_minutes: Some(5),
                duration_minutes: Some(55),
                beep_type: BeepType::BipBeepFourTimes,
                beep_repeat: BeepRepeat::OnceEveryFiveMinutes,
            };
            let parameters = self.parameters()?.with_message_sequence(2);
            let request = RequestBuilder::new()
                .configure_alerts(vec![setup_alert])
                .build()?;
            self.require_exchange(conversation, request, parameters)
                .await?;

            let request = RequestBuilder::new().delivery_flags(0, 0).build()?;
            self.require_exchange(conversation, request, self.parameters()?)
                .await?;

            let request = RequestBuilder::new().prime_cannula().build()?;
            self.require_exchange(conversation, request, self.parameters()?)
                .await?;
            if self.progress()? != PodProgress::Purging {
                return Err(PodError::ResponseUnexpected(
                    "pod did not start purging".into(),
                ));
            }
        }

        while self.progress()? == PodProgress::Purging {
            let delay = self.prime_poll_delay()?;
            if !conversation.cancellable_delay(delay).await {
                conversation.mark_canceled();
                return Ok(());
            }
            self.update_status_internal(conversation, StatusRequestType::Standard)
                .await?;
        }
        if self.progress()? != PodProgress::ReadyForInjection {
            return Err(PodError::ResponseUnexpected(
                "pod did not become ready for injection".into(),
            ));
        }
        // TODO: arm the reservoir-low and expiry warning alerts here once the
        // warning schedule is finalized
        Ok(())
    }

    /// Inserts the cannula and starts therapy: programs the basal schedule,
    /// re-arms the alert slots, primes the cannula, and polls until the pod
    /// is running.
    pub async fn inject_and_start(
        &self,
        conversation: &mut Conversation,
        schedule: &BasalSchedule,
        utc_offset_minutes: i32,
    ) {
        info!(utc_offset_minutes, "Starting pod");
        let outcome = self
            .inject_and_start_inner(conversation, schedule, utc_offset_minutes)
            .await;
        if let Err(error) = &outcome {
            warn!(%error, "Start failed");
        }
        conversation.record_outcome(outcome);
    }

    async fn inject_and_start_inner(
        &self,
        conversation: &mut Conversation,
        schedule: &BasalSchedule,
        utc_offset_minutes: i32,
    ) -> Result<(), PodError> {
        self.update_status_internal(conversation, StatusRequestType::Standard)
            .await?;
        let progress = self.progress()?;
        if progress >= PodProgress::Running {
            return Err(PodError::StateInvalidForCommand(
                "pod is already started".into(),
            ));
        }
        if progress < PodProgress::ReadyForInjection {
            return Err(PodError::StateInvalidForCommand(
                "pod is not ready for injection".into(),
            ));
        }

        if progress == PodProgress::ReadyForInjection {
            schedule.validate()?;
            let pod_time = PodDateTime::from_utc(Utc::now(), utc_offset_minutes);
            self.pod.lock().unwrap().last_user_settings = Some(UserSettings { utc_offset_minutes });

            // The schedule program is a critical delivery command
            let parameters = self
                .parameters()?
                .with_repeat_first_packet()
                .with_critical_followup();
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
                .perform_exchange(request, parameters, conversation, Some(handle))
                .await
            {
                return Err(self.exchange_error(conversation));
            }
            if self.progress()? != PodProgress::BasalScheduleSet {
                return Err(PodError::ResponseUnexpected(
                    "pod did not accept the basal schedule".into(),
                ));
            }

            // Re-arm the slots: setup alert off, auto-off watchdog zeroed
            let alerts = vec![
                AlertConfiguration::deactivated(7),
                AlertConfiguration {
                    alert_index: 0,
                    activate: false,
                    trigger_auto_off: true,
                    alert_after_minutes: Some(15),
                    duration_minutes: None,
                    beep_type: BeepType::BipBeepFourTimes,
                    beep_repeat: BeepRepeat::OnceEveryMinuteForFifteenMinutes,
                },
            ];
            let request = RequestBuilder::new().configure_alerts(alerts).build()?;
            self.require_exchange(conversation, request, self.parameters()?)
                .await?;

            let request = RequestBuilder::new().insert_cannula().build()?;
            self.require_exchange(conversation, request, self.parameters()?)
                .await?;
            if self.progress()? != PodProgress::Priming {
                return Err(PodError::ResponseUnexpected(
                    "pod did not start priming".into(),
                ));
            }
            self.pod.lock().unwrap().insertion_date = Some(Utc::now());
        }

        while self.progress()? == PodProgress::Priming {
            let delay = self.prime_poll_delay()?;
            if !conversation.cancellable_delay(delay).await {
                conversation.mark_canceled();
                return Ok(());
            }
            self.update_status_internal(conversation, StatusRequestType::Standard)
                .await?;
        }
        if self.progress()? != PodProgress::Running {
            return Err(PodError::ResponseUnexpected(
                "pod did not start running".into(),
            ));
        }

        let mut pod = self.pod.lock().unwrap();
        pod.reservoir_used_for_priming =
            pod.last_status.as_ref().map(|s| s.delivered_insulin);
        Ok(())
    }

    /// Shuts the pod down permanently.
    pub async fn deactivate(&self, conversation: &mut Conversation) {
        info!("Deactivating pod");
        let outcome = self.deactivate_inner(conversation).await;
        if let Err(error) = &outcome {
            warn!(%error, "Deactivation failed");
        }
        conversation.record_outcome(outcome);
    }

    async fn deactivate_inner(&self, conversation: &mut Conversation) -> Result<(), PodError> {
        assert_paired(&self.pod.lock().unwrap())?;
        if self.progress()? >= PodProgress::Inactive {
            return Err(PodError::StateInvalidForCommand(
                "pod is already deactivated".into(),
            ));
        }
        let request = RequestBuilder::new().deactivate().build()?;
        self.require_exchange(conversation, request, self.parameters()?)
            .await?;
        if self.progress()? != PodProgress::Inactive {
            return Err(PodError::ResponseUnexpected("pod did not deactivate".into()));
        }
        Ok(())
    }

    /// Poll delay while the pod purges or primes: one second per
    /// undelivered pulse plus the settle floor.
    pub(crate) fn prime_poll_delay(&self) -> Result<Duration, PodError> {
        let status = self.status()?;
        let pulses = status.not_delivered_insulin.pulses() as u64;
        let config = self.config();
        Ok(Duration::from_millis(
            pulses * config.prime_pulse_wait_ms + config.prime_wait_floor_ms,
        ))
    }
}

#[cfg(test)]
mod tests {
    // Provisioning flows need a scripted exchange provider and run in the
    // integration tests (tests/manager_integration.rs).
}
