//! The pod manager: conversation-scoped therapy command orchestration.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        PodManager                            │
//! │                                                              │
//! │  start_conversation ──► Conversation (single permit, token)  │
//! │                                                              │
//! │  therapy operation                                           │
//! │    ├── preconditions over pod.last_status                    │
//! │    ├── RequestBuilder ──► PodRequest                         │
//! │    ├── perform_exchange ──► MessageExchangeProvider          │
//! │    │     initialize → send/receive → parse → nonce resync    │
//! │    │     └── ExchangeRepository.save (every termination)     │
//! │    └── wait-and-poll loops (cancellable)                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every therapy operation runs inside the caller's [`Conversation`]; its
//! outcome is recorded there (`canceled`, `failed`, `exception`, current
//! exchange result) and the operation itself returns normally.

pub mod conversation;
mod delivery;
mod preconditions;
mod provisioning;

pub use conversation::{Conversation, RequestSource};

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::PodError;
use crate::exchange::parameters::ExchangeParameters;
use crate::exchange::progress::ExchangeHandle;
use crate::exchange::traits::{ExchangeRepository, MessageExchangeProvider};
use crate::pod::nonce::Nonce;
use crate::pod::progress::PodProgress;
use crate::pod::state::SharedPod;
use crate::pod::status::PodStatus;
use crate::protocol::builder::RequestBuilder;
use crate::protocol::request::{PodRequest, StatusRequestType};

/// Tuning for the delivery wait loops.
///
/// Defaults implement the pod's timing model: each undelivered 0.05 U pulse
/// takes 2 s during a bolus and 1 s during purge/prime, plus a settle floor
/// before the next status poll.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Wait per undelivered pulse while a bolus runs, in milliseconds.
    pub bolus_pulse_wait_ms: u64,
    /// Settle time added to every bolus poll delay, in milliseconds.
    pub bolus_wait_floor_ms: u64,
    /// Wait per undelivered pulse while purging or priming, in milliseconds.
    pub prime_pulse_wait_ms: u64,
    /// Settle time added to every purge/prime poll delay, in milliseconds.
    pub prime_wait_floor_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            bolus_pulse_wait_ms: 2000,
            bolus_wait_floor_ms: 500,
            prime_pulse_wait_ms: 1000,
            prime_wait_floor_ms: 200,
        }
    }
}

impl ManagerConfig {
    /// Sets the per-pulse bolus wait.
    pub fn with_bolus_pulse_wait_ms(mut self, ms: u64) -> Self {
        self.bolus_pulse_wait_ms = ms;
        self
    }

    /// Sets the bolus poll floor.
    pub fn with_bolus_wait_floor_ms(mut self, ms: u64) -> Self {
        self.bolus_wait_floor_ms = ms;
        self
    }

    /// Sets the per-pulse purge/prime wait.
    pub fn with_prime_pulse_wait_ms(mut self, ms: u64) -> Self {
        self.prime_pulse_wait_ms = ms;
        self
    }

    /// Sets the purge/prime poll floor.
    pub fn with_prime_wait_floor_ms(mut self, ms: u64) -> Self {
        self.prime_wait_floor_ms = ms;
        self
    }
}

/// Orchestrates therapy commands against one pod.
///
/// Owns the pod's conversation mutex (a single-permit semaphore) and the
/// per-pod nonce generator; composes requests, parameters, and provider
/// exchanges into the operations of the therapy surface.
pub struct PodManager {
    pod: SharedPod,
    provider: Arc<dyn MessageExchangeProvider>,
    repository: Arc<dyn ExchangeRepository>,
    conversation_mutex: Arc<Semaphore>,
    nonce: StdMutex<Option<Nonce>>,
    config: ManagerConfig,
}

impl PodManager {
    /// Creates a manager bound to one pod record and its collaborators.
    pub fn new(
        pod: SharedPod,
        provider: Arc<dyn MessageExchangeProvider>,
        repository: Arc<dyn ExchangeRepository>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            pod,
            provider,
            repository,
            conversation_mutex: Arc::new(Semaphore::new(1)),
            nonce: StdMutex::new(None),
            config,
        }
    }

    /// Shared handle to the managed pod record.
    pub fn pod(&self) -> SharedPod {
        Arc::clone(&self.pod)
    }

    /// Opens an exclusive conversation on the pod.
    ///
    /// Waits for the conversation mutex: unboundedly with `timeout == None`,
    /// otherwise up to the given duration. Returns `None` when the pod is
    /// still busy at the deadline. The returned conversation releases the
    /// mutex on drop, on every exit path.
    pub async fn start_conversation(
        &self,
        timeout: Option<Duration>,
        source: RequestSource,
    ) -> Option<Conversation> {
        let acquire = Arc::clone(&self.conversation_mutex).acquire_owned();
        let permit = match timeout {
            None => acquire.await.ok()?,
            Some(timeout) => tokio::time::timeout(timeout, acquire).await.ok()?.ok()?,
        };
        debug!(source = %source, "Conversation started");
        Some(Conversation::new(Arc::clone(&self.pod), permit, source))
    }

    // ------------------------------------------------------------------
    // Nonce handling
    // ------------------------------------------------------------------

    /// Emits the next nonce, creating the generator from the pod's identity
    /// on first use.
    fn next_nonce(&self) -> Result<u32, PodError> {
        let (lot, serial) = {
            let pod = self.pod.lock().unwrap();
            (pod.lot, pod.serial)
        };
        let (Some(lot), Some(serial)) = (lot, serial) else {
            return Err(PodError::Internal(
                "pod lot and serial are not registered".into(),
            ));
        };
        let mut generator = self.nonce.lock().unwrap();
        Ok(generator.get_or_insert_with(|| Nonce::new(lot, serial)).next())
    }

    /// Re-seeds the generator from a pod sync word and emits the nonce for
    /// the retry message.
    fn resync_nonce(&self, sync_word: u16, message_sequence: u8) -> Result<u32, PodError> {
        let mut generator = self.nonce.lock().unwrap();
        let generator = generator
            .as_mut()
            .ok_or_else(|| PodError::Internal("nonce generator not initialized".into()))?;
        generator.sync(sync_word, message_sequence);
        Ok(generator.next())
    }

    /// The standard per-exchange parameters: next nonce, auto level
    /// adjustment on, no overrides.
    fn standard_parameters(&self) -> Result<ExchangeParameters, PodError> {
        Ok(ExchangeParameters::new(self.next_nonce()?))
    }

    // ------------------------------------------------------------------
    // Exchange primitive
    // ------------------------------------------------------------------

    /// Performs one exchange: initialize, send, receive, parse, with at most
    /// one nonce-resync retry.
    ///
    /// Every termination path finishes the progress record (result time,
    /// success or captured error, post-parse status snapshot) and persists
    /// it through the repository exactly once. Returns the exchange success.
    pub(crate) async fn perform_exchange(
        &self,
        request: PodRequest,
        parameters: ExchangeParameters,
        conversation: &mut Conversation,
        progress: Option<ExchangeHandle>,
    ) -> bool {
        let progress = progress.unwrap_or_else(|| conversation.new_exchange(request.clone()));
        progress.mark_running(Utc::now());
        debug!(request = %request, "Exchange started");

        let outcome = self.run_exchange(&request, parameters, &progress).await;

        progress.set_status_snapshot(self.pod.lock().unwrap().last_status.clone());
        let error = outcome.err();
        if let Some(error) = &error {
            warn!(request = %request, %error, "Exchange failed");
        }
        progress.finish(Utc::now(), error);

        let pod_snapshot = self.pod.lock().unwrap().clone();
        let result = progress.result();
        if let Err(error) = self.repository.save(&pod_snapshot, &result).await {
            warn!(%error, "Failed to persist exchange result");
        }
        result.success
    }

    /// The radio cycle proper, including the nonce resync retry.
    async fn run_exchange(
        &self,
        request: &PodRequest,
        mut parameters: ExchangeParameters,
        progress: &ExchangeHandle,
    ) -> Result<(), PodError> {
        let pod_snapshot = self.pod.lock().unwrap().clone();
        let mut exchange = self
            .provider
            .get_message_exchange(&parameters, &pod_snapshot)
            .await?;
        exchange.initialize(progress).await?;
        let response = exchange.get_response(request, progress).await?;
        let sync_word = {
            let mut pod = self.pod.lock().unwrap();
            exchange.parse_response(&response, &mut pod, progress)?;
            pod.runtime_variables.nonce_sync
        };
        let Some(sync_word) = sync_word else {
            return Ok(());
        };

        // The pod rejected our nonce and answered with a sync word. Retry
        // once with the sequence the pod expects and a re-seeded nonce.
        let retry_sequence = (response.sequence + 15) % 16;
        warn!(
            request = %request,
            sync_word,
            retry_sequence,
            "Pod requested nonce resync"
        );
        self.pod.lock().unwrap().runtime_variables.nonce_sync = None;
        parameters.nonce = self.resync_nonce(sync_word, retry_sequence)?;
        parameters.message_sequence_override = Some(retry_sequence);

        let pod_snapshot = self.pod.lock().unwrap().clone();
        let mut exchange = self
            .provider
            .get_message_exchange(&parameters, &pod_snapshot)
            .await?;
        exchange.initialize(progress).await?;
        let response = exchange.get_response(request, progress).await?;
        let still_out_of_sync = {
            let mut pod = self.pod.lock().unwrap();
            exchange.parse_response(&response, &mut pod, progress)?;
            pod.runtime_variables.nonce_sync.take().is_some()
        };
        if still_out_of_sync {
            return Err(PodError::ResponseUnexpected(
                "Nonce re-negotiation failed".into(),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Status refresh
    // ------------------------------------------------------------------

    /// Requests a status page and waits for the parsed reply.
    ///
    /// Callers use this both to gate preconditions and to advance polling
    /// loops; on failure the captured exchange error is returned.
    pub(crate) async fn update_status_internal(
        &self,
        conversation: &mut Conversation,
        status_type: StatusRequestType,
    ) -> Result<(), PodError> {
        let parameters = self.standard_parameters()?;
        let request = RequestBuilder::new().status(status_type).build()?;
        if self
            .perform_exchange(request, parameters, conversation, None)
            .await
        {
            Ok(())
        } else {
            Err(self.exchange_error(conversation))
        }
    }

    /// Refreshes the pod status, recording the outcome on the conversation.
    pub async fn update_status(
        &self,
        conversation: &mut Conversation,
        status_type: StatusRequestType,
    ) {
        let outcome = self.update_status_internal(conversation, status_type).await;
        conversation.record_outcome(outcome);
    }

    // ------------------------------------------------------------------
    // Reserved surface
    // ------------------------------------------------------------------

    /// Reprograms alert slots outside the activation flow. Reserved.
    pub async fn configure_alerts(
        &self,
        conversation: &mut Conversation,
        _alerts: Vec<crate::protocol::request::AlertConfiguration>,
    ) {
        conversation.record_outcome(Err(PodError::NotImplemented("configure_alerts".into())));
    }

    /// Starts an extended bolus. Reserved.
    pub async fn start_extended_bolus(
        &self,
        conversation: &mut Conversation,
        _amount: crate::insulin::Units,
        _duration_hours: f64,
    ) {
        conversation.record_outcome(Err(PodError::NotImplemented("start_extended_bolus".into())));
    }

    /// Cancels a running extended bolus. Reserved.
    pub async fn cancel_extended_bolus(&self, conversation: &mut Conversation) {
        conversation.record_outcome(Err(PodError::NotImplemented("cancel_extended_bolus".into())));
    }

    /// Suspends basal delivery. Reserved.
    pub async fn suspend_basal(&self, conversation: &mut Conversation) {
        conversation.record_outcome(Err(PodError::NotImplemented("suspend_basal".into())));
    }

    // ------------------------------------------------------------------
    // Shared helpers for the therapy operations
    // ------------------------------------------------------------------

    /// Performs an exchange and converts a failure into its captured error.
    pub(crate) async fn require_exchange(
        &self,
        conversation: &mut Conversation,
        request: PodRequest,
        parameters: ExchangeParameters,
    ) -> Result<(), PodError> {
        if self
            .perform_exchange(request, parameters, conversation, None)
            .await
        {
            Ok(())
        } else {
            Err(self.exchange_error(conversation))
        }
    }

    /// The error captured on the conversation's current exchange.
    pub(crate) fn exchange_error(&self, conversation: &Conversation) -> PodError {
        conversation
            .current_exchange()
            .and_then(|handle| handle.result().error)
            .unwrap_or_else(|| PodError::RadioGeneric("exchange failed".into()))
    }

    /// Snapshot of the last parsed status.
    pub(crate) fn status(&self) -> Result<PodStatus, PodError> {
        self.pod
            .lock()
            .unwrap()
            .last_status
            .clone()
            .ok_or_else(|| PodError::StateInvalidForCommand("pod status unknown".into()))
    }

    /// Lifecycle progress of the last parsed status.
    pub(crate) fn progress(&self) -> Result<PodProgress, PodError> {
        Ok(self.status()?.progress)
    }

    /// The standard parameters, exposed to the operation modules.
    pub(crate) fn parameters(&self) -> Result<ExchangeParameters, PodError> {
        self.standard_parameters()
    }

    /// Wait-loop tuning.
    pub(crate) fn config(&self) -> &ManagerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::progress::ExchangeResult;
    use crate::exchange::traits::BoxFuture;
    use crate::pod::state::ErosPod;

    /// Provider that refuses every exchange; enough for conversation tests.
    struct RefusingProvider;

    impl MessageExchangeProvider for RefusingProvider {
        fn get_message_exchange<'a>(
            &'a self,
            _parameters: &'a ExchangeParameters,
            _pod: &'a ErosPod,
        ) -> BoxFuture<'a, Result<Box<dyn crate::exchange::traits::MessageExchange>, PodError>>
        {
            Box::pin(async { Err(PodError::RadioGeneric("no radio".into())) })
        }
    }

    /// Repository that counts saves.
    struct CountingRepository {
        saves: StdMutex<usize>,
    }

    impl ExchangeRepository for CountingRepository {
        fn save<'a>(
            &'a self,
            _pod: &'a ErosPod,
            _result: &'a ExchangeResult,
        ) -> BoxFuture<'a, Result<(), PodError>> {
            Box::pin(async move {
                *self.saves.lock().unwrap() += 1;
                Ok(())
            })
        }
    }

    fn manager() -> (PodManager, Arc<CountingRepository>) {
        let repository = Arc::new(CountingRepository {
            saves: StdMutex::new(0),
        });
        let manager = PodManager::new(
            ErosPod::registered(0x1F0E_89F1, 44147, 1_234_567).into_shared(),
            Arc::new(RefusingProvider),
            Arc::clone(&repository) as Arc<dyn ExchangeRepository>,
            ManagerConfig::default(),
        );
        (manager, repository)
    }

    #[test]
    fn test_manager_config_defaults_and_builders() {
        let config = ManagerConfig::default();
        assert_eq!(config.bolus_pulse_wait_ms, 2000);
        assert_eq!(config.bolus_wait_floor_ms, 500);
        assert_eq!(config.prime_pulse_wait_ms, 1000);
        assert_eq!(config.prime_wait_floor_ms, 200);

        let config = ManagerConfig::default()
            .with_bolus_pulse_wait_ms(1)
            .with_bolus_wait_floor_ms(2)
            .with_prime_pulse_wait_ms(3)
            .with_prime_wait_floor_ms(4);
        assert_eq!(config.bolus_pulse_wait_ms, 1);
        assert_eq!(config.bolus_wait_floor_ms, 2);
        assert_eq!(config.prime_pulse_wait_ms, 3);
        assert_eq!(config.prime_wait_floor_ms, 4);
    }

    #[tokio::test]
    async fn test_only_one_conversation_at_a_time() {
        let (manager, _repository) = manager();

        let first = manager
            .start_conversation(None, RequestSource::User)
            .await
            .unwrap();

        // Second acquisition with a bounded wait times out
        let second = manager
            .start_conversation(Some(Duration::from_millis(10)), RequestSource::Automation)
            .await;
        assert!(second.is_none());

        // Dropping the first conversation releases the mutex
        drop(first);
        let third = manager
            .start_conversation(Some(Duration::from_millis(10)), RequestSource::Automation)
            .await;
        assert!(third.is_some());
    }

    #[tokio::test]
    async fn test_failed_exchange_is_persisted_once() {
        let (manager, repository) = manager();
        let mut conversation = manager
            .start_conversation(None, RequestSource::User)
            .await
            .unwrap();

        let parameters = manager.parameters().unwrap();
        let success = manager
            .perform_exchange(
                PodRequest::CancelBolus,
                parameters,
                &mut conversation,
                None,
            )
            .await;

        assert!(!success);
        assert_eq!(*repository.saves.lock().unwrap(), 1);

        let result = conversation.current_exchange().unwrap().result();
        assert!(!result.success);
        assert_eq!(result.error, Some(PodError::RadioGeneric("no radio".into())));
        assert!(result.request_time.is_some());
        assert!(result.result_time.is_some());
    }

    #[tokio::test]
    async fn test_next_nonce_requires_identity() {
        let manager = PodManager::new(
            ErosPod::new(0x1F0E_89F1).into_shared(),
            Arc::new(RefusingProvider),
            Arc::new(CountingRepository {
                saves: StdMutex::new(0),
            }),
            ManagerConfig::default(),
        );
        assert!(matches!(
            manager.next_nonce(),
            Err(PodError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_nonces_are_distinct() {
        let (manager, _repository) = manager();
        let a = manager.next_nonce().unwrap();
        let b = manager.next_nonce().unwrap();
        assert_ne!(a, b);
    }
}
