//! Exclusive per-pod command sessions.
//!
//! A [`Conversation`] is the scope within which therapy operations run. It
//! holds the pod's single conversation permit (released exactly once, on
//! drop), a cooperative cancellation token, the current exchange handle, and
//! the terminal outcome flags the caller inspects after each operation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;

use crate::error::PodError;
use crate::exchange::progress::ExchangeHandle;
use crate::pod::state::{ConversationMeta, SharedPod};
use crate::protocol::request::PodRequest;

/// Who asked for this conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestSource {
    /// The person wearing the pod, through the app.
    User,
    /// A closed-loop or scheduling integration.
    Automation,
    /// Service and troubleshooting flows.
    Diagnostics,
}

impl std::fmt::Display for RequestSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::User => "User",
            Self::Automation => "Automation",
            Self::Diagnostics => "Diagnostics",
        };
        write!(f, "{name}")
    }
}

/// An exclusive session against one pod.
///
/// Terminal flags (`canceled`, `failed`, `exception`) are monotonic: once
/// set they stay set for the life of the conversation. Dropping the
/// conversation releases the pod's mutex and clears the pod's
/// `active_conversation` metadata.
pub struct Conversation {
    pod: SharedPod,
    source: RequestSource,
    started: DateTime<Utc>,
    current_exchange: Option<ExchangeHandle>,
    canceled: bool,
    failed: bool,
    exception: Option<PodError>,
    token: CancellationToken,
    // Held for mutual exclusion; dropping it releases the pod's mutex.
    _permit: OwnedSemaphorePermit,
}

impl Conversation {
    /// Creates a conversation that owns the pod's conversation permit.
    pub(crate) fn new(pod: SharedPod, permit: OwnedSemaphorePermit, source: RequestSource) -> Self {
        let started = Utc::now();
        if let Ok(mut pod) = pod.lock() {
            pod.active_conversation = Some(ConversationMeta { source, started });
        }
        Self {
            pod,
            source,
            started,
            current_exchange: None,
            canceled: false,
            failed: false,
            exception: None,
            token: CancellationToken::new(),
            _permit: permit,
        }
    }

    /// Who asked for this conversation.
    pub fn source(&self) -> RequestSource {
        self.source
    }

    /// When the conversation acquired the pod.
    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }

    /// Allocates a progress record for a request and links it as the
    /// current exchange.
    pub fn new_exchange(&mut self, request: PodRequest) -> ExchangeHandle {
        let handle = ExchangeHandle::new(request);
        self.current_exchange = Some(handle.clone());
        handle
    }

    /// The most recent exchange of this conversation, if any.
    pub fn current_exchange(&self) -> Option<&ExchangeHandle> {
        self.current_exchange.as_ref()
    }

    /// Token observed by the delivery wait loops.
    ///
    /// Clone it to request cancellation from another task; in-flight radio
    /// exchanges still complete, and the operation honors the request at its
    /// next wait boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Requests cooperative cancellation of the running operation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once the operation was canceled on the pod.
    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    /// True once a cancel was attempted but the pod kept delivering.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// The error that ended the last operation, if any.
    pub fn exception(&self) -> Option<&PodError> {
        self.exception.as_ref()
    }

    /// Marks the conversation as canceled on the pod.
    pub(crate) fn mark_canceled(&mut self) {
        self.canceled = true;
    }

    /// Marks the conversation as "cancel attempted but failed".
    pub fn cancel_failed(&mut self) {
        self.failed = true;
    }

    /// Records an operation outcome; the first error wins.
    pub(crate) fn record_outcome(&mut self, outcome: Result<(), PodError>) {
        if let Err(error) = outcome {
            if self.exception.is_none() {
                self.exception = Some(error);
            }
        }
    }

    /// Sleeps for `delay` unless cancellation is requested first.
    ///
    /// Returns `true` when the full delay elapsed, `false` when the token
    /// fired (including a token that was already canceled on entry).
    pub(crate) async fn cancellable_delay(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        if let Ok(mut pod) = self.pod.lock() {
            pod.active_conversation = None;
        }
        // _permit drops here, releasing the conversation mutex exactly once
    }
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("source", &self.source)
            .field("started", &self.started)
            .field("canceled", &self.canceled)
            .field("failed", &self.failed)
            .field("exception", &self.exception)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::state::ErosPod;
    use std::sync::Arc;
    use tokio::sync::Semaphore;

    async fn conversation(pod: SharedPod) -> (Conversation, Arc<Semaphore>) {
        let semaphore = Arc::new(Semaphore::new(1));
        let permit = semaphore.clone().acquire_owned().await.unwrap();
        (
            Conversation::new(pod, permit, RequestSource::User),
            semaphore,
        )
    }

    #[tokio::test]
    async fn test_conversation_registers_and_clears_pod_metadata() {
        let pod = ErosPod::new(0x1F0E_89F1).into_shared();
        let (conversation, semaphore) = conversation(pod.clone()).await;

        {
            let meta = pod.lock().unwrap().active_conversation.clone();
            assert_eq!(meta.unwrap().source, RequestSource::User);
        }
        assert_eq!(semaphore.available_permits(), 0);

        drop(conversation);
        assert!(pod.lock().unwrap().active_conversation.is_none());
        assert_eq!(semaphore.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_new_exchange_links_current() {
        let pod = ErosPod::new(0x1F0E_89F1).into_shared();
        let (mut conversation, _semaphore) = conversation(pod).await;

        assert!(conversation.current_exchange().is_none());
        let handle = conversation.new_exchange(PodRequest::CancelBolus);
        assert_eq!(
            conversation.current_exchange().unwrap().request(),
            handle.request()
        );
    }

    #[tokio::test]
    async fn test_terminal_flags_are_monotonic() {
        let pod = ErosPod::new(0x1F0E_89F1).into_shared();
        let (mut conversation, _semaphore) = conversation(pod).await;

        conversation.record_outcome(Err(PodError::Internal("first".into())));
        conversation.record_outcome(Err(PodError::Internal("second".into())));
        assert_eq!(
            conversation.exception(),
            Some(&PodError::Internal("first".into()))
        );

        conversation.mark_canceled();
        conversation.cancel_failed();
        conversation.record_outcome(Ok(()));
        assert!(conversation.is_canceled());
        assert!(conversation.is_failed());
        assert!(conversation.exception().is_some());
    }

    #[tokio::test]
    async fn test_cancellable_delay_observes_token() {
        let pod = ErosPod::new(0x1F0E_89F1).into_shared();
        let (conversation, _semaphore) = conversation(pod).await;

        conversation.cancel();
        assert!(!conversation.cancellable_delay(Duration::from_secs(3600)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellable_delay_elapses_without_cancel() {
        let pod = ErosPod::new(0x1F0E_89F1).into_shared();
        let (conversation, _semaphore) = conversation(pod).await;

        assert!(conversation.cancellable_delay(Duration::from_millis(500)).await);
    }
}
