//! Contracts between the orchestrator and its external collaborators.
//!
//! The radio stack, the codec, and the durable store are injected through
//! these traits. They are object-safe (boxed futures) so the orchestrator
//! can hold them as `Arc<dyn Trait>` and tests can substitute scripted
//! doubles.

use std::future::Future;
use std::pin::Pin;

use super::parameters::ExchangeParameters;
use super::progress::{ExchangeHandle, ExchangeResult};
use crate::error::PodError;
use crate::pod::state::ErosPod;
use crate::protocol::request::{PodRequest, PodResponse};

/// Boxed future used by the object-safe contracts below.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One configured radio exchange cycle.
///
/// Obtained fresh from the [`MessageExchangeProvider`] for every attempt;
/// the orchestrator drives initialize → send/receive → parse exactly once
/// per object.
pub trait MessageExchange: Send {
    /// Best-effort radio/channel setup for this exchange.
    fn initialize<'a>(
        &'a mut self,
        progress: &'a ExchangeHandle,
    ) -> BoxFuture<'a, Result<(), PodError>>;

    /// Transmits the request and awaits the pod's response.
    fn get_response<'a>(
        &'a mut self,
        request: &'a PodRequest,
        progress: &'a ExchangeHandle,
    ) -> BoxFuture<'a, Result<PodResponse, PodError>>;

    /// Decodes the response, updating `pod.last_status` and possibly the
    /// pod's `runtime_variables.nonce_sync` slot (nonce reject).
    ///
    /// `last_status` always becomes the newest reply verbatim. Its progress
    /// never decreases across replies because the pod never walks its
    /// lifecycle back; that is a protocol property of the pod, not something
    /// the orchestrator re-checks or corrects.
    ///
    /// Parsing is CPU-only and therefore synchronous; the caller holds the
    /// pod lock only for the duration of this call.
    fn parse_response(
        &mut self,
        response: &PodResponse,
        pod: &mut ErosPod,
        progress: &ExchangeHandle,
    ) -> Result<(), PodError>;
}

/// Supplies one configured [`MessageExchange`] per call.
pub trait MessageExchangeProvider: Send + Sync {
    /// Creates an exchange configured with the given parameters for the
    /// given pod.
    fn get_message_exchange<'a>(
        &'a self,
        parameters: &'a ExchangeParameters,
        pod: &'a ErosPod,
    ) -> BoxFuture<'a, Result<Box<dyn MessageExchange>, PodError>>;
}

/// Durable sink for exchange outcomes.
///
/// Called exactly once per exchange from the finalization path, including
/// failure and exception paths.
pub trait ExchangeRepository: Send + Sync {
    /// Appends one exchange outcome for the given pod.
    fn save<'a>(
        &'a self,
        pod: &'a ErosPod,
        result: &'a ExchangeResult,
    ) -> BoxFuture<'a, Result<(), PodError>>;
}

/// A usable radio.
pub trait Radio: Send + Sync {
    /// Stable identifier (e.g. a peripheral address).
    fn id(&self) -> &str;

    /// Human-readable device name.
    fn name(&self) -> &str;
}

/// Selects a radio for the exchange layer.
pub trait RadioProvider: Send + Sync {
    /// Returns the first radio that is currently usable.
    fn first_available(&self) -> BoxFuture<'_, Result<Box<dyn Radio>, PodError>>;
}
