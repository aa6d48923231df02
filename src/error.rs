//! Error types for pod command orchestration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while driving a pod.
///
/// Every variant carries a human-readable message. Therapy operations never
/// let these escape to the caller directly: the operation boundary records
/// the error on the active [`Conversation`](crate::manager::Conversation)
/// and returns normally, while exchange-level failures are captured onto the
/// exchange progress and surface as `success == false`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PodError {
    /// A therapy parameter failed validation before any radio traffic.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The pod's last known state does not permit the requested command.
    #[error("pod state invalid for command: {0}")]
    StateInvalidForCommand(String),

    /// The pod answered, but not with what the protocol requires here.
    #[error("unexpected pod response: {0}")]
    ResponseUnexpected(String),

    /// No response arrived within the radio receive window.
    #[error("radio receive timeout: {0}")]
    RadioRecvTimeout(String),

    /// The request could not be transmitted within the send window.
    #[error("radio send timeout: {0}")]
    RadioSendTimeout(String),

    /// Any other radio-layer failure.
    #[error("radio error: {0}")]
    RadioGeneric(String),

    /// A bug or broken invariant inside the orchestrator itself.
    #[error("internal error: {0}")]
    Internal(String),

    /// Reserved operation surface that is not implemented yet.
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl PodError {
    /// True for errors raised by the radio layer (send, receive, generic).
    pub fn is_radio(&self) -> bool {
        matches!(
            self,
            Self::RadioRecvTimeout(_) | Self::RadioSendTimeout(_) | Self::RadioGeneric(_)
        )
    }
}
