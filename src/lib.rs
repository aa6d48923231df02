//! podcore - command orchestration for Omnipod-style insulin pods
//!
//! This library is the state-aware conductor between a mobile controller and
//! a disposable insulin pod reached over a short-range radio link. It turns
//! high-level therapy commands (pair, activate, bolus, temp basal, cancel,
//! deactivate) into sequenced request/response exchanges, enforces the pod's
//! state-machine preconditions, drives the wait-and-poll loops during
//! delivery phases, and recovers from nonce drift via the pod's
//! resynchronization sub-protocol.
//!
//! The radio codec, the durable store, and the UI are external collaborators
//! consumed through the traits in [`exchange`].
//!
//! # High-Level API
//!
//! ```ignore
//! use podcore::manager::{PodManager, RequestSource};
//!
//! let manager = PodManager::new(pod, provider, repository, Default::default());
//!
//! // Acquire the pod's exclusive conversation, then run one operation
//! let mut conversation = manager
//!     .start_conversation(None, RequestSource::User)
//!     .await
//!     .expect("pod is busy");
//! manager.bolus(&mut conversation, amount, true).await;
//!
//! // Outcome is on the conversation
//! assert!(conversation.exception().is_none());
//! ```

pub mod error;
pub mod exchange;
pub mod insulin;
pub mod manager;
pub mod pod;
pub mod protocol;
pub mod time;

/// Version of the podcore library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
