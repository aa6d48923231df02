//! Typed request/response surface of the pod protocol.
//!
//! Only the command layer is modeled here; the on-air packet codec lives in
//! the external radio stack and consumes these types through the exchange
//! traits.

pub mod builder;
pub mod request;

pub use builder::RequestBuilder;
pub use request::{
    AlertConfiguration, BeepRepeat, BeepType, PodRequest, PodResponse, StatusRequestType,
};
