//! Session abstraction consumed by the controller.

mod base;
mod loopback;
pub(crate) mod managed;

pub use base::{DeviceConfig, Feedback, SessionConnector, SessionHandle};
pub use loopback::{LoopbackConnector, LoopbackSession};
pub(crate) use managed::ManagedSession;
