// src/protocol/mod.rs

//! Wire-level protocol pieces shared by overlay backends.

mod correlation;

pub use correlation::CorrelationId;

#[cfg(feature = "transport_mqtt")]
mod wire;

#[cfg(feature = "transport_mqtt")]
pub(crate) use wire::{WireMessage, WireReplyResult};
