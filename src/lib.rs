//! Session manager for pub/sub overlay networks on small devices
//!
//! This library keeps one long-lived session to a pub/sub overlay open on
//! behalf of the rest of the firmware: it resolves transport parameters,
//! connects with unbounded fixed-delay retry, declares a fixed set of
//! resources (subscriber, publisher, optional query responder), and
//! signals lifecycle milestones through shared [`Readiness`] flags so
//! other tasks can safely wait before publishing or querying.
//!

// Import all sub modules once...
mod config;
mod domain;
mod error;
mod heartbeat;
mod keys;
mod macros;
mod manager;
mod netinfo;
mod protocol;
mod readiness;
mod resolver;
mod scout;
mod transport;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use manager::{ProviderError, QueryProvider, SessionManager};

pub use config::{
    //
    DeviceRole,
    HeartbeatConfig,
    SessionConfig,
    SessionMode,
    TransportKind,
    RETRY_DELAY,
};

pub use error::{Error, OpenError, Result};
pub use keys::TopicMap;
pub use protocol::CorrelationId;
pub use readiness::{flag, Readiness};
pub use resolver::{resolve, LinkParams, LinkProtocol};

pub use heartbeat::Heartbeat;
pub use netinfo::{active_network_interface, NetworkInfo};
pub use scout::{scout, SCOUT_WAIT};

pub use transport::create_memory_overlay;

#[cfg(feature = "transport_mqtt")]
pub use transport::create_mqtt_overlay;

// --- public re-exports
pub use domain::{
    //
    Declared,
    KeyExpr,
    OutboundBuffer,
    Overlay,
    OverlayPtr,
    OverlaySession,
    PeerId,
    PublisherHandle,
    Query,
    QueryHandler,
    QueryReply,
    QueryableHandle,
    ReplyHandler,
    Sample,
    SampleHandler,
    SessionPtr,
    SubscriberHandle,
};

/// Create the default overlay backend for this build.
///
/// With the `transport_mqtt` feature (the default), this is the
/// MQTT-backed overlay; otherwise the in-memory reference backend.
pub fn create_overlay() -> OverlayPtr {
    // ---
    #[cfg(feature = "transport_mqtt")]
    {
        return transport::mqtt::create_overlay();
    }

    // Fallback / default
    #[cfg(not(feature = "transport_mqtt"))]
    {
        transport::memory::create_overlay()
    }
}

/// Acquire mutex guard, ignoring poisoning
pub(crate) fn lock_ignore_poison<T>(m: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
