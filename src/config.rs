//! Public, backend-agnostic session configuration.
//!
//! This type intentionally contains no backend-specific concepts
//! (e.g. MQTT client options). Overlay backends are responsible for
//! interpreting the resolved link parameters into concrete connection
//! settings.
//!
//! The configuration is static: it is validated once, before the first
//! connection attempt, and never changes for the life of the manager.

use std::time::Duration;

use crate::keys::TopicMap;

/// Fixed delay between session-open attempts.
///
/// Non-exponential and unjittered: every device retries on the same
/// cadence until the endpoint becomes reachable or `stop()` is called.
pub const RETRY_DELAY: Duration = Duration::from_secs(15);

/// Role of this device in the application protocol.
///
/// The role selects which well-known topics are used for publishing vs.
/// subscribing (see [`TopicMap`]) and which side of the query exchange
/// this device sits on: the initiator answers queries, the responder
/// issues them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    /// Connects out to a peer; publishes announcements, answers queries.
    Initiator,

    /// Listens for a peer; publishes results, issues queries.
    Responder,
}

/// How the session attaches to the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Actively connect to a remote peer or router.
    ConnectToPeer,

    /// Listen on a local or multicast endpoint and wait for peers.
    ListenAsPeer,
}

/// Underlying link flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Unicast stream link (tcp).
    Stream,

    /// Multicast datagram link (udp); peer-listen only.
    DatagramMulticast,
}

/// Configuration of the auxiliary heartbeat exchange.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Channel (key expression) the heartbeat pair is declared on.
    pub channel: String,

    /// Message prefix; a running counter is appended on each beat.
    pub message: String,

    /// Interval between beats. Deployments sharing a segment should use
    /// distinct, preferably prime, intervals to avoid collisions.
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            channel: "heartbeats".to_string(),
            message: "overlink-heartbeat".to_string(),
            interval: Duration::from_secs(61),
        }
    }
}

/// Session configuration and connection parameters.
///
/// Construct with one of [`initiator`](Self::initiator),
/// [`responder`](Self::responder) or [`peer`](Self::peer), then refine
/// with the `with_*` methods.
///
/// # Example
///
/// ```
/// use overlink::{HeartbeatConfig, SessionConfig};
///
/// let config = SessionConfig::initiator("192.168.137.37")
///     .with_port(7447)
///     .with_heartbeat(HeartbeatConfig::default())
///     .with_scout(true);
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Role of this device.
    pub role: DeviceRole,

    /// Attachment mode.
    pub mode: SessionMode,

    /// Link flavor.
    pub transport: TransportKind,

    /// Remote address to connect to (ConnectToPeer + Stream).
    pub remote_address: Option<String>,

    /// Multicast group address (DatagramMulticast).
    pub multicast_group: Option<String>,

    /// Overlay port. Defaults to 7447.
    pub port: u16,

    /// Interface name override. When `None`, the active interface is
    /// looked up per connection attempt.
    pub interface: Option<String>,

    /// Well-known application topics.
    pub topics: TopicMap,

    /// Declare the main subscriber.
    pub subscriber_enabled: bool,

    /// Declare the main publisher.
    pub publisher_enabled: bool,

    /// Declare the query responder (effective only for the role that
    /// answers queries).
    pub query_responder_enabled: bool,

    /// Heartbeat exchange; `None` disables it.
    pub heartbeat: Option<HeartbeatConfig>,

    /// Run a one-shot peer scout before establishing the session.
    pub scout_enabled: bool,

    /// Delay between failed session-open attempts.
    ///
    /// Defaults to [`RETRY_DELAY`]. Exposed so tests and co-located
    /// deployments can detune the cadence; the policy itself (fixed,
    /// unbounded) is not configurable.
    pub retry_delay: Duration,
}

impl SessionConfig {
    fn new(role: DeviceRole, mode: SessionMode, transport: TransportKind) -> Self {
        Self {
            role,
            mode,
            transport,
            remote_address: None,
            multicast_group: None,
            port: 7447,
            interface: None,
            topics: TopicMap::default(),
            subscriber_enabled: true,
            publisher_enabled: true,
            query_responder_enabled: true,
            heartbeat: None,
            scout_enabled: false,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Initiator over a unicast stream: connects to `remote_address`.
    pub fn initiator(remote_address: impl Into<String>) -> Self {
        let mut config = Self::new(
            DeviceRole::Initiator,
            SessionMode::ConnectToPeer,
            TransportKind::Stream,
        );
        config.remote_address = Some(remote_address.into());
        config
    }

    /// Responder over a unicast stream: listens on the local address.
    pub fn responder() -> Self {
        Self::new(
            DeviceRole::Responder,
            SessionMode::ListenAsPeer,
            TransportKind::Stream,
        )
    }

    /// Multicast peer: either role, listening on `group`.
    pub fn peer(role: DeviceRole, group: impl Into<String>) -> Self {
        let mut config = Self::new(role, SessionMode::ListenAsPeer, TransportKind::DatagramMulticast);
        config.multicast_group = Some(group.into());
        config
    }

    /// Set the overlay port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Pin the network interface instead of looking it up.
    pub fn with_interface(mut self, name: impl Into<String>) -> Self {
        self.interface = Some(name.into());
        self
    }

    /// Replace the well-known topic map.
    pub fn with_topics(mut self, topics: TopicMap) -> Self {
        self.topics = topics;
        self
    }

    /// Enable the heartbeat exchange.
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    /// Enable or disable the one-shot scout.
    pub fn with_scout(mut self, enabled: bool) -> Self {
        self.scout_enabled = enabled;
        self
    }

    /// Enable or disable the main subscriber declaration.
    pub fn with_subscriber(mut self, enabled: bool) -> Self {
        self.subscriber_enabled = enabled;
        self
    }

    /// Enable or disable the main publisher declaration.
    pub fn with_publisher(mut self, enabled: bool) -> Self {
        self.publisher_enabled = enabled;
        self
    }

    /// Enable or disable the query responder declaration.
    pub fn with_query_responder(mut self, enabled: bool) -> Self {
        self.query_responder_enabled = enabled;
        self
    }

    /// Override the delay between failed open attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn initiator_defaults() {
        // ---
        let config = SessionConfig::initiator("10.0.0.1");

        assert_eq!(config.role, DeviceRole::Initiator);
        assert_eq!(config.mode, SessionMode::ConnectToPeer);
        assert_eq!(config.transport, TransportKind::Stream);
        assert_eq!(config.remote_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(config.port, 7447);
        assert_eq!(config.retry_delay, RETRY_DELAY);
        assert!(config.subscriber_enabled);
        assert!(config.publisher_enabled);
        assert!(config.heartbeat.is_none());
        assert!(!config.scout_enabled);
    }

    #[test]
    fn peer_carries_group() {
        // ---
        let config = SessionConfig::peer(DeviceRole::Responder, "224.0.0.251").with_port(7448);

        assert_eq!(config.mode, SessionMode::ListenAsPeer);
        assert_eq!(config.transport, TransportKind::DatagramMulticast);
        assert_eq!(config.multicast_group.as_deref(), Some("224.0.0.251"));
        assert_eq!(config.port, 7448);
    }
}
