// src/domain/overlay.rs

//! Overlay domain abstractions.
//!
//! This module defines the domain-level interface between the session
//! manager and concrete overlay backends. It intentionally avoids any
//! reference to concrete protocols, brokers, or client libraries.
//!
//! The overlay layer is responsible only for opening sessions, declaring
//! resources against key expressions, and delivering samples and queries
//! to registered handlers. Higher-level semantics such as readiness
//! gating, retry, or the query-provider contract are handled by the
//! manager.
//!
//! Concrete implementations of this interface live under `src/transport/`.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::OpenError;
use crate::resolver::LinkParams;
use crate::Result;

/// A hierarchical key expression.
///
/// Key expressions address publishers, subscribers, and query responders.
/// They are `/`-separated chunk paths; a declared expression may end in
/// the wildcard suffix `/**`, which covers the chunk itself and every
/// sub-topic below it.
///
/// Key expressions are immutable, cheap to clone, and safe to share
/// across tasks.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct KeyExpr(pub Arc<str>);

impl KeyExpr {
    /// Borrow the expression as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this (possibly wildcard) expression covers `key`.
    ///
    /// `key` is treated as concrete. Supported forms:
    /// - exact equality;
    /// - `**` alone covers everything;
    /// - a trailing `/**` covers the prefix chunk and all sub-topics
    ///   (`a/b/**` covers `a/b` and `a/b/c/d`, not `a/bc`).
    pub fn covers(&self, key: &KeyExpr) -> bool {
        let pattern = self.as_str();
        let key = key.as_str();

        if pattern == key || pattern == "**" {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix("/**") {
            return key == prefix
                || (key.len() > prefix.len()
                    && key.starts_with(prefix)
                    && key.as_bytes()[prefix.len()] == b'/');
        }
        false
    }
}

impl<T> From<T> for KeyExpr
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        KeyExpr(value.into())
    }
}

impl fmt::Display for KeyExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier of a session instance, local or remote.
///
/// Opaque 16-byte value; `Display` renders it as a fixed-width (32
/// character) uppercase hexadecimal string.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; 16]);

impl PeerId {
    /// Generate a fresh random identifier.
    pub fn random() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl From<[u8; 16]> for PeerId {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({self})")
    }
}

/// A sample delivered to a subscriber handler.
#[derive(Clone, Debug)]
pub struct Sample {
    /// Concrete key expression the sample was published on.
    pub keyexpr: KeyExpr,

    /// Opaque payload bytes.
    pub payload: Bytes,
}

/// An outbound payload buffer that carries its own release strategy.
///
/// The variant records where the buffer came from; dropping the value
/// releases it accordingly. Ownership transfers into the overlay on
/// publish; by construction the buffer is released exactly once, on
/// every path, and the caller cannot touch it again.
#[derive(Debug)]
pub enum OutboundBuffer {
    /// Heap-allocated, general-purpose buffer.
    Heap(Vec<u8>),

    /// Reference-counted buffer from a specialized pool (frame buffers,
    /// DMA-capable regions).
    Shared(Bytes),
}

impl OutboundBuffer {
    /// Length of the payload in bytes.
    pub fn len(&self) -> usize {
        match self {
            OutboundBuffer::Heap(v) => v.len(),
            OutboundBuffer::Shared(b) => b.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the payload.
    pub fn as_slice(&self) -> &[u8] {
        match self {
            OutboundBuffer::Heap(v) => v,
            OutboundBuffer::Shared(b) => b,
        }
    }

    /// Convert into transport-ready bytes, consuming the buffer.
    pub fn into_bytes(self) -> Bytes {
        match self {
            OutboundBuffer::Heap(v) => Bytes::from(v),
            OutboundBuffer::Shared(b) => b,
        }
    }
}

impl From<Vec<u8>> for OutboundBuffer {
    fn from(value: Vec<u8>) -> Self {
        OutboundBuffer::Heap(value)
    }
}

impl From<Bytes> for OutboundBuffer {
    fn from(value: Bytes) -> Self {
        OutboundBuffer::Shared(value)
    }
}

impl From<String> for OutboundBuffer {
    fn from(value: String) -> Self {
        OutboundBuffer::Heap(value.into_bytes())
    }
}

impl From<&str> for OutboundBuffer {
    fn from(value: &str) -> Self {
        OutboundBuffer::Heap(value.as_bytes().to_vec())
    }
}

/// Outcome of a query, delivered back to the querying peer.
///
/// A query always produces a reply distinguishable as data or error;
/// silence is not an outcome.
#[derive(Clone, Debug)]
pub enum QueryReply {
    /// The responder produced a payload.
    Data {
        /// Key expression the reply pertains to.
        keyexpr: KeyExpr,
        /// Produced payload.
        payload: Bytes,
    },

    /// The responder could not produce a payload.
    Error {
        /// Human-readable reason, also useful for peer-side logging.
        message: String,
    },
}

impl QueryReply {
    /// Whether this reply is the error variant.
    pub fn is_error(&self) -> bool {
        matches!(self, QueryReply::Error { .. })
    }
}

/// An inbound query handed to a queryable handler.
///
/// Responding consumes the query; dropping it without responding closes
/// the reply channel (backends decide how that is surfaced to the
/// querying peer).
pub struct Query {
    selector: KeyExpr,
    reply_tx: mpsc::UnboundedSender<QueryReply>,
}

impl Query {
    pub(crate) fn new(selector: KeyExpr, reply_tx: mpsc::UnboundedSender<QueryReply>) -> Self {
        Self { selector, reply_tx }
    }

    /// The selector the querying peer asked for.
    pub fn selector(&self) -> &KeyExpr {
        &self.selector
    }

    /// Send the reply. Delivery is best-effort; a disconnected querying
    /// peer is not an error.
    pub fn respond(self, reply: QueryReply) {
        let _ = self.reply_tx.send(reply);
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

/// Handler invoked for each sample delivered to a subscriber.
///
/// Invocations happen on arbitrary backend tasks, concurrently with the
/// manager's background task.
pub type SampleHandler = Arc<dyn Fn(Sample) + Send + Sync>;

/// Handler invoked for each inbound query on a queryable.
pub type QueryHandler = Arc<dyn Fn(Query) + Send + Sync>;

/// Handler invoked for each reply to an outbound query.
pub type ReplyHandler = Arc<dyn Fn(QueryReply) + Send + Sync>;

/// A declared resource handle (publisher, subscriber, or queryable).
///
/// Handles are valid only while the owning session is. `undeclare()`
/// releases the resource explicitly; dropping the handle releases it
/// best-effort.
#[async_trait::async_trait]
pub trait Declared: Send + Sync {
    /// Key expression the resource was declared on.
    fn keyexpr(&self) -> &KeyExpr;

    /// Release the resource.
    async fn undeclare(self: Box<Self>) -> Result<()>;
}

/// Handle to a declared subscriber.
pub type SubscriberHandle = Box<dyn Declared>;

/// Handle to a declared publisher.
pub type PublisherHandle = Box<dyn Declared>;

/// Handle to a declared query responder.
pub type QueryableHandle = Box<dyn Declared>;

/// An open overlay session.
///
/// Exclusively owned by the session manager; at most one is live at a
/// time. All resources declared through a session are invalidated when
/// it closes.
///
/// # Notes
///
/// This trait uses `async_trait`; the expanded documentation may show
/// explicit lifetimes and a boxed `Future`. This is an implementation
/// detail; consumers should treat methods as normal `async fn`s.
#[async_trait::async_trait]
pub trait OverlaySession: Send + Sync {
    /// Identifier negotiated for this session.
    fn id(&self) -> PeerId;

    /// Declare a subscriber; `handler` runs per delivered sample, on an
    /// arbitrary task.
    async fn declare_subscriber(
        &self,
        keyexpr: KeyExpr,
        handler: SampleHandler,
    ) -> Result<SubscriberHandle>;

    /// Declare a publisher covering `keyexpr`.
    async fn declare_publisher(&self, keyexpr: KeyExpr) -> Result<PublisherHandle>;

    /// Declare a query responder; `handler` runs per inbound query, on an
    /// arbitrary task.
    async fn declare_queryable(
        &self,
        keyexpr: KeyExpr,
        handler: QueryHandler,
    ) -> Result<QueryableHandle>;

    /// Publish a payload on a concrete key expression.
    ///
    /// Takes ownership of the payload on every path, including failures.
    async fn put(&self, keyexpr: &KeyExpr, payload: OutboundBuffer) -> Result<()>;

    /// Issue a query; `on_reply` runs per reply, asynchronously.
    async fn get(&self, selector: &KeyExpr, on_reply: ReplyHandler) -> Result<()>;

    /// Close the session and release backend resources.
    async fn close(&self) -> Result<()>;
}

/// An overlay backend capable of opening sessions.
#[async_trait::async_trait]
pub trait Overlay: Send + Sync {
    /// Attempt to open a session with the given link parameters.
    ///
    /// Failures are classified into [`OpenError`]; the caller decides the
    /// retry policy.
    async fn open(&self, params: &LinkParams) -> std::result::Result<SessionPtr, OpenError>;

    /// One-shot peer discovery: collect peers reachable via `params` for
    /// roughly `wait`, then return their identifiers.
    ///
    /// Backends that cannot scout return
    /// [`Error::ScoutUnsupported`](crate::Error::ScoutUnsupported).
    async fn scout(&self, params: &LinkParams, wait: std::time::Duration) -> Result<Vec<PeerId>>;
}

/// Shared overlay pointer.
pub type OverlayPtr = Arc<dyn Overlay>;

/// Shared session pointer.
pub type SessionPtr = Arc<dyn OverlaySession>;

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn covers_exact_and_wildcard() {
        // ---
        let wildcard = KeyExpr::from("app/results/**");

        assert!(wildcard.covers(&KeyExpr::from("app/results")));
        assert!(wildcard.covers(&KeyExpr::from("app/results/frames/1")));
        assert!(!wildcard.covers(&KeyExpr::from("app/resultset")));
        assert!(!wildcard.covers(&KeyExpr::from("app")));

        let exact = KeyExpr::from("app/data");
        assert!(exact.covers(&KeyExpr::from("app/data")));
        assert!(!exact.covers(&KeyExpr::from("app/data/img")));

        assert!(KeyExpr::from("**").covers(&KeyExpr::from("anything/at/all")));
    }

    #[test]
    fn peer_id_renders_fixed_width_hex() {
        // ---
        let id = PeerId::from([0xAB; 16]);
        let rendered = id.to_string();

        assert_eq!(rendered.len(), 32);
        assert_eq!(&rendered[..4], "ABAB");

        let random = PeerId::random().to_string();
        assert_eq!(random.len(), 32);
        assert!(random.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn outbound_buffer_into_bytes() {
        // ---
        let heap = OutboundBuffer::from("hello");
        assert_eq!(heap.as_slice(), b"hello");
        assert_eq!(heap.into_bytes().as_ref(), b"hello");

        let shared = OutboundBuffer::from(Bytes::from_static(b"frame"));
        assert_eq!(shared.len(), 5);
    }
}
