// tests/common/mod.rs

//! Shared test support: overlay wrappers with injected failures and a
//! drop-tracking payload buffer.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::time::Instant;

use overlink::{
    //
    Declared,
    Error,
    KeyExpr,
    LinkParams,
    LinkProtocol,
    OpenError,
    OutboundBuffer,
    Overlay,
    OverlaySession,
    PeerId,
    PublisherHandle,
    QueryHandler,
    QueryableHandle,
    ReplyHandler,
    Result,
    SampleHandler,
    SessionMode,
    SessionPtr,
    SubscriberHandle,
};

/// Install a tracing subscriber honoring `RUST_LOG` for debugging test
/// runs. Safe to call repeatedly; only the first call wins.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Link parameters accepted by the memory overlay.
pub fn test_params() -> LinkParams {
    LinkParams {
        mode: SessionMode::ConnectToPeer,
        protocol: LinkProtocol::Tcp,
        locator: "tcp/203.0.113.9:7447".to_string(),
    }
}

/// Overlay wrapper whose first `fail_first` open attempts fail, after
/// which it delegates to the wrapped overlay.
pub struct FlakyOverlay {
    inner: overlink::OverlayPtr,
    fail_first: u32,
    attempts: AtomicU32,
    attempt_times: Mutex<Vec<Instant>>,
}

impl FlakyOverlay {
    pub fn new(inner: overlink::OverlayPtr, fail_first: u32) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_first,
            attempts: AtomicU32::new(0),
            attempt_times: Mutex::new(Vec::new()),
        })
    }

    /// Number of open attempts observed so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Virtual timestamps of each open attempt.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempt_times.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Overlay for FlakyOverlay {
    async fn open(&self, params: &LinkParams) -> std::result::Result<SessionPtr, OpenError> {
        // ---
        self.attempt_times.lock().unwrap().push(Instant::now());
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);

        if attempt < self.fail_first {
            return Err(OpenError::TransportUnavailable);
        }
        self.inner.open(params).await
    }

    async fn scout(&self, params: &LinkParams, wait: std::time::Duration) -> Result<Vec<PeerId>> {
        self.inner.scout(params, wait).await
    }
}

/// Overlay wrapper that injects failures into sessions it opens:
/// publisher declaration and/or puts.
pub struct FaultyOverlay {
    inner: overlink::OverlayPtr,
    fail_publisher_declare: bool,
    fail_puts: bool,
}

impl FaultyOverlay {
    pub fn failing_publisher_declare(inner: overlink::OverlayPtr) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_publisher_declare: true,
            fail_puts: false,
        })
    }

    pub fn failing_puts(inner: overlink::OverlayPtr) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_publisher_declare: false,
            fail_puts: true,
        })
    }
}

#[async_trait::async_trait]
impl Overlay for FaultyOverlay {
    async fn open(&self, params: &LinkParams) -> std::result::Result<SessionPtr, OpenError> {
        // ---
        let session = self.inner.open(params).await?;
        Ok(Arc::new(FaultySession {
            inner: session,
            fail_publisher_declare: self.fail_publisher_declare,
            fail_puts: self.fail_puts,
        }))
    }

    async fn scout(&self, params: &LinkParams, wait: std::time::Duration) -> Result<Vec<PeerId>> {
        self.inner.scout(params, wait).await
    }
}

struct FaultySession {
    inner: SessionPtr,
    fail_publisher_declare: bool,
    fail_puts: bool,
}

#[async_trait::async_trait]
impl OverlaySession for FaultySession {
    fn id(&self) -> PeerId {
        self.inner.id()
    }

    async fn declare_subscriber(
        &self,
        keyexpr: KeyExpr,
        handler: SampleHandler,
    ) -> Result<SubscriberHandle> {
        self.inner.declare_subscriber(keyexpr, handler).await
    }

    async fn declare_publisher(&self, keyexpr: KeyExpr) -> Result<PublisherHandle> {
        // ---
        if self.fail_publisher_declare {
            return Err(Error::Declaration {
                keyexpr: keyexpr.as_str().to_string(),
                reason: "injected declaration failure".to_string(),
            });
        }
        self.inner.declare_publisher(keyexpr).await
    }

    async fn declare_queryable(
        &self,
        keyexpr: KeyExpr,
        handler: QueryHandler,
    ) -> Result<QueryableHandle> {
        self.inner.declare_queryable(keyexpr, handler).await
    }

    async fn put(&self, keyexpr: &KeyExpr, payload: OutboundBuffer) -> Result<()> {
        // ---
        if self.fail_puts {
            drop(payload);
            return Err(Error::Transport("injected send failure".to_string()));
        }
        self.inner.put(keyexpr, payload).await
    }

    async fn get(&self, selector: &KeyExpr, on_reply: ReplyHandler) -> Result<()> {
        self.inner.get(selector, on_reply).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

struct TrackedOwner {
    data: Vec<u8>,
    drops: Arc<AtomicUsize>,
}

impl AsRef<[u8]> for TrackedOwner {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for TrackedOwner {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// A shared outbound buffer whose release count is observable.
///
/// The counter reaches 1 exactly when the last reference to the payload
/// is gone.
pub fn tracked_buffer(data: &[u8]) -> (OutboundBuffer, Arc<AtomicUsize>) {
    // ---
    let drops = Arc::new(AtomicUsize::new(0));
    let owner = TrackedOwner {
        data: data.to_vec(),
        drops: Arc::clone(&drops),
    };
    (OutboundBuffer::Shared(Bytes::from_owner(owner)), drops)
}

/// Open a plain peer session on `overlay` and subscribe it to `keyexpr`,
/// forwarding every sample payload into the returned channel.
///
/// Returns the session and handle so they outlive the test body.
pub async fn observer_session(
    overlay: &overlink::OverlayPtr,
    keyexpr: &str,
) -> (
    SessionPtr,
    Box<dyn Declared>,
    tokio::sync::mpsc::UnboundedReceiver<overlink::Sample>,
) {
    // ---
    let session = overlay
        .open(&test_params())
        .await
        .expect("observer session should open");

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = session
        .declare_subscriber(
            KeyExpr::from(keyexpr),
            Arc::new(move |sample| {
                let _ = tx.send(sample);
            }),
        )
        .await
        .expect("observer subscribe should succeed");

    (session, handle, rx)
}
