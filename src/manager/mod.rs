//! Session lifecycle manager.
//!
//! One [`SessionManager`] owns the whole pub/sub surface of the device:
//! the session handle, the declared resource handles, the query-provider
//! registration, and the background task that drives
//! `Idle → Connecting → Connected → Declaring → steady-state`.
//!
//! All shared state lives in one owned context object and is only ever
//! replaced whole, never partially mutated. Other tasks synchronize with
//! the lifecycle exclusively through the [`Readiness`] flags: observe
//! `DECLARED` before using the publish surface.

mod declarer;
mod establisher;

use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::SessionConfig;
use crate::domain::{
    //
    KeyExpr,
    OutboundBuffer,
    OverlayPtr,
    PublisherHandle,
    QueryReply,
    QueryableHandle,
    Sample,
    SessionPtr,
    SubscriberHandle,
};
use crate::heartbeat::Heartbeat;
use crate::readiness::{flag, Readiness};
use crate::{
    //
    lock_ignore_poison,
    log_debug,
    log_error,
    log_info,
    log_warn,
    netinfo,
    resolver,
    scout,
    Error,
    Result,
};

/// Error reported by a [`QueryProvider`].
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ProviderError(pub String);

impl From<String> for ProviderError {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ProviderError {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Application-supplied source of query answers.
///
/// On success the provider must produce the payload answering the query;
/// the manager turns it into a data reply. On failure the querying peer
/// receives an explicit error reply.
///
/// Closures of the matching shape implement the trait directly.
pub trait QueryProvider: Send + Sync {
    /// Produce the payload answering `selector`.
    fn produce(&self, selector: &KeyExpr) -> std::result::Result<OutboundBuffer, ProviderError>;
}

impl<F> QueryProvider for F
where
    F: Fn(&KeyExpr) -> std::result::Result<OutboundBuffer, ProviderError> + Send + Sync,
{
    fn produce(&self, selector: &KeyExpr) -> std::result::Result<OutboundBuffer, ProviderError> {
        self(selector)
    }
}

/// Single active provider registration; last registration wins.
pub(crate) type ProviderSlot = Arc<Mutex<Option<Arc<dyn QueryProvider>>>>;

/// The shared resource record.
///
/// Committed whole: either the pre-declaration shape (session only) or
/// the post-declaration shape (session plus whatever declared
/// successfully). The publish gateway requires the publisher handle to be
/// present, which makes the `DECLARED` barrier explicit instead of a
/// caller convention.
#[derive(Default)]
struct Resources {
    session: Option<SessionPtr>,
    subscriber: Option<SubscriberHandle>,
    publisher: Option<PublisherHandle>,
    queryable: Option<QueryableHandle>,
}

struct Inner {
    config: SessionConfig,
    overlay: OverlayPtr,
    resources: RwLock<Resources>,
    provider: ProviderSlot,
    task: Mutex<Option<JoinHandle<()>>>,
    readiness: Mutex<Option<Readiness>>,
    heartbeat: Heartbeat,
}

/// Session manager for one device.
///
/// Cheap to clone; clones share the same session context.
///
/// # Example
///
/// ```no_run
/// use overlink::{create_overlay, flag, Readiness, SessionConfig, SessionManager};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> overlink::Result<()> {
/// let config = SessionConfig::initiator("192.168.137.37");
/// let manager = SessionManager::new(config, create_overlay())?;
///
/// let readiness = Readiness::new();
/// manager.start(readiness.clone(), |sample| {
///     println!("IN: {} bytes on '{}'", sample.payload.len(), sample.keyexpr);
/// });
///
/// readiness.wait(flag::DECLARED).await;
/// manager.publish("app/announcements/hello", "hello").await;
///
/// manager.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a manager over the given overlay backend.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the role/mode/transport combination is
    /// invalid; rejected here, before any connection attempt.
    pub fn new(config: SessionConfig, overlay: OverlayPtr) -> Result<Self> {
        // ---
        // Dry-run resolution against the current interface; the loop
        // re-resolves per attempt with fresh values.
        let net = netinfo::active_network_interface();
        resolver::resolve(&config, &net)?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                overlay,
                resources: RwLock::new(Resources::default()),
                provider: Arc::new(Mutex::new(None)),
                task: Mutex::new(None),
                readiness: Mutex::new(None),
                heartbeat: Heartbeat::new(),
            }),
        })
    }

    /// Start the background lifecycle task.
    ///
    /// `data_handler` runs once per sample delivered to the main
    /// subscriber, on an arbitrary task. Idempotent: calling while the
    /// task is already running logs a warning and does nothing.
    pub fn start(&self, readiness: Readiness, data_handler: impl Fn(Sample) + Send + Sync + 'static) {
        // ---
        let mut task = lock_ignore_poison(&self.inner.task);
        if task.is_some() {
            log_warn!("session task already running");
            return;
        }

        *lock_ignore_poison(&self.inner.readiness) = Some(readiness.clone());

        let inner = Arc::clone(&self.inner);
        let handler: crate::domain::SampleHandler = Arc::new(data_handler);
        *task = Some(tokio::spawn(run_session_task(inner, readiness, handler)));
    }

    /// Request shutdown and tear everything down.
    ///
    /// Cancellation is hard: the background task is aborted immediately,
    /// with no draining of in-flight publishes. Teardown releases the
    /// auxiliary heartbeat first, then the declared resources in reverse
    /// declaration order, then the session. Idempotent: repeated calls
    /// find nothing left to release.
    pub async fn stop(&self) {
        // ---
        log_info!("stopping session manager");

        if let Some(readiness) = lock_ignore_poison(&self.inner.readiness).clone() {
            readiness.set(flag::STOP_REQUESTED);
        }

        self.inner.heartbeat.stop();

        let task = lock_ignore_poison(&self.inner.task).take();
        if let Some(task) = task {
            task.abort();
        }

        let mut resources = self.inner.resources.write().await;

        if let Some(queryable) = resources.queryable.take() {
            if let Err(err) = queryable.undeclare().await {
                log_debug!("queryable undeclare failed: {err}");
            }
        }
        if let Some(publisher) = resources.publisher.take() {
            if let Err(err) = publisher.undeclare().await {
                log_debug!("publisher undeclare failed: {err}");
            }
        }
        if let Some(subscriber) = resources.subscriber.take() {
            if let Err(err) = subscriber.undeclare().await {
                log_debug!("subscriber undeclare failed: {err}");
            }
        }
        if let Some(session) = resources.session.take() {
            if let Err(err) = session.close().await {
                log_debug!("session close failed: {err}");
            }
        }

        log_info!("session stopped and resources released");
    }

    /// Publish a text payload. Copy semantics: the caller keeps ownership
    /// of its string.
    ///
    /// Fire-and-forget. Requires the publisher to be declared; before
    /// that, the call logs and returns without sending. Transport-level
    /// send failures are logged, not surfaced.
    pub async fn publish(&self, keyexpr: &str, text: &str) {
        // ---
        let resources = self.inner.resources.read().await;

        let (Some(session), Some(_publisher)) =
            (resources.session.as_ref(), resources.publisher.as_ref())
        else {
            log_error!("publisher not declared; cannot publish to '{keyexpr}'");
            return;
        };

        log_debug!("OUT: '{text}' at '{keyexpr}'");

        let payload = OutboundBuffer::from(text);
        if let Err(err) = session.put(&KeyExpr::from(keyexpr), payload).await {
            log_warn!("publish failed on '{keyexpr}': {err}");
        }
    }

    /// Publish a binary payload. Move semantics: `buffer` is consumed on
    /// every path, including "publisher not declared" and transport
    /// failure, and released exactly once by its own strategy.
    pub async fn publish_owned(&self, keyexpr: &str, buffer: OutboundBuffer) {
        // ---
        let resources = self.inner.resources.read().await;

        let (Some(session), Some(_publisher)) =
            (resources.session.as_ref(), resources.publisher.as_ref())
        else {
            log_error!(
                "publisher not declared; dropping {} bytes for '{keyexpr}'",
                buffer.len()
            );
            return;
        };

        log_debug!("OUT: {} bytes at '{keyexpr}'", buffer.len());

        if let Err(err) = session.put(&KeyExpr::from(keyexpr), buffer).await {
            log_warn!("publish failed on '{keyexpr}': {err}");
        }
    }

    /// Register the query provider, replacing any previous registration.
    ///
    /// Last registration wins; no synchronization beyond the swap is
    /// promised. The manager holds the provider only as long as it stays
    /// registered.
    pub fn register_query_provider(&self, provider: impl QueryProvider + 'static) {
        // ---
        *lock_ignore_poison(&self.inner.provider) = Some(Arc::new(provider));
        log_debug!("query provider registered");
    }

    /// Issue an outbound query; `on_reply` runs asynchronously per reply.
    ///
    /// Available only to the query-initiating role; the role that
    /// *answers* queries gets [`Error::Role`] here.
    ///
    /// # Errors
    ///
    /// [`Error::Role`] for the wrong role, [`Error::NotConnected`] before
    /// the session is open, or a transport error from the backend.
    pub async fn get(
        &self,
        selector: &str,
        on_reply: impl Fn(QueryReply) + Send + Sync + 'static,
    ) -> Result<()> {
        // ---
        let config = &self.inner.config;
        if config.topics.queryable(config.role).is_some() {
            return Err(Error::Role(config.role));
        }

        let resources = self.inner.resources.read().await;
        let session = resources.session.as_ref().ok_or(Error::NotConnected)?;

        log_debug!("GET '{selector}'");
        session
            .get(&KeyExpr::from(selector), Arc::new(on_reply))
            .await
    }
}

/// The background lifecycle task.
async fn run_session_task(
    inner: Arc<Inner>,
    readiness: Readiness,
    data_handler: crate::domain::SampleHandler,
) {
    // ---
    if inner.config.scout_enabled {
        let net = netinfo::active_network_interface();
        if let Ok(params) = resolver::resolve(&inner.config, &net) {
            match scout::scout(&inner.overlay, &params, scout::SCOUT_WAIT).await {
                Ok(_peers) => {}
                Err(Error::ScoutUnsupported) => {
                    log_warn!("overlay cannot scout; skipping discovery")
                }
                Err(err) => log_error!("scout failed: {err}"),
            }
        }
    }

    // Connecting → Connected
    let session = establisher::establish(&inner.overlay, &inner.config).await;
    log_info!("session id: {}", session.id());

    {
        let mut resources = inner.resources.write().await;
        *resources = Resources {
            session: Some(session.clone()),
            ..Resources::default()
        };
    }
    readiness.set(flag::CONNECTED);

    // Declaring
    let declared = declarer::declare_all(
        &session,
        &inner.config,
        data_handler,
        Arc::clone(&inner.provider),
    )
    .await;

    // Auxiliary resources come after the core set and are excluded from
    // its accounting.
    if let Some(heartbeat_config) = &inner.config.heartbeat {
        inner
            .heartbeat
            .init(&session, &readiness, heartbeat_config)
            .await;
    }

    {
        let mut resources = inner.resources.write().await;
        *resources = Resources {
            session: Some(session),
            subscriber: declared.subscriber,
            publisher: declared.publisher,
            queryable: declared.queryable,
        };
    }

    log_debug!("all resources declared");
    readiness.set(flag::DECLARED);

    // Steady state: the backend's own tasks deliver traffic; this task
    // only exists to be aborted by stop().
    std::future::pending::<()>().await;
}
