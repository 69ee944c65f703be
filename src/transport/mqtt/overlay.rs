//! MQTT overlay implementation using `rumqttc`.
//!
//! This module implements the [`Overlay`]/[`OverlaySession`] traits on
//! top of an MQTT broker connection. It follows an **actor-based
//! concurrency model** to safely integrate with the underlying MQTT
//! client.
//!
//! ## Concurrency model
//!
//! - A single background **actor task** owns the MQTT `EventLoop`.
//! - The actor is responsible for:
//!   - publishing outbound envelopes via `AsyncClient`,
//!   - registering broker subscriptions,
//!   - polling the `EventLoop` and demultiplexing incoming publishes to
//!     subscriber, queryable, and reply handlers,
//!   - clean shutdown of the connection.
//! - All interaction with the MQTT client is serialized through this
//!   actor; no other task ever touches the event loop directly.
//!
//! ## Mapping overlay semantics onto MQTT
//!
//! - Key expressions map to topics; the trailing `/**` wildcard maps to
//!   the MQTT `/#` filter. Concrete puts use the key as the topic.
//! - Samples, queries, and replies share topics, distinguished by the
//!   [`WireMessage`] envelope (JSON).
//! - Queries carry a correlation ID and a per-session reply topic;
//!   replies are matched back to the issuing `get()` by correlation ID.
//! - MQTT has no peer/listen mode: listen-mode locators are mapped to a
//!   plain broker connection on the named host and port. Multicast
//!   locators are reported as the unsupported combination they are.
//!
//! ## Connection behavior
//!
//! Unlike the lazy MQTT client itself, `open()` waits for the broker's
//! ConnAck (bounded by a fixed timeout) so that open failures are
//! classified and retried by the establisher instead of being silently
//! absorbed by the client's internal reconnect.
//!
//! ## Subscription confirmation
//!
//! Subscriptions wait for SUBACK confirmation from the broker before
//! returning success. Since rumqttc's `SubAck` packets contain only
//! packet IDs (not topic names), subscription requests are serialized to
//! maintain correlation. Declarations are rare and happen at startup, so
//! the serialization is not a bottleneck.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rumqttc::{
    //
    AsyncClient,
    ConnectReturnCode,
    Event,
    EventLoop,
    MqttOptions,
    Packet,
    Publish,
    QoS,
};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::domain::{
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
use crate::error::OpenError;
use crate::lock_ignore_poison;
use crate::protocol::{CorrelationId, WireMessage, WireReplyResult};
use crate::resolver::{LinkParams, LinkProtocol};
use crate::{log_debug, log_error, log_info, Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// How long a pending `get()` keeps accepting replies before its
/// correlation entry is dropped.
const QUERY_TTL: Duration = Duration::from_secs(30);

struct SubscriberEntry {
    keyexpr: KeyExpr,
    filter: String,
    handler: SampleHandler,
}

struct QueryableEntry {
    keyexpr: KeyExpr,
    filter: String,
    handler: QueryHandler,
}

type SubscriberMap = Arc<Mutex<HashMap<u64, SubscriberEntry>>>;
type QueryableMap = Arc<Mutex<HashMap<u64, QueryableEntry>>>;
type PendingQueries = Arc<Mutex<HashMap<String, ReplyHandler>>>;

/// Tracks a single pending subscription awaiting SUBACK confirmation.
type PendingSubscribe = Arc<Mutex<Option<(String, oneshot::Sender<Result<()>>)>>>;

//
// Actor commands
//

enum Cmd {
    //
    Publish {
        topic: String,
        payload: Vec<u8>,
        resp: oneshot::Sender<Result<()>>,
    },
    /// Publish without completion signaling (reply forwarding).
    PublishFire {
        topic: String,
        payload: Vec<u8>,
    },
    Subscribe {
        filter: String,
        resp: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        filter: String,
    },
    Close {
        resp: oneshot::Sender<()>,
    },
}

enum ActorStep {
    //
    Continue,
    Stop,
}

impl Cmd {
    // ---

    /// Dispatches an actor command to the correct handler on the actor.
    async fn handle(self, actor: &mut MqttActor) -> ActorStep {
        // ---
        match self {
            Cmd::Publish {
                topic,
                payload,
                resp,
            } => {
                let result = actor.handle_publish(&topic, payload).await;
                let _ = resp.send(result);
                ActorStep::Continue
            }
            Cmd::PublishFire { topic, payload } => {
                if let Err(_err) = actor.handle_publish(&topic, payload).await {
                    log_debug!("{}: fire-and-forget publish failed: {_err}", actor.id);
                }
                ActorStep::Continue
            }
            Cmd::Subscribe { filter, resp } => {
                actor.handle_subscribe(filter, resp).await;
                ActorStep::Continue
            }
            Cmd::Unsubscribe { filter } => {
                if let Err(_err) = actor.client.unsubscribe(&filter).await {
                    log_debug!("{}: unsubscribe failed for {filter}: {_err}", actor.id);
                }
                ActorStep::Continue
            }
            Cmd::Close { resp } => {
                actor.handle_close().await;
                let _ = resp.send(());
                ActorStep::Stop
            }
        }
    }
}

/// MQTT-backed overlay.
///
/// Opens one broker connection per session. Scouting is not supported:
/// an MQTT broker has no peer-discovery surface to probe.
pub struct MqttOverlay;

impl MqttOverlay {
    /// Create the backend. Connections happen per `open()` call.
    pub fn new() -> Self {
        Self
    }
}

impl Default for MqttOverlay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Overlay for MqttOverlay {
    // ---

    async fn open(&self, params: &LinkParams) -> std::result::Result<SessionPtr, OpenError> {
        // ---
        if params.protocol == LinkProtocol::Udp {
            return Err(OpenError::UnsupportedCombination);
        }

        let (host, port) = parse_locator(&params.locator)?;
        let id = PeerId::random();

        let mut options = MqttOptions::new(id.to_string(), host, port);
        options.set_keep_alive(KEEP_ALIVE);

        let (client, mut event_loop) = AsyncClient::new(options, 64);

        // The MQTT client connects lazily on first poll. Wait for the
        // broker's ConnAck here so open failures are classified for the
        // establisher's retry loop.
        let outcome = tokio::time::timeout(CONNECT_TIMEOUT, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code == ConnectReturnCode::Success {
                            return Ok(());
                        }
                        log_error!("broker refused connection: {:?}", ack.code);
                        return Err(OpenError::OpenFailed);
                    }
                    Ok(_other) => continue,
                    Err(err) => return Err(classify_connection_error(&err)),
                }
            }
        })
        .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_elapsed) => return Err(OpenError::TransportUnavailable),
        }

        log_info!("{id}: connected to broker at {}", params.locator);
        Ok(MqttSession::create(id, client, event_loop))
    }

    async fn scout(&self, _params: &LinkParams, _wait: Duration) -> Result<Vec<PeerId>> {
        // ---
        Err(Error::ScoutUnsupported)
    }
}

/// MQTT-backed implementation of [`OverlaySession`].
struct MqttSession {
    id: PeerId,
    reply_topic: String,
    reply_subscribed: AtomicBool,
    cmd_tx: mpsc::Sender<Cmd>,
    subscribers: SubscriberMap,
    queryables: QueryableMap,
    pending_queries: PendingQueries,
    registration_seq: std::sync::atomic::AtomicU64,
    actor_task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttSession {
    // ---

    fn create(id: PeerId, client: AsyncClient, event_loop: EventLoop) -> SessionPtr {
        // ---
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        let subscribers: SubscriberMap = Arc::new(Mutex::new(HashMap::new()));
        let queryables: QueryableMap = Arc::new(Mutex::new(HashMap::new()));
        let pending_queries: PendingQueries = Arc::new(Mutex::new(HashMap::new()));

        let actor = MqttActor {
            id,
            client,
            event_loop,
            cmd_rx,
            cmd_tx: cmd_tx.clone(),
            subscribers: Arc::clone(&subscribers),
            queryables: Arc::clone(&queryables),
            pending_queries: Arc::clone(&pending_queries),
            pending_subscribe: Arc::new(Mutex::new(None)),
            reconnect: false,
        };

        let actor_task = tokio::spawn(actor.run());

        Arc::new(Self {
            id,
            reply_topic: format!("replies/{id}"),
            reply_subscribed: AtomicBool::new(false),
            cmd_tx,
            subscribers,
            queryables,
            pending_queries,
            registration_seq: std::sync::atomic::AtomicU64::new(1),
            actor_task: Mutex::new(Some(actor_task)),
        })
    }

    fn next_registration(&self) -> u64 {
        self.registration_seq.fetch_add(1, Ordering::Relaxed)
    }

    async fn subscribe_filter(&self, filter: String) -> Result<()> {
        // ---
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx
            .send(Cmd::Subscribe {
                filter,
                resp: resp_tx,
            })
            .await
            .map_err(|_| Error::Transport("mqtt actor stopped".to_string()))?;

        resp_rx
            .await
            .map_err(|_| Error::Transport("mqtt actor stopped".to_string()))?
    }

    /// Subscribe the per-session reply topic on first use.
    async fn ensure_reply_subscription(&self) -> Result<()> {
        // ---
        if self.reply_subscribed.load(Ordering::Acquire) {
            return Ok(());
        }

        self.subscribe_filter(self.reply_topic.clone()).await?;
        self.reply_subscribed.store(true, Ordering::Release);
        Ok(())
    }
}

#[async_trait::async_trait]
impl OverlaySession for MqttSession {
    // ---

    fn id(&self) -> PeerId {
        self.id
    }

    async fn declare_subscriber(
        &self,
        keyexpr: KeyExpr,
        handler: SampleHandler,
    ) -> Result<SubscriberHandle> {
        // ---
        let filter = filter_from_keyexpr(&keyexpr);
        let id = self.next_registration();

        // Register locally first so no publish arriving right after the
        // SUBACK is missed.
        lock_ignore_poison(&self.subscribers).insert(
            id,
            SubscriberEntry {
                keyexpr: keyexpr.clone(),
                filter: filter.clone(),
                handler,
            },
        );

        if let Err(err) = self.subscribe_filter(filter.clone()).await {
            lock_ignore_poison(&self.subscribers).remove(&id);
            return Err(err);
        }

        Ok(Box::new(MqttHandle {
            keyexpr,
            filter,
            slot: HandleSlot::Subscriber(id),
            subscribers: Arc::clone(&self.subscribers),
            queryables: Arc::clone(&self.queryables),
            cmd_tx: self.cmd_tx.clone(),
            released: AtomicBool::new(false),
        }))
    }

    async fn declare_publisher(&self, keyexpr: KeyExpr) -> Result<PublisherHandle> {
        // ---
        // MQTT needs no broker-side publisher state; the handle is the
        // declaration.
        Ok(Box::new(MqttHandle {
            keyexpr,
            filter: String::new(),
            slot: HandleSlot::Publisher,
            subscribers: Arc::clone(&self.subscribers),
            queryables: Arc::clone(&self.queryables),
            cmd_tx: self.cmd_tx.clone(),
            released: AtomicBool::new(false),
        }))
    }

    async fn declare_queryable(
        &self,
        keyexpr: KeyExpr,
        handler: QueryHandler,
    ) -> Result<QueryableHandle> {
        // ---
        let filter = filter_from_keyexpr(&keyexpr);
        let id = self.next_registration();

        lock_ignore_poison(&self.queryables).insert(
            id,
            QueryableEntry {
                keyexpr: keyexpr.clone(),
                filter: filter.clone(),
                handler,
            },
        );

        if let Err(err) = self.subscribe_filter(filter.clone()).await {
            lock_ignore_poison(&self.queryables).remove(&id);
            return Err(err);
        }

        Ok(Box::new(MqttHandle {
            keyexpr,
            filter,
            slot: HandleSlot::Queryable(id),
            subscribers: Arc::clone(&self.subscribers),
            queryables: Arc::clone(&self.queryables),
            cmd_tx: self.cmd_tx.clone(),
            released: AtomicBool::new(false),
        }))
    }

    async fn put(&self, keyexpr: &KeyExpr, payload: OutboundBuffer) -> Result<()> {
        // ---
        let envelope = WireMessage::Sample {
            payload: payload.into_bytes(),
        };
        let encoded = serde_json::to_vec(&envelope)?;

        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx
            .send(Cmd::Publish {
                topic: keyexpr.as_str().to_string(),
                payload: encoded,
                resp: resp_tx,
            })
            .await
            .map_err(|_| Error::Transport("mqtt actor stopped".to_string()))?;

        resp_rx
            .await
            .map_err(|_| Error::Transport("mqtt actor stopped".to_string()))?
    }

    async fn get(&self, selector: &KeyExpr, on_reply: ReplyHandler) -> Result<()> {
        // ---
        self.ensure_reply_subscription().await?;

        let correlation_id = CorrelationId::generate();
        lock_ignore_poison(&self.pending_queries)
            .insert(correlation_id.to_string(), on_reply);

        // Expire the correlation entry so long-gone queries do not pin
        // their handlers forever.
        {
            let pending = Arc::clone(&self.pending_queries);
            let key = correlation_id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(QUERY_TTL).await;
                lock_ignore_poison(&pending).remove(&key);
            });
        }

        let envelope = WireMessage::Query {
            correlation_id,
            reply_to: self.reply_topic.clone(),
            selector: selector.as_str().to_string(),
        };
        let encoded = serde_json::to_vec(&envelope)?;

        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx
            .send(Cmd::Publish {
                topic: selector.as_str().to_string(),
                payload: encoded,
                resp: resp_tx,
            })
            .await
            .map_err(|_| Error::Transport("mqtt actor stopped".to_string()))?;

        resp_rx
            .await
            .map_err(|_| Error::Transport("mqtt actor stopped".to_string()))?
    }

    async fn close(&self) -> Result<()> {
        // ---
        let (resp_tx, resp_rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Cmd::Close { resp: resp_tx }).await;
        let _ = resp_rx.await;

        let task = lock_ignore_poison(&self.actor_task).take();
        if let Some(task) = task {
            let _ = task.await;
        }
        Ok(())
    }
}

struct MqttActor {
    // ---
    id: PeerId, // for logging only
    client: AsyncClient,
    event_loop: EventLoop,
    cmd_rx: mpsc::Receiver<Cmd>,
    cmd_tx: mpsc::Sender<Cmd>,
    subscribers: SubscriberMap,
    queryables: QueryableMap,
    pending_queries: PendingQueries,
    pending_subscribe: PendingSubscribe,
    reconnect: bool,
}

impl MqttActor {
    // ---

    async fn run(mut self) {
        // ---
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if matches!(cmd.handle(&mut self).await, ActorStep::Stop) {
                                break;
                            }
                        }
                        None => break,
                    }
                }

                event = self.event_loop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            self.handle_incoming(publish);
                        }
                        Ok(Event::Incoming(Packet::SubAck(suback))) => {
                            self.handle_suback(suback);
                        }
                        Ok(Event::Incoming(Packet::ConnAck(_connack))) => {
                            if self.reconnect {
                                self.resubscribe_all().await;
                            }
                        }
                        Ok(_event) => {
                            // Other events (PingResp, PubAck, etc.) - ignore
                        }
                        Err(err) => {
                            self.reconnect = true;
                            log_error!("{}: mqtt connection error: {err}", self.id);
                            tokio::time::sleep(RECONNECT_DELAY).await;
                        }
                    }
                }
            }
        }
    }

    /// Publishes an encoded envelope with QoS 0 (at most once).
    async fn handle_publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<()> {
        // ---
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|err| {
                log_error!("{}: publish failed for topic {topic}: {err}", self.id);
                Error::Transport(err.to_string())
            })
    }

    /// Registers a broker subscription and queues it for SUBACK
    /// confirmation. One subscription in flight at a time.
    async fn handle_subscribe(&mut self, filter: String, resp: oneshot::Sender<Result<()>>) {
        // ---
        {
            let mut pending = lock_ignore_poison(&self.pending_subscribe);
            if pending.is_some() {
                log_error!(
                    "{}: attempted concurrent subscribe while one is pending",
                    self.id
                );
                let _ = resp.send(Err(Error::Transport(
                    "subscribe already in flight".to_string(),
                )));
                return;
            }
            *pending = Some((filter.clone(), resp));
        }

        if let Err(err) = self.client.subscribe(&filter, QoS::AtMostOnce).await {
            let mut pending = lock_ignore_poison(&self.pending_subscribe);
            if let Some((_filter, responder)) = pending.take() {
                log_error!("{}: failed to send subscribe for {filter}: {err}", self.id);
                let _ = responder.send(Err(Error::Transport(err.to_string())));
            }
        }

        // SUBACK completes the pending entry in handle_suback().
    }

    /// Processes SUBACK confirmation from the broker.
    fn handle_suback(&mut self, suback: rumqttc::SubAck) {
        // ---
        let mut pending = lock_ignore_poison(&self.pending_subscribe);
        let Some((filter, responder)) = pending.take() else {
            // Reconnect re-subscribe SUBACK; nothing is waiting.
            return;
        };

        let success = suback
            .return_codes
            .iter()
            .all(|code| !matches!(code, rumqttc::SubscribeReasonCode::Failure));

        if success {
            log_info!("{}: subscribed to {filter}", self.id);
            let _ = responder.send(Ok(()));
        } else {
            log_error!(
                "{}: subscription failed for {filter}: {:?}",
                self.id,
                suback.return_codes
            );
            let _ = responder.send(Err(Error::Transport(format!(
                "broker rejected subscription to {filter}"
            ))));
        }
    }

    /// Re-register every live filter after a broker reconnect.
    async fn resubscribe_all(&mut self) {
        // ---
        let mut filters: Vec<String> = {
            let subs = lock_ignore_poison(&self.subscribers);
            let queryables = lock_ignore_poison(&self.queryables);
            subs.values()
                .map(|entry| entry.filter.clone())
                .chain(queryables.values().map(|entry| entry.filter.clone()))
                .collect()
        };
        filters.sort();
        filters.dedup();

        for filter in filters {
            if let Err(err) = self.client.subscribe(&filter, QoS::AtMostOnce).await {
                log_error!("{}: resubscribe failed for {filter}: {err}", self.id);
            } else {
                log_info!("{}: resubscribed to {filter}", self.id);
            }
        }
    }

    /// Demultiplexes an incoming publish to sample, query, or reply
    /// handling.
    fn handle_incoming(&self, publish: Publish) {
        // ---
        let topic = publish.topic.clone();

        let envelope = match serde_json::from_slice::<WireMessage>(&publish.payload) {
            Ok(envelope) => envelope,
            Err(_err) => {
                log_debug!("{}: invalid envelope on topic {topic}: {_err}", self.id);
                return;
            }
        };

        match envelope {
            WireMessage::Sample { payload } => {
                let key = KeyExpr::from(topic);
                let handlers: Vec<SampleHandler> = {
                    let subs = lock_ignore_poison(&self.subscribers);
                    subs.values()
                        .filter(|entry| entry.keyexpr.covers(&key))
                        .map(|entry| Arc::clone(&entry.handler))
                        .collect()
                };

                for handler in handlers {
                    let sample = Sample {
                        keyexpr: key.clone(),
                        payload: payload.clone(),
                    };
                    tokio::spawn(async move {
                        handler(sample);
                    });
                }
            }

            WireMessage::Query {
                correlation_id,
                reply_to,
                selector,
            } => {
                let selector = KeyExpr::from(selector);
                let handlers: Vec<QueryHandler> = {
                    let queryables = lock_ignore_poison(&self.queryables);
                    queryables
                        .values()
                        .filter(|entry| entry.keyexpr.covers(&selector))
                        .map(|entry| Arc::clone(&entry.handler))
                        .collect()
                };

                if handlers.is_empty() {
                    log_debug!("{}: no queryable matches '{selector}'", self.id);
                    return;
                }

                let (tx, mut rx) = mpsc::unbounded_channel();
                for handler in handlers {
                    let query = Query::new(selector.clone(), tx.clone());
                    tokio::spawn(async move {
                        handler(query);
                    });
                }
                drop(tx);

                // Forward replies back over the broker on the query's
                // reply topic.
                let cmd_tx = self.cmd_tx.clone();
                tokio::spawn(async move {
                    while let Some(reply) = rx.recv().await {
                        let result = match reply {
                            QueryReply::Data { keyexpr, payload } => WireReplyResult::Data {
                                keyexpr: keyexpr.as_str().to_string(),
                                payload,
                            },
                            QueryReply::Error { message } => WireReplyResult::Error { message },
                        };
                        let envelope = WireMessage::Reply {
                            correlation_id: correlation_id.clone(),
                            result,
                        };
                        match serde_json::to_vec(&envelope) {
                            Ok(encoded) => {
                                let _ = cmd_tx
                                    .send(Cmd::PublishFire {
                                        topic: reply_to.clone(),
                                        payload: encoded,
                                    })
                                    .await;
                            }
                            Err(_err) => {
                                log_error!("failed to encode query reply: {_err}");
                            }
                        }
                    }
                });
            }

            WireMessage::Reply {
                correlation_id,
                result,
            } => {
                let handler = {
                    let pending = lock_ignore_poison(&self.pending_queries);
                    pending.get(correlation_id.as_str()).cloned()
                };

                let Some(handler) = handler else {
                    log_debug!(
                        "{}: reply for unknown correlation {correlation_id}",
                        self.id
                    );
                    return;
                };

                let reply = match result {
                    WireReplyResult::Data { keyexpr, payload } => QueryReply::Data {
                        keyexpr: KeyExpr::from(keyexpr),
                        payload,
                    },
                    WireReplyResult::Error { message } => QueryReply::Error { message },
                };

                tokio::spawn(async move {
                    handler(reply);
                });
            }
        }
    }

    /// Disconnects from the MQTT broker.
    async fn handle_close(&mut self) {
        // ---
        log_debug!("{}: disconnecting mqtt client", self.id);

        if let Err(_err) = self.client.disconnect().await {
            log_debug!("{}: mqtt disconnect failed: {_err}", self.id);
        }
    }
} // MqttActor

enum HandleSlot {
    Subscriber(u64),
    Publisher,
    Queryable(u64),
}

struct MqttHandle {
    keyexpr: KeyExpr,
    filter: String,
    slot: HandleSlot,
    subscribers: SubscriberMap,
    queryables: QueryableMap,
    cmd_tx: mpsc::Sender<Cmd>,
    released: AtomicBool,
}

impl MqttHandle {
    /// Remove the local registration; unsubscribe the broker filter when
    /// no other registration still uses it.
    fn release(&self) -> Option<String> {
        // ---
        if self.released.swap(true, Ordering::AcqRel) {
            return None;
        }

        match self.slot {
            HandleSlot::Subscriber(id) => {
                lock_ignore_poison(&self.subscribers).remove(&id);
            }
            HandleSlot::Queryable(id) => {
                lock_ignore_poison(&self.queryables).remove(&id);
            }
            HandleSlot::Publisher => return None,
        }

        // One lock at a time; release() may run concurrently from
        // several handles.
        let filter_still_used = lock_ignore_poison(&self.subscribers)
            .values()
            .any(|entry| entry.filter == self.filter)
            || lock_ignore_poison(&self.queryables)
                .values()
                .any(|entry| entry.filter == self.filter);

        if filter_still_used {
            None
        } else {
            Some(self.filter.clone())
        }
    }
}

#[async_trait::async_trait]
impl Declared for MqttHandle {
    fn keyexpr(&self) -> &KeyExpr {
        &self.keyexpr
    }

    async fn undeclare(self: Box<Self>) -> Result<()> {
        // ---
        if let Some(filter) = self.release() {
            self.cmd_tx
                .send(Cmd::Unsubscribe { filter })
                .await
                .map_err(|_| Error::Transport("mqtt actor stopped".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for MqttHandle {
    fn drop(&mut self) {
        // Best-effort when dropped without undeclare.
        if let Some(filter) = self.release() {
            let _ = self.cmd_tx.try_send(Cmd::Unsubscribe { filter });
        }
    }
}

/// Translate a key expression into an MQTT topic filter.
///
/// The trailing `/**` wildcard becomes `/#`; everything else is used
/// verbatim.
fn filter_from_keyexpr(keyexpr: &KeyExpr) -> String {
    match keyexpr.as_str().strip_suffix("/**") {
        Some(prefix) => format!("{prefix}/#"),
        None => keyexpr.as_str().to_string(),
    }
}

/// Parse `tcp/host:port[#iface=NAME]` into host and port.
fn parse_locator(locator: &str) -> std::result::Result<(String, u16), OpenError> {
    // ---
    let rest = locator
        .strip_prefix("tcp/")
        .ok_or_else(|| OpenError::InvalidLocator(locator.to_string()))?;

    let endpoint = rest.split('#').next().unwrap_or(rest);

    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| OpenError::InvalidLocator(locator.to_string()))?;

    let port: u16 = port
        .parse()
        .map_err(|_| OpenError::InvalidLocator(locator.to_string()))?;

    if host.is_empty() {
        return Err(OpenError::InvalidLocator(locator.to_string()));
    }

    Ok((host.to_string(), port))
}

fn classify_connection_error(err: &rumqttc::ConnectionError) -> OpenError {
    // ---
    match err {
        rumqttc::ConnectionError::Io(_) => OpenError::TransportUnavailable,
        rumqttc::ConnectionError::ConnectionRefused(_) => OpenError::OpenFailed,
        rumqttc::ConnectionError::MqttState(_) | rumqttc::ConnectionError::NotConnAck(_) => {
            OpenError::SequenceNegotiation
        }
        other => OpenError::Other(other.to_string()),
    }
}

/// Create an MQTT-backed overlay.
pub fn create_overlay() -> OverlayPtr {
    // ---
    Arc::new(MqttOverlay::new())
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn locator_parsing() {
        // ---
        assert_eq!(
            parse_locator("tcp/192.168.137.37:7447").expect("valid"),
            ("192.168.137.37".to_string(), 7447)
        );
        assert_eq!(
            parse_locator("tcp/broker.local:1883#iface=eth0").expect("valid"),
            ("broker.local".to_string(), 1883)
        );

        assert!(parse_locator("udp/224.0.0.251:7447").is_err());
        assert!(parse_locator("tcp/no-port").is_err());
        assert!(parse_locator("tcp/:7447").is_err());
    }

    #[test]
    fn wildcard_suffix_maps_to_hash() {
        // ---
        assert_eq!(filter_from_keyexpr(&KeyExpr::from("app/results/**")), "app/results/#");
        assert_eq!(filter_from_keyexpr(&KeyExpr::from("app/data")), "app/data");
    }
}
