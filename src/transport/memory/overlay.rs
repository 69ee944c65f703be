// src/transport/memory/overlay.rs

//! In-memory overlay implementation.
//!
//! This file contains the concrete implementation of the domain-level
//! [`Overlay`] and [`OverlaySession`] traits using in-process data
//! structures only.
//!
//! The memory overlay is the **reference implementation** of overlay
//! semantics. Other backends are expected to approximate this behavior
//! as closely as their underlying systems allow and to document any
//! unavoidable deviations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

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
    QueryableHandle,
    ReplyHandler,
    Sample,
    SampleHandler,
    SessionPtr,
    SubscriberHandle,
};
use crate::error::OpenError;
use crate::lock_ignore_poison;
use crate::resolver::LinkParams;
use crate::{log_debug, Error, Result};

struct SubscriberEntry {
    keyexpr: KeyExpr,
    handler: SampleHandler,
}

struct QueryableEntry {
    keyexpr: KeyExpr,
    handler: QueryHandler,
}

/// One in-process overlay segment shared by every session opened on the
/// same [`MemoryOverlay`] value.
struct Segment {
    subscribers: Mutex<HashMap<u64, SubscriberEntry>>,
    queryables: Mutex<HashMap<u64, QueryableEntry>>,
    peers: Mutex<HashMap<u64, PeerId>>,
    next_id: AtomicU64,
}

impl Segment {
    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// In-memory overlay.
///
/// Simulates an overlay segment entirely within the process: every
/// session opened on the same `MemoryOverlay` (or a clone of it) sees
/// the others' publishers, subscribers, and queryables. Intended for
/// testing and for validating manager behavior without network, broker,
/// or timing variability.
///
/// ## Semantics
///
/// - Declarations are registered immediately; once a declare call
///   returns, subsequent matching puts are deliverable.
/// - Handlers run on freshly spawned tasks, never on the caller's task,
///   matching the arbitrary-task contract of real backends.
/// - A query is routed to every matching queryable; replies are
///   forwarded until all query handles are dropped.
///
/// ## Non-Goals
///
/// - Persistence or durability
/// - Network behavior or failure simulation
/// - Exact emulation of any specific broker or overlay protocol
#[derive(Clone)]
pub struct MemoryOverlay {
    segment: Arc<Segment>,
}

impl MemoryOverlay {
    /// Create a fresh, empty overlay segment.
    pub fn new() -> Self {
        Self {
            segment: Arc::new(Segment {
                subscribers: Mutex::new(HashMap::new()),
                queryables: Mutex::new(HashMap::new()),
                peers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }
}

impl Default for MemoryOverlay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Overlay for MemoryOverlay {
    // ---

    async fn open(&self, params: &LinkParams) -> std::result::Result<SessionPtr, OpenError> {
        // ---
        if params.locator.is_empty() {
            return Err(OpenError::InvalidLocator("empty locator".to_string()));
        }

        let id = PeerId::random();
        let peer_key = self.segment.allocate_id();
        lock_ignore_poison(&self.segment.peers).insert(peer_key, id);

        Ok(Arc::new(MemorySession {
            id,
            peer_key,
            segment: Arc::clone(&self.segment),
            closed: AtomicBool::new(false),
        }))
    }

    async fn scout(&self, _params: &LinkParams, wait: std::time::Duration) -> Result<Vec<PeerId>> {
        // ---
        tokio::time::sleep(wait).await;

        let peers = lock_ignore_poison(&self.segment.peers)
            .values()
            .copied()
            .collect();
        Ok(peers)
    }
}

struct MemorySession {
    id: PeerId,
    peer_key: u64,
    segment: Arc<Segment>,
    closed: AtomicBool,
}

impl MemorySession {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::NotConnected);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl OverlaySession for MemorySession {
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
        self.ensure_open()?;

        let id = self.segment.allocate_id();
        lock_ignore_poison(&self.segment.subscribers).insert(
            id,
            SubscriberEntry {
                keyexpr: keyexpr.clone(),
                handler,
            },
        );

        Ok(Box::new(MemoryHandle {
            keyexpr,
            kind: HandleKind::Subscriber(id),
            segment: Arc::clone(&self.segment),
        }))
    }

    async fn declare_publisher(&self, keyexpr: KeyExpr) -> Result<PublisherHandle> {
        // ---
        self.ensure_open()?;

        // Publishers need no routing state in-process; the handle is the
        // declaration.
        Ok(Box::new(MemoryHandle {
            keyexpr,
            kind: HandleKind::Publisher,
            segment: Arc::clone(&self.segment),
        }))
    }

    async fn declare_queryable(
        &self,
        keyexpr: KeyExpr,
        handler: QueryHandler,
    ) -> Result<QueryableHandle> {
        // ---
        self.ensure_open()?;

        let id = self.segment.allocate_id();
        lock_ignore_poison(&self.segment.queryables).insert(
            id,
            QueryableEntry {
                keyexpr: keyexpr.clone(),
                handler,
            },
        );

        Ok(Box::new(MemoryHandle {
            keyexpr,
            kind: HandleKind::Queryable(id),
            segment: Arc::clone(&self.segment),
        }))
    }

    /// Deliver a payload to every subscriber whose expression covers
    /// `keyexpr`.
    ///
    /// Matching is the reference semantics: exact chunk equality plus the
    /// trailing `/**` wildcard (see [`KeyExpr::covers`]).
    async fn put(&self, keyexpr: &KeyExpr, payload: OutboundBuffer) -> Result<()> {
        // ---
        self.ensure_open()?;

        let payload: Bytes = payload.into_bytes();

        let handlers: Vec<SampleHandler> = {
            let subs = lock_ignore_poison(&self.segment.subscribers);
            subs.values()
                .filter(|entry| entry.keyexpr.covers(keyexpr))
                .map(|entry| Arc::clone(&entry.handler))
                .collect()
        };

        for handler in handlers {
            let sample = Sample {
                keyexpr: keyexpr.clone(),
                payload: payload.clone(),
            };
            // Handlers observe arbitrary-task semantics, same as real
            // backends.
            tokio::spawn(async move {
                handler(sample);
            });
        }

        Ok(())
    }

    async fn get(&self, selector: &KeyExpr, on_reply: ReplyHandler) -> Result<()> {
        // ---
        self.ensure_open()?;

        let handlers: Vec<QueryHandler> = {
            let queryables = lock_ignore_poison(&self.segment.queryables);
            queryables
                .values()
                .filter(|entry| entry.keyexpr.covers(selector))
                .map(|entry| Arc::clone(&entry.handler))
                .collect()
        };

        if handlers.is_empty() {
            log_debug!("no queryable matches selector '{selector}'");
        }

        let (tx, mut rx) = mpsc::unbounded_channel();

        for handler in handlers {
            let query = Query::new(selector.clone(), tx.clone());
            tokio::spawn(async move {
                handler(query);
            });
        }
        drop(tx);

        // Forward replies until every query handle is consumed or dropped.
        tokio::spawn(async move {
            while let Some(reply) = rx.recv().await {
                on_reply(reply);
            }
        });

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // ---
        self.closed.store(true, Ordering::Release);
        lock_ignore_poison(&self.segment.peers).remove(&self.peer_key);
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        lock_ignore_poison(&self.segment.peers).remove(&self.peer_key);
    }
}

enum HandleKind {
    Subscriber(u64),
    Publisher,
    Queryable(u64),
}

struct MemoryHandle {
    keyexpr: KeyExpr,
    kind: HandleKind,
    segment: Arc<Segment>,
}

#[async_trait::async_trait]
impl Declared for MemoryHandle {
    fn keyexpr(&self) -> &KeyExpr {
        &self.keyexpr
    }

    async fn undeclare(self: Box<Self>) -> Result<()> {
        // Drop glue performs the removal.
        Ok(())
    }
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        match self.kind {
            HandleKind::Subscriber(id) => {
                lock_ignore_poison(&self.segment.subscribers).remove(&id);
            }
            HandleKind::Queryable(id) => {
                lock_ignore_poison(&self.segment.queryables).remove(&id);
            }
            HandleKind::Publisher => {}
        }
    }
}

/// Create a new in-memory overlay.
///
/// Always available and requires no external resources. Clone the
/// returned pointer's source [`MemoryOverlay`] (or share the `Arc`) to
/// put multiple sessions on the same segment.
pub fn create_overlay() -> OverlayPtr {
    // ---
    Arc::new(MemoryOverlay::new())
}
