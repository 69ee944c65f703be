//! Periodic heartbeat exchange.
//!
//! Auxiliary collaborator layered on the pub/sub surface: it declares its
//! own publisher/subscriber pair on a dedicated channel and runs its own
//! periodic task. The session manager only calls [`Heartbeat::init`] and
//! [`Heartbeat::stop`] at the appropriate lifecycle points; the heartbeat
//! never participates in the core declarer's success/failure accounting.
//!
//! The beat task waits for the `DECLARED` readiness bit before its first
//! beat, so heartbeats never race resource declaration.

use std::sync::Mutex;

use crate::config::HeartbeatConfig;
use crate::domain::{KeyExpr, OutboundBuffer, PublisherHandle, SessionPtr, SubscriberHandle};
use crate::readiness::{flag, Readiness};
use crate::{lock_ignore_poison, log_debug, log_error, log_info, log_warn};

struct Active {
    _publisher: Option<PublisherHandle>,
    _subscriber: Option<SubscriberHandle>,
    task: tokio::task::JoinHandle<()>,
}

/// Heartbeat collaborator; one per session manager.
///
/// Inactive until [`init`](Self::init) is called with an open session.
pub struct Heartbeat {
    state: Mutex<Option<Active>>,
}

impl Heartbeat {
    /// Create an inactive heartbeat.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    /// Declare the heartbeat resources and start the beat task.
    ///
    /// Declarations are best-effort, like the core resources: a failed
    /// publisher declaration is logged and beats are skipped, but the
    /// inbound side may still work (and vice versa).
    pub async fn init(&self, session: &SessionPtr, readiness: &Readiness, config: &HeartbeatConfig) {
        // ---
        if lock_ignore_poison(&self.state).is_some() {
            log_warn!("heartbeat already initialized");
            return;
        }

        log_debug!("heartbeat initializing on '{}'", config.channel);
        let channel = KeyExpr::from(config.channel.as_str());

        let publisher = match session.declare_publisher(channel.clone()).await {
            Ok(handle) => {
                log_info!("heartbeat publisher on '{}'", config.channel);
                Some(handle)
            }
            Err(err) => {
                log_error!(
                    "unable to declare heartbeat publisher on '{}': {err}",
                    config.channel
                );
                None
            }
        };

        let subscriber = match session
            .declare_subscriber(
                channel.clone(),
                std::sync::Arc::new(|sample: crate::domain::Sample| {
                    let text = String::from_utf8_lossy(&sample.payload);
                    log_info!("HB IN: '{text}' on '{}'", sample.keyexpr);
                }),
            )
            .await
        {
            Ok(handle) => {
                log_info!("heartbeat subscriber on '{}'", config.channel);
                Some(handle)
            }
            Err(err) => {
                log_error!(
                    "unable to declare heartbeat subscriber on '{}': {err}",
                    config.channel
                );
                None
            }
        };

        let task = tokio::spawn(beat_task(
            session.clone(),
            readiness.clone(),
            channel,
            config.message.clone(),
            config.interval,
            publisher.is_some(),
        ));

        *lock_ignore_poison(&self.state) = Some(Active {
            _publisher: publisher,
            _subscriber: subscriber,
            task,
        });
    }

    /// Stop the beat task and drop the heartbeat resources.
    ///
    /// Idempotent; safe to call before `init`.
    pub fn stop(&self) {
        // ---
        if let Some(active) = lock_ignore_poison(&self.state).take() {
            active.task.abort();
            log_debug!("heartbeat stopped");
        }
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

async fn beat_task(
    session: SessionPtr,
    readiness: Readiness,
    channel: KeyExpr,
    message: String,
    interval: std::time::Duration,
    publisher_declared: bool,
) {
    // ---
    log_debug!("heartbeat task waiting for declared resources");
    readiness.wait(flag::DECLARED).await;

    if !publisher_declared {
        log_warn!("heartbeat publisher missing; beats disabled");
        return;
    }
    log_debug!("resources ready; starting heartbeat loop");

    let mut counter: u32 = 0;
    loop {
        tokio::time::sleep(interval).await;
        counter += 1;

        let beat = format!("{message} #{counter}");
        log_info!("OUT: '{beat}' at '{channel}'");

        if let Err(err) = session.put(&channel, OutboundBuffer::from(beat)).await {
            log_warn!("heartbeat publish failed: {err}");
        }
    }
}
