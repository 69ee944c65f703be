//! Resource declaration.
//!
//! Runs once, immediately after the session opens. Declares the fixed
//! resource set in order (subscriber, publisher, query responder), each
//! independently and best-effort: a failed declaration is logged, the
//! resource stays unavailable for the rest of the session, and the
//! remaining declarations still run. The caller commits the returned
//! record as a whole and only then raises `DECLARED`.

use std::sync::Arc;

use crate::config::SessionConfig;
use crate::domain::{
    //
    KeyExpr,
    PublisherHandle,
    Query,
    QueryReply,
    QueryableHandle,
    SampleHandler,
    SessionPtr,
    SubscriberHandle,
};
use crate::manager::ProviderSlot;
use crate::{lock_ignore_poison, log_error, log_info};

/// Handles produced by one declaration pass.
#[derive(Default)]
pub(crate) struct DeclaredResources {
    pub subscriber: Option<SubscriberHandle>,
    pub publisher: Option<PublisherHandle>,
    pub queryable: Option<QueryableHandle>,
}

/// Declare every applicable resource for this role.
pub(crate) async fn declare_all(
    session: &SessionPtr,
    config: &SessionConfig,
    data_handler: SampleHandler,
    provider: ProviderSlot,
) -> DeclaredResources {
    // ---
    let mut resources = DeclaredResources::default();
    let topics = &config.topics;

    if config.subscriber_enabled {
        let keyexpr = KeyExpr::from(format!("{}/**", topics.inbound(config.role)));
        match session.declare_subscriber(keyexpr.clone(), data_handler).await {
            Ok(handle) => {
                log_info!("subscriber on '{keyexpr}'");
                resources.subscriber = Some(handle);
            }
            Err(err) => {
                log_error!("unable to declare subscriber on '{keyexpr}': {err}");
            }
        }
    }

    if config.publisher_enabled {
        let keyexpr = KeyExpr::from(format!("{}/**", topics.outbound(config.role)));
        match session.declare_publisher(keyexpr.clone()).await {
            Ok(handle) => {
                log_info!("publisher on '{keyexpr}'");
                resources.publisher = Some(handle);
            }
            Err(err) => {
                log_error!("unable to declare publisher on '{keyexpr}': {err}");
            }
        }
    }

    if config.query_responder_enabled {
        if let Some(topic) = topics.queryable(config.role) {
            let keyexpr = KeyExpr::from(topic);
            let handler = query_handler(provider);
            match session.declare_queryable(keyexpr.clone(), handler).await {
                Ok(handle) => {
                    log_info!("query responder on '{keyexpr}'");
                    resources.queryable = Some(handle);
                }
                Err(err) => {
                    log_error!("unable to declare query responder on '{keyexpr}': {err}");
                }
            }
        }
    }

    resources
}

/// Build the queryable handler bridging inbound queries to the registered
/// provider.
///
/// The querying peer always receives a distinguishable outcome: data when
/// the provider produced a payload, an explicit error reply when the
/// provider failed or none is registered. Never silence.
fn query_handler(provider: ProviderSlot) -> Arc<dyn Fn(Query) + Send + Sync> {
    // ---
    Arc::new(move |query: Query| {
        let registered = lock_ignore_poison(&provider).clone();

        let Some(registered) = registered else {
            log_error!(
                "query on '{}' but no data provider registered",
                query.selector()
            );
            query.respond(QueryReply::Error {
                message: "no data provider registered".to_string(),
            });
            return;
        };

        match registered.produce(query.selector()) {
            Ok(buffer) => {
                let keyexpr = query.selector().clone();
                query.respond(QueryReply::Data {
                    keyexpr,
                    payload: buffer.into_bytes(),
                });
            }
            Err(err) => {
                log_error!("data provider failed for '{}': {err}", query.selector());
                query.respond(QueryReply::Error {
                    message: err.to_string(),
                });
            }
        }
    })
}
