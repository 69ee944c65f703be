//! Wire envelope for broker-backed overlays.
//!
//! Broker transports multiplex samples, queries, and replies over plain
//! topics; the envelope tags which is which. The in-memory backend never
//! serializes; these types exist for transports that cross a wire.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::CorrelationId;

/// One message on a broker topic.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum WireMessage {
    /// A published sample.
    Sample {
        /// Opaque payload bytes.
        payload: Bytes,
    },

    /// An outbound query addressed to a queryable's topic.
    Query {
        /// Matches the eventual reply to the querying peer's handler.
        correlation_id: CorrelationId,
        /// Topic the reply must be published on.
        reply_to: String,
        /// Selector the querying peer asked for.
        selector: String,
    },

    /// A reply, published on the query's `reply_to` topic.
    Reply {
        correlation_id: CorrelationId,
        result: WireReplyResult,
    },
}

/// Data-or-error outcome carried inside a reply envelope.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum WireReplyResult {
    Data { keyexpr: String, payload: Bytes },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn query_envelope_round_trips() {
        // ---
        let id = CorrelationId::generate();
        let msg = WireMessage::Query {
            correlation_id: id.clone(),
            reply_to: "replies/AB12".to_string(),
            selector: "app/data".to_string(),
        };

        let encoded = serde_json::to_vec(&msg).expect("encode");
        let decoded: WireMessage = serde_json::from_slice(&encoded).expect("decode");

        match decoded {
            WireMessage::Query {
                correlation_id,
                reply_to,
                selector,
            } => {
                assert_eq!(correlation_id, id);
                assert_eq!(reply_to, "replies/AB12");
                assert_eq!(selector, "app/data");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn error_reply_is_distinguishable() {
        // ---
        let msg = WireMessage::Reply {
            correlation_id: CorrelationId::generate(),
            result: WireReplyResult::Error {
                message: "no provider".to_string(),
            },
        };

        let encoded = serde_json::to_vec(&msg).expect("encode");
        let decoded: WireMessage = serde_json::from_slice(&encoded).expect("decode");

        assert!(matches!(
            decoded,
            WireMessage::Reply {
                result: WireReplyResult::Error { .. },
                ..
            }
        ));
    }
}
