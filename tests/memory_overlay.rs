// tests/memory_overlay.rs

//! Reference semantics of the in-memory overlay backend.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use common::test_params;
use overlink::{
    //
    create_memory_overlay,
    scout,
    KeyExpr,
    OutboundBuffer,
    Query,
    QueryReply,
};

#[tokio::test(start_paused = true)]
async fn subscribe_then_put_delivers() {
    // ---
    // Arrange
    // ---
    let overlay = create_memory_overlay();

    let publisher_side = overlay.open(&test_params()).await.expect("open");
    let (_session, _handle, mut inbox) = common::observer_session(&overlay, "test/topic/**").await;

    // ---
    // Act
    // ---
    publisher_side
        .put(
            &KeyExpr::from("test/topic/reading"),
            OutboundBuffer::from("hello"),
        )
        .await
        .expect("put");

    // ---
    // Assert
    // ---
    let received = timeout(Duration::from_millis(100), inbox.recv())
        .await
        .expect("timed out waiting for sample")
        .expect("subscription channel closed unexpectedly");

    assert_eq!(received.payload.as_ref(), b"hello");
    assert_eq!(received.keyexpr.as_str(), "test/topic/reading");
}

#[tokio::test(start_paused = true)]
async fn wildcard_scoping_filters_unrelated_topics() {
    // ---
    let overlay = create_memory_overlay();

    let publisher_side = overlay.open(&test_params()).await.expect("open");
    let (_session, _handle, mut inbox) = common::observer_session(&overlay, "scoped/**").await;

    publisher_side
        .put(&KeyExpr::from("other/branch"), OutboundBuffer::from("nope"))
        .await
        .expect("put");
    publisher_side
        .put(&KeyExpr::from("scopedsuffix"), OutboundBuffer::from("nope"))
        .await
        .expect("put");
    publisher_side
        .put(&KeyExpr::from("scoped/yes"), OutboundBuffer::from("yes"))
        .await
        .expect("put");

    let received = timeout(Duration::from_millis(100), inbox.recv())
        .await
        .expect("matching sample should arrive")
        .expect("channel open");
    assert_eq!(received.payload.as_ref(), b"yes");

    // Nothing else was delivered.
    assert!(
        timeout(Duration::from_millis(100), inbox.recv()).await.is_err(),
        "non-matching topics must not be delivered"
    );
}

#[tokio::test(start_paused = true)]
async fn queryable_roundtrip() {
    // ---
    let overlay = create_memory_overlay();

    let responder_side = overlay.open(&test_params()).await.expect("open");
    let querying_side = overlay.open(&test_params()).await.expect("open");

    let _queryable = responder_side
        .declare_queryable(
            KeyExpr::from("sensors/data"),
            Arc::new(|query: Query| {
                let keyexpr = query.selector().clone();
                query.respond(QueryReply::Data {
                    keyexpr,
                    payload: bytes::Bytes::from_static(b"reading-42"),
                });
            }),
        )
        .await
        .expect("declare queryable");

    let (tx, mut replies) = mpsc::unbounded_channel();
    querying_side
        .get(
            &KeyExpr::from("sensors/data"),
            Arc::new(move |reply| {
                let _ = tx.send(reply);
            }),
        )
        .await
        .expect("get");

    let reply = timeout(Duration::from_millis(100), replies.recv())
        .await
        .expect("reply should arrive")
        .expect("reply channel open");

    match reply {
        QueryReply::Data { keyexpr, payload } => {
            assert_eq!(keyexpr.as_str(), "sensors/data");
            assert_eq!(payload.as_ref(), b"reading-42");
        }
        QueryReply::Error { message } => panic!("unexpected error reply: {message}"),
    }
}

#[tokio::test(start_paused = true)]
async fn undeclare_stops_delivery() {
    // ---
    let overlay = create_memory_overlay();

    let publisher_side = overlay.open(&test_params()).await.expect("open");
    let (_session, handle, mut inbox) = common::observer_session(&overlay, "gone/**").await;

    handle.undeclare().await.expect("undeclare");

    publisher_side
        .put(&KeyExpr::from("gone/one"), OutboundBuffer::from("x"))
        .await
        .expect("put");

    assert!(
        timeout(Duration::from_millis(100), inbox.recv()).await.is_err(),
        "undeclared subscriber must not receive samples"
    );
}

#[tokio::test(start_paused = true)]
async fn closed_session_rejects_operations() {
    // ---
    let overlay = create_memory_overlay();
    let session = overlay.open(&test_params()).await.expect("open");

    session.close().await.expect("close");

    let result = session
        .put(&KeyExpr::from("any/key"), OutboundBuffer::from("x"))
        .await;
    assert!(result.is_err(), "put on a closed session must fail");
}

#[tokio::test(start_paused = true)]
async fn scout_reports_open_sessions() {
    // ---
    let overlay = create_memory_overlay();

    let first = overlay.open(&test_params()).await.expect("open");
    let second = overlay.open(&test_params()).await.expect("open");

    let peers = scout(&overlay, &test_params(), Duration::from_secs(1))
        .await
        .expect("scout");

    assert!(peers.contains(&first.id()));
    assert!(peers.contains(&second.id()));
    assert_eq!(peers.len(), 2);
}
