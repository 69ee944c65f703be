// src/domain/mod.rs

//! Domain abstractions shared by the manager and the overlay backends.

mod overlay;

pub use overlay::{
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
