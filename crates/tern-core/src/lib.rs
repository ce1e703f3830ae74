//! Protocol types and state machines for the Tern mesh client.
//!
//! Everything in this crate is transport-agnostic: envelope decoding, the
//! backend status model, role classification, rebind backoff, and the relay
//! sync projection. The supervised channel that feeds these lives in
//! `tern-reticulum`.

/// Exponential backoff schedule for automatic rebinding.
pub mod backoff;
/// Role inference for announcing destinations.
pub mod classify;
/// Raw event envelopes and their typed decoding.
pub mod envelope;
/// Failure taxonomy shared across the client.
pub mod error;
/// Distinct-until-changed cell for backend health.
pub mod status;
/// Bounded drop-oldest fan-out streams.
pub mod stream;
/// Relay sync phase projection.
pub mod sync;
/// Protocol data model.
pub mod types;

pub use backoff::RebindPolicy;
pub use classify::classify_node_type;
pub use envelope::{
    AnnounceFrame, EnvelopeError, PropagationReport, ProtocolEvent, RawEnvelope, decode_envelope,
};
pub use error::MeshError;
pub use status::{StatusModel, StatusStream, StatusWaitError};
pub use stream::{EventTap, TapReceiver};
pub use sync::{PropagationPhase, PropagationSyncMachine, PropagationSyncState};
pub use types::{
    AnnounceEvent, BackendRequest, BackendResponse, BackendStatus, ConnectionState, DeliveryMethod,
    DeliveryState, DeliveryStatusUpdate, InterfaceStat, InterfaceStatusEvent, LinkEvent,
    LinkEventKind, NodeType, PathStatus, ReceivedMessage, TelemetryEvent,
};
