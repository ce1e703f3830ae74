//! Supervised IPC client for an out-of-process Reticulum/LXMF backend.
//!
//! The backend process owns the mesh stack; this crate owns the channel to
//! it. A single supervising task binds the channel with an explicit
//! readiness handshake, watches it for loss, rebinds with exponential
//! backoff, and feeds received envelopes through an [`router::EventRouter`]
//! into typed sub-streams. [`client::MeshClient`] is the handle applications
//! hold.

/// Client facade over the supervising task.
pub mod client;
/// Envelope fan-out into typed sub-streams.
pub mod router;
/// Channel lifecycle supervision.
pub mod supervisor;
/// Wire seam: endpoints, readiness, and the connector trait.
pub mod transport;

pub use client::{ClientOptions, MeshClient};
pub use router::EventRouter;
pub use supervisor::{ReinitHook, SupervisorConfig};
pub use transport::{BackendConnector, BoundChannel, Endpoint, PendingRequest, ReadinessGate};
