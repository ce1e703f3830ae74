use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use url::Url;

use tern_core::{BackendRequest, BackendResponse, MeshError, RawEnvelope};

/// Where the backend process listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `tcp://host:port`
    Tcp { host: String, port: u16 },
    /// `unix:///path`
    Unix { path: String },
}

impl Endpoint {
    /// Parse an endpoint from its URL form.
    pub fn parse(raw: &str) -> Result<Self, MeshError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(MeshError::bind_failed("endpoint is required"));
        }
        let parsed = Url::parse(raw)
            .map_err(|err| MeshError::bind_failed(format!("invalid endpoint '{raw}': {err}")))?;
        match parsed.scheme() {
            "tcp" => {
                let host = parsed
                    .host_str()
                    .ok_or_else(|| MeshError::bind_failed("tcp endpoint must include a host"))?
                    .to_owned();
                let port = parsed
                    .port()
                    .ok_or_else(|| MeshError::bind_failed("tcp endpoint must include a port"))?;
                Ok(Self::Tcp { host, port })
            }
            "unix" => {
                let path = parsed.path();
                if path.is_empty() || path == "/" {
                    return Err(MeshError::bind_failed("unix endpoint must include a path"));
                }
                Ok(Self::Unix {
                    path: path.to_owned(),
                })
            }
            other => Err(MeshError::bind_failed(format!(
                "unsupported endpoint scheme '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Self::Unix { path } => write!(f, "unix://{path}"),
        }
    }
}

#[derive(Debug, Default)]
struct GateState {
    signaled: bool,
    waiter: Option<oneshot::Sender<()>>,
}

/// One-shot latch for the backend's readiness signal.
///
/// Signal and wait may land in either order: an early signal is latched, a
/// late waiter resolves immediately. At most one waiter is registered at a
/// time; a newer registration displaces the older one.
#[derive(Debug, Default)]
pub struct ReadinessGate {
    state: Mutex<GateState>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the channel ready and wake the registered waiter, if any.
    pub async fn signal_ready(&self) {
        let waiter = {
            let mut state = self.state.lock().await;
            state.signaled = true;
            state.waiter.take()
        };
        if let Some(waiter) = waiter {
            let _ = waiter.send(());
        }
    }

    /// Wait for readiness. The waiter registration is removed on timeout.
    pub async fn wait_ready(&self, limit: Duration) -> Result<(), MeshError> {
        let signal = {
            let mut state = self.state.lock().await;
            if state.signaled {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            state.waiter = Some(tx);
            rx
        };

        match tokio::time::timeout(limit, signal).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(MeshError::bind_failed("readiness waiter displaced")),
            Err(_) => {
                self.state.lock().await.waiter = None;
                Err(MeshError::BindTimeout)
            }
        }
    }
}

/// One in-flight request paired with its response slot.
#[derive(Debug)]
pub struct PendingRequest {
    pub request: BackendRequest,
    pub respond: oneshot::Sender<Result<BackendResponse, MeshError>>,
}

/// A live channel to the backend, produced by a [`BackendConnector`].
#[derive(Debug)]
pub struct BoundChannel {
    /// Request queue consumed by the wire side.
    pub requests: mpsc::Sender<PendingRequest>,
    /// Raw envelope feed produced by the wire side.
    pub events: mpsc::Receiver<RawEnvelope>,
    /// Latch the wire side fires once the channel is usable.
    pub readiness: Arc<ReadinessGate>,
    /// Cancelled by the wire side when the channel dies.
    pub loss: CancellationToken,
}

/// Seam to the wire implementation owning the actual IPC mechanics.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Open a fresh channel to the backend process.
    async fn open(&self) -> Result<BoundChannel, MeshError>;
}

/// Send one request and wait for its response.
pub(crate) async fn roundtrip(
    requests: &mpsc::Sender<PendingRequest>,
    request: BackendRequest,
    limit: Duration,
) -> Result<BackendResponse, MeshError> {
    let (respond, response) = oneshot::channel();
    requests
        .send(PendingRequest { request, respond })
        .await
        .map_err(|_| MeshError::NotConnected)?;
    match tokio::time::timeout(limit, response).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(MeshError::request_failed("backend closed before responding")),
        Err(_) => Err(MeshError::request_failed("backend response timed out")),
    }
}
