use thiserror::Error;

/// Failure taxonomy surfaced across the client boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// The IPC channel could not be opened at all.
    #[error("channel bind failed: {reason}")]
    BindFailed {
        /// Connector-reported reason.
        reason: String,
    },
    /// The backend never signaled readiness within the allowed window.
    #[error("timed out waiting for backend readiness")]
    BindTimeout,
    /// A request was issued while no channel is bound.
    ///
    /// Transient; when this follows an unexpected loss, a rebind is already
    /// in progress.
    #[error("not connected to backend")]
    NotConnected,
    /// The backend rejected or failed an individual request.
    #[error("backend request failed: {reason}")]
    RequestFailed {
        /// Backend-reported reason.
        reason: String,
    },
    /// Rebinding was exhausted; the session is gone until an explicit reset.
    #[error("connection lost")]
    ConnectionLost,
}

impl MeshError {
    /// Build a `BindFailed` error.
    pub fn bind_failed(reason: impl Into<String>) -> Self {
        Self::BindFailed {
            reason: reason.into(),
        }
    }

    /// Build a `RequestFailed` error.
    pub fn request_failed(reason: impl Into<String>) -> Self {
        Self::RequestFailed {
            reason: reason.into(),
        }
    }

    /// Whether external intervention is required before the client is usable again.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConnectionLost)
    }
}
