use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of the supervised IPC channel to the backend process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel is bound and none is being established.
    Disconnected,
    /// A channel is being opened.
    Binding,
    /// The channel is open and the readiness signal is awaited.
    AwaitingReadiness,
    /// The channel is bound and ready for requests.
    Connected,
    /// The channel was lost unexpectedly; automatic rebinding is in progress.
    Reconnecting,
    /// Automatic rebinding was exhausted. Terminal until an explicit reset.
    Failed,
}

/// Backend health value published to the application layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackendStatus {
    /// The backend process is not running or not yet started.
    Shutdown,
    /// The backend is starting up or a session is being (re)established.
    Initializing,
    /// The backend is fully operational.
    Ready,
    /// The backend is unusable for the stated reason.
    Error(String),
}

impl BackendStatus {
    /// Parse a backend-reported status string.
    ///
    /// The vocabulary is matched case-insensitively; `ERROR:<reason>` carries
    /// the reason through. Anything outside the vocabulary maps to [`Self::Error`]
    /// with the raw report as the reason.
    pub fn from_report(raw: &str) -> Self {
        let trimmed = raw.trim();
        let upper = trimmed.to_ascii_uppercase();
        match upper.as_str() {
            "SHUTDOWN" => Self::Shutdown,
            "INITIALIZING" => Self::Initializing,
            "READY" => Self::Ready,
            _ if upper.starts_with("ERROR:") => Self::Error(trimmed[6..].trim().to_owned()),
            _ => Self::Error(trimmed.to_owned()),
        }
    }
}

/// Role inferred for an announcing destination.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeType {
    /// A person running a messaging client.
    Peer,
    /// Infrastructure such as a nomadnet node or an unidentified destination.
    Node,
    /// A store-and-forward relay for propagated messages.
    PropagationNode,
}

/// How an outgoing message should be routed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeliveryMethod {
    /// Over an established link to the destination.
    Direct,
    /// Single packet without a link, when the destination is reachable.
    Opportunistic,
    /// Via a propagation relay for later pickup.
    Propagated,
}

/// Outcome reported for a previously sent message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeliveryState {
    /// Handed to the transport.
    Sent,
    /// Confirmed received by the destination.
    Delivered,
    /// Given up after exhausting delivery attempts.
    Failed,
}

/// Direction of a link lifecycle change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LinkEventKind {
    /// A link to the destination came up.
    Established,
    /// A link to the destination went down.
    Closed,
}

/// One announce received from the mesh, enriched with the inferred role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnnounceEvent {
    /// Destination hash of the announcer.
    pub destination_hash: Vec<u8>,
    /// Identity hash behind the destination. Equal to the destination hash
    /// when the backend does not report a separate identity.
    pub identity_hash: Vec<u8>,
    /// Announcer's public key, empty when not included in the announce.
    pub public_key: Vec<u8>,
    /// Application payload carried by the announce.
    pub app_data: Option<Vec<u8>>,
    /// Destination aspect the announce was received under.
    pub aspect: Option<String>,
    /// Hop count from the announcer, zero when unknown.
    pub hops: u32,
    /// Reception time in milliseconds since the epoch.
    pub timestamp_ms: u64,
    /// Name of the interface the announce arrived on.
    pub source_interface: Option<String>,
    /// Role inferred from the aspect and application payload.
    pub node_type: NodeType,
}

/// Notification that a message arrived for the local destination.
///
/// Carries addressing and metadata only; message bodies stay in the backend's
/// store and are fetched separately.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Backend-assigned hash identifying the message.
    pub message_hash: Vec<u8>,
    /// Destination hash of the sender.
    pub source_hash: Vec<u8>,
    /// Local destination hash the message was addressed to.
    pub destination_hash: Vec<u8>,
    /// Message timestamp in milliseconds since the epoch.
    pub timestamp_ms: u64,
    /// Size of the message content in bytes.
    pub content_length: u64,
}

/// Progress report for a previously sent message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryStatusUpdate {
    /// Hash of the message the report refers to.
    pub message_hash: Vec<u8>,
    /// New delivery state.
    pub state: DeliveryState,
    /// Report time in milliseconds since the epoch.
    pub timestamp_ms: u64,
}

/// Link lifecycle change for a remote destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkEvent {
    /// Destination at the far end of the link.
    pub destination_hash: Vec<u8>,
    /// Whether the link came up or went down.
    pub kind: LinkEventKind,
    /// Measured round-trip time, when the backend reports one.
    pub rtt_ms: Option<u64>,
    /// Event time in milliseconds since the epoch.
    pub timestamp_ms: u64,
}

/// Availability change for one of the backend's network interfaces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterfaceStatusEvent {
    /// Interface name as configured in the backend.
    pub name: String,
    /// Interface kind, such as `TCPClientInterface`.
    pub interface_type: Option<String>,
    /// Whether the interface is currently up.
    pub up: bool,
    /// Event time in milliseconds since the epoch.
    pub timestamp_ms: u64,
}

/// Telemetry received from a remote peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryEvent {
    /// Destination hash of the reporting peer.
    pub source_hash: Vec<u8>,
    /// Report time in milliseconds since the epoch.
    pub timestamp_ms: u64,
    /// Backend-defined telemetry document, passed through undecoded.
    pub payload: Value,
}

/// Snapshot row describing one backend network interface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterfaceStat {
    /// Interface name as configured in the backend.
    pub name: String,
    /// Interface kind, such as `AutoInterface`.
    pub interface_type: Option<String>,
    /// Whether the interface is currently up.
    pub up: bool,
    /// Bytes received over the interface since backend start.
    pub rx_bytes: u64,
    /// Bytes transmitted over the interface since backend start.
    pub tx_bytes: u64,
}

/// Result of a path lookup for a destination.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathStatus {
    /// Whether a path to the destination is known.
    pub established: bool,
    /// Hop count along the known path.
    pub hops: Option<u32>,
}

/// Request sent to the backend over the bound channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackendRequest {
    /// Ask for the backend's current status string.
    QueryStatus,
    /// Liveness probe; the backend answers with its heartbeat timestamp.
    Heartbeat,
    /// Announce the local destination immediately.
    AnnounceNow,
    /// Send a message to a destination.
    SendMessage {
        /// Destination hash of the recipient.
        destination_hash: Vec<u8>,
        /// Message body.
        content: String,
        /// Requested routing method.
        method: DeliveryMethod,
    },
    /// Ask the backend to resolve a path to a destination.
    RequestPath {
        /// Destination to resolve.
        destination_hash: Vec<u8>,
    },
    /// Begin fetching held messages from a propagation relay.
    StartPropagationSync {
        /// Relay to fetch from; `None` lets the backend pick one.
        node: Option<Vec<u8>>,
    },
    /// Abort the sync in progress, if any.
    CancelPropagationSync,
    /// Ask for a snapshot of all interface states.
    InterfaceStats,
}

/// Response returned by the backend for a [`BackendRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackendResponse {
    /// Raw status string; see [`BackendStatus::from_report`].
    Status {
        /// Backend-reported status vocabulary word.
        raw: String,
    },
    /// Heartbeat answer.
    Heartbeat {
        /// Time the backend last proved liveness, milliseconds since the epoch.
        timestamp_ms: u64,
    },
    /// The request was accepted and has no further payload.
    Ack,
    /// Handle for a message accepted for sending.
    MessageHandle {
        /// Backend-assigned hash for tracking delivery reports.
        message_hash: Vec<u8>,
    },
    /// Answer to a path request.
    PathStatus(PathStatus),
    /// Answer to an interface snapshot request.
    InterfaceStats(Vec<InterfaceStat>),
}
