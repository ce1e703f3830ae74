use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{
    AnnounceEvent, DeliveryState, DeliveryStatusUpdate, InterfaceStatusEvent, LinkEvent,
    LinkEventKind, NodeType, ReceivedMessage, TelemetryEvent,
};

/// Envelope tag for announce events.
pub const TAG_ANNOUNCE: &str = "announce";
/// Envelope tag for received messages.
pub const TAG_MESSAGE: &str = "message";
/// Envelope tag for delivery reports.
pub const TAG_DELIVERY_STATUS: &str = "delivery-status";
/// Envelope tag for link lifecycle changes.
pub const TAG_LINK_EVENT: &str = "link-event";
/// Envelope tag for backend status announcements.
pub const TAG_STATUS_CHANGED: &str = "status-changed";
/// Envelope tag for relay sync progress reports.
pub const TAG_PROPAGATION_STATE: &str = "propagation-state-changed";
/// Envelope tag for interface availability changes.
pub const TAG_INTERFACE_STATUS: &str = "interface-status";
/// Envelope tag for peer telemetry.
pub const TAG_TELEMETRY: &str = "telemetry";

/// One raw event pushed by the backend over the event feed.
///
/// The payload stays opaque until [`decode_envelope`] runs; nothing outside
/// the decoder inspects it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawEnvelope {
    /// Event type tag.
    pub tag: String,
    /// Tag-specific payload document.
    pub payload: Value,
}

/// Why a raw envelope could not be decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The tag is outside the known vocabulary.
    #[error("unknown envelope tag '{0}'")]
    UnknownTag(String),
    /// A required payload field is absent.
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    /// A payload field is present but unusable.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

/// Announce payload before role classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceFrame {
    /// Destination hash of the announcer.
    pub destination_hash: Vec<u8>,
    /// Identity hash, defaulted to the destination hash when absent.
    pub identity_hash: Vec<u8>,
    /// Announcer's public key, empty when not included.
    pub public_key: Vec<u8>,
    /// Application payload carried by the announce.
    pub app_data: Option<Vec<u8>>,
    /// Destination aspect the announce was received under.
    pub aspect: Option<String>,
    /// Hop count from the announcer.
    pub hops: u32,
    /// Reception time in milliseconds since the epoch.
    pub timestamp_ms: u64,
    /// Name of the interface the announce arrived on.
    pub source_interface: Option<String>,
}

impl AnnounceFrame {
    /// Attach the classified role, producing the published event.
    pub fn into_event(self, node_type: NodeType) -> AnnounceEvent {
        AnnounceEvent {
            destination_hash: self.destination_hash,
            identity_hash: self.identity_hash,
            public_key: self.public_key,
            app_data: self.app_data,
            aspect: self.aspect,
            hops: self.hops,
            timestamp_ms: self.timestamp_ms,
            source_interface: self.source_interface,
            node_type,
        }
    }
}

/// Relay sync progress as reported by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct PropagationReport {
    /// Raw phase word.
    pub phase: String,
    /// Transfer progress in `[0, 1]`, when reported.
    pub progress: Option<f32>,
    /// Messages fetched so far, when reported.
    pub messages_received: Option<u32>,
}

/// Typed union of everything the backend pushes over the event feed.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// An announce arrived; classification happens downstream.
    Announce(AnnounceFrame),
    /// A message arrived for the local destination.
    Message(ReceivedMessage),
    /// A delivery report for a previously sent message.
    DeliveryStatus(DeliveryStatusUpdate),
    /// A link came up or went down.
    Link(LinkEvent),
    /// The backend announced a status change on its own.
    StatusChanged {
        /// Raw status vocabulary word.
        raw: String,
    },
    /// Relay sync progressed.
    PropagationState(PropagationReport),
    /// An interface changed availability.
    InterfaceStatus(InterfaceStatusEvent),
    /// A peer sent telemetry.
    Telemetry(TelemetryEvent),
}

/// Decode a raw envelope into its typed event.
pub fn decode_envelope(envelope: &RawEnvelope) -> Result<ProtocolEvent, EnvelopeError> {
    let payload = &envelope.payload;
    match envelope.tag.as_str() {
        TAG_ANNOUNCE => decode_announce(payload),
        TAG_MESSAGE => decode_message(payload),
        TAG_DELIVERY_STATUS => decode_delivery_status(payload),
        TAG_LINK_EVENT => decode_link_event(payload),
        TAG_STATUS_CHANGED => Ok(ProtocolEvent::StatusChanged {
            raw: str_field(payload, "status")?.to_owned(),
        }),
        TAG_PROPAGATION_STATE => Ok(ProtocolEvent::PropagationState(PropagationReport {
            phase: str_field(payload, "phase")?.to_owned(),
            progress: optional_f32_field(payload, "progress")?,
            messages_received: optional_u32_field(payload, "messages_received")?,
        })),
        TAG_INTERFACE_STATUS => Ok(ProtocolEvent::InterfaceStatus(InterfaceStatusEvent {
            name: str_field(payload, "name")?.to_owned(),
            interface_type: optional_str_field(payload, "type")?.map(str::to_owned),
            up: bool_field(payload, "up")?,
            timestamp_ms: u64_field(payload, "timestamp")?,
        })),
        TAG_TELEMETRY => Ok(ProtocolEvent::Telemetry(TelemetryEvent {
            source_hash: hash_field(payload, "source_hash")?,
            timestamp_ms: u64_field(payload, "timestamp")?,
            payload: payload.get("data").cloned().unwrap_or(Value::Null),
        })),
        other => Err(EnvelopeError::UnknownTag(other.to_owned())),
    }
}

fn decode_announce(payload: &Value) -> Result<ProtocolEvent, EnvelopeError> {
    let destination_hash = hash_field(payload, "destination_hash")?;
    let identity_hash = optional_hash_field(payload, "identity_hash")?
        .unwrap_or_else(|| destination_hash.clone());
    let app_data =
        optional_hash_field(payload, "app_data")?.filter(|data| !data.is_empty());
    Ok(ProtocolEvent::Announce(AnnounceFrame {
        destination_hash,
        identity_hash,
        public_key: optional_hash_field(payload, "public_key")?.unwrap_or_default(),
        app_data,
        aspect: optional_str_field(payload, "aspect")?.map(str::to_owned),
        hops: optional_u32_field(payload, "hops")?.unwrap_or(0),
        timestamp_ms: u64_field(payload, "timestamp")?,
        source_interface: optional_str_field(payload, "interface")?.map(str::to_owned),
    }))
}

fn decode_message(payload: &Value) -> Result<ProtocolEvent, EnvelopeError> {
    Ok(ProtocolEvent::Message(ReceivedMessage {
        message_hash: hash_field(payload, "message_hash")?,
        source_hash: hash_field(payload, "source_hash")?,
        destination_hash: hash_field(payload, "destination_hash")?,
        timestamp_ms: u64_field(payload, "timestamp")?,
        content_length: optional_u64_field(payload, "content_length")?.unwrap_or(0),
    }))
}

fn decode_delivery_status(payload: &Value) -> Result<ProtocolEvent, EnvelopeError> {
    let raw_state = str_field(payload, "status")?;
    let state = match raw_state.to_ascii_lowercase().as_str() {
        "sent" => DeliveryState::Sent,
        "delivered" => DeliveryState::Delivered,
        "failed" => DeliveryState::Failed,
        _ => {
            return Err(EnvelopeError::InvalidField {
                field: "status",
                reason: format!("unknown delivery state '{raw_state}'"),
            });
        }
    };
    Ok(ProtocolEvent::DeliveryStatus(DeliveryStatusUpdate {
        message_hash: hash_field(payload, "message_hash")?,
        state,
        timestamp_ms: u64_field(payload, "timestamp")?,
    }))
}

fn decode_link_event(payload: &Value) -> Result<ProtocolEvent, EnvelopeError> {
    let raw_kind = str_field(payload, "event")?;
    let kind = match raw_kind.to_ascii_lowercase().as_str() {
        "established" => LinkEventKind::Established,
        "closed" => LinkEventKind::Closed,
        _ => {
            return Err(EnvelopeError::InvalidField {
                field: "event",
                reason: format!("unknown link event '{raw_kind}'"),
            });
        }
    };
    Ok(ProtocolEvent::Link(LinkEvent {
        destination_hash: hash_field(payload, "destination_hash")?,
        kind,
        rtt_ms: optional_u64_field(payload, "rtt_ms")?,
        timestamp_ms: u64_field(payload, "timestamp")?,
    }))
}

fn field<'a>(payload: &'a Value, name: &'static str) -> Result<&'a Value, EnvelopeError> {
    match payload.get(name) {
        Some(value) if !value.is_null() => Ok(value),
        _ => Err(EnvelopeError::MissingField(name)),
    }
}

fn str_field<'a>(payload: &'a Value, name: &'static str) -> Result<&'a str, EnvelopeError> {
    field(payload, name)?
        .as_str()
        .ok_or(EnvelopeError::InvalidField {
            field: name,
            reason: "expected a string".to_owned(),
        })
}

fn optional_str_field<'a>(
    payload: &'a Value,
    name: &'static str,
) -> Result<Option<&'a str>, EnvelopeError> {
    match payload.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_str()
            .map(Some)
            .ok_or(EnvelopeError::InvalidField {
                field: name,
                reason: "expected a string".to_owned(),
            }),
    }
}

fn hash_field(payload: &Value, name: &'static str) -> Result<Vec<u8>, EnvelopeError> {
    let text = str_field(payload, name)?;
    hex::decode(text).map_err(|err| EnvelopeError::InvalidField {
        field: name,
        reason: err.to_string(),
    })
}

fn optional_hash_field(
    payload: &Value,
    name: &'static str,
) -> Result<Option<Vec<u8>>, EnvelopeError> {
    let Some(text) = optional_str_field(payload, name)? else {
        return Ok(None);
    };
    hex::decode(text)
        .map(Some)
        .map_err(|err| EnvelopeError::InvalidField {
            field: name,
            reason: err.to_string(),
        })
}

fn u64_field(payload: &Value, name: &'static str) -> Result<u64, EnvelopeError> {
    field(payload, name)?
        .as_u64()
        .ok_or(EnvelopeError::InvalidField {
            field: name,
            reason: "expected an unsigned integer".to_owned(),
        })
}

fn optional_u64_field(payload: &Value, name: &'static str) -> Result<Option<u64>, EnvelopeError> {
    match payload.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or(EnvelopeError::InvalidField {
                field: name,
                reason: "expected an unsigned integer".to_owned(),
            }),
    }
}

fn optional_u32_field(payload: &Value, name: &'static str) -> Result<Option<u32>, EnvelopeError> {
    let Some(value) = optional_u64_field(payload, name)? else {
        return Ok(None);
    };
    u32::try_from(value)
        .map(Some)
        .map_err(|_| EnvelopeError::InvalidField {
            field: name,
            reason: "value out of range".to_owned(),
        })
}

fn optional_f32_field(payload: &Value, name: &'static str) -> Result<Option<f32>, EnvelopeError> {
    match payload.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(|number| Some(number as f32))
            .ok_or(EnvelopeError::InvalidField {
                field: name,
                reason: "expected a number".to_owned(),
            }),
    }
}

fn bool_field(payload: &Value, name: &'static str) -> Result<bool, EnvelopeError> {
    field(payload, name)?
        .as_bool()
        .ok_or(EnvelopeError::InvalidField {
            field: name,
            reason: "expected a boolean".to_owned(),
        })
}
