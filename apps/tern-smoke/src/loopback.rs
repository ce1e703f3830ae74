use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tern_core::envelope::{
    TAG_ANNOUNCE, TAG_DELIVERY_STATUS, TAG_INTERFACE_STATUS, TAG_MESSAGE, TAG_PROPAGATION_STATE,
};
use tern_core::{BackendRequest, BackendResponse, InterfaceStat, MeshError, PathStatus, RawEnvelope};
use tern_reticulum::{BackendConnector, BoundChannel, PendingRequest, ReadinessGate};

const READY_DELAY: Duration = Duration::from_millis(25);
const FEED_INTERVAL: Duration = Duration::from_millis(150);

const PEER_HASH: [u8; 16] = [
    0x3A, 0x91, 0x04, 0xC2, 0x7F, 0x15, 0xE8, 0x5D, 0x20, 0xBB, 0x61, 0x0C, 0x9E, 0x44, 0xD7,
    0x88,
];
const RELAY_HASH: [u8; 16] = [
    0xB4, 0x2E, 0x99, 0x01, 0x5C, 0xA7, 0x33, 0xF0, 0x8D, 0x16, 0xEE, 0x72, 0x05, 0xC9, 0x3B,
    0x60,
];

/// In-process stand-in for the backend bridge.
///
/// Answers the whole request vocabulary and plays back a canned event feed,
/// so the client path can be exercised without a running mesh daemon.
pub struct LoopbackBackend;

#[async_trait]
impl BackendConnector for LoopbackBackend {
    async fn open(&self) -> Result<BoundChannel, MeshError> {
        let (requests, requests_rx) = mpsc::channel(16);
        let (events_tx, events) = mpsc::channel(64);
        let readiness = Arc::new(ReadinessGate::new());
        let loss = CancellationToken::new();
        tokio::spawn(run_wire(
            requests_rx,
            events_tx,
            Arc::clone(&readiness),
            loss.clone(),
        ));
        Ok(BoundChannel {
            requests,
            events,
            readiness,
            loss,
        })
    }
}

async fn run_wire(
    mut requests: mpsc::Receiver<PendingRequest>,
    events: mpsc::Sender<RawEnvelope>,
    readiness: Arc<ReadinessGate>,
    loss: CancellationToken,
) {
    tokio::time::sleep(READY_DELAY).await;
    readiness.signal_ready().await;

    let mut feed = feed_script().into_iter();
    let mut ticker = tokio::time::interval(FEED_INTERVAL);
    loop {
        tokio::select! {
            _ = loss.cancelled() => break,
            maybe = requests.recv() => {
                let Some(pending) = maybe else { break };
                let _ = pending.respond.send(Ok(answer(&pending.request)));
            }
            _ = ticker.tick() => {
                if let Some(envelope) = feed.next()
                    && events.send(envelope).await.is_err()
                {
                    break;
                }
            }
        }
    }
}

fn answer(request: &BackendRequest) -> BackendResponse {
    match request {
        BackendRequest::QueryStatus => BackendResponse::Status {
            raw: "READY".to_owned(),
        },
        BackendRequest::Heartbeat => BackendResponse::Heartbeat {
            timestamp_ms: now_ms(),
        },
        BackendRequest::SendMessage { .. } => BackendResponse::MessageHandle {
            message_hash: vec![0x7E; 16],
        },
        BackendRequest::RequestPath { .. } => BackendResponse::PathStatus(PathStatus {
            established: true,
            hops: Some(2),
        }),
        BackendRequest::InterfaceStats => BackendResponse::InterfaceStats(vec![InterfaceStat {
            name: "AutoInterface".to_owned(),
            interface_type: Some("AutoInterface".to_owned()),
            up: true,
            rx_bytes: 48_221,
            tx_bytes: 9_874,
        }]),
        _ => BackendResponse::Ack,
    }
}

fn feed_script() -> Vec<RawEnvelope> {
    let now = now_ms();
    vec![
        envelope(
            TAG_ANNOUNCE,
            json!({
                "destination_hash": hex::encode(PEER_HASH),
                "app_data": hex::encode(b"Columba"),
                "aspect": "lxmf.delivery",
                "hops": 2,
                "timestamp": now,
                "interface": "AutoInterface",
            }),
        ),
        envelope(
            TAG_ANNOUNCE,
            json!({
                "destination_hash": hex::encode(RELAY_HASH),
                "aspect": "lxmf.propagation",
                "hops": 4,
                "timestamp": now + 100,
            }),
        ),
        envelope(
            TAG_MESSAGE,
            json!({
                "message_hash": hex::encode([0x51; 16]),
                "source_hash": hex::encode(PEER_HASH),
                "destination_hash": hex::encode([0x02; 16]),
                "timestamp": now + 200,
                "content_length": 64,
            }),
        ),
        envelope(
            TAG_DELIVERY_STATUS,
            json!({
                "message_hash": hex::encode([0x51; 16]),
                "status": "delivered",
                "timestamp": now + 300,
            }),
        ),
        envelope(
            TAG_PROPAGATION_STATE,
            json!({ "phase": "starting" }),
        ),
        envelope(
            TAG_PROPAGATION_STATE,
            json!({ "phase": "request_sent" }),
        ),
        envelope(
            TAG_PROPAGATION_STATE,
            json!({ "phase": "receiving", "progress": 0.5, "messages_received": 3 }),
        ),
        envelope(
            TAG_PROPAGATION_STATE,
            json!({ "phase": "complete", "messages_received": 5 }),
        ),
        envelope(
            TAG_INTERFACE_STATUS,
            json!({
                "name": "AutoInterface",
                "type": "AutoInterface",
                "up": true,
                "timestamp": now + 400,
            }),
        ),
    ]
}

fn envelope(tag: &str, payload: serde_json::Value) -> RawEnvelope {
    RawEnvelope {
        tag: tag.to_owned(),
        payload,
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
