use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tern_core::{
    AnnounceEvent, DeliveryStatusUpdate, EventTap, InterfaceStatusEvent, LinkEvent,
    PropagationSyncMachine, PropagationSyncState, ProtocolEvent, RawEnvelope, ReceivedMessage,
    TapReceiver, TelemetryEvent, classify_node_type, decode_envelope,
};

const SUBSTREAM_CAPACITY: usize = 256;
const REPLAY_DEPTH: usize = 16;
const STATUS_NOTICE_BUFFER: usize = 16;

#[derive(Debug)]
struct RunningPump {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Debug)]
struct SubStreams {
    announces: EventTap<AnnounceEvent>,
    messages: EventTap<ReceivedMessage>,
    delivery: EventTap<DeliveryStatusUpdate>,
    links: EventTap<LinkEvent>,
    sync: EventTap<PropagationSyncState>,
    interfaces: EventTap<InterfaceStatusEvent>,
    telemetry: EventTap<TelemetryEvent>,
}

/// Fans the backend's raw envelope feed into typed sub-streams.
///
/// Subscriptions are independent of any particular channel: rewiring the
/// feed after a rebind keeps every subscriber attached. The relay sync
/// projection resets to idle on each rewire. Envelopes that fail to decode
/// are logged and dropped; routing continues.
#[derive(Debug)]
pub struct EventRouter {
    taps: Arc<SubStreams>,
    sync_state: Arc<watch::Sender<PropagationSyncState>>,
    status_notices: mpsc::Sender<String>,
    pump: Mutex<Option<RunningPump>>,
}

impl EventRouter {
    /// Build a router and the queue on which backend-initiated status
    /// reports are surfaced.
    pub fn new() -> (Self, mpsc::Receiver<String>) {
        let (status_notices, notice_rx) = mpsc::channel(STATUS_NOTICE_BUFFER);
        let (sync_state, _) = watch::channel(PropagationSyncState::idle());
        let router = Self {
            taps: Arc::new(SubStreams {
                announces: EventTap::new(SUBSTREAM_CAPACITY, REPLAY_DEPTH),
                messages: EventTap::new(SUBSTREAM_CAPACITY, REPLAY_DEPTH),
                delivery: EventTap::new(SUBSTREAM_CAPACITY, REPLAY_DEPTH),
                links: EventTap::new(SUBSTREAM_CAPACITY, REPLAY_DEPTH),
                sync: EventTap::new(SUBSTREAM_CAPACITY, 1),
                interfaces: EventTap::new(SUBSTREAM_CAPACITY, REPLAY_DEPTH),
                telemetry: EventTap::new(SUBSTREAM_CAPACITY, REPLAY_DEPTH),
            }),
            sync_state: Arc::new(sync_state),
            status_notices,
            pump: Mutex::new(None),
        };
        (router, notice_rx)
    }

    /// Start pumping a fresh envelope feed, replacing any previous one.
    pub async fn attach(&self, events: mpsc::Receiver<RawEnvelope>) {
        self.detach().await;

        let previous = self.sync_state.send_replace(PropagationSyncState::idle());
        if previous != PropagationSyncState::idle() {
            self.taps.sync.publish(PropagationSyncState::idle());
        }

        let stop = CancellationToken::new();
        let stopped = stop.child_token();
        let taps = Arc::clone(&self.taps);
        let sync_state = Arc::clone(&self.sync_state);
        let status_notices = self.status_notices.clone();
        let task = tokio::spawn(async move {
            let mut machine = PropagationSyncMachine::default();
            let mut events = events;
            loop {
                tokio::select! {
                    _ = stopped.cancelled() => break,
                    maybe = events.recv() => {
                        let Some(envelope) = maybe else { break };
                        route_envelope(&taps, &sync_state, &status_notices, &mut machine, envelope)
                            .await;
                    }
                }
            }
            debug!("event pump exiting");
        });
        *self.pump.lock().await = Some(RunningPump { stop, task });
    }

    /// Stop the pump, leaving subscribers attached.
    pub async fn detach(&self) {
        let running = self.pump.lock().await.take();
        if let Some(running) = running {
            running.stop.cancel();
            let _ = running.task.await;
        }
    }

    pub fn subscribe_announces(&self) -> TapReceiver<AnnounceEvent> {
        self.taps.announces.subscribe()
    }

    pub fn subscribe_messages(&self) -> TapReceiver<ReceivedMessage> {
        self.taps.messages.subscribe()
    }

    pub fn subscribe_delivery_status(&self) -> TapReceiver<DeliveryStatusUpdate> {
        self.taps.delivery.subscribe()
    }

    pub fn subscribe_link_events(&self) -> TapReceiver<LinkEvent> {
        self.taps.links.subscribe()
    }

    pub fn subscribe_propagation_sync(&self) -> TapReceiver<PropagationSyncState> {
        self.taps.sync.subscribe()
    }

    pub fn subscribe_interface_status(&self) -> TapReceiver<InterfaceStatusEvent> {
        self.taps.interfaces.subscribe()
    }

    pub fn subscribe_telemetry(&self) -> TapReceiver<TelemetryEvent> {
        self.taps.telemetry.subscribe()
    }

    /// Latest relay sync snapshot.
    pub fn propagation_sync_state(&self) -> PropagationSyncState {
        self.sync_state.borrow().clone()
    }
}

async fn route_envelope(
    taps: &SubStreams,
    sync_state: &watch::Sender<PropagationSyncState>,
    status_notices: &mpsc::Sender<String>,
    machine: &mut PropagationSyncMachine,
    envelope: RawEnvelope,
) {
    let decoded = match decode_envelope(&envelope) {
        Ok(event) => event,
        Err(err) => {
            warn!(tag = %envelope.tag, error = %err, "dropping malformed backend envelope");
            return;
        }
    };

    match decoded {
        ProtocolEvent::Announce(frame) => {
            let node_type = classify_node_type(frame.app_data.as_deref(), frame.aspect.as_deref());
            taps.announces.publish(frame.into_event(node_type));
        }
        ProtocolEvent::Message(message) => taps.messages.publish(message),
        ProtocolEvent::DeliveryStatus(update) => taps.delivery.publish(update),
        ProtocolEvent::Link(event) => taps.links.publish(event),
        ProtocolEvent::StatusChanged { raw } => {
            if status_notices.send(raw).await.is_err() {
                debug!("status notice consumer gone");
            }
        }
        ProtocolEvent::PropagationState(report) => {
            let state = machine.observe(&report.phase, report.progress, report.messages_received);
            sync_state.send_replace(state.clone());
            taps.sync.publish(state);
        }
        ProtocolEvent::InterfaceStatus(event) => taps.interfaces.publish(event),
        ProtocolEvent::Telemetry(event) => taps.telemetry.publish(event),
    }
}
