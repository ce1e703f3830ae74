use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tern_core::{
    AnnounceEvent, BackendRequest, BackendResponse, BackendStatus, ConnectionState, DeliveryMethod,
    DeliveryStatusUpdate, InterfaceStat, InterfaceStatusEvent, LinkEvent, MeshError, PathStatus,
    PropagationSyncState, ReceivedMessage, StatusModel, StatusStream, StatusWaitError, TapReceiver,
    TelemetryEvent,
};
use tern_platform::LeaseSet;

use crate::router::EventRouter;
use crate::supervisor::{
    ReinitHook, SupervisorConfig, SupervisorMsg, SupervisorSeed, spawn_supervisor,
};
use crate::transport::BackendConnector;

/// Everything needed to build a [`MeshClient`].
pub struct ClientOptions {
    /// Wire implementation that opens channels to the backend.
    pub connector: Arc<dyn BackendConnector>,
    /// Supervisor tuning.
    pub supervisor: SupervisorConfig,
    /// Platform resources held while a session is up.
    pub leases: LeaseSet,
    /// Invoked when a rebind finds the backend freshly restarted.
    pub reinit_hook: Option<ReinitHook>,
}

impl ClientOptions {
    pub fn new(connector: Arc<dyn BackendConnector>) -> Self {
        Self {
            connector,
            supervisor: SupervisorConfig::default(),
            leases: LeaseSet::new(),
            reinit_hook: None,
        }
    }
}

/// Owned handle to an out-of-process mesh backend.
///
/// All channel lifecycle work happens in a supervising task; this handle
/// sends it commands and reads its published state. Dropping the handle
/// stops the supervisor and tears down any bound channel.
pub struct MeshClient {
    commands: mpsc::Sender<SupervisorMsg>,
    stop: CancellationToken,
    status: StatusModel,
    connection: watch::Receiver<ConnectionState>,
    attempts: watch::Receiver<u32>,
    router: Arc<EventRouter>,
}

impl MeshClient {
    /// Start the supervising task and return its handle.
    pub fn spawn(options: ClientOptions) -> Self {
        let (router, status_notices) = EventRouter::new();
        let router = Arc::new(router);
        let status = StatusModel::new(BackendStatus::Shutdown);
        let (connection_tx, connection) = watch::channel(ConnectionState::Disconnected);
        let (attempts_tx, attempts) = watch::channel(0);
        let (commands, stop) = spawn_supervisor(SupervisorSeed {
            connector: options.connector,
            config: options.supervisor,
            leases: options.leases,
            reinit_hook: options.reinit_hook,
            router: Arc::clone(&router),
            status_notices,
            status: status.clone(),
            connection: connection_tx,
            attempts: attempts_tx,
        });
        Self {
            commands,
            stop,
            status,
            connection,
            attempts,
            router,
        }
    }

    /// Bind to the backend and wait for its readiness signal.
    ///
    /// Idempotent while connected. From [`ConnectionState::Failed`] this
    /// fails with [`MeshError::ConnectionLost`] until a reset.
    pub async fn connect(&self, limit: Duration) -> Result<(), MeshError> {
        let (respond, result) = oneshot::channel();
        self.commands
            .send(SupervisorMsg::Connect { limit, respond })
            .await
            .map_err(|_| MeshError::ConnectionLost)?;
        result.await.map_err(|_| MeshError::ConnectionLost)?
    }

    /// Tear down the session. Safe in every state; suppresses any pending
    /// automatic rebind and clears a `Failed` state.
    pub async fn disconnect(&self) {
        let (respond, done) = oneshot::channel();
        if self
            .commands
            .send(SupervisorMsg::Disconnect { respond })
            .await
            .is_ok()
        {
            let _ = done.await;
        }
    }

    /// Return a `Failed` connection to `Disconnected` so `connect` works
    /// again. Returns whether a reset actually happened.
    pub async fn reset_failed(&self) -> bool {
        let (respond, result) = oneshot::channel();
        if self
            .commands
            .send(SupervisorMsg::ResetFailed { respond })
            .await
            .is_err()
        {
            return false;
        }
        result.await.unwrap_or(false)
    }

    /// Send one request to the backend and wait for its response.
    pub async fn request(&self, request: BackendRequest) -> Result<BackendResponse, MeshError> {
        let (respond, result) = oneshot::channel();
        self.commands
            .send(SupervisorMsg::Request { request, respond })
            .await
            .map_err(|_| MeshError::ConnectionLost)?;
        result.await.map_err(|_| MeshError::ConnectionLost)?
    }

    /// Ask the backend for its status string, parsed.
    pub async fn query_status(&self) -> Result<BackendStatus, MeshError> {
        match self.request(BackendRequest::QueryStatus).await? {
            BackendResponse::Status { raw } => Ok(BackendStatus::from_report(&raw)),
            other => Err(unexpected_response("status query", &other)),
        }
    }

    /// Announce the local destination immediately.
    pub async fn announce_now(&self) -> Result<(), MeshError> {
        match self.request(BackendRequest::AnnounceNow).await? {
            BackendResponse::Ack => Ok(()),
            other => Err(unexpected_response("announce", &other)),
        }
    }

    /// Send a message, returning the backend's handle for delivery tracking.
    pub async fn send_message(
        &self,
        destination_hash: Vec<u8>,
        content: String,
        method: DeliveryMethod,
    ) -> Result<Vec<u8>, MeshError> {
        let request = BackendRequest::SendMessage {
            destination_hash,
            content,
            method,
        };
        match self.request(request).await? {
            BackendResponse::MessageHandle { message_hash } => Ok(message_hash),
            other => Err(unexpected_response("send message", &other)),
        }
    }

    /// Ask the backend to resolve a path to a destination.
    pub async fn request_path(&self, destination_hash: Vec<u8>) -> Result<PathStatus, MeshError> {
        match self
            .request(BackendRequest::RequestPath { destination_hash })
            .await?
        {
            BackendResponse::PathStatus(status) => Ok(status),
            other => Err(unexpected_response("path request", &other)),
        }
    }

    /// Begin fetching held messages from a propagation relay.
    pub async fn start_propagation_sync(&self, node: Option<Vec<u8>>) -> Result<(), MeshError> {
        match self
            .request(BackendRequest::StartPropagationSync { node })
            .await?
        {
            BackendResponse::Ack => Ok(()),
            other => Err(unexpected_response("propagation sync start", &other)),
        }
    }

    /// Abort the relay fetch in progress, if any.
    pub async fn cancel_propagation_sync(&self) -> Result<(), MeshError> {
        match self.request(BackendRequest::CancelPropagationSync).await? {
            BackendResponse::Ack => Ok(()),
            other => Err(unexpected_response("propagation sync cancel", &other)),
        }
    }

    /// Snapshot of the backend's interface states.
    pub async fn interface_stats(&self) -> Result<Vec<InterfaceStat>, MeshError> {
        match self.request(BackendRequest::InterfaceStats).await? {
            BackendResponse::InterfaceStats(interfaces) => Ok(interfaces),
            other => Err(unexpected_response("interface stats", &other)),
        }
    }

    /// Latest published backend status.
    pub fn current_status(&self) -> BackendStatus {
        self.status.current()
    }

    /// Stream of backend status values, current value first.
    pub fn subscribe_status(&self) -> StatusStream {
        self.status.subscribe()
    }

    /// Wait until the backend status matches `predicate`.
    pub async fn wait_for_status<F>(
        &self,
        predicate: F,
        limit: Duration,
    ) -> Result<BackendStatus, StatusWaitError>
    where
        F: FnMut(&BackendStatus) -> bool,
    {
        self.status.wait_for(predicate, limit).await
    }

    /// Current channel lifecycle state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Automatic rebind attempts made since the last loss; zero while healthy.
    pub fn rebind_attempt_count(&self) -> u32 {
        *self.attempts.borrow()
    }

    pub fn subscribe_announces(&self) -> TapReceiver<AnnounceEvent> {
        self.router.subscribe_announces()
    }

    pub fn subscribe_messages(&self) -> TapReceiver<ReceivedMessage> {
        self.router.subscribe_messages()
    }

    pub fn subscribe_delivery_status(&self) -> TapReceiver<DeliveryStatusUpdate> {
        self.router.subscribe_delivery_status()
    }

    pub fn subscribe_link_events(&self) -> TapReceiver<LinkEvent> {
        self.router.subscribe_link_events()
    }

    pub fn subscribe_propagation_sync(&self) -> TapReceiver<PropagationSyncState> {
        self.router.subscribe_propagation_sync()
    }

    pub fn subscribe_interface_status(&self) -> TapReceiver<InterfaceStatusEvent> {
        self.router.subscribe_interface_status()
    }

    pub fn subscribe_telemetry(&self) -> TapReceiver<TelemetryEvent> {
        self.router.subscribe_telemetry()
    }

    /// Latest relay sync snapshot.
    pub fn propagation_sync_state(&self) -> PropagationSyncState {
        self.router.propagation_sync_state()
    }
}

impl Drop for MeshClient {
    fn drop(&mut self) {
        debug!("stopping mesh client supervisor");
        self.stop.cancel();
    }
}

fn unexpected_response(operation: &str, response: &BackendResponse) -> MeshError {
    MeshError::request_failed(format!("unexpected response to {operation}: {response:?}"))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use tern_core::{RawEnvelope, RebindPolicy};
    use tern_platform::{LeaseError, ResourceLease};
    use tokio::time::timeout;

    use crate::transport::{BoundChannel, PendingRequest, ReadinessGate};

    use super::*;

    struct LiveChannel {
        loss: CancellationToken,
        events: mpsc::Sender<RawEnvelope>,
    }

    /// Scripted in-process backend. Each `open` spins up a task answering
    /// requests; knobs steer bind failures, held status replies, ignored
    /// heartbeats, and channel death.
    #[derive(Default)]
    struct FakeBackend {
        opens: AtomicU32,
        fail_opens: AtomicU32,
        suppress_ready: AtomicBool,
        hold_status: Arc<AtomicBool>,
        answer_heartbeats: Arc<AtomicBool>,
        status_reply: Arc<StdMutex<String>>,
        live: StdMutex<Option<LiveChannel>>,
    }

    impl FakeBackend {
        fn new() -> Arc<Self> {
            let backend = Self::default();
            backend.answer_heartbeats.store(true, Ordering::SeqCst);
            *backend.status_reply.lock().expect("status lock") = "READY".to_owned();
            Arc::new(backend)
        }

        fn opens(&self) -> u32 {
            self.opens.load(Ordering::SeqCst)
        }

        fn fail_next_opens(&self, count: u32) {
            self.fail_opens.store(count, Ordering::SeqCst);
        }

        fn set_status(&self, raw: &str) {
            *self.status_reply.lock().expect("status lock") = raw.to_owned();
        }

        fn set_answer_heartbeats(&self, answer: bool) {
            self.answer_heartbeats.store(answer, Ordering::SeqCst);
        }

        fn kill_channel(&self) {
            if let Some(live) = self.live.lock().expect("live lock").take() {
                live.loss.cancel();
            }
        }

        async fn emit(&self, envelope: RawEnvelope) {
            let sender = self
                .live
                .lock()
                .expect("live lock")
                .as_ref()
                .map(|live| live.events.clone());
            let sender = sender.expect("no live channel to emit on");
            sender.send(envelope).await.expect("emit envelope");
        }
    }

    #[async_trait]
    impl BackendConnector for FakeBackend {
        async fn open(&self) -> Result<BoundChannel, MeshError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let remaining = self.fail_opens.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_opens.store(remaining - 1, Ordering::SeqCst);
                return Err(MeshError::bind_failed("scripted bind failure"));
            }

            let (requests_tx, mut requests_rx) = mpsc::channel::<PendingRequest>(16);
            let (events_tx, events_rx) = mpsc::channel::<RawEnvelope>(64);
            let readiness = Arc::new(ReadinessGate::new());
            if !self.suppress_ready.load(Ordering::SeqCst) {
                readiness.signal_ready().await;
            }
            let loss = CancellationToken::new();
            *self.live.lock().expect("live lock") = Some(LiveChannel {
                loss: loss.clone(),
                events: events_tx.clone(),
            });

            let status_reply = Arc::clone(&self.status_reply);
            let hold_status = Arc::clone(&self.hold_status);
            let answer_heartbeats = Arc::clone(&self.answer_heartbeats);
            let gone = loss.clone();
            tokio::spawn(async move {
                let _feed = events_tx;
                let mut held = Vec::new();
                loop {
                    tokio::select! {
                        _ = gone.cancelled() => break,
                        maybe = requests_rx.recv() => {
                            let Some(pending) = maybe else { break };
                            match pending.request {
                                BackendRequest::QueryStatus => {
                                    if hold_status.load(Ordering::SeqCst) {
                                        held.push(pending.respond);
                                        continue;
                                    }
                                    let raw = status_reply.lock().expect("status lock").clone();
                                    let _ = pending
                                        .respond
                                        .send(Ok(BackendResponse::Status { raw }));
                                }
                                BackendRequest::Heartbeat => {
                                    if answer_heartbeats.load(Ordering::SeqCst) {
                                        let _ = pending.respond.send(Ok(
                                            BackendResponse::Heartbeat { timestamp_ms: 1 },
                                        ));
                                    }
                                }
                                BackendRequest::SendMessage { .. } => {
                                    let _ = pending.respond.send(Ok(
                                        BackendResponse::MessageHandle {
                                            message_hash: vec![0x0F, 0x0E],
                                        },
                                    ));
                                }
                                _ => {
                                    let _ = pending.respond.send(Ok(BackendResponse::Ack));
                                }
                            }
                        }
                    }
                }
            });

            Ok(BoundChannel {
                requests: requests_tx,
                events: events_rx,
                readiness,
                loss,
            })
        }
    }

    #[derive(Clone, Default)]
    struct SessionLease {
        held: Arc<AtomicBool>,
        acquires: Arc<AtomicU32>,
    }

    impl ResourceLease for SessionLease {
        fn name(&self) -> &str {
            "session"
        }

        fn acquire(&self) -> Result<(), LeaseError> {
            self.held.store(true, Ordering::SeqCst);
            self.acquires.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn release(&self) -> Result<(), LeaseError> {
            self.held.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    fn client_for(backend: &Arc<FakeBackend>) -> MeshClient {
        let options = ClientOptions::new(Arc::clone(backend) as Arc<dyn BackendConnector>);
        MeshClient::spawn(options)
    }

    fn client_with(backend: &Arc<FakeBackend>, supervisor: SupervisorConfig) -> MeshClient {
        let mut options = ClientOptions::new(Arc::clone(backend) as Arc<dyn BackendConnector>);
        options.supervisor = supervisor;
        MeshClient::spawn(options)
    }

    async fn wait_status<F>(client: &MeshClient, predicate: F) -> BackendStatus
    where
        F: FnMut(&BackendStatus) -> bool,
    {
        client
            .wait_for_status(predicate, Duration::from_secs(10))
            .await
            .expect("status wait")
    }

    async fn wait_ready(client: &MeshClient) -> BackendStatus {
        wait_status(client, |status| matches!(status, BackendStatus::Ready)).await
    }

    #[tokio::test]
    async fn connect_binds_and_reports_queried_status() {
        let backend = FakeBackend::new();
        let client = client_for(&backend);

        client.connect(Duration::from_secs(1)).await.expect("connect");
        assert_eq!(client.connection_state(), ConnectionState::Connected);
        wait_ready(&client).await;
        assert_eq!(backend.opens(), 1);
    }

    #[tokio::test]
    async fn connect_is_idempotent_while_connected() {
        let backend = FakeBackend::new();
        let client = client_for(&backend);

        client.connect(Duration::from_secs(1)).await.expect("connect");
        client
            .connect(Duration::from_secs(1))
            .await
            .expect("second connect");
        assert_eq!(backend.opens(), 1);
    }

    #[tokio::test]
    async fn failed_bind_surfaces_the_connector_error() {
        let backend = FakeBackend::new();
        backend.fail_next_opens(1);
        let client = client_for(&backend);

        let err = client
            .connect(Duration::from_secs(1))
            .await
            .expect_err("bind must fail");
        assert!(matches!(err, MeshError::BindFailed { .. }));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(client.current_status(), BackendStatus::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_readiness_signal_times_out() {
        let backend = FakeBackend::new();
        backend.suppress_ready.store(true, Ordering::SeqCst);
        let client = client_for(&backend);

        let err = client
            .connect(Duration::from_millis(200))
            .await
            .expect_err("readiness must time out");
        assert_eq!(err, MeshError::BindTimeout);
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn held_status_query_reads_as_shutdown_but_stays_connected() {
        let backend = FakeBackend::new();
        backend.hold_status.store(true, Ordering::SeqCst);
        let client = client_for(&backend);

        client.connect(Duration::from_secs(1)).await.expect("connect");
        assert_eq!(client.connection_state(), ConnectionState::Connected);
        assert_eq!(client.current_status(), BackendStatus::Shutdown);

        // a later backend-initiated report still lands
        backend
            .emit(RawEnvelope {
                tag: "status-changed".to_owned(),
                payload: json!({ "status": "READY" }),
            })
            .await;
        wait_ready(&client).await;
    }

    #[tokio::test]
    async fn requests_fail_fast_while_disconnected() {
        let backend = FakeBackend::new();
        let client = client_for(&backend);

        let err = client.query_status().await.expect_err("must fail fast");
        assert_eq!(err, MeshError::NotConnected);
        let err = client
            .announce_now()
            .await
            .expect_err("must fail fast");
        assert_eq!(err, MeshError::NotConnected);
    }

    #[tokio::test]
    async fn requests_round_trip_while_connected() {
        let backend = FakeBackend::new();
        let client = client_for(&backend);
        client.connect(Duration::from_secs(1)).await.expect("connect");

        assert_eq!(
            client.query_status().await.expect("status"),
            BackendStatus::Ready
        );
        client.announce_now().await.expect("announce");
        let handle = client
            .send_message(vec![0xAA], "hello".to_owned(), DeliveryMethod::Direct)
            .await
            .expect("send");
        assert_eq!(handle, vec![0x0F, 0x0E]);
    }

    #[tokio::test]
    async fn disconnect_is_safe_in_any_state() {
        let backend = FakeBackend::new();
        let client = client_for(&backend);

        client.disconnect().await;
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);

        client.connect(Duration::from_secs(1)).await.expect("connect");
        client.disconnect().await;
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(client.current_status(), BackendStatus::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn leases_are_held_exactly_while_connected() {
        let backend = FakeBackend::new();
        let lease = SessionLease::default();
        let held = Arc::clone(&lease.held);
        let acquires = Arc::clone(&lease.acquires);
        let mut options = ClientOptions::new(Arc::clone(&backend) as Arc<dyn BackendConnector>);
        options.leases = LeaseSet::new().with(lease);
        let client = MeshClient::spawn(options);
        assert!(!held.load(Ordering::SeqCst));

        client.connect(Duration::from_secs(1)).await.expect("connect");
        assert!(held.load(Ordering::SeqCst));
        assert_eq!(acquires.load(Ordering::SeqCst), 1);
        wait_ready(&client).await;

        backend.kill_channel();
        wait_status(&client, |status| {
            matches!(status, BackendStatus::Initializing)
        })
        .await;
        wait_ready(&client).await;
        assert!(held.load(Ordering::SeqCst));
        assert_eq!(acquires.load(Ordering::SeqCst), 2);

        client.disconnect().await;
        assert!(!held.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_loss_rebinds_and_recovers() {
        let backend = FakeBackend::new();
        let client = client_for(&backend);
        client.connect(Duration::from_secs(1)).await.expect("connect");
        wait_ready(&client).await;

        backend.kill_channel();
        wait_status(&client, |status| {
            matches!(status, BackendStatus::Initializing)
        })
        .await;

        wait_ready(&client).await;
        assert_eq!(client.connection_state(), ConnectionState::Connected);
        assert_eq!(client.rebind_attempt_count(), 0);
        assert_eq!(backend.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_are_counted_then_cleared_on_success() {
        let backend = FakeBackend::new();
        let client = client_with(
            &backend,
            SupervisorConfig {
                rebind: RebindPolicy::new(10, 2, 100, 8),
                ..SupervisorConfig::default()
            },
        );
        client.connect(Duration::from_secs(1)).await.expect("connect");
        wait_ready(&client).await;

        backend.fail_next_opens(2);
        backend.kill_channel();
        wait_status(&client, |status| {
            matches!(status, BackendStatus::Initializing)
        })
        .await;

        wait_ready(&client).await;
        assert_eq!(client.rebind_attempt_count(), 0);
        assert_eq!(backend.opens(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_rebind_delay_suppresses_the_attempt() {
        let backend = FakeBackend::new();
        let client = client_with(
            &backend,
            SupervisorConfig {
                rebind: RebindPolicy::new(60_000, 2, 120_000, 4),
                ..SupervisorConfig::default()
            },
        );
        client.connect(Duration::from_secs(1)).await.expect("connect");
        wait_ready(&client).await;
        assert_eq!(backend.opens(), 1);

        backend.kill_channel();
        wait_status(&client, |status| {
            matches!(status, BackendStatus::Initializing)
        })
        .await;
        assert_eq!(client.connection_state(), ConnectionState::Reconnecting);

        // the attempt is scheduled but its delay has not elapsed
        client.disconnect().await;
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);

        tokio::time::advance(Duration::from_secs(300)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(backend.opens(), 1, "suppressed attempt must not bind");
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_rebinds_enter_failed_until_reset() {
        let backend = FakeBackend::new();
        let client = client_with(
            &backend,
            SupervisorConfig {
                rebind: RebindPolicy::new(10, 2, 100, 2),
                ..SupervisorConfig::default()
            },
        );
        client.connect(Duration::from_secs(1)).await.expect("connect");
        wait_ready(&client).await;

        backend.fail_next_opens(u32::MAX);
        backend.kill_channel();

        wait_status(&client, |status| {
            matches!(status, BackendStatus::Error(reason) if reason == "connection lost")
        })
        .await;
        assert_eq!(client.connection_state(), ConnectionState::Failed);
        assert_eq!(backend.opens(), 3);

        // terminal: no further attempts, requests and connects refuse
        tokio::time::advance(Duration::from_secs(600)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(backend.opens(), 3);
        assert_eq!(
            client.query_status().await.expect_err("must refuse"),
            MeshError::ConnectionLost
        );
        assert_eq!(
            client
                .connect(Duration::from_secs(1))
                .await
                .expect_err("must refuse"),
            MeshError::ConnectionLost
        );

        backend.fail_next_opens(0);
        assert!(client.reset_failed().await);
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        client
            .connect(Duration::from_secs(1))
            .await
            .expect("connect after reset");
        wait_ready(&client).await;
    }

    #[tokio::test(start_paused = true)]
    async fn cold_backend_restart_fires_the_reinit_hook() {
        let backend = FakeBackend::new();
        let hook_fired = Arc::new(AtomicBool::new(false));
        let mut options = ClientOptions::new(Arc::clone(&backend) as Arc<dyn BackendConnector>);
        let flag = Arc::clone(&hook_fired);
        options.reinit_hook = Some(Arc::new(move || flag.store(true, Ordering::SeqCst)));
        let client = MeshClient::spawn(options);

        client.connect(Duration::from_secs(1)).await.expect("connect");
        wait_ready(&client).await;
        assert!(!hook_fired.load(Ordering::SeqCst));

        backend.set_status("SHUTDOWN");
        backend.kill_channel();

        wait_status(&client, |status| matches!(status, BackendStatus::Shutdown)).await;
        assert_eq!(client.connection_state(), ConnectionState::Connected);
        assert!(hook_fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn first_connect_to_a_shutdown_backend_does_not_fire_the_hook() {
        let backend = FakeBackend::new();
        backend.set_status("SHUTDOWN");
        let hook_fired = Arc::new(AtomicBool::new(false));
        let mut options = ClientOptions::new(Arc::clone(&backend) as Arc<dyn BackendConnector>);
        let flag = Arc::clone(&hook_fired);
        options.reinit_hook = Some(Arc::new(move || flag.store(true, Ordering::SeqCst)));
        let client = MeshClient::spawn(options);

        client.connect(Duration::from_secs(1)).await.expect("connect");
        wait_status(&client, |status| matches!(status, BackendStatus::Shutdown)).await;
        assert!(!hook_fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn missed_heartbeats_trigger_a_rebind() {
        let backend = FakeBackend::new();
        let client = client_with(
            &backend,
            SupervisorConfig {
                rebind: RebindPolicy::new(10, 2, 100, 8),
                heartbeat_interval: Duration::from_millis(50),
                heartbeat_timeout: Duration::from_millis(20),
                heartbeat_miss_limit: 2,
                ..SupervisorConfig::default()
            },
        );
        client.connect(Duration::from_secs(1)).await.expect("connect");
        wait_ready(&client).await;

        backend.set_answer_heartbeats(false);
        wait_status(&client, |status| {
            matches!(status, BackendStatus::Initializing)
        })
        .await;

        backend.set_answer_heartbeats(true);
        wait_ready(&client).await;
        assert_eq!(backend.opens(), 2);
        assert_eq!(client.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_loss_notices_from_an_old_channel_are_ignored() {
        let backend = FakeBackend::new();
        let client = client_for(&backend);
        client.connect(Duration::from_secs(1)).await.expect("connect");
        wait_ready(&client).await;

        backend.kill_channel();
        wait_status(&client, |status| {
            matches!(status, BackendStatus::Initializing)
        })
        .await;
        wait_ready(&client).await;
        assert_eq!(backend.opens(), 2);

        // reports minted under the first channel arrive after the rewire
        client
            .commands
            .send(SupervisorMsg::HeartbeatMiss { generation: 1 })
            .await
            .expect("send stale miss");
        client
            .commands
            .send(SupervisorMsg::ChannelLost { generation: 1 })
            .await
            .expect("send stale loss");

        client.query_status().await.expect("still connected");
        assert_eq!(client.connection_state(), ConnectionState::Connected);
        assert_eq!(backend.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn announces_flow_end_to_end_across_a_rebind() {
        let backend = FakeBackend::new();
        let client = client_for(&backend);
        let mut announces = client.subscribe_announces();

        client.connect(Duration::from_secs(1)).await.expect("connect");
        wait_ready(&client).await;

        backend
            .emit(RawEnvelope {
                tag: "announce".to_owned(),
                payload: json!({
                    "destination_hash": "aa01",
                    "app_data": "436f6c756d6261",
                    "timestamp": 1u64,
                }),
            })
            .await;
        let first = timeout(Duration::from_secs(2), announces.recv())
            .await
            .expect("announce timeout")
            .expect("announce value");
        assert_eq!(first.destination_hash, vec![0xAA, 0x01]);

        backend.kill_channel();
        wait_status(&client, |status| {
            matches!(status, BackendStatus::Initializing)
        })
        .await;
        wait_ready(&client).await;

        // the old subscription keeps working on the new channel
        backend
            .emit(RawEnvelope {
                tag: "announce".to_owned(),
                payload: json!({
                    "destination_hash": "bb02",
                    "timestamp": 2u64,
                }),
            })
            .await;
        let second = timeout(Duration::from_secs(2), announces.recv())
            .await
            .expect("announce timeout")
            .expect("announce value");
        assert_eq!(second.destination_hash, vec![0xBB, 0x02]);
    }
}
