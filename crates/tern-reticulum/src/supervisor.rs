use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tern_core::{
    BackendRequest, BackendResponse, BackendStatus, ConnectionState, MeshError, RebindPolicy,
    StatusModel,
};
use tern_platform::LeaseSet;

use crate::router::EventRouter;
use crate::transport::{BackendConnector, BoundChannel, PendingRequest, roundtrip};

const COMMAND_BUFFER: usize = 64;

/// Hook invoked when a rebind found the backend process freshly restarted.
/// The application re-runs its cold-start initialization in response.
pub type ReinitHook = Arc<dyn Fn() + Send + Sync + 'static>;

/// Tuning for the supervising task.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Backoff schedule for automatic rebinding.
    pub rebind: RebindPolicy,
    /// Readiness deadline for each automatic rebind attempt.
    pub rebind_connect_timeout: Duration,
    /// Deadline for the status query issued after a successful bind.
    pub status_query_timeout: Duration,
    /// Gap between liveness probes while connected.
    pub heartbeat_interval: Duration,
    /// Deadline for a single liveness probe.
    pub heartbeat_timeout: Duration,
    /// Consecutive probe failures treated as channel loss.
    pub heartbeat_miss_limit: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            rebind: RebindPolicy::default(),
            rebind_connect_timeout: Duration::from_secs(5),
            status_query_timeout: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(2),
            heartbeat_miss_limit: 3,
        }
    }
}

pub(crate) enum SupervisorMsg {
    Connect {
        limit: Duration,
        respond: oneshot::Sender<Result<(), MeshError>>,
    },
    Disconnect {
        respond: oneshot::Sender<()>,
    },
    ResetFailed {
        respond: oneshot::Sender<bool>,
    },
    Request {
        request: BackendRequest,
        respond: oneshot::Sender<Result<BackendResponse, MeshError>>,
    },
    ChannelLost {
        generation: u64,
    },
    HeartbeatMiss {
        generation: u64,
    },
    RebindDue {
        generation: u64,
    },
}

/// Everything the supervising task owns at startup.
pub(crate) struct SupervisorSeed {
    pub connector: Arc<dyn BackendConnector>,
    pub config: SupervisorConfig,
    pub leases: LeaseSet,
    pub reinit_hook: Option<ReinitHook>,
    pub router: Arc<EventRouter>,
    pub status_notices: mpsc::Receiver<String>,
    pub status: StatusModel,
    pub connection: watch::Sender<ConnectionState>,
    pub attempts: watch::Sender<u32>,
}

/// Spawn the supervising task. The returned sender carries commands; the
/// token stops the task.
pub(crate) fn spawn_supervisor(seed: SupervisorSeed) -> (mpsc::Sender<SupervisorMsg>, CancellationToken) {
    let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let stop = CancellationToken::new();
    let supervisor = Supervisor {
        connector: seed.connector,
        config: seed.config,
        leases: seed.leases,
        reinit_hook: seed.reinit_hook,
        router: seed.router,
        status_notices: seed.status_notices,
        notices_closed: false,
        status: seed.status,
        connection: seed.connection,
        attempts: seed.attempts,
        commands: commands.clone(),
        command_rx,
        stop: stop.clone(),
        channel: None,
        rebind: RebindAttemptState::default(),
        generation: 0,
        leases_held: false,
    };
    tokio::spawn(supervisor.run());
    (commands, stop)
}

struct RunningProbe {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

struct ActiveChannel {
    requests: mpsc::Sender<PendingRequest>,
    generation: u64,
    loss: CancellationToken,
    loss_watch: JoinHandle<()>,
    heartbeat: RunningProbe,
}

#[derive(Debug, Default)]
struct RebindAttemptState {
    attempt_count: u32,
    next_delay: Duration,
    intentional_disconnect: bool,
}

impl RebindAttemptState {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

enum Inbound {
    Command(SupervisorMsg),
    Notice(String),
    NoticesClosed,
    Stopped,
}

/// Single task owning the channel lifecycle.
///
/// All state transitions happen here, serially: caller commands, loss
/// notifications, rebind timers, and backend status notices are folded into
/// one queue, so a disconnect enqueued during a rebind delay always beats
/// the attempt it suppresses.
struct Supervisor {
    connector: Arc<dyn BackendConnector>,
    config: SupervisorConfig,
    leases: LeaseSet,
    reinit_hook: Option<ReinitHook>,
    router: Arc<EventRouter>,
    status_notices: mpsc::Receiver<String>,
    notices_closed: bool,
    status: StatusModel,
    connection: watch::Sender<ConnectionState>,
    attempts: watch::Sender<u32>,
    commands: mpsc::Sender<SupervisorMsg>,
    command_rx: mpsc::Receiver<SupervisorMsg>,
    stop: CancellationToken,
    channel: Option<ActiveChannel>,
    rebind: RebindAttemptState,
    generation: u64,
    leases_held: bool,
}

impl Supervisor {
    async fn run(mut self) {
        loop {
            let inbound = tokio::select! {
                _ = self.stop.cancelled() => Inbound::Stopped,
                maybe = self.command_rx.recv() => match maybe {
                    Some(msg) => Inbound::Command(msg),
                    None => Inbound::Stopped,
                },
                maybe = self.status_notices.recv(), if !self.notices_closed => match maybe {
                    Some(raw) => Inbound::Notice(raw),
                    None => Inbound::NoticesClosed,
                },
            };
            match inbound {
                Inbound::Command(msg) => self.handle(msg).await,
                Inbound::Notice(raw) => self.handle_status_report(raw),
                Inbound::NoticesClosed => self.notices_closed = true,
                Inbound::Stopped => break,
            }
        }
        self.teardown_channel().await;
        debug!("supervisor exiting");
    }

    async fn handle(&mut self, msg: SupervisorMsg) {
        match msg {
            SupervisorMsg::Connect { limit, respond } => {
                let result = self.handle_connect(limit).await;
                let _ = respond.send(result);
            }
            SupervisorMsg::Disconnect { respond } => {
                self.handle_disconnect().await;
                let _ = respond.send(());
            }
            SupervisorMsg::ResetFailed { respond } => {
                let _ = respond.send(self.handle_reset_failed());
            }
            SupervisorMsg::Request { request, respond } => self.handle_request(request, respond),
            SupervisorMsg::ChannelLost { generation } => {
                self.handle_loss(generation, "channel lost").await;
            }
            SupervisorMsg::HeartbeatMiss { generation } => {
                self.handle_loss(generation, "heartbeat misses exceeded limit")
                    .await;
            }
            SupervisorMsg::RebindDue { generation } => self.handle_rebind_due(generation).await,
        }
    }

    fn state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        self.connection.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn publish_attempts(&self) {
        self.attempts.send_replace(self.rebind.attempt_count);
    }

    async fn handle_connect(&mut self, limit: Duration) -> Result<(), MeshError> {
        match self.state() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Failed => return Err(MeshError::ConnectionLost),
            _ => {}
        }

        // a caller-driven connect starts a fresh session and re-arms rebinding
        self.rebind.reset();
        self.publish_attempts();
        self.teardown_channel().await;

        match self.bind_channel(limit, true).await {
            Ok(()) => {
                self.settle_connected(false).await;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "connect failed");
                self.set_state(ConnectionState::Disconnected);
                self.status.publish(BackendStatus::Shutdown);
                Err(err)
            }
        }
    }

    async fn handle_disconnect(&mut self) {
        debug!("disconnect requested");
        self.rebind.reset();
        self.rebind.intentional_disconnect = true;
        self.publish_attempts();
        self.teardown_channel().await;
        self.set_state(ConnectionState::Disconnected);
        self.status.publish(BackendStatus::Shutdown);
    }

    fn handle_reset_failed(&mut self) -> bool {
        if self.state() != ConnectionState::Failed {
            return false;
        }
        info!("failed connection reset");
        self.rebind.reset();
        self.publish_attempts();
        self.set_state(ConnectionState::Disconnected);
        self.status.publish(BackendStatus::Shutdown);
        true
    }

    fn handle_request(
        &mut self,
        request: BackendRequest,
        respond: oneshot::Sender<Result<BackendResponse, MeshError>>,
    ) {
        if self.state() != ConnectionState::Connected {
            let err = if self.state() == ConnectionState::Failed {
                MeshError::ConnectionLost
            } else {
                MeshError::NotConnected
            };
            let _ = respond.send(Err(err));
            return;
        }
        let Some(active) = &self.channel else {
            let _ = respond.send(Err(MeshError::NotConnected));
            return;
        };
        match active.requests.try_send(PendingRequest { request, respond }) {
            Ok(()) => {}
            Err(TrySendError::Full(pending)) => {
                let _ = pending
                    .respond
                    .send(Err(MeshError::request_failed("backend request queue is full")));
            }
            Err(TrySendError::Closed(pending)) => {
                let _ = pending.respond.send(Err(MeshError::NotConnected));
            }
        }
    }

    async fn handle_loss(&mut self, generation: u64, cause: &str) {
        let Some(active) = &self.channel else {
            return;
        };
        if active.generation != generation {
            return;
        }
        warn!(generation, cause, "backend channel lost");
        self.teardown_channel().await;
        self.set_state(ConnectionState::Reconnecting);
        self.status.publish(BackendStatus::Initializing);
        self.rebind.attempt_count = 0;
        self.publish_attempts();
        self.schedule_rebind();
    }

    fn schedule_rebind(&mut self) {
        let attempt = self.rebind.attempt_count;
        let delay = self.config.rebind.delay_for_attempt(attempt);
        self.rebind.next_delay = delay;
        info!(
            attempt,
            delay_ms = self.rebind.next_delay.as_millis() as u64,
            "scheduling rebind attempt"
        );
        let generation = self.generation;
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(SupervisorMsg::RebindDue { generation }).await;
        });
    }

    async fn handle_rebind_due(&mut self, generation: u64) {
        if self.rebind.intentional_disconnect {
            debug!("rebind suppressed by intentional disconnect");
            return;
        }
        if generation != self.generation || self.state() != ConnectionState::Reconnecting {
            return;
        }

        let attempt = self.rebind.attempt_count;
        info!(attempt, "attempting rebind");
        match self
            .bind_channel(self.config.rebind_connect_timeout, false)
            .await
        {
            Ok(()) => {
                info!(attempt, "rebind succeeded");
                self.settle_connected(true).await;
            }
            Err(err) => {
                warn!(attempt, error = %err, "rebind attempt failed");
                self.rebind.attempt_count += 1;
                self.publish_attempts();
                if self.config.rebind.is_exhausted(self.rebind.attempt_count) {
                    self.enter_failed();
                } else {
                    self.schedule_rebind();
                }
            }
        }
    }

    fn handle_status_report(&mut self, raw: String) {
        if self.state() != ConnectionState::Connected {
            return;
        }
        self.status.publish(BackendStatus::from_report(&raw));
    }

    /// Open a channel and wait for the readiness handshake.
    ///
    /// `report_phases` suppresses the intermediate `Binding` and
    /// `AwaitingReadiness` states on rebind attempts, which stay
    /// `Reconnecting` throughout.
    async fn bind_channel(&mut self, limit: Duration, report_phases: bool) -> Result<(), MeshError> {
        if report_phases {
            self.set_state(ConnectionState::Binding);
            self.status.publish(BackendStatus::Initializing);
        }

        let channel = self.connector.open().await?;

        if report_phases {
            self.set_state(ConnectionState::AwaitingReadiness);
        }
        if let Err(err) = channel.readiness.wait_ready(limit).await {
            channel.loss.cancel();
            return Err(err);
        }

        self.generation += 1;
        let generation = self.generation;
        let BoundChannel {
            requests,
            events,
            readiness: _,
            loss,
        } = channel;

        let commands = self.commands.clone();
        let lost = loss.clone();
        let loss_watch = tokio::spawn(async move {
            lost.cancelled().await;
            let _ = commands.send(SupervisorMsg::ChannelLost { generation }).await;
        });

        let heartbeat = self.spawn_heartbeat(requests.clone(), generation);
        self.router.attach(events).await;
        self.channel = Some(ActiveChannel {
            requests,
            generation,
            loss,
            loss_watch,
            heartbeat,
        });
        Ok(())
    }

    /// Finish a successful bind: leases, status query, cold-restart check.
    async fn settle_connected(&mut self, via_rebind: bool) {
        self.rebind.reset();
        self.publish_attempts();
        self.set_state(ConnectionState::Connected);

        if !self.leases_held {
            match self.leases.acquire_all() {
                Ok(()) => self.leases_held = true,
                Err(err) => warn!(error = %err, "resource lease acquisition failed"),
            }
        }

        let queried = self.query_backend_status().await;
        if via_rebind && queried == BackendStatus::Shutdown {
            info!("backend restarted cold during rebind");
            if let Some(hook) = &self.reinit_hook {
                hook();
            }
        }
        self.status.publish(queried);
    }

    async fn query_backend_status(&self) -> BackendStatus {
        let Some(active) = &self.channel else {
            return BackendStatus::Shutdown;
        };
        match roundtrip(
            &active.requests,
            BackendRequest::QueryStatus,
            self.config.status_query_timeout,
        )
        .await
        {
            Ok(BackendResponse::Status { raw }) => BackendStatus::from_report(&raw),
            Ok(other) => {
                debug!(?other, "unexpected status response; assuming shutdown");
                BackendStatus::Shutdown
            }
            Err(err) => {
                debug!(error = %err, "status query failed; assuming shutdown");
                BackendStatus::Shutdown
            }
        }
    }

    fn enter_failed(&mut self) {
        warn!(
            max_attempts = self.config.rebind.max_attempts(),
            "rebind attempts exhausted"
        );
        self.set_state(ConnectionState::Failed);
        self.status
            .publish(BackendStatus::Error("connection lost".to_owned()));
    }

    fn spawn_heartbeat(&self, requests: mpsc::Sender<PendingRequest>, generation: u64) -> RunningProbe {
        let stop = CancellationToken::new();
        let stopped = stop.child_token();
        let commands = self.commands.clone();
        let interval = self.config.heartbeat_interval;
        let probe_timeout = self.config.heartbeat_timeout;
        let miss_limit = self.config.heartbeat_miss_limit.max(1);
        let task = tokio::spawn(async move {
            let mut misses: u32 = 0;
            loop {
                tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let probe = roundtrip(&requests, BackendRequest::Heartbeat, probe_timeout);
                let outcome = tokio::select! {
                    _ = stopped.cancelled() => break,
                    outcome = probe => outcome,
                };
                match outcome {
                    Ok(_) => misses = 0,
                    Err(err) => {
                        misses += 1;
                        debug!(misses, error = %err, "heartbeat probe failed");
                        if misses >= miss_limit {
                            let _ = commands
                                .send(SupervisorMsg::HeartbeatMiss { generation })
                                .await;
                            break;
                        }
                    }
                }
            }
        });
        RunningProbe { stop, task }
    }

    async fn teardown_channel(&mut self) {
        if let Some(active) = self.channel.take() {
            active.heartbeat.stop.cancel();
            let _ = active.heartbeat.task.await;
            active.loss_watch.abort();
            active.loss.cancel();
        }
        self.router.detach().await;
        if self.leases_held {
            if let Err(err) = self.leases.release_all() {
                warn!(error = %err, "resource lease release failed");
            }
            self.leases_held = false;
        }
    }
}
