use serde::{Deserialize, Serialize};

/// Phase of the single outstanding relay fetch.
///
/// Phases form a line from `Idle` to `Complete`; the backend may skip
/// phases but never moves backwards except by starting over.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PropagationPhase {
    /// No sync in progress.
    Idle,
    /// A sync was requested.
    Starting,
    /// Waiting for a path to the relay.
    PathRequested,
    /// Bringing up a link to the relay.
    LinkEstablishing,
    /// Link is up, request not yet sent.
    LinkEstablished,
    /// The fetch request went out.
    RequestSent,
    /// Messages are being transferred.
    Receiving,
    /// The fetch finished.
    Complete,
    /// A phase outside the fixed vocabulary; treated as generic in-progress.
    Unknown(String),
}

impl PropagationPhase {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "idle" => Self::Idle,
            "starting" => Self::Starting,
            "path_requested" => Self::PathRequested,
            "link_establishing" => Self::LinkEstablishing,
            "link_established" => Self::LinkEstablished,
            "request_sent" => Self::RequestSent,
            "receiving" => Self::Receiving,
            "complete" => Self::Complete,
            _ => Self::Unknown(raw.to_owned()),
        }
    }
}

/// Snapshot of the relay fetch projection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropagationSyncState {
    /// Current phase.
    pub phase: PropagationPhase,
    /// Transfer progress in `[0, 1]`.
    pub progress: f32,
    /// Messages fetched so far in this sync.
    pub messages_received: u32,
}

impl PropagationSyncState {
    pub fn idle() -> Self {
        Self {
            phase: PropagationPhase::Idle,
            progress: 0.0,
            messages_received: 0,
        }
    }
}

impl Default for PropagationSyncState {
    fn default() -> Self {
        Self::idle()
    }
}

/// Projects backend phase reports onto the linear sync lifecycle.
///
/// Pure bookkeeping; the owner feeds reports in and publishes the returned
/// snapshots.
#[derive(Debug, Clone, Default)]
pub struct PropagationSyncMachine {
    state: PropagationSyncState,
}

impl PropagationSyncMachine {
    pub fn state(&self) -> &PropagationSyncState {
        &self.state
    }

    /// Drop any in-flight projection and return to `Idle`.
    pub fn reset(&mut self) -> PropagationSyncState {
        self.state = PropagationSyncState::idle();
        self.state.clone()
    }

    /// Apply one backend report and return the updated snapshot.
    ///
    /// A `starting` report while past `Idle` begins a fresh sync; progress
    /// and the message counter restart from zero. Reports with an unknown
    /// phase keep the previous progress.
    pub fn observe(
        &mut self,
        raw_phase: &str,
        progress: Option<f32>,
        messages_received: Option<u32>,
    ) -> PropagationSyncState {
        let phase = PropagationPhase::parse(raw_phase);

        if phase == PropagationPhase::Starting {
            self.state.progress = 0.0;
            self.state.messages_received = 0;
        }
        if let Some(progress) = progress {
            self.state.progress = progress.clamp(0.0, 1.0);
        } else if phase == PropagationPhase::Complete {
            self.state.progress = 1.0;
        }
        if let Some(count) = messages_received {
            self.state.messages_received = count;
        }
        self.state.phase = phase;
        self.state.clone()
    }
}
