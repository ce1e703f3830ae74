use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::broadcast;

/// Bounded fan-out stream for one event kind.
///
/// Slow subscribers lose the oldest events, never the newest; the publisher
/// never blocks. A short replay buffer bridges the gap for subscribers that
/// attach just after an event they care about.
#[derive(Debug)]
pub struct EventTap<T> {
    sender: broadcast::Sender<T>,
    replay: Mutex<VecDeque<T>>,
    replay_depth: usize,
}

impl<T: Clone> EventTap<T> {
    /// `capacity` bounds the per-subscriber backlog; `replay_depth` bounds
    /// what late subscribers see of the past.
    pub fn new(capacity: usize, replay_depth: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            replay: Mutex::new(VecDeque::new()),
            replay_depth: replay_depth.min(capacity),
        }
    }

    /// Publish an event to all current subscribers and the replay buffer.
    pub fn publish(&self, event: T) {
        // the replay lock spans the send so subscribers never see an event
        // both replayed and live
        match self.replay.lock() {
            Ok(mut replay) => {
                if self.replay_depth > 0 {
                    if replay.len() == self.replay_depth {
                        replay.pop_front();
                    }
                    replay.push_back(event.clone());
                }
                let _ = self.sender.send(event);
            }
            Err(_) => {
                let _ = self.sender.send(event);
            }
        }
    }

    /// Attach a subscriber; replayed events are delivered before live ones.
    pub fn subscribe(&self) -> TapReceiver<T> {
        let guard = self.replay.lock();
        let receiver = self.sender.subscribe();
        let replay = guard
            .map(|replay| replay.iter().cloned().collect())
            .unwrap_or_default();
        TapReceiver { replay, receiver }
    }
}

/// Receiving side of an [`EventTap`] subscription.
#[derive(Debug)]
pub struct TapReceiver<T> {
    replay: VecDeque<T>,
    receiver: broadcast::Receiver<T>,
}

impl<T: Clone> TapReceiver<T> {
    /// Next event, replay first. Returns `None` once the tap is gone.
    ///
    /// Overflow drops are absorbed here; the subscriber resumes at the oldest
    /// retained event.
    pub async fn recv(&mut self) -> Option<T> {
        if let Some(event) = self.replay.pop_front() {
            return Some(event);
        }
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
