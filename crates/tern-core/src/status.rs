use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::types::BackendStatus;

/// Error returned by [`StatusModel::wait_for`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StatusWaitError {
    /// No matching status arrived within the limit.
    #[error("timed out waiting for a matching status")]
    TimedOut,
    /// The model was dropped while waiting.
    #[error("status source closed")]
    Closed,
}

/// Current-value cell for backend health.
///
/// Holds exactly one value at a time. Writes that repeat the current value
/// are swallowed; subscribers observe the value current at subscription time
/// first and then every change, in order.
#[derive(Debug, Clone)]
pub struct StatusModel {
    tx: Arc<watch::Sender<BackendStatus>>,
}

impl StatusModel {
    pub fn new(initial: BackendStatus) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Latest published status.
    pub fn current(&self) -> BackendStatus {
        self.tx.borrow().clone()
    }

    /// Publish a status value. Re-publishing the current value is a no-op.
    pub fn publish(&self, next: BackendStatus) {
        self.tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Subscribe to status values, starting with the current one.
    pub fn subscribe(&self) -> StatusStream {
        StatusStream {
            rx: self.tx.subscribe(),
            last: None,
        }
    }

    /// Wait until `predicate` matches a status value.
    ///
    /// Registers for changes before sampling the current value, so a write
    /// landing just before the call is still observed.
    pub async fn wait_for<F>(
        &self,
        mut predicate: F,
        limit: Duration,
    ) -> Result<BackendStatus, StatusWaitError>
    where
        F: FnMut(&BackendStatus) -> bool,
    {
        let mut rx = self.tx.subscribe();
        let wait = async {
            loop {
                let matched = {
                    let value = rx.borrow_and_update();
                    predicate(&value).then(|| value.clone())
                };
                if let Some(status) = matched {
                    return Ok(status);
                }
                if rx.changed().await.is_err() {
                    return Err(StatusWaitError::Closed);
                }
            }
        };
        match tokio::time::timeout(limit, wait).await {
            Ok(result) => result,
            Err(_) => Err(StatusWaitError::TimedOut),
        }
    }
}

/// Ordered stream of status values from a [`StatusModel`].
///
/// Intermediate values may coalesce under load; consecutive duplicates never
/// appear.
#[derive(Debug)]
pub struct StatusStream {
    rx: watch::Receiver<BackendStatus>,
    last: Option<BackendStatus>,
}

impl StatusStream {
    /// Next status value. Returns `None` once the model is gone.
    pub async fn next(&mut self) -> Option<BackendStatus> {
        loop {
            if self.last.is_some() && self.rx.changed().await.is_err() {
                return None;
            }
            let value = self.rx.borrow_and_update().clone();
            if self.last.as_ref() == Some(&value) {
                continue;
            }
            self.last = Some(value.clone());
            return Some(value);
        }
    }
}
