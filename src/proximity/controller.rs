//! Card read state machine

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{PollPolicy, ProximityDevice, ReadState};
use crate::companion::{PollReply, ReaderStatus};
use crate::{Error, Result};

/// Runs one card read at a time
///
/// `Idle -> Started -> Polling -> Success | Timeout | Error`. The state is
/// published on a watch channel. Finished reads stay in their terminal state
/// until the next `start`. Results from a read that was cancelled or replaced
/// never reach the channel.
pub struct ProximityReadController {
    device: Arc<dyn ProximityDevice>,
    policy: PollPolicy,
    state: Arc<watch::Sender<ReadState>>,
    current: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Publishes for one read only
struct Publisher {
    state: Arc<watch::Sender<ReadState>>,
    current: Arc<AtomicU64>,
    id: u64,
}

impl Publisher {
    /// Returns false once this read has been superseded
    fn publish(&self, next: ReadState) -> bool {
        self.state.send_if_modified(|state| {
            if self.current.load(Ordering::SeqCst) == self.id {
                *state = next;
                true
            } else {
                false
            }
        })
    }
}

impl ProximityReadController {
    #[must_use]
    pub fn new(device: Arc<dyn ProximityDevice>, policy: PollPolicy) -> Self {
        let (state, _) = watch::channel(ReadState::Idle);
        Self {
            device,
            policy,
            state: Arc::new(state),
            current: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        }
    }

    /// Begin a read in the background
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if a read is already underway or the timeout is
    /// zero
    pub fn start(&self, timeout_secs: u32) -> Result<()> {
        if timeout_secs == 0 {
            return Err(Error::InvalidState(
                "read timeout must be at least one second".to_string(),
            ));
        }

        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);

        let mut accepted = None;
        self.state.send_if_modified(|state| {
            if state.is_active() {
                return false;
            }
            let id = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            *state = ReadState::Started;
            accepted = Some(id);
            true
        });
        let Some(id) = accepted else {
            return Err(Error::InvalidState(
                "a card read is already in progress".to_string(),
            ));
        };

        let attempts = self.policy.attempts_for(timeout_secs);
        tracing::info!(timeout_secs, attempts, "card read started");

        let publisher = Publisher {
            state: Arc::clone(&self.state),
            current: Arc::clone(&self.current),
            id,
        };
        let handle = tokio::spawn(run_read(
            Arc::clone(&self.device),
            self.policy,
            timeout_secs,
            attempts,
            publisher,
        ));

        if let Some(previous) = task.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Abandon the read in progress and return to `Idle`
    ///
    /// A finished read keeps its terminal state.
    pub fn cancel(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        self.state.send_if_modified(|state| {
            if !state.is_active() {
                return false;
            }
            self.current.fetch_add(1, Ordering::SeqCst);
            *state = ReadState::Idle;
            true
        });

        if let Some(task) = task {
            task.abort();
            tracing::debug!("card read cancelled");
        }
    }

    #[must_use]
    pub fn state(&self) -> ReadState {
        self.state.borrow().clone()
    }

    /// Watch state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ReadState> {
        self.state.subscribe()
    }

    /// Wait until no read is underway and return the state it ended in
    pub async fn wait(&self) -> ReadState {
        let mut rx = self.state.subscribe();
        rx.wait_for(|state| !state.is_active())
            .await
            .map_or(ReadState::Idle, |state| state.clone())
    }

    /// Start a read and wait for the card identifier
    ///
    /// # Errors
    ///
    /// Returns `ReadTimeout` if no card appeared, `ReadError` if the read
    /// failed, or `InvalidState` if another read is underway
    pub async fn read(&self, timeout_secs: u32) -> Result<String> {
        self.start(timeout_secs)?;
        self.wait().await.into_result()
    }
}

impl Drop for ProximityReadController {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl std::fmt::Debug for ProximityReadController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProximityReadController")
            .field("policy", &self.policy)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

async fn run_read(
    device: Arc<dyn ProximityDevice>,
    policy: PollPolicy,
    timeout_secs: u32,
    attempts: u32,
    publisher: Publisher,
) {
    if let Err(e) = device.begin_read(timeout_secs).await {
        tracing::warn!(error = %e, "card reader did not start");
        publisher.publish(ReadState::Error(e.to_string()));
        return;
    }

    let outcome = poll(device.as_ref(), policy, attempts, &publisher).await;
    match &outcome {
        ReadState::Success(idm) => tracing::info!(idm = %idm, "card read"),
        ReadState::Timeout => tracing::info!("card read timed out"),
        ReadState::Error(reason) => tracing::warn!(reason = %reason, "card read failed"),
        _ => return,
    }
    publisher.publish(outcome);
}

/// Check status every interval until an outcome or the budget runs out
///
/// A transient check failure uses up its attempt but never ends the read.
async fn poll(
    device: &dyn ProximityDevice,
    policy: PollPolicy,
    attempts: u32,
    publisher: &Publisher,
) -> ReadState {
    let deadline = Instant::now() + policy.interval * attempts.saturating_add(1);

    for attempt in 1..=attempts {
        if !publisher.publish(ReadState::Polling { attempt }) {
            return ReadState::Idle;
        }
        tokio::time::sleep(policy.interval).await;

        let Ok(reply) = tokio::time::timeout_at(deadline, device.check()).await else {
            return ReadState::Timeout;
        };

        match reply {
            Ok(PollReply::Status(response)) => match (response.status, response.idm) {
                (ReaderStatus::Success, Some(idm)) if !idm.is_empty() => {
                    return ReadState::Success(idm);
                }
                (ReaderStatus::Success, _) => {
                    tracing::debug!(attempt, "reader reported success without an idm");
                }
                (ReaderStatus::Timeout, _) => return ReadState::Timeout,
                (status, _) => tracing::trace!(attempt, ?status, "no card yet"),
            },
            Ok(PollReply::Transient(reason)) => {
                tracing::warn!(attempt, reason = %reason, "card status check failed, retrying");
            }
            Err(e) => return ReadState::Error(e.to_string()),
        }
    }

    ReadState::Timeout
}
