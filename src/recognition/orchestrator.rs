//! Strategy selection and session lifecycle

use std::sync::Arc;

use tokio::sync::mpsc;

use super::types::{EventPayload, EventSink, RecognitionEvent, SessionId, SessionState, Strategy};
use super::{BackendFactory, RecognitionBackend};
use crate::audio::AudioSource;
use crate::probe::{CapabilitySnapshot, Probe};
use crate::{Error, Result};

/// Viable strategies for a snapshot, best first
///
/// Remote when the companion and its recognizer are up, then the platform
/// recognizer, then on-device decoding, which is always a candidate.
#[must_use]
pub fn select_strategies(snapshot: &CapabilitySnapshot) -> Vec<Strategy> {
    let mut strategies = Vec::with_capacity(3);
    if snapshot.remote_recognition() {
        strategies.push(Strategy::Remote);
    }
    if snapshot.native_supported {
        strategies.push(Strategy::Native);
    }
    strategies.push(Strategy::Embedded);
    strategies
}

/// A fallback from one strategy to the next
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Demotion {
    pub from: Strategy,
    pub to: Strategy,
    pub reason: String,
}

/// Owns the recognition session
///
/// Holds one backend at a time and replaces it wholesale on fallback. Events
/// from sessions other than the one currently listening are dropped before
/// they reach the caller.
pub struct SpeechInputOrchestrator {
    probe: Arc<dyn Probe>,
    factory: Arc<dyn BackendFactory>,
    audio: Box<dyn AudioSource>,
    snapshot: Option<CapabilitySnapshot>,
    backend: Option<Box<dyn RecognitionBackend>>,
    state: SessionState,
    session: Option<SessionId>,
    next_session: u64,
    tried: Vec<Strategy>,
    demoted: bool,
    demotion: Option<Demotion>,
    events_tx: mpsc::UnboundedSender<RecognitionEvent>,
    events_rx: mpsc::UnboundedReceiver<RecognitionEvent>,
}

impl SpeechInputOrchestrator {
    #[must_use]
    pub fn new(
        probe: Arc<dyn Probe>,
        factory: Arc<dyn BackendFactory>,
        audio: Box<dyn AudioSource>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            probe,
            factory,
            audio,
            snapshot: None,
            backend: None,
            state: SessionState::Uninitialized,
            session: None,
            next_session: 1,
            tried: Vec::new(),
            demoted: false,
            demotion: None,
            events_tx,
            events_rx,
        }
    }

    /// Probe (once) and bring up the best available strategy
    ///
    /// Falls back to the next strategy once if the first cannot be
    /// initialized. After a failed session the environment is probed again.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` while listening, or the last initialization
    /// error if no strategy could be brought up (state becomes `Failed`)
    pub async fn initialize(&mut self) -> Result<()> {
        if self.state == SessionState::Listening {
            return Err(Error::InvalidState(
                "cannot initialize while listening".to_string(),
            ));
        }

        if self.snapshot.is_none() || self.state == SessionState::Failed {
            self.snapshot = Some(self.probe.probe().await);
        }

        if let Some(mut backend) = self.backend.take() {
            backend.stop(self.audio.as_mut()).await;
        }
        self.tried.clear();
        self.demoted = false;
        self.demotion = None;

        let first = self.next_candidate().unwrap_or(Strategy::Embedded);
        self.tried.push(first);

        match self.bring_up(first).await {
            Ok(backend) => {
                self.install(backend);
                Ok(())
            }
            Err(e) => self.demote(first, e).await,
        }
    }

    /// Start listening
    ///
    /// No-op if already listening.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` before a successful `initialize`, or the
    /// backend's error if it cannot start (after at most one fallback)
    pub async fn start(&mut self) -> Result<()> {
        match self.state {
            SessionState::Listening => {
                tracing::debug!("already listening, ignoring start");
                return Ok(());
            }
            SessionState::Uninitialized | SessionState::Failed => {
                return Err(Error::InvalidState(format!(
                    "cannot start from {} state",
                    self.state
                )));
            }
            SessionState::Ready | SessionState::Stopped => {}
        }

        loop {
            let Some(backend) = self.backend.as_mut() else {
                return Err(Error::InvalidState("no recognition backend".to_string()));
            };
            let strategy = backend.strategy();

            let session = SessionId(self.next_session);
            self.next_session += 1;
            let sink = EventSink::new(self.events_tx.clone(), session, strategy);

            match backend.start(self.audio.as_mut(), sink).await {
                Ok(()) => {
                    self.session = Some(session);
                    self.state = SessionState::Listening;
                    tracing::info!(%strategy, %session, "listening");
                    return Ok(());
                }
                Err(e @ Error::Initialization(_)) if !self.demoted => {
                    self.teardown().await;
                    self.demote(strategy, e).await?;
                }
                Err(e) => {
                    tracing::warn!(%strategy, error = %e, "recognition failed to start");
                    self.teardown().await;
                    self.state = SessionState::Failed;
                    return Err(e);
                }
            }
        }
    }

    /// Stop listening and release the microphone, decoder and connection
    ///
    /// Resources are released before this returns. The backend is kept for
    /// the next `start`.
    pub async fn stop(&mut self) {
        if let Some(backend) = self.backend.as_mut() {
            backend.stop(self.audio.as_mut()).await;
        }
        self.audio.close();
        self.session = None;

        if self.state == SessionState::Listening {
            self.state = SessionState::Stopped;
            tracing::info!("stopped listening");
        }
    }

    /// Next event of the listening session
    ///
    /// Returns `None` when nothing is listening. A `Failed` event tears the
    /// session down and moves to `Failed`; an `Ended` event moves to `Stopped`.
    pub async fn next_event(&mut self) -> Option<RecognitionEvent> {
        loop {
            let current = self.session?;
            let event = self.events_rx.recv().await?;

            if event.session != current {
                tracing::trace!(session = %event.session, "dropping event from stale session");
                continue;
            }

            match &event.payload {
                EventPayload::Transcript(_) => {}
                EventPayload::Ended => {
                    self.stop().await;
                    self.state = SessionState::Stopped;
                }
                EventPayload::Failed(error) => {
                    tracing::warn!(strategy = %event.strategy, error = %error, "recognition session failed");
                    self.teardown().await;
                    self.state = SessionState::Failed;
                }
            }
            return Some(event);
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Strategy of the active backend
    #[must_use]
    pub fn current_engine(&self) -> Option<Strategy> {
        self.backend.as_ref().map(|b| b.strategy())
    }

    /// Capabilities seen by the last probe
    #[must_use]
    pub const fn snapshot(&self) -> Option<&CapabilitySnapshot> {
        self.snapshot.as_ref()
    }

    /// Fallback taken since the last `initialize`, if any
    #[must_use]
    pub const fn demotion(&self) -> Option<&Demotion> {
        self.demotion.as_ref()
    }

    /// Strategies attempted since the last `initialize`, in order
    #[must_use]
    pub fn tried(&self) -> &[Strategy] {
        &self.tried
    }

    fn next_candidate(&self) -> Option<Strategy> {
        let snapshot = self.snapshot.as_ref()?;
        select_strategies(snapshot)
            .into_iter()
            .find(|s| !self.tried.contains(s))
    }

    async fn bring_up(&self, strategy: Strategy) -> Result<Box<dyn RecognitionBackend>> {
        let snapshot = self.snapshot.clone().unwrap_or_default();
        let mut backend = self.factory.build(strategy, &snapshot)?;
        backend.initialize().await?;
        Ok(backend)
    }

    fn install(&mut self, backend: Box<dyn RecognitionBackend>) {
        tracing::info!(strategy = %backend.strategy(), "recognition ready");
        self.backend = Some(backend);
        self.state = SessionState::Ready;
    }

    /// Replace a failed strategy with the next one, at most once
    async fn demote(&mut self, failed: Strategy, error: Error) -> Result<()> {
        if self.demoted {
            tracing::warn!(strategy = %failed, error = %error, "fallback strategy failed");
            self.state = SessionState::Failed;
            return Err(error);
        }
        self.demoted = true;

        let Some(next) = self.next_candidate() else {
            self.state = SessionState::Failed;
            return Err(error);
        };

        tracing::warn!(
            failed = %failed,
            next = %next,
            error = %error,
            "recognition strategy unavailable, falling back"
        );
        self.demotion = Some(Demotion {
            from: failed,
            to: next,
            reason: error.to_string(),
        });
        self.tried.push(next);

        match self.bring_up(next).await {
            Ok(backend) => {
                self.install(backend);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(strategy = %next, error = %e, "fallback strategy failed");
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    /// Release everything and drop the backend
    async fn teardown(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.stop(self.audio.as_mut()).await;
        }
        self.audio.close();
        self.session = None;
    }
}

impl std::fmt::Debug for SpeechInputOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechInputOrchestrator")
            .field("state", &self.state)
            .field("engine", &self.current_engine())
            .field("session", &self.session)
            .field("snapshot", &self.snapshot)
            .finish_non_exhaustive()
    }
}
