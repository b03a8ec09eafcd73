//! Recognition session and event types

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::Error;

/// Recognition backend, in fallback priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Streaming recognizer on the companion device
    Remote,
    /// On-device decoding with a packaged acoustic model
    Embedded,
    /// Platform-provided recognizer
    Native,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote => write!(f, "remote"),
            Self::Embedded => write!(f, "embedded"),
            Self::Native => write!(f, "native"),
        }
    }
}

/// Orchestrator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Ready,
    Listening,
    Stopped,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::Listening => "listening",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Identifies one listening episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Incremental or end-of-utterance result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptKind {
    Partial,
    Final,
}

/// One recognition result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub kind: TranscriptKind,
    pub text: String,
    /// Utterance index within the session; advances after each final
    pub turn: u32,
    /// Emission order within the session
    pub seq: u64,
}

/// What happened in a session
#[derive(Debug)]
pub enum EventPayload {
    Transcript(TranscriptEvent),
    /// The backend finished on its own (audio ran out, single-shot recognizer done)
    Ended,
    /// The session is over because of this error
    Failed(Error),
}

/// An event tagged with the session and strategy that produced it
#[derive(Debug)]
pub struct RecognitionEvent {
    pub session: SessionId,
    pub strategy: Strategy,
    pub payload: EventPayload,
}

/// Per-session event emitter handed to a backend
///
/// Stamps each transcript with its turn and sequence number.
#[derive(Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<RecognitionEvent>,
    session: SessionId,
    strategy: Strategy,
    turn: u32,
    seq: u64,
}

impl EventSink {
    #[must_use]
    pub const fn new(
        tx: mpsc::UnboundedSender<RecognitionEvent>,
        session: SessionId,
        strategy: Strategy,
    ) -> Self {
        Self {
            tx,
            session,
            strategy,
            turn: 0,
            seq: 0,
        }
    }

    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }

    /// Emit a transcript; returns `false` once nobody is listening
    pub fn transcript(&mut self, kind: TranscriptKind, text: impl Into<String>) -> bool {
        let event = TranscriptEvent {
            kind,
            text: text.into(),
            turn: self.turn,
            seq: self.seq,
        };
        self.seq += 1;
        if kind == TranscriptKind::Final {
            self.turn += 1;
        }
        self.send(EventPayload::Transcript(event))
    }

    /// Report that the backend finished on its own
    pub fn ended(self) {
        self.send(EventPayload::Ended);
    }

    /// Report a session-ending error
    pub fn failed(self, error: Error) {
        self.send(EventPayload::Failed(error));
    }

    /// Whether the receiving side is gone
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, payload: EventPayload) -> bool {
        self.tx
            .send(RecognitionEvent {
                session: self.session,
                strategy: self.strategy,
                payload,
            })
            .is_ok()
    }
}

/// Applies the supersede rule to a stream of transcript events
///
/// Within a session the newest event wins: a partial replaces the previous
/// partial, a final closes the turn. Anything older than what has already
/// been seen (earlier session, closed turn, lower sequence) is rejected.
#[derive(Debug, Default)]
pub struct TranscriptTracker {
    session: Option<SessionId>,
    turn: u32,
    last_seq: Option<u64>,
    partial: String,
}

impl TranscriptTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an event; returns `false` if it is stale and must be ignored
    pub fn accept(&mut self, session: SessionId, event: &TranscriptEvent) -> bool {
        match self.session {
            Some(current) if session < current => return false,
            Some(current) if session == current => {
                if event.turn < self.turn || self.last_seq.is_some_and(|seq| event.seq <= seq) {
                    return false;
                }
            }
            _ => {
                self.session = Some(session);
                self.turn = 0;
                self.last_seq = None;
                self.partial.clear();
            }
        }

        self.last_seq = Some(event.seq);
        match event.kind {
            TranscriptKind::Partial => {
                self.turn = event.turn;
                self.partial.clone_from(&event.text);
            }
            TranscriptKind::Final => {
                self.turn = event.turn + 1;
                self.partial.clear();
            }
        }
        true
    }

    /// Current partial text of the open turn
    #[must_use]
    pub fn partial(&self) -> Option<&str> {
        (!self.partial.is_empty()).then_some(self.partial.as_str())
    }

    /// Index of the turn currently open
    #[must_use]
    pub const fn turn(&self) -> u32 {
        self.turn
    }
}

/// A spawned backend task with a stop signal
#[derive(Debug)]
pub(crate) struct SessionTask {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl SessionTask {
    pub(crate) fn spawn<F, Fut>(task: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = oneshot::channel();
        Self {
            stop_tx: Some(stop_tx),
            handle: tokio::spawn(task(stop_rx)),
        }
    }

    /// Wrap a task that is told to stop by other means
    pub(crate) fn from_handle(handle: JoinHandle<()>) -> Self {
        Self {
            stop_tx: None,
            handle,
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the task and wait up to `grace` for it, aborting after
    pub(crate) async fn shutdown(mut self, grace: Duration) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if tokio::time::timeout(grace, &mut self.handle).await.is_err() {
            tracing::warn!("recognition task did not stop in time, aborting");
            self.handle.abort();
        }
    }
}

impl Drop for SessionTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
