//! Mock companion device
//!
//! Serves the companion's health, speech, card reader and streaming
//! recognition endpoints without any hardware. A card "appears" a fixed delay
//! after each read starts; the recognition socket reveals a scripted utterance
//! one word per received audio chunk, then finalizes it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;

use super::types::{Ack, ReaderStatus, SpeakRequest, StartReadRequest};
use crate::{Error, Result};

/// How long a successful read stays visible
const CARD_FRESHNESS: Duration = Duration::from_secs(5);

/// Behaviour knobs for the mock
#[derive(Debug, Clone)]
pub struct MockOptions {
    /// Card identifier reported on success
    pub idm: String,
    /// Delay between `/start-nfc` and the card appearing
    pub card_delay: Duration,
    /// Whether `/health` advertises a streaming recognizer
    pub recognizer_available: bool,
    /// Make every `/speak` call fail with 500
    pub speak_fails: bool,
    /// Number of leading `/check-nfc` calls answered with 503
    pub check_failures: u32,
    /// Words revealed on the recognition socket
    pub utterance: Vec<String>,
    /// Drop the recognition socket without a close frame after this many chunks
    pub drop_stream_after: Option<usize>,
    /// Answer the first audio chunk with a frame that is not JSON
    pub malformed_frame: bool,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            idm: "04AB12CD34EF5678".to_string(),
            card_delay: Duration::from_secs(3),
            recognizer_available: true,
            speak_fails: false,
            check_failures: 0,
            utterance: ["受付", "を", "お願い", "します"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            drop_stream_after: None,
            malformed_frame: false,
        }
    }
}

/// Request counters, for assertions
#[derive(Debug, Default)]
pub struct MockCounters {
    pub health: AtomicUsize,
    pub start_read: AtomicUsize,
    pub check_read: AtomicUsize,
    pub speak: AtomicUsize,
    pub stream_connections: AtomicUsize,
    pub stream_chunks: AtomicUsize,
}

#[derive(Debug)]
struct ReaderState {
    status: ReaderStatus,
    idm: Option<String>,
    last_read: Option<Instant>,
    generation: u64,
}

#[derive(Debug)]
struct MockState {
    options: MockOptions,
    reader: Mutex<ReaderState>,
    spoken: Mutex<Vec<String>>,
    remaining_check_failures: AtomicU32,
    counters: MockCounters,
}

impl MockState {
    fn reader(&self) -> std::sync::MutexGuard<'_, ReaderState> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process stand-in for the companion device
#[derive(Debug, Clone)]
pub struct MockCompanion {
    state: Arc<MockState>,
}

impl MockCompanion {
    /// Create a mock with the given behaviour
    #[must_use]
    pub fn new(options: MockOptions) -> Self {
        let remaining = options.check_failures;
        Self {
            state: Arc::new(MockState {
                options,
                reader: Mutex::new(ReaderState {
                    status: ReaderStatus::Idle,
                    idm: None,
                    last_read: None,
                    generation: 0,
                }),
                spoken: Mutex::new(Vec::new()),
                remaining_check_failures: AtomicU32::new(remaining),
                counters: MockCounters::default(),
            }),
        }
    }

    /// Build the router
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/start-nfc", post(start_nfc))
            .route("/check-nfc", get(check_nfc))
            .route("/read-nfc", get(read_nfc))
            .route("/speak", post(speak))
            .route("/stt/stream", get(stream_upgrade))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Texts received on `/speak`, oldest first
    #[must_use]
    pub fn spoken(&self) -> Vec<String> {
        self.state
            .spoken
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Request counters
    #[must_use]
    pub fn counters(&self) -> &MockCounters {
        &self.state.counters
    }

    /// Bind and serve in a background task
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound
    pub async fn spawn(self, addr: SocketAddr) -> Result<MockHandle> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind mock companion: {e}")))?;
        let addr = listener.local_addr()?;
        let router = self.router();

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "mock companion stopped");
            }
        });

        tracing::info!(%addr, "mock companion listening");
        Ok(MockHandle {
            addr,
            mock: self,
            task,
        })
    }

    /// Serve until the process exits
    ///
    /// # Errors
    ///
    /// Returns error if the server fails to bind or run
    pub async fn run(self, port: u16) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind mock companion: {e}")))?;

        tracing::info!(port, idm = %self.state.options.idm, "mock companion listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| Error::Config(format!("mock companion error: {e}")))
    }
}

/// A running mock companion; the server stops when this is dropped
#[derive(Debug)]
pub struct MockHandle {
    addr: SocketAddr,
    mock: MockCompanion,
    task: JoinHandle<()>,
}

impl MockHandle {
    /// Base URL (`http://127.0.0.1:<port>`)
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Bound address
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The mock being served
    #[must_use]
    pub const fn mock(&self) -> &MockCompanion {
        &self.mock
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn health(State(state): State<Arc<MockState>>) -> Json<Value> {
    state.counters.health.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "status": "ok",
        "service": "mock-companion",
        "vosk_available": state.options.recognizer_available,
    }))
}

async fn start_nfc(
    State(state): State<Arc<MockState>>,
    Json(request): Json<StartReadRequest>,
) -> std::result::Result<Json<Ack>, (StatusCode, Json<Value>)> {
    state.counters.start_read.fetch_add(1, Ordering::SeqCst);

    let generation = {
        let mut reader = state.reader();
        if reader.status == ReaderStatus::Reading {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({ "detail": "Already reading" })),
            ));
        }
        reader.status = ReaderStatus::Reading;
        reader.idm = None;
        reader.generation += 1;
        reader.generation
    };

    tracing::debug!(timeout = request.timeout, "mock read started");

    let delay = state.options.card_delay;
    let state = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let mut reader = state.reader();
        if reader.generation == generation && reader.status == ReaderStatus::Reading {
            reader.status = ReaderStatus::Success;
            reader.idm = Some(state.options.idm.clone());
            reader.last_read = Some(Instant::now());
            tracing::debug!(idm = %state.options.idm, "mock card detected");
        }
    });

    Ok(Json(Ack {
        status: "started".to_string(),
        message: Some("Mock NFC reading started".to_string()),
    }))
}

async fn check_nfc(State(state): State<Arc<MockState>>) -> impl IntoResponse {
    state.counters.check_read.fetch_add(1, Ordering::SeqCst);

    let failing = state
        .remaining_check_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "detail": "reader busy" })),
        );
    }

    let mut reader = state.reader();
    let mut body = json!({ "status": reader.status });

    if reader.status == ReaderStatus::Success {
        body["idm"] = json!(reader.idm);
        // Report once more, then forget a stale card
        if reader.last_read.is_some_and(|t| t.elapsed() > CARD_FRESHNESS) {
            reader.status = ReaderStatus::Idle;
            reader.idm = None;
        }
    }

    (StatusCode::OK, Json(body))
}

async fn read_nfc(State(state): State<Arc<MockState>>) -> Json<Value> {
    let reader = state.reader();
    let fresh = reader
        .last_read
        .is_some_and(|t| t.elapsed() <= CARD_FRESHNESS);

    match (&reader.idm, fresh) {
        (Some(idm), true) => Json(json!({ "status": "ok", "idm": idm })),
        _ => Json(json!({ "status": "no_card" })),
    }
}

async fn speak(
    State(state): State<Arc<MockState>>,
    Json(request): Json<SpeakRequest>,
) -> (StatusCode, Json<Ack>) {
    state.counters.speak.fetch_add(1, Ordering::SeqCst);
    state
        .spoken
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(request.text);

    if state.options.speak_fails {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(Ack {
                status: "error".to_string(),
                message: Some("speaker unavailable".to_string()),
            }),
        );
    }

    (
        StatusCode::OK,
        Json(Ack {
            status: "ok".to_string(),
            message: Some("speaking".to_string()),
        }),
    )
}

async fn stream_upgrade(
    State(state): State<Arc<MockState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

async fn handle_stream(mut socket: WebSocket, state: Arc<MockState>) {
    state.counters.stream_connections.fetch_add(1, Ordering::SeqCst);

    if !state.options.recognizer_available {
        let frame = json!({ "error": "VOSK model not loaded", "fallback": "web_speech_api" });
        let _ = socket.send(Message::Text(frame.to_string().into())).await;
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    let words = &state.options.utterance;
    let mut revealed = 0;
    let mut received = 0;

    while let Some(Ok(message)) = socket.recv().await {
        let frame = match message {
            Message::Binary(data) => {
                state.counters.stream_chunks.fetch_add(1, Ordering::SeqCst);
                received += 1;
                if state.options.drop_stream_after.is_some_and(|n| received > n) {
                    tracing::debug!(received, "mock dropping recognition stream");
                    return;
                }
                if state.options.malformed_frame {
                    let _ = socket.send(Message::Text("<html>502</html>".into())).await;
                    continue;
                }
                if data.len() % 2 != 0 {
                    json!({ "error": "audio frame is not 16-bit PCM" })
                } else if revealed < words.len() {
                    revealed += 1;
                    json!({ "type": "partial", "text": words[..revealed].join(" ") })
                } else {
                    revealed = 0;
                    json!({ "type": "final", "text": words.join(" ") })
                }
            }
            Message::Close(_) => break,
            _ => continue,
        };

        if socket
            .send(Message::Text(frame.to_string().into()))
            .await
            .is_err()
        {
            break;
        }
    }

    tracing::debug!("mock recognition stream closed");
}
