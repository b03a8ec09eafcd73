//! Streaming recognition on the companion device
//!
//! One WebSocket per session. Audio chunks go up as bare binary frames (the
//! frame boundary is the chunk boundary); transcripts come back as JSON text
//! frames. The client never reconnects on its own.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::RecognitionBackend;
use super::types::{EventSink, SessionTask, Strategy};
use crate::audio::{AudioSource, ChunkStream};
use crate::companion::{CompanionClient, StreamMessage};
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const STOP_GRACE: Duration = Duration::from_secs(1);

/// Message surfaced for every transport failure
const LOST: &str = "remote recognition lost";

/// Streams audio to the companion's recognizer
pub struct RemoteRecognitionClient {
    url: Url,
    connect_timeout: Duration,
    connection: Option<WsStream>,
    task: Option<SessionTask>,
}

impl RemoteRecognitionClient {
    /// Stream to the companion's `/stt/stream` endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the companion URL has no WebSocket form
    pub fn new(companion: &CompanionClient) -> Result<Self> {
        Ok(Self::with_url(
            companion.stream_url()?,
            companion.probe_timeout(),
        ))
    }

    #[must_use]
    pub const fn with_url(url: Url, connect_timeout: Duration) -> Self {
        Self {
            url,
            connect_timeout,
            connection: None,
            task: None,
        }
    }

    async fn connect(&self) -> Result<WsStream> {
        let (ws, _response) = tokio::time::timeout(
            self.connect_timeout,
            connect_async(self.url.as_str()),
        )
        .await
        .map_err(|_| {
            Error::Initialization(format!(
                "stream handshake with {} timed out after {:?}",
                self.url, self.connect_timeout
            ))
        })?
        .map_err(|e| Error::Initialization(format!("stream handshake with {} failed: {e}", self.url)))?;

        tracing::debug!(url = %self.url, "recognition stream connected");
        Ok(ws)
    }
}

#[async_trait]
impl RecognitionBackend for RemoteRecognitionClient {
    fn strategy(&self) -> Strategy {
        Strategy::Remote
    }

    async fn initialize(&mut self) -> Result<()> {
        if self.connection.is_none() {
            self.connection = Some(self.connect().await?);
        }
        Ok(())
    }

    async fn start(&mut self, audio: &mut dyn AudioSource, sink: EventSink) -> Result<()> {
        if self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            tracing::warn!("remote recognition already running, ignoring start");
            return Ok(());
        }

        let ws = match self.connection.take() {
            Some(ws) => ws,
            None => self.connect().await?,
        };
        let chunks = audio.open().await?;

        self.task = Some(SessionTask::spawn(move |stop_rx| {
            stream_session(ws, chunks, sink, stop_rx)
        }));

        tracing::debug!(url = %self.url, "remote recognition started");
        Ok(())
    }

    async fn stop(&mut self, audio: &mut dyn AudioSource) {
        if let Some(task) = self.task.take() {
            task.shutdown(STOP_GRACE).await;
        }
        audio.close();

        // An idle handshake from initialize is not reused after a stop
        if let Some(mut ws) = self.connection.take() {
            let _ = ws.close(None).await;
        }
        tracing::debug!("remote recognition stopped");
    }
}

/// Pump chunks up and transcripts down until stopped or the stream fails
async fn stream_session(
    ws: WsStream,
    mut chunks: ChunkStream,
    mut sink: EventSink,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let (mut write, mut read) = ws.split();
    let mut audio_done = false;

    let failure = loop {
        tokio::select! {
            biased;

            _ = &mut stop_rx => {
                let _ = write.send(Message::Close(None)).await;
                break None;
            }

            chunk = chunks.next(), if !audio_done => match chunk {
                Some(chunk) => {
                    if let Err(e) = write.send(Message::Binary(chunk.to_le_bytes())).await {
                        break Some(Error::TransportLost(format!("{LOST}: {e}")));
                    }
                }
                None => {
                    tracing::debug!("audio source finished, awaiting remaining results");
                    audio_done = true;
                }
            },

            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => match StreamMessage::parse(&text) {
                    Ok(StreamMessage::Transcript { kind, text }) => {
                        if !text.is_empty() && !sink.transcript(kind, text) {
                            break None;
                        }
                    }
                    Ok(StreamMessage::Error { error, fallback }) => {
                        tracing::warn!(error = %error, fallback = ?fallback, "companion rejected stream");
                        let _ = write.send(Message::Close(None)).await;
                        break Some(Error::RemoteRejected(error));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed frame from companion");
                        break Some(Error::TransportLost(LOST.to_string()));
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    break Some(Error::TransportLost(LOST.to_string()));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(Error::TransportLost(format!("{LOST}: {e}"))),
            },
        }
    };

    if let Some(error) = failure {
        tracing::warn!(error = %error, "remote recognition ended");
        sink.failed(error);
    }
}
