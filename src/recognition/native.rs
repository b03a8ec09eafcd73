//! Platform recognizer adapter
//!
//! Runs a platform-provided recognizer as a child process. Raw 16 kHz PCM goes
//! to its stdin; it answers on stdout with one JSON object per line, using the
//! same `{type, text}` / `{error}` shapes as the companion stream.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;

use super::RecognitionBackend;
use super::types::{EventSink, SessionTask, Strategy, TranscriptKind};
use crate::audio::{AudioSource, ChunkStream};
use crate::companion::StreamMessage;
use crate::probe::find_executable;
use crate::{Error, Result};

const STOP_GRACE: Duration = Duration::from_secs(1);

/// How to launch the platform recognizer
#[derive(Debug, Clone)]
pub struct NativeSettings {
    pub command: String,
    pub args: Vec<String>,
    /// Keep listening after a final result
    pub continuous: bool,
    /// Passed as `KIOSK_LANGUAGE`
    pub language: String,
}

struct NativeSession {
    child: Child,
    task: SessionTask,
}

/// Wraps the platform recognizer process
pub struct NativeRecognitionAdapter {
    settings: NativeSettings,
    program: Option<PathBuf>,
    session: Option<NativeSession>,
}

impl NativeRecognitionAdapter {
    #[must_use]
    pub const fn new(settings: NativeSettings) -> Self {
        Self {
            settings,
            program: None,
            session: None,
        }
    }

    fn spawn_child(&self, program: &Path) -> Result<Child> {
        Command::new(program)
            .args(&self.settings.args)
            .env("KIOSK_LANGUAGE", &self.settings.language)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Initialization(format!(
                    "failed to launch {}: {e}",
                    self.settings.command
                ))
            })
    }
}

#[async_trait]
impl RecognitionBackend for NativeRecognitionAdapter {
    fn strategy(&self) -> Strategy {
        Strategy::Native
    }

    async fn initialize(&mut self) -> Result<()> {
        let program = find_executable(&self.settings.command).ok_or_else(|| {
            Error::Initialization(format!(
                "platform recognizer not found: {}",
                self.settings.command
            ))
        })?;
        tracing::debug!(program = %program.display(), "platform recognizer resolved");
        self.program = Some(program);
        Ok(())
    }

    async fn start(&mut self, audio: &mut dyn AudioSource, sink: EventSink) -> Result<()> {
        if self
            .session
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
        {
            tracing::warn!("native recognition already running, ignoring start");
            return Ok(());
        }
        if let Some(mut stale) = self.session.take() {
            let _ = stale.child.kill().await;
        }

        let program = self.program.clone().ok_or_else(|| {
            Error::Initialization("platform recognizer not initialized".to_string())
        })?;

        let mut child = self.spawn_child(&program)?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill().await;
            return Err(Error::Initialization(
                "platform recognizer pipes unavailable".to_string(),
            ));
        };

        let chunks = match audio.open().await {
            Ok(chunks) => chunks,
            Err(e) => {
                let _ = child.kill().await;
                return Err(e);
            }
        };

        let continuous = self.settings.continuous;
        let task = SessionTask::spawn(move |stop_rx| {
            relay(stdin, stdout, chunks, sink, continuous, stop_rx)
        });

        self.session = Some(NativeSession { child, task });
        tracing::debug!(continuous, "native recognition started");
        Ok(())
    }

    async fn stop(&mut self, audio: &mut dyn AudioSource) {
        let session = self.session.take();
        audio.close();

        if let Some(mut session) = session {
            session.task.shutdown(STOP_GRACE).await;
            if let Err(e) = session.child.kill().await {
                tracing::debug!(error = %e, "platform recognizer already gone");
            }
            tracing::debug!("native recognition stopped");
        }
    }
}

/// Pump audio into the recognizer and its results into the sink
async fn relay(
    stdin: ChildStdin,
    stdout: ChildStdout,
    mut chunks: ChunkStream,
    mut sink: EventSink,
    continuous: bool,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut stdin = Some(stdin);

    loop {
        tokio::select! {
            biased;

            _ = &mut stop_rx => return,

            chunk = chunks.next(), if stdin.is_some() => {
                let Some(chunk) = chunk else {
                    // Audio ran out; closing stdin lets the recognizer finish
                    stdin = None;
                    continue;
                };
                if let Some(pipe) = stdin.as_mut()
                    && let Err(e) = pipe.write_all(&chunk.to_le_bytes()).await
                {
                    sink.failed(Error::TransportLost(format!(
                        "platform recognizer closed its input: {e}"
                    )));
                    return;
                }
            }

            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match StreamMessage::parse(line) {
                        Ok(StreamMessage::Transcript { kind, text }) => {
                            if text.is_empty() {
                                continue;
                            }
                            if !sink.transcript(kind, text) {
                                return;
                            }
                            if kind == TranscriptKind::Final && !continuous {
                                sink.ended();
                                return;
                            }
                        }
                        Ok(StreamMessage::Error { error, .. }) => {
                            sink.failed(Error::DeviceUnavailable(format!(
                                "platform recognizer: {error}"
                            )));
                            return;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "malformed output from platform recognizer");
                            sink.failed(Error::TransportLost(
                                "native recognition lost".to_string(),
                            ));
                            return;
                        }
                    }
                }
                Ok(None) => {
                    if stdin.is_none() {
                        sink.ended();
                    } else {
                        sink.failed(Error::TransportLost(
                            "platform recognizer exited".to_string(),
                        ));
                    }
                    return;
                }
                Err(e) => {
                    sink.failed(Error::TransportLost(format!("native recognition lost: {e}")));
                    return;
                }
            },
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::audio::{CHUNK_FRAMES, ClipSource, SAMPLE_RATE};
    use crate::recognition::{EventPayload, RecognitionEvent, SessionId};

    fn shell(script: &str, continuous: bool) -> NativeRecognitionAdapter {
        NativeRecognitionAdapter::new(NativeSettings {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            continuous,
            language: "ja-JP".to_string(),
        })
    }

    async fn collect(rx: &mut mpsc::UnboundedReceiver<RecognitionEvent>) -> Vec<String> {
        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            match event.payload {
                EventPayload::Transcript(t) => seen.push(format!("{:?}:{}", t.kind, t.text)),
                EventPayload::Ended => {
                    seen.push("ended".to_string());
                    break;
                }
                EventPayload::Failed(e) => {
                    seen.push(format!("failed:{e}"));
                    break;
                }
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_missing_recognizer_fails_initialize() {
        let mut adapter = NativeRecognitionAdapter::new(NativeSettings {
            command: "kiosk-voice-no-such-recognizer".to_string(),
            args: Vec::new(),
            continuous: false,
            language: "ja-JP".to_string(),
        });
        assert!(matches!(
            adapter.initialize().await,
            Err(Error::Initialization(_))
        ));
    }

    #[tokio::test]
    async fn test_single_shot_ends_after_final() {
        let mut adapter = shell(
            r#"echo '{"type":"partial","text":"は"}'; echo '{"type":"final","text":"はい"}'; echo '{"type":"final","text":"extra"}'; cat > /dev/null"#,
            false,
        );
        adapter.initialize().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut audio = ClipSource::new(&vec![0.0; CHUNK_FRAMES], SAMPLE_RATE).unwrap();
        adapter
            .start(&mut audio, EventSink::new(tx, SessionId(1), Strategy::Native))
            .await
            .unwrap();

        assert_eq!(
            collect(&mut rx).await,
            vec!["Partial:は", "Final:はい", "ended"]
        );
        adapter.stop(&mut audio).await;
    }

    #[tokio::test]
    async fn test_continuous_keeps_listening_until_exit() {
        let mut adapter = shell(
            r#"cat > /dev/null; echo '{"type":"final","text":"一"}'; echo '{"type":"final","text":"二"}'"#,
            true,
        );
        adapter.initialize().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut audio = ClipSource::new(&vec![0.0; CHUNK_FRAMES * 2], SAMPLE_RATE).unwrap();
        adapter
            .start(&mut audio, EventSink::new(tx, SessionId(1), Strategy::Native))
            .await
            .unwrap();

        assert_eq!(collect(&mut rx).await, vec!["Final:一", "Final:二", "ended"]);
        adapter.stop(&mut audio).await;
    }

    #[tokio::test]
    async fn test_unexpected_exit_is_transport_lost() {
        let mut adapter = shell("exit 0", false);
        adapter.initialize().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        // Realtime pacing keeps stdin open when the process exits
        let mut audio = ClipSource::new(&vec![0.0; CHUNK_FRAMES * 40], SAMPLE_RATE)
            .unwrap()
            .realtime(true);
        adapter
            .start(&mut audio, EventSink::new(tx, SessionId(1), Strategy::Native))
            .await
            .unwrap();

        let seen = collect(&mut rx).await;
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with("failed:transport lost"), "{seen:?}");
        adapter.stop(&mut audio).await;
    }
}
