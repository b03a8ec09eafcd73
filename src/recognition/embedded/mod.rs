//! On-device recognition with a packaged acoustic model
//!
//! The model is loaded lazily on the first `start` and then cached in a
//! [`ModelStore`] for the rest of the process, so later sessions only pay
//! for a fresh decoder.

#[cfg(feature = "vosk")]
mod vosk;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use super::types::{EventSink, SessionTask, Strategy, TranscriptKind};
use super::RecognitionBackend;
use crate::audio::{AudioSource, ChunkStream, SAMPLE_RATE};
use crate::{Error, Result};

#[cfg(feature = "vosk")]
pub use self::vosk::VoskLoader;

/// How long `stop` waits for the decoder thread
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Result of feeding one buffer to a decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeStep {
    /// Nothing new
    Pending,
    /// Hypothesis for the current utterance so far
    Partial(String),
    /// The utterance ended
    Final(String),
}

/// A stateful decoder for one session
pub trait Decoder: Send {
    /// Feed 16 kHz mono PCM
    ///
    /// # Errors
    ///
    /// Returns error if the decoder rejects the audio
    fn accept(&mut self, samples: &[i16]) -> Result<DecodeStep>;

    /// Finish the current utterance, returning its text if any
    fn flush(&mut self) -> Option<String>;
}

/// A loaded acoustic model
pub trait AcousticModel: Send + Sync {
    /// Create a decoder for audio at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the decoder cannot be created
    fn decoder(&self, sample_rate: u32) -> Result<Box<dyn Decoder>>;
}

/// Loads acoustic models from disk
pub trait ModelLoader: Send + Sync {
    /// Load the model at `path` (blocking)
    ///
    /// # Errors
    ///
    /// Returns `Initialization` if the model cannot be loaded
    fn load(&self, path: &Path) -> Result<Arc<dyn AcousticModel>>;
}

/// Process-wide cache for the acoustic model
///
/// Cloning shares the cache. The first successful load wins; later requests
/// get the cached model regardless of path.
#[derive(Clone)]
pub struct ModelStore {
    loader: Arc<dyn ModelLoader>,
    model: Arc<OnceCell<Arc<dyn AcousticModel>>>,
    loads: Arc<AtomicUsize>,
}

impl ModelStore {
    #[must_use]
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            model: Arc::new(OnceCell::new()),
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get the cached model, loading it on first use
    ///
    /// # Errors
    ///
    /// Returns `Initialization` if loading fails; a later call retries
    pub async fn get_or_load(&self, path: &Path) -> Result<Arc<dyn AcousticModel>> {
        let model = self
            .model
            .get_or_try_init(|| async {
                let loader = self.loader.clone();
                let path = path.to_path_buf();
                self.loads.fetch_add(1, Ordering::SeqCst);

                tracing::info!(path = %path.display(), "loading acoustic model");
                tokio::task::spawn_blocking(move || loader.load(&path))
                    .await
                    .map_err(|e| Error::Initialization(format!("model load task failed: {e}")))?
            })
            .await?;

        Ok(model.clone())
    }

    /// Whether a model is cached
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    /// Number of load attempts made
    #[must_use]
    pub fn load_attempts(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl Default for ModelStore {
    fn default() -> Self {
        Self::new(default_loader())
    }
}

impl std::fmt::Debug for ModelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelStore")
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

/// The loader compiled into this build
#[must_use]
pub fn default_loader() -> Arc<dyn ModelLoader> {
    #[cfg(feature = "vosk")]
    {
        Arc::new(VoskLoader)
    }
    #[cfg(not(feature = "vosk"))]
    {
        Arc::new(UnavailableLoader)
    }
}

/// Stand-in when no decoder library is linked
#[cfg(not(feature = "vosk"))]
struct UnavailableLoader;

#[cfg(not(feature = "vosk"))]
impl ModelLoader for UnavailableLoader {
    fn load(&self, _path: &Path) -> Result<Arc<dyn AcousticModel>> {
        Err(Error::Initialization(
            "embedded decoding requires the `vosk` feature".to_string(),
        ))
    }
}

struct DecodeWorker {
    stopping: Arc<AtomicBool>,
    task: SessionTask,
}

/// Recognizes speech on-device
pub struct EmbeddedRecognitionEngine {
    model_path: PathBuf,
    store: ModelStore,
    worker: Option<DecodeWorker>,
}

impl EmbeddedRecognitionEngine {
    #[must_use]
    pub const fn new(model_path: PathBuf, store: ModelStore) -> Self {
        Self {
            model_path,
            store,
            worker: None,
        }
    }

    fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.task.is_finished())
    }
}

#[async_trait]
impl RecognitionBackend for EmbeddedRecognitionEngine {
    fn strategy(&self) -> Strategy {
        Strategy::Embedded
    }

    async fn initialize(&mut self) -> Result<()> {
        if !self.model_path.is_dir() {
            return Err(Error::Initialization(format!(
                "acoustic model not found at {}",
                self.model_path.display()
            )));
        }
        Ok(())
    }

    async fn start(&mut self, audio: &mut dyn AudioSource, sink: EventSink) -> Result<()> {
        if self.is_running() {
            tracing::warn!("embedded recognition already running, ignoring start");
            return Ok(());
        }

        let model = self.store.get_or_load(&self.model_path).await?;
        let decoder = model.decoder(SAMPLE_RATE)?;
        let chunks = audio.open().await?;

        let stopping = Arc::new(AtomicBool::new(false));
        let flag = stopping.clone();
        let handle =
            tokio::task::spawn_blocking(move || decode_loop(decoder, chunks, sink, &flag));

        self.worker = Some(DecodeWorker {
            stopping,
            task: SessionTask::from_handle(handle),
        });

        tracing::debug!("embedded recognition started");
        Ok(())
    }

    async fn stop(&mut self, audio: &mut dyn AudioSource) {
        let worker = self.worker.take();
        if let Some(worker) = &worker {
            worker.stopping.store(true, Ordering::SeqCst);
        }

        // Closing the source ends the decoder's chunk stream
        audio.close();

        if let Some(worker) = worker {
            worker.task.shutdown(STOP_GRACE).await;
            tracing::debug!("embedded recognition stopped");
        }
    }
}

/// Runs on a blocking thread until the chunk stream ends
fn decode_loop(
    mut decoder: Box<dyn Decoder>,
    mut chunks: ChunkStream,
    mut sink: EventSink,
    stopping: &AtomicBool,
) {
    let mut last_partial = String::new();

    while let Some(chunk) = chunks.blocking_recv() {
        let delivered = match decoder.accept(&chunk.samples) {
            Ok(DecodeStep::Pending) => true,
            Ok(DecodeStep::Partial(text)) => {
                if text.is_empty() || text == last_partial {
                    true
                } else {
                    last_partial.clone_from(&text);
                    sink.transcript(TranscriptKind::Partial, text)
                }
            }
            Ok(DecodeStep::Final(text)) => {
                last_partial.clear();
                text.is_empty() || sink.transcript(TranscriptKind::Final, text)
            }
            Err(e) => {
                sink.failed(e);
                return;
            }
        };

        if !delivered {
            return;
        }
    }

    if stopping.load(Ordering::SeqCst) {
        return;
    }

    if let Some(text) = decoder.flush().filter(|t| !t.is_empty()) {
        sink.transcript(TranscriptKind::Final, text);
    }
    sink.ended();
}
