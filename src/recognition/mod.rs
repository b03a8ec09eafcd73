//! Speech recognition
//!
//! Three interchangeable backends sit behind [`RecognitionBackend`]:
//! streaming to the companion, on-device decoding, and the platform
//! recognizer. [`SpeechInputOrchestrator`] picks one per session from a
//! [`CapabilitySnapshot`](crate::probe::CapabilitySnapshot) and falls back
//! once if it cannot be brought up.

pub mod embedded;
mod native;
mod orchestrator;
mod remote;
mod types;

use std::path::PathBuf;

use async_trait::async_trait;

pub use embedded::{
    AcousticModel, DecodeStep, Decoder, EmbeddedRecognitionEngine, ModelLoader, ModelStore,
};
pub use native::{NativeRecognitionAdapter, NativeSettings};
pub use orchestrator::{Demotion, SpeechInputOrchestrator, select_strategies};
pub use remote::RemoteRecognitionClient;
pub use types::{
    EventPayload, EventSink, RecognitionEvent, SessionId, SessionState, Strategy,
    TranscriptEvent, TranscriptKind, TranscriptTracker,
};

use crate::audio::AudioSource;
use crate::companion::CompanionClient;
use crate::config::Config;
use crate::probe::CapabilitySnapshot;
use crate::{Error, Result};

/// One recognition strategy
#[async_trait]
pub trait RecognitionBackend: Send {
    /// Which strategy this is
    fn strategy(&self) -> Strategy;

    /// Bring the backend up without starting to listen
    ///
    /// # Errors
    ///
    /// Returns `Initialization` if the backend cannot work here
    async fn initialize(&mut self) -> Result<()>;

    /// Open `audio` and start emitting events into `sink`
    ///
    /// A second start while already listening is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Initialization` for failures the orchestrator may fall back
    /// from; anything else ends the session
    async fn start(&mut self, audio: &mut dyn AudioSource, sink: EventSink) -> Result<()>;

    /// Stop listening and release the audio source and any connection
    async fn stop(&mut self, audio: &mut dyn AudioSource);
}

/// Builds backends for the orchestrator
pub trait BackendFactory: Send + Sync {
    /// Construct (but do not initialize) a backend for `strategy`
    ///
    /// # Errors
    ///
    /// Returns `Initialization` if the strategy cannot be built here
    fn build(
        &self,
        strategy: Strategy,
        snapshot: &CapabilitySnapshot,
    ) -> Result<Box<dyn RecognitionBackend>>;
}

/// The real backends
#[derive(Debug, Clone)]
pub struct StandardBackends {
    companion: Option<CompanionClient>,
    model_path: PathBuf,
    models: ModelStore,
    native: Option<NativeSettings>,
}

impl StandardBackends {
    #[must_use]
    pub const fn new(
        companion: Option<CompanionClient>,
        model_path: PathBuf,
        models: ModelStore,
        native: Option<NativeSettings>,
    ) -> Self {
        Self {
            companion,
            model_path,
            models,
            native,
        }
    }

    /// Backends described by the configuration, sharing `models`
    #[must_use]
    pub fn from_config(
        config: &Config,
        companion: Option<CompanionClient>,
        models: ModelStore,
    ) -> Self {
        let recognition = &config.recognition;
        let native = recognition
            .native_command
            .as_ref()
            .map(|command| NativeSettings {
                command: command.clone(),
                args: recognition.native_args.clone(),
                continuous: recognition.native_continuous,
                language: recognition.language.clone(),
            });

        Self::new(companion, recognition.model_path.clone(), models, native)
    }
}

impl BackendFactory for StandardBackends {
    fn build(
        &self,
        strategy: Strategy,
        snapshot: &CapabilitySnapshot,
    ) -> Result<Box<dyn RecognitionBackend>> {
        match strategy {
            Strategy::Remote => {
                let companion = self.companion.as_ref().ok_or_else(|| {
                    Error::Initialization("no companion configured".to_string())
                })?;
                Ok(Box::new(RemoteRecognitionClient::new(companion)?))
            }
            Strategy::Embedded => {
                let path = snapshot
                    .embedded_model_path
                    .clone()
                    .unwrap_or_else(|| self.model_path.clone());
                Ok(Box::new(EmbeddedRecognitionEngine::new(
                    path,
                    self.models.clone(),
                )))
            }
            Strategy::Native => {
                let settings = self.native.clone().ok_or_else(|| {
                    Error::Initialization("no platform recognizer configured".to_string())
                })?;
                Ok(Box::new(NativeRecognitionAdapter::new(settings)))
            }
        }
    }
}
