//! Output engine choice and per-request fallback

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{SpeechBackend, SynthesisEngine, sanitize};
use crate::probe::Probe;
use crate::{Error, Result};

/// Routes speech to the companion or a local synthesizer
///
/// The engine preference follows companion reachability, decided on its own
/// probe independently of recognition. A failed remote request is retried
/// locally for that request only; the next one goes to the companion again.
pub struct SpeechOutputDispatcher {
    remote: Option<Arc<dyn SpeechBackend>>,
    local: Option<Arc<dyn SpeechBackend>>,
    prefer_remote: AtomicBool,
    generation: AtomicU64,
    last: Mutex<Option<SynthesisEngine>>,
}

impl SpeechOutputDispatcher {
    #[must_use]
    pub fn new(
        remote: Option<Arc<dyn SpeechBackend>>,
        local: Option<Arc<dyn SpeechBackend>>,
    ) -> Self {
        let prefer_remote = remote.is_some();
        Self {
            remote,
            local,
            prefer_remote: AtomicBool::new(prefer_remote),
            generation: AtomicU64::new(0),
            last: Mutex::new(None),
        }
    }

    /// Choose the preferred engine from companion reachability
    pub async fn initialize(&self, probe: &dyn Probe) {
        let snapshot = probe.probe().await;
        let prefer_remote = self.remote.is_some() && snapshot.companion_reachable;
        self.prefer_remote.store(prefer_remote, Ordering::SeqCst);
        tracing::info!(engine = %self.current_engine(), "speech output ready");
    }

    /// Speak `text`, interrupting anything still playing
    ///
    /// Returns the engine that took the request, or `None` when nothing was
    /// left to say after sanitizing or a newer request superseded this one.
    ///
    /// # Errors
    ///
    /// Returns `Tts` if no engine could speak the text
    pub async fn speak(&self, text: &str) -> Result<Option<SynthesisEngine>> {
        let text = sanitize(text);
        if text.is_empty() {
            tracing::debug!("nothing to speak after sanitizing");
            return Ok(None);
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.silence().await;

        if self.prefer_remote.load(Ordering::SeqCst)
            && let Some(remote) = &self.remote
        {
            match remote.speak(&text).await {
                Ok(()) if self.superseded(generation) => {
                    tracing::debug!("remote speech finished after being superseded");
                    return Ok(None);
                }
                Ok(()) => return Ok(Some(self.record(SynthesisEngine::Remote))),
                Err(e) => {
                    if self.superseded(generation) {
                        tracing::debug!("remote speech failed after being superseded");
                        return Ok(None);
                    }
                    tracing::warn!(error = %e, "remote speech failed, using local for this request");
                }
            }
        }

        let Some(local) = &self.local else {
            return Err(Error::Tts("no local synthesizer available".to_string()));
        };
        if self.superseded(generation) {
            return Ok(None);
        }
        local.speak(&text).await?;
        if self.superseded(generation) {
            return Ok(None);
        }
        Ok(Some(self.record(SynthesisEngine::Local)))
    }

    /// Silence output and void requests still waiting on the companion
    pub async fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.silence().await;
    }

    /// Wait until local playback finishes
    pub async fn wait(&self) {
        if let Some(local) = &self.local {
            local.wait().await;
        }
    }

    /// Engine the next request will try first
    #[must_use]
    pub fn current_engine(&self) -> SynthesisEngine {
        if self.remote.is_some() && self.prefer_remote.load(Ordering::SeqCst) {
            SynthesisEngine::Remote
        } else {
            SynthesisEngine::Local
        }
    }

    /// Engine that handled the most recent request
    #[must_use]
    pub fn last_engine(&self) -> Option<SynthesisEngine> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn silence(&self) {
        if let Some(remote) = &self.remote {
            remote.cancel().await;
        }
        if let Some(local) = &self.local {
            local.cancel().await;
        }
    }

    fn superseded(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    fn record(&self, engine: SynthesisEngine) -> SynthesisEngine {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(engine);
        engine
    }
}

impl std::fmt::Debug for SpeechOutputDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechOutputDispatcher")
            .field("remote", &self.remote.is_some())
            .field("local", &self.local.is_some())
            .field("engine", &self.current_engine())
            .finish_non_exhaustive()
    }
}
