//! Capability detection
//!
//! Answers, once per orchestrator lifetime, which recognition backends can
//! work on this device: is the companion reachable (and does it have a
//! recognizer), is there a platform recognizer, is an acoustic model packaged.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;

use crate::Result;
use crate::companion::CompanionClient;
use crate::config::Config;

/// What the environment offers, as seen by one probe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapabilitySnapshot {
    /// Companion answered its health check in time with `status: "ok"`
    pub companion_reachable: bool,
    /// Companion did not report its streaming recognizer as unavailable
    pub companion_recognizer: bool,
    /// A platform recognizer executable was found
    pub native_supported: bool,
    /// Packaged acoustic model directory, if present
    pub embedded_model_path: Option<PathBuf>,
}

impl CapabilitySnapshot {
    /// Whether remote streaming recognition is worth trying
    #[must_use]
    pub const fn remote_recognition(&self) -> bool {
        self.companion_reachable && self.companion_recognizer
    }
}

/// Source of capability snapshots
#[async_trait]
pub trait Probe: Send + Sync {
    /// Inspect the environment
    ///
    /// Never fails: anything that errors or times out is reported as absent.
    async fn probe(&self) -> CapabilitySnapshot;
}

/// A fixed snapshot probes as itself
#[async_trait]
impl Probe for CapabilitySnapshot {
    async fn probe(&self) -> CapabilitySnapshot {
        self.clone()
    }
}

/// Probes the companion, the platform recognizer and the model directory
#[derive(Debug, Clone)]
pub struct CapabilityProbe {
    companion: Option<CompanionClient>,
    native_command: Option<String>,
    model_path: Option<PathBuf>,
}

impl CapabilityProbe {
    /// Probe only the given companion
    #[must_use]
    pub const fn new(companion: Option<CompanionClient>) -> Self {
        Self {
            companion,
            native_command: None,
            model_path: None,
        }
    }

    /// Probe everything the configuration names
    ///
    /// # Errors
    ///
    /// Returns error if the companion URL is invalid
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            companion: Some(CompanionClient::new(&config.companion)?),
            native_command: config.recognition.native_command.clone(),
            model_path: Some(config.recognition.model_path.clone()),
        })
    }

    /// Set the platform recognizer to look for
    #[must_use]
    pub fn with_native_command(mut self, command: Option<String>) -> Self {
        self.native_command = command;
        self
    }

    /// Set the acoustic model directory to look for
    #[must_use]
    pub fn with_model_path(mut self, path: Option<PathBuf>) -> Self {
        self.model_path = path;
        self
    }

    /// Returns (reachable, recognizer available)
    async fn check_companion(&self) -> (bool, bool) {
        let Some(client) = &self.companion else {
            return (false, false);
        };

        match client.health().await {
            Ok(health) if health.is_ok() => {
                let recognizer = health.vosk_available.unwrap_or(true);
                tracing::debug!(
                    url = %client.base_url(),
                    service = ?health.service,
                    recognizer,
                    "companion reachable"
                );
                (true, recognizer)
            }
            Ok(health) => {
                tracing::debug!(status = %health.status, "companion unhealthy");
                (false, false)
            }
            Err(e) => {
                tracing::debug!(url = %client.base_url(), error = %e, "companion unreachable");
                (false, false)
            }
        }
    }
}

#[async_trait]
impl Probe for CapabilityProbe {
    async fn probe(&self) -> CapabilitySnapshot {
        let (companion_reachable, companion_recognizer) = self.check_companion().await;

        let native_supported = self
            .native_command
            .as_deref()
            .and_then(find_executable)
            .is_some();

        let embedded_model_path = self
            .model_path
            .as_deref()
            .filter(|p| p.is_dir())
            .map(Path::to_path_buf);

        let snapshot = CapabilitySnapshot {
            companion_reachable,
            companion_recognizer,
            native_supported,
            embedded_model_path,
        };

        tracing::info!(
            companion = snapshot.companion_reachable,
            companion_recognizer = snapshot.companion_recognizer,
            native = snapshot.native_supported,
            model = snapshot.embedded_model_path.is_some(),
            "capability probe complete"
        );

        snapshot
    }
}

/// Resolve an executable by name or path
pub(crate) fn find_executable(command: &str) -> Option<PathBuf> {
    which::which(command).ok()
}
