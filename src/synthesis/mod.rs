//! Speech synthesis
//!
//! [`SpeechOutputDispatcher`] speaks through the companion when it is
//! reachable and through a local synthesizer otherwise, falling back to local
//! for any single request the companion fails.

mod dispatcher;
mod local;
mod remote;
mod sanitize;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

pub use dispatcher::SpeechOutputDispatcher;
pub use local::CommandSpeech;
pub use remote::RemoteSpeech;
pub use sanitize::sanitize;

use crate::Result;

/// Where synthesized speech comes out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisEngine {
    /// The companion device's speaker
    Remote,
    /// A synthesizer on this machine
    Local,
}

impl fmt::Display for SynthesisEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote => write!(f, "remote"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// A synthesis backend
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    fn engine(&self) -> SynthesisEngine;

    /// Start speaking already-sanitized text
    ///
    /// # Errors
    ///
    /// Returns error if the backend could not start speaking
    async fn speak(&self, text: &str) -> Result<()>;

    /// Silence any output in progress
    async fn cancel(&self);

    /// Wait for output in progress to finish
    async fn wait(&self) {}
}
