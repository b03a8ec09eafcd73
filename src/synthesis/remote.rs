//! Companion speaker

use async_trait::async_trait;

use super::{SpeechBackend, SynthesisEngine};
use crate::Result;
use crate::companion::CompanionClient;

/// Speaks through the companion's `/speak` endpoint
#[derive(Debug, Clone)]
pub struct RemoteSpeech {
    client: CompanionClient,
}

impl RemoteSpeech {
    #[must_use]
    pub const fn new(client: CompanionClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SpeechBackend for RemoteSpeech {
    fn engine(&self) -> SynthesisEngine {
        SynthesisEngine::Remote
    }

    async fn speak(&self, text: &str) -> Result<()> {
        self.client.speak(text).await?;
        Ok(())
    }

    async fn cancel(&self) {
        // The companion has no way to interrupt playback
        tracing::trace!("remote speech cannot be interrupted");
    }
}
