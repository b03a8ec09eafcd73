//! Vosk-backed decoder

use std::path::Path;
use std::sync::Arc;

use vosk::{DecodingState, Model, Recognizer};

use super::{AcousticModel, DecodeStep, Decoder, ModelLoader};
use crate::{Error, Result};

/// Loads Vosk model directories
#[derive(Debug, Clone, Copy, Default)]
pub struct VoskLoader;

impl ModelLoader for VoskLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn AcousticModel>> {
        let model = Model::new(path.to_string_lossy()).ok_or_else(|| {
            Error::Initialization(format!("failed to load model at {}", path.display()))
        })?;
        Ok(Arc::new(VoskModel { model }))
    }
}

struct VoskModel {
    model: Model,
}

impl AcousticModel for VoskModel {
    #[allow(clippy::cast_precision_loss)]
    fn decoder(&self, sample_rate: u32) -> Result<Box<dyn Decoder>> {
        let mut recognizer = Recognizer::new(&self.model, sample_rate as f32)
            .ok_or_else(|| Error::Initialization("failed to create recognizer".to_string()))?;
        recognizer.set_words(true);
        recognizer.set_partial_words(true);
        Ok(Box::new(VoskDecoder { recognizer }))
    }
}

struct VoskDecoder {
    recognizer: Recognizer,
}

impl Decoder for VoskDecoder {
    fn accept(&mut self, samples: &[i16]) -> Result<DecodeStep> {
        let state = self
            .recognizer
            .accept_waveform(samples)
            .map_err(|e| Error::DeviceUnavailable(format!("decoder rejected audio: {e:?}")))?;

        Ok(match state {
            DecodingState::Finalized => {
                let text = self
                    .recognizer
                    .result()
                    .single()
                    .map(|r| r.text.to_string())
                    .unwrap_or_default();
                DecodeStep::Final(text)
            }
            DecodingState::Running => {
                DecodeStep::Partial(self.recognizer.partial_result().partial.to_string())
            }
            DecodingState::Failed => DecodeStep::Pending,
        })
    }

    fn flush(&mut self) -> Option<String> {
        self.recognizer
            .final_result()
            .single()
            .map(|r| r.text.to_string())
    }
}
