//! Audio sources feeding the recognizers

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use super::chunk::{
    AudioChunk, CHUNK_FRAMES, ChunkAssembler, ChunkStream, SAMPLE_RATE, chunk_channel,
};
use super::resample::{downmix, resample_all};
use crate::{Error, Result};

/// Something that produces a chunk sequence on demand
///
/// Each `open` starts a fresh sequence; a source that is already open is
/// torn down first. `close` must release the underlying device and is safe
/// to call repeatedly.
#[async_trait]
pub trait AudioSource: Send {
    /// Start producing chunks
    ///
    /// # Errors
    ///
    /// Returns error if the device or file cannot be opened
    async fn open(&mut self) -> Result<ChunkStream>;

    /// Stop producing chunks and release the device
    fn close(&mut self);

    /// Whether a sequence is currently being produced
    fn is_open(&self) -> bool;
}

/// Replays a prerecorded clip as 16 kHz chunks
#[derive(Debug)]
pub struct ClipSource {
    samples: Arc<[f32]>,
    realtime: bool,
    feeder: Option<JoinHandle<()>>,
}

impl ClipSource {
    /// Wrap mono samples recorded at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the clip cannot be resampled to 16 kHz
    pub fn new(samples: &[f32], sample_rate: u32) -> Result<Self> {
        let samples = resample_all(samples, sample_rate, SAMPLE_RATE)?;
        Ok(Self {
            samples: samples.into(),
            realtime: false,
            feeder: None,
        })
    }

    /// Load a WAV file (integer or float samples, any channel count)
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or decoded
    #[allow(clippy::cast_precision_loss)]
    pub fn from_wav(path: &Path) -> Result<Self> {
        let mut reader = hound::WavReader::open(path)
            .map_err(|e| Error::Audio(format!("failed to open {}: {e}", path.display())))?;
        let spec = reader.spec();

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int => {
                let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<f32>, hound::Error>>()
            }
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<f32>, hound::Error>>(),
        }
        .map_err(|e| Error::Audio(format!("failed to decode {}: {e}", path.display())))?;

        let mono = downmix(&interleaved, usize::from(spec.channels));

        tracing::debug!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            frames = mono.len(),
            "loaded audio clip"
        );

        Self::new(&mono, spec.sample_rate)
    }

    /// Pace chunks at playback speed instead of as fast as the consumer reads
    #[must_use]
    pub const fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Number of chunks one pass over the clip produces
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.samples.len().div_ceil(CHUNK_FRAMES)
    }

    fn chunks(&self) -> Vec<AudioChunk> {
        let mut assembler = ChunkAssembler::new();
        let mut chunks = assembler.push(&self.samples);
        chunks.extend(assembler.finish());
        chunks
    }
}

#[async_trait]
impl AudioSource for ClipSource {
    async fn open(&mut self) -> Result<ChunkStream> {
        self.close();

        let (tx, stream) = chunk_channel();
        let chunks = self.chunks();
        let realtime = self.realtime;

        self.feeder = Some(tokio::spawn(async move {
            for chunk in chunks {
                let pace = chunk.duration();
                if !tx.send(chunk).await {
                    break;
                }
                if realtime {
                    tokio::time::sleep(pace).await;
                }
            }
        }));

        Ok(stream)
    }

    fn close(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
    }

    fn is_open(&self) -> bool {
        self.feeder.as_ref().is_some_and(|f| !f.is_finished())
    }
}

impl Drop for ClipSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clip_emits_all_chunks() {
        let mut source = ClipSource::new(&vec![0.5; CHUNK_FRAMES * 3 - 10], SAMPLE_RATE).unwrap();
        assert_eq!(source.chunk_count(), 3);

        let mut stream = source.open().await.unwrap();
        let mut seqs = Vec::new();
        while let Some(chunk) = stream.next().await {
            assert_eq!(chunk.samples.len(), CHUNK_FRAMES);
            seqs.push(chunk.seq);
        }
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_reopen_restarts_sequence() {
        let mut source = ClipSource::new(&vec![0.0; CHUNK_FRAMES * 2], SAMPLE_RATE).unwrap();

        let mut first = source.open().await.unwrap();
        assert_eq!(first.next().await.unwrap().seq, 0);

        let mut second = source.open().await.unwrap();
        assert_eq!(second.next().await.unwrap().seq, 0);

        source.close();
        source.close();
        assert!(!source.is_open());
    }

    #[tokio::test]
    async fn test_from_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");

        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..CHUNK_FRAMES {
            writer.write_sample(i16::MAX).unwrap();
            writer.write_sample(i16::MAX).unwrap();
        }
        writer.finalize().unwrap();

        let mut source = ClipSource::from_wav(&path).unwrap();
        assert_eq!(source.chunk_count(), 1);

        let mut stream = source.open().await.unwrap();
        let chunk = stream.next().await.unwrap();
        assert_eq!(chunk.samples[0], 32766);
        assert!(stream.next().await.is_none());
    }
}
