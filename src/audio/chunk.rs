//! PCM chunks and the bounded chunk channel

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;

/// Wire sample rate (16 kHz mono)
pub const SAMPLE_RATE: u32 = 16_000;

/// Frames per chunk, fixed for the life of a capture session
pub const CHUNK_FRAMES: usize = 4096;

/// Chunks in flight before the producer starts dropping
const CHANNEL_DEPTH: usize = 4;

/// Fixed-length block of 16-bit signed mono PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Monotonically increasing per capture session, starting at 0
    pub seq: u64,
    pub samples: Vec<i16>,
}

impl AudioChunk {
    /// Little-endian byte payload, as sent on the wire
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Playback duration at [`SAMPLE_RATE`]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(SAMPLE_RATE))
    }
}

/// Convert one float sample to 16-bit PCM
///
/// Negative values scale by 32768 and non-negative by 32767, so -1.0 maps to
/// `i16::MIN` and 1.0 to `i16::MAX`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn float_to_pcm16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Convert a float buffer to 16-bit PCM
#[must_use]
pub fn encode_pcm16(samples: &[f32]) -> Vec<i16> {
    samples.iter().copied().map(float_to_pcm16).collect()
}

/// Root-mean-square level of a chunk in [0, 1]
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let v = f64::from(s) / 32768.0;
            v * v
        })
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Slices a float sample stream into numbered [`CHUNK_FRAMES`]-sized chunks
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    pending: Vec<i16>,
    next_seq: u64,
}

impl ChunkAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Vec::with_capacity(CHUNK_FRAMES),
            next_seq: 0,
        }
    }

    /// Append mono 16 kHz samples, returning every chunk completed by them
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioChunk> {
        let mut ready = Vec::new();
        for &sample in samples {
            self.pending.push(float_to_pcm16(sample));
            if self.pending.len() == CHUNK_FRAMES {
                ready.push(self.emit());
            }
        }
        ready
    }

    /// Zero-pad and emit any buffered remainder
    pub fn finish(&mut self) -> Option<AudioChunk> {
        if self.pending.is_empty() {
            return None;
        }
        self.pending.resize(CHUNK_FRAMES, 0);
        Some(self.emit())
    }

    fn emit(&mut self) -> AudioChunk {
        let samples = std::mem::replace(&mut self.pending, Vec::with_capacity(CHUNK_FRAMES));
        let chunk = AudioChunk {
            seq: self.next_seq,
            samples,
        };
        self.next_seq += 1;
        chunk
    }
}

/// Create the bounded channel between a capture source and a recognizer
#[must_use]
pub fn chunk_channel() -> (ChunkSender, ChunkStream) {
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        ChunkSender {
            tx,
            dropped: dropped.clone(),
            in_burst: false,
        },
        ChunkStream {
            rx: ReceiverStream::new(rx),
            dropped,
        },
    )
}

/// Producer half of the chunk channel
#[derive(Debug)]
pub struct ChunkSender {
    tx: mpsc::Sender<AudioChunk>,
    dropped: Arc<AtomicU64>,
    in_burst: bool,
}

impl ChunkSender {
    /// Hand a chunk to the consumer without waiting
    ///
    /// A chunk that does not fit is dropped. Returns `false` once the
    /// consumer is gone.
    pub fn offer(&mut self, chunk: AudioChunk) -> bool {
        match self.tx.try_send(chunk) {
            Ok(()) => {
                self.in_burst = false;
                true
            }
            Err(TrySendError::Full(chunk)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if !self.in_burst {
                    tracing::warn!(seq = chunk.seq, total, "consumer behind, dropping audio chunks");
                    self.in_burst = true;
                }
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Hand a chunk to the consumer, waiting for room
    ///
    /// Used by file sources where pacing is not tied to hardware.
    pub async fn send(&self, chunk: AudioChunk) -> bool {
        self.tx.send(chunk).await.is_ok()
    }

    /// Whether the consumer has gone away
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half of the chunk channel
///
/// Each chunk is delivered exactly once. The stream ends when the source
/// closes.
#[derive(Debug)]
pub struct ChunkStream {
    rx: ReceiverStream<AudioChunk>,
    dropped: Arc<AtomicU64>,
}

impl ChunkStream {
    /// Next chunk, or `None` once the source is closed
    pub async fn next(&mut self) -> Option<AudioChunk> {
        self.rx.as_mut().recv().await
    }

    /// Blocking variant for decoder threads
    ///
    /// # Panics
    ///
    /// Panics if called from within an async execution context
    pub fn blocking_recv(&mut self) -> Option<AudioChunk> {
        self.rx.as_mut().blocking_recv()
    }

    /// Chunks dropped so far because this consumer fell behind
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Stream for ChunkStream {
    type Item = AudioChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_extremes() {
        assert_eq!(float_to_pcm16(1.0), 32767);
        assert_eq!(float_to_pcm16(-1.0), -32768);
        assert_eq!(float_to_pcm16(0.0), 0);
        assert_eq!(float_to_pcm16(-0.0), 0);
    }

    #[test]
    fn test_pcm_clamps_out_of_range() {
        assert_eq!(float_to_pcm16(1.7), 32767);
        assert_eq!(float_to_pcm16(-3.0), -32768);
        assert_eq!(float_to_pcm16(0.5), 16383);
        assert_eq!(float_to_pcm16(-0.5), -16384);
    }

    #[test]
    fn test_le_bytes() {
        let chunk = AudioChunk {
            seq: 0,
            samples: vec![1, -2, 0x1234],
        };
        assert_eq!(chunk.to_le_bytes(), vec![0x01, 0x00, 0xFE, 0xFF, 0x34, 0x12]);
    }

    #[test]
    fn test_assembler_fixed_size_and_sequence() {
        let mut assembler = ChunkAssembler::new();

        let chunks = assembler.push(&vec![0.25; CHUNK_FRAMES * 2 + 100]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].seq, 0);
        assert_eq!(chunks[1].seq, 1);
        assert!(chunks.iter().all(|c| c.samples.len() == CHUNK_FRAMES));

        let tail = assembler.finish().unwrap();
        assert_eq!(tail.seq, 2);
        assert_eq!(tail.samples.len(), CHUNK_FRAMES);
        assert_eq!(tail.samples[99], float_to_pcm16(0.25));
        assert_eq!(tail.samples[100], 0);

        assert!(assembler.finish().is_none());
    }

    #[tokio::test]
    async fn test_offer_drops_when_full() {
        let (mut tx, mut rx) = chunk_channel();

        for seq in 0..10 {
            assert!(tx.offer(AudioChunk {
                seq,
                samples: vec![0; 4],
            }));
        }

        assert_eq!(rx.dropped(), 10 - CHANNEL_DEPTH as u64);
        assert_eq!(rx.next().await.unwrap().seq, 0);

        drop(rx);
        assert!(!tx.offer(AudioChunk {
            seq: 10,
            samples: vec![],
        }));
    }

    #[tokio::test]
    async fn test_stream_ends_when_sender_closes() {
        use futures::StreamExt;

        let (mut tx, rx) = chunk_channel();
        for seq in 0..3 {
            tx.offer(AudioChunk {
                seq,
                samples: vec![0; 4],
            });
        }
        drop(tx);

        let seqs: Vec<u64> = rx.map(|c| c.seq).collect().await;
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_rms() {
        assert!(rms(&[]).abs() < f32::EPSILON);
        assert!((rms(&[i16::MIN; 8]) - 1.0).abs() < 1e-6);
    }
}
