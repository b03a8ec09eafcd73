//! Audio input
//!
//! Everything downstream of the microphone speaks one format: 16 kHz mono
//! signed 16-bit PCM in fixed [`CHUNK_FRAMES`]-frame chunks.

mod capture;
mod chunk;
mod resample;
mod source;

pub use capture::AudioCaptureEncoder;
pub use chunk::{
    AudioChunk, CHUNK_FRAMES, ChunkAssembler, ChunkSender, ChunkStream, SAMPLE_RATE,
    chunk_channel, encode_pcm16, float_to_pcm16, rms,
};
pub use resample::{StreamResampler, downmix, resample_all};
pub use source::{AudioSource, ClipSource};
