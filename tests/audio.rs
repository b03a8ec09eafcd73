//! Audio capture and PCM encoding tests

use kiosk_voice::audio::{
    AudioCaptureEncoder, AudioSource, CHUNK_FRAMES, ClipSource, SAMPLE_RATE, float_to_pcm16,
};

mod common;
use common::tone;

#[test]
fn test_pcm_conversion_extremes() {
    assert_eq!(float_to_pcm16(1.0), 32767);
    assert_eq!(float_to_pcm16(-1.0), -32768);
    assert_eq!(float_to_pcm16(0.0), 0);
    assert_eq!(float_to_pcm16(3.5), 32767);
    assert_eq!(float_to_pcm16(-3.5), -32768);
}

#[test]
fn test_stop_twice_without_start() {
    let mut capture = AudioCaptureEncoder::default();
    capture.stop();
    capture.stop();
    assert!(!capture.is_capturing());
}

#[tokio::test]
async fn test_clip_replays_fixed_chunks() {
    let mut clip = ClipSource::new(&tone(3), SAMPLE_RATE).unwrap();
    assert_eq!(clip.chunk_count(), 3);

    let mut chunks = clip.open().await.unwrap();
    assert!(clip.is_open());

    let mut seqs = Vec::new();
    while let Some(chunk) = chunks.next().await {
        assert_eq!(chunk.samples.len(), CHUNK_FRAMES);
        assert_eq!(chunk.to_le_bytes().len(), CHUNK_FRAMES * 2);
        seqs.push(chunk.seq);
    }
    assert_eq!(seqs, vec![0, 1, 2]);

    clip.close();
    clip.close();
    assert!(!clip.is_open());
}

#[test]
fn test_stereo_wav_is_downmixed_and_resampled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("greeting.wav");

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 48_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..48_000_i32 {
        let v = i16::try_from((i % 200) * 50 - 5000).unwrap();
        writer.write_sample(v).unwrap();
        writer.write_sample(v).unwrap();
    }
    writer.finalize().unwrap();

    let clip = ClipSource::from_wav(&path).unwrap();
    assert_eq!(clip.chunk_count(), 16_000_usize.div_ceil(CHUNK_FRAMES));
}
