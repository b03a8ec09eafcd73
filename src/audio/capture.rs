//! Microphone capture and PCM encoding

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig};
use tokio::sync::oneshot;

use super::chunk::{ChunkAssembler, ChunkSender, ChunkStream, SAMPLE_RATE, chunk_channel};
use super::resample::{StreamResampler, downmix};
use super::source::AudioSource;
use crate::config::CaptureHints;
use crate::{Error, Result};

/// Captures the default input device as 16 kHz mono PCM chunks
///
/// The hardware stream lives on a dedicated thread for the duration of a
/// capture session. Joining that thread always happens on the blocking pool
/// when a runtime is present; [`start`](Self::start) waits for the previous
/// thread so the device is free before it is reopened.
#[derive(Debug)]
pub struct AudioCaptureEncoder {
    hints: CaptureHints,
    hints_reported: bool,
    worker: Option<CaptureWorker>,
}

#[derive(Debug)]
struct CaptureWorker {
    stop_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl CaptureWorker {
    /// Tell the thread to drop its stream, handing back the thread to join
    fn signal(self) -> JoinHandle<()> {
        let _ = self.stop_tx.send(());
        self.thread
    }
}

fn join_capture_thread(thread: JoinHandle<()>) {
    if thread.join().is_err() {
        tracing::warn!("audio capture thread panicked");
    }
}

async fn join_off_runtime(thread: JoinHandle<()>) {
    if tokio::task::spawn_blocking(move || join_capture_thread(thread))
        .await
        .is_err()
    {
        tracing::warn!("audio capture join task failed");
    }
}

impl AudioCaptureEncoder {
    #[must_use]
    pub const fn new(hints: CaptureHints) -> Self {
        Self {
            hints,
            hints_reported: false,
            worker: None,
        }
    }

    /// Open the microphone and start producing chunks
    ///
    /// Any capture already running is stopped first.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if there is no usable input device
    pub async fn start(&mut self) -> Result<ChunkStream> {
        if let Some(worker) = self.worker.take() {
            join_off_runtime(worker.signal()).await;
        }
        self.report_hints();

        let (sender, stream) = chunk_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || capture_thread(sender, ready_tx, &stop_rx))?;

        match ready_rx.await {
            Ok(Ok(device_rate)) => {
                tracing::debug!(device_rate, target_rate = SAMPLE_RATE, "audio capture started");
                self.worker = Some(CaptureWorker { stop_tx, thread });
                Ok(stream)
            }
            Ok(Err(e)) => {
                join_off_runtime(thread).await;
                Err(e)
            }
            Err(_) => {
                join_off_runtime(thread).await;
                Err(Error::DeviceUnavailable(
                    "capture thread exited before opening the device".to_string(),
                ))
            }
        }
    }

    /// Stop capturing and release the device
    ///
    /// Safe to call when nothing is running. Inside a runtime the capture
    /// thread is joined on the blocking pool, so this never blocks a worker;
    /// outside one it is joined inline.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        let thread = worker.signal();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || join_capture_thread(thread));
            }
            Err(_) => join_capture_thread(thread),
        }
        tracing::debug!("audio capture stopped");
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }

    fn report_hints(&mut self) {
        let CaptureHints {
            echo_cancellation,
            noise_suppression,
            auto_gain_control,
        } = self.hints;

        if !self.hints_reported && (echo_cancellation || noise_suppression || auto_gain_control) {
            tracing::warn!(
                echo_cancellation,
                noise_suppression,
                auto_gain_control,
                "input processing hints are not supported by the host audio layer, capturing raw input"
            );
            self.hints_reported = true;
        }
    }
}

impl Default for AudioCaptureEncoder {
    fn default() -> Self {
        Self::new(CaptureHints::default())
    }
}

impl Drop for AudioCaptureEncoder {
    fn drop(&mut self) {
        self.stop();
    }
}

#[async_trait]
impl AudioSource for AudioCaptureEncoder {
    async fn open(&mut self) -> Result<ChunkStream> {
        self.start().await
    }

    fn close(&mut self) {
        self.stop();
    }

    fn is_open(&self) -> bool {
        self.is_capturing()
    }
}

/// Owns the hardware stream until told to stop
fn capture_thread(
    sender: ChunkSender,
    ready: oneshot::Sender<Result<u32>>,
    stop_rx: &std_mpsc::Receiver<()>,
) {
    let (stream, rate) = match open_stream(sender) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if ready.send(Ok(rate)).is_err() {
        return;
    }

    // Returns on an explicit stop or when the encoder is gone
    let _ = stop_rx.recv();
    drop(stream);
}

fn open_stream(sender: ChunkSender) -> Result<(Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

    let (config, format) = choose_config(&device)?;
    let rate = config.sample_rate.0;

    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        sample_rate = rate,
        channels = config.channels,
        format = ?format,
        "opening input stream"
    );

    let pipeline = Pipeline::new(sender, usize::from(config.channels), rate)?;

    let stream = match format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, pipeline)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, pipeline)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, pipeline)?,
        SampleFormat::I32 => build_stream::<i32>(&device, &config, pipeline)?,
        other => {
            return Err(Error::DeviceUnavailable(format!(
                "unsupported input sample format: {other:?}"
            )));
        }
    };

    stream
        .play()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    Ok((stream, rate))
}

/// Prefer a native 16 kHz mono config, else the device default
fn choose_config(device: &Device) -> Result<(StreamConfig, SampleFormat)> {
    let native = device.supported_input_configs().ok().and_then(|mut configs| {
        configs.find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
    });

    if let Some(range) = native {
        let supported = range.with_sample_rate(SampleRate(SAMPLE_RATE));
        return Ok((supported.config(), supported.sample_format()));
    }

    let fallback = device
        .default_input_config()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
    tracing::debug!(
        sample_rate = fallback.sample_rate().0,
        channels = fallback.channels(),
        "no native 16 kHz mono input, resampling"
    );
    Ok((fallback.config(), fallback.sample_format()))
}

fn build_stream<T>(device: &Device, config: &StreamConfig, mut pipeline: Pipeline) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|&s| f32::from_sample(s)));
                pipeline.feed(&scratch);
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))
}

/// Down-mix, resample and chunk inside the device callback
struct Pipeline {
    sender: ChunkSender,
    channels: usize,
    resampler: Option<StreamResampler>,
    assembler: ChunkAssembler,
    closed: bool,
}

impl Pipeline {
    fn new(sender: ChunkSender, channels: usize, device_rate: u32) -> Result<Self> {
        let resampler = if device_rate == SAMPLE_RATE {
            None
        } else {
            Some(StreamResampler::new(device_rate, SAMPLE_RATE)?)
        };

        Ok(Self {
            sender,
            channels,
            resampler,
            assembler: ChunkAssembler::new(),
            closed: false,
        })
    }

    fn feed(&mut self, interleaved: &[f32]) {
        if self.closed {
            return;
        }

        let mono = downmix(interleaved, self.channels);
        let samples = match &mut self.resampler {
            Some(resampler) => match resampler.process(&mono) {
                Ok(samples) => samples,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping capture buffer");
                    return;
                }
            },
            None => mono,
        };

        for chunk in self.assembler.push(&samples) {
            if !self.sender.offer(chunk) {
                self.closed = true;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    use super::*;
    use crate::audio::{CHUNK_FRAMES, float_to_pcm16};

    #[test]
    fn test_stop_without_start() {
        let mut encoder = AudioCaptureEncoder::default();
        encoder.stop();
        encoder.stop();
        assert!(!encoder.is_capturing());
    }

    #[tokio::test]
    async fn test_pipeline_chunks_and_downmixes() {
        let (sender, mut stream) = chunk_channel();
        let mut pipeline = Pipeline::new(sender, 2, SAMPLE_RATE).unwrap();

        let stereo: Vec<f32> = [1.0_f32, 0.0].repeat(CHUNK_FRAMES);
        pipeline.feed(&stereo);

        let chunk = stream.next().await.unwrap();
        assert_eq!(chunk.seq, 0);
        assert_eq!(chunk.samples[0], float_to_pcm16(0.5));
    }

    /// A worker whose thread lingers after being told to stop
    fn slow_worker(linger: Duration) -> (CaptureWorker, Arc<AtomicBool>) {
        let done = Arc::new(AtomicBool::new(false));
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let flag = done.clone();
        let thread = std::thread::spawn(move || {
            let _ = stop_rx.recv();
            std::thread::sleep(linger);
            flag.store(true, Ordering::SeqCst);
        });
        (CaptureWorker { stop_tx, thread }, done)
    }

    #[tokio::test]
    async fn test_stop_does_not_block_runtime() {
        let (worker, done) = slow_worker(Duration::from_millis(400));
        let mut encoder = AudioCaptureEncoder::default();
        encoder.worker = Some(worker);

        let started = Instant::now();
        encoder.stop();
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(!encoder.is_capturing());

        tokio::time::timeout(Duration::from_secs(5), async {
            while !done.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_restart_waits_for_previous_thread() {
        let (worker, done) = slow_worker(Duration::from_millis(100));
        join_off_runtime(worker.signal()).await;
        assert!(done.load(Ordering::SeqCst));
    }
}
