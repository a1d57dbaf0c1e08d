//! `CpalRecorder` — the real microphone-backed [`AudioCapture`].
//!
//! One recording session maps to one worker thread. The worker opens the
//! cpal device (the stream never crosses a thread boundary), confirms the
//! open back to `start_recording` through a sync channel, then drains the
//! SPSC ring until stopped. `stop_recording` joins the worker, resamples the
//! take to 16 kHz, and writes the WAV artifact into the OS temp directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{error, info, warn};

use crate::audio::resample::RateConverter;
use crate::audio::{
    create_audio_ring, AudioArtifact, AudioCapture, AudioProducer, Consumer, Producer,
    ARTIFACT_SAMPLE_RATE,
};
use crate::error::{Result, VoiceBoxError};

/// Worker drain cadence while the ring is empty.
const DRAIN_INTERVAL: Duration = Duration::from_millis(10);

/// Upper bound on waiting for the device-open confirmation. The perceived
/// start latency is normally a few milliseconds; this only guards against a
/// wedged audio host.
const OPEN_TIMEOUT: Duration = Duration::from_secs(3);

/// Input frames per rubato call when normalizing to 16 kHz.
const RESAMPLE_BLOCK: usize = 1024;

static ARTIFACT_SEQ: AtomicU64 = AtomicU64::new(0);

struct Captured {
    samples: Vec<f32>,
    sample_rate: u32,
}

struct Worker {
    stop: Arc<AtomicBool>,
    result_rx: Receiver<Result<Captured>>,
    handle: JoinHandle<()>,
}

/// Microphone recorder. One open session at most.
pub struct CpalRecorder {
    preferred_device: Option<String>,
    worker: Option<Worker>,
}

impl CpalRecorder {
    pub fn new() -> Self {
        Self {
            preferred_device: None,
            worker: None,
        }
    }

    /// Prefer an input device by exact name, falling back to the default.
    pub fn with_preferred_device(name: impl Into<String>) -> Self {
        Self {
            preferred_device: Some(name.into()),
            worker: None,
        }
    }
}

impl Default for CpalRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioCapture for CpalRecorder {
    fn start_recording(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(VoiceBoxError::AlreadyRecording);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = bounded::<Result<u32>>(1);
        let (result_tx, result_rx) = bounded::<Result<Captured>>(1);

        let worker_stop = Arc::clone(&stop);
        let preferred = self.preferred_device.clone();
        let handle = std::thread::Builder::new()
            .name("voicebox-capture".into())
            .spawn(move || capture_loop(preferred, worker_stop, ready_tx, result_tx))
            .map_err(|e| VoiceBoxError::AudioStream(format!("spawn capture worker: {e}")))?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(sample_rate)) => {
                info!(sample_rate, "recording started");
                self.worker = Some(Worker {
                    stop,
                    result_rx,
                    handle,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                // Worker is wedged inside the audio host; abandon it.
                stop.store(true, Ordering::Release);
                warn!("timed out waiting for input device to open");
                Err(VoiceBoxError::AudioStream(
                    "timed out waiting for input device to open".into(),
                ))
            }
        }
    }

    fn stop_recording(&mut self) -> Result<AudioArtifact> {
        let worker = self.worker.take().ok_or(VoiceBoxError::NotRecording)?;
        worker.stop.store(true, Ordering::Release);

        let captured = worker
            .result_rx
            .recv()
            .map_err(|_| VoiceBoxError::AudioStream("capture worker exited without result".into()))??;
        let _ = worker.handle.join();

        let duration = Duration::from_secs_f64(
            captured.samples.len() as f64 / captured.sample_rate as f64,
        );

        let mut converter =
            RateConverter::new(captured.sample_rate, ARTIFACT_SAMPLE_RATE, RESAMPLE_BLOCK)?;
        let mut pcm = converter.process(&captured.samples);
        pcm.extend(converter.finish());

        let path = artifact_path();
        write_wav(&path, &pcm)?;
        info!(
            path = %path.display(),
            duration_ms = duration.as_millis() as u64,
            "recording finalized"
        );

        Ok(AudioArtifact::new(path, duration, ARTIFACT_SAMPLE_RATE))
    }

    fn is_recording(&self) -> bool {
        self.worker.is_some()
    }

    fn device_available(&self) -> bool {
        cpal::default_host().default_input_device().is_some()
    }
}

fn capture_loop(
    preferred: Option<String>,
    stop: Arc<AtomicBool>,
    ready_tx: Sender<Result<u32>>,
    result_tx: Sender<Result<Captured>>,
) {
    let (producer, mut consumer) = create_audio_ring();

    let (stream, sample_rate) =
        match open_input_stream(preferred.as_deref(), producer, Arc::clone(&stop)) {
            Ok(opened) => {
                let _ = ready_tx.send(Ok(opened.1));
                opened
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };

    let mut samples: Vec<f32> = Vec::new();
    let mut scratch = vec![0f32; 4096];
    while !stop.load(Ordering::Acquire) {
        let popped = consumer.pop_slice(&mut scratch);
        if popped > 0 {
            samples.extend_from_slice(&scratch[..popped]);
        } else {
            std::thread::sleep(DRAIN_INTERVAL);
        }
    }

    // Stream must drop on this thread to release the device.
    drop(stream);

    // Final drain: the callback may have raced the stop flag.
    loop {
        let popped = consumer.pop_slice(&mut scratch);
        if popped == 0 {
            break;
        }
        samples.extend_from_slice(&scratch[..popped]);
    }

    let _ = result_tx.send(Ok(Captured {
        samples,
        sample_rate,
    }));
}

fn open_input_stream(
    preferred: Option<&str>,
    mut producer: AudioProducer,
    stop: Arc<AtomicBool>,
) -> Result<(Stream, u32)> {
    let host = cpal::default_host();

    let mut selected = None;
    if let Some(name) = preferred {
        match host.input_devices() {
            Ok(mut devices) => {
                selected =
                    devices.find(|d| d.name().map(|n| n == name).unwrap_or(false));
                if selected.is_none() {
                    warn!("preferred input device '{name}' not found, falling back");
                }
            }
            Err(e) => warn!("failed to list input devices: {e}"),
        }
    }

    let device = match selected.or_else(|| host.default_input_device()) {
        Some(device) => device,
        None => return Err(VoiceBoxError::DeviceUnavailable),
    };

    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening input device"
    );

    let supported = device
        .default_input_config()
        .map_err(|e| VoiceBoxError::AudioStream(format!("query input config: {e}")))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let ch = channels as usize;

    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stop_f32 = Arc::clone(&stop);
    let stop_i16 = Arc::clone(&stop);
    let stop_u16 = Arc::clone(&stop);

    let stream = match supported.sample_format() {
        SampleFormat::F32 => {
            let mut mono: Vec<f32> = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[f32], _info| {
                    if stop_f32.load(Ordering::Relaxed) {
                        return;
                    }
                    if ch == 1 {
                        push_frames(&mut producer, data);
                        return;
                    }
                    mixdown(data, ch, &mut mono, |s| s);
                    push_frames(&mut producer, &mono);
                },
                |err| error!("audio stream error: {err}"),
                None,
            )
        }

        SampleFormat::I16 => {
            let mut mono: Vec<f32> = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[i16], _info| {
                    if stop_i16.load(Ordering::Relaxed) {
                        return;
                    }
                    mixdown(data, ch, &mut mono, |s| s as f32 / 32768.0);
                    push_frames(&mut producer, &mono);
                },
                |err| error!("audio stream error: {err}"),
                None,
            )
        }

        SampleFormat::U16 => {
            let mut mono: Vec<f32> = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[u16], _info| {
                    if stop_u16.load(Ordering::Relaxed) {
                        return;
                    }
                    mixdown(data, ch, &mut mono, |s| (s as f32 - 32768.0) / 32768.0);
                    push_frames(&mut producer, &mono);
                },
                |err| error!("audio stream error: {err}"),
                None,
            )
        }

        fmt => {
            return Err(VoiceBoxError::AudioStream(format!(
                "unsupported sample format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| VoiceBoxError::AudioStream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| VoiceBoxError::AudioStream(e.to_string()))?;

    Ok((stream, sample_rate))
}

/// Average interleaved frames down to mono into `mono`.
fn mixdown<T: Copy>(data: &[T], ch: usize, mono: &mut Vec<f32>, convert: impl Fn(T) -> f32) {
    let frames = data.len() / ch;
    mono.resize(frames, 0.0);
    for (f, frame) in data.chunks_exact(ch).enumerate() {
        let sum: f32 = frame.iter().map(|s| convert(*s)).sum();
        mono[f] = sum / ch as f32;
    }
}

fn push_frames(producer: &mut AudioProducer, frames: &[f32]) {
    let written = producer.push_slice(frames);
    if written < frames.len() {
        warn!("ring buffer full: dropped {} frames", frames.len() - written);
    }
}

fn artifact_path() -> PathBuf {
    let seq = ARTIFACT_SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("voicebox-{}-{seq}.wav", std::process::id()))
}

fn write_wav(path: &Path, samples: &[f32]) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: ARTIFACT_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| VoiceBoxError::AudioStream(format!("wav create: {e}")))?;
    for sample in samples {
        let quantized = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(quantized)
            .map_err(|e| VoiceBoxError::AudioStream(format!("wav write: {e}")))?;
    }
    writer
        .finalize()
        .map_err(|e| VoiceBoxError::AudioStream(format!("wav finalize: {e}")))?;
    Ok(())
}
