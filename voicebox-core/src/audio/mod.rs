//! Audio capture session ownership.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not** allocate, block on a mutex, or perform I/O. The real
//! recorder satisfies that by pushing mono samples into a lock-free SPSC ring
//! buffer; a dedicated worker thread drains the ring until stopped.
//!
//! `cpal::Stream` is `!Send` on Windows/macOS, so the stream is created and
//! dropped entirely inside the worker thread; the [`AudioCapture`] handle the
//! Coordinator holds is plain `Send` data.

pub mod resample;

#[cfg(feature = "audio-cpal")]
pub mod recorder;

#[cfg(feature = "audio-cpal")]
pub use recorder::CpalRecorder;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ringbuf::{traits::Split, HeapRb};
use tracing::{debug, warn};

use crate::error::Result;

pub use ringbuf::traits::{Consumer, Producer};

/// Producer half — held by the audio callback.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half — held by the capture worker thread.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Ring capacity: 2^20 f32 samples ≈ 21.8 s at 48 kHz. The worker drains
/// every few milliseconds, so this only has to absorb scheduling hiccups.
pub const RING_CAPACITY: usize = 1 << 20;

/// Sample rate every finalized artifact is normalized to.
pub const ARTIFACT_SAMPLE_RATE: u32 = 16_000;

/// Create a matched producer/consumer pair for one recording session.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}

/// A finalized recording: 16 kHz mono 16-bit WAV on disk.
///
/// The file is deleted when the last handle drops, which makes cleanup hold
/// on every exit path — success, failure, cancellation, panic unwind.
/// [`AudioArtifact::persist`] disarms deletion for the "keep temp files"
/// policy.
#[derive(Debug)]
pub struct AudioArtifact {
    path: PathBuf,
    duration: Duration,
    sample_rate: u32,
    keep: AtomicBool,
}

impl AudioArtifact {
    pub fn new(path: PathBuf, duration: Duration, sample_rate: u32) -> Self {
        Self {
            path,
            duration,
            sample_rate,
            keep: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recorded duration (wall-clock of the captured audio).
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Keep the file on disk after the artifact drops.
    pub fn persist(&self) {
        self.keep.store(true, Ordering::Relaxed);
    }

    pub fn is_persisted(&self) -> bool {
        self.keep.load(Ordering::Relaxed)
    }
}

impl Drop for AudioArtifact {
    fn drop(&mut self) {
        if self.keep.load(Ordering::Relaxed) {
            debug!(path = %self.path.display(), "keeping audio artifact");
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), "failed to remove audio artifact: {e}");
            }
        }
    }
}

/// One recording session at a time, owned by the Coordinator.
///
/// `start_recording` must return quickly (sub-100 ms perceived latency);
/// capture itself runs on a dedicated worker so the caller thread is never
/// blocked for the recording's duration.
pub trait AudioCapture: Send {
    /// Begin streaming into a fresh buffer.
    ///
    /// # Errors
    /// `DeviceUnavailable` if no input device can be opened,
    /// `AlreadyRecording` if a session is open.
    fn start_recording(&mut self) -> Result<()>;

    /// Finalize the artifact and report its duration.
    ///
    /// # Errors
    /// `NotRecording` if no session is open.
    fn stop_recording(&mut self) -> Result<AudioArtifact>;

    /// Non-blocking status read.
    fn is_recording(&self) -> bool;

    /// Probe used by `run_diagnostic`: can a capture device be opened now?
    fn device_available(&self) -> bool;
}
