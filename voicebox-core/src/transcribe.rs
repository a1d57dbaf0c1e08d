//! Transcription backend abstraction.
//!
//! The core never implements speech-to-text. It consumes a
//! [`TranscriptionPort`] capability with two externally supplied variants
//! (local model inference, remote API). Which variant a session uses is
//! decided once, from the session's config snapshot, by [`BackendSelector`] —
//! no runtime type inspection.
//!
//! `&mut self` on `transcribe` expresses that backends are stateful (decoder
//! caches, HTTP connection pools). All mutation is serialised through
//! [`PortHandle`]'s `parking_lot::Mutex`. Calls may block for seconds to tens
//! of seconds; the Coordinator invokes them with no state lock held.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::AudioArtifact;
use crate::config::TranscriptionMode;
use crate::error::Result;

/// Contract for speech-to-text backends.
pub trait TranscriptionPort: Send + 'static {
    /// Convert the recorded artifact to text.
    ///
    /// `language` is `"auto"` or an ISO 639-1 hint from the session's config
    /// snapshot.
    ///
    /// # Errors
    /// `TranscriptionUnavailable` (model not loaded / API unreachable),
    /// `RateLimited`, or `InvalidAudio`.
    fn transcribe(&mut self, audio: &AudioArtifact, language: &str) -> Result<String>;

    /// Cheap readiness probe for `run_diagnostic`.
    fn is_available(&self) -> bool;
}

/// Thread-safe reference-counted handle to any `TranscriptionPort`.
#[derive(Clone)]
pub struct PortHandle(pub Arc<Mutex<dyn TranscriptionPort>>);

impl PortHandle {
    pub fn new<P: TranscriptionPort>(port: P) -> Self {
        Self(Arc::new(Mutex::new(port)))
    }
}

impl std::fmt::Debug for PortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortHandle").finish_non_exhaustive()
    }
}

/// Configuration-driven backend factory: holds both supplied variants and
/// picks one per session from the snapshot's `transcription_mode`.
#[derive(Debug, Clone)]
pub struct BackendSelector {
    local: PortHandle,
    api: PortHandle,
}

impl BackendSelector {
    pub fn new(local: PortHandle, api: PortHandle) -> Self {
        Self { local, api }
    }

    pub fn select(&self, mode: TranscriptionMode) -> PortHandle {
        match mode {
            TranscriptionMode::Local => self.local.clone(),
            TranscriptionMode::Api => self.api.clone(),
        }
    }

    /// Readiness probe that never waits on an in-flight transcription: a
    /// busy port is by definition alive, so a held lock reports available.
    pub fn is_available(&self, mode: TranscriptionMode) -> bool {
        match self.select(mode).0.try_lock() {
            Some(port) => port.is_available(),
            None => true,
        }
    }
}
