//! `Coordinator` — the recording/transcription state machine.
//!
//! ## Lifecycle of one session
//!
//! ```text
//! toggle ──► Idle → Recording          (config snapshot + rule snapshot taken)
//! toggle ──► Recording → Transcribing  (artifact finalized; worker dispatched)
//!            Transcribing → Substituting → Inserting → Idle
//!            any failure → Error → Idle (always; no stuck states)
//! ```
//!
//! ## Threading
//!
//! Three logical threads of control: the hotkey listener (only enqueues
//! intents, see [`crate::hotkey`]), the audio-capture worker (owned by the
//! [`AudioCapture`] implementation), and the Coordinator loop plus the
//! per-session transcription worker it dispatches. The phase lock is held
//! only for transition bookkeeping — capture start/stop, transcription, and
//! injection all run with it released, so overlapping toggles can never
//! corrupt the machine and the listener is never blocked.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, Weak,
};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{AudioArtifact, AudioCapture},
    config::{ConfigSource, TranscriptionMode},
    error::{Result, VoiceBoxError},
    events::{DiagnosticReport, EnginePhase, StatusEvent, StatusSnapshot},
    hotkey::ToggleEvent,
    inject::TextInjector,
    session::{Session, SessionOutcome},
    substitutions::{finalize_transcript, SubstitutionEngine},
    transcribe::{BackendSelector, PortHandle},
};

/// Broadcast channel capacity: status events buffered for slow observers.
const BROADCAST_CAP: usize = 256;

/// Tunables for the coordination engine.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Recordings shorter than this skip transcription entirely (treated as
    /// a no-op, not an error). Default: 300 ms.
    pub min_recording: Duration,
    /// Fixed delay before the single automatic retry of a transient
    /// transcription failure. Default: 500 ms.
    pub retry_delay: Duration,
    /// Bounded wait per transcription attempt; a timed-out attempt counts as
    /// transient and consumes the retry. Default: 60 s.
    pub transcription_timeout: Duration,
    /// Character cap on the transcript excerpt kept in the status snapshot.
    pub transcript_excerpt_chars: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            min_recording: Duration::from_millis(300),
            retry_delay: Duration::from_millis(500),
            transcription_timeout: Duration::from_secs(60),
            transcript_excerpt_chars: 120,
        }
    }
}

/// Shared session counters for observability.
#[derive(Debug, Default)]
pub struct CoordinatorDiagnostics {
    pub sessions_started: AtomicUsize,
    pub sessions_completed: AtomicUsize,
    pub short_recordings_skipped: AtomicUsize,
    pub transcription_retries: AtomicUsize,
    pub transcription_failures: AtomicUsize,
    pub injection_failures: AtomicUsize,
}

impl CoordinatorDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            short_recordings_skipped: self.short_recordings_skipped.load(Ordering::Relaxed),
            transcription_retries: self.transcription_retries.load(Ordering::Relaxed),
            transcription_failures: self.transcription_failures.load(Ordering::Relaxed),
            injection_failures: self.injection_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub sessions_started: usize,
    pub sessions_completed: usize,
    pub short_recordings_skipped: usize,
    pub transcription_retries: usize,
    pub transcription_failures: usize,
    pub injection_failures: usize,
}

/// The coordination engine.
///
/// `Coordinator` is `Send + Sync` — all fields use interior mutability.
/// [`Coordinator::new`] returns an `Arc<Coordinator>`, shared between the
/// intent loop, the per-session worker, and observers.
pub struct Coordinator {
    config: CoordinatorConfig,
    settings: Arc<dyn ConfigSource>,
    capture: Mutex<Box<dyn AudioCapture>>,
    backends: BackendSelector,
    rules: Arc<SubstitutionEngine>,
    injector: Arc<dyn TextInjector>,
    /// Canonical phase. Held only for transition bookkeeping.
    phase: Mutex<EnginePhase>,
    /// Observer-facing snapshot (phase + last error + last transcript).
    status: Mutex<StatusSnapshot>,
    status_tx: broadcast::Sender<StatusEvent>,
    /// The single active (non-terminal) session, if any.
    current: Mutex<Option<Session>>,
    session_seq: AtomicU64,
    running: AtomicBool,
    /// Worker for the in-flight transcription stage, joined on shutdown.
    inflight: Mutex<Option<JoinHandle<()>>>,
    diagnostics: Arc<CoordinatorDiagnostics>,
    /// Self-handle for dispatching the per-session worker.
    weak: Weak<Coordinator>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        settings: Arc<dyn ConfigSource>,
        capture: Box<dyn AudioCapture>,
        backends: BackendSelector,
        rules: Arc<SubstitutionEngine>,
        injector: Arc<dyn TextInjector>,
    ) -> Arc<Self> {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        Arc::new_cyclic(|weak| Self {
            config,
            settings,
            capture: Mutex::new(capture),
            backends,
            rules,
            injector,
            phase: Mutex::new(EnginePhase::Idle),
            status: Mutex::new(StatusSnapshot::default()),
            status_tx,
            current: Mutex::new(None),
            session_seq: AtomicU64::new(0),
            running: AtomicBool::new(true),
            inflight: Mutex::new(None),
            diagnostics: Arc::new(CoordinatorDiagnostics::default()),
            weak: weak.clone(),
        })
    }

    /// Consume toggle intents until [`Coordinator::shutdown`] is called or
    /// every [`crate::hotkey::HotkeyHandle`] is dropped.
    ///
    /// Runs on the caller's thread; spawn it on a dedicated thread (or
    /// `tokio::task::spawn_blocking`) next to the hotkey listener.
    pub fn run(&self, intents: Receiver<ToggleEvent>) {
        info!("coordinator loop started");
        while self.running.load(Ordering::SeqCst) {
            match intents.recv_timeout(Duration::from_millis(100)) {
                Ok(_event) => self.handle_toggle(),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.cancel_active_recording();
        info!("coordinator loop stopped");
    }

    /// Process one toggle intent.
    ///
    /// `Idle` starts a session, `Recording` stops it; a toggle in any later
    /// phase is rejected — never a second concurrent session.
    pub fn handle_toggle(&self) {
        let phase = *self.phase.lock();
        match phase {
            EnginePhase::Idle => self.begin_recording(),
            EnginePhase::Recording => self.finish_recording(),
            other => debug!(phase = ?other, "toggle ignored while busy"),
        }
    }

    /// Stop consuming intents, cancel an active recording, and wait for an
    /// in-flight transcription stage to finish.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.cancel_active_recording();
        if let Some(handle) = self.inflight.lock().take() {
            let _ = handle.join();
        }
    }

    /// Current status (snapshot).
    pub fn status(&self) -> StatusSnapshot {
        self.status.lock().clone()
    }

    /// Current phase only.
    pub fn phase(&self) -> EnginePhase {
        *self.phase.lock()
    }

    /// Subscribe to live phase-transition events.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status_tx.subscribe()
    }

    /// Snapshot of session counters.
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Capability-availability report for the CLI/GUI shell.
    pub fn run_diagnostic(&self) -> DiagnosticReport {
        DiagnosticReport {
            microphone_available: self.capture.lock().device_available(),
            local_backend_available: self.backends.is_available(TranscriptionMode::Local),
            api_backend_available: self.backends.is_available(TranscriptionMode::Api),
        }
    }

    // ── Transitions ──────────────────────────────────────────────────────

    fn begin_recording(&self) {
        let snapshot = self.settings.snapshot();
        // Misconfiguration is caught before recording starts, so a
        // guaranteed-failing cycle never wastes a take.
        if let Err(e) = snapshot.validate() {
            self.report_failure(&e);
            return;
        }

        if !self.claim(EnginePhase::Idle, EnginePhase::Recording) {
            return;
        }

        // Phase lock released; capture start may block briefly.
        let started = self.capture.lock().start_recording();
        match started {
            Ok(()) => {
                {
                    // Cancellation may have reclaimed the phase while the
                    // device was opening; the session then never existed and
                    // the capture must not be left running.
                    let phase = self.phase.lock();
                    if *phase != EnginePhase::Recording {
                        drop(phase);
                        debug!("session aborted before capture settled");
                        self.discard_capture(!snapshot.auto_cleanup_temp_files);
                        return;
                    }
                    let id = self.session_seq.fetch_add(1, Ordering::Relaxed) + 1;
                    info!(session = id, mode = ?snapshot.transcription_mode, "session started");
                    // Stored while still holding the phase lock, so
                    // cancellation cannot interleave between the re-check
                    // and the store.
                    *self.current.lock() =
                        Some(Session::new(id, snapshot, self.rules.snapshot()));
                    self.diagnostics
                        .sessions_started
                        .fetch_add(1, Ordering::Relaxed);
                    // Published under the phase lock so observers never see
                    // Recording after a cancellation's Idle.
                    self.announce(EnginePhase::Recording, None);
                }
            }
            Err(e) => self.report_failure(&e),
        }
    }

    fn finish_recording(&self) {
        if !self.claim(EnginePhase::Recording, EnginePhase::Transcribing) {
            return;
        }

        let stopped = self.capture.lock().stop_recording();
        let Some(mut session) = self.current.lock().take() else {
            // Recording phase without a session means a bug upstream; recover.
            self.report_failure(&VoiceBoxError::NotRecording);
            return;
        };

        let artifact = match stopped {
            Ok(artifact) => artifact,
            Err(e) => {
                session.outcome = Some(SessionOutcome::Failed);
                self.report_failure(&e);
                return;
            }
        };

        if !session.config.auto_cleanup_temp_files {
            artifact.persist();
        }

        if artifact.duration() < self.config.min_recording {
            self.diagnostics
                .short_recordings_skipped
                .fetch_add(1, Ordering::Relaxed);
            session.outcome = Some(SessionOutcome::Cancelled);
            info!(
                session = session.id,
                duration_ms = artifact.duration().as_millis() as u64,
                "recording below minimum duration, skipping transcription"
            );
            self.transition(EnginePhase::Idle, Some("recording too short".into()));
            return; // artifact drops here → file cleaned up
        }

        session.artifact = Some(Arc::new(artifact));
        self.announce(EnginePhase::Transcribing, None);

        let Some(this) = self.weak.upgrade() else {
            return;
        };
        let spawned = std::thread::Builder::new()
            .name("voicebox-session".into())
            .spawn(move || this.transcribe_and_insert(session));
        match spawned {
            Ok(handle) => {
                *self.inflight.lock() = Some(handle);
            }
            Err(e) => self.report_failure(&VoiceBoxError::Other(anyhow::anyhow!(
                "spawn session worker: {e}"
            ))),
        }
    }

    /// Runs on the per-session worker thread. The hotkey path is already
    /// free again; toggles during this stage are rejected by phase gating.
    fn transcribe_and_insert(&self, mut session: Session) {
        let transcript = self.run_transcription(&session);

        // Transcription is over, success or failure — release the artifact
        // now. (A timed-out attempt may briefly hold a second reference; the
        // file is removed as soon as that call returns.)
        session.release_artifact();

        let raw = match transcript {
            Ok(raw) => raw,
            Err(e) => {
                self.diagnostics
                    .transcription_failures
                    .fetch_add(1, Ordering::Relaxed);
                session.outcome = Some(SessionOutcome::Failed);
                error!(session = session.id, "transcription failed: {e}");
                self.report_failure(&e);
                return;
            }
        };

        self.transition(EnginePhase::Substituting, None);
        let text = finalize_transcript(&session.rules.apply(&raw));
        if text.is_empty() {
            session.outcome = Some(SessionOutcome::Cancelled);
            info!(session = session.id, "empty transcript, nothing to insert");
            self.transition(EnginePhase::Idle, Some("no speech detected".into()));
            return;
        }

        self.transition(EnginePhase::Inserting, None);
        match self
            .injector
            .insert(&text, session.config.text_insertion_method)
        {
            Ok(()) => {
                info!(session = session.id, chars = text.len(), "text inserted");
                session.text = Some(text.clone());
                session.outcome = Some(SessionOutcome::Success);
                self.diagnostics
                    .sessions_completed
                    .fetch_add(1, Ordering::Relaxed);
                {
                    let mut status = self.status.lock();
                    status.last_transcript =
                        Some(excerpt(&text, self.config.transcript_excerpt_chars));
                    status.last_error = None;
                }
                self.transition(EnginePhase::Idle, None);
            }
            Err(e) => {
                // Reported, not re-queued — the user re-records.
                self.diagnostics
                    .injection_failures
                    .fetch_add(1, Ordering::Relaxed);
                session.outcome = Some(SessionOutcome::Failed);
                let failure = match e {
                    e @ VoiceBoxError::InjectionFailed(_) => e,
                    other => VoiceBoxError::InjectionFailed(other.to_string()),
                };
                self.report_failure(&failure);
            }
        }
    }

    /// One transcription with the retry policy: transient failures get
    /// exactly one automatic retry after a fixed delay.
    fn run_transcription(&self, session: &Session) -> Result<String> {
        let artifact = session.artifact.clone().ok_or_else(|| {
            VoiceBoxError::InvalidAudio("session has no audio artifact".into())
        })?;
        let port = self.backends.select(session.config.transcription_mode);
        let language = session.config.transcription_language.clone();

        match self.attempt(port.clone(), Arc::clone(&artifact), language.clone()) {
            Ok(text) => Ok(text),
            Err(e) if e.is_transient() => {
                self.diagnostics
                    .transcription_retries
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    session = session.id,
                    "transient transcription failure, retrying once: {e}"
                );
                std::thread::sleep(self.config.retry_delay);
                self.attempt(port, artifact, language)
            }
            Err(e) => Err(e),
        }
    }

    /// A single backend call under a bounded wait. The port may block for
    /// tens of seconds; no Coordinator lock is held across it.
    fn attempt(
        &self,
        port: PortHandle,
        audio: Arc<AudioArtifact>,
        language: String,
    ) -> Result<String> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        std::thread::Builder::new()
            .name("voicebox-transcribe".into())
            .spawn(move || {
                let result = port.0.lock().transcribe(&audio, &language);
                let _ = tx.send(result);
            })
            .map_err(|e| {
                VoiceBoxError::Other(anyhow::anyhow!("spawn transcription attempt: {e}"))
            })?;

        match rx.recv_timeout(self.config.transcription_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(VoiceBoxError::TranscriptionUnavailable {
                reason: format!(
                    "no response within {:?}",
                    self.config.transcription_timeout
                ),
                transient: true,
            }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(VoiceBoxError::TranscriptionUnavailable {
                    reason: "transcription worker panicked".into(),
                    transient: false,
                })
            }
        }
    }

    fn cancel_active_recording(&self) {
        if !self.claim(EnginePhase::Recording, EnginePhase::Idle) {
            return;
        }
        let session = self.current.lock().take();
        let keep = match &session {
            Some(session) => !session.config.auto_cleanup_temp_files,
            // A start racing this cancellation may not have stored its
            // session yet; fall back to the live settings for the policy.
            None => !self.settings.snapshot().auto_cleanup_temp_files,
        };
        // Keyed on the capture state, not the session object: the capture
        // can be live before the session is stored.
        self.discard_capture(keep);
        if let Some(mut session) = session {
            session.outcome = Some(SessionOutcome::Cancelled);
        }
        self.announce(EnginePhase::Idle, Some("recording cancelled".into()));
    }

    /// Stop and drop a capture that no session owns. The artifact is
    /// discarded subject to the keep-temp-files policy.
    fn discard_capture(&self, keep: bool) {
        let mut capture = self.capture.lock();
        if !capture.is_recording() {
            return;
        }
        match capture.stop_recording() {
            Ok(artifact) => {
                if keep {
                    artifact.persist();
                }
            }
            Err(e) => warn!("failed to stop orphaned capture: {e}"),
        }
    }

    // ── Bookkeeping helpers ──────────────────────────────────────────────

    /// Atomically advance `from → to`. Returns `false` when another path won
    /// the race; callers then simply drop the intent.
    fn claim(&self, from: EnginePhase, to: EnginePhase) -> bool {
        let mut phase = self.phase.lock();
        let current = *phase;
        if current != from {
            debug!(?current, requested = ?to, "transition rejected");
            return false;
        }
        *phase = to;
        true
    }

    /// Unconditional transition + publication.
    fn transition(&self, to: EnginePhase, detail: Option<String>) {
        *self.phase.lock() = to;
        self.announce(to, detail);
    }

    /// Publish the current phase to the status snapshot and observers.
    fn announce(&self, phase: EnginePhase, detail: Option<String>) {
        self.status.lock().phase = phase;
        let _ = self.status_tx.send(StatusEvent { phase, detail });
    }

    /// Error policy: record, publish `Error`, then auto-return to `Idle`.
    /// No error kind is fatal to the process.
    fn report_failure(&self, err: &VoiceBoxError) {
        let message = err.to_string();
        warn!("session failed: {message}");
        self.status.lock().last_error = Some(message.clone());
        self.transition(EnginePhase::Error, Some(message));
        self.transition(EnginePhase::Idle, None);
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('\u{2026}');
    out
}
