//! End-to-end coordination tests with scripted capabilities.
//!
//! Everything below the Coordinator is faked: a recorder that writes real
//! temp files (so cleanup is observable), a transcription port that replays
//! a script, and an injector that records what it was asked to type.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use voicebox_core::{
    audio::{AudioArtifact, AudioCapture},
    config::{ConfigSnapshot, InMemoryConfig, InsertionMethod, TranscriptionMode},
    coordinator::{Coordinator, CoordinatorConfig},
    error::{Result, VoiceBoxError},
    events::EnginePhase,
    hotkey::toggle_channel,
    inject::TextInjector,
    substitutions::SubstitutionEngine,
    transcribe::{BackendSelector, PortHandle, TranscriptionPort},
};

const DEADLINE: Duration = Duration::from_secs(5);

fn wait_until(mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + DEADLINE;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

// ── Fakes ────────────────────────────────────────────────────────────────

static ARTIFACT_SEQ: AtomicU64 = AtomicU64::new(0);

struct FakeRecorder {
    recording: bool,
    duration: Duration,
    fail_starts: usize,
    starts: Arc<AtomicUsize>,
    paths: Arc<Mutex<Vec<PathBuf>>>,
}

impl FakeRecorder {
    fn new(
        duration: Duration,
        fail_starts: usize,
    ) -> (Self, Arc<AtomicUsize>, Arc<Mutex<Vec<PathBuf>>>) {
        let starts = Arc::new(AtomicUsize::new(0));
        let paths = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                recording: false,
                duration,
                fail_starts,
                starts: Arc::clone(&starts),
                paths: Arc::clone(&paths),
            },
            starts,
            paths,
        )
    }
}

impl AudioCapture for FakeRecorder {
    fn start_recording(&mut self) -> Result<()> {
        if self.recording {
            return Err(VoiceBoxError::AlreadyRecording);
        }
        if self.fail_starts > 0 {
            self.fail_starts -= 1;
            return Err(VoiceBoxError::DeviceUnavailable);
        }
        self.recording = true;
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<AudioArtifact> {
        if !self.recording {
            return Err(VoiceBoxError::NotRecording);
        }
        self.recording = false;
        let path = std::env::temp_dir().join(format!(
            "voicebox-flow-{}-{}.wav",
            std::process::id(),
            ARTIFACT_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&path, b"RIFF")?;
        self.paths.lock().push(path.clone());
        Ok(AudioArtifact::new(path, self.duration, 16_000))
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn device_available(&self) -> bool {
        true
    }
}

struct ScriptedPort {
    script: VecDeque<Result<String>>,
    calls: Arc<AtomicUsize>,
    languages: Arc<Mutex<Vec<String>>>,
    delay: Duration,
}

impl ScriptedPort {
    fn new(script: Vec<Result<String>>) -> (Self, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let languages = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                script: script.into(),
                calls: Arc::clone(&calls),
                languages: Arc::clone(&languages),
                delay: Duration::ZERO,
            },
            calls,
            languages,
        )
    }
}

impl TranscriptionPort for ScriptedPort {
    fn transcribe(&mut self, _audio: &AudioArtifact, language: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.languages.lock().push(language.to_string());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.script.pop_front().unwrap_or_else(|| Ok(String::new()))
    }

    fn is_available(&self) -> bool {
        true
    }
}

struct FakeInjector {
    inserted: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl FakeInjector {
    fn new(fail: bool) -> (Self, Arc<Mutex<Vec<String>>>) {
        let inserted = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                inserted: Arc::clone(&inserted),
                fail,
            },
            inserted,
        )
    }
}

impl TextInjector for FakeInjector {
    fn insert(&self, text: &str, _method: InsertionMethod) -> Result<()> {
        if self.fail {
            return Err(VoiceBoxError::InjectionFailed("no focused window".into()));
        }
        self.inserted.lock().push(text.to_string());
        Ok(())
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

struct Harness {
    coordinator: Arc<Coordinator>,
    source: Arc<InMemoryConfig>,
    starts: Arc<AtomicUsize>,
    artifact_paths: Arc<Mutex<Vec<PathBuf>>>,
    port_calls: Arc<AtomicUsize>,
    languages: Arc<Mutex<Vec<String>>>,
    inserted: Arc<Mutex<Vec<String>>>,
}

struct HarnessOptions {
    recording: Duration,
    port_delay: Duration,
    fail_injection: bool,
    failing_starts: usize,
    transcription_timeout: Duration,
    config: ConfigSnapshot,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            recording: Duration::from_secs(2),
            port_delay: Duration::ZERO,
            fail_injection: false,
            failing_starts: 0,
            transcription_timeout: Duration::from_secs(2),
            config: ConfigSnapshot::default(),
        }
    }
}

fn harness(script: Vec<Result<String>>, options: HarnessOptions) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let (recorder, starts, artifact_paths) =
        FakeRecorder::new(options.recording, options.failing_starts);
    let (mut port, port_calls, languages) = ScriptedPort::new(script);
    port.delay = options.port_delay;
    let (injector, inserted) = FakeInjector::new(options.fail_injection);

    let source = Arc::new(InMemoryConfig::new(options.config));
    // Same port for both modes; the selector routing is covered elsewhere.
    let handle = PortHandle::new(port);
    let backends = BackendSelector::new(handle.clone(), handle);

    let coordinator = Coordinator::new(
        CoordinatorConfig {
            min_recording: Duration::from_millis(300),
            retry_delay: Duration::from_millis(10),
            transcription_timeout: options.transcription_timeout,
            transcript_excerpt_chars: 120,
        },
        Arc::clone(&source) as Arc<dyn voicebox_core::config::ConfigSource>,
        Box::new(recorder),
        backends,
        Arc::new(SubstitutionEngine::with_defaults()),
        Arc::new(injector),
    );

    Harness {
        coordinator,
        source,
        starts,
        artifact_paths,
        port_calls,
        languages,
        inserted,
    }
}

fn record_one_cycle(h: &Harness) {
    h.coordinator.handle_toggle();
    assert!(
        wait_until(|| h.coordinator.phase() == EnginePhase::Recording),
        "recording should start"
    );
    h.coordinator.handle_toggle();
}

fn wait_idle(h: &Harness) {
    assert!(
        wait_until(|| h.coordinator.phase() == EnginePhase::Idle),
        "coordinator should return to idle, got {:?}",
        h.coordinator.phase()
    );
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[test]
fn dictation_cycle_transcribes_substitutes_and_inserts() {
    let h = harness(
        vec![Ok("i am using superbase".into())],
        HarnessOptions::default(),
    );

    record_one_cycle(&h);
    assert!(wait_until(|| !h.inserted.lock().is_empty()));
    wait_idle(&h);

    assert_eq!(h.inserted.lock().as_slice(), ["I am using Supabase"]);
    assert_eq!(h.port_calls.load(Ordering::SeqCst), 1);

    let status = h.coordinator.status();
    assert_eq!(status.last_transcript.as_deref(), Some("I am using Supabase"));
    assert!(status.last_error.is_none());

    let diag = h.coordinator.diagnostics();
    assert_eq!(diag.sessions_started, 1);
    assert_eq!(diag.sessions_completed, 1);
    assert_eq!(diag.transcription_retries, 0);

    // Temp audio is gone once the cycle finished.
    let paths = h.artifact_paths.lock();
    assert_eq!(paths.len(), 1);
    assert!(wait_until(|| !paths[0].exists()), "artifact must be cleaned up");
}

#[test]
fn toggles_while_busy_never_start_a_second_session() {
    let mut options = HarnessOptions::default();
    options.port_delay = Duration::from_millis(500);
    let h = harness(vec![Ok("first take".into()), Ok("second take".into())], options);

    record_one_cycle(&h);
    // Storm the coordinator while transcription is in flight.
    for _ in 0..10 {
        h.coordinator.handle_toggle();
        std::thread::sleep(Duration::from_millis(10));
    }

    assert!(wait_until(|| !h.inserted.lock().is_empty()));
    wait_idle(&h);

    assert_eq!(
        h.starts.load(Ordering::SeqCst),
        1,
        "busy-phase toggles must be rejected"
    );
    assert_eq!(h.port_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.coordinator.diagnostics().sessions_started, 1);

    // Once idle again, the next toggle starts a fresh session.
    record_one_cycle(&h);
    assert!(wait_until(|| h.inserted.lock().len() == 2));
    assert_eq!(h.coordinator.diagnostics().sessions_started, 2);
}

#[test]
fn short_recording_is_discarded_without_transcription() {
    let mut options = HarnessOptions::default();
    options.recording = Duration::from_millis(50);
    let h = harness(vec![Ok("should never be used".into())], options);

    record_one_cycle(&h);
    wait_idle(&h);
    assert!(wait_until(|| {
        h.coordinator.diagnostics().short_recordings_skipped == 1
    }));

    assert_eq!(h.port_calls.load(Ordering::SeqCst), 0, "backend must not run");
    assert!(h.inserted.lock().is_empty());
    assert!(
        h.coordinator.status().last_error.is_none(),
        "a short take is a no-op, not an error"
    );

    let paths = h.artifact_paths.lock();
    assert!(!paths[0].exists(), "short-take audio must be cleaned up");
}

#[test]
fn transient_failure_is_retried_exactly_once() {
    let h = harness(
        vec![
            Err(VoiceBoxError::RateLimited),
            Ok("hello world".into()),
        ],
        HarnessOptions::default(),
    );

    record_one_cycle(&h);
    assert!(wait_until(|| !h.inserted.lock().is_empty()));
    wait_idle(&h);

    assert_eq!(h.port_calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.inserted.lock().as_slice(), ["Hello world"]);

    let diag = h.coordinator.diagnostics();
    assert_eq!(diag.transcription_retries, 1);
    assert_eq!(diag.transcription_failures, 0);
    assert_eq!(diag.sessions_completed, 1);
}

#[test]
fn second_transient_failure_surfaces_and_cleans_up() {
    let h = harness(
        vec![
            Err(VoiceBoxError::TranscriptionUnavailable {
                reason: "api unreachable".into(),
                transient: true,
            }),
            Err(VoiceBoxError::TranscriptionUnavailable {
                reason: "api unreachable".into(),
                transient: true,
            }),
        ],
        HarnessOptions::default(),
    );

    record_one_cycle(&h);
    assert!(wait_until(|| {
        h.coordinator.diagnostics().transcription_failures == 1
    }));
    wait_idle(&h);

    assert_eq!(h.port_calls.load(Ordering::SeqCst), 2, "one retry, then stop");
    assert!(h.inserted.lock().is_empty());

    let status = h.coordinator.status();
    assert!(
        status.last_error.as_deref().is_some_and(|e| e.contains("api unreachable")),
        "failure must be observable: {:?}",
        status.last_error
    );

    let paths = h.artifact_paths.lock();
    assert!(wait_until(|| !paths[0].exists()), "failed-session audio must be cleaned up");
}

#[test]
fn permanent_failure_is_not_retried() {
    let h = harness(
        vec![Err(VoiceBoxError::TranscriptionUnavailable {
            reason: "model file missing".into(),
            transient: false,
        })],
        HarnessOptions::default(),
    );

    record_one_cycle(&h);
    assert!(wait_until(|| {
        h.coordinator.diagnostics().transcription_failures == 1
    }));
    wait_idle(&h);

    assert_eq!(h.port_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.coordinator.diagnostics().transcription_retries, 0);
}

#[test]
fn config_change_mid_session_does_not_affect_the_session() {
    let mut options = HarnessOptions::default();
    options.config.transcription_language = "en".into();
    let h = harness(vec![Ok("unchanged".into())], options);

    h.coordinator.handle_toggle();
    assert!(wait_until(|| h.coordinator.phase() == EnginePhase::Recording));

    // Reconfigure while the session is live.
    h.source.replace(ConfigSnapshot {
        transcription_language: "fr".into(),
        ..Default::default()
    });

    h.coordinator.handle_toggle();
    assert!(wait_until(|| !h.inserted.lock().is_empty()));
    wait_idle(&h);

    assert_eq!(
        h.languages.lock().as_slice(),
        ["en"],
        "in-flight session keeps its snapshot"
    );

    // The next session picks up the new value.
    record_one_cycle(&h);
    wait_idle(&h);
    assert_eq!(h.languages.lock().as_slice(), ["en", "fr"]);
}

#[test]
fn injection_failure_is_reported_and_returns_to_idle() {
    let mut options = HarnessOptions::default();
    options.fail_injection = true;
    let h = harness(vec![Ok("some text".into())], options);

    record_one_cycle(&h);
    assert!(wait_until(|| h.coordinator.diagnostics().injection_failures == 1));
    wait_idle(&h);

    assert_eq!(h.port_calls.load(Ordering::SeqCst), 1, "no transcription retry");
    assert!(h.inserted.lock().is_empty());

    let status = h.coordinator.status();
    assert!(
        status.last_error.as_deref().is_some_and(|e| e.contains("no focused window")),
        "injection failure must be observable: {:?}",
        status.last_error
    );

    // Recovered: another cycle is possible.
    h.coordinator.handle_toggle();
    assert!(wait_until(|| h.coordinator.phase() == EnginePhase::Recording));
    h.coordinator.shutdown();
}

#[test]
fn invalid_config_fails_fast_without_recording() {
    let mut options = HarnessOptions::default();
    options.config.transcription_mode = TranscriptionMode::Api;
    options.config.api_key = None;
    let h = harness(vec![Ok("never".into())], options);

    h.coordinator.handle_toggle();
    wait_idle(&h);

    assert_eq!(h.starts.load(Ordering::SeqCst), 0, "capture must not start");
    assert!(h
        .coordinator
        .status()
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("api key")));
}

#[test]
fn empty_transcript_inserts_nothing() {
    let h = harness(vec![Ok("   ".into())], HarnessOptions::default());

    record_one_cycle(&h);
    wait_idle(&h);
    // Give the worker a beat to finish bookkeeping.
    assert!(wait_until(|| h.port_calls.load(Ordering::SeqCst) == 1));

    assert!(h.inserted.lock().is_empty());
    assert!(h.coordinator.status().last_error.is_none());
    assert_eq!(h.coordinator.diagnostics().sessions_completed, 0);
}

#[test]
fn status_events_follow_the_phase_sequence() {
    let h = harness(vec![Ok("phase check".into())], HarnessOptions::default());
    let mut events = h.coordinator.subscribe();

    record_one_cycle(&h);
    assert!(wait_until(|| !h.inserted.lock().is_empty()));

    // Drain until the terminal Idle event arrives.
    let mut phases = Vec::new();
    let deadline = Instant::now() + DEADLINE;
    while Instant::now() < deadline {
        match events.try_recv() {
            Ok(event) => {
                let done = event.phase == EnginePhase::Idle;
                phases.push(event.phase);
                if done {
                    break;
                }
            }
            Err(_) => std::thread::sleep(Duration::from_millis(5)),
        }
    }
    assert_eq!(
        phases,
        [
            EnginePhase::Recording,
            EnginePhase::Transcribing,
            EnginePhase::Substituting,
            EnginePhase::Inserting,
            EnginePhase::Idle,
        ]
    );
}

#[test]
fn run_loop_drives_cycles_from_hotkey_intents() {
    let h = harness(vec![Ok("driven by hotkey".into())], HarnessOptions::default());
    let (handle, rx) = toggle_channel(Duration::ZERO);

    let coordinator = Arc::clone(&h.coordinator);
    let loop_thread = std::thread::spawn(move || coordinator.run(rx));

    assert!(handle.toggle());
    assert!(wait_until(|| h.coordinator.phase() == EnginePhase::Recording));
    assert!(handle.toggle());
    assert!(wait_until(|| !h.inserted.lock().is_empty()));

    h.coordinator.shutdown();
    loop_thread.join().expect("coordinator loop");

    assert_eq!(h.inserted.lock().as_slice(), ["Driven by hotkey"]);
}

/// Recorder whose `start_recording` blocks until the test releases a gate,
/// exposing the window while a device is still opening.
struct GatedRecorder {
    gate: crossbeam_channel::Receiver<()>,
    entered: crossbeam_channel::Sender<()>,
    recording: Arc<AtomicBool>,
    paths: Arc<Mutex<Vec<PathBuf>>>,
}

impl AudioCapture for GatedRecorder {
    fn start_recording(&mut self) -> Result<()> {
        let _ = self.entered.send(());
        let _ = self.gate.recv();
        self.recording.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<AudioArtifact> {
        if !self.recording.swap(false, Ordering::SeqCst) {
            return Err(VoiceBoxError::NotRecording);
        }
        let path = std::env::temp_dir().join(format!(
            "voicebox-gated-{}-{}.wav",
            std::process::id(),
            ARTIFACT_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&path, b"RIFF")?;
        self.paths.lock().push(path.clone());
        Ok(AudioArtifact::new(path, Duration::from_secs(1), 16_000))
    }

    fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    fn device_available(&self) -> bool {
        true
    }
}

#[test]
fn shutdown_racing_a_starting_session_stops_capture() {
    let (gate_tx, gate_rx) = crossbeam_channel::bounded(4);
    let (entered_tx, entered_rx) = crossbeam_channel::bounded(4);
    let recording = Arc::new(AtomicBool::new(false));
    let paths = Arc::new(Mutex::new(Vec::new()));

    let (port, _calls, _languages) = ScriptedPort::new(vec![Ok("unused".into())]);
    let handle = PortHandle::new(port);
    let coordinator = Coordinator::new(
        CoordinatorConfig::default(),
        Arc::new(InMemoryConfig::new(ConfigSnapshot::default())),
        Box::new(GatedRecorder {
            gate: gate_rx,
            entered: entered_tx,
            recording: Arc::clone(&recording),
            paths: Arc::clone(&paths),
        }),
        BackendSelector::new(handle.clone(), handle),
        Arc::new(SubstitutionEngine::with_defaults()),
        Arc::new(FakeInjector::new(false).0),
    );

    let toggler = {
        let coordinator = Arc::clone(&coordinator);
        std::thread::spawn(move || coordinator.handle_toggle())
    };
    entered_rx.recv().expect("capture start entered");
    assert_eq!(coordinator.phase(), EnginePhase::Recording);

    let shut = {
        let coordinator = Arc::clone(&coordinator);
        std::thread::spawn(move || coordinator.shutdown())
    };
    // Let shutdown reclaim the phase before the device finishes opening.
    std::thread::sleep(Duration::from_millis(100));
    gate_tx.send(()).expect("release gate");

    toggler.join().expect("toggler thread");
    shut.join().expect("shutdown thread");

    assert_eq!(coordinator.phase(), EnginePhase::Idle);
    assert!(
        !recording.load(Ordering::SeqCst),
        "capture must not outlive shutdown"
    );
    {
        let paths = paths.lock();
        assert_eq!(paths.len(), 1);
        assert!(wait_until(|| !paths[0].exists()), "orphaned audio cleaned up");
    }

    // The engine is still serviceable afterwards.
    gate_tx.send(()).expect("preload gate");
    coordinator.handle_toggle();
    assert!(wait_until(|| coordinator.phase() == EnginePhase::Recording));
    coordinator.shutdown();
}

#[test]
fn device_failure_reports_and_recovers() {
    let mut options = HarnessOptions::default();
    options.failing_starts = 1;
    let h = harness(vec![Ok("after recovery".into())], options);

    h.coordinator.handle_toggle();
    wait_idle(&h);

    assert_eq!(h.starts.load(Ordering::SeqCst), 0, "no capture session opened");
    assert!(h
        .coordinator
        .status()
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("input device")));

    // The next cycle works end to end.
    record_one_cycle(&h);
    assert!(wait_until(|| !h.inserted.lock().is_empty()));
    assert_eq!(h.inserted.lock().as_slice(), ["After recovery"]);
}

#[test]
fn stalled_backend_times_out_as_transient() {
    let mut options = HarnessOptions::default();
    options.port_delay = Duration::from_millis(300);
    options.transcription_timeout = Duration::from_millis(50);
    let h = harness(
        vec![Ok("too late".into()), Ok("still too late".into())],
        options,
    );

    record_one_cycle(&h);
    assert!(wait_until(|| {
        h.coordinator.diagnostics().transcription_failures == 1
    }));
    wait_idle(&h);

    let diag = h.coordinator.diagnostics();
    assert_eq!(diag.transcription_retries, 1, "timeout consumes the single retry");
    assert!(h.inserted.lock().is_empty());
    assert!(h
        .coordinator
        .status()
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("no response")));

    // Both stalled calls eventually return and release the audio.
    assert!(wait_until(|| h.port_calls.load(Ordering::SeqCst) == 2));
    let paths = h.artifact_paths.lock();
    assert!(wait_until(|| !paths[0].exists()));
}

#[test]
fn shutdown_during_recording_cancels_and_cleans_up() {
    let h = harness(vec![Ok("never transcribed".into())], HarnessOptions::default());

    h.coordinator.handle_toggle();
    assert!(wait_until(|| h.coordinator.phase() == EnginePhase::Recording));

    h.coordinator.shutdown();
    assert_eq!(h.coordinator.phase(), EnginePhase::Idle);
    assert_eq!(h.port_calls.load(Ordering::SeqCst), 0);

    let paths = h.artifact_paths.lock();
    assert_eq!(paths.len(), 1);
    assert!(!paths[0].exists(), "cancelled-session audio must be cleaned up");
}
