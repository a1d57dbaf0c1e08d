//! Observer-facing status types.
//!
//! The Coordinator owns one canonical [`StatusSnapshot`] and republishes a
//! [`StatusEvent`] over a `tokio::sync::broadcast` channel on every phase
//! transition. Observers (GUI, log shell) only ever read; they never mutate.

use serde::{Deserialize, Serialize};

/// Current phase of the coordination state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnginePhase {
    /// No session active; waiting for a toggle.
    Idle,
    /// Audio capture running; next toggle stops it.
    Recording,
    /// Recording stopped; transcription dispatched to a worker.
    Transcribing,
    /// Transcript obtained; substitution rules being applied.
    Substituting,
    /// Final text handed to the injector.
    Inserting,
    /// A stage failed; published once, then auto-returns to `Idle`.
    Error,
}

/// Emitted on every phase transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub phase: EnginePhase,
    /// Optional human-readable detail (e.g. error message, skip reason).
    pub detail: Option<String>,
}

/// The single process-wide observable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub phase: EnginePhase,
    /// Message of the most recent failure, if any.
    pub last_error: Option<String>,
    /// Excerpt of the most recent successfully injected transcript.
    pub last_transcript: Option<String>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            phase: EnginePhase::Idle,
            last_error: None,
            last_transcript: None,
        }
    }
}

/// Capability-availability report for the CLI/GUI shell.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    /// An input device could be opened right now.
    pub microphone_available: bool,
    /// The local (offline) transcription backend reports ready.
    pub local_backend_available: bool,
    /// The remote (API) transcription backend reports reachable.
    pub api_backend_available: bool,
}
