//! One record → transcribe → insert cycle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audio::AudioArtifact;
use crate::config::ConfigSnapshot;
use crate::substitutions::RuleSet;

/// Terminal result of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionOutcome {
    Success,
    Failed,
    Cancelled,
}

/// Owned state-machine value for the active cycle.
///
/// Created when the start toggle is accepted, mutated by the Coordinator as
/// it advances through stages, dropped once a terminal outcome is published.
/// The config snapshot and rule snapshot are captured here and never change
/// mid-session, no matter what happens to the underlying sources.
#[derive(Debug)]
pub struct Session {
    pub id: u64,
    pub started_at: DateTime<Utc>,
    pub config: ConfigSnapshot,
    pub rules: Arc<RuleSet>,
    /// Owned exclusively by the session until transcription completes; the
    /// backing file is deleted when the last `Arc` drops (unless persisted).
    pub artifact: Option<Arc<AudioArtifact>>,
    pub text: Option<String>,
    pub outcome: Option<SessionOutcome>,
}

impl Session {
    pub fn new(id: u64, config: ConfigSnapshot, rules: Arc<RuleSet>) -> Self {
        Self {
            id,
            started_at: Utc::now(),
            config,
            rules,
            artifact: None,
            text: None,
            outcome: None,
        }
    }

    /// Release the audio artifact. Deletion happens now if this was the last
    /// reference and the keep policy did not disarm it.
    pub fn release_artifact(&mut self) {
        self.artifact = None;
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }
}
