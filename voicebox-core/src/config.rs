//! Session configuration.
//!
//! The Coordinator never talks to a config file. It consumes a
//! [`ConfigSource`] capability and takes one immutable [`ConfigSnapshot`]
//! per session, at session start. Hot reloads of the underlying source are
//! therefore observed by the *next* session only — an in-flight session keeps
//! the values it was started with.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VoiceBoxError};

/// Which transcription backend variant a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionMode {
    Local,
    Api,
}

/// Local model size selection (passed through to the local backend).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelSize {
    #[serde(rename = "tiny")]
    Tiny,
    #[serde(rename = "base")]
    Base,
    #[serde(rename = "small")]
    Small,
    #[serde(rename = "medium")]
    Medium,
    #[serde(rename = "large-v2")]
    LargeV2,
    #[serde(rename = "large-v3")]
    LargeV3,
}

/// How final text is delivered to the focused application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertionMethod {
    /// Try clipboard paste first, fall back to direct typing.
    Auto,
    Clipboard,
    Typing,
}

/// Immutable per-session settings value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ConfigSnapshot {
    pub transcription_mode: TranscriptionMode,
    /// Platform key-combination string, e.g. `"ctrl+space"`. Parsed and
    /// registered by the external hotkey subsystem, opaque to the core.
    pub hotkey: String,
    pub local_model_size: ModelSize,
    /// `"auto"` or an ISO 639-1 code (`"en"`, `"de"`, ...).
    pub transcription_language: String,
    pub text_insertion_method: InsertionMethod,
    pub api_key: Option<String>,
    pub auto_cleanup_temp_files: bool,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            transcription_mode: TranscriptionMode::Local,
            hotkey: "ctrl+space".into(),
            local_model_size: ModelSize::Base,
            transcription_language: "auto".into(),
            text_insertion_method: InsertionMethod::Auto,
            api_key: None,
            auto_cleanup_temp_files: true,
        }
    }
}

impl ConfigSnapshot {
    /// Validate before a recording starts, so a guaranteed-failing cycle
    /// never wastes a recording.
    ///
    /// # Errors
    /// `VoiceBoxError::ConfigInvalid` for API mode without a key, an empty
    /// hotkey binding, or a malformed language code.
    pub fn validate(&self) -> Result<()> {
        if self.transcription_mode == TranscriptionMode::Api
            && self.api_key.as_deref().map_or(true, |k| k.trim().is_empty())
        {
            return Err(VoiceBoxError::ConfigInvalid(
                "api transcription mode selected but no api key configured".into(),
            ));
        }

        if self.hotkey.trim().is_empty() {
            return Err(VoiceBoxError::ConfigInvalid("hotkey binding is empty".into()));
        }

        let lang = self.transcription_language.trim();
        let valid_lang =
            lang == "auto" || (lang.len() == 2 && lang.chars().all(|c| c.is_ascii_lowercase()));
        if !valid_lang {
            return Err(VoiceBoxError::ConfigInvalid(format!(
                "transcription_language must be \"auto\" or an ISO 639-1 code, got {lang:?}"
            )));
        }

        Ok(())
    }
}

/// Read-mostly settings capability, injected by the shell.
///
/// Implementations are expected to be hot-reloadable; the Coordinator only
/// ever calls `snapshot()` and only at session start.
pub trait ConfigSource: Send + Sync {
    fn snapshot(&self) -> ConfigSnapshot;
}

/// In-process `ConfigSource` backed by a swappable snapshot.
///
/// Useful for embedding and tests; a file-watching JSON source in the shell
/// wraps the same type and calls [`InMemoryConfig::replace`] on change.
#[derive(Default)]
pub struct InMemoryConfig {
    inner: RwLock<Arc<ConfigSnapshot>>,
}

impl InMemoryConfig {
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self {
            inner: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Swap in a new snapshot. Sessions already running keep the old value.
    pub fn replace(&self, snapshot: ConfigSnapshot) {
        *self.inner.write() = Arc::new(snapshot);
    }
}

impl ConfigSource for InMemoryConfig {
    fn snapshot(&self) -> ConfigSnapshot {
        self.inner.read().as_ref().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_is_valid() {
        ConfigSnapshot::default().validate().expect("defaults validate");
    }

    #[test]
    fn api_mode_without_key_is_rejected() {
        let snapshot = ConfigSnapshot {
            transcription_mode: TranscriptionMode::Api,
            api_key: Some("   ".into()),
            ..Default::default()
        };
        let err = snapshot.validate().unwrap_err();
        assert!(matches!(err, VoiceBoxError::ConfigInvalid(_)));
    }

    #[test]
    fn api_mode_with_key_is_accepted() {
        let snapshot = ConfigSnapshot {
            transcription_mode: TranscriptionMode::Api,
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        snapshot.validate().expect("api mode with key validates");
    }

    #[test]
    fn language_codes_are_checked() {
        let mut snapshot = ConfigSnapshot {
            transcription_language: "english".into(),
            ..Default::default()
        };
        assert!(snapshot.validate().is_err());

        snapshot.transcription_language = "de".into();
        snapshot.validate().expect("iso code validates");
    }

    #[test]
    fn replace_affects_next_snapshot_only() {
        let source = InMemoryConfig::new(ConfigSnapshot::default());
        let before = source.snapshot();

        source.replace(ConfigSnapshot {
            transcription_language: "fr".into(),
            ..Default::default()
        });

        assert_eq!(before.transcription_language, "auto");
        assert_eq!(source.snapshot().transcription_language, "fr");
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let json = serde_json::json!({
            "transcription_mode": "api",
            "hotkey": "f12",
            "local_model_size": "large-v3",
            "transcription_language": "en",
            "text_insertion_method": "clipboard",
            "api_key": "sk-test",
            "auto_cleanup_temp_files": false,
        });

        let snapshot: ConfigSnapshot = serde_json::from_value(json).expect("deserialize");
        assert_eq!(snapshot.transcription_mode, TranscriptionMode::Api);
        assert_eq!(snapshot.local_model_size, ModelSize::LargeV3);
        assert_eq!(snapshot.text_insertion_method, InsertionMethod::Clipboard);
        assert!(!snapshot.auto_cleanup_temp_files);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let snapshot: ConfigSnapshot =
            serde_json::from_str(r#"{ "hotkey": "f12" }"#).expect("partial config parses");
        assert_eq!(snapshot.hotkey, "f12");
        assert_eq!(snapshot.transcription_mode, TranscriptionMode::Local);
        assert!(snapshot.auto_cleanup_temp_files);
    }
}
