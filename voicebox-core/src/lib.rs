//! # voicebox-core
//!
//! Hotkey-driven dictation engine: press once to record, press again to
//! transcribe, rewrite, and type the result at the cursor.
//!
//! ## Architecture
//!
//! ```text
//! Hotkey listener → toggle_channel → Coordinator state machine
//!                                          │
//!            Idle → Recording (CpalRecorder, SPSC ring → temp WAV)
//!                                          │
//!            Transcribing (TranscriptionPort, retry-once on transient)
//!                                          │
//!            Substituting (RuleSet snapshot, longest-pattern-first)
//!                                          │
//!            Inserting (TextInjector) → Idle
//!                                          │
//!                           broadcast::Sender<StatusEvent>
//! ```
//!
//! The hotkey path never blocks: it only enqueues intents. Capture, speech
//! recognition, and text delivery all run off the listener thread.
//!
//! Speech recognition and OS text insertion are capability traits
//! ([`TranscriptionPort`], [`inject::TextInjector`]) implemented by the
//! embedding shell; the core owns everything in between.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod hotkey;
pub mod inject;
pub mod session;
pub mod substitutions;
pub mod transcribe;

// Convenience re-exports for downstream crates
pub use config::{ConfigSnapshot, ConfigSource, InMemoryConfig, InsertionMethod, TranscriptionMode};
pub use coordinator::{Coordinator, CoordinatorConfig};
pub use error::VoiceBoxError;
pub use events::{EnginePhase, StatusEvent, StatusSnapshot};
pub use hotkey::{toggle_channel, HotkeyHandle, ToggleEvent};
pub use substitutions::{SubstitutionEngine, SubstitutionRule};
pub use transcribe::{BackendSelector, PortHandle, TranscriptionPort};

#[cfg(feature = "audio-cpal")]
pub use audio::recorder::CpalRecorder;
