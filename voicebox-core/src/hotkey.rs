//! Toggle-intent queue between the OS hotkey listener and the Coordinator.
//!
//! The global hotkey callback must return immediately or the OS starts
//! dropping key events. It therefore only *requests* a transition: a
//! debounced, non-blocking push into a bounded channel. The Coordinator
//! drains the channel one event at a time, which gives ordering and
//! backpressure instead of callbacks racing in-progress transitions.

use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::debug;

/// A single logical hotkey toggle.
#[derive(Debug, Clone, Copy)]
pub struct ToggleEvent {
    /// When the listener observed the key event.
    pub at: Instant,
}

/// Queue capacity. A user cannot meaningfully toggle faster than this
/// buffers; anything beyond it is a stuck key and gets dropped.
const QUEUE_CAPACITY: usize = 8;

/// Default debounce window for repeated key-down events from a held key.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Callback-side handle. Cloneable; safe to call from the listener thread.
#[derive(Clone)]
pub struct HotkeyHandle {
    tx: Sender<ToggleEvent>,
    last_accepted: std::sync::Arc<Mutex<Option<Instant>>>,
    debounce: Duration,
}

impl HotkeyHandle {
    /// Record a toggle intent. Never blocks.
    ///
    /// Returns `false` when the event was swallowed — either inside the
    /// debounce window (held key auto-repeat) or because the queue is full.
    pub fn toggle(&self) -> bool {
        let now = Instant::now();

        let mut last = self.last_accepted.lock();
        if let Some(prev) = *last {
            if now.duration_since(prev) < self.debounce {
                debug!("toggle debounced");
                return false;
            }
        }

        // The window is armed only by an accepted press; a press dropped by
        // a full queue must not swallow the next legitimate one.
        match self.tx.try_send(ToggleEvent { at: now }) {
            Ok(()) => {
                *last = Some(now);
                true
            }
            Err(TrySendError::Full(_)) => {
                debug!("toggle queue full, dropping event");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Create a hotkey intent channel with the given debounce window.
pub fn toggle_channel(debounce: Duration) -> (HotkeyHandle, Receiver<ToggleEvent>) {
    let (tx, rx) = bounded(QUEUE_CAPACITY);
    (
        HotkeyHandle {
            tx,
            last_accepted: std::sync::Arc::new(Mutex::new(None)),
            debounce,
        },
        rx,
    )
}
