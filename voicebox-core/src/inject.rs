//! Text delivery capability.
//!
//! Implemented by the shell with OS clipboard/keyboard primitives; the core
//! only depends on the contract. An injection failure ends the cycle — it is
//! reported through status, never retried, and never crashes the Coordinator.

use crate::config::InsertionMethod;
use crate::error::Result;

/// Delivers final text to the focused application.
pub trait TextInjector: Send + Sync {
    /// Insert `text` at the cursor.
    ///
    /// With [`InsertionMethod::Auto`] the implementation tries clipboard
    /// paste first and falls back to direct typing.
    ///
    /// # Errors
    /// `VoiceBoxError::InjectionFailed` when delivery fails with both paths.
    fn insert(&self, text: &str, method: InsertionMethod) -> Result<()>;
}
