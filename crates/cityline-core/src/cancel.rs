//! Cooperative cancellation for strategy runs.
//!
//! A [`CancelToken`] is handed to a strategy at dispatch time. The
//! supervisor flips it when the run is superseded; the strategy notices at
//! its next poll point and unwinds with [`StrategyError::Cancelled`].
//! Nothing is ever forcibly terminated, so a cancelled run cannot leave the
//! registry half-updated.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::strategy::StrategyError;

/// Shared cancellation flag.
///
/// Clones observe the same flag. Once cancelled a token stays cancelled;
/// each run gets a fresh token.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called on
    /// this token or any of its clones.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Poll point for strategies: `Err(Cancelled)` if cancellation was
    /// requested, so callers can bail out with `?`.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::Cancelled`] if the token has been cancelled.
    pub fn check(&self) -> Result<(), StrategyError> {
        if self.is_cancelled() {
            Err(StrategyError::Cancelled)
        } else {
            Ok(())
        }
    }
}
