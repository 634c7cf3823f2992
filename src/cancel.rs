//! Cancellation.
//!
//! This module contains the token used to propagate a user interrupt (Ctrl-C) into long running operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A cheaply clonable flag that is raised once the user interrupts the program.
#[derive(Clone, Debug, Default)]
pub(crate) struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a new `CancelToken` that gets raised on Ctrl-C.
    pub(crate) fn on_interrupt() -> Self {
        let token = Self::default();
        let handler_token = token.clone();
        if let Err(err) = ctrlc::set_handler(move || handler_token.cancel()) {
            tracing::warn!(?err, "failed to install interrupt handler");
        }

        token
    }

    /// Raises the flag.
    pub(crate) fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the flag has been raised.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
