//! Interrupt handling
//!
//! Xcode stops a build phase by sending SIGINT/SIGTERM. The bridge exits
//! right away with code 130; partially installed artifacts are left as they
//! are and the build lock goes away with the process. The Bazel client
//! receives the same signal from the process group and shuts itself down.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tracing::warn;

/// Exit code for interrupted runs (128 + SIGINT).
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Counts received interrupts.
#[derive(Debug, Default)]
pub struct SignalState {
    signal_count: AtomicU8,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a signal and return what to do about it.
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);
        if count == 0 {
            SignalAction::Exit
        } else {
            // Exit is already under way.
            SignalAction::Ignore
        }
    }

    /// Get the number of signals received
    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: leave immediately
    Exit,
    /// Any later signal
    Ignore,
}

/// Installs the process-wide interrupt handler.
#[derive(Debug, Default)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Install handlers for SIGINT and SIGTERM. Call once at startup.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || {
            if state.handle_signal() == SignalAction::Exit {
                warn!("interrupted, exiting without rollback");
                std::process::exit(EXIT_CODE_INTERRUPTED);
            }
        })
    }
}
