//! Termination signal handling.
//!
//! SIGINT, SIGTERM and SIGHUP are recorded instead of killing the process, so
//! the run can unwind and drain its cleanup registry. The terminal delivers
//! Ctrl-C to the running `lxc` child as well, which makes the blocking call
//! return; [`crate::runner::Runner`] then reports the recorded signal as
//! [`pstart_common::PstartError::Interrupted`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared "a termination signal arrived" flag.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    pending: Arc<AtomicBool>,
}

impl Interrupt {
    /// A flag that nothing has raised yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route termination signals to this flag for the rest of the process.
    ///
    /// # Errors
    ///
    /// Fails if a handler is already installed or cannot be registered.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let pending = Arc::clone(&self.pending);
        ctrlc::set_handler(move || {
            pending.store(true, Ordering::SeqCst);
        })
    }

    /// Record a signal.
    pub fn raise(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    /// Consume a pending signal. Returns whether one was pending.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }
}
