//! Cooperative cancellation.
//!
//! The transfer engine polls a `ShutdownCheck` between atomic steps (one file
//! copy, one folder creation). A raised flag never interrupts a write in
//! progress; the engine finishes the step, returns `Cancelled`, and the
//! orchestrator persists the baseline before exiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

/// Trait for checking whether the operator asked to stop.
pub trait ShutdownCheck: Send + Sync {
    fn should_stop(&self) -> bool;
}

/// Flag raised by Ctrl+C (or manually).
#[derive(Debug, Clone)]
pub struct ShutdownFlag {
    flag: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// Create a flag and register a Ctrl+C handler that raises it.
    ///
    /// If the handler cannot be registered the flag is still usable, it just
    /// will not react to Ctrl+C.
    pub fn install() -> Self {
        let flag = Self::manual();
        let handler_flag = flag.flag.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            handler_flag.store(true, Ordering::SeqCst);
        }) {
            warn!(error = %e, "Could not install Ctrl+C handler");
        }
        flag
    }

    /// Create a flag with no signal handler attached.
    pub fn manual() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

impl ShutdownCheck for ShutdownFlag {
    fn should_stop(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Checker that never asks to stop.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverShutdown;

impl ShutdownCheck for NeverShutdown {
    fn should_stop(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_flag_trigger() {
        let flag = ShutdownFlag::manual();
        assert!(!flag.should_stop());
        flag.trigger();
        assert!(flag.should_stop());
    }

    #[test]
    fn test_clone_shares_state() {
        let flag = ShutdownFlag::manual();
        let observer = flag.clone();
        flag.trigger();
        assert!(observer.should_stop());
    }

    #[test]
    fn test_never_shutdown() {
        let checker: Box<dyn ShutdownCheck> = Box::new(NeverShutdown);
        assert!(!checker.should_stop());
    }
}
