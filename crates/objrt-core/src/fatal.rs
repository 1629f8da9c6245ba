//! Fatal-error reporting.
//!
//! The runtime cannot operate without its core locks, and a broken lock
//! invariant means runtime state is already corrupt. Both end here: the error
//! is logged, written to stderr, and the process aborts.
//!
//! A process-wide handler can replace the abort. It is installed at most once
//! (first writer wins). Test binaries install a panicking handler so the fatal
//! paths can be observed.

use std::sync::OnceLock;

use thiserror::Error;

use crate::debugger::DebuggerMode;
use crate::error::{LockError, LockKind};

/// Unrecoverable conditions in the OS layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    /// A native primitive could not be created.
    #[error("{0}")]
    LockInit(LockError),
    /// A lock was used before its one-time initializer ran.
    #[error("{kind} `{name}` used before initialization")]
    Uninitialized { kind: LockKind, name: &'static str },
    /// `assert_locked` failed.
    #[error("{kind} `{name}` incorrectly not locked")]
    NotLocked { kind: LockKind, name: &'static str },
    /// `assert_unlocked` failed.
    #[error("{kind} `{name}` incorrectly locked")]
    Locked { kind: LockKind, name: &'static str },
    /// `assert_reading` failed.
    #[error("rwlock `{name}` incorrectly not reading")]
    NotReading { name: &'static str },
    /// `assert_writing` failed.
    #[error("rwlock `{name}` incorrectly not writing")]
    NotWriting { name: &'static str },
    /// A native lock call failed after initialization.
    #[error("{op} on `{name}` failed, error: {code}")]
    Native {
        op: &'static str,
        name: &'static str,
        code: i32,
    },
    /// A lock managed during debugger mode was acquired without the debugger
    /// holding it.
    #[error("DEBUGGER MODE FAILURE: `{name}` acquired in {mode:?} mode but not held by the debugger")]
    DebuggerModeFailure {
        name: &'static str,
        mode: DebuggerMode,
    },
}

/// Handler invoked for fatal errors. It must not return.
pub type FatalHandler = fn(&FatalError) -> !;

static HANDLER: OnceLock<FatalHandler> = OnceLock::new();

/// Install the process-wide fatal handler.
///
/// Returns `false` if a handler was already installed; the existing handler
/// stays in place.
pub fn install_fatal_handler(handler: FatalHandler) -> bool {
    HANDLER.set(handler).is_ok()
}

/// Report a fatal error. Never returns.
pub fn report_fatal(err: &FatalError) -> ! {
    log::error!("objrt: {err}");
    match HANDLER.get() {
        Some(handler) => handler(err),
        None => abort_with(err),
    }
}

fn abort_with(err: &FatalError) -> ! {
    eprintln!("objc[{}]: {err}", std::process::id());
    std::process::abort()
}

/// Panicking handler for test binaries.
#[doc(hidden)]
pub fn panicking_handler(err: &FatalError) -> ! {
    panic!("fatal: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_messages_name_the_lock() {
        let err = FatalError::NotLocked {
            kind: LockKind::Mutex,
            name: "classLock",
        };
        assert_eq!(err.to_string(), "mutex `classLock` incorrectly not locked");

        let err = FatalError::DebuggerModeFailure {
            name: "runtimeLock",
            mode: DebuggerMode::Partial,
        };
        assert!(err.to_string().starts_with("DEBUGGER MODE FAILURE"));
    }

    #[test]
    fn init_failure_wraps_lock_error() {
        let err = FatalError::LockInit(LockError::Init {
            kind: LockKind::RwLock,
            name: "selLock",
            code: 12,
        });
        assert_eq!(err.to_string(), "failed to create rwlock `selLock`, error: 12");
    }

    #[test]
    fn installed_handler_receives_report() {
        install_fatal_handler(panicking_handler);
        let caught = std::panic::catch_unwind(|| {
            report_fatal(&FatalError::NotWriting { name: "selLock" });
        });
        let payload = caught.expect_err("fatal path must not return");
        let message = payload
            .downcast_ref::<String>()
            .cloned()
            .unwrap_or_default();
        assert!(message.contains("incorrectly not writing"));
    }
}
