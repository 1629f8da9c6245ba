//! Recoverable error types.
//!
//! Unrecoverable conditions are described by [`crate::fatal::FatalError`] and
//! never travel through these enums.

use thiserror::Error;

use crate::elf::ElfError;

/// The kind of native primitive behind a lock, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Mutex,
    RecursiveMutex,
    Monitor,
    RwLock,
}

impl core::fmt::Display for LockKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let label = match self {
            Self::Mutex => "mutex",
            Self::RecursiveMutex => "recursive mutex",
            Self::Monitor => "monitor",
            Self::RwLock => "rwlock",
        };
        f.write_str(label)
    }
}

/// Errors returned by lock operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The native primitive could not be created.
    #[error("failed to create {kind} `{name}`, error: {code}")]
    Init {
        kind: LockKind,
        name: &'static str,
        code: i32,
    },
    /// Release or wait attempted by a thread that does not own the lock.
    #[error("{kind} `{name}` is not locked by the calling thread")]
    NotOwner { kind: LockKind, name: &'static str },
    /// Monitor wait attempted while the debugger holds the monitor.
    #[error("cannot wait on monitor `{name}` while the debugger is attached")]
    WaitDuringDebugger { name: &'static str },
}

impl LockError {
    /// The errno the C surface reports for this error.
    #[must_use]
    pub const fn errno(&self) -> i32 {
        match self {
            Self::Init { code, .. } => *code,
            Self::NotOwner { .. } => libc::EPERM,
            Self::WaitDuringDebugger { .. } => libc::EDEADLK,
        }
    }
}

/// Errors produced while describing or registering an image.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The image file could not be read.
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The image file is not an ELF object this layer understands.
    #[error("malformed image {path}: {source}")]
    Elf {
        path: String,
        #[source]
        source: ElfError,
    },
    /// A bound-state handler refused the image.
    #[error("image {path} rejected: {reason}")]
    Rejected { path: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_error_display_names_the_lock() {
        let err = LockError::NotOwner {
            kind: LockKind::RecursiveMutex,
            name: "loadMethodLock",
        };
        assert_eq!(
            err.to_string(),
            "recursive mutex `loadMethodLock` is not locked by the calling thread"
        );
        assert_eq!(err.errno(), libc::EPERM);
    }

    #[test]
    fn init_error_carries_native_code() {
        let err = LockError::Init {
            kind: LockKind::RwLock,
            name: "runtimeLock",
            code: libc::EAGAIN,
        };
        assert_eq!(err.errno(), libc::EAGAIN);
        assert!(err.to_string().contains("failed to create rwlock"));
    }

    #[test]
    fn rejected_error_mentions_reason() {
        let err = LoaderError::Rejected {
            path: "/usr/lib/libFoo.so".into(),
            reason: "GC mismatch".into(),
        };
        assert_eq!(
            err.to_string(),
            "image /usr/lib/libFoo.so rejected: GC mismatch"
        );
    }
}
