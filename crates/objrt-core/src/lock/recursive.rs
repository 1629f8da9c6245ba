use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use super::native::NativeMutex;
use super::{Owner, assertion_failure, check_rc, init_failure};
use crate::debugger::{Acquire, DebuggerGate, Hold, LockId, Release};
use crate::error::{LockError, LockKind};
use crate::fatal::{FatalError, report_fatal};

/// Mutex the owning thread may acquire repeatedly.
///
/// A recursive mutex can be declared before it is usable: [`declare`]
/// allocates nothing, and every operation before [`init`] is fatal.
///
/// [`declare`]: RecursiveMutex::declare
/// [`init`]: RecursiveMutex::init
pub struct RecursiveMutex {
    native: OnceLock<NativeMutex>,
    owner: Owner,
    depth: AtomicUsize,
    id: LockId,
    name: &'static str,
    gate: Arc<DebuggerGate>,
}

impl RecursiveMutex {
    /// An uninitialized recursive mutex.
    pub fn declare(name: &'static str, gate: Arc<DebuggerGate>) -> Self {
        Self {
            native: OnceLock::new(),
            owner: Owner::default(),
            depth: AtomicUsize::new(0),
            id: LockId::fresh(),
            name,
            gate,
        }
    }

    /// Run the one-time initializer. Later calls are no-ops.
    pub fn init(&self) -> Result<(), LockError> {
        if self.native.get().is_some() {
            return Ok(());
        }
        let native = NativeMutex::recursive()
            .map_err(|code| init_failure(LockKind::RecursiveMutex, self.name, code))?;
        // A racing initializer may have won; its mutex is kept and ours dropped.
        let _ = self.native.set(native);
        Ok(())
    }

    /// Declare and initialize; failure is fatal.
    pub fn new(name: &'static str, gate: Arc<DebuggerGate>) -> Self {
        let lock = Self::declare(name, gate);
        if let Err(err) = lock.init() {
            report_fatal(&FatalError::LockInit(err));
        }
        lock
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.native.get().is_some()
    }

    #[must_use]
    pub const fn id(&self) -> LockId {
        self.id
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    fn native(&self) -> &NativeMutex {
        match self.native.get() {
            Some(native) => native,
            None => assertion_failure(FatalError::Uninitialized {
                kind: LockKind::RecursiveMutex,
                name: self.name,
            }),
        }
    }

    pub fn lock(&self) {
        let native = self.native();
        if self.gate.acquire_strategy(self.id, self.name, Hold::Exclusive) == Acquire::Bypass {
            return;
        }
        check_rc(native.lock(), "recursive_mutex_lock", self.name);
        self.note_acquired();
    }

    pub fn try_lock(&self) -> bool {
        let native = self.native();
        if self.gate.acquire_strategy(self.id, self.name, Hold::Exclusive) == Acquire::Bypass {
            return true;
        }
        if !native.try_lock() {
            return false;
        }
        self.note_acquired();
        true
    }

    pub fn unlock(&self) -> Result<(), LockError> {
        let native = self.native();
        if self.gate.release_strategy(self.id) == Release::Skip {
            return Ok(());
        }
        if !self.owner.is_current() {
            return Err(LockError::NotOwner {
                kind: LockKind::RecursiveMutex,
                name: self.name,
            });
        }
        if self.depth.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.owner.release();
        }
        check_rc(native.unlock(), "recursive_mutex_unlock", self.name);
        Ok(())
    }

    /// Current recursion depth of the owning thread (0 when unowned).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.owner.is_held()
    }

    pub fn assert_locked(&self) {
        let _ = self.native();
        if self.gate.config().lock_assertions() && !self.is_locked() {
            assertion_failure(FatalError::NotLocked {
                kind: LockKind::RecursiveMutex,
                name: self.name,
            });
        }
    }

    pub fn assert_unlocked(&self) {
        let _ = self.native();
        if self.gate.config().lock_assertions() && self.is_locked() {
            assertion_failure(FatalError::Locked {
                kind: LockKind::RecursiveMutex,
                name: self.name,
            });
        }
    }

    fn note_acquired(&self) {
        if self.owner.is_current() {
            self.depth.fetch_add(1, Ordering::AcqRel);
        } else {
            self.owner.claim();
            self.depth.store(1, Ordering::Release);
        }
    }
}

impl core::fmt::Debug for RecursiveMutex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RecursiveMutex")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("initialized", &self.is_initialized())
            .field("depth", &self.depth())
            .finish()
    }
}
