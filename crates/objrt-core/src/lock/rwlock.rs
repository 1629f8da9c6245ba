use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use super::native::NativeMutex;
use super::{Owner, assertion_failure, check_rc, init_failure};
use crate::debugger::{Acquire, DebuggerGate, Hold, LockId, Release};
use crate::error::{LockError, LockKind};
use crate::fatal::{FatalError, report_fatal};

/// How an [`RwLock`] is currently held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RwMode {
    Read = 1,
    Write = 2,
}

const UNHELD: u8 = 0;

/// Reader/writer lock with separate read and write entry points.
///
/// Both sides serialize on one native mutex: readers exclude each other as
/// well as writers.
pub struct RwLock {
    native: NativeMutex,
    state: AtomicU8,
    owner: Owner,
    id: LockId,
    name: &'static str,
    gate: Arc<DebuggerGate>,
}

impl RwLock {
    pub fn try_new(name: &'static str, gate: Arc<DebuggerGate>) -> Result<Self, LockError> {
        let native =
            NativeMutex::new().map_err(|code| init_failure(LockKind::RwLock, name, code))?;
        Ok(Self {
            native,
            state: AtomicU8::new(UNHELD),
            owner: Owner::default(),
            id: LockId::fresh(),
            name,
            gate,
        })
    }

    /// Create an rwlock; failure is fatal.
    pub fn new(name: &'static str, gate: Arc<DebuggerGate>) -> Self {
        match Self::try_new(name, gate) {
            Ok(lock) => lock,
            Err(err) => report_fatal(&FatalError::LockInit(err)),
        }
    }

    #[must_use]
    pub const fn id(&self) -> LockId {
        self.id
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub fn read(&self) {
        self.acquire(RwMode::Read);
    }

    pub fn write(&self) {
        self.acquire(RwMode::Write);
    }

    pub fn try_read(&self) -> bool {
        self.try_acquire(RwMode::Read)
    }

    pub fn try_write(&self) -> bool {
        self.try_acquire(RwMode::Write)
    }

    pub fn unlock_read(&self) -> Result<(), LockError> {
        self.unlock(RwMode::Read)
    }

    pub fn unlock_write(&self) -> Result<(), LockError> {
        self.unlock(RwMode::Write)
    }

    /// Release a hold taken in `mode`.
    pub fn unlock(&self, mode: RwMode) -> Result<(), LockError> {
        if self.gate.release_strategy(self.id) == Release::Skip {
            return Ok(());
        }
        if !self.owner.is_current() || self.state.load(Ordering::Acquire) != mode as u8 {
            return Err(LockError::NotOwner {
                kind: LockKind::RwLock,
                name: self.name,
            });
        }
        self.raw_unlock();
        Ok(())
    }

    /// Current hold, if any.
    #[must_use]
    pub fn held_mode(&self) -> Option<RwMode> {
        match self.state.load(Ordering::Acquire) {
            1 => Some(RwMode::Read),
            2 => Some(RwMode::Write),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.held_mode().is_some()
    }

    pub fn assert_reading(&self) {
        if self.gate.config().lock_assertions() && self.held_mode() != Some(RwMode::Read) {
            assertion_failure(FatalError::NotReading { name: self.name });
        }
    }

    pub fn assert_writing(&self) {
        if self.gate.config().lock_assertions() && self.held_mode() != Some(RwMode::Write) {
            assertion_failure(FatalError::NotWriting { name: self.name });
        }
    }

    pub fn assert_locked(&self) {
        if self.gate.config().lock_assertions() && !self.is_locked() {
            assertion_failure(FatalError::NotLocked {
                kind: LockKind::RwLock,
                name: self.name,
            });
        }
    }

    pub fn assert_unlocked(&self) {
        if self.gate.config().lock_assertions() && self.is_locked() {
            assertion_failure(FatalError::Locked {
                kind: LockKind::RwLock,
                name: self.name,
            });
        }
    }

    fn acquire(&self, mode: RwMode) {
        if self.gate.acquire_strategy(self.id, self.name, need(mode)) == Acquire::Bypass {
            return;
        }
        let op = match mode {
            RwMode::Read => "rwlock_read",
            RwMode::Write => "rwlock_write",
        };
        check_rc(self.native.lock(), op, self.name);
        self.note_acquired(mode);
    }

    fn try_acquire(&self, mode: RwMode) -> bool {
        if self.gate.acquire_strategy(self.id, self.name, need(mode)) == Acquire::Bypass {
            return true;
        }
        self.raw_try(mode)
    }

    /// Ungated non-blocking acquisition.
    pub(crate) fn raw_try(&self, mode: RwMode) -> bool {
        if !self.native.try_lock() {
            return false;
        }
        self.note_acquired(mode);
        true
    }

    /// Ungated release, regardless of which thread acquired.
    pub(crate) fn raw_unlock(&self) {
        self.state.store(UNHELD, Ordering::Release);
        self.owner.release();
        check_rc(self.native.unlock(), "rwlock_unlock", self.name);
    }

    fn note_acquired(&self, mode: RwMode) {
        self.owner.claim();
        self.state.store(mode as u8, Ordering::Release);
    }
}

const fn need(mode: RwMode) -> Hold {
    match mode {
        RwMode::Read => Hold::Shared,
        RwMode::Write => Hold::Exclusive,
    }
}

impl core::fmt::Debug for RwLock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RwLock")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("held", &self.held_mode())
            .finish()
    }
}
