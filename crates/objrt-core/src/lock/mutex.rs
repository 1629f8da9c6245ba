use std::sync::Arc;

use super::native::NativeMutex;
use super::{Owner, assertion_failure, check_rc, init_failure};
use crate::debugger::{Acquire, DebuggerGate, Hold, LockId, Release};
use crate::error::{LockError, LockKind};
use crate::fatal::{FatalError, report_fatal};

/// Plain mutual-exclusion lock.
pub struct Mutex {
    native: NativeMutex,
    owner: Owner,
    id: LockId,
    name: &'static str,
    gate: Arc<DebuggerGate>,
}

impl Mutex {
    /// Create a mutex bound to `gate`.
    pub fn try_new(name: &'static str, gate: Arc<DebuggerGate>) -> Result<Self, LockError> {
        let native =
            NativeMutex::new().map_err(|code| init_failure(LockKind::Mutex, name, code))?;
        Ok(Self {
            native,
            owner: Owner::default(),
            id: LockId::fresh(),
            name,
            gate,
        })
    }

    /// Like [`Mutex::try_new`], but failure is fatal.
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

    pub fn lock(&self) {
        if self.gate.acquire_strategy(self.id, self.name, Hold::Exclusive) == Acquire::Bypass {
            return;
        }
        check_rc(self.native.lock(), "mutex_lock", self.name);
        self.owner.claim();
    }

    /// Acquire without blocking. Under debugger mode a managed lock reports
    /// success immediately.
    pub fn try_lock(&self) -> bool {
        if self.gate.acquire_strategy(self.id, self.name, Hold::Exclusive) == Acquire::Bypass {
            return true;
        }
        self.raw_try_lock()
    }

    pub fn unlock(&self) -> Result<(), LockError> {
        if self.gate.release_strategy(self.id) == Release::Skip {
            return Ok(());
        }
        if !self.owner.is_current() {
            return Err(LockError::NotOwner {
                kind: LockKind::Mutex,
                name: self.name,
            });
        }
        self.raw_unlock();
        Ok(())
    }

    /// Whether any thread (or the debugger) holds the native lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.owner.is_held()
    }

    pub fn assert_locked(&self) {
        if self.gate.config().lock_assertions() && !self.is_locked() {
            assertion_failure(FatalError::NotLocked {
                kind: LockKind::Mutex,
                name: self.name,
            });
        }
    }

    pub fn assert_unlocked(&self) {
        if self.gate.config().lock_assertions() && self.is_locked() {
            assertion_failure(FatalError::Locked {
                kind: LockKind::Mutex,
                name: self.name,
            });
        }
    }

    /// Ungated non-blocking acquisition.
    pub(crate) fn raw_try_lock(&self) -> bool {
        if !self.native.try_lock() {
            return false;
        }
        self.owner.claim();
        true
    }

    /// Ungated release, regardless of which thread acquired.
    pub(crate) fn raw_unlock(&self) {
        self.owner.release();
        check_rc(self.native.unlock(), "mutex_unlock", self.name);
    }
}

impl core::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mutex")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("locked", &self.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debugger::DebuggerMode;

    fn gate() -> Arc<DebuggerGate> {
        Arc::new(DebuggerGate::default())
    }

    #[test]
    fn lock_unlock_cycle() {
        let m = Mutex::new("classLock", gate());
        assert!(!m.is_locked());
        m.lock();
        assert!(m.is_locked());
        m.assert_locked();
        assert!(m.unlock().is_ok());
        m.assert_unlocked();
    }

    #[test]
    fn try_lock_fails_while_held_elsewhere() {
        let m = Arc::new(Mutex::new("classLock", gate()));
        m.lock();
        let other = Arc::clone(&m);
        let acquired = std::thread::spawn(move || other.try_lock())
            .join()
            .expect("thread");
        assert!(!acquired);
        m.unlock().expect("unlock");
    }

    #[test]
    fn unlock_by_non_owner_is_rejected() {
        let m = Arc::new(Mutex::new("methodListLock", gate()));
        m.lock();
        let other = Arc::clone(&m);
        let result = std::thread::spawn(move || other.unlock())
            .join()
            .expect("thread");
        assert_eq!(
            result,
            Err(LockError::NotOwner {
                kind: LockKind::Mutex,
                name: "methodListLock"
            })
        );
        assert!(m.is_locked());
        m.unlock().expect("unlock");
    }

    #[test]
    fn unlock_of_unheld_lock_is_rejected() {
        let m = Mutex::new("classLock", gate());
        assert!(m.unlock().is_err());
    }

    #[test]
    fn full_mode_unlock_keeps_lock_held() {
        let gate = gate();
        let m = Mutex::new("cacheUpdateLock", Arc::clone(&gate));
        gate.manage(m.id());
        assert!(m.try_lock());
        gate.mark_held(m.id(), Hold::Exclusive);
        gate.set_mode(DebuggerMode::Full);

        assert!(m.unlock().is_ok());
        assert!(m.is_locked());
        assert!(m.try_lock());
        m.lock();

        gate.set_mode(DebuggerMode::Off);
        gate.clear_held();
        m.unlock().expect("unlock");
        assert!(!m.is_locked());
    }
}
