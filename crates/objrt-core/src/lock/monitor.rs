use std::sync::Arc;

use super::native::{NativeCond, NativeMutex};
use super::{Owner, assertion_failure, check_rc, init_failure};
use crate::debugger::{Acquire, DebuggerGate, DebuggerMode, Hold, LockId, Release};
use crate::error::{LockError, LockKind};
use crate::fatal::{FatalError, report_fatal};

/// A mutex paired with a condition variable.
pub struct Monitor {
    // `cond` is declared first so it is destroyed before the mutex.
    cond: NativeCond,
    mutex: NativeMutex,
    owner: Owner,
    id: LockId,
    name: &'static str,
    gate: Arc<DebuggerGate>,
}

impl Monitor {
    /// Create the mutex and condition variable together; if either fails
    /// neither survives.
    pub fn try_new(name: &'static str, gate: Arc<DebuggerGate>) -> Result<Self, LockError> {
        let failed = |code| init_failure(LockKind::Monitor, name, code);
        let mutex = NativeMutex::new().map_err(failed)?;
        let cond = NativeCond::new().map_err(failed)?;
        Ok(Self {
            cond,
            mutex,
            owner: Owner::default(),
            id: LockId::fresh(),
            name,
            gate,
        })
    }

    pub fn new(name: &'static str, gate: Arc<DebuggerGate>) -> Self {
        match Self::try_new(name, gate) {
            Ok(monitor) => monitor,
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

    pub fn enter(&self) {
        if self.gate.acquire_strategy(self.id, self.name, Hold::Exclusive) == Acquire::Bypass {
            return;
        }
        check_rc(self.mutex.lock(), "monitor_enter", self.name);
        self.owner.claim();
    }

    pub fn try_enter(&self) -> bool {
        if self.gate.acquire_strategy(self.id, self.name, Hold::Exclusive) == Acquire::Bypass {
            return true;
        }
        if !self.mutex.try_lock() {
            return false;
        }
        self.owner.claim();
        true
    }

    pub fn exit(&self) -> Result<(), LockError> {
        if self.gate.release_strategy(self.id) == Release::Skip {
            return Ok(());
        }
        if !self.owner.is_current() {
            return Err(self.not_entered());
        }
        self.owner.release();
        check_rc(self.mutex.unlock(), "monitor_exit", self.name);
        Ok(())
    }

    /// Release the monitor, sleep until notified, then re-enter.
    ///
    /// Waiting is refused while the debugger owns a managed monitor: no other
    /// thread can run to notify it.
    pub fn wait(&self) -> Result<(), LockError> {
        if self.gate.mode() != DebuggerMode::Off && self.gate.is_managed(self.id) {
            return Err(LockError::WaitDuringDebugger { name: self.name });
        }
        if !self.owner.is_current() {
            return Err(self.not_entered());
        }
        self.owner.release();
        let rc = self.cond.wait(&self.mutex);
        self.owner.claim();
        check_rc(rc, "monitor_wait", self.name);
        Ok(())
    }

    pub fn notify(&self) {
        check_rc(self.cond.signal(), "monitor_notify", self.name);
    }

    pub fn notify_all(&self) {
        check_rc(self.cond.broadcast(), "monitor_notify_all", self.name);
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.owner.is_held()
    }

    pub fn assert_locked(&self) {
        if self.gate.config().lock_assertions() && !self.is_locked() {
            assertion_failure(FatalError::NotLocked {
                kind: LockKind::Monitor,
                name: self.name,
            });
        }
    }

    pub fn assert_unlocked(&self) {
        if self.gate.config().lock_assertions() && self.is_locked() {
            assertion_failure(FatalError::Locked {
                kind: LockKind::Monitor,
                name: self.name,
            });
        }
    }

    fn not_entered(&self) -> LockError {
        LockError::NotOwner {
            kind: LockKind::Monitor,
            name: self.name,
        }
    }
}

impl core::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Monitor")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("entered", &self.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    fn gate() -> Arc<DebuggerGate> {
        Arc::new(DebuggerGate::default())
    }

    #[test]
    fn wait_wakes_on_notify() {
        let monitor = Arc::new(Monitor::new("classInitLock", gate()));
        let ready = Arc::new(AtomicBool::new(false));

        let waiter = {
            let monitor = Arc::clone(&monitor);
            let ready = Arc::clone(&ready);
            std::thread::spawn(move || {
                monitor.enter();
                while !ready.load(Ordering::Acquire) {
                    monitor.wait().expect("wait");
                }
                monitor.exit().expect("exit");
            })
        };

        monitor.enter();
        ready.store(true, Ordering::Release);
        monitor.notify_all();
        monitor.exit().expect("exit");
        waiter.join().expect("waiter");
        assert!(!monitor.is_locked());
    }

    #[test]
    fn wait_without_entering_is_rejected() {
        let monitor = Monitor::new("classInitLock", gate());
        assert!(matches!(
            monitor.wait(),
            Err(LockError::NotOwner {
                kind: LockKind::Monitor,
                ..
            })
        ));
    }

    #[test]
    fn exit_without_entering_is_rejected() {
        let monitor = Monitor::new("classInitLock", gate());
        assert_eq!(monitor.exit().map_err(|e| e.errno()), Err(libc::EPERM));
    }

    #[test]
    fn managed_monitor_refuses_wait_under_debugger() {
        let gate = gate();
        let monitor = Monitor::new("classInitLock", Arc::clone(&gate));
        gate.manage(monitor.id());
        monitor.enter();
        gate.mark_held(monitor.id(), Hold::Exclusive);
        gate.set_mode(DebuggerMode::Full);
        assert_eq!(
            monitor.wait(),
            Err(LockError::WaitDuringDebugger {
                name: "classInitLock"
            })
        );
        gate.set_mode(DebuggerMode::Off);
        monitor.exit().expect("exit");
    }
}
