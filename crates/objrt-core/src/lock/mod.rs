//! Debugger-aware locks.
//!
//! Four primitive kinds sit on POSIX threads: [`Mutex`], [`RecursiveMutex`],
//! [`Monitor`] (mutex plus condition variable) and [`RwLock`]. Every
//! acquisition and release first asks the lock's [`DebuggerGate`] for a
//! strategy; under debugger mode a managed lock never touches its native
//! primitive.
//!
//! Each lock records its owning thread so that a release by the wrong thread
//! becomes [`LockError::NotOwner`](crate::LockError::NotOwner) instead of
//! undefined native behavior.

mod monitor;
mod mutex;
mod native;
mod recursive;
mod rwlock;

use std::cell::{Cell, UnsafeCell};
use std::sync::atomic::{AtomicU64, Ordering};

pub use monitor::Monitor;
pub use mutex::Mutex;
pub use recursive::RecursiveMutex;
pub use rwlock::{RwLock, RwMode};

use crate::error::LockKind;
use crate::fatal::{FatalError, report_fatal};

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: Cell<u64> = const { Cell::new(0) };
}

/// Small nonzero identifier of the calling thread.
pub(crate) fn current_thread_token() -> u64 {
    THREAD_TOKEN.with(|slot| {
        let existing = slot.get();
        if existing != 0 {
            return existing;
        }
        let token = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
        slot.set(token);
        token
    })
}

/// Owning-thread slot; 0 means unowned.
#[derive(Debug, Default)]
pub(crate) struct Owner(AtomicU64);

impl Owner {
    #[inline]
    pub(crate) fn claim(&self) {
        self.0.store(current_thread_token(), Ordering::Release);
    }

    #[inline]
    pub(crate) fn release(&self) {
        self.0.store(0, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_current(&self) -> bool {
        self.0.load(Ordering::Acquire) == current_thread_token()
    }

    #[inline]
    pub(crate) fn is_held(&self) -> bool {
        self.0.load(Ordering::Acquire) != 0
    }
}

/// Native call failed after initialization: the lock is unusable.
#[cold]
pub(crate) fn native_failure(op: &'static str, name: &'static str, code: i32) -> ! {
    report_fatal(&FatalError::Native { op, name, code })
}

#[cold]
pub(crate) fn assertion_failure(err: FatalError) -> ! {
    report_fatal(&err)
}

pub(crate) fn check_rc(rc: i32, op: &'static str, name: &'static str) {
    if rc != 0 {
        native_failure(op, name, rc);
    }
}

pub(crate) fn init_failure(kind: LockKind, name: &'static str, code: i32) -> crate::LockError {
    crate::LockError::Init { kind, name, code }
}

/// Data protected by a gated [`Mutex`].
///
/// Access only happens inside [`Guarded::with`], which holds the lock for the
/// duration of the closure.
pub struct Guarded<T> {
    lock: Mutex,
    value: UnsafeCell<T>,
}

// SAFETY: `value` is only reachable through `with`, which holds `lock`.
unsafe impl<T: Send> Send for Guarded<T> {}
// SAFETY: as above; the lock serializes every access.
unsafe impl<T: Send> Sync for Guarded<T> {}

impl<T> Guarded<T> {
    pub fn new(lock: Mutex, value: T) -> Self {
        Self {
            lock,
            value: UnsafeCell::new(value),
        }
    }

    /// The lock protecting the value.
    pub fn lock(&self) -> &Mutex {
        &self.lock
    }

    /// Run `f` with exclusive access to the value.
    ///
    /// Under debugger mode the lock may be bypassed: the debugger holds it and
    /// the other threads are frozen, so access is still exclusive.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.lock.lock();
        let _unlock = UnlockOnDrop(&self.lock);
        // SAFETY: the lock is held (or owned by the debugger with every other
        // thread frozen) until `_unlock` drops.
        let value = unsafe { &mut *self.value.get() };
        f(value)
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for Guarded<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Guarded")
            .field("lock", &self.lock.name())
            .finish_non_exhaustive()
    }
}

struct UnlockOnDrop<'a>(&'a Mutex);

impl Drop for UnlockOnDrop<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.0.unlock() {
            log::debug!("objrt: {err}");
        }
    }
}
