//! Thin owners of POSIX thread primitives.
//!
//! Each primitive lives in its own heap allocation: pthread objects must not
//! move once initialized.

use std::cell::UnsafeCell;

/// An initialized `pthread_mutex_t`.
pub(crate) struct NativeMutex {
    raw: Box<UnsafeCell<libc::pthread_mutex_t>>,
}

// SAFETY: pthread mutexes are designed to be shared between threads; all
// access goes through the pthread API.
unsafe impl Send for NativeMutex {}
// SAFETY: see above.
unsafe impl Sync for NativeMutex {}

impl NativeMutex {
    /// Create a default (non-recursive) mutex.
    pub(crate) fn new() -> Result<Self, i32> {
        Self::with_type(None)
    }

    /// Create a mutex that the owning thread may re-acquire.
    pub(crate) fn recursive() -> Result<Self, i32> {
        Self::with_type(Some(libc::PTHREAD_MUTEX_RECURSIVE))
    }

    fn with_type(kind: Option<libc::c_int>) -> Result<Self, i32> {
        let raw = Box::new(UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER));
        let rc = match kind {
            None => {
                // SAFETY: `raw` is a fresh, pinned allocation.
                unsafe { libc::pthread_mutex_init(raw.get(), std::ptr::null()) }
            }
            Some(kind) => {
                let mut attr = std::mem::MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
                // SAFETY: `attr` is initialized by `pthread_mutexattr_init`
                // before any other use and destroyed before it goes away.
                unsafe {
                    let rc = libc::pthread_mutexattr_init(attr.as_mut_ptr());
                    if rc != 0 {
                        return Err(rc);
                    }
                    let rc = libc::pthread_mutexattr_settype(attr.as_mut_ptr(), kind);
                    let rc = if rc == 0 {
                        libc::pthread_mutex_init(raw.get(), attr.as_ptr())
                    } else {
                        rc
                    };
                    libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
                    rc
                }
            }
        };
        if rc != 0 {
            return Err(rc);
        }
        Ok(Self { raw })
    }

    #[inline]
    pub(crate) fn lock(&self) -> i32 {
        // SAFETY: initialized in the constructor and alive until drop.
        unsafe { libc::pthread_mutex_lock(self.raw.get()) }
    }

    /// `true` if the mutex was acquired.
    #[inline]
    pub(crate) fn try_lock(&self) -> bool {
        // SAFETY: as for `lock`.
        unsafe { libc::pthread_mutex_trylock(self.raw.get()) == 0 }
    }

    #[inline]
    pub(crate) fn unlock(&self) -> i32 {
        // SAFETY: callers only unlock a mutex their thread acquired.
        unsafe { libc::pthread_mutex_unlock(self.raw.get()) }
    }

    fn as_ptr(&self) -> *mut libc::pthread_mutex_t {
        self.raw.get()
    }
}

impl Drop for NativeMutex {
    fn drop(&mut self) {
        // SAFETY: no other reference exists once we are being dropped.
        unsafe {
            libc::pthread_mutex_destroy(self.raw.get());
        }
    }
}

/// An initialized `pthread_cond_t`.
pub(crate) struct NativeCond {
    raw: Box<UnsafeCell<libc::pthread_cond_t>>,
}

// SAFETY: condition variables are shared between threads by design.
unsafe impl Send for NativeCond {}
// SAFETY: see above.
unsafe impl Sync for NativeCond {}

impl NativeCond {
    pub(crate) fn new() -> Result<Self, i32> {
        let raw = Box::new(UnsafeCell::new(libc::PTHREAD_COND_INITIALIZER));
        // SAFETY: fresh, pinned allocation.
        let rc = unsafe { libc::pthread_cond_init(raw.get(), std::ptr::null()) };
        if rc != 0 {
            return Err(rc);
        }
        Ok(Self { raw })
    }

    /// Atomically release `mutex` and sleep; `mutex` is re-acquired before
    /// returning. The calling thread must hold `mutex`.
    pub(crate) fn wait(&self, mutex: &NativeMutex) -> i32 {
        // SAFETY: both primitives are initialized; the caller holds `mutex`.
        unsafe { libc::pthread_cond_wait(self.raw.get(), mutex.as_ptr()) }
    }

    pub(crate) fn signal(&self) -> i32 {
        // SAFETY: initialized in the constructor.
        unsafe { libc::pthread_cond_signal(self.raw.get()) }
    }

    pub(crate) fn broadcast(&self) -> i32 {
        // SAFETY: initialized in the constructor.
        unsafe { libc::pthread_cond_broadcast(self.raw.get()) }
    }
}

impl Drop for NativeCond {
    fn drop(&mut self) {
        // SAFETY: no waiters can exist once we are being dropped.
        unsafe {
            libc::pthread_cond_destroy(self.raw.get());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_mutex_is_not_reentrant_for_try() {
        let m = NativeMutex::new().expect("mutex");
        assert_eq!(m.lock(), 0);
        assert!(!m.try_lock());
        assert_eq!(m.unlock(), 0);
        assert!(m.try_lock());
        assert_eq!(m.unlock(), 0);
    }

    #[test]
    fn recursive_mutex_reenters() {
        let m = NativeMutex::recursive().expect("mutex");
        assert_eq!(m.lock(), 0);
        assert!(m.try_lock());
        assert_eq!(m.unlock(), 0);
        assert_eq!(m.unlock(), 0);
    }

    #[test]
    fn cond_signal_without_waiters_succeeds() {
        let c = NativeCond::new().expect("cond");
        assert_eq!(c.signal(), 0);
        assert_eq!(c.broadcast(), 0);
    }
}
