use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use objrt_core::debugger::DebuggerViolation;
use objrt_core::{
    DebuggerGate, DebuggerMode, Guarded, Hold, Monitor, Mutex, RecursiveMutex, RwLock, Runtime,
};

const THREADS: usize = 8;
const ROUNDS: usize = 2_000;

/// Non-atomic read-modify-write that loses updates unless serialized.
fn racy_increment(counter: &AtomicUsize) {
    let value = counter.load(Ordering::Relaxed);
    thread::yield_now();
    counter.store(value + 1, Ordering::Relaxed);
}

fn hammer(critical: impl Fn() + Send + Sync + 'static) {
    let critical = Arc::new(critical);
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let critical = Arc::clone(&critical);
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    critical();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked");
    }
}

fn gate() -> Arc<DebuggerGate> {
    Arc::new(DebuggerGate::default())
}

#[test]
fn mutex_loses_no_increments() {
    let lock = Arc::new(Mutex::new("classLock", gate()));
    let counter = Arc::new(AtomicUsize::new(0));
    {
        let lock = Arc::clone(&lock);
        let counter = Arc::clone(&counter);
        hammer(move || {
            lock.lock();
            racy_increment(&counter);
            lock.unlock().expect("owner unlock");
        });
    }
    assert_eq!(counter.load(Ordering::SeqCst), THREADS * ROUNDS);
}

#[test]
fn recursive_mutex_loses_no_increments() {
    let lock = Arc::new(RecursiveMutex::new("loadMethodLock", gate()));
    let counter = Arc::new(AtomicUsize::new(0));
    {
        let lock = Arc::clone(&lock);
        let counter = Arc::clone(&counter);
        hammer(move || {
            lock.lock();
            lock.lock();
            racy_increment(&counter);
            lock.unlock().expect("inner unlock");
            lock.unlock().expect("outer unlock");
        });
    }
    assert_eq!(counter.load(Ordering::SeqCst), THREADS * ROUNDS);
}

#[test]
fn monitor_loses_no_increments() {
    let monitor = Arc::new(Monitor::new("classInitLock", gate()));
    let counter = Arc::new(AtomicUsize::new(0));
    {
        let monitor = Arc::clone(&monitor);
        let counter = Arc::clone(&counter);
        hammer(move || {
            monitor.enter();
            racy_increment(&counter);
            monitor.notify_all();
            monitor.exit().expect("exit");
        });
    }
    assert_eq!(counter.load(Ordering::SeqCst), THREADS * ROUNDS);
}

#[test]
fn rwlock_readers_and_writers_never_overlap() {
    let lock = Arc::new(RwLock::new("runtimeLock", gate()));
    let counter = Arc::new(AtomicUsize::new(0));
    let inside = Arc::new(AtomicUsize::new(0));
    {
        let lock = Arc::clone(&lock);
        let counter = Arc::clone(&counter);
        let inside = Arc::clone(&inside);
        let turn = AtomicUsize::new(0);
        hammer(move || {
            let read = turn.fetch_add(1, Ordering::Relaxed) % 2 == 0;
            if read {
                lock.read();
            } else {
                lock.write();
            }
            assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
            racy_increment(&counter);
            inside.fetch_sub(1, Ordering::SeqCst);
            if read {
                lock.unlock_read().expect("unlock read");
            } else {
                lock.unlock_write().expect("unlock write");
            }
        });
    }
    assert_eq!(counter.load(Ordering::SeqCst), THREADS * ROUNDS);
}

#[test]
fn guarded_value_loses_no_increments() {
    let value = Arc::new(Guarded::new(Mutex::new("methodListLock", gate()), 0usize));
    {
        let value = Arc::clone(&value);
        hammer(move || value.with(|v| *v += 1));
    }
    assert_eq!(value.with(|v| *v), THREADS * ROUNDS);
}

#[test]
fn full_mode_unlock_is_noop_for_every_kind() {
    let gate = gate();
    let mutex = Mutex::new("cacheUpdateLock", Arc::clone(&gate));
    let recursive = RecursiveMutex::new("loadMethodLock", Arc::clone(&gate));
    let monitor = Monitor::new("classInitLock", Arc::clone(&gate));
    let rwlock = RwLock::new("selLock", Arc::clone(&gate));

    mutex.lock();
    recursive.lock();
    monitor.enter();
    rwlock.write();
    for id in [mutex.id(), recursive.id(), monitor.id(), rwlock.id()] {
        gate.manage(id);
        gate.mark_held(id, Hold::Exclusive);
    }
    gate.set_mode(DebuggerMode::Full);

    assert!(mutex.unlock().is_ok());
    assert!(recursive.unlock().is_ok());
    assert!(monitor.exit().is_ok());
    assert!(rwlock.unlock_write().is_ok());
    assert!(mutex.is_locked());
    assert!(recursive.is_locked());
    assert!(monitor.is_locked());
    assert!(rwlock.is_locked());

    assert!(mutex.try_lock());
    assert!(recursive.try_lock());
    assert!(monitor.try_enter());
    assert!(rwlock.try_write());
    assert!(rwlock.try_read());

    let counters = gate.counters();
    assert_eq!(counters.skipped, 4);
    assert_eq!(counters.bypassed, 5);
    assert_eq!(counters.violations, 0);

    gate.set_mode(DebuggerMode::Off);
    gate.clear_held();
    mutex.unlock().expect("unlock");
    recursive.unlock().expect("unlock");
    monitor.exit().expect("exit");
    rwlock.unlock_write().expect("unlock");
    assert!(!mutex.is_locked());
    assert!(!rwlock.is_locked());
}

#[test]
fn full_mode_try_lock_does_not_block_on_lock_held_by_another_thread() {
    let rt = Arc::new(Runtime::default());
    let debugger = {
        let rt = Arc::clone(&rt);
        thread::spawn(move || rt.start_debugger_mode())
    };
    assert_eq!(debugger.join().expect("debugger"), DebuggerMode::Full);

    // The debugger thread is gone but still owns the locks; this thread can
    // pass through them without blocking.
    assert!(rt.runtime_lock().try_write());
    rt.runtime_lock().write();
    assert!(rt.cache_update_lock().try_lock());
    assert!(rt.runtime_lock().unlock_write().is_ok());
    assert!(rt.runtime_lock().is_locked());

    rt.end_debugger_mode();
    assert!(!rt.runtime_lock().is_locked());
    assert!(!rt.cache_update_lock().is_locked());
}

static VIOLATIONS: AtomicUsize = AtomicUsize::new(0);

fn count_violation(violation: &DebuggerViolation) {
    assert_eq!(violation.name, "selLock");
    VIOLATIONS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn managed_lock_not_held_by_debugger_reports_violation() {
    let gate = gate();
    gate.set_violation_hook(count_violation);
    let lock = RwLock::new("selLock", Arc::clone(&gate));
    gate.manage(lock.id());
    gate.set_mode(DebuggerMode::Partial);

    assert!(lock.try_write());
    assert_eq!(VIOLATIONS.load(Ordering::SeqCst), 1);
    assert!(!lock.is_locked());
    assert_eq!(gate.counters().violations, 1);
}
