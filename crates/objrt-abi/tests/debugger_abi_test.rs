#![cfg(target_os = "linux")]

use std::sync::Mutex;

use objrt_abi::debugger_abi::{
    gdb_objc_is_runtime_locked, objrt_debugger_mode, objrt_end_debugger_mode,
    objrt_start_debugger_mode,
};
use objrt_abi::runtime;

static TEST_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn idle_process_enters_full_debugger_mode() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    assert!(!gdb_objc_is_runtime_locked());
    assert_eq!(objrt_start_debugger_mode(), 2);
    assert_eq!(objrt_debugger_mode(), 2);
    assert!(gdb_objc_is_runtime_locked());

    // The debugger's own thread can still take managed locks.
    runtime().runtime_lock().write();
    runtime().runtime_lock().unlock_write().expect("skipped");

    objrt_end_debugger_mode();
    assert_eq!(objrt_debugger_mode(), 0);
    assert!(!gdb_objc_is_runtime_locked());
}

#[test]
fn busy_runtime_lock_refuses_debugger_mode() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    runtime().runtime_lock().read();
    let mode = std::thread::spawn(|| objrt_start_debugger_mode())
        .join()
        .expect("debugger thread");
    assert_eq!(mode, 0);
    assert!(gdb_objc_is_runtime_locked());
    runtime().runtime_lock().unlock_read().expect("unlock");
    assert!(!gdb_objc_is_runtime_locked());
}

#[test]
fn busy_selector_lock_gives_partial_mode() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    runtime().sel_lock().write();
    let mode = std::thread::spawn(|| {
        let mode = objrt_start_debugger_mode();
        objrt_end_debugger_mode();
        mode
    })
    .join()
    .expect("debugger thread");
    assert_eq!(mode, 1);
    runtime().sel_lock().unlock_write().expect("unlock");
}
