//! Debugger entry points.
//!
//! A debugger that has stopped every other thread calls
//! `objrt_start_debugger_mode` before evaluating expressions that touch the
//! runtime, and `objrt_end_debugger_mode` before resuming.

use std::ffi::c_int;

use objrt_core::DebuggerMode;

use crate::runtime_state::runtime;

/// Enter debugger mode. Returns 0 (refused), 1 (partial) or 2 (full).
#[unsafe(no_mangle)]
pub extern "C" fn objrt_start_debugger_mode() -> c_int {
    runtime().start_debugger_mode() as c_int
}

#[unsafe(no_mangle)]
pub extern "C" fn objrt_end_debugger_mode() {
    runtime().end_debugger_mode();
}

/// Current mode, same encoding as [`objrt_start_debugger_mode`].
#[unsafe(no_mangle)]
pub extern "C" fn objrt_debugger_mode() -> c_int {
    runtime().debugger_mode() as c_int
}

/// Whether another thread holds a lock the debugger would need.
#[unsafe(no_mangle)]
pub extern "C" fn gdb_objc_is_runtime_locked() -> bool {
    runtime().is_runtime_locked()
}

/// Called when a non-debugger thread reaches a lock the debugger does not
/// hold, just before the process aborts. Set a breakpoint here.
#[unsafe(no_mangle)]
#[inline(never)]
pub extern "C" fn gdb_objc_debugger_mode_failure() {
    let mode = runtime().debugger_mode();
    if mode != DebuggerMode::Off {
        log::error!("objrt: debugger mode failure in {} mode", mode.as_str());
    }
}
