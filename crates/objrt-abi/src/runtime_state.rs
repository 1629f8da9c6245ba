//! The process-wide runtime instance.
//!
//! Created lazily on first use from the environment configuration. The slot
//! is a single atomic pointer: whoever publishes first wins, a racing
//! initializer drops its own copy and adopts the winner. The instance is
//! never torn down.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use objrt_core::Runtime;
use objrt_core::debugger::{DebuggerViolation, fatal_violation};

static RUNTIME: AtomicPtr<Runtime> = AtomicPtr::new(ptr::null_mut());

/// The process runtime, created on first call.
pub fn runtime() -> &'static Runtime {
    let current = RUNTIME.load(Ordering::Acquire);
    if !current.is_null() {
        // SAFETY: a published pointer comes from Box::into_raw and is never freed.
        return unsafe { &*current };
    }
    match publish(Box::new(Runtime::from_env())) {
        Ok(rt) => rt,
        Err((_, winner)) => winner,
    }
}

/// Install `rt` as the process runtime. Fails, handing `rt` back together
/// with the runtime already in place, if another one was published first.
pub fn install_runtime(rt: Runtime) -> Result<&'static Runtime, (Runtime, &'static Runtime)> {
    publish(Box::new(rt)).map_err(|(rt, winner)| (*rt, winner))
}

fn publish(rt: Box<Runtime>) -> Result<&'static Runtime, (Box<Runtime>, &'static Runtime)> {
    rt.gate().set_violation_hook(report_violation);
    let candidate = Box::into_raw(rt);
    match RUNTIME.compare_exchange(
        ptr::null_mut(),
        candidate,
        Ordering::AcqRel,
        Ordering::Acquire,
    ) {
        // SAFETY: we just published `candidate`; it is never freed.
        Ok(_) => Ok(unsafe { &*candidate }),
        Err(winner) => {
            // SAFETY: `candidate` was never shared. `winner` is published and
            // lives forever.
            let rt = unsafe { Box::from_raw(candidate) };
            Err((rt, unsafe { &*winner }))
        }
    }
}

fn report_violation(violation: &DebuggerViolation) {
    crate::debugger_abi::gdb_objc_debugger_mode_failure();
    fatal_violation(violation);
}
