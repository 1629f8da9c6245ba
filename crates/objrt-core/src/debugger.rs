//! Debugger-mode gate.
//!
//! While an inspector has the other threads frozen, a lock that one of those
//! threads holds can never be released. The debugger therefore takes the
//! runtime's locks up front (see [`crate::Runtime::start_debugger_mode`]) and
//! switches the gate out of [`DebuggerMode::Off`]. From then on every
//! operation on a *managed* lock skips the native primitive: acquisition
//! checks that the debugger holds the lock, release does nothing.
//!
//! The `Off` path is a single relaxed atomic load.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::config::OsConfig;
use crate::fatal::{FatalError, report_fatal};

/// Process debugger state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum DebuggerMode {
    /// No inspector attached.
    #[default]
    Off = 0,
    /// Some managed locks are held by the debugger; writes are unsafe.
    Partial = 1,
    /// Every managed lock is held by the debugger.
    Full = 2,
}

impl DebuggerMode {
    #[must_use]
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Partial,
            2 => Self::Full,
            _ => Self::Off,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Partial => "partial",
            Self::Full => "full",
        }
    }
}

/// How the debugger holds a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hold {
    /// Read access only (rwlock taken for reading).
    Shared,
    /// Full ownership.
    Exclusive,
}

impl Hold {
    /// Whether holding `self` satisfies an acquisition needing `need`.
    #[must_use]
    pub const fn satisfies(self, need: Hold) -> bool {
        matches!((self, need), (Hold::Exclusive, _) | (Hold::Shared, Hold::Shared))
    }
}

/// Identity of one lock instance, used as the gate's table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockId(u64);

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

impl LockId {
    pub(crate) fn fresh() -> Self {
        Self(NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// What an acquisition must do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// Block (or try) on the native primitive.
    Native,
    /// Leave the native primitive alone; the debugger already owns it.
    Bypass,
}

/// What a release must do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Release the native primitive.
    Native,
    /// Do nothing; the debugger keeps the lock until it detaches.
    Skip,
}

/// A managed lock acquired during debugger mode without the debugger
/// holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebuggerViolation {
    pub id: LockId,
    pub name: &'static str,
    pub mode: DebuggerMode,
    pub need: Hold,
}

/// Callback run on a [`DebuggerViolation`].
pub type ViolationHook = fn(&DebuggerViolation);

/// Default hook: the violation is fatal.
pub fn fatal_violation(violation: &DebuggerViolation) {
    report_fatal(&FatalError::DebuggerModeFailure {
        name: violation.name,
        mode: violation.mode,
    })
}

/// Snapshot of the gate's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GateCounters {
    /// Acquisitions that skipped the native primitive.
    pub bypassed: u64,
    /// Releases that skipped the native primitive.
    pub skipped: u64,
    /// Acquisitions of managed locks the debugger did not hold.
    pub violations: u64,
}

/// Process-wide debugger state consulted by every gated lock.
pub struct DebuggerGate {
    mode: AtomicU8,
    managed: RwLock<HashSet<LockId>>,
    held: Mutex<HashMap<LockId, Hold>>,
    hook: RwLock<ViolationHook>,
    config: OsConfig,
    bypassed: AtomicU64,
    skipped: AtomicU64,
    violations: AtomicU64,
}

impl Default for DebuggerGate {
    fn default() -> Self {
        Self::new(OsConfig::default())
    }
}

impl core::fmt::Debug for DebuggerGate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DebuggerGate")
            .field("mode", &self.mode())
            .field("managed", &self.managed.read().len())
            .field("held", &self.held.lock().len())
            .field("counters", &self.counters())
            .finish()
    }
}

impl DebuggerGate {
    #[must_use]
    pub fn new(config: OsConfig) -> Self {
        Self {
            mode: AtomicU8::new(DebuggerMode::Off as u8),
            managed: RwLock::new(HashSet::new()),
            held: Mutex::new(HashMap::new()),
            hook: RwLock::new(fatal_violation),
            config,
            bypassed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            violations: AtomicU64::new(0),
        }
    }

    /// Settings this gate (and the locks bound to it) run with.
    #[must_use]
    pub const fn config(&self) -> &OsConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn mode(&self) -> DebuggerMode {
        DebuggerMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    /// Switch modes. Touches no gated lock.
    pub fn set_mode(&self, mode: DebuggerMode) {
        let previous = DebuggerMode::from_u8(self.mode.swap(mode as u8, Ordering::AcqRel));
        if self.config.print_debugger_mode && previous != mode {
            log::info!(
                "objrt: debugger mode {} -> {}",
                previous.as_str(),
                mode.as_str()
            );
        }
    }

    /// Mark `id` as managed during debugger mode.
    pub fn manage(&self, id: LockId) {
        self.managed.write().insert(id);
    }

    #[must_use]
    pub fn is_managed(&self, id: LockId) -> bool {
        self.managed.read().contains(&id)
    }

    /// Record that the debugger holds `id`.
    pub fn mark_held(&self, id: LockId, hold: Hold) {
        self.held.lock().insert(id, hold);
    }

    /// Forget every hold; returns what was recorded.
    pub fn clear_held(&self) -> HashMap<LockId, Hold> {
        std::mem::take(&mut *self.held.lock())
    }

    #[must_use]
    pub fn held(&self, id: LockId) -> Option<Hold> {
        self.held.lock().get(&id).copied()
    }

    /// Replace the violation callback.
    pub fn set_violation_hook(&self, hook: ViolationHook) {
        *self.hook.write() = hook;
    }

    /// Decide how to acquire lock `id`, needing `need` access.
    ///
    /// Under debugger mode a managed lock is never acquired natively. If the
    /// debugger does not hold it with sufficient access the violation hook
    /// runs first.
    #[inline]
    pub fn acquire_strategy(&self, id: LockId, name: &'static str, need: Hold) -> Acquire {
        let mode = self.mode();
        if mode == DebuggerMode::Off || !self.is_managed(id) {
            return Acquire::Native;
        }
        let satisfied = self.held(id).is_some_and(|hold| hold.satisfies(need));
        if !satisfied {
            self.violations.fetch_add(1, Ordering::Relaxed);
            let hook = *self.hook.read();
            hook(&DebuggerViolation {
                id,
                name,
                mode,
                need,
            });
        }
        self.bypassed.fetch_add(1, Ordering::Relaxed);
        log::debug!("objrt: {name} acquired under debugger mode {}", mode.as_str());
        Acquire::Bypass
    }

    /// Decide how to release lock `id`.
    #[inline]
    pub fn release_strategy(&self, id: LockId) -> Release {
        if self.mode() == DebuggerMode::Off || !self.is_managed(id) {
            return Release::Native;
        }
        self.skipped.fetch_add(1, Ordering::Relaxed);
        Release::Skip
    }

    #[must_use]
    pub fn counters(&self) -> GateCounters {
        GateCounters {
            bypassed: self.bypassed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            violations: self.violations.load(Ordering::Relaxed),
        }
    }

    /// Test hook: zero the counters.
    #[doc(hidden)]
    pub fn reset_counters_for_tests(&self) {
        self.bypassed.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
        self.violations.store(0, Ordering::Relaxed);
    }
}
