//! The runtime context: every process-wide lock, the debugger gate, the
//! image registry and the loader shim, created together and shared by
//! reference.

use std::sync::Arc;

use crate::config::OsConfig;
use crate::debugger::{DebuggerGate, DebuggerMode, Hold};
use crate::fatal::{FatalError, report_fatal};
use crate::loader::LoaderShim;
use crate::lock::{Monitor, Mutex, RecursiveMutex, RwLock, RwMode};
use crate::registry::HeaderRegistry;

/// A lock the debugger took on entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Taken {
    Runtime(RwMode),
    CacheUpdate,
    Sel(RwMode),
    Registry,
}

/// Process-wide runtime state.
pub struct Runtime {
    gate: Arc<DebuggerGate>,
    runtime_lock: RwLock,
    sel_lock: RwLock,
    cache_update_lock: Mutex,
    class_lock: Mutex,
    method_list_lock: Mutex,
    load_method_lock: RecursiveMutex,
    class_init_lock: Monitor,
    registry: Arc<HeaderRegistry>,
    loader: LoaderShim,
    taken: parking_lot::Mutex<Vec<Taken>>,
}

impl Runtime {
    /// Create every lock; a lock that cannot be created is fatal.
    pub fn new(config: OsConfig) -> Self {
        let gate = Arc::new(DebuggerGate::new(config));
        let runtime_lock = RwLock::new("runtimeLock", Arc::clone(&gate));
        let sel_lock = RwLock::new("selLock", Arc::clone(&gate));
        let cache_update_lock = Mutex::new("cacheUpdateLock", Arc::clone(&gate));
        let class_lock = Mutex::new("classLock", Arc::clone(&gate));
        let method_list_lock = Mutex::new("methodListLock", Arc::clone(&gate));
        let load_method_lock = RecursiveMutex::declare("loadMethodLock", Arc::clone(&gate));
        if let Err(err) = load_method_lock.init() {
            report_fatal(&FatalError::LockInit(err));
        }
        let class_init_lock = Monitor::new("classInitLock", Arc::clone(&gate));
        let registry = Arc::new(HeaderRegistry::new(Arc::clone(&gate)));
        let loader = LoaderShim::new(Arc::clone(&registry), Arc::clone(&gate));

        gate.manage(runtime_lock.id());
        gate.manage(sel_lock.id());
        gate.manage(cache_update_lock.id());
        gate.manage(registry.lock_id());

        Self {
            gate,
            runtime_lock,
            sel_lock,
            cache_update_lock,
            class_lock,
            method_list_lock,
            load_method_lock,
            class_init_lock,
            registry,
            loader,
            taken: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// A runtime configured from the process environment.
    pub fn from_env() -> Self {
        Self::new(crate::config::os_config())
    }

    #[must_use]
    pub fn gate(&self) -> &Arc<DebuggerGate> {
        &self.gate
    }

    #[must_use]
    pub fn config(&self) -> &OsConfig {
        self.gate.config()
    }

    #[must_use]
    pub fn runtime_lock(&self) -> &RwLock {
        &self.runtime_lock
    }

    #[must_use]
    pub fn sel_lock(&self) -> &RwLock {
        &self.sel_lock
    }

    #[must_use]
    pub fn cache_update_lock(&self) -> &Mutex {
        &self.cache_update_lock
    }

    #[must_use]
    pub fn class_lock(&self) -> &Mutex {
        &self.class_lock
    }

    #[must_use]
    pub fn method_list_lock(&self) -> &Mutex {
        &self.method_list_lock
    }

    #[must_use]
    pub fn load_method_lock(&self) -> &RecursiveMutex {
        &self.load_method_lock
    }

    #[must_use]
    pub fn class_init_lock(&self) -> &Monitor {
        &self.class_init_lock
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<HeaderRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn loader(&self) -> &LoaderShim {
        &self.loader
    }

    #[must_use]
    pub fn debugger_mode(&self) -> DebuggerMode {
        self.gate.mode()
    }

    /// Take the runtime's locks for an attached debugger and enter debugger
    /// mode. Never blocks.
    ///
    /// `runtimeLock` and `cacheUpdateLock` are required: if either is
    /// unavailable nothing is taken and the result is [`DebuggerMode::Off`].
    /// Read-only access to `runtimeLock`, or a missing `selLock` or registry
    /// lock, gives [`DebuggerMode::Partial`]. Calling this again while
    /// already in debugger mode returns the current mode.
    pub fn start_debugger_mode(&self) -> DebuggerMode {
        let current = self.gate.mode();
        if current != DebuggerMode::Off {
            return current;
        }

        let mut taken = Vec::with_capacity(4);
        let mut mode = DebuggerMode::Full;

        if self.runtime_lock.raw_try(RwMode::Write) {
            taken.push(Taken::Runtime(RwMode::Write));
        } else if self.runtime_lock.raw_try(RwMode::Read) {
            taken.push(Taken::Runtime(RwMode::Read));
            mode = DebuggerMode::Partial;
        } else {
            self.log_refusal("runtimeLock");
            return DebuggerMode::Off;
        }

        if self.cache_update_lock.raw_try_lock() {
            taken.push(Taken::CacheUpdate);
        } else {
            self.release(&taken);
            self.log_refusal("cacheUpdateLock");
            return DebuggerMode::Off;
        }

        if self.sel_lock.raw_try(RwMode::Write) {
            taken.push(Taken::Sel(RwMode::Write));
        } else if self.sel_lock.raw_try(RwMode::Read) {
            taken.push(Taken::Sel(RwMode::Read));
            mode = DebuggerMode::Partial;
        } else {
            mode = DebuggerMode::Partial;
        }

        if self.registry.lock().raw_try_lock() {
            taken.push(Taken::Registry);
        } else {
            mode = DebuggerMode::Partial;
        }

        for &lock in &taken {
            let (id, hold) = match lock {
                Taken::Runtime(held) => (self.runtime_lock.id(), hold_for(held)),
                Taken::CacheUpdate => (self.cache_update_lock.id(), Hold::Exclusive),
                Taken::Sel(held) => (self.sel_lock.id(), hold_for(held)),
                Taken::Registry => (self.registry.lock_id(), Hold::Exclusive),
            };
            self.gate.mark_held(id, hold);
        }
        *self.taken.lock() = taken;
        self.gate.set_mode(mode);
        mode
    }

    /// Leave debugger mode and release what [`start_debugger_mode`] took.
    ///
    /// May run on a different thread than the one that started debugger
    /// mode. The native mutexes are then unlocked by a thread that does not
    /// own them, which POSIX leaves undefined for default mutexes; this
    /// relies on glibc, whose default mutexes do not check the owner.
    ///
    /// [`start_debugger_mode`]: Runtime::start_debugger_mode
    pub fn end_debugger_mode(&self) {
        if self.gate.mode() == DebuggerMode::Off {
            return;
        }
        self.gate.set_mode(DebuggerMode::Off);
        let taken = std::mem::take(&mut *self.taken.lock());
        self.release(&taken);
        self.gate.clear_held();
    }

    /// Whether some thread holds one of the locks a debugger needs to read
    /// runtime structures.
    #[must_use]
    pub fn is_runtime_locked(&self) -> bool {
        self.runtime_lock.is_locked()
            || self.method_list_lock.is_locked()
            || self.class_lock.is_locked()
            || self.cache_update_lock.is_locked()
    }

    fn release(&self, taken: &[Taken]) {
        for lock in taken.iter().rev() {
            match lock {
                Taken::Runtime(_) => self.runtime_lock.raw_unlock(),
                Taken::CacheUpdate => self.cache_update_lock.raw_unlock(),
                Taken::Sel(_) => self.sel_lock.raw_unlock(),
                Taken::Registry => self.registry.lock().raw_unlock(),
            }
        }
    }

    fn log_refusal(&self, lock: &str) {
        if self.config().print_debugger_mode {
            log::info!("objrt: debugger mode refused, {lock} is busy");
        }
    }
}

const fn hold_for(mode: RwMode) -> Hold {
    match mode {
        RwMode::Read => Hold::Shared,
        RwMode::Write => Hold::Exclusive,
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(OsConfig::default())
    }
}

impl core::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Runtime")
            .field("gate", &self.gate)
            .field("registry", &self.registry)
            .field("loader", &self.loader)
            .finish_non_exhaustive()
    }
}
