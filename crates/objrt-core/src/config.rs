//! OS-layer configuration.
//!
//! Settings come from the environment:
//! - `OBJC_PRINT_IMAGES`: log every image mapped or unmapped.
//! - `OBJC_PRINT_DEBUGGER_MODE`: log debugger-mode transitions.
//! - `OBJC_DEBUG_LOCKS`: keep `assert_*` lock checks active in release builds.
//! - `OBJC_SO_WALK_LIMIT`: maximum number of nodes the shared-object lookup
//!   visits before giving up.

use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

/// Default traversal bound for the shared-object lookup.
pub const DEFAULT_SO_WALK_LIMIT: usize = 4096;

/// Resolved OS-layer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsConfig {
    /// Log image map/unmap events at `info`.
    pub print_images: bool,
    /// Log debugger-mode transitions at `info`.
    pub print_debugger_mode: bool,
    /// Run lock assertions even without `debug_assertions`.
    pub debug_locks: bool,
    /// Traversal bound for the shared-object lookup.
    pub so_walk_limit: usize,
}

impl Default for OsConfig {
    fn default() -> Self {
        Self {
            print_images: false,
            print_debugger_mode: false,
            debug_locks: false,
            so_walk_limit: DEFAULT_SO_WALK_LIMIT,
        }
    }
}

impl OsConfig {
    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(mut lookup: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            print_images: lookup("OBJC_PRINT_IMAGES").is_some_and(|v| parse_flag(&v)),
            print_debugger_mode: lookup("OBJC_PRINT_DEBUGGER_MODE").is_some_and(|v| parse_flag(&v)),
            debug_locks: lookup("OBJC_DEBUG_LOCKS").is_some_and(|v| parse_flag(&v)),
            so_walk_limit: lookup("OBJC_SO_WALK_LIMIT")
                .and_then(|v| parse_limit(&v))
                .unwrap_or(defaults.so_walk_limit),
        }
    }

    /// Build a configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Whether lock assertions run.
    #[must_use]
    pub const fn lock_assertions(&self) -> bool {
        cfg!(debug_assertions) || self.debug_locks
    }
}

/// Parse a boolean setting (case-insensitive).
#[must_use]
pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "yes" | "y" | "1" | "true" | "on"
    )
}

fn parse_limit(raw: &str) -> Option<usize> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    };
    parsed.filter(|&limit| limit > 0)
}

// 0=unresolved, 1=resolving, 2=ready.
// A non-blocking state machine instead of OnceLock: configuration is read from
// inside image-load callbacks, and a reentrant read during resolution must not
// park on OnceLock's internal futex.
const STATE_UNRESOLVED: u8 = 0;
const STATE_RESOLVING: u8 = 1;
const STATE_READY: u8 = 2;

static STATE: AtomicU8 = AtomicU8::new(STATE_UNRESOLVED);
static CONFIG: AtomicPtr<OsConfig> = AtomicPtr::new(std::ptr::null_mut());

/// Process-wide configuration (reads the environment on first call).
///
/// A call that arrives while another call is resolving gets the defaults.
#[must_use]
pub fn os_config() -> OsConfig {
    if let Some(config) = cached() {
        return config;
    }

    if STATE
        .compare_exchange(
            STATE_UNRESOLVED,
            STATE_RESOLVING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        return cached().unwrap_or_default();
    }

    let config = OsConfig::from_env();
    // Leaked: the configuration lives for the rest of the process.
    let leaked: &'static OsConfig = Box::leak(Box::new(config));
    CONFIG.store(std::ptr::from_ref(leaked).cast_mut(), Ordering::Release);
    STATE.store(STATE_READY, Ordering::Release);
    config
}

fn cached() -> Option<OsConfig> {
    if STATE.load(Ordering::Acquire) != STATE_READY {
        return None;
    }
    let ptr = CONFIG.load(Ordering::Acquire);
    std::ptr::NonNull::new(ptr).map(|ptr| {
        // Only ever set from a leaked `&'static OsConfig`.
        let config: &'static OsConfig = leaked_ref(ptr);
        *config
    })
}

#[allow(unsafe_code)]
fn leaked_ref(ptr: std::ptr::NonNull<OsConfig>) -> &'static OsConfig {
    // SAFETY: CONFIG only holds pointers produced by `Box::leak`, which are
    // valid for the rest of the process and never mutated.
    unsafe { ptr.as_ref() }
}
