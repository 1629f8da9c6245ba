//! The host loader's list of loaded objects.
//!
//! glibc hands out `struct link_map *` as `dlopen` handles, and the link
//! maps of a namespace are chained through `l_next`/`l_prev`. The layout of
//! the first five fields has been stable for decades but is not a public
//! interface: if it changes, lookups here find nothing rather than crash,
//! because every walk is bounded by `OBJC_SO_WALK_LIMIT` and stops on a
//! repeated node.

use std::ffi::{CStr, c_char, c_void};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

use objrt_core::solist::{self, SharedObjectList};

/// Library opened to get a handle into the list. Always loaded in a glibc
/// process, so `RTLD_NOLOAD` never maps anything new.
pub const ANCHOR_LIBRARY: &CStr = c"libc.so.6";

/// Leading fields of glibc's `struct link_map`.
#[repr(C)]
#[derive(Debug)]
pub struct LinkMap {
    pub l_addr: usize,
    pub l_name: *const c_char,
    pub l_ld: *mut c_void,
    pub l_next: *mut LinkMap,
    pub l_prev: *mut LinkMap,
}

static ANCHOR: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());

/// Handle of [`ANCHOR_LIBRARY`], opened on first use.
///
/// No lock: racing callers may each open the library, the first to publish
/// wins and the others close their extra reference.
#[must_use]
pub fn get_anchor() -> Option<NonNull<LinkMap>> {
    let current = ANCHOR.load(Ordering::Acquire);
    if !current.is_null() {
        return NonNull::new(current.cast());
    }
    // SAFETY: the name is a valid C string; RTLD_NOLOAD only looks the
    // library up.
    let handle =
        unsafe { libc::dlopen(ANCHOR_LIBRARY.as_ptr(), libc::RTLD_NOW | libc::RTLD_NOLOAD) };
    if handle.is_null() {
        log::warn!(
            "objrt: {} is not loaded; shared-object lookup disabled",
            ANCHOR_LIBRARY.to_string_lossy()
        );
        return None;
    }
    match ANCHOR.compare_exchange(ptr::null_mut(), handle, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => NonNull::new(handle.cast()),
        Err(winner) => {
            // SAFETY: `handle` came from our own dlopen and was never shared.
            unsafe { libc::dlclose(handle) };
            NonNull::new(winner.cast())
        }
    }
}

/// The list reachable from the anchor, rewound to its first node.
#[derive(Debug, Clone, Copy)]
pub struct NativeSoList {
    head: Option<NonNull<LinkMap>>,
}

impl NativeSoList {
    /// Locate the head by following `l_prev` from the anchor, at most
    /// `limit` steps.
    #[must_use]
    pub fn from_anchor(limit: usize) -> Self {
        let Some(mut node) = get_anchor() else {
            return Self { head: None };
        };
        for _ in 0..limit {
            // SAFETY: `node` is a live link map; loaded objects are never
            // freed while they remain on the list.
            let prev = unsafe { node.as_ref().l_prev };
            match NonNull::new(prev) {
                Some(prev) if prev != node => node = prev,
                _ => break,
            }
        }
        Self { head: Some(node) }
    }
}

impl SharedObjectList for NativeSoList {
    type Node = NonNull<LinkMap>;

    fn head(&self) -> Option<Self::Node> {
        self.head
    }

    fn next(&self, node: Self::Node) -> Option<Self::Node> {
        // SAFETY: see `from_anchor`.
        NonNull::new(unsafe { node.as_ref().l_next })
    }

    fn name(&self, node: Self::Node) -> Option<&[u8]> {
        // SAFETY: see `from_anchor`.
        let name = unsafe { node.as_ref().l_name };
        if name.is_null() {
            return None;
        }
        // SAFETY: `l_name` is a NUL-terminated string owned by the loader.
        Some(unsafe { CStr::from_ptr(name) }.to_bytes())
    }
}

/// Find the loaded object whose recorded name is exactly `name`.
#[must_use]
pub fn find_so(name: &[u8], limit: usize) -> Option<NonNull<LinkMap>> {
    solist::find_by_name(&NativeSoList::from_anchor(limit), name, limit)
}

/// Recorded names of every object on the list, in list order.
#[must_use]
pub fn loaded_names(limit: usize) -> Vec<String> {
    solist::names(&NativeSoList::from_anchor(limit), limit)
        .into_iter()
        .map(|name| String::from_utf8_lossy(&name).into_owned())
        .collect()
}
