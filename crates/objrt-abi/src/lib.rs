// Every export takes raw pointers from C callers and checks them for null;
// per-function safety sections would only repeat that.
#![allow(clippy::missing_safety_doc)]
//! # objrt-abi
//!
//! `extern "C"` boundary for the objrt runtime OS layer.
//!
//! This crate owns the process-wide [`Runtime`](objrt_core::Runtime) and
//! connects it to the host:
//!
//! ```text
//! host loader -> dl_iterate_phdr -> host::sync_host_images -> LoaderShim -> registry
//! C caller    -> dyld_abi / debugger_abi -> runtime_state::runtime() -> objrt-core
//! ```
//!
//! Everything that depends on glibc's private layouts (the `link_map` list)
//! lives in [`link_map`].

pub mod debugger_abi;
pub mod dyld_abi;
pub mod host;
pub mod link_map;
pub mod runtime_state;

pub use host::{HostObject, SyncReport, host_objects, sync_host_images};
pub use runtime_state::{install_runtime, runtime};
