//! # objrt-core
//!
//! Operating-system support layer for the objrt message-dispatching runtime.
//!
//! This crate tracks which images carrying runtime metadata are mapped into the
//! process, notifies the runtime when images appear or disappear, and provides
//! the locks that protect the runtime's global tables while staying inspectable
//! from an attached debugger.
//!
//! # Architecture
//!
//! ```text
//! host loader -> LoaderShim -> HeaderRegistry -> (class/selector scanners)
//!                    |               |
//!                    +--- locks <----+---- DebuggerGate
//! ```
//!
//! Everything in this crate is safe Rust except the native lock wrappers in
//! [`lock`], which sit directly on POSIX threads.

#![deny(unsafe_code)]

pub mod config;
pub mod debugger;
pub mod elf;
pub mod error;
pub mod fatal;
pub mod image;
pub mod loader;
#[allow(unsafe_code)]
pub mod lock;
pub mod registry;
pub mod runtime;
pub mod solist;

pub use config::OsConfig;
pub use debugger::{DebuggerGate, DebuggerMode, DebuggerViolation, GateCounters, Hold, LockId};
pub use error::{LoaderError, LockError, LockKind};
pub use fatal::{FatalError, install_fatal_handler, report_fatal};
pub use image::{
    HeaderInfo, ImageHeader, ImageInfo, ImageInfoFlags, ImageKind, SECT_OBJC_MODULES, SEG_DATA,
    SEG_OBJC, SectionRef,
};
pub use loader::{ImageState, LoaderShim, MapOutcome};
pub use lock::{Guarded, Monitor, Mutex, RecursiveMutex, RwLock, RwMode};
pub use registry::HeaderRegistry;
pub use runtime::Runtime;
