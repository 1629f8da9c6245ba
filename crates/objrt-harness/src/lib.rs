//! Diagnostics for the objrt runtime OS layer.
//!
//! This crate provides:
//! - Image listing: what the host loader has mapped and what the registry made of it
//! - Segment maps: the runtime segment/section records of an ELF file
//! - Shared-object lookup over the host loader's list
//! - A debugger-mode probe against a private runtime
//!
//! Every command produces a serializable report; the `objrt-harness` binary
//! prints them as JSON.

#![forbid(unsafe_code)]

pub mod commands;
pub mod error;
pub mod logger;
pub mod report;

pub use error::HarnessError;
pub use report::{DebuggerProbeReport, ElfReport, FindSoReport, ImagesReport};
