//! Serializable command reports.

use serde::{Deserialize, Serialize};

/// One loaded object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub name: String,
    pub header: String,
    pub bias: String,
    pub mapped: [String; 2],
    /// Whether the loader shim has seen it (after `--sync`).
    pub known: bool,
    /// Whether it was registered as carrying runtime metadata.
    pub registered: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub mapped: usize,
    pub ignored: usize,
    pub unmapped: usize,
    pub unreadable: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagesReport {
    pub images: Vec<ImageEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncSummary>,
    pub registered: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionEntry {
    pub name: String,
    pub addr: String,
    pub size: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentEntry {
    pub name: String,
    pub vmaddr: String,
    pub vmsize: u64,
    pub sections: Vec<SectionEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfoEntry {
    pub version: u32,
    pub flags: u32,
    pub replacement: bool,
    pub supports_gc: bool,
    pub requires_gc: bool,
}

/// Runtime view of an ELF file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElfReport {
    pub path: String,
    pub file_type: String,
    pub machine: String,
    pub load_range: Option<[String; 2]>,
    pub has_runtime_metadata: bool,
    pub image_info: Option<ImageInfoEntry>,
    pub module_count: usize,
    pub segments: Vec<SegmentEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindSoReport {
    pub name: String,
    pub found: bool,
    pub handle: Option<String>,
    pub visited: usize,
    /// Why the walk stopped without a match.
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateCountersEntry {
    pub bypassed: u64,
    pub skipped: u64,
    pub violations: u64,
}

/// Outcome of entering and leaving debugger mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebuggerProbeReport {
    pub mode: String,
    pub runtime_locked_before: bool,
    pub runtime_locked_during: bool,
    pub runtime_locked_after: bool,
    /// Whether a managed lock was usable from the debugger's thread.
    pub reentered: bool,
    pub counters: GateCountersEntry,
}

pub(crate) fn hex(value: u64) -> String {
    format!("{value:#x}")
}
