//! Harness commands. Each returns a report; printing is the binary's job.

use std::path::Path;
use std::sync::Arc;

use objrt_abi::link_map::NativeSoList;
use objrt_abi::{host_objects, sync_host_images};
use objrt_core::elf::ElfFile;
use objrt_core::solist;
use objrt_core::{DebuggerMode, HeaderInfo, ImageHeader, ImageKind, OsConfig, Runtime};

use crate::error::HarnessError;
use crate::report::{
    DebuggerProbeReport, ElfReport, FindSoReport, GateCountersEntry, ImageEntry, ImageInfoEntry,
    ImagesReport, SectionEntry, SegmentEntry, SyncSummary, hex,
};

/// List the host's loaded objects. With `sync`, first bring the process
/// runtime's registry up to date and report what it made of each object.
pub fn images(rt: &Runtime, sync: bool) -> Result<ImagesReport, HarnessError> {
    let summary = if sync {
        let report = sync_host_images(rt)?;
        Some(SyncSummary {
            mapped: report.mapped,
            ignored: report.ignored,
            unmapped: report.unmapped,
            unreadable: report.unreadable,
        })
    } else {
        None
    };

    let loader = rt.loader();
    let images = host_objects()
        .into_iter()
        .map(|object| ImageEntry {
            name: object.display_path(),
            header: hex(object.header as u64),
            bias: hex(object.bias as u64),
            mapped: [hex(object.mapped.start as u64), hex(object.mapped.end as u64)],
            known: loader.is_known(object.header),
            registered: loader.registry().contains(object.header),
        })
        .collect();

    Ok(ImagesReport {
        images,
        sync: summary,
        registered: loader.header_count(),
    })
}

/// Segment/section map of the ELF file at `path`, at link-time addresses.
pub fn sections(path: &Path) -> Result<ElfReport, HarnessError> {
    let bytes = std::fs::read(path).map_err(|source| HarnessError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let elf = ElfFile::parse(&bytes).map_err(|source| HarnessError::Elf {
        path: path.to_path_buf(),
        source,
    })?;
    let display = path.display().to_string();
    let image = ImageHeader::from_elf(&bytes, 0, 0, display.clone(), ImageKind::Dylib)?;
    let info = HeaderInfo::new(Arc::new(image.clone()));

    let segments = image
        .segments()
        .iter()
        .map(|segment| SegmentEntry {
            name: segment.segname.clone(),
            vmaddr: hex(segment.vmaddr),
            vmsize: segment.vmsize,
            sections: segment
                .sections
                .iter()
                .map(|section| SectionEntry {
                    name: section.sectname.clone(),
                    addr: hex(section.addr),
                    size: section.size,
                    offset: section.offset,
                })
                .collect(),
        })
        .collect();

    Ok(ElfReport {
        path: display,
        file_type: format!("{:?}", elf.header().e_type),
        machine: format!("{:?}", elf.header().e_machine),
        load_range: elf.load_range().map(|r| [hex(r.start), hex(r.end)]),
        has_runtime_metadata: image.has_runtime_metadata(),
        image_info: image.image_info().map(|info| ImageInfoEntry {
            version: info.version,
            flags: info.flags.bits(),
            replacement: info.is_replacement(),
            supports_gc: info.supports_gc(),
            requires_gc: info.requires_gc(),
        }),
        module_count: info.modules.count,
        segments,
    })
}

/// Look `name` up on the host loader's object list.
#[must_use]
pub fn find_so(name: &str, config: &OsConfig) -> FindSoReport {
    let limit = config.so_walk_limit;
    let search = solist::search(&NativeSoList::from_anchor(limit), name.as_bytes(), limit);
    FindSoReport {
        name: name.to_string(),
        found: search.found.is_some(),
        handle: search.found.map(|node| hex(node.as_ptr() as u64)),
        visited: search.visited,
        end: search.end.map(|end| format!("{end:?}")),
    }
}

/// Enter and leave debugger mode on a private runtime.
#[must_use]
pub fn debugger_probe(config: OsConfig) -> DebuggerProbeReport {
    let rt = Runtime::new(config);
    let before = rt.is_runtime_locked();
    let mode = rt.start_debugger_mode();
    let during = rt.is_runtime_locked();

    let reentered = if mode != DebuggerMode::Off && rt.runtime_lock().try_write() {
        rt.runtime_lock().unlock_write().is_ok()
    } else {
        false
    };

    rt.end_debugger_mode();
    let counters = rt.gate().counters();
    DebuggerProbeReport {
        mode: mode.as_str().to_string(),
        runtime_locked_before: before,
        runtime_locked_during: during,
        runtime_locked_after: rt.is_runtime_locked(),
        reentered,
        counters: GateCountersEntry {
            bypassed: counters.bypassed,
            skipped: counters.skipped,
            violations: counters.violations,
        },
    }
}
