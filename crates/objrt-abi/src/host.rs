//! Host image enumeration.
//!
//! The host loader does not announce image loads to us, so the registry is
//! brought up to date by scanning `dl_iterate_phdr` and diffing against what
//! the loader shim already knows. Each object is described from its file on
//! disk; objects without a readable file (the vDSO) are skipped.

use std::ffi::{CStr, c_int, c_void};
use std::ops::Range;
use std::path::PathBuf;

use objrt_core::{ImageHeader, ImageKind, LoaderError, MapOutcome, Runtime};

/// One object reported by `dl_iterate_phdr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostObject {
    /// Recorded name; empty for the main executable.
    pub name: String,
    /// Load bias: runtime address minus link-time address.
    pub bias: usize,
    /// Runtime address of the ELF header.
    pub header: usize,
    /// Runtime range covered by the object's `PT_LOAD` segments.
    pub mapped: Range<usize>,
}

impl HostObject {
    #[must_use]
    pub fn is_main_executable(&self) -> bool {
        self.name.is_empty()
    }

    /// File the object was mapped from.
    #[must_use]
    pub fn file(&self) -> PathBuf {
        if self.is_main_executable() {
            PathBuf::from("/proc/self/exe")
        } else {
            PathBuf::from(&self.name)
        }
    }

    /// Path reported for the image: the executable's resolved path, or the
    /// recorded name.
    #[must_use]
    pub fn display_path(&self) -> String {
        if self.is_main_executable() {
            std::fs::read_link("/proc/self/exe")
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        } else {
            self.name.clone()
        }
    }

    fn kind(&self) -> ImageKind {
        if self.is_main_executable() {
            ImageKind::Executable
        } else {
            ImageKind::Dylib
        }
    }

    /// Describe the object from its file.
    pub fn describe(&self) -> Result<ImageHeader, LoaderError> {
        let file = self.file();
        let bytes = std::fs::read(&file).map_err(|source| LoaderError::Io {
            path: file.display().to_string(),
            source,
        })?;
        let image = ImageHeader::from_elf(
            &bytes,
            self.header,
            self.bias as isize,
            self.display_path(),
            self.kind(),
        )?;
        Ok(image.with_mapped(self.mapped.clone()))
    }
}

/// What one synchronization pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Newly registered images.
    pub mapped: usize,
    /// Newly seen objects without runtime metadata.
    pub ignored: usize,
    /// Objects whose file could not be read or parsed.
    pub unreadable: Vec<String>,
    /// Images that disappeared and were unmapped.
    pub unmapped: usize,
}

/// Every object currently loaded, in the host loader's order.
#[must_use]
pub fn host_objects() -> Vec<HostObject> {
    let mut objects: Vec<HostObject> = Vec::new();
    // SAFETY: the callback only touches `objects` through `data`, and only
    // for the duration of this call.
    unsafe {
        libc::dl_iterate_phdr(Some(collect), (&raw mut objects).cast());
    }
    objects
}

unsafe extern "C" fn collect(
    info: *mut libc::dl_phdr_info,
    _size: libc::size_t,
    data: *mut c_void,
) -> c_int {
    if info.is_null() || data.is_null() {
        return 0;
    }
    // SAFETY: `dl_iterate_phdr` passes a valid info record; `data` is the
    // vector handed in by `host_objects`.
    let (info, objects) = unsafe { (&*info, &mut *data.cast::<Vec<HostObject>>()) };
    if info.dlpi_phdr.is_null() {
        return 0;
    }
    // SAFETY: the loader guarantees `dlpi_phnum` entries at `dlpi_phdr`.
    let phdrs = unsafe { std::slice::from_raw_parts(info.dlpi_phdr, usize::from(info.dlpi_phnum)) };
    let bias = info.dlpi_addr as usize;

    let mut header = None;
    let mut mapped: Option<Range<usize>> = None;
    for ph in phdrs.iter().filter(|ph| ph.p_type == libc::PT_LOAD) {
        let start = bias.wrapping_add(ph.p_vaddr as usize);
        let end = start.wrapping_add(ph.p_memsz as usize);
        if ph.p_offset == 0 && header.is_none() {
            header = Some(start);
        }
        mapped = Some(match mapped {
            Some(range) => range.start.min(start)..range.end.max(end),
            None => start..end,
        });
    }
    let (Some(header), Some(mapped)) = (header, mapped) else {
        return 0;
    };

    let name = if info.dlpi_name.is_null() {
        String::new()
    } else {
        // SAFETY: non-null names are NUL-terminated strings owned by the loader.
        unsafe { CStr::from_ptr(info.dlpi_name) }
            .to_string_lossy()
            .into_owned()
    };
    objects.push(HostObject {
        name,
        bias,
        header,
        mapped,
    });
    0
}

/// Bring `rt`'s registry in line with what the host has loaded.
///
/// Unknown objects are described and mapped as one batch; known images that
/// are gone are unmapped. A handler rejection is returned after the whole
/// pass has run.
pub fn sync_host_images(rt: &Runtime) -> Result<SyncReport, LoaderError> {
    // Concurrent passes would compute the same diff; serialize them.
    static SYNC: parking_lot::Mutex<()> = parking_lot::Mutex::new(());
    let _pass = SYNC.lock();

    let loader = rt.loader();
    let objects = host_objects();
    let mut report = SyncReport::default();

    let mut batch = Vec::new();
    for object in &objects {
        if loader.is_known(object.header) {
            continue;
        }
        match object.describe() {
            Ok(image) => batch.push(image),
            Err(err) => {
                log::debug!("objrt: skipping {}: {err}", object.file().display());
                report.unreadable.push(object.name.clone());
            }
        }
    }

    let live: Vec<usize> = objects.iter().map(|o| o.header).collect();
    for addr in loader.known_images() {
        if !live.contains(&addr) && loader.unmap_image(addr).is_some() {
            report.unmapped += 1;
        }
    }

    let mapped = if batch.is_empty() {
        Ok(Vec::new())
    } else {
        loader.map_images(batch)
    };
    if let Ok(outcomes) = &mapped {
        for outcome in outcomes {
            match outcome {
                MapOutcome::Mapped => report.mapped += 1,
                MapOutcome::NoMetadata => report.ignored += 1,
                MapOutcome::AlreadyMapped => {}
            }
        }
    }
    mapped.map(|_| report)
}

