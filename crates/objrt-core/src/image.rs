//! Image descriptors.
//!
//! An [`ImageHeader`] is this layer's view of one mapped ELF object: its
//! address, path, slide and the segment/section records built from its
//! section table. A [`HeaderInfo`] is the registry's per-image record built
//! on top of it.
//!
//! Sections named `SEGMENT,SECTION` (for example `__DATA,__objc_imageinfo`)
//! are grouped into segments. Anything without a comma is ignored.

use std::ffi::{CStr, CString};
use std::ops::Range;
use std::sync::Arc;

use bitflags::bitflags;

use crate::elf::ElfFile;
use crate::error::LoaderError;

/// Legacy metadata segment.
pub const SEG_OBJC: &str = "__OBJC";
/// Segment holding module records on this platform.
pub const SEG_DATA: &str = "SEG_DATA";
/// Section holding module records.
pub const SECT_OBJC_MODULES: &str = "SECT_OBJC_MODULES";
/// Modern data segment.
pub const SEG_DATA_MODERN: &str = "__DATA";
/// Image-info section in the modern data segment.
pub const SECT_IMAGE_INFO: &str = "__objc_imageinfo";
/// Image-info section in the legacy segment.
pub const SECT_LEGACY_IMAGE_INFO: &str = "__image_info";
/// Module-record section in the legacy segment.
pub const SECT_LEGACY_MODULES: &str = "__module_info";

/// Size of one module record: version, size, name, symtab.
pub const MODULE_RECORD_SIZE: usize = 4 * core::mem::size_of::<usize>();

bitflags! {
    /// `objc_image_info.flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ImageInfoFlags: u32 {
        /// Fix up references only; load no classes or categories.
        const IS_REPLACEMENT = 1 << 0;
        /// Compiled for garbage collection.
        const SUPPORTS_GC = 1 << 1;
        /// Only runs under garbage collection.
        const REQUIRES_GC = 1 << 2;
        /// Metadata precooked by the loader's shared cache.
        const OPTIMIZED_BY_DYLD = 1 << 3;
    }
}

/// The image-info record embedded in an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageInfo {
    pub version: u32,
    pub flags: ImageInfoFlags,
}

impl ImageInfo {
    /// Encoded size: two `u32`s.
    pub const SIZE: usize = 8;

    /// Decode from raw section bytes. Unknown flag bits are kept.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let raw = bytes.get(..Self::SIZE)?;
        let version = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let flags = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        Some(Self {
            version,
            flags: ImageInfoFlags::from_bits_retain(flags),
        })
    }

    #[must_use]
    pub const fn is_replacement(&self) -> bool {
        self.flags.contains(ImageInfoFlags::IS_REPLACEMENT)
    }

    #[must_use]
    pub const fn supports_gc(&self) -> bool {
        self.flags.contains(ImageInfoFlags::SUPPORTS_GC)
    }

    #[must_use]
    pub const fn requires_gc(&self) -> bool {
        self.flags.contains(ImageInfoFlags::REQUIRES_GC)
    }

    #[must_use]
    pub const fn optimized_by_dyld(&self) -> bool {
        self.flags.contains(ImageInfoFlags::OPTIMIZED_BY_DYLD)
    }
}

/// What kind of object an image is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    /// The main program.
    Executable,
    /// A shared library loaded by the host loader.
    Dylib,
    /// A library the runtime opened explicitly.
    Bundle,
}

impl ImageKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Executable => "executable",
            Self::Dylib => "dylib",
            Self::Bundle => "bundle",
        }
    }
}

/// One section record, in link-time addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub sectname: String,
    pub segname: String,
    pub addr: u64,
    pub size: u64,
    /// File offset (0 for sections with no file contents).
    pub offset: u64,
}

/// One segment and its sections, in link-time addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentCommand {
    pub segname: String,
    pub vmaddr: u64,
    pub vmsize: u64,
    pub sections: Vec<Section>,
}

impl SegmentCommand {
    fn new(segname: &str) -> Self {
        Self {
            segname: segname.to_string(),
            vmaddr: 0,
            vmsize: 0,
            sections: Vec::new(),
        }
    }

    fn push(&mut self, section: Section) {
        if self.sections.is_empty() {
            self.vmaddr = section.addr;
            self.vmsize = section.size;
        } else {
            let end = self
                .vmaddr
                .saturating_add(self.vmsize)
                .max(section.addr.saturating_add(section.size));
            self.vmaddr = self.vmaddr.min(section.addr);
            self.vmsize = end - self.vmaddr;
        }
        self.sections.push(section);
    }

    #[must_use]
    pub fn section(&self, sectname: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.sectname == sectname)
    }
}

/// A section located in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionRef {
    /// Runtime address (link-time address plus slide).
    pub addr: usize,
    pub size: usize,
}

/// A segment located in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRef {
    pub vmaddr: usize,
    pub vmsize: usize,
}

/// This layer's description of one mapped image.
#[derive(Debug, Clone)]
pub struct ImageHeader {
    addr: usize,
    kind: ImageKind,
    path: String,
    path_c: CString,
    slide: isize,
    mapped: Range<usize>,
    segments: Vec<SegmentCommand>,
    info: Option<ImageInfo>,
}

impl ImageHeader {
    /// An image at `addr` with no segments yet.
    pub fn new(addr: usize, kind: ImageKind, path: impl Into<String>, slide: isize) -> Self {
        let path = path.into();
        let path_c = c_path(&path);
        Self {
            addr,
            kind,
            path,
            path_c,
            slide,
            mapped: addr..addr,
            segments: Vec::new(),
            info: None,
        }
    }

    /// Describe an image from its ELF file contents.
    ///
    /// `addr` is where the image's ELF header is mapped and `slide` the
    /// difference between runtime and link-time addresses.
    pub fn from_elf(
        bytes: &[u8],
        addr: usize,
        slide: isize,
        path: impl Into<String>,
        kind: ImageKind,
    ) -> Result<Self, LoaderError> {
        let path = path.into();
        let elf = ElfFile::parse(bytes).map_err(|source| LoaderError::Elf {
            path: path.clone(),
            source,
        })?;

        let mut image = Self::new(addr, kind, path, slide);
        if let Some(range) = elf.load_range() {
            image.mapped = relocate(range.start, slide)..relocate(range.end, slide);
        }

        for named in elf.sections() {
            let Some((segname, sectname)) = named.name.split_once(',') else {
                continue;
            };
            let sh = named.header;
            image.push_section(Section {
                sectname: sectname.to_string(),
                segname: segname.to_string(),
                addr: sh.sh_addr,
                size: sh.sh_size,
                offset: sh.sh_offset,
            });
            let is_info = (segname == SEG_DATA_MODERN && sectname == SECT_IMAGE_INFO)
                || (segname == SEG_OBJC && sectname == SECT_LEGACY_IMAGE_INFO);
            if is_info && image.info.is_none() {
                image.info = elf.section_data(&sh).ok().and_then(ImageInfo::parse);
            }
        }
        Ok(image)
    }

    /// Add a section, creating its segment on first use.
    pub fn push_section(&mut self, section: Section) {
        match self
            .segments
            .iter_mut()
            .find(|seg| seg.segname == section.segname)
        {
            Some(segment) => segment.push(section),
            None => {
                let mut segment = SegmentCommand::new(&section.segname);
                segment.push(section);
                self.segments.push(segment);
            }
        }
    }

    /// Builder form of [`push_section`](Self::push_section).
    #[must_use]
    pub fn with_section(mut self, segname: &str, sectname: &str, addr: u64, size: u64) -> Self {
        self.push_section(Section {
            sectname: sectname.to_string(),
            segname: segname.to_string(),
            addr,
            size,
            offset: 0,
        });
        self
    }

    #[must_use]
    pub fn with_mapped(mut self, mapped: Range<usize>) -> Self {
        self.mapped = mapped;
        self
    }

    #[must_use]
    pub fn with_info(mut self, info: ImageInfo) -> Self {
        self.info = Some(info);
        self
    }

    /// Address of the mapped ELF header; the image's identity.
    #[must_use]
    pub const fn addr(&self) -> usize {
        self.addr
    }

    #[must_use]
    pub const fn kind(&self) -> ImageKind {
        self.kind
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn path_c(&self) -> &CStr {
        &self.path_c
    }

    #[must_use]
    pub const fn slide(&self) -> isize {
        self.slide
    }

    /// Runtime address range covered by the image.
    #[must_use]
    pub fn mapped(&self) -> Range<usize> {
        self.mapped.clone()
    }

    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        self.mapped.contains(&addr)
    }

    #[must_use]
    pub fn segments(&self) -> &[SegmentCommand] {
        &self.segments
    }

    #[must_use]
    pub fn segment(&self, segname: &str) -> Option<&SegmentCommand> {
        self.segments.iter().find(|seg| seg.segname == segname)
    }

    #[must_use]
    pub const fn image_info(&self) -> Option<ImageInfo> {
        self.info
    }

    /// Runtime location of `segname,sectname`.
    #[must_use]
    pub fn section_data(&self, segname: &str, sectname: &str) -> Option<SectionRef> {
        let section = self.segment(segname)?.section(sectname)?;
        Some(SectionRef {
            addr: relocate(section.addr, self.slide),
            size: usize::try_from(section.size).ok()?,
        })
    }

    #[must_use]
    pub fn segment_ref(&self, segname: &str) -> Option<SegmentRef> {
        let segment = self.segment(segname)?;
        Some(SegmentRef {
            vmaddr: relocate(segment.vmaddr, self.slide),
            vmsize: usize::try_from(segment.vmsize).ok()?,
        })
    }

    /// Whether the image carries runtime metadata worth registering.
    #[must_use]
    pub fn has_runtime_metadata(&self) -> bool {
        self.info.is_some()
            || self.segment(SEG_OBJC).is_some()
            || self.segment(SEG_DATA).is_some()
            || self.segments.iter().any(|seg| {
                seg.sections
                    .iter()
                    .any(|sect| sect.sectname.starts_with("__objc_"))
            })
    }
}

fn relocate(addr: u64, slide: isize) -> usize {
    (addr as usize).wrapping_add_signed(slide)
}

fn c_path(path: &str) -> CString {
    CString::new(path).unwrap_or_else(|err| {
        let mut bytes = err.into_vec();
        bytes.retain(|&b| b != 0);
        CString::new(bytes).unwrap_or_default()
    })
}

/// Module records of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModuleList {
    pub addr: usize,
    pub count: usize,
}

/// Loader information for an image (path and base address).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlInfo {
    pub fname: String,
    pub fbase: usize,
}

/// Platform part of a [`HeaderInfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsHeaderInfo {
    pub dl_info: DlInfo,
    pub objc_segment: Option<SegmentRef>,
    pub data_segment: Option<SegmentRef>,
    pub image_slide: isize,
}

/// The registry's record for one image.
#[derive(Debug, Clone)]
pub struct HeaderInfo {
    pub mhdr: Arc<ImageHeader>,
    pub modules: ModuleList,
    pub info: Option<ImageInfo>,
    pub all_classes_realized: bool,
    pub os: OsHeaderInfo,
}

impl HeaderInfo {
    /// Fill in a descriptor from an image header.
    pub fn new(mhdr: Arc<ImageHeader>) -> Self {
        let modules = mhdr
            .section_data(SEG_DATA, SECT_OBJC_MODULES)
            .or_else(|| mhdr.section_data(SEG_OBJC, SECT_LEGACY_MODULES))
            .map(|sect| ModuleList {
                addr: sect.addr,
                count: sect.size / MODULE_RECORD_SIZE,
            })
            .unwrap_or_default();
        let os = OsHeaderInfo {
            dl_info: DlInfo {
                fname: mhdr.path().to_string(),
                fbase: mhdr.addr(),
            },
            objc_segment: mhdr.segment_ref(SEG_OBJC),
            data_segment: mhdr
                .segment_ref(SEG_DATA)
                .or_else(|| mhdr.segment_ref(SEG_DATA_MODERN)),
            image_slide: mhdr.slide(),
        };
        Self {
            info: mhdr.image_info(),
            modules,
            all_classes_realized: false,
            os,
            mhdr,
        }
    }

    /// Address of the image's ELF header.
    #[must_use]
    pub fn addr(&self) -> usize {
        self.mhdr.addr()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.mhdr.path()
    }

    #[must_use]
    pub fn is_bundle(&self) -> bool {
        self.mhdr.kind() == ImageKind::Bundle
    }

    #[must_use]
    pub fn is_replacement(&self) -> bool {
        self.info.is_some_and(|info| info.is_replacement())
    }

    #[must_use]
    pub fn supports_gc(&self) -> bool {
        self.info.is_some_and(|info| info.supports_gc())
    }

    #[must_use]
    pub fn requires_gc(&self) -> bool {
        self.info.is_some_and(|info| info.requires_gc())
    }

    #[must_use]
    pub fn optimized_by_dyld(&self) -> bool {
        self.info.is_some_and(|info| info.optimized_by_dyld())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::fixture::{ElfFixture, FixtureSection};

    #[test]
    fn image_info_decodes_flags() {
        let info = ImageInfo::parse(&[0, 0, 0, 0, 0b0110, 0, 0, 0]).expect("info");
        assert_eq!(info.version, 0);
        assert!(info.supports_gc());
        assert!(info.requires_gc());
        assert!(!info.is_replacement());
        assert!(!info.optimized_by_dyld());
        assert_eq!(ImageInfo::parse(&[1, 2, 3]), None);
    }

    #[test]
    fn unknown_flag_bits_are_retained() {
        let info = ImageInfo::parse(&[0, 0, 0, 0, 0x01, 0x01, 0, 0]).expect("info");
        assert!(info.is_replacement());
        assert_eq!(info.flags.bits(), 0x101);
    }

    #[test]
    fn sections_group_into_segments() {
        let image = ImageHeader::new(0x1000, ImageKind::Dylib, "libA.so", 0)
            .with_section(SEG_OBJC, "__class", 0x2000, 0x40)
            .with_section(SEG_OBJC, "__meta_class", 0x1800, 0x20)
            .with_section(SEG_DATA, SECT_OBJC_MODULES, 0x3000, 0x80);
        assert_eq!(image.segments().len(), 2);
        let objc = image.segment(SEG_OBJC).expect("segment");
        assert_eq!(objc.vmaddr, 0x1800);
        assert_eq!(objc.vmsize, 0x2040 - 0x1800);
        assert!(image.has_runtime_metadata());
    }

    #[test]
    fn segment_extent_saturates_at_top_of_address_space() {
        let elf = ElfFixture::new()
            .section(FixtureSection::zeroed("SEG_DATA,A", u64::MAX - 0xf, 0x10))
            .section(FixtureSection::zeroed("SEG_DATA,B", 0, 0x10))
            .section(FixtureSection::zeroed("SEG_DATA,C", u64::MAX - 0x7, 0x40))
            .build();
        let image = ImageHeader::from_elf(&elf, 0x1000, 0, "libedge.so", ImageKind::Dylib)
            .expect("parses");
        let segment = image.segment(SEG_DATA).expect("segment");
        assert_eq!(segment.sections.len(), 3);
        assert_eq!(segment.vmaddr, 0);
        assert_eq!(segment.vmsize, u64::MAX);
    }

    #[test]
    fn section_lookup_applies_slide() {
        let image = ImageHeader::new(0x10_0000, ImageKind::Dylib, "libB.so", 0x10_0000)
            .with_section(SEG_DATA, SECT_OBJC_MODULES, 0x3000, 0x40);
        assert_eq!(
            image.section_data(SEG_DATA, SECT_OBJC_MODULES),
            Some(SectionRef {
                addr: 0x10_3000,
                size: 0x40
            })
        );
        assert_eq!(image.section_data(SEG_DATA, "missing"), None);
        assert_eq!(image.section_data("missing", SECT_OBJC_MODULES), None);
    }

    #[test]
    fn negative_slide_relocates_down() {
        let image = ImageHeader::new(0x1000, ImageKind::Executable, "a.out", -0x1000)
            .with_section(SEG_DATA, SECT_OBJC_MODULES, 0x5000, 8);
        assert_eq!(
            image
                .section_data(SEG_DATA, SECT_OBJC_MODULES)
                .map(|s| s.addr),
            Some(0x4000)
        );
    }

    #[test]
    fn header_info_counts_modules() {
        let size = (3 * MODULE_RECORD_SIZE) as u64;
        let image = Arc::new(
            ImageHeader::new(0x4000, ImageKind::Bundle, "/tmp/Plugin.so", 0x4000)
                .with_section(SEG_DATA, SECT_OBJC_MODULES, 0x100, size),
        );
        let hi = HeaderInfo::new(image);
        assert_eq!(hi.modules.count, 3);
        assert_eq!(hi.modules.addr, 0x4100);
        assert_eq!(hi.os.image_slide, 0x4000);
        assert_eq!(hi.os.dl_info.fname, "/tmp/Plugin.so");
        assert!(hi.os.data_segment.is_some());
        assert!(hi.os.objc_segment.is_none());
        assert!(hi.is_bundle());
        assert!(!hi.all_classes_realized);
    }

    #[test]
    fn image_without_metadata_is_detected() {
        let image = ImageHeader::new(0, ImageKind::Dylib, "libc.so.6", 0)
            .with_section("__TEXT", "__text", 0, 0x100);
        assert!(!image.has_runtime_metadata());
    }

    #[test]
    fn from_elf_reads_sections_and_image_info() {
        let bytes = ElfFixture::new()
            .load(0, 0x4000)
            .section(FixtureSection::data(
                "__DATA,__objc_imageinfo",
                0x2000,
                &[0, 0, 0, 0, 0b1000, 0, 0, 0],
            ))
            .section(FixtureSection::zeroed("SEG_DATA,SECT_OBJC_MODULES", 0x2100, 0x40))
            .section(FixtureSection::data(".text", 0x1000, &[0x90; 4]))
            .build();
        let image = ImageHeader::from_elf(
            &bytes,
            0x7000_0000,
            0x7000_0000,
            "libObj.so",
            ImageKind::Dylib,
        )
        .expect("image");

        assert_eq!(image.mapped(), 0x7000_0000..0x7000_4000);
        assert!(image.contains(0x7000_2100));
        assert!(!image.contains(0x7000_4000));
        assert!(image.image_info().is_some_and(|info| info.optimized_by_dyld()));
        assert_eq!(
            image.section_data(SEG_DATA, SECT_OBJC_MODULES),
            Some(SectionRef {
                addr: 0x7000_2100,
                size: 0x40
            })
        );
        assert!(image.segment(".text").is_none());
        assert!(image.has_runtime_metadata());
    }

    #[test]
    fn from_elf_reports_malformed_file() {
        let err = ImageHeader::from_elf(b"not an elf", 0, 0, "junk", ImageKind::Dylib)
            .expect_err("must fail");
        assert!(matches!(err, LoaderError::Elf { .. }));
        assert!(err.to_string().contains("junk"));
    }

    #[test]
    fn interior_nul_in_path_is_dropped_for_c() {
        let image = ImageHeader::new(0, ImageKind::Dylib, "lib\0x.so", 0);
        assert_eq!(image.path_c().to_bytes(), b"libx.so");
    }
}
