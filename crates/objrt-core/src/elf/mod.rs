//! ELF64 reader for image descriptors.
//!
//! Only what the loader shim needs: the file header, section headers with
//! their names, and program headers. Little-endian ELF64 for x86_64 and
//! aarch64.

pub mod fixture;
pub mod header;
pub mod program;
pub mod section;

use core::ops::Range;

use thiserror::Error;

pub use header::{Elf64Header, ElfMachine, ElfType};
pub use program::{Elf64ProgramHeader, ProgramType};
pub use section::{Elf64SectionHeader, SectionType};

/// ELF magic bytes: "\x7fELF"
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// Size of ELF identification array
pub const EI_NIDENT: usize = 16;

/// Error type for ELF parsing operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ElfError {
    #[error("invalid ELF magic")]
    InvalidMagic,
    /// Not ELF64.
    #[error("unsupported ELF class: {0}")]
    UnsupportedClass(u8),
    /// Not little-endian.
    #[error("unsupported data encoding: {0}")]
    UnsupportedEncoding(u8),
    #[error("unsupported machine type: {0}")]
    UnsupportedMachine(u16),
    /// A header table or section lies outside the file.
    #[error("invalid {kind} offset: {offset:#x}")]
    InvalidOffset { kind: &'static str, offset: u64 },
    #[error("buffer too small: need {needed}, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("invalid string index: {0}")]
    InvalidStringIndex(u32),
}

/// Result type for ELF operations.
pub type ElfResult<T> = Result<T, ElfError>;

pub(crate) fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

pub(crate) fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(raw)
}

pub(crate) fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(raw)
}

/// Bytes `[offset, offset + size)` of `data`, or an offset error.
fn slice_at<'a>(data: &'a [u8], kind: &'static str, offset: u64, size: u64) -> ElfResult<&'a [u8]> {
    let bad = || ElfError::InvalidOffset { kind, offset };
    let start = usize::try_from(offset).map_err(|_| bad())?;
    let len = usize::try_from(size).map_err(|_| bad())?;
    let end = start.checked_add(len).ok_or_else(bad)?;
    data.get(start..end).ok_or_else(bad)
}

/// Get a null-terminated string from a string table.
pub fn get_string(strtab: &[u8], index: u32) -> ElfResult<&str> {
    let start = index as usize;
    let tail = strtab
        .get(start..)
        .filter(|tail| !tail.is_empty())
        .ok_or(ElfError::InvalidStringIndex(index))?;
    let end = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or(ElfError::InvalidStringIndex(index))?;
    core::str::from_utf8(&tail[..end]).map_err(|_| ElfError::InvalidStringIndex(index))
}

/// A section header together with its resolved name.
#[derive(Debug, Clone, Copy)]
pub struct NamedSection<'a> {
    pub name: &'a str,
    pub header: Elf64SectionHeader,
}

/// Parsed view over an ELF64 file image.
#[derive(Debug, Clone)]
pub struct ElfFile<'a> {
    data: &'a [u8],
    header: Elf64Header,
    sections: Vec<Elf64SectionHeader>,
    programs: Vec<Elf64ProgramHeader>,
    shstrtab: &'a [u8],
}

impl<'a> ElfFile<'a> {
    /// Parse the file header and both header tables.
    pub fn parse(data: &'a [u8]) -> ElfResult<Self> {
        let header = Elf64Header::parse(data)?;
        header.validate_machine()?;

        let programs = table(
            data,
            "program header",
            header.e_phoff,
            header.e_phnum,
            header.e_phentsize,
            Elf64ProgramHeader::SIZE,
        )?
        .map(Elf64ProgramHeader::parse)
        .collect::<ElfResult<Vec<_>>>()?;

        let sections = table(
            data,
            "section header",
            header.e_shoff,
            header.e_shnum,
            header.e_shentsize,
            Elf64SectionHeader::SIZE,
        )?
        .map(Elf64SectionHeader::parse)
        .collect::<ElfResult<Vec<_>>>()?;

        let shstrtab = match sections.get(usize::from(header.e_shstrndx)) {
            Some(strtab) if header.e_shstrndx != 0 => {
                slice_at(data, "string table", strtab.sh_offset, strtab.sh_size)?
            }
            _ => &[],
        };

        Ok(Self {
            data,
            header,
            sections,
            programs,
            shstrtab,
        })
    }

    #[must_use]
    pub const fn header(&self) -> &Elf64Header {
        &self.header
    }

    #[must_use]
    pub fn program_headers(&self) -> &[Elf64ProgramHeader] {
        &self.programs
    }

    /// Every named section, in table order. Unnamed entries are skipped.
    pub fn sections(&self) -> impl Iterator<Item = NamedSection<'a>> + '_ {
        self.sections.iter().filter_map(|sh| {
            let name = get_string(self.shstrtab, sh.sh_name).ok()?;
            (!name.is_empty()).then_some(NamedSection { name, header: *sh })
        })
    }

    pub fn section_by_name(&self, name: &str) -> Option<NamedSection<'a>> {
        self.sections().find(|section| section.name == name)
    }

    /// File contents of a section. `SHT_NOBITS` sections have none.
    pub fn section_data(&self, section: &Elf64SectionHeader) -> ElfResult<&'a [u8]> {
        if section.sh_type == SectionType::Nobits {
            return Ok(&[]);
        }
        slice_at(self.data, "section", section.sh_offset, section.sh_size)
    }

    /// Virtual address range covered by the loadable segments.
    #[must_use]
    pub fn load_range(&self) -> Option<Range<u64>> {
        let mut loads = self
            .programs
            .iter()
            .filter(|ph| ph.p_type == ProgramType::Load);
        let first = loads.next()?;
        let mut range = first.p_vaddr..first.p_vaddr.saturating_add(first.p_memsz);
        for ph in loads {
            range.start = range.start.min(ph.p_vaddr);
            range.end = range.end.max(ph.p_vaddr.saturating_add(ph.p_memsz));
        }
        Some(range)
    }
}

fn table<'a>(
    data: &'a [u8],
    kind: &'static str,
    offset: u64,
    count: u16,
    entsize: u16,
    min_size: usize,
) -> ElfResult<impl Iterator<Item = &'a [u8]>> {
    if count == 0 {
        return Ok(data[..0].chunks(min_size.max(1)));
    }
    let entsize = usize::from(entsize);
    if entsize < min_size {
        return Err(ElfError::BufferTooSmall {
            needed: min_size,
            available: entsize,
        });
    }
    let bytes = slice_at(data, kind, offset, (entsize * usize::from(count)) as u64)?;
    Ok(bytes.chunks(entsize))
}

#[cfg(test)]
mod tests {
    use super::fixture::{ElfFixture, FixtureSection};
    use super::*;

    #[test]
    fn test_elf_magic() {
        assert_eq!(ELF_MAGIC, [0x7f, 0x45, 0x4c, 0x46]);
    }

    #[test]
    fn test_error_display() {
        let err = ElfError::InvalidMagic;
        assert_eq!(format!("{err}"), "invalid ELF magic");

        let err = ElfError::UnsupportedMachine(0x3e);
        assert_eq!(format!("{err}"), "unsupported machine type: 62");
    }

    #[test]
    fn test_get_string() {
        let strtab = b"\0first\0second\0";
        assert_eq!(get_string(strtab, 0), Ok(""));
        assert_eq!(get_string(strtab, 1), Ok("first"));
        assert_eq!(get_string(strtab, 7), Ok("second"));
        assert_eq!(get_string(strtab, 99), Err(ElfError::InvalidStringIndex(99)));
        assert_eq!(get_string(b"open", 0), Err(ElfError::InvalidStringIndex(0)));
    }

    #[test]
    fn test_sections_are_named() {
        let bytes = ElfFixture::new()
            .section(FixtureSection::data(
                "__DATA,__objc_imageinfo",
                0x2000,
                &[0, 0, 0, 0, 2, 0, 0, 0],
            ))
            .section(FixtureSection::data("SEG_DATA,SECT_OBJC_MODULES", 0x2100, &[0u8; 64]))
            .build();
        let elf = ElfFile::parse(&bytes).expect("parse");
        let names: Vec<_> = elf.sections().map(|s| s.name).collect();
        assert!(names.contains(&"__DATA,__objc_imageinfo"));
        assert!(names.contains(&"SEG_DATA,SECT_OBJC_MODULES"));

        let info = elf.section_by_name("__DATA,__objc_imageinfo").expect("section");
        assert_eq!(info.header.sh_addr, 0x2000);
        assert_eq!(elf.section_data(&info.header).expect("data"), &[0, 0, 0, 0, 2, 0, 0, 0]);
    }

    #[test]
    fn test_load_range_spans_segments() {
        let bytes = ElfFixture::new()
            .load(0x0, 0x1000)
            .load(0x3000, 0x800)
            .build();
        let elf = ElfFile::parse(&bytes).expect("parse");
        assert_eq!(elf.load_range(), Some(0..0x3800));
    }

    #[test]
    fn test_truncated_section_table() {
        let mut bytes = ElfFixture::new()
            .section(FixtureSection::data("__OBJC,__image_info", 0x100, &[1; 8]))
            .build();
        bytes.truncate(bytes.len() - 8);
        assert!(matches!(
            ElfFile::parse(&bytes),
            Err(ElfError::InvalidOffset { .. })
        ));
    }
}
