//! ELF64 section headers.

use super::{ElfError, ElfResult, read_u32, read_u64};

/// Section header type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionType {
    Null,
    Progbits,
    Symtab,
    Strtab,
    Rela,
    Dynamic,
    Note,
    /// Occupies memory but not file space (BSS).
    Nobits,
    Dynsym,
    Unknown(u32),
}

impl From<u32> for SectionType {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Null,
            1 => Self::Progbits,
            2 => Self::Symtab,
            3 => Self::Strtab,
            4 => Self::Rela,
            6 => Self::Dynamic,
            7 => Self::Note,
            8 => Self::Nobits,
            11 => Self::Dynsym,
            other => Self::Unknown(other),
        }
    }
}

impl SectionType {
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        match self {
            Self::Null => 0,
            Self::Progbits => 1,
            Self::Symtab => 2,
            Self::Strtab => 3,
            Self::Rela => 4,
            Self::Dynamic => 6,
            Self::Note => 7,
            Self::Nobits => 8,
            Self::Dynsym => 11,
            Self::Unknown(v) => v,
        }
    }
}

/// ELF64 section header.
#[derive(Debug, Clone, Copy)]
pub struct Elf64SectionHeader {
    /// Section name (index into string table)
    pub sh_name: u32,
    pub sh_type: SectionType,
    pub sh_flags: u64,
    /// Virtual address in memory
    pub sh_addr: u64,
    /// Offset in file
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    pub sh_entsize: u64,
}

impl Elf64SectionHeader {
    /// Size of an ELF64 section header in bytes.
    pub const SIZE: usize = 64;

    /// Occupies memory during execution.
    pub const SHF_ALLOC: u64 = 0x2;

    /// Parse a section header from a byte slice.
    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        if data.len() < Self::SIZE {
            return Err(ElfError::BufferTooSmall {
                needed: Self::SIZE,
                available: data.len(),
            });
        }

        Ok(Self {
            sh_name: read_u32(data, 0),
            sh_type: SectionType::from(read_u32(data, 4)),
            sh_flags: read_u64(data, 8),
            sh_addr: read_u64(data, 16),
            sh_offset: read_u64(data, 24),
            sh_size: read_u64(data, 32),
            sh_link: read_u32(data, 40),
            sh_info: read_u32(data, 44),
            sh_addralign: read_u64(data, 48),
            sh_entsize: read_u64(data, 56),
        })
    }

    #[must_use]
    pub const fn is_allocated(&self) -> bool {
        self.sh_flags & Self::SHF_ALLOC != 0
    }
}
