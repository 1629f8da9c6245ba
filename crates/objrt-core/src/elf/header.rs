//! ELF64 file header.

use super::{EI_NIDENT, ELF_MAGIC, ElfError, ElfResult, read_u16, read_u32, read_u64};

const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;

/// ELF object file type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfType {
    None,
    Rel,
    /// Fixed-address executable.
    Exec,
    /// Shared object or position-independent executable.
    Dyn,
    Core,
    Unknown(u16),
}

impl From<u16> for ElfType {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Rel,
            2 => Self::Exec,
            3 => Self::Dyn,
            4 => Self::Core,
            other => Self::Unknown(other),
        }
    }
}

impl ElfType {
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        match self {
            Self::None => 0,
            Self::Rel => 1,
            Self::Exec => 2,
            Self::Dyn => 3,
            Self::Core => 4,
            Self::Unknown(v) => v,
        }
    }
}

/// ELF machine architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfMachine {
    X86_64,
    Aarch64,
    Unknown(u16),
}

impl From<u16> for ElfMachine {
    fn from(value: u16) -> Self {
        match value {
            62 => Self::X86_64,
            183 => Self::Aarch64,
            other => Self::Unknown(other),
        }
    }
}

impl ElfMachine {
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        match self {
            Self::X86_64 => 62,
            Self::Aarch64 => 183,
            Self::Unknown(v) => v,
        }
    }

    /// Machine of the running process.
    #[must_use]
    pub const fn host() -> Self {
        if cfg!(target_arch = "aarch64") {
            Self::Aarch64
        } else {
            Self::X86_64
        }
    }
}

/// ELF64 file header.
#[derive(Debug, Clone, Copy)]
pub struct Elf64Header {
    pub e_ident: [u8; EI_NIDENT],
    pub e_type: ElfType,
    pub e_machine: ElfMachine,
    pub e_version: u32,
    pub e_entry: u64,
    /// Program header table file offset
    pub e_phoff: u64,
    /// Section header table file offset
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    /// Section header string table index
    pub e_shstrndx: u16,
}

impl Elf64Header {
    /// Size of an ELF64 header in bytes.
    pub const SIZE: usize = 64;

    /// Parse an ELF64 header from a byte slice.
    ///
    /// # Errors
    ///
    /// The buffer is too small, the magic is wrong, or the file is not
    /// little-endian ELF64.
    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        if data.len() < Self::SIZE {
            return Err(ElfError::BufferTooSmall {
                needed: Self::SIZE,
                available: data.len(),
            });
        }
        if data[0..4] != ELF_MAGIC {
            return Err(ElfError::InvalidMagic);
        }
        if data[EI_CLASS] != ELFCLASS64 {
            return Err(ElfError::UnsupportedClass(data[EI_CLASS]));
        }
        if data[EI_DATA] != ELFDATA2LSB {
            return Err(ElfError::UnsupportedEncoding(data[EI_DATA]));
        }

        let mut e_ident = [0u8; EI_NIDENT];
        e_ident.copy_from_slice(&data[0..EI_NIDENT]);

        Ok(Self {
            e_ident,
            e_type: ElfType::from(read_u16(data, 16)),
            e_machine: ElfMachine::from(read_u16(data, 18)),
            e_version: read_u32(data, 20),
            e_entry: read_u64(data, 24),
            e_phoff: read_u64(data, 32),
            e_shoff: read_u64(data, 40),
            e_flags: read_u32(data, 48),
            e_ehsize: read_u16(data, 52),
            e_phentsize: read_u16(data, 54),
            e_phnum: read_u16(data, 56),
            e_shentsize: read_u16(data, 58),
            e_shnum: read_u16(data, 60),
            e_shstrndx: read_u16(data, 62),
        })
    }

    #[must_use]
    pub fn is_shared_object(&self) -> bool {
        matches!(self.e_type, ElfType::Dyn)
    }

    #[must_use]
    pub fn is_executable(&self) -> bool {
        matches!(self.e_type, ElfType::Exec)
    }

    /// Reject machines this reader does not describe.
    pub fn validate_machine(&self) -> ElfResult<()> {
        match self.e_machine {
            ElfMachine::X86_64 | ElfMachine::Aarch64 => Ok(()),
            ElfMachine::Unknown(other) => Err(ElfError::UnsupportedMachine(other)),
        }
    }
}
