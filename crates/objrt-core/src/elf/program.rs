//! ELF64 program headers.

use super::{ElfError, ElfResult, read_u32, read_u64};

/// Program header type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramType {
    Null,
    /// Loadable segment
    Load,
    Dynamic,
    Interp,
    Note,
    Phdr,
    Tls,
    GnuEhFrame,
    GnuStack,
    GnuRelro,
    Unknown(u32),
}

impl From<u32> for ProgramType {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Null,
            1 => Self::Load,
            2 => Self::Dynamic,
            3 => Self::Interp,
            4 => Self::Note,
            6 => Self::Phdr,
            7 => Self::Tls,
            0x6474_e550 => Self::GnuEhFrame,
            0x6474_e551 => Self::GnuStack,
            0x6474_e552 => Self::GnuRelro,
            other => Self::Unknown(other),
        }
    }
}

/// ELF64 program header.
#[derive(Debug, Clone, Copy)]
pub struct Elf64ProgramHeader {
    pub p_type: ProgramType,
    pub p_flags: u32,
    /// File offset of segment
    pub p_offset: u64,
    /// Virtual address in memory
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    /// Size in memory (may be larger than filesz for BSS)
    pub p_memsz: u64,
    pub p_align: u64,
}

impl Elf64ProgramHeader {
    /// Size of an ELF64 program header in bytes.
    pub const SIZE: usize = 56;

    pub const PF_X: u32 = 0x1;
    pub const PF_W: u32 = 0x2;
    pub const PF_R: u32 = 0x4;

    /// Parse a program header from a byte slice.
    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        if data.len() < Self::SIZE {
            return Err(ElfError::BufferTooSmall {
                needed: Self::SIZE,
                available: data.len(),
            });
        }

        Ok(Self {
            p_type: ProgramType::from(read_u32(data, 0)),
            p_flags: read_u32(data, 4),
            p_offset: read_u64(data, 8),
            p_vaddr: read_u64(data, 16),
            p_paddr: read_u64(data, 24),
            p_filesz: read_u64(data, 32),
            p_memsz: read_u64(data, 40),
            p_align: read_u64(data, 48),
        })
    }

    /// Whether the segment's file bytes start at offset 0 (it maps the ELF
    /// header itself).
    #[must_use]
    pub fn maps_file_header(&self) -> bool {
        self.p_type == ProgramType::Load && self.p_offset == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_load_segment() -> [u8; 56] {
        let mut ph = [0u8; 56];
        ph[0] = 1;
        ph[4] = 0x5;
        ph[16..24].copy_from_slice(&0x40_0000u64.to_le_bytes());
        ph[32..40].copy_from_slice(&0x1000u64.to_le_bytes());
        ph[40..48].copy_from_slice(&0x2000u64.to_le_bytes());
        ph[48..56].copy_from_slice(&0x1000u64.to_le_bytes());
        ph
    }

    #[test]
    fn test_parse_load_segment() {
        let ph = Elf64ProgramHeader::parse(&make_load_segment()).unwrap();
        assert_eq!(ph.p_type, ProgramType::Load);
        assert_eq!(ph.p_flags, Elf64ProgramHeader::PF_R | Elf64ProgramHeader::PF_X);
        assert_eq!(ph.p_vaddr, 0x40_0000);
        assert_eq!(ph.p_filesz, 0x1000);
        assert_eq!(ph.p_memsz, 0x2000);
        assert!(ph.maps_file_header());
    }

    #[test]
    fn test_program_type_conversion() {
        assert_eq!(ProgramType::from(1u32), ProgramType::Load);
        assert_eq!(ProgramType::from(0x6474_e551u32), ProgramType::GnuStack);
        assert!(matches!(ProgramType::from(0x7000_0000u32), ProgramType::Unknown(_)));
    }

    #[test]
    fn test_short_buffer() {
        assert!(matches!(
            Elf64ProgramHeader::parse(&[0u8; 20]),
            Err(ElfError::BufferTooSmall { needed: 56, .. })
        ));
    }
}
