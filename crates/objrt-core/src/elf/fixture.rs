//! Minimal ELF64 writer for fixtures.
//!
//! Produces just enough of a file for [`ElfFile`](super::ElfFile) to read
//! back: the header, `PT_LOAD` program headers, named sections and a section
//! name string table.

use super::header::{ElfMachine, ElfType};
use super::section::SectionType;
use super::{ELF_MAGIC, Elf64Header, Elf64ProgramHeader, Elf64SectionHeader};

/// One section to emit.
#[derive(Debug, Clone)]
pub struct FixtureSection {
    name: String,
    addr: u64,
    kind: SectionType,
    bytes: Vec<u8>,
    size: u64,
}

impl FixtureSection {
    /// A `PROGBITS` section holding `bytes` at virtual address `addr`.
    pub fn data(name: &str, addr: u64, bytes: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            addr,
            kind: SectionType::Progbits,
            bytes: bytes.to_vec(),
            size: bytes.len() as u64,
        }
    }

    /// A `NOBITS` section of `size` bytes.
    pub fn zeroed(name: &str, addr: u64, size: u64) -> Self {
        Self {
            name: name.to_string(),
            addr,
            kind: SectionType::Nobits,
            bytes: Vec::new(),
            size,
        }
    }
}

/// Builder for a little-endian ELF64 file image.
#[derive(Debug, Clone)]
pub struct ElfFixture {
    e_type: ElfType,
    machine: ElfMachine,
    loads: Vec<(u64, u64)>,
    sections: Vec<FixtureSection>,
}

impl Default for ElfFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl ElfFixture {
    /// A shared object for the host machine with no segments or sections.
    pub fn new() -> Self {
        Self {
            e_type: ElfType::Dyn,
            machine: ElfMachine::host(),
            loads: Vec::new(),
            sections: Vec::new(),
        }
    }

    pub fn file_type(mut self, e_type: ElfType) -> Self {
        self.e_type = e_type;
        self
    }

    pub fn machine(mut self, machine: ElfMachine) -> Self {
        self.machine = machine;
        self
    }

    /// Add a `PT_LOAD` segment covering `[vaddr, vaddr + memsz)`.
    pub fn load(mut self, vaddr: u64, memsz: u64) -> Self {
        self.loads.push((vaddr, memsz));
        self
    }

    pub fn section(mut self, section: FixtureSection) -> Self {
        self.sections.push(section);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let phoff = Elf64Header::SIZE;
        let mut out = vec![0u8; phoff + self.loads.len() * Elf64ProgramHeader::SIZE];

        let mut placed = Vec::with_capacity(self.sections.len());
        for section in &self.sections {
            align(&mut out, 8);
            placed.push(out.len() as u64);
            out.extend_from_slice(&section.bytes);
        }

        let mut shstrtab = vec![0u8];
        let mut name_offsets = Vec::with_capacity(self.sections.len());
        for section in &self.sections {
            name_offsets.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(section.name.as_bytes());
            shstrtab.push(0);
        }
        let strtab_name = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".shstrtab\0");
        let strtab_offset = out.len() as u64;
        out.extend_from_slice(&shstrtab);

        align(&mut out, 8);
        let shoff = out.len() as u64;
        // Null entry.
        out.extend_from_slice(&[0u8; Elf64SectionHeader::SIZE]);
        for ((section, offset), name) in self.sections.iter().zip(&placed).zip(&name_offsets) {
            push_section(
                &mut out,
                *name,
                section.kind,
                Elf64SectionHeader::SHF_ALLOC,
                section.addr,
                *offset,
                section.size,
            );
        }
        push_section(
            &mut out,
            strtab_name,
            SectionType::Strtab,
            0,
            0,
            strtab_offset,
            shstrtab.len() as u64,
        );
        let shnum = (self.sections.len() + 2) as u16;

        out[0..4].copy_from_slice(&ELF_MAGIC);
        out[4] = 2;
        out[5] = 1;
        out[6] = 1;
        put(&mut out, 16, &self.e_type.to_u16().to_le_bytes());
        put(&mut out, 18, &self.machine.to_u16().to_le_bytes());
        put(&mut out, 20, &1u32.to_le_bytes());
        put(&mut out, 32, &(phoff as u64).to_le_bytes());
        put(&mut out, 40, &shoff.to_le_bytes());
        put(&mut out, 52, &(Elf64Header::SIZE as u16).to_le_bytes());
        put(&mut out, 54, &(Elf64ProgramHeader::SIZE as u16).to_le_bytes());
        put(&mut out, 56, &(self.loads.len() as u16).to_le_bytes());
        put(&mut out, 58, &(Elf64SectionHeader::SIZE as u16).to_le_bytes());
        put(&mut out, 60, &shnum.to_le_bytes());
        put(&mut out, 62, &(shnum - 1).to_le_bytes());

        for (index, (vaddr, memsz)) in self.loads.iter().enumerate() {
            let at = phoff + index * Elf64ProgramHeader::SIZE;
            put(&mut out, at, &1u32.to_le_bytes());
            put(
                &mut out,
                at + 4,
                &(Elf64ProgramHeader::PF_R | Elf64ProgramHeader::PF_W).to_le_bytes(),
            );
            put(&mut out, at + 8, &vaddr.to_le_bytes());
            put(&mut out, at + 16, &vaddr.to_le_bytes());
            put(&mut out, at + 24, &vaddr.to_le_bytes());
            put(&mut out, at + 32, &memsz.to_le_bytes());
            put(&mut out, at + 40, &memsz.to_le_bytes());
            put(&mut out, at + 48, &0x1000u64.to_le_bytes());
        }
        out
    }
}

fn align(out: &mut Vec<u8>, to: usize) {
    while out.len() % to != 0 {
        out.push(0);
    }
}

fn put(out: &mut [u8], at: usize, bytes: &[u8]) {
    out[at..at + bytes.len()].copy_from_slice(bytes);
}

fn push_section(
    out: &mut Vec<u8>,
    name: u32,
    kind: SectionType,
    flags: u64,
    addr: u64,
    offset: u64,
    size: u64,
) {
    out.extend_from_slice(&name.to_le_bytes());
    out.extend_from_slice(&kind.to_u32().to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&addr.to_le_bytes());
    out.extend_from_slice(&offset.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    // sh_link, sh_info
    out.extend_from_slice(&[0u8; 8]);
    // sh_addralign
    out.extend_from_slice(&8u64.to_le_bytes());
    // sh_entsize
    out.extend_from_slice(&0u64.to_le_bytes());
}
