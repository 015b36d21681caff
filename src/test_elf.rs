//! Test-only builders for synthetic guest binaries
//!
//! Produces byte-exact little-endian ELF64 buffers, minimal `.eh_frame`
//! encodings, and a `Vec`-backed guest memory so the loader and unwinder
//! tests never depend on binaries from the host filesystem. The `.eh_frame`
//! bytes are consumed by the same gimli parser the production path uses.

use anyhow::bail;

use crate::addrs::VirtAddr;
use crate::elf::ElfImage;
use crate::memory::Mmu;

/// Relocatable object type, rejected by the parser
pub(crate) const ET_REL: u16 = 1;

/// Fixed-address executable object type
pub(crate) const ET_EXEC: u16 = 2;

/// Shared object / PIE object type
pub(crate) const ET_DYN: u16 = 3;

/// An unsupported machine identifier
pub(crate) const EM_AARCH64: u16 = 183;

/// One segment queued in an [`ElfBuilder`]
struct BuildSegment {
    seg_type: u32,
    flags: u32,
    vaddr: u64,
    data: Vec<u8>,
    memsize: u64,
    align: u64,
}

/// One section queued in an [`ElfBuilder`]
struct BuildSection {
    name: String,
    sh_type: u32,
    addr: u64,
    data: Vec<u8>,
}

/// One symbol queued in an [`ElfBuilder`]
struct BuildSymbol {
    name: String,
    value: u64,
    size: u64,
}

/// Byte-level ELF64 writer for tests
pub(crate) struct ElfBuilder {
    class: u8,
    machine: u16,
    elf_type: u16,
    entry: u64,
    segments: Vec<BuildSegment>,
    sections: Vec<BuildSection>,
    symbols: Vec<BuildSymbol>,
}

impl ElfBuilder {
    /// Start a builder for the given object type (x86-64, 64-bit class)
    pub(crate) fn new(elf_type: u16) -> Self {
        Self {
            class: 2,
            machine: 62,
            elf_type,
            entry: 0,
            segments: Vec::new(),
            sections: Vec::new(),
            symbols: Vec::new(),
        }
    }

    /// Override the ELF class byte
    pub(crate) fn class(mut self, class: u8) -> Self {
        self.class = class;
        self
    }

    /// Override the machine identifier
    pub(crate) fn machine(mut self, machine: u16) -> Self {
        self.machine = machine;
        self
    }

    /// Set the entry point
    pub(crate) fn entry(mut self, entry: u64) -> Self {
        self.entry = entry;
        self
    }

    /// Queue a `PT_LOAD` segment carrying `data` at `vaddr`
    pub(crate) fn load_segment(mut self, vaddr: u64, data: Vec<u8>, memsize: u64) -> Self {
        self.segments.push(BuildSegment {
            seg_type: 1,
            flags: 5,
            vaddr,
            data,
            memsize,
            align: 0x1000,
        });
        self
    }

    /// Queue a `PT_INTERP` segment holding the NUL-terminated `path`
    pub(crate) fn interp(mut self, path: &str) -> Self {
        let mut data = path.as_bytes().to_vec();
        data.push(0);
        let memsize = data.len() as u64;

        self.segments.push(BuildSegment {
            seg_type: 3,
            flags: 4,
            vaddr: 0,
            data,
            memsize,
            align: 1,
        });
        self
    }

    /// Queue an arbitrary `SHT_PROGBITS`-style section
    pub(crate) fn section(mut self, name: &str, sh_type: u32, addr: u64, data: Vec<u8>) -> Self {
        self.sections.push(BuildSection {
            name: name.to_string(),
            sh_type,
            addr,
            data,
        });
        self
    }

    /// Queue a zero-filled `.text` section at `addr`
    pub(crate) fn text(self, addr: u64, size: u64) -> Self {
        self.section(".text", 1, addr, vec![0; size as usize])
    }

    /// Queue a `.eh_frame` section at `addr`
    pub(crate) fn eh_frame(self, addr: u64, data: Vec<u8>) -> Self {
        self.section(".eh_frame", 1, addr, data)
    }

    /// Queue a global function symbol
    pub(crate) fn symbol(mut self, name: &str, value: u64, size: u64) -> Self {
        self.symbols.push(BuildSymbol {
            name: name.to_string(),
            value,
            size,
        });
        self
    }

    /// Emit the image bytes
    pub(crate) fn build(self) -> Vec<u8> {
        /// Section as it lands in the output
        struct OutSection {
            name_off: u32,
            sh_type: u32,
            addr: u64,
            data: Vec<u8>,
            link: u32,
            entsize: u64,
        }

        /// Append a NUL-terminated name to a string table
        fn add_name(strtab: &mut Vec<u8>, name: &str) -> u32 {
            let off = strtab.len() as u32;
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
            off
        }

        let mut shstrtab = vec![0_u8];

        // Section table: null entry, user sections, symbol tables, .shstrtab
        let mut out = vec![OutSection {
            name_off: 0,
            sh_type: 0,
            addr: 0,
            data: Vec::new(),
            link: 0,
            entsize: 0,
        }];

        for section in self.sections {
            out.push(OutSection {
                name_off: add_name(&mut shstrtab, &section.name),
                sh_type: section.sh_type,
                addr: section.addr,
                data: section.data,
                link: 0,
                entsize: 0,
            });
        }

        if !self.symbols.is_empty() {
            let mut strtab = vec![0_u8];
            let mut symtab = vec![0_u8; 24];

            for symbol in &self.symbols {
                symtab.extend(add_name(&mut strtab, &symbol.name).to_le_bytes());
                symtab.push(0x12); // GLOBAL | FUNC
                symtab.push(0);
                symtab.extend(1_u16.to_le_bytes()); // defined in section 1
                symtab.extend(symbol.value.to_le_bytes());
                symtab.extend(symbol.size.to_le_bytes());
            }

            // .strtab lands right after .symtab
            let strtab_index = (out.len() + 1) as u32;
            out.push(OutSection {
                name_off: add_name(&mut shstrtab, ".symtab"),
                sh_type: 2,
                addr: 0,
                data: symtab,
                link: strtab_index,
                entsize: 24,
            });
            out.push(OutSection {
                name_off: add_name(&mut shstrtab, ".strtab"),
                sh_type: 3,
                addr: 0,
                data: strtab,
                link: 0,
                entsize: 0,
            });
        }

        let shstr_name = add_name(&mut shstrtab, ".shstrtab");
        out.push(OutSection {
            name_off: shstr_name,
            sh_type: 3,
            addr: 0,
            data: shstrtab.clone(),
            link: 0,
            entsize: 0,
        });

        let phnum = self.segments.len();
        let shnum = out.len();
        let shstrndx = shnum - 1;

        // File layout: header, program headers, segment bytes, section
        // bytes, section headers
        let mut cursor = 64 + 56 * phnum as u64;
        let mut seg_offsets = Vec::new();
        for segment in &self.segments {
            seg_offsets.push(cursor);
            cursor += segment.data.len() as u64;
        }
        let mut sec_offsets = Vec::new();
        for section in &out {
            sec_offsets.push(cursor);
            cursor += section.data.len() as u64;
        }
        let shoff = (cursor + 7) & !7;

        let mut bytes = Vec::new();
        bytes.extend([0x7f, b'E', b'L', b'F']);
        bytes.push(self.class);
        bytes.push(1); // little endian
        bytes.push(1); // ident version
        bytes.extend([0_u8; 9]); // osabi, abi version, padding
        bytes.extend(self.elf_type.to_le_bytes());
        bytes.extend(self.machine.to_le_bytes());
        bytes.extend(1_u32.to_le_bytes()); // version
        bytes.extend(self.entry.to_le_bytes());
        bytes.extend(64_u64.to_le_bytes()); // phoff
        bytes.extend(shoff.to_le_bytes());
        bytes.extend(0_u32.to_le_bytes()); // flags
        bytes.extend(64_u16.to_le_bytes()); // ehsize
        bytes.extend(56_u16.to_le_bytes()); // phentsize
        bytes.extend((phnum as u16).to_le_bytes());
        bytes.extend(64_u16.to_le_bytes()); // shentsize
        bytes.extend((shnum as u16).to_le_bytes());
        bytes.extend((shstrndx as u16).to_le_bytes());
        assert_eq!(bytes.len(), 64);

        for (segment, offset) in self.segments.iter().zip(&seg_offsets) {
            bytes.extend(segment.seg_type.to_le_bytes());
            bytes.extend(segment.flags.to_le_bytes());
            bytes.extend(offset.to_le_bytes());
            bytes.extend(segment.vaddr.to_le_bytes());
            bytes.extend(segment.vaddr.to_le_bytes()); // paddr mirrors vaddr
            bytes.extend((segment.data.len() as u64).to_le_bytes());
            bytes.extend(segment.memsize.to_le_bytes());
            bytes.extend(segment.align.to_le_bytes());
        }

        for segment in &self.segments {
            bytes.extend(&segment.data);
        }
        for section in &out {
            bytes.extend(&section.data);
        }
        while (bytes.len() as u64) < shoff {
            bytes.push(0);
        }

        for (section, offset) in out.iter().zip(&sec_offsets) {
            bytes.extend(section.name_off.to_le_bytes());
            bytes.extend(section.sh_type.to_le_bytes());
            bytes.extend(0_u64.to_le_bytes()); // flags
            bytes.extend(section.addr.to_le_bytes());
            bytes.extend(offset.to_le_bytes());
            bytes.extend((section.data.len() as u64).to_le_bytes());
            bytes.extend(section.link.to_le_bytes());
            bytes.extend(0_u32.to_le_bytes()); // info
            bytes.extend(1_u64.to_le_bytes()); // addralign
            bytes.extend(section.entsize.to_le_bytes());
        }

        bytes
    }

    /// Emit the image bytes and parse them into an [`ElfImage`]
    pub(crate) fn build_image(self) -> ElfImage {
        ElfImage::from_bytes("test.bin", self.build()).unwrap()
    }
}

/// Encode a minimal `.eh_frame`: one CIE with `CFA = rsp + 8` and the
/// return address saved at `CFA - 8`, plus one FDE per `(start, len)`
/// function range with absolute pointer encoding
pub(crate) fn synth_eh_frame(funcs: &[(u64, u64)]) -> Vec<u8> {
    let mut out = Vec::new();

    let mut cie = Vec::new();
    cie.extend(0_u32.to_le_bytes()); // CIE id
    cie.push(1); // version
    cie.extend(b"zR\0");
    cie.push(0x01); // code alignment factor 1
    cie.push(0x78); // data alignment factor -8
    cie.push(0x10); // return address register 16
    cie.push(0x01); // augmentation data length
    cie.push(0x00); // DW_EH_PE_absptr
    cie.extend([0x0c, 0x07, 0x08]); // DW_CFA_def_cfa rsp, 8
    cie.extend([0x90, 0x01]); // DW_CFA_offset r16, cfa-8
    while cie.len() % 4 != 0 {
        cie.push(0x00); // DW_CFA_nop
    }
    out.extend((cie.len() as u32).to_le_bytes());
    out.extend(&cie);

    for &(start, len) in funcs {
        let mut fde = Vec::new();
        // Distance from the CIE pointer field back to the CIE at offset 0
        let cie_pointer = (out.len() + 4) as u32;
        fde.extend(cie_pointer.to_le_bytes());
        fde.extend(start.to_le_bytes());
        fde.extend(len.to_le_bytes());
        fde.push(0x00); // augmentation data length
        while fde.len() % 4 != 0 {
            fde.push(0x00); // DW_CFA_nop
        }
        out.extend((fde.len() as u32).to_le_bytes());
        out.extend(&fde);
    }

    // Zero length terminator entry
    out.extend(0_u32.to_le_bytes());
    out
}

/// `Vec`-backed guest memory for unwinder tests
pub(crate) struct TestMmu {
    /// `(base address, bytes)` regions
    regions: Vec<(u64, Vec<u8>)>,
}

impl TestMmu {
    /// Empty guest memory
    pub(crate) fn new() -> Self {
        Self {
            regions: Vec::new(),
        }
    }

    /// Map `bytes` at `base`
    pub(crate) fn add_region(&mut self, base: u64, bytes: Vec<u8>) {
        self.regions.push((base, bytes));
    }

    /// Map consecutive little-endian `u64` values starting at `base`
    pub(crate) fn add_u64s(&mut self, base: u64, values: &[u64]) {
        let mut bytes = Vec::new();
        for value in values {
            bytes.extend(value.to_le_bytes());
        }
        self.add_region(base, bytes);
    }
}

impl Mmu for TestMmu {
    fn read_bytes(&mut self, virt_addr: VirtAddr, buf: &mut [u8]) -> anyhow::Result<()> {
        for (base, bytes) in &self.regions {
            if let Some(offset) = virt_addr.0.checked_sub(*base) {
                let offset = offset as usize;
                if offset.saturating_add(buf.len()) <= bytes.len() {
                    buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
                    return Ok(());
                }
            }
        }

        bail!("unmapped guest address {:#x}", virt_addr.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_output_parses() {
        let image = ElfBuilder::new(ET_EXEC)
            .entry(0x40_0000)
            .load_segment(0x40_0000, vec![0x90; 0x10], 0x10)
            .text(0x40_0000, 0x10)
            .symbol("entry", 0x40_0000, 0x10)
            .build_image();

        assert_eq!(image.entry(), VirtAddr(0x40_0000));
        assert_eq!(image.symbols().iter().filter(|s| !s.name.is_empty()).count(), 1);
    }

    #[test]
    fn test_mmu_reads_and_faults() {
        let mut mmu = TestMmu::new();
        mmu.add_u64s(0x1000, &[0xdead_beef]);

        assert_eq!(mmu.read_u64(VirtAddr(0x1000)).unwrap(), 0xdead_beef);
        assert!(mmu.read_u64(VirtAddr(0x2000)).is_err());
    }
}
