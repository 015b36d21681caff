//! ELF image loading and analysis for guest binaries
//!
//! An [`ElfImage`] is built once per binary the guest loads (the main
//! executable and each resolved shared library) during VM setup. It owns the
//! raw file bytes and derives segments, sections, symbols and dynamic
//! dependencies from them. Position-independent images are relocated exactly
//! once, before any address is handed to symbol lookup or unwinding.

use std::fmt;
use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

use crate::addrs::{PhysAddr, VirtAddr};
use crate::config::Config;
use crate::debug_info::DebugInfo;
use crate::page_table::PAGE_SIZE;

/// Result type for ELF parsing and lookups
pub type Result<T> = std::result::Result<T, ElfError>;

/// The `\x7fELF` identification magic
const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// 64-bit ELF class, the only class this hypervisor runs
const ELFCLASS64: u8 = 2;

/// x86-64 machine identifier, the only machine this hypervisor runs
const EM_X86_64: u16 = 62;

/// Fixed-address executable object type
const ET_EXEC: u16 = 2;

/// Shared object / position-independent executable object type
const ET_DYN: u16 = 3;

/// Size of one program header table entry
const PHDR_SIZE: u64 = 56;

/// Size of one section header table entry
const SHDR_SIZE: u64 = 64;

/// Size of one symbol table record
const SYM_SIZE: u64 = 24;

/// Segment type of a loadable segment
pub const PT_LOAD: u32 = 1;

/// Segment type of the interpreter path segment
pub const PT_INTERP: u32 = 3;

/// Section type of a full symbol table
pub const SHT_SYMTAB: u32 = 2;

/// Section type of a string table
pub const SHT_STRTAB: u32 = 3;

/// Section type of a section occupying no file bytes (`.bss`-style)
pub const SHT_NOBITS: u32 = 8;

/// Section type of the dynamic linking symbol table
pub const SHT_DYNSYM: u32 = 11;

/// Errors produced while parsing or querying an [`ElfImage`]
#[derive(Error, Debug)]
pub enum ElfError {
    /// The buffer does not start with the ELF identification magic
    #[error("Not an ELF image (bad magic)")]
    BadMagic,

    /// The image class does not match the supported 64-bit class
    #[error("ELF class {0:#x} does not match the supported 64-bit class")]
    ClassMismatch(u8),

    /// The image machine does not match the supported x86-64 machine
    #[error("ELF machine {0:#x} does not match the supported x86-64 machine")]
    MachineMismatch(u16),

    /// The image is not an executable or shared object
    #[error("ELF type {0:#x} is not an executable or a shared object")]
    TypeUnsupported(u16),

    /// A position-independent image was linked with a nonzero base
    #[error("PIE image has a nonzero link-time load address: {0:#x}")]
    PieNonZeroBase(u64),

    /// A structure points outside the file buffer
    #[error("Range {offset:#x}+{len:#x} is outside the {size:#x} byte image")]
    Truncated {
        /// Start of the out-of-bounds range
        offset: u64,
        /// Length of the out-of-bounds range
        len: u64,
        /// Total buffer size
        size: usize,
    },

    /// A header field has a value the parser cannot work with
    #[error("Malformed ELF header: {0}")]
    BadHeader(&'static str),

    /// A string table index points outside the section table
    #[error("String table index {0} is out of range")]
    BadStringTableIndex(usize),

    /// A string ran off the end of its string table
    #[error("Unterminated string at string table offset {0:#x}")]
    UnterminatedString(u64),

    /// Attempted to relocate an image linked at fixed addresses
    #[error("Cannot relocate a fixed-address image")]
    RelocateFixedImage,

    /// No section with the requested name exists
    #[error("Section not found: {0}")]
    SectionNotFound(String),

    /// No symbol with the requested name exists
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// Failed to open or map the image file
    #[error("Failed to load {path:?}: {source}")]
    Io {
        /// Path of the image that failed to load
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
}

/// Link type of an image
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ElfType {
    /// Linked at fixed virtual addresses
    Executable,

    /// Position-independent, shifted to its runtime base at load time
    SharedObject,
}

/// Backing bytes of an [`ElfImage`]
enum Bytes {
    /// Read-only mapping of the image file
    Mapped(memmap::Mmap),

    /// Caller-supplied buffer
    Owned(Vec<u8>),
}

impl std::ops::Deref for Bytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match self {
            Bytes::Mapped(map) => map,
            Bytes::Owned(bytes) => bytes,
        }
    }
}

/// One program header table entry
#[derive(Debug, Clone)]
pub struct Segment {
    /// Segment type (`PT_*`)
    pub segment_type: u32,

    /// Permission flags (`PF_*`)
    pub flags: u32,

    /// Offset of the segment data within the file
    pub offset: u64,

    /// Virtual address the segment is mapped at
    pub vaddr: VirtAddr,

    /// Physical address hint
    pub paddr: PhysAddr,

    /// Bytes the segment occupies in the file
    pub filesize: u64,

    /// Bytes the segment occupies in memory
    pub memsize: u64,

    /// Required alignment
    pub align: u64,
}

/// One section header table entry
#[derive(Debug, Clone)]
pub struct Section {
    /// Section name, resolved through the section header string table
    pub name: String,

    /// Section type (`SHT_*`)
    pub section_type: u32,

    /// Section flags (`SHF_*`)
    pub flags: u64,

    /// Virtual address of the section, or 0 if it is not mapped
    pub addr: VirtAddr,

    /// Offset of the section data within the file
    pub offset: u64,

    /// Size of the section in bytes
    pub size: u64,

    /// Index of an associated section; the string table for symbol tables
    pub link: u32,

    /// Extra section type specific information
    pub info: u32,

    /// Required alignment
    pub addralign: u64,

    /// Size of one record for sections holding fixed-size records
    pub entsize: u64,
}

/// One symbol table record
#[derive(Debug, Clone)]
pub struct Symbol {
    /// Symbol name, resolved through the linked string table
    pub name: String,

    /// Symbol kind (`STT_*`: object, function, ...)
    pub kind: u8,

    /// Symbol binding (`STB_*`: local, global, weak)
    pub binding: u8,

    /// Symbol visibility (`STV_*`)
    pub visibility: u8,

    /// Index of the section the symbol is defined in
    pub section_index: u16,

    /// Virtual address of the symbol
    pub value: VirtAddr,

    /// Size of the symbol in bytes
    pub size: u64,
}

/// Location of the program header table within the file, as reported by the
/// ELF header
///
/// The loader forwards these values to the guest through its auxiliary
/// vector when starting the target process.
#[derive(Debug, Copy, Clone)]
pub struct ProgramHeaderInfo {
    /// File offset of the program header table
    pub offset: u64,

    /// Size of one table entry
    pub entry_size: u16,

    /// Number of table entries
    pub count: u16,
}

/// A parsed guest binary
///
/// Owns the raw file bytes and every view derived from them. Immutable after
/// construction except for [`ElfImage::relocate`], which must run before the
/// image is shared with any reader.
pub struct ElfImage {
    /// Path the image was loaded from
    path: PathBuf,

    /// The full file contents
    data: Bytes,

    /// Link type of the image
    elf_type: ElfType,

    /// Entry point virtual address
    entry: VirtAddr,

    /// Current base address; 0 for a PIE that has not been relocated yet
    load_addr: VirtAddr,

    /// Page-aligned end of the highest loadable segment
    initial_brk: VirtAddr,

    /// Program header table location for the guest's auxiliary vector
    phinfo: ProgramHeaderInfo,

    /// Parsed program headers
    segments: Vec<Segment>,

    /// Parsed section headers with resolved names
    sections: Vec<Section>,

    /// Symbols from every symbol table section
    symbols: Vec<Symbol>,

    /// Resolved shared library dependency paths
    dependencies: Vec<PathBuf>,

    /// Interpreter path from a `PT_INTERP` segment
    interpreter: Option<String>,

    /// Unwinding and source-line engine built from the debug sections
    debug_info: DebugInfo,
}

impl ElfImage {
    /// Load and parse the image at `path`
    ///
    /// # Errors
    ///
    /// * The file cannot be opened or mapped
    /// * The image fails validation or parsing (see [`ElfError`])
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_path_with_config(path, &Config::default())
    }

    /// Load and parse the image at `path` using the given [`Config`]
    ///
    /// # Errors
    ///
    /// * The file cannot be opened or mapped
    /// * The image fails validation or parsing (see [`ElfError`])
    pub fn from_path_with_config(path: impl AsRef<Path>, config: &Config) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = File::open(&path).map_err(|source| ElfError::Io {
            path: path.clone(),
            source,
        })?;

        // The mapping is read-only and lives as long as the image does
        let map = unsafe { memmap::Mmap::map(&file) }.map_err(|source| ElfError::Io {
            path: path.clone(),
            source,
        })?;

        Self::parse(path, Bytes::Mapped(map), config)
    }

    /// Parse an image from an in-memory buffer
    ///
    /// `path` is kept for diagnostics and dependency discovery; the bytes are
    /// never re-read from disk.
    ///
    /// # Errors
    ///
    /// * The image fails validation or parsing (see [`ElfError`])
    pub fn from_bytes(path: impl Into<PathBuf>, data: Vec<u8>) -> Result<Self> {
        Self::parse(path.into(), Bytes::Owned(data), &Config::default())
    }

    /// Parse the raw bytes into an [`ElfImage`]
    fn parse(path: PathBuf, data: Bytes, config: &Config) -> Result<Self> {
        let buf: &[u8] = &data;

        // Identification and architecture checks. Anything that fails here is
        // a misconfigured environment, not a guest bug.
        let ident = view(buf, 0, 16)?;
        if ident[..4] != ELF_MAGIC {
            return Err(ElfError::BadMagic);
        }
        if ident[4] != ELFCLASS64 {
            return Err(ElfError::ClassMismatch(ident[4]));
        }

        let elf_type_raw = read_u16(buf, 16)?;
        let machine = read_u16(buf, 18)?;
        if machine != EM_X86_64 {
            return Err(ElfError::MachineMismatch(machine));
        }
        let elf_type = match elf_type_raw {
            ET_EXEC => ElfType::Executable,
            ET_DYN => ElfType::SharedObject,
            other => return Err(ElfError::TypeUnsupported(other)),
        };

        let entry = read_u64(buf, 24)?;
        let phoff = read_u64(buf, 32)?;
        let shoff = read_u64(buf, 40)?;
        let phentsize = read_u16(buf, 54)?;
        let phnum = read_u16(buf, 56)?;
        let shentsize = read_u16(buf, 58)?;
        let shnum = read_u16(buf, 60)?;
        let shstrndx = read_u16(buf, 62)?;

        if phnum > 0 && u64::from(phentsize) < PHDR_SIZE {
            return Err(ElfError::BadHeader("program header entries too small"));
        }
        if shnum > 0 && u64::from(shentsize) < SHDR_SIZE {
            return Err(ElfError::BadHeader("section header entries too small"));
        }

        let phinfo = ProgramHeaderInfo {
            offset: phoff,
            entry_size: phentsize,
            count: phnum,
        };

        // Program headers. Track the lowest loadable address as the link-time
        // base and the page-ceiling of the highest loadable end as the brk
        // the guest process starts with.
        let mut segments = Vec::with_capacity(usize::from(phnum));
        let mut load_addr: Option<u64> = None;
        let mut initial_brk = 0_u64;
        let mut interpreter = None;

        for i in 0..u64::from(phnum) {
            let base = phoff
                .checked_add(i * u64::from(phentsize))
                .ok_or(ElfError::BadHeader("program header table wraps"))?;
            let raw = view(buf, base, PHDR_SIZE)?;

            let segment = Segment {
                segment_type: read_u32_in(raw, 0),
                flags: read_u32_in(raw, 4),
                offset: read_u64_in(raw, 8),
                vaddr: VirtAddr(read_u64_in(raw, 16)),
                paddr: PhysAddr(read_u64_in(raw, 24)),
                filesize: read_u64_in(raw, 32),
                memsize: read_u64_in(raw, 40),
                align: read_u64_in(raw, 48),
            };

            // Every segment's file view must fit the buffer so the data
            // accessors can never slice out of bounds
            let seg_data = view(buf, segment.offset, segment.filesize)?;

            if segment.segment_type == PT_LOAD {
                let end = segment
                    .vaddr
                    .0
                    .checked_add(segment.memsize)
                    .and_then(|end| end.checked_add(PAGE_SIZE - 1))
                    .ok_or(ElfError::BadHeader("loadable segment wraps the address space"))?;
                let next_page = end & !(PAGE_SIZE - 1);

                initial_brk = initial_brk.max(next_page);
                load_addr = Some(load_addr.map_or(segment.vaddr.0, |low| low.min(segment.vaddr.0)));
            }

            if segment.segment_type == PT_INTERP {
                let end = seg_data
                    .iter()
                    .position(|&b| b == 0)
                    .unwrap_or(seg_data.len());
                interpreter = Some(String::from_utf8_lossy(&seg_data[..end]).into_owned());
            }

            segments.push(segment);
        }

        let load_addr = load_addr.unwrap_or(0);

        // A PIE is linked at base 0; anything else means the image was
        // mis-linked or mis-parsed
        if elf_type == ElfType::SharedObject && load_addr != 0 {
            return Err(ElfError::PieNonZeroBase(load_addr));
        }

        // Section headers, names resolved through the section header string
        // table afterwards
        let mut sections = Vec::with_capacity(usize::from(shnum));
        let mut name_indexes = Vec::with_capacity(usize::from(shnum));

        for i in 0..u64::from(shnum) {
            let base = shoff
                .checked_add(i * u64::from(shentsize))
                .ok_or(ElfError::BadHeader("section header table wraps"))?;
            let raw = view(buf, base, SHDR_SIZE)?;

            let section = Section {
                name: String::new(),
                section_type: read_u32_in(raw, 4),
                flags: read_u64_in(raw, 8),
                addr: VirtAddr(read_u64_in(raw, 16)),
                offset: read_u64_in(raw, 24),
                size: read_u64_in(raw, 32),
                link: read_u32_in(raw, 40),
                info: read_u32_in(raw, 44),
                addralign: read_u64_in(raw, 48),
                entsize: read_u64_in(raw, 56),
            };

            // `.bss`-style sections occupy no file bytes; everything else
            // must fit the buffer
            if section.section_type != SHT_NOBITS {
                view(buf, section.offset, section.size)?;
            }

            name_indexes.push(read_u32_in(raw, 0));
            sections.push(section);
        }

        if !sections.is_empty() {
            let strtab = sections
                .get(usize::from(shstrndx))
                .ok_or(ElfError::BadStringTableIndex(usize::from(shstrndx)))?;
            let (strtab_off, strtab_size) = (strtab.offset, strtab.size);
            let strtab_data = view(buf, strtab_off, strtab_size)?;

            for (section, name_index) in sections.iter_mut().zip(name_indexes) {
                section.name = read_strtab(strtab_data, u64::from(name_index))?;
            }
        }

        // Symbols live in the symbol table sections; each table names its own
        // string table through the link field
        let mut symbols = Vec::new();
        for section in &sections {
            if section.section_type != SHT_SYMTAB && section.section_type != SHT_DYNSYM {
                continue;
            }

            let strtab = sections
                .get(section.link as usize)
                .ok_or(ElfError::BadStringTableIndex(section.link as usize))?;
            let strtab_data = view(buf, strtab.offset, strtab.size)?;
            let table = view(buf, section.offset, section.size)?;

            for raw in table.chunks_exact(SYM_SIZE as usize) {
                let info = raw[4];
                let other = raw[5];

                symbols.push(Symbol {
                    name: read_strtab(strtab_data, u64::from(read_u32_in(raw, 0)))?,
                    kind: info & 0xf,
                    binding: info >> 4,
                    visibility: other & 0x3,
                    section_index: u16::from_le_bytes([raw[6], raw[7]]),
                    value: VirtAddr(read_u64_in(raw, 8)),
                    size: read_u64_in(raw, 16),
                });
            }
        }

        // Dependency discovery is best effort: a missing resolver or an
        // unresolvable image degrades to an empty list
        let dependencies = discover_dependencies(&path, &config.loader.dependency_resolver);

        let debug_info = DebugInfo::new(buf, &sections);

        Ok(Self {
            path,
            data,
            elf_type,
            entry: VirtAddr(entry),
            load_addr: VirtAddr(load_addr),
            initial_brk: VirtAddr(initial_brk),
            phinfo,
            segments,
            sections,
            symbols,
            dependencies,
            interpreter,
            debug_info,
        })
    }

    /// Shift a position-independent image to its runtime base address
    ///
    /// Applies the delta between the current and new base uniformly to the
    /// entry point, the initial brk, every segment, every section and every
    /// symbol, so relative offsets are preserved. Calling this again with a
    /// different base composes: relocating to A then to B ends up identical
    /// to relocating straight to B.
    ///
    /// # Errors
    ///
    /// * [`ElfError::RelocateFixedImage`] if the image is not
    ///   position-independent
    pub fn relocate(&mut self, load_addr: VirtAddr) -> Result<()> {
        if self.elf_type != ElfType::SharedObject {
            return Err(ElfError::RelocateFixedImage);
        }

        let delta = load_addr.0.wrapping_sub(self.load_addr.0);
        self.load_addr = load_addr;

        self.entry.0 = self.entry.0.wrapping_add(delta);
        self.initial_brk.0 = self.initial_brk.0.wrapping_add(delta);

        for segment in &mut self.segments {
            segment.vaddr.0 = segment.vaddr.0.wrapping_add(delta);
            segment.paddr.0 = segment.paddr.0.wrapping_add(delta);
        }
        for section in &mut self.sections {
            section.addr.0 = section.addr.0.wrapping_add(delta);
        }
        for symbol in &mut self.symbols {
            symbol.value.0 = symbol.value.0.wrapping_add(delta);
        }

        Ok(())
    }

    /// Get the half-open virtual address range of the section called `name`
    ///
    /// # Errors
    ///
    /// * [`ElfError::SectionNotFound`] if no such section exists
    pub fn section_range(&self, name: &str) -> Result<Range<VirtAddr>> {
        self.sections
            .iter()
            .find(|section| section.name == name)
            .map(|section| section.addr..VirtAddr(section.addr.0 + section.size))
            .ok_or_else(|| ElfError::SectionNotFound(name.to_string()))
    }

    /// Get the half-open virtual address range of the symbol called `name`
    ///
    /// # Errors
    ///
    /// * [`ElfError::SymbolNotFound`] if no such symbol exists
    pub fn symbol_range(&self, name: &str) -> Result<Range<VirtAddr>> {
        self.symbols
            .iter()
            .find(|symbol| symbol.name == name)
            .map(|symbol| symbol.value..VirtAddr(symbol.value.0 + symbol.size))
            .ok_or_else(|| ElfError::SymbolNotFound(name.to_string()))
    }

    /// Get the symbol whose `[value, value + size)` interval contains `addr`
    ///
    /// Symbol counts are small relative to how often crashes are triaged, so
    /// a linear scan is fine here.
    #[must_use]
    pub fn symbol_at(&self, addr: VirtAddr) -> Option<&Symbol> {
        self.symbols
            .iter()
            .find(|symbol| addr.0 >= symbol.value.0 && addr.0 - symbol.value.0 < symbol.size)
    }

    /// Resolve a code address to a `file:line` source location
    ///
    /// Debug records hold link-time addresses, so for a relocated PIE the
    /// runtime address is shifted back before the lookup.
    #[must_use]
    pub fn address_to_source(&self, addr: VirtAddr) -> Option<String> {
        let addr = match self.elf_type {
            ElfType::SharedObject => addr.0.wrapping_sub(self.load_addr.0),
            ElfType::Executable => addr.0,
        };
        self.debug_info.address_to_source(addr)
    }

    /// Get the raw bytes of `segment`
    ///
    /// # Panics
    ///
    /// * If `segment` does not belong to this image
    #[must_use]
    pub fn segment_data(&self, segment: &Segment) -> &[u8] {
        // Views were validated against the buffer at parse time
        &self.data[segment.offset as usize..(segment.offset + segment.filesize) as usize]
    }

    /// Get the raw bytes of `section`; empty for `.bss`-style sections
    ///
    /// # Panics
    ///
    /// * If `section` does not belong to this image
    #[must_use]
    pub fn section_data(&self, section: &Section) -> &[u8] {
        if section.section_type == SHT_NOBITS {
            return &[];
        }
        &self.data[section.offset as usize..(section.offset + section.size) as usize]
    }

    /// Path the image was loaded from
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The full file contents
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Size of the file in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Link type of the image
    #[must_use]
    pub fn elf_type(&self) -> ElfType {
        self.elf_type
    }

    /// Returns `true` if the image is position-independent
    #[must_use]
    pub fn is_pie(&self) -> bool {
        self.elf_type == ElfType::SharedObject
    }

    /// Entry point virtual address
    #[must_use]
    pub fn entry(&self) -> VirtAddr {
        self.entry
    }

    /// Current base address
    #[must_use]
    pub fn load_addr(&self) -> VirtAddr {
        self.load_addr
    }

    /// Page-aligned end of the highest loadable segment
    #[must_use]
    pub fn initial_brk(&self) -> VirtAddr {
        self.initial_brk
    }

    /// Program header table location for the guest's auxiliary vector
    #[must_use]
    pub fn phinfo(&self) -> ProgramHeaderInfo {
        self.phinfo
    }

    /// Parsed program headers
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Parsed section headers
    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Symbols from every symbol table section
    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Resolved shared library dependency paths
    #[must_use]
    pub fn dependencies(&self) -> &[PathBuf] {
        &self.dependencies
    }

    /// Interpreter path from a `PT_INTERP` segment
    #[must_use]
    pub fn interpreter(&self) -> Option<&str> {
        self.interpreter.as_deref()
    }

    /// The unwinding and source-line engine for this image
    #[must_use]
    pub fn debug_info(&self) -> &DebugInfo {
        &self.debug_info
    }

    /// Returns `true` if the image carries unwinding or line-number data
    #[must_use]
    pub fn has_debug_info(&self) -> bool {
        self.debug_info.has_debug_info()
    }
}

impl fmt::Debug for ElfImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElfImage")
            .field("path", &self.path)
            .field("elf_type", &self.elf_type)
            .field("entry", &self.entry)
            .field("load_addr", &self.load_addr)
            .field("segments", &self.segments.len())
            .field("sections", &self.sections.len())
            .field("symbols", &self.symbols.len())
            .finish()
    }
}

/// Bounds-checked view into `data`
fn view(data: &[u8], offset: u64, len: u64) -> Result<&[u8]> {
    let end = offset.checked_add(len).ok_or(ElfError::Truncated {
        offset,
        len,
        size: data.len(),
    })?;

    if end > data.len() as u64 {
        return Err(ElfError::Truncated {
            offset,
            len,
            size: data.len(),
        });
    }

    Ok(&data[offset as usize..end as usize])
}

/// Read a little-endian `u16` at `offset`
fn read_u16(data: &[u8], offset: u64) -> Result<u16> {
    Ok(u16::from_le_bytes(view(data, offset, 2)?.try_into().unwrap()))
}

/// Read a little-endian `u64` at `offset`
fn read_u64(data: &[u8], offset: u64) -> Result<u64> {
    Ok(u64::from_le_bytes(view(data, offset, 8)?.try_into().unwrap()))
}

/// Read a little-endian `u32` from a slice already known to be in bounds
fn read_u32_in(raw: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(raw[offset..offset + 4].try_into().unwrap())
}

/// Read a little-endian `u64` from a slice already known to be in bounds
fn read_u64_in(raw: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(raw[offset..offset + 8].try_into().unwrap())
}

/// Read a NUL-terminated string at `offset` into a string table
fn read_strtab(strtab: &[u8], offset: u64) -> Result<String> {
    let start =
        usize::try_from(offset).map_err(|_| ElfError::UnterminatedString(offset))?;
    let tail = strtab
        .get(start..)
        .ok_or(ElfError::UnterminatedString(offset))?;
    let end = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or(ElfError::UnterminatedString(offset))?;

    Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
}

/// Query the dynamic linker for the resolved dependencies of `path`
///
/// Best effort: any failure to run the resolver or to parse a line degrades
/// to a shorter (possibly empty) list.
fn discover_dependencies(path: &Path, resolver: &str) -> Vec<PathBuf> {
    let output = match Command::new(resolver).arg(path).output() {
        Ok(output) => output,
        Err(err) => {
            log::debug!(
                "Dependency discovery unavailable for {}: {err}",
                path.display()
            );
            return Vec::new();
        }
    };

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(parse_dependency_line)
        .collect()
}

/// Parse one `name => path (address)` line of dynamic linker output
fn parse_dependency_line(line: &str) -> Option<PathBuf> {
    let (_, rest) = line.split_once("=>")?;

    let mut fields = rest.split_whitespace();
    let path = fields.next()?;
    let load_addr = fields.next()?;

    // "libx.so => not found" and friends don't carry a load address
    if !load_addr.starts_with("(0x") {
        return None;
    }

    Some(PathBuf::from(path))
}
