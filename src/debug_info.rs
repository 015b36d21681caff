//! Call-frame unwinding and source-line resolution for one image
//!
//! Frame-pointer chains are unreliable in optimized guest code, so frames
//! are recovered from the `.eh_frame` call frame information instead: per
//! instruction range, the records describe how to recompute the caller's
//! registers from the callee's. That works uniformly across optimization
//! levels, which is what crash triage needs.
//!
//! All addresses handled here are link-time addresses; callers shift
//! relocated PIE addresses back before asking.

use std::fmt;
use std::sync::Arc;

use addr2line::gimli;
use addr2line::gimli::{
    BaseAddresses, CfaRule, EhFrame, EhFrameHdr, EndianReader, EndianSlice, LittleEndian,
    RegisterRule, RunTimeEndian, UnwindContext, UnwindSection, UnwindTableRow, X86_64,
};
use addr2line::Context;
use thiserror::Error;

use crate::addrs::VirtAddr;
use crate::elf::{Section, SHT_NOBITS};
use crate::memory::Mmu;
use crate::regs::{DwarfReg, DwarfRegs};

/// Result type for unwinding
pub type Result<T> = std::result::Result<T, UnwindError>;

/// Reader over owned copies of the debug sections
type Reader = EndianReader<RunTimeEndian, Arc<[u8]>>;

/// Slice reader over the copied unwind sections
type Slice<'a> = EndianSlice<'a, LittleEndian>;

/// Errors hit while stepping to the previous stack frame
#[derive(Error, Debug)]
pub enum UnwindError {
    /// The unwind tables could not be parsed
    #[error("Gimli error: {0:?}")]
    Gimli(#[from] gimli::Error),

    /// The CFA rule names a register the register file does not track
    #[error("CFA rule uses an untracked register: {0:?}")]
    UntrackedCfaRegister(gimli::Register),

    /// The CFA is described by a DWARF expression, which is unsupported
    #[error("CFA expression rules are unhandled")]
    CfaExpressionUnhandled,

    /// A register recovery rule needed guest memory that could not be read
    #[error("Failed to read the guest stack at {0:#x}: {1:?}")]
    StackRead(u64, anyhow::Error),
}

/// Unwinding rules and line-number tables extracted from one image
pub struct DebugInfo {
    /// The `.eh_frame` section copied out of the image
    eh_frame_data: Vec<u8>,

    /// The `.eh_frame_hdr` section copied out of the image
    eh_frame_hdr_data: Vec<u8>,

    /// Link-time addresses of the unwind sections
    base_addresses: BaseAddresses,

    /// Source-line lookup context over the `.debug_*` sections
    context: Option<Context<Reader>>,
}

impl DebugInfo {
    /// Build the debug engine from an image's buffer and section table
    ///
    /// Absence of unwind or line-number sections is a valid state: the
    /// engine then reports no further frames and no source locations.
    pub(crate) fn new(data: &[u8], sections: &[Section]) -> Self {
        let mut base_addresses = BaseAddresses::default();
        let mut eh_frame_data = Vec::new();
        let mut eh_frame_hdr_data = Vec::new();

        if let Some(section) = find_section(sections, ".eh_frame_hdr") {
            base_addresses = base_addresses.set_eh_frame_hdr(section.addr.0);
            eh_frame_hdr_data = section_bytes(data, section).to_vec();
        }

        match find_section(sections, ".eh_frame") {
            Some(section) => {
                base_addresses = base_addresses.set_eh_frame(section.addr.0);
                eh_frame_data = section_bytes(data, section).to_vec();
            }
            None => log::debug!("Image has no .eh_frame, unwinding disabled"),
        }

        if let Some(section) = find_section(sections, ".text") {
            base_addresses = base_addresses.set_text(section.addr.0);
        }

        let context = Self::load_context(data, sections);

        Self {
            eh_frame_data,
            eh_frame_hdr_data,
            base_addresses,
            context,
        }
    }

    /// Build the line-number context over copies of the `.debug_*` sections
    fn load_context(data: &[u8], sections: &[Section]) -> Option<Context<Reader>> {
        // Without .debug_info there is nothing to resolve
        find_section(sections, ".debug_info")?;

        let load = |id: gimli::SectionId| -> std::result::Result<Reader, gimli::Error> {
            let bytes = find_section(sections, id.name())
                .map(|section| section_bytes(data, section))
                .unwrap_or(&[]);

            Ok(EndianReader::new(Arc::from(bytes), RunTimeEndian::Little))
        };

        let dwarf = match gimli::Dwarf::load(load) {
            Ok(dwarf) => dwarf,
            Err(err) => {
                log::warn!("Failed to load the .debug_* sections: {err:?}");
                return None;
            }
        };

        match Context::from_dwarf(dwarf) {
            Ok(context) => Some(context),
            Err(err) => {
                log::warn!("Failed to build the line-number context: {err:?}");
                None
            }
        }
    }

    /// Returns `true` if the image carries unwinding or line-number data
    #[must_use]
    pub fn has_debug_info(&self) -> bool {
        !self.eh_frame_data.is_empty() || self.context.is_some()
    }

    /// Step `regs` one frame towards the outermost caller
    ///
    /// Looks up the frame description covering the current return address
    /// slot, recomputes the canonical frame address, applies each register
    /// recovery rule (reading saved registers from the guest stack through
    /// `mmu`), and leaves `regs` describing the calling frame.
    ///
    /// Returns `Ok(false)` when no record covers the address or the
    /// recovered return address is 0: the walk reached the outermost frame.
    ///
    /// # Errors
    ///
    /// * The unwind tables are malformed
    /// * The CFA is a DWARF expression
    /// * A saved register could not be read from guest memory
    pub fn next_frame(&self, regs: &mut DwarfRegs, mmu: &mut dyn Mmu) -> Result<bool> {
        if self.eh_frame_data.is_empty() {
            return Ok(false);
        }

        // The guest is x86-64 no matter what the host build targets
        let mut eh_frame = EhFrame::new(&self.eh_frame_data, LittleEndian);
        eh_frame.set_address_size(8);

        let mut unwind_context = UnwindContext::new();

        let addr = regs.return_address();
        let row = match self.unwind_row(&eh_frame, &mut unwind_context, addr) {
            Ok(row) => row,
            Err(UnwindError::Gimli(gimli::Error::NoUnwindInfoForAddress)) => return Ok(false),
            Err(err) => return Err(err),
        };

        // The canonical frame address anchors every recovery rule of this row
        let cfa = match row.cfa() {
            CfaRule::RegisterAndOffset { register, offset } => regs
                .get_dwarf(*register)
                .ok_or(UnwindError::UntrackedCfaRegister(*register))?
                .wrapping_add_signed(*offset),
            CfaRule::Expression(_) => return Err(UnwindError::CfaExpressionUnhandled),
        };

        // Recovery rules read the callee's register values, so they apply
        // against a snapshot taken before any rule fires
        let callee_regs = *regs;

        for &(register, ref rule) in row.registers() {
            match rule {
                RegisterRule::Offset(offset) => {
                    let saved_at = VirtAddr(cfa.wrapping_add_signed(*offset));
                    let value = mmu
                        .read_u64(saved_at)
                        .map_err(|err| UnwindError::StackRead(saved_at.0, err))?;
                    regs.set_dwarf(register, value);
                }
                RegisterRule::ValOffset(offset) => {
                    regs.set_dwarf(register, cfa.wrapping_add_signed(*offset));
                }
                RegisterRule::Register(source) => {
                    if let Some(value) = callee_regs.get_dwarf(*source) {
                        regs.set_dwarf(register, value);
                    }
                }
                RegisterRule::Undefined | RegisterRule::SameValue => {}
                rule => log::warn!("Unhandled register rule for {register:?}: {rule:?}"),
            }
        }

        // The caller's stack pointer is the frame address by definition
        regs.set(DwarfReg::Rsp, cfa);

        // An undefined return address rule marks the outermost frame
        if matches!(row.register(X86_64::RA), RegisterRule::Undefined) {
            return Ok(false);
        }

        Ok(regs.return_address() != 0)
    }

    /// Find the unwind table row covering `addr`
    ///
    /// Prefers the binary search table from `.eh_frame_hdr`; a missing or
    /// unparsable header degrades to a linear `.eh_frame` scan.
    fn unwind_row<'a, 'ctx>(
        &'a self,
        eh_frame: &EhFrame<Slice<'a>>,
        unwind_context: &'ctx mut UnwindContext<Slice<'a>>,
        addr: u64,
    ) -> Result<&'ctx UnwindTableRow<Slice<'a>>> {
        if !self.eh_frame_hdr_data.is_empty() {
            let hdr = EhFrameHdr::new(&self.eh_frame_hdr_data, LittleEndian)
                .parse(&self.base_addresses, 8);

            match hdr {
                Ok(hdr) => {
                    if let Some(table) = hdr.table() {
                        return table
                            .unwind_info_for_address(
                                eh_frame,
                                &self.base_addresses,
                                unwind_context,
                                addr,
                                |section, bases, offset| section.cie_from_offset(bases, offset),
                            )
                            .map_err(UnwindError::Gimli);
                    }
                }
                Err(err) => log::debug!("Failed to parse .eh_frame_hdr: {err:?}"),
            }
        }

        eh_frame
            .unwind_info_for_address(
                &self.base_addresses,
                unwind_context,
                addr,
                |section, bases, offset| section.cie_from_offset(bases, offset),
            )
            .map_err(UnwindError::Gimli)
    }

    /// Resolve a link-time code address to a `file:line` source location
    #[must_use]
    pub fn address_to_source(&self, addr: u64) -> Option<String> {
        let context = self.context.as_ref()?;
        let location = context.find_location(addr).ok()??;
        let file = location.file?;

        match location.line {
            Some(line) => Some(format!("{file}:{line}")),
            None => Some(file.to_string()),
        }
    }
}

impl fmt::Debug for DebugInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugInfo")
            .field("base_addresses", &self.base_addresses)
            .field("eh_frame_len", &self.eh_frame_data.len())
            .field("has_line_context", &self.context.is_some())
            .finish()
    }
}

/// Find a section by name
fn find_section<'a>(sections: &'a [Section], name: &str) -> Option<&'a Section> {
    sections.iter().find(|section| section.name == name)
}

/// Raw bytes of `section` within `data`; empty if the range is bogus
fn section_bytes<'a>(data: &'a [u8], section: &Section) -> &'a [u8] {
    if section.section_type == SHT_NOBITS {
        return &[];
    }

    let start = usize::try_from(section.offset).unwrap_or(usize::MAX);
    let end = start.saturating_add(usize::try_from(section.size).unwrap_or(usize::MAX));
    data.get(start..end).unwrap_or(&[])
}
