//! # Faultline
//!
//! Guest binary analysis and symbolic stack unwinding for a KVM-based
//! fuzzing hypervisor.
//!
//! When the guest faults, the hypervisor has to explain where execution
//! was: which binary, which function, which source line, and the full call
//! chain across the main executable and every loaded library, without
//! trusting the guest to keep frame pointers or to carry a debug build.
//! This crate owns that analysis. The VM lifecycle, the syscall layer and
//! the guest memory manager live elsewhere and are reached only through
//! narrow contracts ([`Mmu`], `kvm_regs` snapshots).
//!
//! ## Roadmap of the repo:
//!
//! * [`ElfImage`] - One loaded guest binary: segments, sections, symbols,
//!   dynamic dependencies, and the one-time relocation of a
//!   position-independent image. Examples:
//!     - [`ElfImage::from_path`]
//!     - [`ElfImage::relocate`]
//!     - [`ElfImage::symbol_at`]
//!     - [`ElfImage::address_to_source`]
//! * [`DebugInfo`] - Per-image call frame information and line tables;
//!   steps one stack frame per call by reading saved registers out of
//!   guest memory:
//!     - [`DebugInfo::next_frame`]
//! * [`StackWalker`] / [`unwind_image`] - Cross-module and single-module
//!   backtraces from a vCPU register snapshot.
//! * [`page_table::Entry`] - Bit-exact x86-64 page table entry model the
//!   guest address space is built from.
//! * [`Mmu`] - The guest-memory-read capability everything above consumes.
//!
//! # Example:
//!
//! ```no_run
//! use faultline::{ElfImage, Mmu, StackWalker, VirtAddr};
//!
//! # fn main() -> faultline::anyhow::Result<()> {
//! // During VM setup: load the target and relocate its PIE dependency
//! let target = ElfImage::from_path("./target_binary")?;
//! let mut libc = ElfImage::from_path(&target.dependencies()[0])?;
//! libc.relocate(VirtAddr(0x7fff_f7a0_0000))?;
//! # Ok(())
//! # }
//! # fn at_fault_time(
//! #     target: &ElfImage,
//! #     libc: &ElfImage,
//! #     kregs: &kvm_bindings::kvm_regs,
//! #     mmu: &mut dyn Mmu,
//! # ) {
//!
//! // At fault time: walk the stack across both images
//! let walker = StackWalker::new(vec![target, libc]);
//! for (addr, image) in walker.unwind(kregs, mmu) {
//!     let symbol = image
//!         .symbol_at(addr)
//!         .map_or("??", |symbol| symbol.name.as_str());
//!     let source = image
//!         .address_to_source(addr)
//!         .unwrap_or_else(|| String::from("??:?"));
//!     println!("{:#018x} {symbol} ({source})", addr.0);
//! }
//! # }
//! ```

#![deny(missing_docs)]

pub use anyhow;

pub mod addrs;
pub use addrs::{Cr3, PhysAddr, VirtAddr};

pub mod config;
pub use config::Config;

pub mod debug_info;
pub use debug_info::{DebugInfo, UnwindError};

pub mod elf;
pub use elf::{ElfError, ElfImage, ElfType, Symbol};

pub mod memory;
pub use memory::Mmu;

pub mod page_table;

pub mod regs;
pub use regs::{DwarfReg, DwarfRegs};

pub mod unwinder;
pub use unwinder::{unwind_image, StackWalker};

#[cfg(test)]
pub(crate) mod test_elf;
