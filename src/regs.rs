//! DWARF register file used while stepping through stack frames
//!
//! Call frame information names registers by the DWARF x86-64 numbering, so
//! the vCPU snapshot is converted into a fixed array indexed by that
//! numbering before the first unwind step.

use addr2line::gimli::Register;
use kvm_bindings::kvm_regs;

/// DWARF x86-64 register numbering for the registers tracked during
/// unwinding
///
/// The discriminants follow the platform ABI numbering, which is also the
/// numbering gimli's register rules use. Note the rdx/rcx/rbx order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(usize)]
pub enum DwarfReg {
    /// rax
    Rax = 0,
    /// rdx
    Rdx = 1,
    /// rcx
    Rcx = 2,
    /// rbx
    Rbx = 3,
    /// rsi
    Rsi = 4,
    /// rdi
    Rdi = 5,
    /// rbp
    Rbp = 6,
    /// rsp
    Rsp = 7,
    /// r8
    R8 = 8,
    /// r9
    R9 = 9,
    /// r10
    R10 = 10,
    /// r11
    R11 = 11,
    /// r12
    R12 = 12,
    /// r13
    R13 = 13,
    /// r14
    R14 = 14,
    /// r15
    R15 = 15,
    /// The synthetic return address slot
    ReturnAddress = 16,
}

impl DwarfReg {
    /// Number of tracked registers
    pub const MAX: usize = 17;
}

/// Fixed-size register file keyed by [`DwarfReg`]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct DwarfRegs([u64; DwarfReg::MAX]);

impl DwarfRegs {
    /// Get the value of `reg`
    #[must_use]
    pub fn get(&self, reg: DwarfReg) -> u64 {
        self.0[reg as usize]
    }

    /// Set the value of `reg`
    pub fn set(&mut self, reg: DwarfReg, value: u64) {
        self.0[reg as usize] = value;
    }

    /// Get the value of a gimli [`Register`] if it is one of the tracked
    /// registers
    #[must_use]
    pub fn get_dwarf(&self, reg: Register) -> Option<u64> {
        self.0.get(usize::from(reg.0)).copied()
    }

    /// Set the value of a gimli [`Register`], returning whether the register
    /// is tracked
    pub fn set_dwarf(&mut self, reg: Register, value: u64) -> bool {
        match self.0.get_mut(usize::from(reg.0)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Get the current return address slot
    #[must_use]
    pub fn return_address(&self) -> u64 {
        self.get(DwarfReg::ReturnAddress)
    }

    /// Set the return address slot
    pub fn set_return_address(&mut self, value: u64) {
        self.set(DwarfReg::ReturnAddress, value);
    }
}

impl From<&kvm_regs> for DwarfRegs {
    fn from(kregs: &kvm_regs) -> Self {
        let mut regs = DwarfRegs::default();
        regs.set(DwarfReg::Rax, kregs.rax);
        regs.set(DwarfReg::Rdx, kregs.rdx);
        regs.set(DwarfReg::Rcx, kregs.rcx);
        regs.set(DwarfReg::Rbx, kregs.rbx);
        regs.set(DwarfReg::Rsi, kregs.rsi);
        regs.set(DwarfReg::Rdi, kregs.rdi);
        regs.set(DwarfReg::Rbp, kregs.rbp);
        regs.set(DwarfReg::Rsp, kregs.rsp);
        regs.set(DwarfReg::R8, kregs.r8);
        regs.set(DwarfReg::R9, kregs.r9);
        regs.set(DwarfReg::R10, kregs.r10);
        regs.set(DwarfReg::R11, kregs.r11);
        regs.set(DwarfReg::R12, kregs.r12);
        regs.set(DwarfReg::R13, kregs.r13);
        regs.set(DwarfReg::R14, kregs.r14);
        regs.set(DwarfReg::R15, kregs.r15);

        // The instruction pointer seeds the synthetic return address slot:
        // the first "return address" of a backtrace is the faulting rip
        regs.set(DwarfReg::ReturnAddress, kregs.rip);
        regs
    }
}
