//! Guest memory access contract consumed during unwinding
//!
//! The frame allocator and page fault handler backing the guest address
//! space live outside this crate. Unwinding only ever needs to read a few
//! saved registers off the guest stack, so the whole collaborator surface
//! is this one trait.

use anyhow::Result;

use crate::addrs::VirtAddr;

/// Read-only access to guest virtual memory
pub trait Mmu {
    /// Read exactly `buf.len()` bytes from the guest at `virt_addr`
    ///
    /// # Errors
    ///
    /// * Any part of the range is unmapped or inaccessible
    fn read_bytes(&mut self, virt_addr: VirtAddr, buf: &mut [u8]) -> Result<()>;

    /// Read a little-endian `u64` from the guest at `virt_addr`
    ///
    /// # Errors
    ///
    /// * Any part of the range is unmapped or inaccessible
    fn read_u64(&mut self, virt_addr: VirtAddr) -> Result<u64> {
        let mut bytes = [0_u8; 8];
        self.read_bytes(virt_addr, &mut bytes)?;
        Ok(u64::from_le_bytes(bytes))
    }
}
