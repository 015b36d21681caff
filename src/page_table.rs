//! Bit-exact model of an Intel 4-level page table entry
//!
//! The guest memory manager builds and walks translation tables out of these
//! entries. The physical frame base and the flag bits live in disjoint bit
//! ranges of the same `u64`; the setters here refuse values that would bleed
//! into the other range instead of silently masking them.

use crate::addrs::PhysAddr;

use thiserror::Error;

/// Size in bytes of a guest page
pub const PAGE_SIZE: u64 = 0x1000;

/// Bits of an [`Entry`] that hold the physical frame base
const PHYS_MASK: u64 = 0x000f_ffff_ffff_f000;

/// Errors for [`Entry`] updates
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// Frame base had bits outside the physical address range of an entry
    #[error("Frame base with bits outside the physical address mask: {0:#x}")]
    InvalidFrameBase(u64),

    /// Flags value had bits inside the physical address range of an entry
    #[error("Flags overlapping the physical address mask: {0:#x}")]
    InvalidFlags(u64),
}

/// Round `addr` up to the next page boundary
#[must_use]
pub const fn page_ceil(addr: u64) -> u64 {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Byte offset of `addr` within its page
#[must_use]
pub const fn page_offset(addr: u64) -> u64 {
    addr & (PAGE_SIZE - 1)
}

/// Returns `true` if `addr` sits on a page boundary
#[must_use]
pub const fn is_page_aligned(addr: u64) -> bool {
    addr & (PAGE_SIZE - 1) == 0
}

/// A page table entry
#[repr(transparent)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Entry(pub u64);

impl Entry {
    /// Set if this entry is present
    pub const PRESENT: u64 = 1 << 0;

    /// Set if this entry is writable
    pub const WRITABLE: u64 = 1 << 1;

    /// Set if this entry can be accessed from Ring 3
    pub const USER: u64 = 1 << 2;

    /// Set for a `write-through` caching policy, unset for `write-back`
    pub const WRITE_THROUGH: u64 = 1 << 3;

    /// Set if this entry is uncacheable
    pub const CACHE_DISABLE: u64 = 1 << 4;

    /// Set if this entry has been accessed
    pub const ACCESSED: u64 = 1 << 5;

    /// Set if this entry has been modified
    pub const DIRTY: u64 = 1 << 6;

    /// Set if this entry maps an extended page size (1GB or 2MB)
    pub const HUGE: u64 = 1 << 7;

    /// Set if this entry is global (only applies when CR4.global is set)
    pub const GLOBAL: u64 = 1 << 8;

    /// Set if execution is disabled for this entry
    pub const NO_EXECUTE: u64 = 1 << 63;

    /// Get the [`EntryFlags`] for this [`Entry`]
    #[inline]
    #[must_use]
    pub fn flags(self) -> EntryFlags {
        EntryFlags::from(self)
    }

    /// Get the physical frame base for this [`Entry`]
    #[inline]
    #[must_use]
    pub fn frame_base(self) -> PhysAddr {
        PhysAddr(self.0 & PHYS_MASK)
    }

    /// Set the physical frame base for this [`Entry`], leaving the flag bits
    /// untouched
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidFrameBase`] if `base` has bits outside the physical
    ///   address range (a misaligned frame or stray high bits)
    pub fn set_frame_base(&mut self, base: PhysAddr) -> Result<(), Error> {
        if base.0 & PHYS_MASK != base.0 {
            return Err(Error::InvalidFrameBase(base.0));
        }

        self.0 &= !PHYS_MASK;
        self.0 |= base.0;
        Ok(())
    }

    /// Set the flag bits for this [`Entry`], leaving the frame base untouched
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidFlags`] if `flags` has bits inside the physical
    ///   address range
    pub fn set_flags(&mut self, flags: u64) -> Result<(), Error> {
        if flags & !PHYS_MASK != flags {
            return Err(Error::InvalidFlags(flags));
        }

        self.0 &= PHYS_MASK;
        self.0 |= flags;
        Ok(())
    }

    /// Reset the entry to the non-present zero state
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Returns `true` if the present bit is set
    #[must_use]
    pub fn present(self) -> bool {
        self.0 & Self::PRESENT > 0
    }

    /// Set the present bit
    pub fn set_present(&mut self, value: bool) {
        self.set_bit(Self::PRESENT, value);
    }

    /// Returns `true` if the writable bit is set
    #[must_use]
    pub fn writable(self) -> bool {
        self.0 & Self::WRITABLE > 0
    }

    /// Set the writable bit
    pub fn set_writable(&mut self, value: bool) {
        self.set_bit(Self::WRITABLE, value);
    }

    /// Returns `true` if the entry is accessible from Ring 3
    #[must_use]
    pub fn user_permitted(self) -> bool {
        self.0 & Self::USER > 0
    }

    /// Set the user-accessible bit
    pub fn set_user_permitted(&mut self, value: bool) {
        self.set_bit(Self::USER, value);
    }

    /// Returns `true` if the accessed bit is set
    #[must_use]
    pub fn accessed(self) -> bool {
        self.0 & Self::ACCESSED > 0
    }

    /// Set the accessed bit
    pub fn set_accessed(&mut self, value: bool) {
        self.set_bit(Self::ACCESSED, value);
    }

    /// Returns `true` if the dirty bit is set
    #[must_use]
    pub fn dirty(self) -> bool {
        self.0 & Self::DIRTY > 0
    }

    /// Set the dirty bit
    pub fn set_dirty(&mut self, value: bool) {
        self.set_bit(Self::DIRTY, value);
    }

    /// Returns `true` if the entry maps an extended page size
    #[must_use]
    pub fn huge(self) -> bool {
        self.0 & Self::HUGE > 0
    }

    /// Set the extended page size bit
    pub fn set_huge(&mut self, value: bool) {
        self.set_bit(Self::HUGE, value);
    }

    /// Returns `true` if the global bit is set
    #[must_use]
    pub fn global(self) -> bool {
        self.0 & Self::GLOBAL > 0
    }

    /// Set the global bit
    pub fn set_global(&mut self, value: bool) {
        self.set_bit(Self::GLOBAL, value);
    }

    /// Returns `true` if execution is disabled for this entry
    #[must_use]
    pub fn execute_disabled(self) -> bool {
        self.0 & Self::NO_EXECUTE > 0
    }

    /// Set the execute disable bit
    pub fn set_execute_disabled(&mut self, value: bool) {
        self.set_bit(Self::NO_EXECUTE, value);
    }

    /// Set or clear a single designated flag bit
    fn set_bit(&mut self, bit: u64, value: bool) {
        if value {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

impl From<u64> for Entry {
    fn from(val: u64) -> Self {
        Self(val)
    }
}

/// Decoded flags of a page table [`Entry`]
#[derive(Debug, Copy, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct EntryFlags {
    /// Set if this entry is present
    present: bool,

    /// Set if this entry is writable
    writable: bool,

    /// Set if this entry can be accessed from Ring 3
    user_permitted: bool,

    /// Set if this entry has `write-through` caching policy
    write_through: bool,

    /// Set if this entry is `uncacheable`
    cache_disable: bool,

    /// Set if this entry has been accessed
    accessed: bool,

    /// Set if this entry has been modified
    dirty: bool,

    /// Set if this entry is for an extended page size
    huge: bool,

    /// Set if this entry is global
    global: bool,

    /// Set if execution is disabled for this entry
    execute_disable: bool,
}

impl EntryFlags {
    /// Returns `true` if the `present` bit is set
    #[must_use]
    pub fn present(&self) -> bool {
        self.present
    }

    /// Returns `true` if the `writable` bit is set
    #[must_use]
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Returns `true` if the entry is accessible from Ring 3
    #[must_use]
    pub fn user_permitted(&self) -> bool {
        self.user_permitted
    }

    /// Returns `true` if the entry maps an extended page size
    #[must_use]
    pub fn huge(&self) -> bool {
        self.huge
    }

    /// Returns `true` if the `global` bit is set
    #[must_use]
    pub fn global(&self) -> bool {
        self.global
    }

    /// Returns `true` if the entry is executable
    #[must_use]
    pub fn executable(&self) -> bool {
        !self.execute_disable
    }
}

impl From<Entry> for EntryFlags {
    #[inline]
    fn from(entry: Entry) -> Self {
        Self {
            present: entry.0 & Entry::PRESENT > 0,
            writable: entry.0 & Entry::WRITABLE > 0,
            user_permitted: entry.0 & Entry::USER > 0,
            write_through: entry.0 & Entry::WRITE_THROUGH > 0,
            cache_disable: entry.0 & Entry::CACHE_DISABLE > 0,
            accessed: entry.0 & Entry::ACCESSED > 0,
            dirty: entry.0 & Entry::DIRTY > 0,
            huge: entry.0 & Entry::HUGE > 0,
            global: entry.0 & Entry::GLOBAL > 0,
            execute_disable: entry.0 & Entry::NO_EXECUTE > 0,
        }
    }
}
