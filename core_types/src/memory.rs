//! # Memory Types
//!
//! Address and page permission types used by the mapping syscall.
//!
//! ## Philosophy
//!
//! - **Memory is authority, not a side effect**
//! - **Physical and virtual addresses never mix**: they are distinct newtypes
//! - **W^X at the device boundary**: device pages are never executable
//!
//! ## Key Types
//!
//! - [`PhysAddr`]: A physical address (device register windows live here)
//! - [`VirtAddr`]: A virtual address in some task's address space
//! - [`PageFlags`]: Page permission bits (`USER`, `READ`, `WRITE`, `EXECUTE`)

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

/// Page granule used for all device mappings.
pub const PAGE_SIZE: u64 = 0x1000;

/// Returns true if `value` is a multiple of [`PAGE_SIZE`].
pub const fn is_page_aligned(value: u64) -> bool {
    value & (PAGE_SIZE - 1) == 0
}

/// A physical address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhysAddr(u64);

impl PhysAddr {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn is_page_aligned(&self) -> bool {
        is_page_aligned(self.0)
    }

    /// Adds `offset`, returning `None` on overflow
    pub fn checked_add(&self, offset: u64) -> Option<PhysAddr> {
        self.0.checked_add(offset).map(PhysAddr)
    }
}

impl Add<u64> for PhysAddr {
    type Output = PhysAddr;

    fn add(self, offset: u64) -> Self::Output {
        PhysAddr(self.0 + offset)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pa:{:#x}", self.0)
    }
}

/// A virtual address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VirtAddr(u64);

impl VirtAddr {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn is_page_aligned(&self) -> bool {
        is_page_aligned(self.0)
    }

    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl Add<u64> for VirtAddr {
    type Output = VirtAddr;

    fn add(self, offset: u64) -> Self::Output {
        VirtAddr(self.0 + offset)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "va:{:#x}", self.0)
    }
}

bitflags! {
    /// Page permission flags
    ///
    /// These are the flags a page table entry carries. A mapping created by
    /// the MMIO mapping syscall always carries exactly [`PageFlags::DEVICE`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PageFlags: u8 {
        const USER = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
        const EXECUTE = 1 << 3;

        /// Permissions of every device MMIO page: `USER | READ | WRITE`
        const DEVICE = Self::USER.bits() | Self::READ.bits() | Self::WRITE.bits();
    }
}

impl PageFlags {
    /// Returns true if the page would be both writable and executable
    pub fn violates_wx(&self) -> bool {
        self.contains(PageFlags::WRITE | PageFlags::EXECUTE)
    }
}

impl fmt::Display for PageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            if self.contains(PageFlags::USER) { "U" } else { "-" },
            if self.contains(PageFlags::READ) { "R" } else { "-" },
            if self.contains(PageFlags::WRITE) { "W" } else { "-" },
            if self.contains(PageFlags::EXECUTE) { "X" } else { "-" }
        )
    }
}
