//! Address space management for SimulatedKernel
//!
//! Each task owns one address space: a page-granular map from virtual to
//! physical addresses. There is no MMU; the map is what a page table would
//! contain, kept inspectable for tests.

use core_types::{PageFlags, PhysAddr, VirtAddr, PAGE_SIZE};
use kernel_api::KernelError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// First virtual address handed out when the caller lets the kernel choose.
pub const MMIO_VA_BASE: u64 = 0x4000_0000;

/// One page table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub va: VirtAddr,
    pub pa: PhysAddr,
    pub flags: PageFlags,
}

/// Page mappings of a single task
#[derive(Debug, Clone)]
pub struct AddressSpace {
    pages: BTreeMap<VirtAddr, Mapping>,
    next_va: u64,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
            next_va: MMIO_VA_BASE,
        }
    }

    /// Maps one page at `va_hint` (or a kernel-chosen address if null)
    ///
    /// Executable flags are refused outright; device pages never execute.
    pub fn map_page(
        &mut self,
        va_hint: VirtAddr,
        pa: PhysAddr,
        flags: PageFlags,
    ) -> Result<VirtAddr, KernelError> {
        if flags.contains(PageFlags::EXECUTE) {
            return Err(KernelError::ExecuteDenied);
        }
        if !pa.is_page_aligned() {
            return Err(KernelError::InvalidArgument(format!("{pa} is not page-aligned")));
        }
        let va = if va_hint.is_null() {
            self.next_free_va()?
        } else {
            if !va_hint.is_page_aligned() {
                return Err(KernelError::InvalidArgument(format!(
                    "{va_hint} is not page-aligned"
                )));
            }
            if self.pages.contains_key(&va_hint) {
                return Err(KernelError::InvalidArgument(format!(
                    "{va_hint} is already mapped"
                )));
            }
            va_hint
        };
        self.pages.insert(va, Mapping { va, pa, flags });
        Ok(va)
    }

    fn next_free_va(&mut self) -> Result<VirtAddr, KernelError> {
        loop {
            let candidate = VirtAddr::new(self.next_va);
            self.next_va = self.next_va.checked_add(PAGE_SIZE).ok_or_else(|| {
                KernelError::InvalidArgument("virtual address space exhausted".to_string())
            })?;
            if !self.pages.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
    }

    /// Returns the mapping of the page containing `va`
    pub fn translate(&self, va: VirtAddr) -> Option<&Mapping> {
        let page = VirtAddr::new(va.as_u64() & !(PAGE_SIZE - 1));
        self.pages.get(&page)
    }

    /// All mappings in ascending virtual address order
    pub fn mappings(&self) -> impl Iterator<Item = &Mapping> {
        self.pages.values()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Drops every mapping, returning how many there were
    pub fn unmap_all(&mut self) -> usize {
        let count = self.pages.len();
        self.pages.clear();
        count
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}
