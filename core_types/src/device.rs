//! Device classes and device register windows.

use crate::memory::{PhysAddr, PAGE_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Class of a fixed hardware device
///
/// Boot configuration and policy rules name devices by class, never by
/// address, so the same rule set applies to any machine layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Net,
    Blk,
    Rng,
    Gpu,
    Input,
    Console,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Net => "net",
            DeviceClass::Blk => "blk",
            DeviceClass::Rng => "rng",
            DeviceClass::Gpu => "gpu",
            DeviceClass::Input => "input",
            DeviceClass::Console => "console",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device register window: the half-open physical range `[base, base + len)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceWindow {
    pub class: DeviceClass,
    pub base: PhysAddr,
    pub len: u64,
}

impl DeviceWindow {
    pub fn new(class: DeviceClass, base: u64, len: u64) -> Self {
        Self {
            class,
            base: PhysAddr::new(base),
            len,
        }
    }

    /// Exclusive end of the window, `None` if it would overflow
    pub fn end(&self) -> Option<PhysAddr> {
        self.base.checked_add(self.len)
    }

    /// Returns true if both `base` and `len` are page multiples and `len > 0`
    pub fn is_well_formed(&self) -> bool {
        self.len > 0 && self.base.is_page_aligned() && self.len % PAGE_SIZE == 0
    }

    /// Returns true if the two half-open ranges share at least one byte
    pub fn overlaps(&self, other: &DeviceWindow) -> bool {
        let a_start = self.base.as_u64() as u128;
        let a_end = a_start + self.len as u128;
        let b_start = other.base.as_u64() as u128;
        let b_end = b_start + other.len as u128;
        a_start < b_end && b_start < a_end
    }

    /// Returns true if the window covers exactly `(base, len)`
    pub fn matches(&self, base: PhysAddr, len: u64) -> bool {
        self.base == base && self.len == len
    }

    /// Number of pages in the window
    pub fn page_count(&self) -> u64 {
        self.len / PAGE_SIZE
    }
}

impl fmt::Display for DeviceWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}+{:#x}", self.class, self.base, self.len)
    }
}
