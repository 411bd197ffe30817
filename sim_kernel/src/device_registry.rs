//! Device window registry
//!
//! The trusted enumeration of device register windows, populated once at boot
//! and immutable afterwards. The registry is an explicit value handed to the
//! kernel and the distribution authority; there is no global device list.

use core_types::{DeviceClass, DeviceWindow, PhysAddr};
use std::sync::Arc;
use thiserror::Error;

/// Reasons a window is refused at registration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Window {0} is empty, unaligned or wraps the address space")]
    Malformed(DeviceWindow),

    #[error("Window {new} overlaps registered window {existing}")]
    Overlap {
        new: DeviceWindow,
        existing: DeviceWindow,
    },
}

/// Collects windows during boot; [`seal`](Self::seal) freezes them
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    windows: Vec<DeviceWindow>,
}

impl RegistryBuilder {
    /// Adds a window, rejecting malformed and overlapping ones
    pub fn register(&mut self, window: DeviceWindow) -> Result<&mut Self, RegistryError> {
        if !window.is_well_formed() || window.end().is_none() {
            return Err(RegistryError::Malformed(window));
        }
        if let Some(existing) = self.windows.iter().find(|w| w.overlaps(&window)) {
            return Err(RegistryError::Overlap {
                new: window,
                existing: *existing,
            });
        }
        self.windows.push(window);
        Ok(self)
    }

    /// Freezes the registry
    pub fn seal(self) -> DeviceWindowRegistry {
        log::info!("device registry sealed with {} window(s)", self.windows.len());
        DeviceWindowRegistry {
            windows: self.windows.into(),
        }
    }
}

/// Immutable, cheaply clonable set of registered device windows
///
/// Iteration order is registration order.
#[derive(Debug, Clone)]
pub struct DeviceWindowRegistry {
    windows: Arc<[DeviceWindow]>,
}

impl DeviceWindowRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Builds and seals a registry from a fixed table
    pub fn from_windows(
        windows: impl IntoIterator<Item = DeviceWindow>,
    ) -> Result<Self, RegistryError> {
        let mut builder = Self::builder();
        for window in windows {
            builder.register(window)?;
        }
        Ok(builder.seal())
    }

    /// Fixed table for the QEMU `virt` machine: virtio-mmio slots for net, blk and rng
    pub fn qemu_virt() -> Result<Self, RegistryError> {
        const VIRTIO_MMIO_BASE: u64 = 0x1000_1000;
        const VIRTIO_MMIO_STRIDE: u64 = 0x1000;
        let windows = [DeviceClass::Net, DeviceClass::Blk, DeviceClass::Rng]
            .into_iter()
            .enumerate()
            .map(|(slot, class)| {
                DeviceWindow::new(
                    class,
                    VIRTIO_MMIO_BASE + slot as u64 * VIRTIO_MMIO_STRIDE,
                    VIRTIO_MMIO_STRIDE,
                )
            });
        Self::from_windows(windows)
    }

    /// Returns the window covering exactly `[base, base + len)`
    pub fn find_exact(&self, base: PhysAddr, len: u64) -> Option<&DeviceWindow> {
        self.windows.iter().find(|w| w.matches(base, len))
    }

    /// Windows of one class in registration order
    pub fn find_by_class(&self, class: DeviceClass) -> impl Iterator<Item = &DeviceWindow> {
        self.windows.iter().filter(move |w| w.class == class)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceWindow> {
        self.windows.iter()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
