//! Per-task capability table
//!
//! A bounded array of slots. Handles are slot indices and only mean
//! something within the owning task's table.

use core_types::{CapHandle, Capability, CapabilityKind, Rights};
use kernel_api::KernelError;

/// Slots per task unless the kernel is configured otherwise.
pub const DEFAULT_CAP_SLOTS: usize = 64;

/// Capability table owned by exactly one task
#[derive(Debug, Clone)]
pub struct CapTable {
    slots: Vec<Option<Capability>>,
}

impl CapTable {
    /// Creates an empty table with [`DEFAULT_CAP_SLOTS`] slots
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAP_SLOTS)
    }

    /// Creates an empty table sized for `slots` entries
    pub fn with_capacity(slots: usize) -> Self {
        Self {
            slots: vec![None; slots],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Places `cap` in the first free slot
    pub fn insert(&mut self, cap: Capability) -> Result<CapHandle, KernelError> {
        let capacity = self.slots.len();
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_none())
            .ok_or(KernelError::ResourceExhausted { capacity })?;
        *slot = Some(cap);
        Ok(CapHandle::new(index as u32))
    }

    /// Places `cap` back into a specific empty slot (used to undo a failed move)
    pub(crate) fn restore(&mut self, handle: CapHandle, cap: Capability) -> Result<(), KernelError> {
        let slot = self
            .slots
            .get_mut(handle.index())
            .filter(|slot| slot.is_none())
            .ok_or_else(|| KernelError::InvalidArgument(format!("slot {handle} is not free")))?;
        *slot = Some(cap);
        Ok(())
    }

    /// Resolves a handle; stale or out-of-range handles yield `None`
    pub fn lookup(&self, handle: CapHandle) -> Option<&Capability> {
        self.slots.get(handle.index()).and_then(Option::as_ref)
    }

    /// Removes the entry, returning what was there
    pub fn revoke(&mut self, handle: CapHandle) -> Option<Capability> {
        self.slots.get_mut(handle.index()).and_then(Option::take)
    }

    /// Inserts a copy of `handle` restricted to `rights`
    ///
    /// Rights can only shrink; asking for a right the parent lacks fails
    /// with `InsufficientRights`. A device window copy never carries `MAP`:
    /// only the issuer creates mappable device capabilities.
    pub fn derive(&mut self, handle: CapHandle, rights: Rights) -> Result<CapHandle, KernelError> {
        let parent = *self
            .lookup(handle)
            .ok_or(KernelError::NoCapability(handle))?;
        if !parent.rights.contains(rights) {
            return Err(KernelError::InsufficientRights {
                handle,
                held: parent.rights,
                required: rights,
            });
        }
        if matches!(parent.kind, CapabilityKind::DeviceMmio { .. }) && rights.contains(Rights::MAP)
        {
            return Err(KernelError::InvalidArgument(format!(
                "{handle} is a device window; derived copies cannot keep MAP"
            )));
        }
        self.insert(Capability { rights, ..parent })
    }

    /// Iterates occupied slots in handle order
    pub fn iter(&self) -> impl Iterator<Item = (CapHandle, &Capability)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|cap| (CapHandle::new(i as u32), cap)))
    }

    /// Empties the table, returning the number of destroyed entries
    pub fn clear(&mut self) -> usize {
        let count = self.len();
        self.slots.iter_mut().for_each(|slot| *slot = None);
        count
    }
}

impl Default for CapTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{PhysAddr, TaskId};
    use kernel_api::ErrorKind;

    fn mmio(owner: TaskId) -> Capability {
        Capability::new(
            CapabilityKind::DeviceMmio {
                base: PhysAddr::new(0x1000_0000),
                len: 0x1000,
            },
            Rights::MAP,
            owner,
        )
    }

    #[test]
    fn test_insert_and_lookup() {
        let owner = TaskId::new();
        let mut table = CapTable::new();
        let handle = table.insert(mmio(owner)).unwrap();

        assert_eq!(handle, CapHandle::new(0));
        assert_eq!(table.lookup(handle), Some(&mmio(owner)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_lookup_of_absent_handles_is_none() {
        let mut table = CapTable::with_capacity(8);
        table.insert(mmio(TaskId::new())).unwrap();

        for slot in 1..64 {
            assert!(table.lookup(CapHandle::new(slot)).is_none());
        }
        assert!(table.lookup(CapHandle::new(u32::MAX)).is_none());
    }

    #[test]
    fn test_insert_exhaustion() {
        let owner = TaskId::new();
        let mut table = CapTable::with_capacity(2);
        table.insert(mmio(owner)).unwrap();
        table.insert(mmio(owner)).unwrap();

        let err = table.insert(mmio(owner)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(err, KernelError::ResourceExhausted { capacity: 2 });
    }

    #[test]
    fn test_revoke_frees_slot() {
        let owner = TaskId::new();
        let mut table = CapTable::with_capacity(1);
        let handle = table.insert(mmio(owner)).unwrap();

        assert_eq!(table.revoke(handle), Some(mmio(owner)));
        assert!(table.lookup(handle).is_none());
        assert_eq!(table.revoke(handle), None);

        // Slot is reusable
        assert_eq!(table.insert(mmio(owner)).unwrap(), handle);
    }

    #[test]
    fn test_derive_subset() {
        let owner = TaskId::new();
        let mut table = CapTable::new();
        let parent = table
            .insert(Capability::new(
                CapabilityKind::Endpoint(7),
                Rights::SEND | Rights::RECV,
                owner,
            ))
            .unwrap();

        let child = table.derive(parent, Rights::SEND).unwrap();
        let derived = table.lookup(child).unwrap();
        assert_eq!(derived.kind, CapabilityKind::Endpoint(7));
        assert_eq!(derived.rights, Rights::SEND);
    }

    #[test]
    fn test_derive_rejects_superset() {
        let owner = TaskId::new();
        let mut table = CapTable::new();
        let parent = table.insert(mmio(owner)).unwrap();

        let err = table.derive(parent, Rights::MAP | Rights::MANAGE).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientRights);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_device_copy_cannot_keep_map() {
        let owner = TaskId::new();
        let mut table = CapTable::new();
        let parent = table.insert(mmio(owner)).unwrap();

        let err = table.derive(parent, Rights::MAP).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(table.len(), 1);

        let inert = table.derive(parent, Rights::empty()).unwrap();
        assert!(!table.lookup(inert).unwrap().has_rights(Rights::MAP));
    }

    #[test]
    fn test_derive_from_missing_handle() {
        let mut table = CapTable::new();
        let err = table.derive(CapHandle::new(5), Rights::MAP).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoCapability);
    }

    #[test]
    fn test_restore_only_into_free_slot() {
        let owner = TaskId::new();
        let mut table = CapTable::with_capacity(2);
        let handle = table.insert(mmio(owner)).unwrap();

        assert!(table.restore(handle, mmio(owner)).is_err());
        let taken = table.revoke(handle).unwrap();
        table.restore(handle, taken).unwrap();
        assert!(table.lookup(handle).is_some());
    }

    #[test]
    fn test_clear_counts_entries() {
        let owner = TaskId::new();
        let mut table = CapTable::new();
        table.insert(mmio(owner)).unwrap();
        table.insert(mmio(owner)).unwrap();

        assert_eq!(table.clear(), 2);
        assert!(table.is_empty());
        assert_eq!(table.iter().count(), 0);
    }
}
