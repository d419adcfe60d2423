//! Translation-table descriptor for AArch64 (VMSAv8-64, stage 1).

use crate::arch::{DecodedEntry, EntryKind, FRAME_SHIFT, Permissions};
use crate::PhysicalAddress;

/// A single stage-1 descriptor.
///
/// The two low bits select the descriptor type. Above the last level `0b11` is a
/// table pointer and `0b01` a block (huge) leaf; at the last level only `0b11` is a
/// valid page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageEntry(u64);

impl PageEntry {
    /// Output address, bits 12-47.
    pub const ADDRESS_MASK: u64 = 0x0000_FFFF_FFFF_F000;

    const VALID: u64 = 1 << 0;
    const TABLE: u64 = 1 << 1;
    const TYPE_MASK: u64 = Self::VALID | Self::TABLE;

    const ATTR_INDEX_SHIFT: u32 = 2;
    const ATTR_INDEX_MASK: u64 = 0b111 << Self::ATTR_INDEX_SHIFT;

    const AP_USER: u64 = 1 << 6;
    const AP_READ_ONLY: u64 = 1 << 7;
    const ACCESS_FLAG: u64 = 1 << 10;
    pub const NOT_GLOBAL: u64 = 1 << 11;
    pub const PRIVILEGED_EXECUTE_NEVER: u64 = 1 << 53;
    const EXECUTE_NEVER: u64 = 1 << 54;
    /// Software dirty bit as kept by Linux.
    const DIRTY: u64 = 1 << 55;

    pub fn is_present(self, kind: EntryKind) -> bool {
        match kind {
            EntryKind::Directory => self.0 & Self::VALID != 0,
            EntryKind::Page => self.0 & Self::TYPE_MASK == Self::TYPE_MASK,
        }
    }

    /// Returns whether this is a block descriptor, assuming it sits above the last level.
    pub fn is_block(self) -> bool {
        self.0 & Self::TYPE_MASK == Self::VALID
    }

    pub fn pfn(self) -> u64 {
        (self.0 & Self::ADDRESS_MASK) >> FRAME_SHIFT
    }

    pub fn with_pfn(self, pfn: u64) -> Self {
        Self((self.0 & !Self::ADDRESS_MASK) | ((pfn << FRAME_SHIFT) & Self::ADDRESS_MASK))
    }

    pub fn table_address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 & Self::ADDRESS_MASK)
    }

    /// MAIR index selected by AttrIndx.
    pub fn memory_type(self) -> u8 {
        ((self.0 & Self::ATTR_INDEX_MASK) >> Self::ATTR_INDEX_SHIFT) as u8
    }

    pub fn with_memory_type(self, mt: u8) -> Self {
        let index = ((mt as u64) << Self::ATTR_INDEX_SHIFT) & Self::ATTR_INDEX_MASK;
        Self((self.0 & !Self::ATTR_INDEX_MASK) | index)
    }

    pub fn decode(self, kind: EntryKind) -> DecodedEntry {
        if !self.is_present(kind) {
            return DecodedEntry::NOT_PRESENT;
        }

        let leaf = match kind {
            EntryKind::Directory => self.is_block(),
            EntryKind::Page => true,
        };

        let mut permissions = Permissions::READ;
        permissions.set(Permissions::WRITE, self.0 & Self::AP_READ_ONLY == 0);
        permissions.set(Permissions::USER, self.0 & Self::AP_USER != 0);
        permissions.set(Permissions::EXECUTE, self.0 & Self::EXECUTE_NEVER == 0);

        DecodedEntry {
            present: true,
            leaf,
            pfn: self.pfn(),
            memory_type: leaf.then(|| self.memory_type()),
            permissions,
            accessed: self.0 & Self::ACCESS_FLAG != 0,
            dirty: leaf && self.0 & Self::DIRTY != 0,
        }
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for PageEntry {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
