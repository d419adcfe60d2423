//! Page table entry for RISC-V.

use bitflags::bitflags;

use crate::arch::{DecodedEntry, EntryKind, FRAME_SHIFT, Permissions, RiscvVariant};
use crate::PhysicalAddress;

use super::mt;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    /// Flags stored in the low byte of an Sv39/Sv48/Sv57 entry.
    pub struct PageFlags: u64 {
        const VALID = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
        const EXECUTE = 1 << 3;
        const USER = 1 << 4;
        const GLOBAL = 1 << 5;
        const ACCESSED = 1 << 6;
        const DIRTY = 1 << 7;
    }
}

/// A single RISC-V page table entry.
///
/// An entry with any of R, W or X set is a leaf at whatever level it appears;
/// otherwise a valid entry points at the next table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageEntry(u64);

impl PageEntry {
    const PPN_SHIFT: u32 = 10;
    const PPN_MASK: u64 = ((1 << 44) - 1) << Self::PPN_SHIFT;

    pub fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0)
    }

    pub fn is_present(self) -> bool {
        self.flags().contains(PageFlags::VALID)
    }

    pub fn is_leaf(self) -> bool {
        self.is_present()
            && self
                .flags()
                .intersects(PageFlags::READ | PageFlags::WRITE | PageFlags::EXECUTE)
    }

    pub fn pfn(self) -> u64 {
        (self.0 & Self::PPN_MASK) >> Self::PPN_SHIFT
    }

    pub fn with_pfn(self, pfn: u64) -> Self {
        Self((self.0 & !Self::PPN_MASK) | ((pfn << Self::PPN_SHIFT) & Self::PPN_MASK))
    }

    pub fn table_address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.pfn() << FRAME_SHIFT)
    }

    /// Sets or clears the attribute bit selected by `id`.
    pub fn with_thead_memory_type(self, id: u8) -> Self {
        let bit = 1u64 << (id & mt::MASK);
        if id & mt::SET != 0 {
            Self(self.0 | bit)
        } else {
            Self(self.0 & !bit)
        }
    }

    /// Reports the cacheable bit as a memory-type identifier.
    pub fn thead_memory_type(self) -> u8 {
        if self.0 & (1 << mt::CACHEABLE) != 0 {
            mt::CACHEABLE | mt::SET
        } else {
            mt::CACHEABLE
        }
    }

    pub fn decode(self, kind: EntryKind, variant: RiscvVariant) -> DecodedEntry {
        if !self.is_present() {
            return DecodedEntry::NOT_PRESENT;
        }

        let flags = self.flags();
        let leaf = match kind {
            EntryKind::Directory => self.is_leaf(),
            EntryKind::Page => true,
        };

        let mut permissions = Permissions::empty();
        permissions.set(Permissions::READ, flags.contains(PageFlags::READ));
        permissions.set(Permissions::WRITE, flags.contains(PageFlags::WRITE));
        permissions.set(Permissions::EXECUTE, flags.contains(PageFlags::EXECUTE));
        permissions.set(Permissions::USER, flags.contains(PageFlags::USER));

        let memory_type = match variant {
            RiscvVariant::THeadC9xx if leaf => Some(self.thead_memory_type()),
            _ => None,
        };

        DecodedEntry {
            present: true,
            leaf,
            pfn: self.pfn(),
            memory_type,
            permissions,
            accessed: flags.contains(PageFlags::ACCESSED),
            dirty: flags.contains(PageFlags::DIRTY),
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
