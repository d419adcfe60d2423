//! Page table entry for x86_64 architecture.

use crate::arch::{DecodedEntry, EntryKind, FRAME_SHIFT, Permissions};
use crate::PhysicalAddress;

use super::flags::PageFlags;

/// A single page table entry for x86_64.
///
/// The same layout is used at every level. Above the last level the page-size bit
/// turns the entry into a huge-page leaf, and the PAT selector moves from bit 7 to
/// bit 12, which then is no longer part of the frame number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageEntry(u64);

impl PageEntry {
    /// Physical address mask for x86_64 page table entries.
    /// Bits 12-51 contain the physical address (assuming 52-bit physical addresses).
    pub const ADDRESS_MASK: u64 = 0x000F_FFFF_FFFF_F000;

    /// Address bits of a huge-page leaf, which excludes the PAT selector.
    const HUGE_ADDRESS_MASK: u64 = Self::ADDRESS_MASK & !PageFlags::PAT_LARGE;

    const PWT: u64 = 1 << 3;
    const PCD: u64 = 1 << 4;

    pub fn flags(self) -> PageFlags {
        PageFlags::from(self.0)
    }

    pub fn is_present(self) -> bool {
        self.flags().is_present()
    }

    /// Returns whether this entry is a huge-page leaf, assuming it sits above the last level.
    pub fn is_huge(self) -> bool {
        self.is_present() && self.flags().is_huge()
    }

    fn address_mask(self, kind: EntryKind) -> u64 {
        match kind {
            EntryKind::Directory if self.flags().is_huge() => Self::HUGE_ADDRESS_MASK,
            _ => Self::ADDRESS_MASK,
        }
    }

    pub fn pfn(self, kind: EntryKind) -> u64 {
        (self.0 & self.address_mask(kind)) >> FRAME_SHIFT
    }

    /// Returns a copy with the frame number replaced.
    pub fn with_pfn(self, pfn: u64, kind: EntryKind) -> Self {
        let mask = self.address_mask(kind);
        Self((self.0 & !mask) | ((pfn << FRAME_SHIFT) & mask))
    }

    pub fn table_address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 & Self::ADDRESS_MASK)
    }

    fn pat_bit(huge: bool) -> u64 {
        if huge {
            PageFlags::PAT_LARGE
        } else {
            PageFlags::PAT
        }
    }

    /// PAT index selected by the PWT, PCD and PAT bits.
    pub fn memory_type(self, huge: bool) -> u8 {
        let mut mt = 0;
        if self.0 & Self::PWT != 0 {
            mt |= 1;
        }
        if self.0 & Self::PCD != 0 {
            mt |= 2;
        }
        if self.0 & Self::pat_bit(huge) != 0 {
            mt |= 4;
        }
        mt
    }

    /// Returns a copy selecting PAT index `mt` (0 to 7).
    pub fn with_memory_type(self, mt: u8, huge: bool) -> Self {
        let pat = Self::pat_bit(huge);
        let mut raw = self.0 & !(PageFlags::cache_bits() | pat);
        if mt & 1 != 0 {
            raw |= Self::PWT;
        }
        if mt & 2 != 0 {
            raw |= Self::PCD;
        }
        if mt & 4 != 0 {
            raw |= pat;
        }
        Self(raw)
    }

    pub fn decode(self, kind: EntryKind) -> DecodedEntry {
        if !self.is_present() {
            return DecodedEntry::NOT_PRESENT;
        }

        let flags = self.flags();
        let leaf = match kind {
            EntryKind::Directory => flags.is_huge(),
            EntryKind::Page => true,
        };

        let mut permissions = Permissions::READ;
        permissions.set(Permissions::WRITE, flags.is_writable());
        permissions.set(Permissions::USER, flags.is_user());
        permissions.set(Permissions::EXECUTE, flags.is_executable());

        DecodedEntry {
            present: true,
            leaf,
            pfn: self.pfn(kind),
            memory_type: leaf.then(|| self.memory_type(matches!(kind, EntryKind::Directory))),
            permissions,
            accessed: flags.is_accessed(),
            dirty: leaf && flags.is_dirty(),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_present_decodes_empty() {
        let decoded = PageEntry::from(0xdead_b000).decode(EntryKind::Page);
        assert!(!decoded.present);
        assert!(!decoded.leaf);
    }

    #[test]
    fn directory_pointer() {
        let decoded = PageEntry::from(0x0000_0000_0123_4067).decode(EntryKind::Directory);
        assert!(decoded.present);
        assert!(!decoded.leaf);
        assert_eq!(decoded.pfn, 0x1234);
        assert_eq!(decoded.memory_type, None);
    }

    #[test]
    fn huge_leaf_ignores_pat_large_in_pfn() {
        // 2 MiB page at 0x4020_0000 with PAT_LARGE set.
        let raw = 0x4020_0000 | PageFlags::PAT_LARGE | 0x80 | 0x1;
        let entry = PageEntry::from(raw);
        assert!(entry.is_huge());
        assert_eq!(entry.pfn(EntryKind::Directory), 0x40200);
        assert_eq!(entry.pfn(EntryKind::Page), 0x40201);
        assert_eq!(entry.memory_type(true), 4);
    }

    #[test]
    fn with_pfn_keeps_pat_large_on_huge_leaf() {
        let raw = PageFlags::PAT_LARGE | 0x81;
        let entry = PageEntry::from(raw).with_pfn(0x400, EntryKind::Directory);
        assert_eq!(entry.as_u64(), 0x40_0000 | PageFlags::PAT_LARGE | 0x81);
    }

    #[test]
    fn permissions() {
        let decoded = PageEntry::from(0x8000_0000_0000_1007).decode(EntryKind::Page);
        assert_eq!(
            decoded.permissions,
            Permissions::READ | Permissions::WRITE | Permissions::USER
        );

        let decoded = PageEntry::from(0x1001).decode(EntryKind::Page);
        assert_eq!(decoded.permissions, Permissions::READ | Permissions::EXECUTE);
    }

    #[test]
    fn page_memory_type_uses_bit_seven() {
        let entry = PageEntry::from(0x1001).with_memory_type(7, false);
        assert_eq!(entry.as_u64(), 0x1001 | 0x80 | 0x10 | 0x08);
        assert_eq!(entry.memory_type(false), 7);
        assert_eq!(entry.with_memory_type(0, false).as_u64(), 0x1001);
    }

    #[test]
    fn accessed_and_dirty() {
        let decoded = PageEntry::from(0x1061).decode(EntryKind::Page);
        assert!(decoded.accessed);
        assert!(decoded.dirty);
    }
}
