//! Page table entry flags for x86_64 architecture.

use ::x86_64::structures::paging::PageTableFlags;

/// Page table entry flags for x86_64.
///
/// This wraps the x86_64 crate's page table entry flags. The PAT bits are not
/// modelled there, so they are exposed as raw constants alongside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlags(PageTableFlags);

impl From<u64> for PageFlags {
    fn from(value: u64) -> Self {
        Self(PageTableFlags::from_bits_truncate(value))
    }
}

impl PageFlags {
    /// PAT selector of a 4 KiB page; shares its position with the huge-page bit.
    pub const PAT: u64 = 1 << 7;

    /// PAT selector of a 2 MiB or 1 GiB page.
    pub const PAT_LARGE: u64 = 1 << 12;

    /// Creates empty page flags (page not present).
    pub const fn empty() -> Self {
        Self(PageTableFlags::empty())
    }

    /// Returns the raw value of these flags.
    pub const fn as_u64(self) -> u64 {
        self.0.bits()
    }

    pub fn is_present(self) -> bool {
        self.0.contains(PageTableFlags::PRESENT)
    }

    /// Returns whether the page-size bit is set. Only meaningful above the last level.
    pub fn is_huge(self) -> bool {
        self.0.contains(PageTableFlags::HUGE_PAGE)
    }

    pub fn is_writable(self) -> bool {
        self.0.contains(PageTableFlags::WRITABLE)
    }

    pub fn is_user(self) -> bool {
        self.0.contains(PageTableFlags::USER_ACCESSIBLE)
    }

    pub fn is_executable(self) -> bool {
        !self.0.contains(PageTableFlags::NO_EXECUTE)
    }

    pub fn is_accessed(self) -> bool {
        self.0.contains(PageTableFlags::ACCESSED)
    }

    pub fn is_dirty(self) -> bool {
        self.0.contains(PageTableFlags::DIRTY)
    }

    pub fn is_write_through(self) -> bool {
        self.0.contains(PageTableFlags::WRITE_THROUGH)
    }

    pub fn is_cache_disabled(self) -> bool {
        self.0.contains(PageTableFlags::NO_CACHE)
    }

    /// Raw mask of the PWT and PCD bits.
    pub(crate) const fn cache_bits() -> u64 {
        PageTableFlags::WRITE_THROUGH.bits() | PageTableFlags::NO_CACHE.bits()
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}
