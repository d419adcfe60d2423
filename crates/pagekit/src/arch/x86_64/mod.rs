//! x86_64 page-table entries and PAT memory types.

mod entry;
mod flags;

#[cfg(target_arch = "x86_64")]
pub(crate) mod hw;

pub use entry::PageEntry;
pub use flags::PageFlags;

/// Model-specific register holding the page attribute table.
pub const IA32_PAT: u32 = 0x277;

/// Memory types as encoded in one PAT byte.
pub mod mt {
    /// Uncacheable.
    pub const UC: u8 = 0;
    /// Write combining.
    pub const WC: u8 = 1;
    /// Write through.
    pub const WT: u8 = 4;
    /// Write protected.
    pub const WP: u8 = 5;
    /// Write back.
    pub const WB: u8 = 6;
    /// Uncached, overridable by MTRRs.
    pub const UC_MINUS: u8 = 7;
}
