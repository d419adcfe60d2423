//! AArch64 translation-table descriptors and MAIR memory types.

mod entry;

#[cfg(target_arch = "aarch64")]
pub(crate) mod hw;

pub use entry::PageEntry;

/// Memory attributes as encoded in one MAIR byte.
pub mod mt {
    /// Normal memory, inner and outer non-cacheable.
    pub const UC: u8 = 0x44;
    /// Normal memory, inner and outer write-through, read/write allocate.
    pub const WT: u8 = 0xbb;
    /// Normal memory, inner and outer write-back, read/write allocate.
    pub const WB: u8 = 0xff;
}
