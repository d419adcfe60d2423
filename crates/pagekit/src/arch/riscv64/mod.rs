//! RISC-V Sv39/Sv48/Sv57 page-table entries.
//!
//! The standard layout has no memory-type bits. T-Head C9xx cores repurpose the top
//! bits of the entry as memory attributes; those are addressed by bit position.

mod entry;

#[cfg(target_arch = "riscv64")]
pub(crate) mod hw;

pub use entry::{PageEntry, PageFlags};

use crate::{FRAME_SHIFT, PhysicalAddress};

const SATP_MODE_SHIFT: u32 = 60;
const SATP_PPN_MASK: u64 = (1 << 44) - 1;

/// Physical address of the root table from either a satp value or a plain address.
///
/// A value with the MODE field set is taken as satp: ASID is dropped and the PPN
/// becomes an address. Anything else is already an address.
pub fn root_table(root: u64) -> PhysicalAddress {
    if root >> SATP_MODE_SHIFT != 0 {
        PhysicalAddress::new((root & SATP_PPN_MASK) << FRAME_SHIFT)
    } else {
        PhysicalAddress::new(root).align_down(1 << FRAME_SHIFT)
    }
}

/// T-Head memory-type identifiers.
///
/// An identifier is a bit position (low six bits), optionally combined with
/// [`SET`](mt::SET) to request that the bit be set rather than cleared.
pub mod mt {
    /// Strong order (device memory).
    pub const STRONG_ORDER: u8 = 63;
    /// Cacheable.
    pub const CACHEABLE: u8 = 62;
    /// Bufferable.
    pub const BUFFERABLE: u8 = 61;
    /// Shareable.
    pub const SHAREABLE: u8 = 60;

    /// Flag marking the selected bit as set.
    pub const SET: u8 = 0x80;
    /// Mask extracting the bit position.
    pub const MASK: u8 = 0x3f;
}
