//! Architecture-specific entry codecs.
//!
//! Every supported architecture has its own module with a `PageEntry` newtype built
//! on explicit shift/mask constants. The codecs are plain data transformations and
//! compile on every host, so a memory image of one architecture can be inspected on
//! another. Register and instruction access lives in each module's `hw` submodule,
//! which only exists when compiling for that architecture.

use bitflags::bitflags;

use crate::{Error, PhysicalAddress};

pub mod aarch64;
pub mod riscv64;
pub mod x86_64;

/// Size in bytes of one raw entry on every supported architecture.
pub const ENTRY_SIZE: u64 = 8;

/// Entries store output addresses in 4 KiB frames regardless of the base page size.
pub const FRAME_SHIFT: u32 = 12;

/// Where in the hierarchy an entry sits, which changes how some bits are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Any level above the last: points at a table or maps a huge page.
    Directory,
    /// The last level: maps a base page.
    Page,
}

/// RISC-V flavours that differ in their memory-type encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiscvVariant {
    /// Ratified privileged spec without vendor memory-type bits.
    Standard,
    /// T-Head C9xx cores with SO/C/B/SH attribute bits in the top of the entry.
    THeadC9xx,
}

/// The architecture whose entry layout is being interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    X86_64,
    Aarch64,
    Riscv64(RiscvVariant),
}

bitflags! {
    /// Access rights granted by a leaf entry, normalized across architectures.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Permissions: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
        const USER = 1 << 3;
    }
}

/// Architecture-neutral view of one raw entry.
///
/// When `present` is false the remaining fields carry no meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedEntry {
    pub present: bool,
    /// The entry maps memory directly instead of pointing at another table.
    pub leaf: bool,
    pub pfn: u64,
    /// Memory-type identifier, or `None` where the architecture has no encoding.
    pub memory_type: Option<u8>,
    pub permissions: Permissions,
    pub accessed: bool,
    pub dirty: bool,
}

impl DecodedEntry {
    pub(crate) const NOT_PRESENT: Self = Self {
        present: false,
        leaf: false,
        pfn: 0,
        memory_type: None,
        permissions: Permissions::empty(),
        accessed: false,
        dirty: false,
    };

    /// Returns true if this entry ends the walk at a level above the last.
    pub const fn is_huge(&self, kind: EntryKind) -> bool {
        self.present && self.leaf && matches!(kind, EntryKind::Directory)
    }
}

/// A partial update to one raw entry.
///
/// Only the bits named in `set` or `clear`, and the PFN when given, change.
/// Everything else in the existing word is preserved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryPatch {
    set: u64,
    clear: u64,
    pfn: Option<u64>,
}

impl EntryPatch {
    /// A patch that changes nothing.
    pub const fn new() -> Self {
        Self {
            set: 0,
            clear: 0,
            pfn: None,
        }
    }

    /// A patch that replaces the whole word with `raw`.
    pub const fn replace(raw: u64) -> Self {
        Self {
            set: raw,
            clear: u64::MAX,
            pfn: None,
        }
    }

    pub const fn set_bit(mut self, bit: u32) -> Self {
        let mask = 1u64 << (bit & 63);
        self.set |= mask;
        self.clear &= !mask;
        self
    }

    pub const fn clear_bit(mut self, bit: u32) -> Self {
        let mask = 1u64 << (bit & 63);
        self.clear |= mask;
        self.set &= !mask;
        self
    }

    pub const fn with_pfn(mut self, pfn: u64) -> Self {
        self.pfn = Some(pfn);
        self
    }

    pub const fn is_empty(&self) -> bool {
        self.set == 0 && self.clear == 0 && self.pfn.is_none()
    }
}

impl Architecture {
    /// Decodes `raw` as an entry of the given kind.
    pub fn decode(self, raw: u64, kind: EntryKind) -> DecodedEntry {
        match self {
            Self::X86_64 => x86_64::PageEntry::from(raw).decode(kind),
            Self::Aarch64 => aarch64::PageEntry::from(raw).decode(kind),
            Self::Riscv64(variant) => riscv64::PageEntry::from(raw).decode(kind, variant),
        }
    }

    /// Overlays `patch` onto `existing`.
    pub fn encode(self, existing: u64, patch: &EntryPatch, kind: EntryKind) -> u64 {
        let raw = (existing & !patch.clear) | patch.set;
        match patch.pfn {
            Some(pfn) => self.set_pfn_at(raw, pfn, kind),
            None => raw,
        }
    }

    /// Returns true if `raw` is present as an entry of the given kind.
    pub fn is_present(self, raw: u64, kind: EntryKind) -> bool {
        match self {
            Self::X86_64 => x86_64::PageEntry::from(raw).is_present(),
            Self::Aarch64 => aarch64::PageEntry::from(raw).is_present(kind),
            Self::Riscv64(_) => riscv64::PageEntry::from(raw).is_present(),
        }
    }

    /// Returns true if `raw` maps memory directly at a level above the last.
    pub fn is_huge(self, raw: u64) -> bool {
        match self {
            Self::X86_64 => x86_64::PageEntry::from(raw).is_huge(),
            Self::Aarch64 => aarch64::PageEntry::from(raw).is_block(),
            Self::Riscv64(_) => riscv64::PageEntry::from(raw).is_leaf(),
        }
    }

    /// PFN of a last-level entry.
    pub fn pfn(self, raw: u64) -> u64 {
        self.pfn_at(raw, EntryKind::Page)
    }

    /// Replaces the PFN of a last-level entry.
    pub fn set_pfn(self, raw: u64, pfn: u64) -> u64 {
        self.set_pfn_at(raw, pfn, EntryKind::Page)
    }

    pub(crate) fn pfn_at(self, raw: u64, kind: EntryKind) -> u64 {
        match self {
            Self::X86_64 => x86_64::PageEntry::from(raw).pfn(kind),
            Self::Aarch64 => aarch64::PageEntry::from(raw).pfn(),
            Self::Riscv64(_) => riscv64::PageEntry::from(raw).pfn(),
        }
    }

    pub(crate) fn set_pfn_at(self, raw: u64, pfn: u64, kind: EntryKind) -> u64 {
        match self {
            Self::X86_64 => x86_64::PageEntry::from(raw).with_pfn(pfn, kind).as_u64(),
            Self::Aarch64 => aarch64::PageEntry::from(raw).with_pfn(pfn).as_u64(),
            Self::Riscv64(_) => riscv64::PageEntry::from(raw).with_pfn(pfn).as_u64(),
        }
    }

    /// Physical address of the next-level table a directory entry points at.
    pub fn table_address(self, raw: u64) -> PhysicalAddress {
        match self {
            Self::X86_64 => x86_64::PageEntry::from(raw).table_address(),
            Self::Aarch64 => aarch64::PageEntry::from(raw).table_address(),
            Self::Riscv64(_) => riscv64::PageEntry::from(raw).table_address(),
        }
    }

    /// Physical address of the root table given the paging root as the OS stores it.
    ///
    /// Strips the control bits that share the root register on x86_64 (PCID, PWT,
    /// PCD) and AArch64 (ASID, CnP). On RISC-V a satp value is decoded.
    pub fn root_table(self, root: PhysicalAddress) -> PhysicalAddress {
        match self {
            Self::X86_64 => PhysicalAddress::new(root.as_u64() & x86_64::PageEntry::ADDRESS_MASK),
            Self::Aarch64 => {
                PhysicalAddress::new(root.as_u64() & aarch64::PageEntry::ADDRESS_MASK)
            }
            Self::Riscv64(_) => riscv64::root_table(root.as_u64()),
        }
    }

    /// Applies memory type `mt` to `raw`.
    ///
    /// `huge` selects the huge-page layout where the architecture distinguishes it.
    pub fn apply_memory_type(self, raw: u64, mt: u8, huge: bool) -> Result<u64, Error> {
        match self {
            Self::X86_64 => Ok(x86_64::PageEntry::from(raw)
                .with_memory_type(mt, huge)
                .as_u64()),
            Self::Aarch64 => Ok(aarch64::PageEntry::from(raw).with_memory_type(mt).as_u64()),
            Self::Riscv64(RiscvVariant::THeadC9xx) => {
                Ok(riscv64::PageEntry::from(raw).with_thead_memory_type(mt).as_u64())
            }
            Self::Riscv64(RiscvVariant::Standard) => {
                log::warn!("memory types are not available on standard RISC-V");
                Err(Error::UnsupportedPlatform("apply_memory_type"))
            }
        }
    }

    /// Extracts the memory-type identifier from `raw`.
    pub fn extract_memory_type(self, raw: u64, huge: bool) -> Result<u8, Error> {
        match self {
            Self::X86_64 => Ok(x86_64::PageEntry::from(raw).memory_type(huge)),
            Self::Aarch64 => Ok(aarch64::PageEntry::from(raw).memory_type()),
            Self::Riscv64(RiscvVariant::THeadC9xx) => {
                Ok(riscv64::PageEntry::from(raw).thead_memory_type())
            }
            Self::Riscv64(RiscvVariant::Standard) => {
                log::warn!("memory types are not available on standard RISC-V");
                Err(Error::UnsupportedPlatform("extract_memory_type"))
            }
        }
    }

    /// The architecture this crate is compiled for, if it is one of the supported ones.
    pub const fn native() -> Option<Self> {
        if cfg!(target_arch = "x86_64") {
            Some(Self::X86_64)
        } else if cfg!(target_arch = "aarch64") {
            Some(Self::Aarch64)
        } else if cfg!(target_arch = "riscv64") {
            Some(Self::Riscv64(RiscvVariant::Standard))
        } else {
            None
        }
    }

    /// Executes the architecture's full serializing barrier.
    ///
    /// Falls back to a sequentially consistent fence when the engine inspects an
    /// architecture other than the one it runs on.
    pub(crate) fn serialize(self) {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::X86_64 => x86_64::hw::serialize(),
            #[cfg(target_arch = "aarch64")]
            Self::Aarch64 => aarch64::hw::serialize(),
            #[cfg(target_arch = "riscv64")]
            Self::Riscv64(_) => riscv64::hw::serialize(),
            #[allow(unreachable_patterns)]
            _ => core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst),
        }
    }

    /// Closing counterpart of [`serialize`](Self::serialize).
    ///
    /// Only AArch64 differs: it runs its barriers in reverse order.
    pub(crate) fn serialize_trailing(self) {
        match self {
            #[cfg(target_arch = "aarch64")]
            Self::Aarch64 => aarch64::hw::serialize_trailing(),
            _ => self.serialize(),
        }
    }
}
