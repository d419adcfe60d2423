//! Memory-type registers: the x86_64 PAT and the AArch64 MAIR.
//!
//! Both hold eight one-byte slots. A page selects a slot by index through its
//! entry bits; the slot holds the actual caching policy. On x86_64 only the low
//! three bits of a slot are meaningful.
//!
//! T-Head C9xx cores carry the memory type in the entry itself. Their table has
//! no slots and hands identifiers back unchanged.

use crate::{Architecture, Error, RiscvVariant};

/// Reads and writes the raw memory-type register.
pub trait MemoryTypeRegister: Send + Sync {
    fn read(&self) -> u64;

    fn write(&self, value: u64);
}

/// Number of slots in the register.
const SLOTS: u8 = 8;

/// A decoded snapshot of a memory-type register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryTypeTable {
    arch: Architecture,
    value: u64,
}

impl MemoryTypeTable {
    pub fn new(arch: Architecture, value: u64) -> Result<Self, Error> {
        match arch {
            Architecture::X86_64
            | Architecture::Aarch64
            | Architecture::Riscv64(RiscvVariant::THeadC9xx) => Ok(Self { arch, value }),
            Architecture::Riscv64(RiscvVariant::Standard) => {
                log::warn!("RISC-V has no memory-type register");
                Err(Error::UnsupportedPlatform("memory-type register"))
            }
        }
    }

    pub const fn value(&self) -> u64 {
        self.value
    }

    fn passes_through(&self) -> bool {
        matches!(self.arch, Architecture::Riscv64(_))
    }

    fn slot_mask(&self) -> u64 {
        match self.arch {
            Architecture::X86_64 => 0x7,
            _ => 0xff,
        }
    }

    /// Memory type held in slot `index`.
    pub fn get(&self, index: u8) -> u8 {
        if self.passes_through() {
            return index;
        }
        let index = index % SLOTS;
        ((self.value >> (index as u32 * 8)) & self.slot_mask()) as u8
    }

    /// Stores memory type `mt` in slot `index`.
    pub fn set(&mut self, index: u8, mt: u8) {
        if self.passes_through() {
            return;
        }
        let shift = (index % SLOTS) as u32 * 8;
        let mask = self.slot_mask();
        self.value = (self.value & !(mask << shift)) | ((mt as u64 & mask) << shift);
    }

    /// Bitmask of every slot holding `mt`.
    ///
    /// On AArch64 a slot also matches when its inner and outer attribute nibbles
    /// are both equal to `mt`.
    pub fn find(&self, mt: u8) -> u8 {
        if self.passes_through() {
            return mt;
        }
        let mut found = 0;
        for index in 0..SLOTS {
            let slot = self.get(index);
            let matches = match self.arch {
                Architecture::Aarch64 => {
                    slot == mt || (slot & 0xf == slot >> 4 && slot & 0xf == mt)
                }
                _ => slot == mt,
            };
            if matches {
                found |= 1 << index;
            }
        }
        found
    }

    /// Lowest slot holding `mt`.
    pub fn find_first(&self, mt: u8) -> Option<u8> {
        if self.passes_through() {
            return Some(mt);
        }
        match self.find(mt) {
            0 => None,
            found => Some(found.trailing_zeros() as u8),
        }
    }
}

/// The memory-type register of the running processor.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
#[derive(Debug)]
pub struct NativeMemoryTypes(());

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
impl NativeMemoryTypes {
    /// # Safety
    ///
    /// The register is privileged; every use must happen at kernel privilege.
    pub const unsafe fn new() -> Self {
        Self(())
    }
}

#[cfg(target_arch = "x86_64")]
impl MemoryTypeRegister for NativeMemoryTypes {
    fn read(&self) -> u64 {
        // SAFETY: privilege guaranteed at construction.
        unsafe { crate::x86_64::hw::read_pat() }
    }

    fn write(&self, value: u64) {
        // SAFETY: privilege guaranteed at construction.
        unsafe { crate::x86_64::hw::write_pat(value) }
    }
}

#[cfg(target_arch = "aarch64")]
impl MemoryTypeRegister for NativeMemoryTypes {
    fn read(&self) -> u64 {
        // SAFETY: privilege guaranteed at construction.
        unsafe { crate::aarch64::hw::read_mair() }
    }

    fn write(&self, value: u64) {
        // SAFETY: privilege guaranteed at construction.
        unsafe { crate::aarch64::hw::write_mair(value) }
    }
}
