//! Paging geometry: which levels exist and how many index bits each consumes.
//!
//! A geometry is chosen once, either by name or by decoding the architecture's
//! paging control register, and is immutable afterwards. Every page-size and index
//! computation in the engine is derived from it.

use crate::{Error, LEVEL_COUNT, Level, VirtualAddress};

/// Layout of one level slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelGeometry {
    /// Whether the hierarchy has a table at this level.
    pub present: bool,
    /// Number of virtual-address bits indexing the table at this level.
    pub index_bits: u8,
}

impl LevelGeometry {
    const ABSENT: Self = Self {
        present: false,
        index_bits: 0,
    };

    const fn bits(index_bits: u8) -> Self {
        Self {
            present: true,
            index_bits,
        }
    }
}

/// The full level layout of one paging configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingGeometry {
    levels: [LevelGeometry; LEVEL_COUNT],
    page_offset_bits: u8,
}

/// x86_64 CR4 bit enabling 5-level paging.
const CR4_LA57: u64 = ::x86_64::registers::control::Cr4Flags::L5_PAGING.bits();

/// x86_64 CR4 bit enabling physical address extension, mandatory in long mode.
const CR4_PAE: u64 = ::x86_64::registers::control::Cr4Flags::PHYSICAL_ADDRESS_EXTENSION.bits();

const TCR_T0SZ_MASK: u64 = 0x3f;
const TCR_TG0_SHIFT: u64 = 14;
const TCR_TG0_MASK: u64 = 0b11;

const SATP_MODE_SHIFT: u64 = 60;
const SATP_MODE_SV39: u64 = 8;
const SATP_MODE_SV48: u64 = 9;
const SATP_MODE_SV57: u64 = 10;

impl PagingGeometry {
    /// Builds a geometry from the index widths of the levels that exist, root first.
    ///
    /// Level slots are assigned by depth: two levels are PGD and PTE, three add the
    /// PMD, four add the PUD and five use every slot.
    pub fn from_widths(page_offset_bits: u8, widths: &[u8]) -> Result<Self, Error> {
        let slots: &[Level] = match widths.len() {
            2 => &[Level::Pgd, Level::Pte],
            3 => &[Level::Pgd, Level::Pmd, Level::Pte],
            4 => &[Level::Pgd, Level::Pud, Level::Pmd, Level::Pte],
            5 => &Level::ALL,
            _ => return Err(Error::InvalidGeometry),
        };

        let mut levels = [LevelGeometry::ABSENT; LEVEL_COUNT];
        for (level, &width) in slots.iter().zip(widths) {
            levels[level.index()] = LevelGeometry::bits(width);
        }

        let geometry = Self {
            levels,
            page_offset_bits,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Checks that every present level indexes at least one bit and that the
    /// whole layout fits in a 64-bit virtual address.
    pub fn validate(&self) -> Result<(), Error> {
        if self.page_offset_bits < 4 || self.page_offset_bits > 21 {
            return Err(Error::InvalidGeometry);
        }
        if !self.levels[Level::Pgd.index()].present || !self.levels[Level::Pte.index()].present {
            return Err(Error::InvalidGeometry);
        }
        for level in &self.levels {
            if level.present && (level.index_bits == 0 || level.index_bits > 16) {
                return Err(Error::InvalidGeometry);
            }
            if !level.present && level.index_bits != 0 {
                return Err(Error::InvalidGeometry);
            }
        }
        if self.virtual_bits() > 64 {
            return Err(Error::InvalidGeometry);
        }
        Ok(())
    }

    /// x86_64 4-level paging: 9/9/9/9 + 12.
    pub fn x86_64_4level() -> Self {
        Self::fixed(12, [9, 0, 9, 9, 9])
    }

    /// x86_64 5-level paging: 9/9/9/9/9 + 12.
    pub fn x86_64_5level() -> Self {
        Self::fixed(12, [9, 9, 9, 9, 9])
    }

    /// AArch64 with a 4 KiB granule and 39-bit inputs: 9/9/9 + 12.
    pub fn aarch64_4k_39bit() -> Self {
        Self::fixed(12, [9, 0, 0, 9, 9])
    }

    /// AArch64 with a 4 KiB granule and 48-bit inputs: 9/9/9/9 + 12.
    pub fn aarch64_4k_48bit() -> Self {
        Self::fixed(12, [9, 0, 9, 9, 9])
    }

    /// AArch64 with a 16 KiB granule and 48-bit inputs: 1/11/11/11 + 14.
    pub fn aarch64_16k() -> Self {
        Self::fixed(14, [1, 0, 11, 11, 11])
    }

    /// AArch64 with a 64 KiB granule and 48-bit inputs: 6/13/13 + 16.
    pub fn aarch64_64k() -> Self {
        Self::fixed(16, [6, 0, 0, 13, 13])
    }

    /// RISC-V Sv39: 9/9/9 + 12.
    pub fn sv39() -> Self {
        Self::fixed(12, [9, 0, 0, 9, 9])
    }

    /// RISC-V Sv48: 9/9/9/9 + 12.
    pub fn sv48() -> Self {
        Self::fixed(12, [9, 0, 9, 9, 9])
    }

    /// RISC-V Sv57: 9/9/9/9/9 + 12.
    pub fn sv57() -> Self {
        Self::fixed(12, [9, 9, 9, 9, 9])
    }

    const fn fixed(page_offset_bits: u8, widths: [u8; LEVEL_COUNT]) -> Self {
        let mut levels = [LevelGeometry::ABSENT; LEVEL_COUNT];
        let mut i = 0;
        while i < LEVEL_COUNT {
            if widths[i] != 0 {
                levels[i] = LevelGeometry::bits(widths[i]);
            }
            i += 1;
        }
        Self {
            levels,
            page_offset_bits,
        }
    }

    /// Decodes the x86_64 layout from a CR4 value.
    pub fn from_x86_64_cr4(cr4: u64) -> Result<Self, Error> {
        if cr4 & CR4_PAE == 0 {
            return Err(Error::UnrecognizedConfiguration(cr4));
        }
        if cr4 & CR4_LA57 != 0 {
            Ok(Self::x86_64_5level())
        } else {
            Ok(Self::x86_64_4level())
        }
    }

    /// Decodes the AArch64 layout for the lower half from a TCR_EL1 value.
    ///
    /// The TG0 field selects the granule, T0SZ the input-address width; the number
    /// of levels follows from both.
    pub fn from_aarch64_tcr(tcr: u64) -> Result<Self, Error> {
        let (page_offset_bits, stride) = match (tcr >> TCR_TG0_SHIFT) & TCR_TG0_MASK {
            0 => (12u8, 9u8),
            1 => (16, 13),
            2 => (14, 11),
            _ => return Err(Error::UnrecognizedConfiguration(tcr)),
        };

        let t0sz = (tcr & TCR_T0SZ_MASK) as u8;
        let va_bits = 64u8.saturating_sub(t0sz);
        if va_bits > 52 || va_bits <= page_offset_bits {
            return Err(Error::UnrecognizedConfiguration(tcr));
        }

        let remaining = va_bits - page_offset_bits;
        let count = remaining.div_ceil(stride);
        let top = remaining - (count - 1) * stride;

        let mut widths = [stride; LEVEL_COUNT];
        widths[0] = top;
        Self::from_widths(page_offset_bits, &widths[..count as usize])
            .map_err(|_| Error::UnrecognizedConfiguration(tcr))
    }

    /// Decodes the RISC-V layout from a satp value.
    pub fn from_riscv_satp(satp: u64) -> Result<Self, Error> {
        match satp >> SATP_MODE_SHIFT {
            SATP_MODE_SV39 => Ok(Self::sv39()),
            SATP_MODE_SV48 => Ok(Self::sv48()),
            SATP_MODE_SV57 => Ok(Self::sv57()),
            _ => Err(Error::UnrecognizedConfiguration(satp)),
        }
    }

    /// Reads the paging control register of the running CPU and decodes it.
    ///
    /// # Safety
    ///
    /// The register reads are privileged; the caller must run at kernel privilege.
    pub unsafe fn detect() -> Result<Self, Error> {
        #[cfg(target_arch = "x86_64")]
        {
            // SAFETY: privilege is guaranteed by the caller.
            Self::from_x86_64_cr4(unsafe { crate::x86_64::hw::read_cr4() })
        }
        #[cfg(target_arch = "aarch64")]
        {
            // SAFETY: privilege is guaranteed by the caller.
            Self::from_aarch64_tcr(unsafe { crate::aarch64::hw::read_tcr() })
        }
        #[cfg(target_arch = "riscv64")]
        {
            // SAFETY: privilege is guaranteed by the caller.
            Self::from_riscv_satp(unsafe { crate::riscv64::hw::read_satp() })
        }
        #[cfg(not(any(
            target_arch = "x86_64",
            target_arch = "aarch64",
            target_arch = "riscv64"
        )))]
        {
            log::warn!("no paging register to decode on this target");
            Err(Error::UnsupportedPlatform("geometry detection"))
        }
    }

    /// Layout of the given level slot.
    pub const fn level(&self, level: Level) -> LevelGeometry {
        self.levels[level.index()]
    }

    pub const fn is_present(&self, level: Level) -> bool {
        self.levels[level.index()].present
    }

    pub const fn page_offset_bits(&self) -> u8 {
        self.page_offset_bits
    }

    /// Size in bytes of a base page.
    pub const fn page_size(&self) -> u64 {
        1 << self.page_offset_bits
    }

    /// Bit position of the lowest index bit for `level`.
    ///
    /// This is the page offset plus the widths of every present level below it, and
    /// equals the log2 of the region size mapped by one entry at that level.
    pub fn shift(&self, level: Level) -> u32 {
        let below: u32 = self.levels[level.index() + 1..]
            .iter()
            .filter(|l| l.present)
            .map(|l| l.index_bits as u32)
            .sum();
        self.page_offset_bits as u32 + below
    }

    /// Index into the table at `level` for `vaddr`. Absent levels always index 0.
    pub fn index(&self, vaddr: VirtualAddress, level: Level) -> usize {
        let layout = self.level(level);
        if !layout.present {
            return 0;
        }
        let shift = self.shift(level);
        let mask = (1u64 << layout.index_bits) - 1;
        (vaddr.as_u64().checked_shr(shift).unwrap_or(0) & mask) as usize
    }

    /// Number of bytes mapped by one leaf entry at `level`.
    pub fn region_size(&self, level: Level) -> u64 {
        1u64.checked_shl(self.shift(level)).unwrap_or(0)
    }

    /// Present levels, root first.
    pub fn present_levels(&self) -> impl Iterator<Item = Level> + '_ {
        Level::ALL.into_iter().filter(|level| self.is_present(*level))
    }

    /// The final level of the hierarchy.
    pub fn leaf_level(&self) -> Level {
        Level::Pte
    }

    /// Total translated virtual-address width.
    pub fn virtual_bits(&self) -> u32 {
        self.levels
            .iter()
            .filter(|l| l.present)
            .map(|l| l.index_bits as u32)
            .sum::<u32>()
            + self.page_offset_bits as u32
    }
}
