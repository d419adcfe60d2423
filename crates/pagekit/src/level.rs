//! Page-table levels, level masks and per-level value sets.

use core::fmt;

use bitflags::bitflags;

use crate::{Pid, VirtualAddress};

/// Number of level slots every entry set carries, whether or not the geometry uses them.
pub const LEVEL_COUNT: usize = 5;

/// A page-table level, named from the root towards the leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Root directory.
    Pgd,
    /// Fourth-level directory, only used with 5-level paging.
    P4d,
    /// Upper directory.
    Pud,
    /// Middle directory.
    Pmd,
    /// Page table entry proper.
    Pte,
}

impl Level {
    /// All levels, root first.
    pub const ALL: [Level; LEVEL_COUNT] =
        [Level::Pgd, Level::P4d, Level::Pud, Level::Pmd, Level::Pte];

    /// Position of this level in root-to-leaf order.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The mask bit selecting this level.
    pub const fn mask(self) -> LevelMask {
        LevelMask::from_bits_retain(1 << self as u8)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Pgd => "PGD",
            Level::P4d => "P4D",
            Level::Pud => "PUD",
            Level::Pmd => "PMD",
            Level::Pte => "PTE",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// One bit per level.
    ///
    /// On resolve the mask reports which levels were reached; on update it selects
    /// which levels to write.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct LevelMask: u8 {
        const PGD = 1 << 0;
        const P4D = 1 << 1;
        const PUD = 1 << 2;
        const PMD = 1 << 3;
        const PTE = 1 << 4;
    }
}

impl LevelMask {
    /// Returns whether the bit for `level` is set.
    pub const fn has(self, level: Level) -> bool {
        self.bits() & level.mask().bits() != 0
    }
}

impl From<Level> for LevelMask {
    fn from(level: Level) -> Self {
        level.mask()
    }
}

/// A raw entry value for every level slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelValues([u64; LEVEL_COUNT]);

impl LevelValues {
    pub const fn new(values: [u64; LEVEL_COUNT]) -> Self {
        Self(values)
    }

    pub const fn get(&self, level: Level) -> u64 {
        self.0[level.index()]
    }

    pub fn set(&mut self, level: Level, value: u64) {
        self.0[level.index()] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Level, u64)> + '_ {
        Level::ALL.into_iter().map(|level| (level, self.get(level)))
    }
}

/// The outcome of resolving one virtual address in one address space.
///
/// Validity is monotone over the levels present in the geometry: once one is
/// invalid, every deeper one is too. Levels below the first non-present one
/// read as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedEntrySet {
    pid: Pid,
    vaddr: VirtualAddress,
    values: LevelValues,
    valid: LevelMask,
}

impl ResolvedEntrySet {
    pub(crate) const fn empty(pid: Pid, vaddr: VirtualAddress) -> Self {
        Self {
            pid,
            vaddr,
            values: LevelValues::new([0; LEVEL_COUNT]),
            valid: LevelMask::empty(),
        }
    }

    pub(crate) fn record(&mut self, level: Level, raw: u64, valid: bool) {
        self.values.set(level, raw);
        if valid {
            self.valid |= level.mask();
        }
    }

    pub const fn pid(&self) -> Pid {
        self.pid
    }

    pub const fn vaddr(&self) -> VirtualAddress {
        self.vaddr
    }

    /// Mask of the levels that were reached and are editable.
    pub const fn valid(&self) -> LevelMask {
        self.valid
    }

    /// All raw values, valid or not.
    pub const fn values(&self) -> LevelValues {
        self.values
    }

    /// Returns the raw entry for `level` if that level is valid.
    pub const fn entry(&self, level: Level) -> Option<u64> {
        if self.valid.has(level) {
            Some(self.values.get(level))
        } else {
            None
        }
    }

    /// Returns the raw value for `level` regardless of validity.
    pub const fn raw(&self, level: Level) -> u64 {
        self.values.get(level)
    }

    /// The deepest valid level, if any.
    pub fn deepest(&self) -> Option<Level> {
        Level::ALL
            .into_iter()
            .rev()
            .find(|level| self.valid.has(*level))
    }

    pub const fn pgd(&self) -> Option<u64> {
        self.entry(Level::Pgd)
    }

    pub const fn p4d(&self) -> Option<u64> {
        self.entry(Level::P4d)
    }

    pub const fn pud(&self) -> Option<u64> {
        self.entry(Level::Pud)
    }

    pub const fn pmd(&self) -> Option<u64> {
        self.entry(Level::Pmd)
    }

    pub const fn pte(&self) -> Option<u64> {
        self.entry(Level::Pte)
    }
}
