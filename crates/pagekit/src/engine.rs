//! The walk/update engine.
//!
//! One generic engine serves every architecture: the [`Architecture`] tag selects
//! the entry codec, the [`PagingGeometry`] drives index computation and the number
//! of levels, and the collaborators provide process lookup, physical memory and
//! TLB invalidation.
//!
//! The engine never allocates or frees page tables. An update writes only levels
//! that the walk actually reached; everything else is skipped.

use alloc::boxed::Box;

use crate::{
    Accessor, AddressSpace, Architecture, ENTRY_SIZE, EntryKind, EntryPatch, Error,
    LEVEL_COUNT, Level, LevelMask, LevelValues, MemoryTypeRegister, MemoryTypeTable,
    PagingGeometry, PhysicalAddress, PhysicalMemory, Pid, ProcessTable, ResolvedEntrySet,
    RiscvVariant, TlbControl, TlbStrategy, VirtualAddress,
};

/// A resolved entry set together with the physical slot of every valid level.
struct Walk {
    entries: ResolvedEntrySet,
    slots: [Option<PhysicalAddress>; LEVEL_COUNT],
}

/// Resolves and edits page-table entries of the address spaces in a process table.
pub struct Engine<P: ProcessTable, M: PhysicalMemory> {
    arch: Architecture,
    geometry: PagingGeometry,
    accessor: Accessor<P>,
    memory: M,
    tlb: TlbControl,
    memory_types: Option<Box<dyn MemoryTypeRegister>>,
}

impl<P: ProcessTable, M: PhysicalMemory> Engine<P, M> {
    /// Creates an engine with no TLB invalidation and no memory-type register.
    pub fn new(
        arch: Architecture,
        geometry: PagingGeometry,
        processes: P,
        memory: M,
    ) -> Result<Self, Error> {
        geometry.validate()?;
        log::debug!(
            "engine for {arch:?} with {} levels, {}-bit addresses, {} byte pages",
            geometry.present_levels().count(),
            geometry.virtual_bits(),
            geometry.page_size()
        );
        Ok(Self {
            arch,
            geometry,
            accessor: Accessor::new(processes),
            memory,
            tlb: TlbControl::none(),
            memory_types: None,
        })
    }

    pub fn with_tlb(mut self, tlb: TlbControl) -> Self {
        self.tlb = tlb;
        self
    }

    pub fn with_memory_types(mut self, register: Box<dyn MemoryTypeRegister>) -> Self {
        self.memory_types = Some(register);
        self
    }

    pub fn architecture(&self) -> Architecture {
        self.arch
    }

    pub fn geometry(&self) -> &PagingGeometry {
        &self.geometry
    }

    pub fn accessor(&self) -> &Accessor<P> {
        &self.accessor
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    fn kind(&self, level: Level) -> EntryKind {
        if level == self.geometry.leaf_level() {
            EntryKind::Page
        } else {
            EntryKind::Directory
        }
    }

    /// Walks from the root of `space` towards the entry mapping `vaddr`.
    ///
    /// The caller must hold the address space.
    fn walk(&self, space: &P::Space, vaddr: VirtualAddress, pid: Pid) -> Result<Walk, Error> {
        let mut walk = Walk {
            entries: ResolvedEntrySet::empty(pid, vaddr),
            slots: [None; LEVEL_COUNT],
        };

        let root = space.paging_root();
        if root.is_null() {
            log::debug!("pid {pid} has no paging root");
            return Ok(walk);
        }

        let leaf = self.geometry.leaf_level();
        let mut table = self.arch.root_table(root);
        for level in self.geometry.present_levels() {
            let slot = table + self.geometry.index(vaddr, level) as u64 * ENTRY_SIZE;
            let raw = self.memory.read_u64(slot)?;
            let kind = self.kind(level);

            // A last-level slot exists once its table does, present or not.
            let valid = level == leaf || self.arch.is_present(raw, kind);
            walk.entries.record(level, raw, valid);
            if !valid {
                break;
            }
            walk.slots[level.index()] = Some(slot);

            if level == leaf {
                break;
            }
            if self.arch.is_huge(raw) {
                log::trace!("{vaddr} is mapped by a huge page at {level}");
                break;
            }
            table = self.arch.table_address(raw);
        }

        Ok(walk)
    }

    fn walk_locked(&self, vaddr: VirtualAddress, pid: Pid) -> Result<Walk, Error> {
        let guard = self.accessor.acquire(pid)?;
        self.walk(guard.space(), vaddr, pid)
    }

    /// Resolves every level for `vaddr` in the address space of `pid`.
    pub fn resolve(&self, vaddr: VirtualAddress, pid: Pid) -> Result<ResolvedEntrySet, Error> {
        self.walk_locked(vaddr, pid).map(|walk| walk.entries)
    }

    /// Writes `values` to the levels selected by `mask`.
    ///
    /// Returns the levels actually written: selected levels that the walk did not
    /// reach are skipped. The TLB entry for `vaddr` is invalidated afterwards even
    /// if nothing was written.
    pub fn update(
        &self,
        vaddr: VirtualAddress,
        pid: Pid,
        values: &LevelValues,
        mask: LevelMask,
    ) -> Result<LevelMask, Error> {
        self.apply(vaddr, pid, mask, |level| EntryPatch::replace(values.get(level)))
    }

    /// Overlays `patch` onto each level selected by `mask`.
    pub fn patch(
        &self,
        vaddr: VirtualAddress,
        pid: Pid,
        mask: LevelMask,
        patch: EntryPatch,
    ) -> Result<LevelMask, Error> {
        self.apply(vaddr, pid, mask, |_| patch)
    }

    fn apply(
        &self,
        vaddr: VirtualAddress,
        pid: Pid,
        mask: LevelMask,
        patch_for: impl Fn(Level) -> EntryPatch,
    ) -> Result<LevelMask, Error> {
        // Held across the walk and every write so no table moves in between.
        let _guard = self.accessor.acquire(pid)?;
        let walk = self.walk_locked(vaddr, pid)?;

        let mut written = LevelMask::empty();
        let result = self.write_levels(&walk, mask, &patch_for, &mut written);
        self.tlb.invalidate(vaddr);
        result.map(|()| written)
    }

    fn write_levels(
        &self,
        walk: &Walk,
        mask: LevelMask,
        patch_for: &impl Fn(Level) -> EntryPatch,
        written: &mut LevelMask,
    ) -> Result<(), Error> {
        for level in Level::ALL {
            if !mask.has(level) {
                continue;
            }
            let Some(slot) = walk.slots[level.index()] else {
                log::debug!("skipping {level}: not reached by the walk");
                continue;
            };

            let existing = walk.entries.raw(level);
            let raw = self.arch.encode(existing, &patch_for(level), self.kind(level));
            log::debug!("updating {level} at {slot}: {existing:#x} -> {raw:#x}");
            self.memory.write_u64(slot, raw)?;
            *written |= level.mask();
        }
        Ok(())
    }

    /// Sets `bit` in every level selected by `mask`.
    pub fn set_bit(
        &self,
        vaddr: VirtualAddress,
        pid: Pid,
        mask: LevelMask,
        bit: u32,
    ) -> Result<LevelMask, Error> {
        self.patch(vaddr, pid, mask, EntryPatch::new().set_bit(bit))
    }

    /// Clears `bit` in every level selected by `mask`.
    pub fn clear_bit(
        &self,
        vaddr: VirtualAddress,
        pid: Pid,
        mask: LevelMask,
        bit: u32,
    ) -> Result<LevelMask, Error> {
        self.patch(vaddr, pid, mask, EntryPatch::new().clear_bit(bit))
    }

    pub fn pte_set_bit(&self, vaddr: VirtualAddress, pid: Pid, bit: u32) -> Result<bool, Error> {
        self.set_bit(vaddr, pid, LevelMask::PTE, bit)
            .map(|written| !written.is_empty())
    }

    pub fn pte_clear_bit(&self, vaddr: VirtualAddress, pid: Pid, bit: u32) -> Result<bool, Error> {
        self.clear_bit(vaddr, pid, LevelMask::PTE, bit)
            .map(|written| !written.is_empty())
    }

    /// Reads `bit` of the last-level entry, or `None` if that level was not reached.
    pub fn pte_get_bit(
        &self,
        vaddr: VirtualAddress,
        pid: Pid,
        bit: u32,
    ) -> Result<Option<bool>, Error> {
        let entries = self.resolve(vaddr, pid)?;
        Ok(entries.pte().map(|raw| raw & (1 << (bit & 63)) != 0))
    }

    /// PFN of the last-level entry, or `None` if that level was not reached.
    pub fn pte_get_pfn(&self, vaddr: VirtualAddress, pid: Pid) -> Result<Option<u64>, Error> {
        let entries = self.resolve(vaddr, pid)?;
        Ok(entries.pte().map(|raw| self.arch.pfn(raw)))
    }

    pub fn pte_set_pfn(
        &self,
        vaddr: VirtualAddress,
        pid: Pid,
        pfn: u64,
    ) -> Result<bool, Error> {
        self.patch(vaddr, pid, LevelMask::PTE, EntryPatch::new().with_pfn(pfn))
            .map(|written| !written.is_empty())
    }

    /// PFN held by a last-level entry value.
    pub fn get_pfn(&self, raw: u64) -> u64 {
        self.arch.pfn(raw)
    }

    /// `raw` with its PFN replaced and every other bit kept.
    pub fn set_pfn(&self, raw: u64, pfn: u64) -> u64 {
        self.arch.set_pfn(raw, pfn)
    }

    pub fn paging_root(&self, pid: Pid) -> Result<PhysicalAddress, Error> {
        let guard = self.accessor.acquire(pid)?;
        Ok(guard.space().paging_root())
    }

    pub fn set_paging_root(&self, pid: Pid, root: PhysicalAddress) -> Result<(), Error> {
        let guard = self.accessor.acquire(pid)?;
        log::debug!("setting paging root of pid {pid} to {root}");
        guard.space().set_paging_root(root);
        Ok(())
    }

    /// Base page size of the configured geometry.
    pub fn page_size(&self) -> u64 {
        self.geometry.page_size()
    }

    fn page_address(&self, pfn: u64, len: usize) -> Result<PhysicalAddress, Error> {
        let expected = self.page_size() as usize;
        if len != expected {
            return Err(Error::BufferSize {
                expected,
                actual: len,
            });
        }
        pfn.checked_mul(self.page_size())
            .map(PhysicalAddress::new)
            .ok_or(Error::PhysicalAccess(PhysicalAddress::new(u64::MAX)))
    }

    /// Copies page `pfn` into `buf`, which must be one page long.
    ///
    /// Here `pfn` counts pages of the configured page size.
    pub fn read_physical_page(&self, pfn: u64, buf: &mut [u8]) -> Result<(), Error> {
        let paddr = self.page_address(pfn, buf.len())?;
        self.memory.read_bytes(paddr, buf)
    }

    /// Overwrites page `pfn` with `buf`, which must be one page long.
    pub fn write_physical_page(&self, pfn: u64, buf: &[u8]) -> Result<(), Error> {
        let paddr = self.page_address(pfn, buf.len())?;
        self.memory.write_bytes(paddr, buf)
    }

    pub fn invalidate_tlb(&self, vaddr: VirtualAddress) {
        self.tlb.invalidate(vaddr);
    }

    pub fn tlb_strategy(&self) -> TlbStrategy {
        self.tlb.strategy()
    }

    pub fn switch_tlb_strategy(&self, id: u8) -> Result<TlbStrategy, Error> {
        self.tlb.switch(id)
    }

    fn memory_type_register(&self) -> Result<&dyn MemoryTypeRegister, Error> {
        self.memory_types.as_deref().ok_or_else(|| {
            log::warn!("no memory-type register configured for {:?}", self.arch);
            Error::UnsupportedPlatform("memory types")
        })
    }

    /// Raw value of the memory-type register.
    pub fn memory_types(&self) -> Result<u64, Error> {
        Ok(self.memory_type_register()?.read())
    }

    pub fn set_memory_types(&self, value: u64) -> Result<(), Error> {
        self.memory_type_register()?.write(value);
        Ok(())
    }

    /// Decoded snapshot of the memory-type register.
    ///
    /// T-Head cores keep the type in the entry, so no register is read there.
    pub fn memory_type_table(&self) -> Result<MemoryTypeTable, Error> {
        let value = match self.arch {
            Architecture::Riscv64(RiscvVariant::THeadC9xx) => 0,
            _ => self.memory_types()?,
        };
        MemoryTypeTable::new(self.arch, value)
    }

    pub fn get_mt(&self, index: u8) -> Result<u8, Error> {
        Ok(self.memory_type_table()?.get(index))
    }

    pub fn set_mt(&self, index: u8, mt: u8) -> Result<(), Error> {
        let mut table = self.memory_type_table()?;
        table.set(index, mt);
        self.set_memory_types(table.value())
    }

    pub fn find_mt(&self, mt: u8) -> Result<u8, Error> {
        Ok(self.memory_type_table()?.find(mt))
    }

    pub fn find_first_mt(&self, mt: u8) -> Result<Option<u8>, Error> {
        Ok(self.memory_type_table()?.find_first(mt))
    }

    /// Serializes the processor and reloads the paging root of `pid` in between.
    pub fn full_serializing_barrier(&self, pid: Pid) -> Result<(), Error> {
        let guard = self.accessor.acquire(pid)?;
        self.arch.serialize();
        let root = guard.space().paging_root();
        guard.space().set_paging_root(root);
        self.arch.serialize_trailing();
        Ok(())
    }

    /// Holds the address space of `pid` until [`unlock`](Self::unlock).
    pub fn lock(&self, pid: Pid) -> Result<(), Error> {
        self.accessor.lock(pid)
    }

    pub fn unlock(&self, pid: Pid) {
        self.accessor.release(pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{Fixture, LockEvent, take_invalidated};
    use crate::{InvalidateFn, riscv64};

    const VADDR: VirtualAddress = VirtualAddress::new(0x0000_7f00_1234_5000);

    mod resolve {
        use super::*;

        #[test]
        fn full_walk_x86_64() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            let frame = fx.frame();
            let slots = fx.builder.map(VADDR, frame);

            let entries = fx.engine.resolve(VADDR, Fixture::PID).unwrap();
            assert_eq!(
                entries.valid(),
                LevelMask::PGD | LevelMask::PUD | LevelMask::PMD | LevelMask::PTE
            );
            assert_eq!(entries.p4d(), None);
            let pte = entries.pte().unwrap();
            assert_eq!(fx.engine.architecture().pfn(pte), frame.as_u64() >> 12);
            assert_eq!(fx.builder.read(slots[Level::Pte.index()].unwrap()), pte);
        }

        #[test]
        fn full_walk_5level() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_5level());
            let vaddr = VirtualAddress::new(0x00ab_cdef_0123_4000);
            fx.builder.map(vaddr, fx.frame());

            let entries = fx.engine.resolve(vaddr, Fixture::PID).unwrap();
            assert_eq!(entries.valid(), LevelMask::all());
        }

        #[test]
        fn full_walk_aarch64_16k() {
            let fx = Fixture::new(Architecture::Aarch64, PagingGeometry::aarch64_16k());
            let vaddr = VirtualAddress::new(0x0000_ffff_1234_c000);
            let frame = fx.frame();
            fx.builder.map(vaddr, frame);

            let entries = fx.engine.resolve(vaddr, Fixture::PID).unwrap();
            assert_eq!(entries.deepest(), Some(Level::Pte));
            assert_eq!(
                fx.engine.architecture().pfn(entries.pte().unwrap()),
                frame.as_u64() >> 12
            );
        }

        #[test]
        fn full_walk_sv39() {
            let arch = Architecture::Riscv64(RiscvVariant::Standard);
            let fx = Fixture::new(arch, PagingGeometry::sv39());
            let vaddr = VirtualAddress::new(0x0000_003f_8000_1000);
            fx.builder.map(vaddr, fx.frame());

            let entries = fx.engine.resolve(vaddr, Fixture::PID).unwrap();
            assert_eq!(
                entries.valid(),
                LevelMask::PGD | LevelMask::PMD | LevelMask::PTE
            );
        }

        #[test]
        fn stops_at_first_non_present_level() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            fx.builder.map(VADDR, fx.frame());
            // Same PGD slot, different PUD slot.
            let other = VirtualAddress::new(VADDR.as_u64() + (1 << 30));

            let entries = fx.engine.resolve(other, Fixture::PID).unwrap();
            assert_eq!(entries.valid(), LevelMask::PGD);
            assert_eq!(entries.raw(Level::Pud), 0);
            assert_eq!(entries.raw(Level::Pmd), 0);
            assert_eq!(entries.deepest(), Some(Level::Pgd));
        }

        #[test]
        fn reports_raw_value_of_non_present_level() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            let slots = fx.builder.map(VADDR, fx.frame());
            let pmd_slot = slots[Level::Pmd.index()].unwrap();
            // Swapped-out style entry: not present, payload kept.
            let stale = fx.builder.read(pmd_slot) & !1;
            fx.builder.write(pmd_slot, stale);

            let entries = fx.engine.resolve(VADDR, Fixture::PID).unwrap();
            assert_eq!(entries.valid(), LevelMask::PGD | LevelMask::PUD);
            assert_eq!(entries.raw(Level::Pmd), stale);
            assert_eq!(entries.pmd(), None);
        }

        #[test]
        fn non_present_pte_slot_is_still_valid() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            fx.builder.map(VADDR, fx.frame());
            let neighbour = VirtualAddress::new(VADDR.as_u64() + 0x1000);

            let entries = fx.engine.resolve(neighbour, Fixture::PID).unwrap();
            assert_eq!(entries.pte(), Some(0));
        }

        #[test]
        fn huge_page_short_circuits() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            let frame = fx.huge_frame(21);
            fx.builder.map_huge(VADDR, frame, Level::Pmd);

            let entries = fx.engine.resolve(VADDR, Fixture::PID).unwrap();
            assert_eq!(
                entries.valid(),
                LevelMask::PGD | LevelMask::PUD | LevelMask::PMD
            );
            assert_eq!(entries.deepest(), Some(Level::Pmd));
            assert_eq!(entries.raw(Level::Pte), 0);
            let decoded = fx
                .engine
                .architecture()
                .decode(entries.pmd().unwrap(), EntryKind::Directory);
            assert!(decoded.is_huge(EntryKind::Directory));
            assert_eq!(decoded.pfn, frame.as_u64() >> 12);
        }

        #[test]
        fn pud_leaf_short_circuits() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            let frame = fx.huge_frame(30);
            fx.builder.map_huge(VADDR, frame, Level::Pud);

            let entries = fx.engine.resolve(VADDR, Fixture::PID).unwrap();
            assert_eq!(entries.valid(), LevelMask::PGD | LevelMask::PUD);
            assert_eq!(entries.deepest(), Some(Level::Pud));
            let decoded = fx
                .engine
                .architecture()
                .decode(entries.pud().unwrap(), EntryKind::Directory);
            assert!(decoded.is_huge(EntryKind::Directory));
            assert_eq!(decoded.pfn, frame.as_u64() >> 12);
        }

        #[test]
        fn aarch64_block_short_circuits() {
            let fx = Fixture::new(Architecture::Aarch64, PagingGeometry::aarch64_4k_48bit());
            let frame = fx.huge_frame(21);
            fx.builder.map_huge(VADDR, frame, Level::Pmd);

            let entries = fx.engine.resolve(VADDR, Fixture::PID).unwrap();
            assert_eq!(
                entries.valid(),
                LevelMask::PGD | LevelMask::PUD | LevelMask::PMD
            );
            assert_eq!(entries.pte(), None);
            let pmd = entries.pmd().unwrap();
            assert!(fx.engine.architecture().is_huge(pmd));
            assert_eq!(
                fx.engine.architecture().decode(pmd, EntryKind::Directory).pfn,
                frame.as_u64() >> 12
            );
        }

        #[test]
        fn riscv_leaf_at_directory_level() {
            let arch = Architecture::Riscv64(RiscvVariant::Standard);
            let fx = Fixture::new(arch, PagingGeometry::sv39());
            let vaddr = VirtualAddress::new(0x4000_0000);
            fx.builder.map_huge(vaddr, fx.huge_frame(30), Level::Pgd);

            let entries = fx.engine.resolve(vaddr, Fixture::PID).unwrap();
            assert_eq!(entries.valid(), LevelMask::PGD);
            assert!(riscv64::PageEntry::from(entries.pgd().unwrap()).is_leaf());
        }

        #[test]
        fn satp_value_as_root() {
            let arch = Architecture::Riscv64(RiscvVariant::Standard);
            let fx = Fixture::new(arch, PagingGeometry::sv39());
            let vaddr = VirtualAddress::new(0x0000_003f_8000_1000);
            let frame = fx.frame();
            fx.builder.map(vaddr, frame);
            let satp = (8 << 60) | (fx.builder.root().as_u64() >> 12);
            fx.space.set_paging_root(PhysicalAddress::new(satp));

            let entries = fx.engine.resolve(vaddr, Fixture::PID).unwrap();
            assert_eq!(entries.deepest(), Some(Level::Pte));
            assert_eq!(
                fx.engine.architecture().pfn(entries.pte().unwrap()),
                frame.as_u64() >> 12
            );
        }

        #[test]
        fn zero_root_gives_an_empty_set() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            fx.space.set_paging_root(PhysicalAddress::new(0));

            let entries = fx.engine.resolve(VADDR, Fixture::PID).unwrap();
            assert!(entries.valid().is_empty());
        }

        #[test]
        fn unknown_pid() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            assert_eq!(
                fx.engine.resolve(VADDR, 404),
                Err(Error::ProcessNotFound(404))
            );
        }

        #[test]
        fn resolve_releases_the_lock() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            fx.engine.resolve(VADDR, Fixture::PID).unwrap();
            assert!(!fx.space.is_locked());
            assert_eq!(
                fx.space.events(),
                vec![LockEvent::TryLock(true), LockEvent::Unlock]
            );
        }

        #[test]
        fn unreadable_table_is_an_error() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            fx.space.set_paging_root(PhysicalAddress::new(0x4000_0000));
            assert!(matches!(
                fx.engine.resolve(VADDR, Fixture::PID),
                Err(Error::PhysicalAccess(_))
            ));
            assert!(!fx.space.is_locked());
        }
    }

    mod update {
        use super::*;

        #[test]
        fn writes_requested_levels_and_invalidates() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            let slots = fx.builder.map(VADDR, fx.frame());
            let before = fx.engine.resolve(VADDR, Fixture::PID).unwrap();
            take_invalidated();

            let mut values = before.values();
            let new_pte = before.pte().unwrap() | (1 << 63);
            values.set(Level::Pte, new_pte);
            let written = fx
                .engine
                .update(VADDR, Fixture::PID, &values, LevelMask::PTE)
                .unwrap();

            assert_eq!(written, LevelMask::PTE);
            assert_eq!(fx.builder.read(slots[Level::Pte.index()].unwrap()), new_pte);
            assert_eq!(take_invalidated(), vec![VADDR.as_u64()]);
            let after = fx.engine.resolve(VADDR, Fixture::PID).unwrap();
            assert_eq!(after.pte(), Some(new_pte));
        }

        #[test]
        fn skips_levels_the_walk_did_not_reach() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            let slots = fx.builder.map(VADDR, fx.frame());
            let pmd_slot = slots[Level::Pmd.index()].unwrap();
            let pte_slot = slots[Level::Pte.index()].unwrap();
            let pmd = fx.builder.read(pmd_slot) & !1;
            fx.builder.write(pmd_slot, pmd);
            let pte = fx.builder.read(pte_slot);

            let values = LevelValues::new([0xaaaa_a007; LEVEL_COUNT]);
            let written = fx
                .engine
                .update(
                    VADDR,
                    Fixture::PID,
                    &values,
                    LevelMask::PUD | LevelMask::PMD | LevelMask::PTE,
                )
                .unwrap();

            assert_eq!(written, LevelMask::PUD);
            assert_eq!(fx.builder.read(slots[Level::Pud.index()].unwrap()), 0xaaaa_a007);
            assert_eq!(fx.builder.read(pmd_slot), pmd);
            assert_eq!(fx.builder.read(pte_slot), pte);
        }

        #[test]
        fn below_a_huge_page_writes_nothing_but_still_invalidates() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            let slots = fx.builder.map_huge(VADDR, fx.huge_frame(21), Level::Pmd);
            let pmd = fx.builder.read(slots[Level::Pmd.index()].unwrap());
            take_invalidated();

            let written = fx.engine.pte_set_bit(VADDR, Fixture::PID, 1).unwrap();
            assert!(!written);
            assert_eq!(fx.builder.read(slots[Level::Pmd.index()].unwrap()), pmd);
            assert_eq!(take_invalidated(), vec![VADDR.as_u64()]);
        }

        #[test]
        fn invalidation_reaches_every_cpu() {
            fn on_two_cpus(flush: InvalidateFn, vaddr: VirtualAddress) {
                flush(vaddr);
                flush(vaddr);
            }

            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            fx.builder.map(VADDR, fx.frame());
            let tlb = TlbControl::new(crate::test_util::record_invalidation)
                .with_broadcast(on_two_cpus);
            let engine = fx.engine.with_tlb(tlb);
            take_invalidated();

            assert_eq!(engine.pte_clear_bit(VADDR, Fixture::PID, 1), Ok(true));
            assert_eq!(take_invalidated(), vec![VADDR.as_u64(); 2]);
        }

        #[test]
        fn holds_the_space_once_across_nested_acquires() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            fx.builder.map(VADDR, fx.frame());
            fx.space.clear_events();

            fx.engine.pte_set_bit(VADDR, Fixture::PID, 9).unwrap();
            assert_eq!(
                fx.space.events(),
                vec![LockEvent::TryLock(true), LockEvent::Unlock]
            );
        }

        #[test]
        fn unknown_pid_writes_nothing() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            let values = LevelValues::default();
            assert_eq!(
                fx.engine.update(VADDR, 9, &values, LevelMask::all()),
                Err(Error::ProcessNotFound(9))
            );
        }
    }

    mod bits {
        use super::*;

        #[test]
        fn pte_bit_helpers() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            fx.builder.map(VADDR, fx.frame());

            assert_eq!(fx.engine.pte_get_bit(VADDR, Fixture::PID, 1), Ok(Some(true)));
            assert_eq!(fx.engine.pte_clear_bit(VADDR, Fixture::PID, 1), Ok(true));
            assert_eq!(fx.engine.pte_get_bit(VADDR, Fixture::PID, 1), Ok(Some(false)));
            assert_eq!(fx.engine.pte_set_bit(VADDR, Fixture::PID, 1), Ok(true));
            assert_eq!(fx.engine.pte_get_bit(VADDR, Fixture::PID, 1), Ok(Some(true)));
        }

        #[test]
        fn bit_helpers_report_unreached_pte() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            assert_eq!(fx.engine.pte_get_bit(VADDR, Fixture::PID, 0), Ok(None));
            assert_eq!(fx.engine.pte_get_pfn(VADDR, Fixture::PID), Ok(None));
        }

        #[test]
        fn set_bit_across_levels() {
            let fx = Fixture::new(Architecture::Aarch64, PagingGeometry::aarch64_4k_48bit());
            let slots = fx.builder.map(VADDR, fx.frame());

            let written = fx
                .engine
                .set_bit(VADDR, Fixture::PID, LevelMask::all(), 54)
                .unwrap();
            assert_eq!(
                written,
                LevelMask::PGD | LevelMask::PUD | LevelMask::PMD | LevelMask::PTE
            );
            for level in [Level::Pgd, Level::Pud, Level::Pmd, Level::Pte] {
                let raw = fx.builder.read(slots[level.index()].unwrap());
                assert_ne!(raw & (1 << 54), 0, "{level}");
            }
        }

        #[test]
        fn pfn_helpers() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            let frame = fx.frame();
            fx.builder.map(VADDR, frame);
            let entries = fx.engine.resolve(VADDR, Fixture::PID).unwrap();
            let flags = entries.pte().unwrap() & 0xfff;

            assert_eq!(
                fx.engine.pte_get_pfn(VADDR, Fixture::PID),
                Ok(Some(frame.as_u64() >> 12))
            );
            assert_eq!(fx.engine.pte_set_pfn(VADDR, Fixture::PID, 0x777), Ok(true));
            let pte = fx.engine.resolve(VADDR, Fixture::PID).unwrap().pte().unwrap();
            assert_eq!(pte, (0x777 << 12) | flags);
        }
    }

    mod root {
        use super::*;

        #[test]
        fn get_and_set() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            let root = fx.engine.paging_root(Fixture::PID).unwrap();
            assert_eq!(root, fx.builder.root());

            fx.engine
                .set_paging_root(Fixture::PID, PhysicalAddress::new(0x9000))
                .unwrap();
            assert_eq!(fx.space.paging_root(), PhysicalAddress::new(0x9000));
        }

        #[test]
        fn barrier_rewrites_the_same_root() {
            let fx = Fixture::new(Architecture::Aarch64, PagingGeometry::aarch64_4k_39bit());
            let before = fx.space.paging_root();
            fx.engine.full_serializing_barrier(Fixture::PID).unwrap();
            assert_eq!(fx.space.paging_root(), before);
            assert_eq!(fx.space.root_writes(), 1);
        }
    }

    mod pages {
        use super::*;

        #[test]
        fn read_and_write_physical_page() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            let frame = fx.frame();
            let pfn = frame.as_u64() >> 12;

            let page = vec![0x5a; 4096];
            fx.engine.write_physical_page(pfn, &page).unwrap();
            let mut back = vec![0; 4096];
            fx.engine.read_physical_page(pfn, &mut back).unwrap();
            assert_eq!(back, page);
        }

        #[test]
        fn buffer_must_be_one_page() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            let mut short = [0u8; 16];
            assert_eq!(
                fx.engine.read_physical_page(1, &mut short),
                Err(Error::BufferSize {
                    expected: 4096,
                    actual: 16
                })
            );
        }

        #[test]
        fn page_size_follows_geometry() {
            let fx = Fixture::new(Architecture::Aarch64, PagingGeometry::aarch64_64k());
            assert_eq!(fx.engine.page_size(), 65536);
        }
    }

    mod memory_types {
        use super::*;
        use crate::test_util::FakeMemoryTypes;

        #[test]
        fn unsupported_without_a_register() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            assert_eq!(
                fx.engine.memory_types(),
                Err(Error::UnsupportedPlatform("memory types"))
            );
        }

        #[test]
        fn get_set_and_find() {
            let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
            let engine = fx
                .engine
                .with_memory_types(Box::new(FakeMemoryTypes::new(0x0007_0406_0007_0406)));

            assert_eq!(engine.get_mt(1), Ok(crate::x86_64::mt::WT));
            engine.set_mt(1, crate::x86_64::mt::WC).unwrap();
            assert_eq!(engine.memory_types(), Ok(0x0007_0406_0007_0106));
            assert_eq!(engine.find_first_mt(crate::x86_64::mt::WC), Ok(Some(1)));
            assert_eq!(engine.find_mt(crate::x86_64::mt::WB), Ok(0b0001_0001));
        }

        #[test]
        fn thead_needs_no_register() {
            let arch = Architecture::Riscv64(RiscvVariant::THeadC9xx);
            let fx = Fixture::new(arch, PagingGeometry::sv39());
            assert_eq!(fx.engine.get_mt(4), Ok(4));
            assert_eq!(fx.engine.find_mt(riscv64::mt::CACHEABLE), Ok(riscv64::mt::CACHEABLE));
            assert_eq!(fx.engine.find_first_mt(7), Ok(Some(7)));
            assert_eq!(
                fx.engine.memory_types(),
                Err(Error::UnsupportedPlatform("memory types"))
            );
        }
    }

    #[test]
    fn explicit_lock_spans_calls() {
        let fx = Fixture::new(Architecture::X86_64, PagingGeometry::x86_64_4level());
        fx.builder.map(VADDR, fx.frame());
        fx.space.clear_events();

        fx.engine.lock(Fixture::PID).unwrap();
        fx.engine.resolve(VADDR, Fixture::PID).unwrap();
        fx.engine.pte_set_bit(VADDR, Fixture::PID, 5).unwrap();
        assert!(fx.space.is_locked());
        fx.engine.unlock(Fixture::PID);

        assert_eq!(
            fx.space.events(),
            vec![LockEvent::TryLock(true), LockEvent::Unlock]
        );
    }
}
