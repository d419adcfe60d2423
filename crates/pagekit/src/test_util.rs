//! Shared fixtures for unit tests: an address space that records its lock
//! traffic, a page-table builder over emulated memory and a ready-made engine.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use spin::Mutex;

use crate::{
    Accessor, AddressSpace, Architecture, ENTRY_SIZE, EmulatedMemory, Engine, Level,
    LEVEL_COUNT, MemoryTypeRegister, PagingGeometry, PhysicalAddress, PhysicalMemory, Pid,
    StaticProcessTable, TlbControl, VirtualAddress,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockEvent {
    TryLock(bool),
    Lock,
    Unlock,
}

/// An address space that logs every call on its OS lock.
#[derive(Debug)]
pub(crate) struct RecordingSpace {
    locked: AtomicBool,
    root: AtomicU64,
    root_writes: AtomicUsize,
    events: Mutex<Vec<LockEvent>>,
}

impl RecordingSpace {
    pub(crate) fn new(root: PhysicalAddress) -> Self {
        Self {
            locked: AtomicBool::new(false),
            root: AtomicU64::new(root.as_u64()),
            root_writes: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn events(&self) -> Vec<LockEvent> {
        self.events.lock().clone()
    }

    pub(crate) fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub(crate) fn root_writes(&self) -> usize {
        self.root_writes.load(Ordering::Relaxed)
    }

    fn take(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }
}

impl AddressSpace for RecordingSpace {
    fn try_lock_exclusive(&self) -> bool {
        let taken = self.take();
        self.events.lock().push(LockEvent::TryLock(taken));
        taken
    }

    fn lock_exclusive(&self) {
        self.events.lock().push(LockEvent::Lock);
        while !self.take() {
            std::thread::yield_now();
        }
    }

    fn unlock_exclusive(&self) {
        self.events.lock().push(LockEvent::Unlock);
        self.locked.store(false, Ordering::Release);
    }

    fn paging_root(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.root.load(Ordering::Acquire))
    }

    fn set_paging_root(&self, root: PhysicalAddress) {
        self.root_writes.fetch_add(1, Ordering::Relaxed);
        self.root.store(root.as_u64(), Ordering::Release);
    }
}

/// An accessor over a table holding one recording space for `pid`.
pub(crate) fn recording_table(
    pid: Pid,
) -> (
    Accessor<StaticProcessTable<RecordingSpace>>,
    Arc<RecordingSpace>,
) {
    let table = StaticProcessTable::new();
    let space = Arc::new(RecordingSpace::new(PhysicalAddress::new(0x1000)));
    table.insert(pid, space.clone());
    (Accessor::new(table), space)
}

thread_local! {
    static INVALIDATED: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn record_invalidation(vaddr: VirtualAddress) {
    INVALIDATED.with(|calls| calls.borrow_mut().push(vaddr.as_u64()));
}

/// Addresses invalidated on this thread since the last call.
pub(crate) fn take_invalidated() -> Vec<u64> {
    INVALIDATED.with(|calls| calls.take())
}

/// A memory-type register backed by a plain cell.
#[derive(Debug)]
pub(crate) struct FakeMemoryTypes(AtomicU64);

impl FakeMemoryTypes {
    pub(crate) fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }
}

impl MemoryTypeRegister for FakeMemoryTypes {
    fn read(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn write(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }
}

/// Builds page tables for one architecture inside emulated memory.
pub(crate) struct TableBuilder {
    arch: Architecture,
    geometry: PagingGeometry,
    memory: Arc<EmulatedMemory>,
    root: PhysicalAddress,
}

impl TableBuilder {
    pub(crate) fn new(
        arch: Architecture,
        geometry: PagingGeometry,
        memory: Arc<EmulatedMemory>,
    ) -> Self {
        let mut builder = Self {
            arch,
            geometry,
            memory,
            root: PhysicalAddress::new(0),
        };
        builder.root = builder.allocate_table(Level::Pgd);
        builder
    }

    pub(crate) fn root(&self) -> PhysicalAddress {
        self.root
    }

    pub(crate) fn read(&self, slot: PhysicalAddress) -> u64 {
        self.memory.read_u64(slot).unwrap()
    }

    pub(crate) fn write(&self, slot: PhysicalAddress, raw: u64) {
        self.memory.write_u64(slot, raw).unwrap();
    }

    fn allocate_table(&self, level: Level) -> PhysicalAddress {
        let bytes = (1usize << self.geometry.level(level).index_bits) * ENTRY_SIZE as usize;
        let align = bytes.max(0x1000);
        self.memory
            .allocate(bytes.max(0x1000), align)
            .expect("emulated memory exhausted")
    }

    fn directory_entry(&self, table: PhysicalAddress) -> u64 {
        let addr = table.as_u64();
        match self.arch {
            Architecture::X86_64 => addr | 0x27,
            Architecture::Aarch64 => addr | 0b11,
            Architecture::Riscv64(_) => ((addr >> 12) << 10) | 0x1,
        }
    }

    fn leaf_entry(&self, frame: PhysicalAddress, huge: bool) -> u64 {
        let addr = frame.as_u64();
        match self.arch {
            Architecture::X86_64 if huge => addr | 0xe7,
            Architecture::X86_64 => addr | 0x67,
            Architecture::Aarch64 if huge => addr | (1 << 10) | 0b01,
            Architecture::Aarch64 => addr | (1 << 10) | 0b11,
            Architecture::Riscv64(_) => ((addr >> 12) << 10) | 0xc7,
        }
    }

    /// Maps `vaddr` to `frame` with a last-level entry, creating tables on the way.
    ///
    /// Returns the slot written at each level.
    pub(crate) fn map(
        &self,
        vaddr: VirtualAddress,
        frame: PhysicalAddress,
    ) -> [Option<PhysicalAddress>; LEVEL_COUNT] {
        self.map_at(vaddr, frame, self.geometry.leaf_level())
    }

    /// Maps `vaddr` with a huge leaf placed at `level`.
    pub(crate) fn map_huge(
        &self,
        vaddr: VirtualAddress,
        frame: PhysicalAddress,
        level: Level,
    ) -> [Option<PhysicalAddress>; LEVEL_COUNT] {
        self.map_at(vaddr, frame, level)
    }

    fn map_at(
        &self,
        vaddr: VirtualAddress,
        frame: PhysicalAddress,
        leaf: Level,
    ) -> [Option<PhysicalAddress>; LEVEL_COUNT] {
        let mut slots = [None; LEVEL_COUNT];
        let mut table = self.root;
        let levels: Vec<Level> = self.geometry.present_levels().collect();

        for (position, &level) in levels.iter().enumerate() {
            let slot = table + self.geometry.index(vaddr, level) as u64 * ENTRY_SIZE;
            slots[level.index()] = Some(slot);

            if level == leaf {
                let huge = leaf != self.geometry.leaf_level();
                self.write(slot, self.leaf_entry(frame, huge));
                break;
            }

            let raw = self.read(slot);
            if self.arch.is_present(raw, crate::EntryKind::Directory) {
                table = self.arch.table_address(raw);
            } else {
                let next = self.allocate_table(levels[position + 1]);
                self.write(slot, self.directory_entry(next));
                table = next;
            }
        }
        slots
    }
}

/// An engine over emulated memory with one process whose root is a fresh table.
pub(crate) struct Fixture {
    pub(crate) engine: Engine<StaticProcessTable<RecordingSpace>, Arc<EmulatedMemory>>,
    pub(crate) memory: Arc<EmulatedMemory>,
    pub(crate) space: Arc<RecordingSpace>,
    pub(crate) builder: TableBuilder,
}

impl Fixture {
    pub(crate) const PID: Pid = 1;

    const MEMORY_SIZE: usize = 4 << 20;

    pub(crate) fn new(arch: Architecture, geometry: PagingGeometry) -> Self {
        let memory = Arc::new(EmulatedMemory::new(Self::MEMORY_SIZE));
        let builder = TableBuilder::new(arch, geometry, memory.clone());
        let space = Arc::new(RecordingSpace::new(builder.root()));

        let table = StaticProcessTable::new();
        table.insert(Self::PID, space.clone());
        let engine = Engine::new(arch, geometry, table, memory.clone())
            .unwrap()
            .with_tlb(TlbControl::new(record_invalidation));

        Self {
            engine,
            memory,
            space,
            builder,
        }
    }

    /// A fresh zeroed frame of the base page size.
    pub(crate) fn frame(&self) -> PhysicalAddress {
        let size = self.engine.page_size() as usize;
        self.memory
            .allocate(size, size)
            .expect("emulated memory exhausted")
    }

    /// A huge-page address aligned to `1 << shift`, not backed by memory.
    pub(crate) fn huge_frame(&self, shift: u32) -> PhysicalAddress {
        PhysicalAddress::new(3 << shift)
    }
}
