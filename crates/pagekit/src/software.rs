//! Software collaborators: an address space with a spin lock, a static process
//! table and, for tests and host-side tooling, emulated physical memory.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use spin::RwLock;

use crate::{AddressSpace, Pid, PhysicalAddress, ProcessTable};

/// An address space whose OS lock is a plain spin lock.
///
/// Used when the engine inspects memory that no kernel is concurrently
/// managing, such as a memory image, and by tests.
#[derive(Debug)]
pub struct SoftwareAddressSpace {
    locked: AtomicBool,
    root: AtomicU64,
}

impl SoftwareAddressSpace {
    pub const fn new(root: PhysicalAddress) -> Self {
        Self {
            locked: AtomicBool::new(false),
            root: AtomicU64::new(root.as_u64()),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

impl AddressSpace for SoftwareAddressSpace {
    fn try_lock_exclusive(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn lock_exclusive(&self) {
        while !self.try_lock_exclusive() {
            core::hint::spin_loop();
        }
    }

    fn unlock_exclusive(&self) {
        self.locked.store(false, Ordering::Release);
    }

    fn paging_root(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.root.load(Ordering::Acquire))
    }

    fn set_paging_root(&self, root: PhysicalAddress) {
        self.root.store(root.as_u64(), Ordering::Release);
    }
}

/// A process table populated by the caller.
#[derive(Debug)]
pub struct StaticProcessTable<S> {
    spaces: RwLock<BTreeMap<Pid, Arc<S>>>,
}

impl<S> StaticProcessTable<S> {
    pub const fn new() -> Self {
        Self {
            spaces: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers `space` as the address space of `pid`, replacing any previous one.
    pub fn insert(&self, pid: Pid, space: Arc<S>) -> Option<Arc<S>> {
        self.spaces.write().insert(pid, space)
    }

    /// Forgets `pid`, as if the process had exited.
    pub fn remove(&self, pid: Pid) -> Option<Arc<S>> {
        self.spaces.write().remove(&pid)
    }
}

impl<S> Default for StaticProcessTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: AddressSpace> ProcessTable for StaticProcessTable<S> {
    type Space = S;

    fn find(&self, pid: Pid) -> Option<Arc<S>> {
        self.spaces.read().get(&pid).cloned()
    }
}

#[cfg(any(test, feature = "software-emulation"))]
pub use emulated::EmulatedMemory;

#[cfg(any(test, feature = "software-emulation"))]
mod emulated {
    use alloc::vec::Vec;
    use core::ops::Range;
    use core::sync::atomic::{AtomicUsize, Ordering};

    use spin::Mutex;

    use crate::{Error, PhysicalAddress, PhysicalMemory};

    /// Emulated physical memory.
    ///
    /// A zeroed buffer standing in for RAM, with a bump allocator for building page
    /// tables. The first page is never handed out, so physical address zero is
    /// never a valid table.
    pub struct EmulatedMemory {
        memory: Mutex<Vec<u8>>,
        next_alloc: AtomicUsize,
    }

    impl EmulatedMemory {
        const RESERVED: usize = 0x1000;

        /// Creates a new emulated memory region of the specified size.
        pub fn new(size: usize) -> Self {
            Self {
                memory: Mutex::new(alloc::vec![0u8; size]),
                next_alloc: AtomicUsize::new(Self::RESERVED),
            }
        }

        /// Allocates a zeroed block of memory from the emulated space.
        ///
        /// Returns `None` if there's not enough space left.
        pub fn allocate(&self, size: usize, align: usize) -> Option<PhysicalAddress> {
            let len = self.size();
            loop {
                let current = self.next_alloc.load(Ordering::Relaxed);

                let aligned = current.checked_add(align - 1)? & !(align - 1);
                let end = aligned.checked_add(size)?;

                if end > len {
                    return None;
                }

                if self
                    .next_alloc
                    .compare_exchange(current, end, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    return Some(PhysicalAddress::new(aligned as u64));
                }
            }
        }

        /// Returns the size of the emulated memory region.
        pub fn size(&self) -> usize {
            self.memory.lock().len()
        }

        fn range(&self, paddr: PhysicalAddress, len: usize) -> Result<Range<usize>, Error> {
            let start =
                usize::try_from(paddr.as_u64()).map_err(|_| Error::PhysicalAccess(paddr))?;
            let end = start.checked_add(len).ok_or(Error::PhysicalAccess(paddr))?;
            if end > self.size() {
                return Err(Error::PhysicalAccess(paddr));
            }
            Ok(start..end)
        }
    }

    impl PhysicalMemory for EmulatedMemory {
        fn read_bytes(&self, paddr: PhysicalAddress, buf: &mut [u8]) -> Result<(), Error> {
            let range = self.range(paddr, buf.len())?;
            buf.copy_from_slice(&self.memory.lock()[range]);
            Ok(())
        }

        fn write_bytes(&self, paddr: PhysicalAddress, buf: &[u8]) -> Result<(), Error> {
            let range = self.range(paddr, buf.len())?;
            self.memory.lock()[range].copy_from_slice(buf);
            Ok(())
        }
    }
}
