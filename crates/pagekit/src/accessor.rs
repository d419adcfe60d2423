//! Reentrant access to target address spaces.
//!
//! The OS lock over an address space is exclusive and not reentrant, but the engine
//! acquires the same address space several times within one operation (an update
//! resolves first, and callers may hold a space across calls with
//! [`Accessor::lock`]). The [`Accessor`] keeps a registry of held spaces with a
//! reference count per pid and takes the OS lock only on the 0 to 1 transition.
//!
//! When the OS lock is held by someone outside the registry, the first acquirer
//! registers a pending slot, drops the registry lock and blocks on the OS lock.
//! Later acquirers for the same pid wait on that slot's gate instead of racing for
//! the OS lock themselves.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::fmt;

use spin::{Mutex, Once};

use crate::{Error, PhysicalAddress};

/// Process identifier as understood by the [`ProcessTable`].
pub type Pid = u32;

/// One target address space and its OS-level lock.
pub trait AddressSpace: Send + Sync {
    /// Takes the exclusive lock if it is free. Never blocks.
    fn try_lock_exclusive(&self) -> bool;

    /// Takes the exclusive lock, blocking until it is free.
    fn lock_exclusive(&self);

    /// Releases a lock taken by either of the locking methods.
    fn unlock_exclusive(&self);

    /// Physical address of the root table as the OS stores it.
    fn paging_root(&self) -> PhysicalAddress;

    fn set_paging_root(&self, root: PhysicalAddress);
}

/// Resolves process identifiers to address spaces.
pub trait ProcessTable: Send + Sync {
    type Space: AddressSpace;

    /// Returns the address space of a live process, or `None` if `pid` is unknown.
    fn find(&self, pid: Pid) -> Option<Arc<Self::Space>>;
}

struct Slot<S> {
    space: Arc<S>,
    refcount: usize,
    /// Present while the initiating acquire is still blocked on the OS lock.
    gate: Option<Arc<Once>>,
}

/// Reference-counted registry of held address spaces.
pub struct Accessor<P: ProcessTable> {
    processes: P,
    registry: Mutex<BTreeMap<Pid, Slot<P::Space>>>,
}

impl<P: ProcessTable> Accessor<P> {
    pub fn new(processes: P) -> Self {
        Self {
            processes,
            registry: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn processes(&self) -> &P {
        &self.processes
    }

    /// Acquires the address space of `pid`, released when the guard drops.
    pub fn acquire(&self, pid: Pid) -> Result<SpaceGuard<'_, P>, Error> {
        let space = self.enter(pid)?;
        Ok(SpaceGuard {
            accessor: self,
            pid,
            space,
        })
    }

    /// Acquires the address space of `pid` until a matching [`release`](Self::release).
    pub fn lock(&self, pid: Pid) -> Result<(), Error> {
        self.enter(pid).map(|_| ())
    }

    /// Drops one reference to `pid`, unlocking the OS lock when none remain.
    ///
    /// Releasing a pid that is not held is logged and ignored.
    pub fn release(&self, pid: Pid) {
        let mut registry = self.registry.lock();
        let Some(slot) = registry.get_mut(&pid) else {
            log::warn!("tried to release address space of pid {pid} that is not held");
            return;
        };
        if slot.gate.is_some() || slot.refcount == 0 {
            log::warn!("tried to release address space of pid {pid} before it was acquired");
            return;
        }

        slot.refcount -= 1;
        if slot.refcount == 0 {
            if let Some(slot) = registry.remove(&pid) {
                slot.space.unlock_exclusive();
            }
            log::trace!("address space of pid {pid} unlocked");
        }
    }

    /// Current reference count for `pid`; zero when unregistered or still pending.
    pub fn refcount(&self, pid: Pid) -> usize {
        self.registry
            .lock()
            .get(&pid)
            .map_or(0, |slot| slot.refcount)
    }

    fn enter(&self, pid: Pid) -> Result<Arc<P::Space>, Error> {
        loop {
            let mut registry = self.registry.lock();

            if let Some(slot) = registry.get_mut(&pid) {
                if let Some(gate) = slot.gate.clone() {
                    drop(registry);
                    gate.wait();
                    // The initiator may already have released; look again.
                    continue;
                }

                slot.refcount = slot.refcount.checked_add(1).ok_or_else(|| {
                    log::warn!("failed locking pid {pid} due to reference count overflow");
                    Error::LockOverflow(pid)
                })?;
                return Ok(slot.space.clone());
            }

            let space = self.processes.find(pid).ok_or_else(|| {
                log::warn!("no address space for pid {pid}");
                Error::ProcessNotFound(pid)
            })?;

            if space.try_lock_exclusive() {
                registry.insert(
                    pid,
                    Slot {
                        space: space.clone(),
                        refcount: 1,
                        gate: None,
                    },
                );
                return Ok(space);
            }

            let gate = Arc::new(Once::new());
            registry.insert(
                pid,
                Slot {
                    space: space.clone(),
                    refcount: 0,
                    gate: Some(gate.clone()),
                },
            );
            drop(registry);

            log::debug!("address space of pid {pid} is held elsewhere, waiting");
            space.lock_exclusive();

            if let Some(slot) = self.registry.lock().get_mut(&pid) {
                slot.refcount = 1;
                slot.gate = None;
            }
            gate.call_once(|| ());
            return Ok(space);
        }
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self, pid: Pid) -> bool {
        self.registry
            .lock()
            .get(&pid)
            .is_some_and(|slot| slot.gate.is_some())
    }

    #[cfg(test)]
    pub(crate) fn force_refcount(&self, pid: Pid, refcount: usize) {
        if let Some(slot) = self.registry.lock().get_mut(&pid) {
            slot.refcount = refcount;
        }
    }
}

impl<P: ProcessTable> fmt::Debug for Accessor<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.lock();
        f.debug_map()
            .entries(registry.iter().map(|(pid, slot)| (pid, slot.refcount)))
            .finish()
    }
}

/// A held reference to one address space.
pub struct SpaceGuard<'a, P: ProcessTable> {
    accessor: &'a Accessor<P>,
    pid: Pid,
    space: Arc<P::Space>,
}

impl<P: ProcessTable> SpaceGuard<'_, P> {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn space(&self) -> &Arc<P::Space> {
        &self.space
    }
}

impl<P: ProcessTable> Drop for SpaceGuard<'_, P> {
    fn drop(&mut self) {
        self.accessor.release(self.pid);
    }
}
