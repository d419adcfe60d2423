//! Request/response form of the engine operations.
//!
//! A privileged transport (an ioctl handler, an RPC endpoint) decodes its wire
//! format into a [`Request`], hands it to [`Engine::dispatch`] and reports back
//! with [`status`], which folds every error into one failure code.

use alloc::vec;
use alloc::vec::Vec;

use crate::{
    Engine, Error, LevelMask, LevelValues, PhysicalAddress, PhysicalMemory, Pid, ProcessTable,
    ResolvedEntrySet, TlbStrategy, VirtualAddress,
};

/// Status reported for a successful request.
pub const STATUS_OK: i64 = 0;

/// Status reported for any failed request.
pub const STATUS_FAILED: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    Resolve {
        vaddr: VirtualAddress,
        pid: Pid,
    },
    Update {
        vaddr: VirtualAddress,
        pid: Pid,
        values: LevelValues,
        mask: LevelMask,
    },
    GetRoot {
        pid: Pid,
    },
    SetRoot {
        pid: Pid,
        root: PhysicalAddress,
    },
    ReadPage {
        pfn: u64,
    },
    WritePage {
        pfn: u64,
        data: &'a [u8],
    },
    PageSize,
    InvalidateTlb {
        vaddr: VirtualAddress,
    },
    SwitchTlb {
        strategy: u8,
    },
    GetMemoryTypes,
    SetMemoryTypes {
        value: u64,
    },
    Lock {
        pid: Pid,
    },
    Unlock {
        pid: Pid,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Entries(ResolvedEntrySet),
    Root(PhysicalAddress),
    Page(Vec<u8>),
    PageSize(u64),
    TlbStrategy(TlbStrategy),
    MemoryTypes(u64),
    Done,
}

impl<P: ProcessTable, M: PhysicalMemory> Engine<P, M> {
    pub fn dispatch(&self, request: Request<'_>) -> Result<Response, Error> {
        log::trace!("dispatching {request:?}");
        match request {
            Request::Resolve { vaddr, pid } => self.resolve(vaddr, pid).map(Response::Entries),
            Request::Update {
                vaddr,
                pid,
                values,
                mask,
            } => self
                .update(vaddr, pid, &values, mask)
                .map(|_| Response::Done),
            Request::GetRoot { pid } => self.paging_root(pid).map(Response::Root),
            Request::SetRoot { pid, root } => {
                self.set_paging_root(pid, root).map(|()| Response::Done)
            }
            Request::ReadPage { pfn } => {
                let mut page = vec![0; self.page_size() as usize];
                self.read_physical_page(pfn, &mut page)?;
                Ok(Response::Page(page))
            }
            Request::WritePage { pfn, data } => {
                self.write_physical_page(pfn, data).map(|()| Response::Done)
            }
            Request::PageSize => Ok(Response::PageSize(self.page_size())),
            Request::InvalidateTlb { vaddr } => {
                self.invalidate_tlb(vaddr);
                Ok(Response::Done)
            }
            Request::SwitchTlb { strategy } => {
                self.switch_tlb_strategy(strategy).map(Response::TlbStrategy)
            }
            Request::GetMemoryTypes => self.memory_types().map(Response::MemoryTypes),
            Request::SetMemoryTypes { value } => {
                self.set_memory_types(value).map(|()| Response::Done)
            }
            Request::Lock { pid } => self.lock(pid).map(|()| Response::Done),
            Request::Unlock { pid } => {
                self.unlock(pid);
                Ok(Response::Done)
            }
        }
    }
}

/// Collapses a result into the transport status, logging a failure once.
pub fn status<T>(result: &Result<T, Error>) -> i64 {
    match result {
        Ok(_) => STATUS_OK,
        Err(err) => {
            log::warn!("request failed: {err}");
            STATUS_FAILED
        }
    }
}
