#![cfg_attr(not(any(test, feature = "std")), no_std)]

//! # pagekit
//!
//! Architecture-abstracted inspection and editing of live page tables.
//!
//! The crate walks the page-table hierarchy of an arbitrary address space and
//! rewrites entries that already exist. It provides:
//!
//! - A runtime-configured paging geometry (3 to 5 levels) for x86_64, AArch64 and RISC-V.
//! - Per-architecture entry codecs built on explicit shift/mask accessors.
//! - A reentrant, reference-counted lock registry layered over the OS address-space lock.
//! - A generic walk/update engine with pluggable TLB invalidation.
//!
//! It never allocates, maps or unmaps memory: levels missing from a walk stay missing.

extern crate alloc;

mod accessor;
mod address;
mod arch;
mod command;
mod engine;
mod error;
mod geometry;
mod level;
mod memory;
mod memory_type;
mod software;
mod tlb;

#[cfg(feature = "std")]
mod physmem;

#[cfg(test)]
mod test_util;

pub use accessor::{Accessor, AddressSpace, Pid, ProcessTable, SpaceGuard};
pub use address::{PhysicalAddress, VirtualAddress};
pub use arch::{
    Architecture, DecodedEntry, ENTRY_SIZE, EntryKind, EntryPatch, FRAME_SHIFT, Permissions,
    RiscvVariant, aarch64, riscv64, x86_64,
};
pub use command::{Request, Response, STATUS_FAILED, STATUS_OK, status};
pub use engine::Engine;
pub use error::Error;
pub use geometry::{LevelGeometry, PagingGeometry};
pub use level::{LEVEL_COUNT, Level, LevelMask, LevelValues, ResolvedEntrySet};
pub use memory::{DirectMap, MappedWindow, PhysicalMemory};
pub use memory_type::{MemoryTypeRegister, MemoryTypeTable};
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
pub use memory_type::NativeMemoryTypes;
pub use software::{SoftwareAddressSpace, StaticProcessTable};
pub use tlb::{
    BroadcastFn, InvalidateFn, KernelFlush, SymbolResolver, TlbControl, TlbStrategy,
};

#[cfg(any(test, feature = "software-emulation"))]
pub use software::EmulatedMemory;

#[cfg(feature = "std")]
pub use physmem::PhysMemFile;
