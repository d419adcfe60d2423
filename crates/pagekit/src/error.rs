//! Errors surfaced by the engine and its collaborators.

use core::fmt;

use crate::{Pid, PhysicalAddress, TlbStrategy};

/// Errors that can occur while resolving or editing page tables.
///
/// A walk that stops at a non-present level is not an error; it is reported as a
/// partial [`ResolvedEntrySet`](crate::ResolvedEntrySet).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The pid does not resolve to a live address space.
    ProcessNotFound(Pid),
    /// The operation has no implementation on this architecture or platform.
    UnsupportedPlatform(&'static str),
    /// A required kernel-internal function could not be located.
    SymbolResolutionFailure(&'static str),
    /// The reference count for this address space would wrap.
    LockOverflow(Pid),
    /// Reading or writing physical memory at this address failed.
    PhysicalAccess(PhysicalAddress),
    /// The TLB strategy identifier is not one of the known strategies.
    UnknownTlbStrategy(u8),
    /// The TLB strategy is known but was not configured.
    TlbStrategyUnavailable(TlbStrategy),
    /// The level layout does not describe a usable paging hierarchy.
    InvalidGeometry,
    /// A paging control register holds a value we do not recognize.
    UnrecognizedConfiguration(u64),
    /// A page buffer does not match the page size.
    BufferSize { expected: usize, actual: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProcessNotFound(pid) => write!(f, "no address space for pid {pid}"),
            Self::UnsupportedPlatform(operation) => {
                write!(f, "{operation} is not supported on this platform")
            }
            Self::SymbolResolutionFailure(symbol) => {
                write!(f, "unable to resolve kernel symbol `{symbol}`")
            }
            Self::LockOverflow(pid) => write!(f, "lock count overflow for pid {pid}"),
            Self::PhysicalAccess(address) => {
                write!(f, "physical memory access failed at {address}")
            }
            Self::UnknownTlbStrategy(id) => write!(f, "unknown TLB invalidation strategy {id}"),
            Self::TlbStrategyUnavailable(strategy) => {
                write!(f, "TLB invalidation strategy {strategy:?} is not available")
            }
            Self::InvalidGeometry => write!(f, "invalid paging geometry"),
            Self::UnrecognizedConfiguration(value) => {
                write!(f, "unrecognized paging configuration {value:#x}")
            }
            Self::BufferSize { expected, actual } => {
                write!(f, "page buffer is {actual} bytes, expected {expected}")
            }
        }
    }
}

impl core::error::Error for Error {}
