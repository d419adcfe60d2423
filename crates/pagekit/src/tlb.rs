//! TLB invalidation strategies.
//!
//! Two strategies exist. The kernel strategy calls an invalidation routine located
//! in the running kernel, usually through symbol lookup because it is not
//! exported. The custom strategy calls a plain function supplied at construction
//! and, when a broadcast hook is installed, runs it on every processor so it reaches
//! as far as the kernel routine does. The active strategy is a single atomic cell;
//! switching while another thread invalidates is last-writer-wins.

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::{Error, VirtualAddress};

/// Invalidation routine used by the custom strategy.
pub type InvalidateFn = fn(VirtualAddress);

/// Runs an invalidation routine on every processor and waits for all of them.
pub type BroadcastFn = fn(InvalidateFn, VirtualAddress);

/// Invalidation routine located in the running kernel.
pub type KernelFlush = unsafe extern "C" fn(u64);

/// Selectable invalidation strategy, numbered as on the command interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TlbStrategy {
    Kernel = 0,
    Custom = 1,
}

impl TryFrom<u8> for TlbStrategy {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self, Error> {
        match id {
            0 => Ok(Self::Kernel),
            1 => Ok(Self::Custom),
            _ => {
                log::warn!("unknown TLB invalidation strategy {id}");
                Err(Error::UnknownTlbStrategy(id))
            }
        }
    }
}

/// Looks up addresses of kernel-internal functions.
pub trait SymbolResolver {
    fn lookup(&self, name: &str) -> Option<usize>;
}

/// Holds both strategies and the currently active one.
pub struct TlbControl {
    kernel: Option<KernelFlush>,
    custom: InvalidateFn,
    broadcast: Option<BroadcastFn>,
    active: AtomicU8,
}

impl TlbControl {
    /// Only the custom strategy, which is active.
    pub const fn new(custom: InvalidateFn) -> Self {
        Self {
            kernel: None,
            custom,
            broadcast: None,
            active: AtomicU8::new(TlbStrategy::Custom as u8),
        }
    }

    /// A control that invalidates nothing, for memory images with no live TLB.
    pub const fn none() -> Self {
        fn discard(_: VirtualAddress) {}
        Self::new(discard)
    }

    /// The custom strategy runs the native flush on every processor through
    /// `run_on_each_cpu`, which the embedding kernel supplies.
    #[cfg(any(
        target_arch = "x86_64",
        target_arch = "aarch64",
        target_arch = "riscv64"
    ))]
    pub fn native(run_on_each_cpu: BroadcastFn) -> Self {
        #[cfg(target_arch = "x86_64")]
        let flush = crate::x86_64::hw::flush_all_contexts;
        #[cfg(target_arch = "aarch64")]
        let flush = crate::aarch64::hw::flush_local;
        #[cfg(target_arch = "riscv64")]
        let flush = crate::riscv64::hw::flush_local;

        Self::new(flush).with_broadcast(run_on_each_cpu)
    }

    /// Runs the custom routine through `run_on_each_cpu` instead of only locally.
    pub fn with_broadcast(mut self, run_on_each_cpu: BroadcastFn) -> Self {
        self.broadcast = Some(run_on_each_cpu);
        self
    }

    /// Adds the kernel strategy and makes it active.
    ///
    /// # Safety
    ///
    /// `flush` must be safe to call with any virtual address from the contexts the
    /// engine runs in.
    pub unsafe fn with_kernel(mut self, flush: KernelFlush) -> Self {
        self.kernel = Some(flush);
        self.active = AtomicU8::new(TlbStrategy::Kernel as u8);
        self
    }

    /// Resolves `symbol` and uses it as the kernel strategy.
    ///
    /// Fails with [`Error::SymbolResolutionFailure`] if the symbol is missing, in which
    /// case the engine must not be brought up with this control.
    ///
    /// # Safety
    ///
    /// The resolved address must be a function with the [`KernelFlush`] signature.
    pub unsafe fn from_symbols(
        resolver: &dyn SymbolResolver,
        symbol: &'static str,
        custom: InvalidateFn,
    ) -> Result<Self, Error> {
        let address = match resolver.lookup(symbol) {
            Some(address) if address != 0 => address,
            _ => {
                log::warn!("could not resolve `{symbol}`");
                return Err(Error::SymbolResolutionFailure(symbol));
            }
        };
        // SAFETY: non-null, and the signature is guaranteed by the caller.
        let flush = unsafe { core::mem::transmute::<usize, KernelFlush>(address) };
        // SAFETY: forwarded from the caller.
        Ok(unsafe { Self::new(custom).with_kernel(flush) })
    }

    pub fn strategy(&self) -> TlbStrategy {
        match self.active.load(Ordering::Relaxed) {
            0 => TlbStrategy::Kernel,
            _ => TlbStrategy::Custom,
        }
    }

    /// Activates the strategy numbered `id`.
    pub fn switch(&self, id: u8) -> Result<TlbStrategy, Error> {
        let strategy = TlbStrategy::try_from(id)?;
        if strategy == TlbStrategy::Kernel && self.kernel.is_none() {
            log::warn!("kernel TLB invalidation is not available");
            return Err(Error::TlbStrategyUnavailable(strategy));
        }
        self.active.store(strategy as u8, Ordering::Relaxed);
        Ok(strategy)
    }

    /// Invalidates the translation for `vaddr` with the active strategy.
    pub fn invalidate(&self, vaddr: VirtualAddress) {
        match (self.strategy(), self.kernel) {
            // SAFETY: callability was promised when the kernel strategy was installed.
            (TlbStrategy::Kernel, Some(flush)) => unsafe { flush(vaddr.as_u64()) },
            _ => match self.broadcast {
                Some(run_on_each_cpu) => run_on_each_cpu(self.custom, vaddr),
                None => (self.custom)(vaddr),
            },
        }
    }
}

impl Default for TlbControl {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for TlbControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlbControl")
            .field("strategy", &self.strategy())
            .field("kernel", &self.kernel.is_some())
            .field("broadcast", &self.broadcast.is_some())
            .finish()
    }
}
