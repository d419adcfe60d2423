//! Native RISC-V register and instruction access.

use core::arch::asm;

use crate::VirtualAddress;

/// `sfence.vma` for one address in every address space on the current hart.
///
/// Other harts need their own call; see [`TlbControl::native`](crate::TlbControl::native).
pub fn flush_local(vaddr: VirtualAddress) {
    // SAFETY: flushing only discards cached translations.
    unsafe {
        asm!("sfence.vma {}, zero", in(reg) vaddr.as_u64(), options(nostack));
    }
}

/// `fence`
pub fn serialize() {
    // SAFETY: fences have no effect beyond ordering.
    unsafe {
        asm!("fence", options(nostack));
    }
}

/// # Safety
///
/// Requires S-mode.
pub unsafe fn read_satp() -> u64 {
    riscv::register::satp::read().bits() as u64
}
