//! Native x86_64 register and instruction access.

use ::x86_64::instructions::interrupts;
use ::x86_64::registers::control::{Cr4, Cr4Flags};
use ::x86_64::registers::model_specific::Msr;

use crate::VirtualAddress;

use super::IA32_PAT;

/// Drops the translation for `vaddr` on the current processor in every PCID,
/// global entries included.
///
/// `invlpg` only reaches the current PCID, and the edited address space is usually
/// not the current one, so the whole TLB is dropped by toggling CR4.PGE.
pub fn flush_all_contexts(_vaddr: VirtualAddress) {
    interrupts::without_interrupts(|| {
        let cr4 = Cr4::read_raw();
        // SAFETY: PGE is restored immediately; toggling it only discards translations.
        unsafe {
            Cr4::write_raw(cr4 ^ Cr4Flags::PAGE_GLOBAL.bits());
            Cr4::write_raw(cr4);
        }
    });
}

/// `mfence; lfence`
pub fn serialize() {
    // SAFETY: fences have no effect beyond ordering.
    unsafe {
        core::arch::asm!("mfence", "lfence", options(nostack, preserves_flags));
    }
}

/// # Safety
///
/// Requires ring 0.
pub unsafe fn read_cr4() -> u64 {
    Cr4::read_raw()
}

/// # Safety
///
/// Requires ring 0.
pub unsafe fn read_pat() -> u64 {
    // SAFETY: the PAT MSR exists on every x86_64 processor.
    unsafe { Msr::new(IA32_PAT).read() }
}

/// # Safety
///
/// Requires ring 0. Changing the PAT while pages are mapped with the old types is
/// the caller's responsibility.
pub unsafe fn write_pat(value: u64) {
    let mut msr = Msr::new(IA32_PAT);
    // SAFETY: guaranteed by the caller.
    unsafe { msr.write(value) }
}
