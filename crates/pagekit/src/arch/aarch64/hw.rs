//! Native AArch64 register and instruction access.

use core::arch::asm;

use crate::VirtualAddress;

/// Invalidates the translation for `vaddr` in every ASID, broadcast to the inner
/// shareable domain.
pub fn flush_local(vaddr: VirtualAddress) {
    let page = vaddr.as_u64() >> 12;
    // SAFETY: TLB maintenance only discards cached translations.
    unsafe {
        asm!(
            "dsb ishst",
            "tlbi vaae1is, {page}",
            "dsb ish",
            "isb",
            page = in(reg) page,
            options(nostack, preserves_flags),
        );
    }
}

/// `DSB SY; DSB ISH; ISB`
pub fn serialize() {
    // SAFETY: barriers have no effect beyond ordering.
    unsafe {
        asm!("dsb sy", "dsb ish", "isb", options(nostack, preserves_flags));
    }
}

/// `ISB; DSB ISH; DSB SY`, the closing half of the full serializing barrier.
pub fn serialize_trailing() {
    // SAFETY: barriers have no effect beyond ordering.
    unsafe {
        asm!("isb", "dsb ish", "dsb sy", options(nostack, preserves_flags));
    }
}

/// # Safety
///
/// Requires EL1.
pub unsafe fn read_tcr() -> u64 {
    let value: u64;
    // SAFETY: guaranteed by the caller.
    unsafe {
        asm!("mrs {}, tcr_el1", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

/// # Safety
///
/// Requires EL1.
pub unsafe fn read_mair() -> u64 {
    let value: u64;
    // SAFETY: guaranteed by the caller.
    unsafe {
        asm!("mrs {}, mair_el1", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

/// # Safety
///
/// Requires EL1. Mappings that rely on the old attributes must be handled by the caller.
pub unsafe fn write_mair(value: u64) {
    // SAFETY: guaranteed by the caller.
    unsafe {
        asm!("msr mair_el1, {}", "isb", in(reg) value, options(nostack, preserves_flags));
    }
}
