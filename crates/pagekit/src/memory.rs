//! Access to the physical memory that holds page tables.

use crate::{Error, PhysicalAddress};

/// Word and byte access to physical memory.
///
/// Implementations decide how physical addresses are reached: a direct-map
/// pointer in kernel context, a file or a mapped window from user space, or a
/// plain buffer in tests. Entries are little-endian on every supported
/// architecture.
pub trait PhysicalMemory: Send + Sync {
    fn read_bytes(&self, paddr: PhysicalAddress, buf: &mut [u8]) -> Result<(), Error>;

    fn write_bytes(&self, paddr: PhysicalAddress, buf: &[u8]) -> Result<(), Error>;

    fn read_u64(&self, paddr: PhysicalAddress) -> Result<u64, Error> {
        let mut buf = [0u8; 8];
        self.read_bytes(paddr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn write_u64(&self, paddr: PhysicalAddress, value: u64) -> Result<(), Error> {
        self.write_bytes(paddr, &value.to_le_bytes())
    }
}

impl<T: PhysicalMemory + ?Sized> PhysicalMemory for &T {
    fn read_bytes(&self, paddr: PhysicalAddress, buf: &mut [u8]) -> Result<(), Error> {
        (**self).read_bytes(paddr, buf)
    }

    fn write_bytes(&self, paddr: PhysicalAddress, buf: &[u8]) -> Result<(), Error> {
        (**self).write_bytes(paddr, buf)
    }

    fn read_u64(&self, paddr: PhysicalAddress) -> Result<u64, Error> {
        (**self).read_u64(paddr)
    }

    fn write_u64(&self, paddr: PhysicalAddress, value: u64) -> Result<(), Error> {
        (**self).write_u64(paddr, value)
    }
}

impl<T: PhysicalMemory + ?Sized> PhysicalMemory for alloc::sync::Arc<T> {
    fn read_bytes(&self, paddr: PhysicalAddress, buf: &mut [u8]) -> Result<(), Error> {
        (**self).read_bytes(paddr, buf)
    }

    fn write_bytes(&self, paddr: PhysicalAddress, buf: &[u8]) -> Result<(), Error> {
        (**self).write_bytes(paddr, buf)
    }

    fn read_u64(&self, paddr: PhysicalAddress) -> Result<u64, Error> {
        (**self).read_u64(paddr)
    }

    fn write_u64(&self, paddr: PhysicalAddress, value: u64) -> Result<(), Error> {
        (**self).write_u64(paddr, value)
    }
}

/// Physical memory reached through a linear kernel mapping at a fixed offset.
///
/// Word accesses are single volatile loads and stores, so a concurrent hardware
/// walker never observes a torn entry.
#[derive(Debug, Clone, Copy)]
pub struct DirectMap {
    offset: u64,
}

impl DirectMap {
    /// # Safety
    ///
    /// Every physical address the engine touches must be mapped, readable and
    /// writable at `offset + paddr` for as long as this value is used.
    pub const unsafe fn new(offset: u64) -> Self {
        Self { offset }
    }

    fn pointer(&self, paddr: PhysicalAddress) -> *mut u8 {
        self.offset.wrapping_add(paddr.as_u64()) as usize as *mut u8
    }
}

impl PhysicalMemory for DirectMap {
    fn read_bytes(&self, paddr: PhysicalAddress, buf: &mut [u8]) -> Result<(), Error> {
        // SAFETY: the mapping is guaranteed by the constructor's contract.
        unsafe {
            core::ptr::copy_nonoverlapping(self.pointer(paddr), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    fn write_bytes(&self, paddr: PhysicalAddress, buf: &[u8]) -> Result<(), Error> {
        // SAFETY: the mapping is guaranteed by the constructor's contract.
        unsafe {
            core::ptr::copy_nonoverlapping(buf.as_ptr(), self.pointer(paddr), buf.len());
        }
        Ok(())
    }

    fn read_u64(&self, paddr: PhysicalAddress) -> Result<u64, Error> {
        if !paddr.is_aligned(8) {
            return Err(Error::PhysicalAccess(paddr));
        }
        // SAFETY: mapped per the constructor's contract and aligned above.
        Ok(unsafe { core::ptr::read_volatile(self.pointer(paddr) as *const u64) })
    }

    fn write_u64(&self, paddr: PhysicalAddress, value: u64) -> Result<(), Error> {
        if !paddr.is_aligned(8) {
            return Err(Error::PhysicalAccess(paddr));
        }
        // SAFETY: mapped per the constructor's contract and aligned above.
        unsafe { core::ptr::write_volatile(self.pointer(paddr) as *mut u64, value) };
        Ok(())
    }
}

/// A bounded window of physical memory mapped into the caller's address space.
///
/// Physical address `base` corresponds to the first byte of the window. Accesses
/// outside `[base, base + len)` fail with [`Error::PhysicalAccess`].
#[derive(Debug)]
pub struct MappedWindow {
    ptr: *mut u8,
    len: usize,
    base: PhysicalAddress,
}

// SAFETY: the window is plain memory; the engine serializes writers through the
// address-space lock.
unsafe impl Send for MappedWindow {}
// SAFETY: see above.
unsafe impl Sync for MappedWindow {}

impl MappedWindow {
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for the lifetime of
    /// the window, and must be at least 8-byte aligned.
    pub unsafe fn from_raw_parts(ptr: *mut u8, len: usize, base: PhysicalAddress) -> Self {
        Self { ptr, len, base }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn offset(&self, paddr: PhysicalAddress, size: usize) -> Result<usize, Error> {
        let start = paddr
            .as_u64()
            .checked_sub(self.base.as_u64())
            .ok_or(Error::PhysicalAccess(paddr))?;
        let start = usize::try_from(start).map_err(|_| Error::PhysicalAccess(paddr))?;
        match start.checked_add(size) {
            Some(end) if end <= self.len => Ok(start),
            _ => Err(Error::PhysicalAccess(paddr)),
        }
    }
}

impl PhysicalMemory for MappedWindow {
    fn read_bytes(&self, paddr: PhysicalAddress, buf: &mut [u8]) -> Result<(), Error> {
        let offset = self.offset(paddr, buf.len())?;
        // SAFETY: bounds checked above; validity guaranteed by the constructor.
        unsafe {
            core::ptr::copy_nonoverlapping(self.ptr.add(offset), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    fn write_bytes(&self, paddr: PhysicalAddress, buf: &[u8]) -> Result<(), Error> {
        let offset = self.offset(paddr, buf.len())?;
        // SAFETY: bounds checked above; validity guaranteed by the constructor.
        unsafe {
            core::ptr::copy_nonoverlapping(buf.as_ptr(), self.ptr.add(offset), buf.len());
        }
        Ok(())
    }

    fn read_u64(&self, paddr: PhysicalAddress) -> Result<u64, Error> {
        if !paddr.is_aligned(8) {
            return Err(Error::PhysicalAccess(paddr));
        }
        let offset = self.offset(paddr, 8)?;
        // SAFETY: in bounds and aligned because the window base pointer is.
        Ok(unsafe { core::ptr::read_volatile(self.ptr.add(offset) as *const u64) })
    }

    fn write_u64(&self, paddr: PhysicalAddress, value: u64) -> Result<(), Error> {
        if !paddr.is_aligned(8) {
            return Err(Error::PhysicalAccess(paddr));
        }
        let offset = self.offset(paddr, 8)?;
        // SAFETY: in bounds and aligned because the window base pointer is.
        unsafe { core::ptr::write_volatile(self.ptr.add(offset) as *mut u64, value) };
        Ok(())
    }
}
