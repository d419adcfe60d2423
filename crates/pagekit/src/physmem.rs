//! Physical memory through a file such as `/dev/mem` or a raw memory dump.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::{Error, PhysicalAddress, PhysicalMemory};

/// Physical memory backed by positioned reads and writes on a file.
///
/// File offset `n` holds physical address `n`.
#[derive(Debug)]
pub struct PhysMemFile {
    file: File,
}

impl PhysMemFile {
    /// Opens `path` for reading and, when `writable` is set, writing.
    pub fn open(path: impl AsRef<Path>, writable: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)?;
        Ok(Self { file })
    }

    pub fn from_file(file: File) -> Self {
        Self { file }
    }
}

impl PhysicalMemory for PhysMemFile {
    fn read_bytes(&self, paddr: PhysicalAddress, buf: &mut [u8]) -> Result<(), Error> {
        self.file.read_exact_at(buf, paddr.as_u64()).map_err(|err| {
            log::debug!("read of {} bytes at {paddr} failed: {err}", buf.len());
            Error::PhysicalAccess(paddr)
        })
    }

    fn write_bytes(&self, paddr: PhysicalAddress, buf: &[u8]) -> Result<(), Error> {
        self.file.write_all_at(buf, paddr.as_u64()).map_err(|err| {
            log::debug!("write of {} bytes at {paddr} failed: {err}", buf.len());
            Error::PhysicalAccess(paddr)
        })
    }
}
