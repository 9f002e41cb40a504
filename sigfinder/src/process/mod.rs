//! Sources of foreign memory
//!
//! - live processes: [`WindowsProcess`] and [`LinuxProcess`]
//! - raw dumps and fixtures: [`MemoryImage`]

mod image;
#[cfg(all(feature = "process", target_os = "linux"))]
mod linux;
#[cfg(all(feature = "process", windows))]
mod windows;

pub use image::MemoryImage;
#[cfg(all(feature = "process", target_os = "linux"))]
pub use linux::LinuxProcess;
#[cfg(all(feature = "process", windows))]
pub use windows::WindowsProcess;

use crate::error::{Error, Result};
use crate::region::MemoryRegion;

/// Read access to another address space.
pub trait ProcessMemory: Send + Sync {
    /// Describe the region containing `address`.
    ///
    /// Returns `Ok(None)` once `address` is past the last region.
    fn query_region(&self, address: u32) -> Result<Option<MemoryRegion>>;

    /// Read exactly `size` bytes starting at `address`.
    fn read_bytes(&self, address: u32, size: u32) -> Result<Vec<u8>>;

    fn read_u32(&self, address: u32) -> Result<u32> {
        let bytes = self.read_bytes(address, 4)?;
        let bytes: [u8; 4] = bytes.as_slice().try_into().map_err(|_| Error::MemoryRead {
            address,
            size: 4,
            code: 0,
        })?;
        Ok(u32::from_le_bytes(bytes))
    }
}

macro_rules! forward_process_memory {
    ($($ptr:ident)::+) => {
        impl<P: ProcessMemory + ?Sized> ProcessMemory for $($ptr)::+<P> {
            fn query_region(&self, address: u32) -> Result<Option<MemoryRegion>> {
                (**self).query_region(address)
            }
            fn read_bytes(&self, address: u32, size: u32) -> Result<Vec<u8>> {
                (**self).read_bytes(address, size)
            }
        }
    };
}

forward_process_memory!(std::sync::Arc);
forward_process_memory!(Box);

/// Open a live process with the backend for the current platform
#[cfg(all(feature = "process", any(windows, target_os = "linux")))]
pub fn open_process(pid: u32) -> Result<Box<dyn ProcessMemory>> {
    #[cfg(windows)]
    let process = WindowsProcess::open(pid)?;
    #[cfg(target_os = "linux")]
    let process = LinuxProcess::open(pid)?;
    Ok(Box::new(process))
}
