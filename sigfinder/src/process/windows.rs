use std::ffi::c_void;
use std::io;

use tracing::trace;
use windows::Win32::Foundation::{CloseHandle, ERROR_INVALID_PARAMETER, HANDLE};
use windows::Win32::System::Diagnostics::Debug::ReadProcessMemory;
use windows::Win32::System::Memory::{VirtualQueryEx, MEMORY_BASIC_INFORMATION};
use windows::Win32::System::Threading::{
    OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
};

use crate::error::{Error, Result};
use crate::region::{MemoryRegion, Protection, RegionState};

use super::ProcessMemory;

/// A live process opened with query and read rights
pub struct WindowsProcess {
    pid: u32,
    handle: HANDLE,
}

// process handles may be used from any thread
unsafe impl Send for WindowsProcess {}
unsafe impl Sync for WindowsProcess {}

fn last_error() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

impl WindowsProcess {
    pub fn open(pid: u32) -> Result<Self> {
        let handle = unsafe {
            OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_VM_READ, false, pid)
        }
        .map_err(|e| io::Error::new(io::ErrorKind::PermissionDenied, e))?;
        trace!(pid, "opened process");
        Ok(Self { pid, handle })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for WindowsProcess {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}

impl ProcessMemory for WindowsProcess {
    fn query_region(&self, address: u32) -> Result<Option<MemoryRegion>> {
        let mut mbi = MEMORY_BASIC_INFORMATION::default();
        let written = unsafe {
            VirtualQueryEx(
                self.handle,
                Some(address as usize as *const c_void),
                &mut mbi,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };

        if written == 0 {
            let code = last_error();
            // past the highest user-mode address
            if code == ERROR_INVALID_PARAMETER.0 as i32 {
                return Ok(None);
            }
            return Err(Error::Enumeration {
                address,
                message: io::Error::from_raw_os_error(code).to_string(),
            });
        }

        let Ok(base_address) = u32::try_from(mbi.BaseAddress as usize) else {
            return Ok(None);
        };
        let size = u32::try_from(mbi.RegionSize).unwrap_or(u32::MAX);

        Ok(Some(MemoryRegion::new(
            base_address,
            size,
            RegionState::from_bits_retain(mbi.State.0),
            Protection::from_bits_retain(mbi.Protect.0),
        )))
    }

    fn read_bytes(&self, address: u32, size: u32) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; size as usize];
        let mut read = 0usize;
        let result = unsafe {
            ReadProcessMemory(
                self.handle,
                address as usize as *const c_void,
                buffer.as_mut_ptr() as *mut c_void,
                buffer.len(),
                Some(&mut read as *mut usize),
            )
        };

        if result.is_err() || read != buffer.len() {
            return Err(Error::MemoryRead {
                address,
                size,
                code: last_error(),
            });
        }
        Ok(buffer)
    }
}
