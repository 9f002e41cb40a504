use std::io;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::{Error, Result};
use crate::region::{MemoryRegion, Protection, RegionState};

use super::ProcessMemory;

/// A live process read through `/proc/<pid>/maps` and `process_vm_readv`.
///
/// Mappings are snapshotted when the process is opened and re-read whenever a
/// walk starts over at address 0.
pub struct LinuxProcess {
    pid: libc::pid_t,
    mappings: Mutex<Vec<MemoryRegion>>,
}

impl LinuxProcess {
    pub fn open(pid: u32) -> Result<Self> {
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "PID out of range"))?;
        let mappings = read_maps(pid)?;
        Ok(Self {
            pid,
            mappings: Mutex::new(mappings),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid as u32
    }

    /// Re-read the process mappings
    pub fn refresh(&self) -> Result<()> {
        *self.mappings.lock() = read_maps(self.pid)?;
        Ok(())
    }
}

fn read_maps(pid: libc::pid_t) -> Result<Vec<MemoryRegion>> {
    let maps = std::fs::read_to_string(format!("/proc/{pid}/maps"))?;
    let mappings = parse_maps(&maps)?;
    trace!(pid, count = mappings.len(), "read process maps");
    Ok(mappings)
}

/// Parse the contents of a `maps` file, keeping whatever lies within the 32-bit
/// address space
fn parse_maps(maps: &str) -> Result<Vec<MemoryRegion>> {
    let mut mappings = vec![];
    for line in maps.lines() {
        let mut split = line.split_whitespace();
        let (Some(range), Some(permissions)) = (split.next(), split.next()) else {
            continue;
        };
        let parsed = range.split_once('-').and_then(|(start, end)| {
            Some((
                u64::from_str_radix(start, 16).ok()?,
                u64::from_str_radix(end, 16).ok()?,
            ))
        });
        let Some((start, end)) = parsed else {
            return Err(Error::Enumeration {
                address: 0,
                message: format!("failed to parse line of maps: {line:?}"),
            });
        };

        let Ok(base) = u32::try_from(start) else {
            continue;
        };
        let end = end.min(1 << 32);
        if end <= start {
            continue;
        }
        // a mapping reaching the very top of the space loses its last byte
        let size = u32::try_from(end - start).unwrap_or(u32::MAX);

        mappings.push(MemoryRegion::new(
            base,
            size,
            RegionState::COMMIT,
            protection(permissions),
        ));
    }
    mappings.sort_by_key(|r| r.base_address);
    Ok(mappings)
}

fn protection(permissions: &str) -> Protection {
    let flags = permissions.as_bytes();
    let flag = |i: usize, c: u8| flags.get(i) == Some(&c);
    match (flag(0, b'r'), flag(1, b'w'), flag(2, b'x')) {
        (true, true, true) => Protection::EXECUTE_READWRITE,
        (true, true, false) => Protection::READWRITE,
        (true, false, true) => Protection::EXECUTE_READ,
        (true, false, false) => Protection::READONLY,
        (false, _, true) => Protection::EXECUTE,
        (false, _, false) => Protection::NOACCESS,
    }
}

fn query(mappings: &[MemoryRegion], address: u32) -> Option<MemoryRegion> {
    if let Some(region) = mappings.iter().find(|r| r.contains(address)) {
        return Some(*region);
    }
    mappings
        .iter()
        .find(|r| r.base_address > address)
        .map(|next| {
            MemoryRegion::new(
                address,
                next.base_address - address,
                RegionState::FREE,
                Protection::NOACCESS,
            )
        })
}

impl ProcessMemory for LinuxProcess {
    fn query_region(&self, address: u32) -> Result<Option<MemoryRegion>> {
        if address == 0 {
            self.refresh()?;
        }
        Ok(query(&self.mappings.lock(), address))
    }

    fn read_bytes(&self, address: u32, size: u32) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; size as usize];
        let read = unsafe {
            libc::process_vm_readv(
                self.pid,
                &libc::iovec {
                    iov_base: buffer.as_mut_ptr() as _,
                    iov_len: buffer.len(),
                },
                1,
                &libc::iovec {
                    iov_base: address as usize as _,
                    iov_len: buffer.len(),
                },
                1,
                0,
            )
        };

        if read == -1 {
            return Err(Error::MemoryRead {
                address,
                size,
                code: io::Error::last_os_error().raw_os_error().unwrap_or(0),
            });
        }
        if read as usize != buffer.len() {
            return Err(Error::MemoryRead {
                address,
                size,
                code: libc::EFAULT,
            });
        }
        Ok(buffer)
    }
}
