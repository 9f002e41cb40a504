//! Memory regions and the walk over a process address space

use bitflags::bitflags;
use tracing::{debug, warn};

use crate::process::ProcessMemory;

bitflags! {
    /// Allocation state of a region (`MEM_*` values)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RegionState: u32 {
        const COMMIT = 0x1000;
        const RESERVE = 0x2000;
        const FREE = 0x10000;
    }
}

bitflags! {
    /// Page protection of a region (`PAGE_*` values)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Protection: u32 {
        const NOACCESS = 0x01;
        const READONLY = 0x02;
        const READWRITE = 0x04;
        const WRITECOPY = 0x08;
        const EXECUTE = 0x10;
        const EXECUTE_READ = 0x20;
        const EXECUTE_READWRITE = 0x40;
        const EXECUTE_WRITECOPY = 0x80;
        const GUARD = 0x100;
        const NOCACHE = 0x200;
        const WRITECOMBINE = 0x400;

        const WRITABLE = Self::READWRITE.bits()
            | Self::WRITECOPY.bits()
            | Self::EXECUTE_READWRITE.bits()
            | Self::EXECUTE_WRITECOPY.bits()
            | Self::GUARD.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base_address: u32,
    pub size: u32,
    pub state: RegionState,
    pub protect: Protection,
}

impl MemoryRegion {
    pub fn new(base_address: u32, size: u32, state: RegionState, protect: Protection) -> Self {
        Self {
            base_address,
            size,
            state,
            protect,
        }
    }

    /// Committed read-write region, the common case for heap and data pages
    pub fn committed(base_address: u32, size: u32) -> Self {
        Self::new(
            base_address,
            size,
            RegionState::COMMIT,
            Protection::READWRITE,
        )
    }

    /// First address past the region, `None` if it would leave the 32-bit space
    pub fn end(&self) -> Option<u32> {
        self.base_address.checked_add(self.size)
    }

    pub fn contains(&self, address: u32) -> bool {
        address >= self.base_address && (address - self.base_address) < self.size
    }

    /// Committed memory that may hold live, mutable data and is safe to read
    pub fn is_scannable(&self) -> bool {
        self.state.contains(RegionState::COMMIT)
            && self.protect.intersects(Protection::WRITABLE)
            && !self.protect.contains(Protection::GUARD)
            && !self.protect.contains(Protection::NOACCESS)
    }
}

/// Walk the address space of `process` from address 0 and collect every
/// scannable region.
///
/// A failing query ends the walk early; whatever was collected up to that point
/// is returned.
pub fn enumerate_regions<P: ProcessMemory + ?Sized>(process: &P) -> Vec<MemoryRegion> {
    let mut queried = 0usize;
    let mut regions = vec![];
    walk(process, |region| {
        queried += 1;
        if region.is_scannable() {
            regions.push(region);
        }
    });
    debug!(queried, kept = regions.len(), "enumerated regions");
    regions
}

/// Every region of the address space, scannable or not
pub fn walk_regions<P: ProcessMemory + ?Sized>(process: &P) -> Vec<MemoryRegion> {
    let mut regions = vec![];
    walk(process, |region| regions.push(region));
    regions
}

fn walk<P: ProcessMemory + ?Sized>(process: &P, mut visit: impl FnMut(MemoryRegion)) {
    let mut address = 0u32;
    loop {
        let region = match process.query_region(address) {
            Ok(Some(region)) if region.size != 0 => region,
            Ok(_) => break,
            Err(e) => {
                warn!("region walk stopped early: {e}");
                break;
            }
        };

        visit(region);

        match region.end() {
            Some(next) if next > address => address = next,
            _ => break,
        }
    }
}
