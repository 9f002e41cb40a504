use std::fs;
use std::io;
use std::path::Path;

use crate::error::{Error, Result};
use crate::region::{MemoryRegion, Protection, RegionState};

use super::ProcessMemory;

struct Segment {
    region: MemoryRegion,
    data: Vec<u8>,
}

/// An address space held in memory: a set of non-overlapping segments, each with
/// its own protection. Gaps between segments report as free.
#[derive(Default)]
pub struct MemoryImage {
    segments: Vec<Segment>,
}

impl MemoryImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a raw memory dump as a single committed read-write region at `base`
    pub fn from_file<P: AsRef<Path>>(path: P, base: u32) -> Result<Self> {
        let data = fs::read(path)?;
        Self::new().with_data(base, data)
    }

    /// Add a committed read-write segment
    pub fn with_data(self, base: u32, data: impl Into<Vec<u8>>) -> Result<Self> {
        self.with_segment(base, Protection::READWRITE, data)
    }

    /// Add a committed segment with the given protection.
    ///
    /// Fails if the segment is empty, leaves the 32-bit space or overlaps an
    /// existing one.
    pub fn with_segment(
        mut self,
        base: u32,
        protect: Protection,
        data: impl Into<Vec<u8>>,
    ) -> Result<Self> {
        let data = data.into();
        let end = u32::try_from(data.len())
            .ok()
            .filter(|size| *size > 0)
            .and_then(|size| base.checked_add(size));
        let Some(end) = end else {
            return Err(invalid_segment(format!(
                "segment of {:#x} bytes does not fit at {base:#010x}",
                data.len()
            )));
        };
        let overlaps = self
            .segments
            .iter()
            .any(|s| base < s.region.base_address + s.region.size && s.region.base_address < end);
        if overlaps {
            return Err(invalid_segment(format!(
                "segment at {base:#010x} overlaps an existing segment"
            )));
        }

        let region = MemoryRegion::new(base, end - base, RegionState::COMMIT, protect);
        let index = self
            .segments
            .partition_point(|s| s.region.base_address < base);
        self.segments.insert(index, Segment { region, data });
        Ok(self)
    }

    pub fn regions(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.segments.iter().map(|s| &s.region)
    }

    fn segment_containing(&self, address: u32) -> Option<&Segment> {
        self.segments.iter().find(|s| s.region.contains(address))
    }
}

fn invalid_segment(message: String) -> Error {
    io::Error::new(io::ErrorKind::InvalidInput, message).into()
}

impl ProcessMemory for MemoryImage {
    fn query_region(&self, address: u32) -> Result<Option<MemoryRegion>> {
        if let Some(segment) = self.segment_containing(address) {
            return Ok(Some(segment.region));
        }
        // free gap up to the next segment
        Ok(self
            .segments
            .iter()
            .find(|s| s.region.base_address > address)
            .map(|next| {
                MemoryRegion::new(
                    address,
                    next.region.base_address - address,
                    RegionState::FREE,
                    Protection::NOACCESS,
                )
            }))
    }

    fn read_bytes(&self, address: u32, size: u32) -> Result<Vec<u8>> {
        let size_bytes = size as usize;
        let mut out = Vec::with_capacity(size_bytes);
        let mut cursor = address;
        // reads may run across adjacent segments
        while out.len() < size_bytes {
            let Some(segment) = self.segment_containing(cursor) else {
                return Err(Error::MemoryRead {
                    address,
                    size,
                    code: 0,
                });
            };
            let start = (cursor - segment.region.base_address) as usize;
            let take = (size_bytes - out.len()).min(segment.data.len() - start);
            out.extend_from_slice(&segment.data[start..start + take]);
            cursor = cursor.wrapping_add(take as u32);
        }
        Ok(out)
    }
}
