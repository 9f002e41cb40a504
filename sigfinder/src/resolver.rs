//! Resolve signatures against a region snapshot

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::locations::LocationTable;
use crate::process::ProcessMemory;
use crate::region::MemoryRegion;
use crate::scanner::Pattern;
use crate::signature::{ScanResultType, Signature};

/// Outcome of a resolution along with what it took to get there
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub locations: LocationTable,
    /// Regions actually read from the source
    pub regions_read: usize,
    /// Signatures skipped because their pattern failed to compile
    pub invalid: usize,
}

struct Pending<'a> {
    signature: &'a Signature,
    pattern: Pattern,
    value: Option<u32>,
}

/// Resolve every signature against `regions`, first match in region order wins.
pub fn resolve_signatures<P: ProcessMemory + ?Sized>(
    signatures: &[Signature],
    regions: &[MemoryRegion],
    source: &P,
) -> Result<LocationTable> {
    resolve(signatures, regions, source).map(|r| r.locations)
}

/// Like [`resolve_signatures`], also reporting how much work was done.
///
/// Each region is read at most once and only while some signature is still
/// unresolved. A failed read aborts the whole resolution.
#[tracing::instrument(
    level = "debug",
    skip_all,
    fields(signatures = signatures.len(), regions = regions.len())
)]
pub fn resolve<P: ProcessMemory + ?Sized>(
    signatures: &[Signature],
    regions: &[MemoryRegion],
    source: &P,
) -> Result<Resolution> {
    let mut keys = HashSet::new();
    for signature in signatures {
        if !keys.insert(signature.key.as_str()) {
            return Err(Error::DuplicateSignature(signature.key.clone()));
        }
    }

    let mut invalid = 0;
    let mut pending = vec![];
    for signature in signatures {
        match signature.compile() {
            Ok(pattern) => pending.push(Pending {
                signature,
                pattern,
                value: None,
            }),
            Err(e) => {
                warn!("skipping signature: {e}");
                invalid += 1;
            }
        }
    }

    let mut regions_read = 0;
    for region in regions {
        if pending.iter().all(|p| p.value.is_some()) {
            break;
        }

        let span = tracing::debug_span!(
            "region",
            base = %format!("{:#010x}", region.base_address),
            size = region.size,
            matches = tracing::field::Empty
        )
        .entered();

        let data = source.read_bytes(region.base_address, region.size)?;
        regions_read += 1;

        let mut matches = 0;
        for p in pending.iter_mut().filter(|p| p.value.is_none()) {
            if let Some(index) = p.pattern.find(&data) {
                let value = resolve_value(p.signature, &p.pattern, region, &data, index, source);
                debug!(
                    key = %p.signature.key,
                    "matched at {:#010x} -> {value:#010x}",
                    region.base_address.wrapping_add(index as u32)
                );
                p.value = Some(value);
                matches += 1;
            }
        }

        span.record("matches", matches);
    }

    let mut locations = LocationTable::new();
    for p in pending {
        if p.value.is_none() {
            debug!(key = %p.signature.key, "no match");
        }
        locations.insert(&p.signature.key, p.value.unwrap_or(0));
    }

    Ok(Resolution {
        locations,
        regions_read,
        invalid,
    })
}

/// Turn a match at `index` of the region buffer into the value the signature asks for
fn resolve_value<P: ProcessMemory + ?Sized>(
    signature: &Signature,
    pattern: &Pattern,
    region: &MemoryRegion,
    data: &[u8],
    index: usize,
    source: &P,
) -> u32 {
    let index = index as i64;
    let offset = signature.offset as u32;
    let value = match signature.result_type {
        ScanResultType::AddressStartOfSig => {
            return region
                .base_address
                .wrapping_add(index as u32)
                .wrapping_add(offset)
        }
        ScanResultType::ValueBeforeSig => read_value(region, data, index - 4, source),
        ScanResultType::ValueAfterSig => {
            read_value(region, data, index + pattern.len() as i64, source)
        }
        ScanResultType::ValueAtWildCard => {
            let wildcard = pattern.first_wildcard().unwrap_or(pattern.len());
            read_value(region, data, index + wildcard as i64, source)
        }
    };
    value.wrapping_add(offset)
}

/// Little-endian u32 at `position` relative to the region start, going back to
/// the source when it straddles the buffer
fn read_value<P: ProcessMemory + ?Sized>(
    region: &MemoryRegion,
    data: &[u8],
    position: i64,
    source: &P,
) -> u32 {
    if let Ok(start) = usize::try_from(position) {
        if let Some(&[a, b, c, d]) = data.get(start..start + 4) {
            return u32::from_le_bytes([a, b, c, d]);
        }
    }

    let address = region.base_address.wrapping_add(position as u32);
    match source.read_u32(address) {
        Ok(value) => value,
        Err(e) => {
            warn!("value outside of region could not be read: {e}");
            0
        }
    }
}
