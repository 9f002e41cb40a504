//! Locate signatures in the memory of a live 32-bit process.
//!
//! A pass walks the address space for writable committed regions, scans each
//! one for a set of named byte [`Signature`]s and publishes the resulting
//! [`LocationTable`]. [`SigFinder`] runs passes in the background.

pub mod error;
pub mod finder;
pub mod locations;
pub mod process;
pub mod region;
pub mod resolver;
pub mod signature;

pub mod scanner {
    pub use sigfinder_scanner::*;
}

pub use error::{Error, Result};
pub use finder::{PassCompleted, PassHandle, PassSummary, SigFinder, SUBSCRIBER_BUFFER};
pub use locations::LocationTable;
pub use process::{MemoryImage, ProcessMemory};
pub use region::{enumerate_regions, walk_regions, MemoryRegion, Protection, RegionState};
pub use resolver::{resolve, resolve_signatures, Resolution};
pub use signature::{load_signatures, parse_signatures, save_signatures, ScanResultType, Signature};
