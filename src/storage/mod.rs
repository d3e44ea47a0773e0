//! Scan directory layout and persistence helpers.
//!
//! Everything is written incrementally as it is produced: a run that stops
//! half-way leaves every tile and flake found so far on disk.

mod layout;
mod natural;
mod records;

pub use layout::{
    read_json, sorted_files, write_json, PassDirectory, ScanDirectory, FLATFIELD_FILE, MASK_FILE,
    OVERVIEW_COMPRESSED_FILE, OVERVIEW_FILE, SCAN_AREA_MAP_FILE, SCAN_META_FILE,
};
pub use natural::{natural_cmp, sort_natural};
pub use records::ScanMeta;
