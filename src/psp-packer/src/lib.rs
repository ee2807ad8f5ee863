// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Packaging of AMD PSP and BIOS firmware directories into a flash image.
//!
//! The packager lays out, in a single `0xFF`-filled buffer, the Embedded Firmware Structure
//! (EFS), the PSP and BIOS directory tables (flat, two-level or A/B redundant) and the
//! firmware blobs they reference. Every placement goes through [`context::BuildContext`],
//! which owns the write cursor and converts image offsets into the address each consumer
//! expects.

use std::path::Path;

pub mod bios;
pub mod catalog;
pub mod combo;
pub mod config;
pub mod context;
pub mod directory;
pub mod efs;
pub mod layout;
pub mod logger;
pub mod manifest;
pub mod pack;
pub mod psp;
pub mod signed;
pub mod types;

pub use config::{PackOptions, Topology, Variant};
pub use context::{AddressMode, BuildContext, Offset};
pub use pack::{PackedImage, pack};
pub use types::Soc;

/// Alignment of directory tables.
pub const TABLE_ALIGNMENT: u32 = 0x1000;
/// Alignment of firmware blobs.
pub const BLOB_ALIGNMENT: u32 = 0x100;
/// SPI flash erase block size.
pub const ERASE_ALIGNMENT: u32 = 0x1000;
pub const TABLE_ERASE_ALIGNMENT: u32 = max_u32(TABLE_ALIGNMENT, ERASE_ALIGNMENT);
pub const BLOB_ERASE_ALIGNMENT: u32 = max_u32(BLOB_ALIGNMENT, ERASE_ALIGNMENT);

/// Capacity of a PSP directory.
pub const MAX_PSP_ENTRIES: usize = 0x2f;
/// Capacity of a BIOS directory.
pub const MAX_BIOS_ENTRIES: usize = 0x3f;
/// Capacity of a combo directory.
pub const MAX_COMBO_ENTRIES: usize = 2;

/// Default location of the EFS in the flash image.
pub const AMD_ROMSIG_OFFSET: u32 = 0x20000;

const fn max_u32(a: u32, b: u32) -> u32 {
    if a > b { a } else { b }
}

#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum PackError {
    /// Could not access {0}: {1}
    Io(String, #[source] std::io::Error),
    /// Packing data causes overflow: offset {0:#x} is past the {1:#x} byte image
    Overflow(u64, u32),
    /// Invalid ROM size {0:#x}
    RomSize(u64),
    /// {0} entries ({1}) exceed max allowed items ({2})
    TooManyEntries(&'static str, usize, usize),
    /// The {0} table size {1:#x} is not 4K aligned
    TableSizeAlignment(&'static str, u32),
    /// Value {0:#x} does not fit the 32-bit field it is stored in
    FieldOverflow(u64),
    /// Configuration parsing error at line {0}: {1}
    Config(usize, String),
    /// Unknown SoC name {0:?}
    UnknownSoc(String),
    /// EFS read mode and SPI speed must be set
    EfsSpiMode,
    /// Invalid SPI micron flag {0:#x} for {1}
    MicronFlag(u8, Soc),
    /// PSP NVRAM location {0:#x} is not erase aligned
    NvramAlignment(u64),
    /// Error reading {0}: file is empty
    EmptyBlob(String),
    /// {0} ({1:#x} bytes) does not fit the {2:#x} bytes left in the image
    BlobTooLarge(String, u64, u64),
    /// APOB NV address provided, but no size
    ApobNvSize,
    /// APOB must have a destination
    ApobDestination,
    /// BIOS binary destination and size must be specified
    BiosBinPlacement,
    /// BIOS binary must have either a file or a source address
    BiosBinSource,
    /// At most {1} configurations can be combined, got {0}
    TooManyVariants(usize, usize),
    /// {0} does not carry a signed firmware header
    UnsignedBlob(String),
}

pub type Result<T> = std::result::Result<T, PackError>;

/// Read a whole file, reporting its path on failure.
pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|err| PackError::Io(path.display().to_string(), err))
}

/// Narrow a size or run-time address to the 32-bit field holding it.
pub(crate) fn to_u32(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| PackError::FieldOverflow(value))
}

/// Write a whole file, reporting its path on failure.
pub(crate) fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    std::fs::write(path, data).map_err(|err| PackError::Io(path.display().to_string(), err))
}
