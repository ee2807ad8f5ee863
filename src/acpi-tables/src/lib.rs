// Copyright © 2019 Intel Corporation
// Copyright 2023 Rivos, Inc.
// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Construction of firmware ACPI tables in a flat memory region.
//!
//! Every table is built as a [`SdtBuffer`] (create-then-fixup: records are appended and the
//! header length and checksum are patched afterwards), written at a monotonically advancing
//! cursor and registered into the RSDT and XSDT root tables.

use vm_memory::{GuestAddress, GuestMemory, GuestMemoryError};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub mod aml;
pub mod bert;
pub mod builder;
pub mod cedt;
pub mod dbg2;
pub mod dmar;
pub mod dsdt;
pub mod einj;
pub mod facs;
pub mod fadt;
pub mod hest;
pub mod hmat;
pub mod hpet;
pub mod lpit;
pub mod madt;
pub mod mcfg;
pub mod platform;
pub mod rsdp;
pub mod rsdt;
pub mod sdt;
pub mod slit;
pub mod spcr;
pub mod srat;
pub mod ssdt;
pub mod tpm;

pub use aml::Aml;
pub use builder::{AcpiTableWriter, TableGenerator, find_wakeup_vector, write_acpi_tables};
pub use fadt::Fadt;
pub use platform::{AcpiConfig, AcpiDevice, CbmemAllocator, CbmemId, PersistentMemory, Platform};
pub use rsdp::Rsdp;
pub use sdt::SdtBuffer;
pub(crate) use utils::checksum::checksum;

/// OEM name embedded in every table we generate.
pub const OEM_ID: [u8; 6] = *b"COREv4";
/// OEM table id embedded in every table we generate.
pub const ACPI_TABLE_CREATOR: [u8; 8] = *b"COREBOOT";
/// Creator id of the tables written by this crate.
pub const ASL_COMPILER_ID: [u8; 4] = *b"CORE";
/// Creator revision of the tables written by this crate.
pub const ASL_COMPILER_REVISION: u32 = 0x2023_0628;
/// Capacity of the RSDT and XSDT entry arrays.
pub const MAX_ACPI_TABLES: usize = 32;

/// Size of [`SdtHeader`] in bytes.
pub const SDT_HEADER_LEN: usize = std::mem::size_of::<SdtHeader>();

pub const ADDRESS_SPACE_MEMORY: u8 = 0;
pub const ADDRESS_SPACE_IO: u8 = 1;

pub const ACCESS_SIZE_UNDEFINED: u8 = 0;
pub const ACCESS_SIZE_BYTE: u8 = 1;
pub const ACCESS_SIZE_WORD: u8 = 2;
pub const ACCESS_SIZE_DWORD: u8 = 3;
pub const ACCESS_SIZE_QWORD: u8 = 4;

#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum AcpiError {
    /// Could not encode AML: {0}
    Aml(#[from] aml::AmlError),
    /// Guest memory error: {0}
    GuestMemory(#[from] GuestMemoryError),
    /// Invalid guest address
    InvalidGuestAddress,
    /// Could not allocate persistent memory: {0}
    VmAllocator(#[from] vm_allocator::Error),
    /// Table header is missing
    MissingHeader,
    /// Distance matrix for {0} localities is not square
    InvalidDistanceMatrix(usize),
    /// Table of {0} bytes does not fit a 32-bit length field
    TableTooLarge(usize),
    /// No valid RSDP at {0:#x}
    InvalidRsdp(u64),
}

pub type Result<T> = std::result::Result<T, AcpiError>;

/// ACPI type representing memory addresses
#[repr(C, packed)]
#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Clone, Copy, Debug, Default)]
pub struct GenericAddressStructure {
    pub address_space_id: u8,
    pub register_bit_width: u8,
    pub register_bit_offset: u8,
    pub access_size: u8,
    pub address: U64,
}

impl GenericAddressStructure {
    pub fn new(
        address_space_id: u8,
        register_bit_width: u8,
        register_bit_offset: u8,
        access_size: u8,
        address: u64,
    ) -> Self {
        Self {
            address_space_id,
            register_bit_width,
            register_bit_offset,
            access_size,
            address: U64::new(address),
        }
    }

    /// 64-bit wide memory register accessed as a quad word.
    pub fn memory_qword(address: u64) -> Self {
        Self::new(ADDRESS_SPACE_MEMORY, 64, 0, ACCESS_SIZE_QWORD, address)
    }
}

/// Header included in all System Descriptor Tables
#[repr(C, packed)]
#[derive(Clone, Debug, Copy, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct SdtHeader {
    pub signature: [u8; 4],
    pub length: U32,
    pub revision: u8,
    pub checksum: u8,
    pub oem_id: [u8; 6],
    pub oem_table_id: [u8; 8],
    pub oem_revision: U32,
    pub creator_id: [u8; 4],
    pub creator_revision: U32,
}

impl SdtHeader {
    pub fn new(signature: [u8; 4], length: u32, table_revision: u8) -> Self {
        SdtHeader {
            signature,
            length: U32::new(length),
            revision: table_revision,
            checksum: 0,
            oem_id: OEM_ID,
            oem_table_id: ACPI_TABLE_CREATOR,
            oem_revision: U32::ZERO,
            creator_id: ASL_COMPILER_ID,
            creator_revision: U32::new(ASL_COMPILER_REVISION),
        }
    }
}

/// The tables this crate knows how to describe, with the revision each one is emitted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Bert,
    Cedt,
    Dbg2,
    Dmar,
    Dsdt,
    Einj,
    Facs,
    Fadt,
    Hest,
    Hmat,
    Hpet,
    Lpit,
    Madt,
    Mcfg,
    Rsdt,
    Slit,
    Spcr,
    Srat,
    Ssdt,
    Tcpa,
    Tpm2,
    Xsdt,
}

impl TableKind {
    /// Four character signature of the table.
    pub const fn signature(self) -> [u8; 4] {
        match self {
            TableKind::Bert => *b"BERT",
            TableKind::Cedt => *b"CEDT",
            TableKind::Dbg2 => *b"DBG2",
            TableKind::Dmar => *b"DMAR",
            TableKind::Dsdt => *b"DSDT",
            TableKind::Einj => *b"EINJ",
            TableKind::Facs => *b"FACS",
            TableKind::Fadt => *b"FACP",
            TableKind::Hest => *b"HEST",
            TableKind::Hmat => *b"HMAT",
            TableKind::Hpet => *b"HPET",
            TableKind::Lpit => *b"LPIT",
            TableKind::Madt => *b"APIC",
            TableKind::Mcfg => *b"MCFG",
            TableKind::Rsdt => *b"RSDT",
            TableKind::Slit => *b"SLIT",
            TableKind::Spcr => *b"SPCR",
            TableKind::Srat => *b"SRAT",
            TableKind::Ssdt => *b"SSDT",
            TableKind::Tcpa => *b"TCPA",
            TableKind::Tpm2 => *b"TPM2",
            TableKind::Xsdt => *b"XSDT",
        }
    }

    /// Revision the table is emitted at.
    pub const fn revision(self) -> u8 {
        match self {
            TableKind::Fadt => 6,
            // ACPI 4.0/5.0: 3
            TableKind::Madt => 3,
            TableKind::Mcfg => 1,
            TableKind::Tcpa => 2,
            TableKind::Tpm2 => 4,
            TableKind::Ssdt => 2,
            TableKind::Srat => 3,
            TableKind::Hmat => 2,
            TableKind::Dmar => 1,
            TableKind::Slit => 1,
            TableKind::Hpet => 1,
            TableKind::Dbg2 => 0,
            TableKind::Facs => 1,
            TableKind::Rsdt => 1,
            TableKind::Xsdt => 1,
            TableKind::Einj => 1,
            TableKind::Hest => 1,
            TableKind::Bert => 1,
            TableKind::Cedt => 1,
            TableKind::Lpit => 0,
            TableKind::Spcr => 4,
            TableKind::Dsdt => 2,
        }
    }
}

/// Fill the common header fields of `table`: signature, revision, OEM and creator ids, and
/// `size` as the initial length.
///
/// The buffer is resized to `size` so that records appended afterwards follow the fixed part of
/// the table. Fails when no table is given, which generators treat as "skip this table".
pub fn fill_header(table: Option<&mut SdtBuffer>, kind: TableKind, size: u32) -> Result<()> {
    let table = table.ok_or(AcpiError::MissingHeader)?;
    table.resize(utils::u64_to_usize(u64::from(size)));
    table.set_header(&SdtHeader::new(kind.signature(), size, kind.revision()));
    Ok(())
}

/// A trait for functionality around System Descriptor Tables.
pub trait Sdt {
    /// Get the length of the table
    fn len(&self) -> usize;

    /// Return true if Sdt is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the table in guest memory
    fn write_to_guest<M: GuestMemory>(&mut self, mem: &M, address: GuestAddress) -> Result<()>;
}

/// Convert a table length to the 32-bit header representation.
pub(crate) fn table_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| AcpiError::TableTooLarge(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        assert_eq!(checksum(&[&[]]), 0u8);
        assert_eq!(checksum(&[]), 0u8);
        assert_eq!(checksum(&[&[1, 2, 3]]), 250u8);
        assert_eq!(checksum(&[&[1, 2], &[3], &[250]]), 0u8);
        assert_eq!(checksum(&[&[1, 2], &[3], &[250], &[255]]), 1u8);
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(SDT_HEADER_LEN, 36);
        assert_eq!(std::mem::size_of::<GenericAddressStructure>(), 12);
    }

    #[test]
    fn test_fill_header() {
        let mut table = SdtBuffer::new(SDT_HEADER_LEN);
        fill_header(Some(&mut table), TableKind::Madt, 44).unwrap();
        let header = table.header();
        assert_eq!(header.signature, *b"APIC");
        assert_eq!(header.length.get(), 44);
        assert_eq!(header.revision, 3);
        assert_eq!(header.oem_id, OEM_ID);
        assert_eq!(header.oem_table_id, ACPI_TABLE_CREATOR);
        assert_eq!(header.creator_id, ASL_COMPILER_ID);
        assert_eq!(header.creator_revision.get(), ASL_COMPILER_REVISION);
        assert_eq!(table.current(), 44);
    }

    #[test]
    fn test_fill_header_without_table() {
        let err = fill_header(None, TableKind::Srat, 48).unwrap_err();
        assert!(matches!(err, AcpiError::MissingHeader), "{err:?}");
    }

    #[test]
    fn test_revisions() {
        assert_eq!(TableKind::Fadt.revision(), 6);
        assert_eq!(TableKind::Tpm2.revision(), 4);
        assert_eq!(TableKind::Dbg2.revision(), 0);
        assert_eq!(TableKind::Lpit.revision(), 0);
        assert_eq!(TableKind::Spcr.revision(), 4);
        assert_eq!(TableKind::Fadt.signature(), *b"FACP");
    }
}
