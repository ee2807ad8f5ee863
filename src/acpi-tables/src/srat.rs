// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! System Resource Affinity Table (SRAT)
//!
//! Associates processors, memory ranges and generic initiators with proximity domains. The
//! platform appends the affinity structures from a fill callback; the table length is fixed up
//! once it returns.

use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::sdt::SdtBuffer;
use crate::{Result, TableKind, fill_header, table_len};

/// Header, the reserved word set to 1 and 8 reserved bytes.
pub const SRAT_LEN: u32 = 48;
const SRAT_RESERVED_OFFSET: usize = 36;

const SRAT_LAPIC: u8 = 0;
const SRAT_MEMORY: u8 = 1;
const SRAT_X2APIC: u8 = 2;
const SRAT_GENERIC_INITIATOR: u8 = 5;

/// The affinity structure is in use.
pub const SRAT_FLAG_ENABLED: u32 = 1 << 0;
pub const SRAT_MEM_HOT_PLUGGABLE: u32 = 1 << 1;
pub const SRAT_MEM_NON_VOLATILE: u32 = 1 << 2;

const GIA_DEV_HANDLE_PCI: u8 = 1;

/// Processor Local APIC/SAPIC affinity structure
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct SratLapic {
    pub r#type: u8,
    pub length: u8,
    pub proximity_domain_7_0: u8,
    pub apic_id: u8,
    pub flags: U32,
    pub local_sapic_eid: u8,
    pub proximity_domain_31_8: [u8; 3],
    pub clock_domain: U32,
}

impl SratLapic {
    pub fn new(node: u8, apic_id: u8) -> Self {
        SratLapic {
            r#type: SRAT_LAPIC,
            length: record_len::<Self>(),
            proximity_domain_7_0: node,
            apic_id,
            flags: U32::new(SRAT_FLAG_ENABLED),
            ..Default::default()
        }
    }
}

/// Memory affinity structure
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct SratMemory {
    pub r#type: u8,
    pub length: u8,
    pub proximity_domain: U32,
    reserved: U16,
    pub base_address_low: U32,
    pub base_address_high: U32,
    pub length_low: U32,
    pub length_high: U32,
    reserved1: U32,
    pub flags: U32,
    reserved2: U64,
}

impl SratMemory {
    /// Range of `size_kib` KiB starting at `base_kib` KiB.
    // Split into the low and high dwords of the byte values.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(node: u8, base_kib: u32, size_kib: u32, flags: u32) -> Self {
        let base = u64::from(base_kib) << 10;
        let size = u64::from(size_kib) << 10;
        SratMemory {
            r#type: SRAT_MEMORY,
            length: record_len::<Self>(),
            proximity_domain: U32::new(u32::from(node)),
            base_address_low: U32::new(base as u32),
            base_address_high: U32::new((base >> 32) as u32),
            length_low: U32::new(size as u32),
            length_high: U32::new((size >> 32) as u32),
            flags: U32::new(flags),
            ..Default::default()
        }
    }
}

/// Processor Local x2APIC affinity structure
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct SratX2Apic {
    pub r#type: u8,
    pub length: u8,
    reserved: U16,
    pub proximity_domain: U32,
    pub x2apic_id: U32,
    pub flags: U32,
    pub clock_domain: U32,
    reserved1: U32,
}

impl SratX2Apic {
    pub fn new(node: u32, x2apic_id: u32) -> Self {
        SratX2Apic {
            r#type: SRAT_X2APIC,
            length: record_len::<Self>(),
            proximity_domain: U32::new(node),
            x2apic_id: U32::new(x2apic_id),
            flags: U32::new(SRAT_FLAG_ENABLED),
            ..Default::default()
        }
    }
}

/// Generic Initiator affinity structure
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct SratGenericInitiator {
    pub r#type: u8,
    pub length: u8,
    reserved: u8,
    pub dev_handle_type: u8,
    pub proximity_domain: U32,
    pub dev_handle: [u8; 16],
    pub flags: U32,
    reserved1: U32,
}

impl SratGenericInitiator {
    /// Generic initiator identified by the PCI function `seg:bus:dev.func`.
    pub fn pci(proximity_domain: u32, seg: u16, bus: u8, dev: u8, func: u8, flags: u32) -> Self {
        let mut dev_handle = [0u8; 16];
        dev_handle[..2].copy_from_slice(&seg.to_le_bytes());
        dev_handle[2] = bus;
        dev_handle[3] = ((dev & 0x1f) << 3) | (func & 0x7);
        SratGenericInitiator {
            r#type: SRAT_GENERIC_INITIATOR,
            length: record_len::<Self>(),
            dev_handle_type: GIA_DEV_HANDLE_PCI,
            proximity_domain: U32::new(proximity_domain),
            dev_handle,
            flags: U32::new(flags),
            ..Default::default()
        }
    }
}

/// Size of an affinity structure, as stored in its one-byte length field.
const fn record_len<T>() -> u8 {
    #[allow(clippy::cast_possible_truncation)]
    let len = std::mem::size_of::<T>() as u8;
    len
}

/// Build the SRAT; `fill` appends the affinity structures.
pub fn create_srat<F>(table: &mut SdtBuffer, fill: F) -> Result<()>
where
    F: FnOnce(&mut SdtBuffer) -> Result<()>,
{
    fill_header(Some(&mut *table), TableKind::Srat, SRAT_LEN)?;
    // Reserved to 1 for backwards compatibility.
    table.write_at(SRAT_RESERVED_OFFSET, &U32::new(1));

    fill(table)?;

    // (Re)calculate length.
    table.set_length(table_len(table.current())?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SDT_HEADER_LEN;

    #[test]
    fn test_record_sizes() {
        assert_eq!(std::mem::size_of::<SratLapic>(), 16);
        assert_eq!(std::mem::size_of::<SratMemory>(), 40);
        assert_eq!(std::mem::size_of::<SratX2Apic>(), 24);
        assert_eq!(std::mem::size_of::<SratGenericInitiator>(), 32);
    }

    #[test]
    fn test_srat() {
        let mut table = SdtBuffer::new(SDT_HEADER_LEN);
        create_srat(&mut table, |srat| {
            srat.append(&SratLapic::new(0, 2));
            srat.append(&SratX2Apic::new(1, 0x100));
            // 4 GiB at 4 GiB.
            srat.append(&SratMemory::new(1, 4 << 20, 4 << 20, SRAT_FLAG_ENABLED));
            srat.append(&SratGenericInitiator::pci(2, 1, 0x40, 3, 1, SRAT_FLAG_ENABLED));
            Ok(())
        })
        .unwrap();

        assert_eq!(table.signature(), *b"SRAT");
        assert_eq!(table.header().revision, 3);
        assert_eq!(table.length(), 48 + 16 + 24 + 40 + 32);
        assert_eq!(table.read_at::<U32>(36).unwrap().get(), 1);

        let lapic = table.read_at::<SratLapic>(48).unwrap();
        assert_eq!((lapic.r#type, lapic.length, lapic.apic_id), (0, 16, 2));
        assert_eq!(lapic.flags.get(), 1);

        let x2apic = table.read_at::<SratX2Apic>(64).unwrap();
        assert_eq!(x2apic.x2apic_id.get(), 0x100);
        assert_eq!(x2apic.proximity_domain.get(), 1);

        let mem = table.read_at::<SratMemory>(88).unwrap();
        assert_eq!(mem.r#type, 1);
        assert_eq!(mem.base_address_low.get(), 0);
        assert_eq!(mem.base_address_high.get(), 1);
        assert_eq!(mem.length_low.get(), 0);
        assert_eq!(mem.length_high.get(), 1);

        let gia = table.read_at::<SratGenericInitiator>(128).unwrap();
        assert_eq!(gia.r#type, 5);
        assert_eq!(gia.dev_handle_type, 1);
        assert_eq!(&gia.dev_handle[..4], &[1, 0, 0x40, (3 << 3) | 1]);
    }

    #[test]
    fn test_fill_error_is_propagated() {
        let mut table = SdtBuffer::new(SDT_HEADER_LEN);
        let err = create_srat(&mut table, |_| Err(crate::AcpiError::InvalidGuestAddress));
        assert!(err.is_err());
    }
}
