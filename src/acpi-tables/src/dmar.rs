// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! DMA Remapping Reporting table (DMAR)
//!
//! Remapping structures that carry device scopes (DRHD, RMRR, ATSR, SATC) are appended with the
//! length of their fixed part. Their scopes follow, and the structure's length is fixed up once
//! the last scope has been appended. The offsets handed out by the `append_*` functions are typed
//! so that only those structures can be fixed up.

use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::sdt::SdtBuffer;
use crate::{Result, SdtHeader, TableKind, fill_header, table_len};

const DMAR_DRHD: u16 = 0;
const DMAR_RMRR: u16 = 1;
const DMAR_ATSR: u16 = 2;
const DMAR_RHSA: u16 = 3;
const DMAR_ANDD: u16 = 4;
const DMAR_SATC: u16 = 5;

/// Offset of the length field in every remapping structure.
const REMAPPING_LENGTH_OFFSET: usize = 2;

/// DMAR table flags.
pub const DMAR_INTR_REMAP: u8 = 1 << 0;
pub const DMAR_X2APIC_OPT_OUT: u8 = 1 << 1;
pub const DMAR_CTRL_PLATFORM_OPT_IN: u8 = 1 << 2;

/// DRHD flag: the unit covers every device of its segment not covered by another unit.
pub const DRHD_INCLUDE_PCI_ALL: u8 = 1 << 0;
/// ATSR flag: every root port of the segment supports ATS.
pub const ATSR_ALL_PORTS: u8 = 1 << 0;

/// Device scope types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScopeType {
    PciEndpoint = 1,
    PciSubHierarchy = 2,
    IoApic = 3,
    MsiHpet = 4,
    AcpiNamespaceDevice = 5,
}

/// Fixed part of the DMAR.
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct Dmar {
    pub header: SdtHeader,
    /// Maximum DMA physical addressability, minus one.
    pub host_address_width: u8,
    pub flags: u8,
    reserved: [u8; 10],
}

#[allow(clippy::cast_possible_truncation)]
pub const DMAR_LEN: u32 = std::mem::size_of::<Dmar>() as u32;

/// DMA Remapping Hardware unit Definition
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct Drhd {
    pub r#type: U16,
    pub length: U16,
    pub flags: u8,
    reserved: u8,
    pub segment: U16,
    pub bar: U64,
}

/// Reserved Memory Region Reporting structure
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct Rmrr {
    pub r#type: U16,
    pub length: U16,
    reserved: U16,
    pub segment: U16,
    pub bar: U64,
    pub limit: U64,
}

/// Root port ATS capability reporting structure
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct Atsr {
    pub r#type: U16,
    pub length: U16,
    pub flags: u8,
    reserved: u8,
    pub segment: U16,
}

/// Remapping Hardware Static Affinity structure
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct Rhsa {
    pub r#type: U16,
    pub length: U16,
    reserved: U32,
    pub base_address: U64,
    pub proximity_domain: U32,
}

/// ACPI Name-space Device Declaration structure, followed by the NUL terminated device name
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct Andd {
    pub r#type: U16,
    pub length: U16,
    reserved: [u8; 3],
    pub device_number: u8,
}

/// SoC integrated Address Translation Cache reporting structure
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct Satc {
    pub r#type: U16,
    pub length: U16,
    pub flags: u8,
    reserved: u8,
    pub segment: U16,
}

/// Device scope with a single path entry.
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct DeviceScope {
    pub r#type: u8,
    pub length: u8,
    reserved: U16,
    pub enumeration_id: u8,
    pub start_bus: u8,
    pub path_dev: u8,
    pub path_fn: u8,
}

/// Offset of a remapping structure whose length is fixed up after its device scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct ScopedStructure(usize);

impl ScopedStructure {
    pub fn offset(self) -> usize {
        self.0
    }
}

/// Length field of a remapping structure of type `T`.
fn structure_len<T>() -> U16 {
    // All remapping structures are a few bytes long.
    #[allow(clippy::cast_possible_truncation)]
    let len = std::mem::size_of::<T>() as u16;
    U16::new(len)
}

pub fn append_drhd(table: &mut SdtBuffer, flags: u8, segment: u16, bar: u64) -> ScopedStructure {
    let drhd = Drhd {
        r#type: U16::new(DMAR_DRHD),
        length: structure_len::<Drhd>(),
        flags,
        segment: U16::new(segment),
        bar: U64::new(bar),
        ..Default::default()
    };
    ScopedStructure(table.append(&drhd))
}

pub fn append_rmrr(table: &mut SdtBuffer, segment: u16, bar: u64, limit: u64) -> ScopedStructure {
    let rmrr = Rmrr {
        r#type: U16::new(DMAR_RMRR),
        length: structure_len::<Rmrr>(),
        segment: U16::new(segment),
        bar: U64::new(bar),
        limit: U64::new(limit),
        ..Default::default()
    };
    ScopedStructure(table.append(&rmrr))
}

pub fn append_atsr(table: &mut SdtBuffer, flags: u8, segment: u16) -> ScopedStructure {
    let atsr = Atsr {
        r#type: U16::new(DMAR_ATSR),
        length: structure_len::<Atsr>(),
        flags,
        segment: U16::new(segment),
        ..Default::default()
    };
    ScopedStructure(table.append(&atsr))
}

pub fn append_satc(table: &mut SdtBuffer, flags: u8, segment: u16) -> ScopedStructure {
    let satc = Satc {
        r#type: U16::new(DMAR_SATC),
        length: structure_len::<Satc>(),
        flags,
        segment: U16::new(segment),
        ..Default::default()
    };
    ScopedStructure(table.append(&satc))
}

/// Append an RHSA. It has no device scopes and needs no fixup.
pub fn append_rhsa(table: &mut SdtBuffer, base_address: u64, proximity_domain: u32) -> usize {
    let rhsa = Rhsa {
        r#type: U16::new(DMAR_RHSA),
        length: structure_len::<Rhsa>(),
        base_address: U64::new(base_address),
        proximity_domain: U32::new(proximity_domain),
        ..Default::default()
    };
    table.append(&rhsa)
}

/// Append an ANDD naming the ACPI device `device_name`.
pub fn append_andd(table: &mut SdtBuffer, device_number: u8, device_name: &str) -> Result<usize> {
    let length = std::mem::size_of::<Andd>() + device_name.len() + 1;
    let andd = Andd {
        r#type: U16::new(DMAR_ANDD),
        length: U16::new(
            u16::try_from(length).map_err(|_| crate::AcpiError::TableTooLarge(length))?,
        ),
        device_number,
        ..Default::default()
    };
    let offset = table.append(&andd);
    table.append_bytes(device_name.as_bytes());
    table.append_bytes(&[0]);
    Ok(offset)
}

/// Set the length of `structure` to cover everything appended since it.
pub fn fixup(table: &mut SdtBuffer, structure: ScopedStructure) -> Result<()> {
    let length = table.current() - structure.0;
    let length =
        u16::try_from(length).map_err(|_| crate::AcpiError::TableTooLarge(length))?;
    table.write_at(structure.0 + REMAPPING_LENGTH_OFFSET, &U16::new(length));
    Ok(())
}

/// Append a device scope with a one entry path and return its length.
pub fn append_device_scope(
    table: &mut SdtBuffer,
    r#type: ScopeType,
    enumeration_id: u8,
    bus: u8,
    dev: u8,
    func: u8,
) -> usize {
    let scope = DeviceScope {
        r#type: r#type as u8,
        // Longer paths are not supported.
        length: 8,
        enumeration_id,
        start_bus: bus,
        path_dev: dev,
        path_fn: func,
        ..Default::default()
    };
    table.append(&scope);
    std::mem::size_of::<DeviceScope>()
}

pub fn append_ds_pci_bridge(table: &mut SdtBuffer, bus: u8, dev: u8, func: u8) -> usize {
    append_device_scope(table, ScopeType::PciSubHierarchy, 0, bus, dev, func)
}

pub fn append_ds_pci(table: &mut SdtBuffer, bus: u8, dev: u8, func: u8) -> usize {
    append_device_scope(table, ScopeType::PciEndpoint, 0, bus, dev, func)
}

pub fn append_ds_ioapic(table: &mut SdtBuffer, ioapic_id: u8, bus: u8, dev: u8, func: u8) -> usize {
    append_device_scope(table, ScopeType::IoApic, ioapic_id, bus, dev, func)
}

pub fn append_ds_msi_hpet(table: &mut SdtBuffer, hpet_id: u8, bus: u8, dev: u8, func: u8) -> usize {
    append_device_scope(table, ScopeType::MsiHpet, hpet_id, bus, dev, func)
}

/// Build the DMAR for a CPU with `phys_address_bits` bits of physical address space; `fill`
/// appends the remapping structures.
pub fn create_dmar<F>(table: &mut SdtBuffer, phys_address_bits: u8, flags: u8, fill: F) -> Result<()>
where
    F: FnOnce(&mut SdtBuffer) -> Result<()>,
{
    fill_header(Some(&mut *table), TableKind::Dmar, DMAR_LEN)?;
    let dmar = Dmar {
        header: table.header(),
        host_address_width: phys_address_bits.saturating_sub(1),
        flags,
        reserved: [0; 10],
    };
    table.write_at(0, &dmar);

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
    fn test_structure_sizes() {
        assert_eq!(DMAR_LEN, 48);
        assert_eq!(std::mem::size_of::<Drhd>(), 16);
        assert_eq!(std::mem::size_of::<Rmrr>(), 24);
        assert_eq!(std::mem::size_of::<Atsr>(), 8);
        assert_eq!(std::mem::size_of::<Rhsa>(), 20);
        assert_eq!(std::mem::size_of::<Andd>(), 8);
        assert_eq!(std::mem::size_of::<Satc>(), 8);
        assert_eq!(std::mem::size_of::<DeviceScope>(), 8);
    }

    #[test]
    fn test_dmar_with_scopes() {
        let mut table = SdtBuffer::new(SDT_HEADER_LEN);
        create_dmar(&mut table, 39, DMAR_INTR_REMAP | DMAR_X2APIC_OPT_OUT, |dmar| {
            let drhd = append_drhd(dmar, 0, 0, 0xfed9_0000);
            append_ds_pci(dmar, 0, 2, 0);
            fixup(dmar, drhd)?;

            let drhd = append_drhd(dmar, DRHD_INCLUDE_PCI_ALL, 0, 0xfed9_1000);
            append_ds_ioapic(dmar, 2, 0xf0, 0x1f, 0);
            append_ds_msi_hpet(dmar, 0, 0, 0x1f, 0);
            fixup(dmar, drhd)?;

            let rmrr = append_rmrr(dmar, 0, 0x7c00_0000, 0x7fff_ffff);
            append_ds_pci(dmar, 0, 0x14, 0);
            fixup(dmar, rmrr)?;

            append_rhsa(dmar, 0xfed9_0000, 1);
            append_andd(dmar, 1, "\\_SB.PCI0.I2C1")?;
            Ok(())
        })
        .unwrap();

        let dmar = table.read_at::<Dmar>(0).unwrap();
        assert_eq!(dmar.header.signature, *b"DMAR");
        assert_eq!(dmar.host_address_width, 38);
        assert_eq!(dmar.flags, 3);

        let first = table.read_at::<Drhd>(48).unwrap();
        assert_eq!(first.length.get(), 16 + 8);
        let second = table.read_at::<Drhd>(72).unwrap();
        assert_eq!(second.length.get(), 16 + 2 * 8);
        assert_eq!(second.flags, DRHD_INCLUDE_PCI_ALL);

        let scope = table.read_at::<DeviceScope>(88).unwrap();
        assert_eq!(scope.r#type, ScopeType::IoApic as u8);
        assert_eq!(scope.enumeration_id, 2);
        assert_eq!((scope.start_bus, scope.path_dev, scope.path_fn), (0xf0, 0x1f, 0));

        let rmrr = table.read_at::<Rmrr>(104).unwrap();
        assert_eq!(rmrr.r#type.get(), 1);
        assert_eq!(rmrr.length.get(), 24 + 8);
        assert_eq!(rmrr.limit.get(), 0x7fff_ffff);

        let rhsa = table.read_at::<Rhsa>(136).unwrap();
        assert_eq!(rhsa.length.get(), 20);

        let andd = table.read_at::<Andd>(156).unwrap();
        assert_eq!(andd.length.get(), 8 + 14 + 1);
        assert_eq!(&table.as_slice()[164..178], b"\\_SB.PCI0.I2C1");
        assert_eq!(table.as_slice()[178], 0);
        assert_eq!(table.length(), 179);
    }

    #[test]
    fn test_atsr_and_satc() {
        let mut table = SdtBuffer::new(SDT_HEADER_LEN);
        create_dmar(&mut table, 46, 0, |dmar| {
            let atsr = append_atsr(dmar, ATSR_ALL_PORTS, 0);
            fixup(dmar, atsr)?;
            let satc = append_satc(dmar, 1, 0);
            append_ds_pci_bridge(dmar, 0, 2, 0);
            fixup(dmar, satc)?;
            assert_eq!(satc.offset(), 56);
            Ok(())
        })
        .unwrap();

        let atsr = table.read_at::<Atsr>(48).unwrap();
        assert_eq!(atsr.length.get(), 8);
        let satc = table.read_at::<Satc>(56).unwrap();
        assert_eq!(satc.r#type.get(), 5);
        assert_eq!(satc.length.get(), 16);
        let scope = table.read_at::<DeviceScope>(64).unwrap();
        assert_eq!(scope.r#type, ScopeType::PciSubHierarchy as u8);
    }
}
