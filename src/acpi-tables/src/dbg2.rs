// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Debug Port Table 2 (DBG2) describing a single debug device.

use log::{debug, error, info};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::platform::TableSink;
use crate::sdt::SdtBuffer;
use crate::{
    ADDRESS_SPACE_IO, ADDRESS_SPACE_MEMORY, GenericAddressStructure, Result, SdtHeader,
    TableKind, fill_header, table_len,
};

pub const DBG2_PORT_SERIAL: u16 = 0x8000;
pub const DBG2_PORT_SERIAL_16550: u16 = 0x0000;

/// Fixed part of the DBG2.
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct Dbg2 {
    pub header: SdtHeader,
    pub devices_offset: U32,
    pub devices_count: U32,
}

/// Debug device information structure, followed by its base address registers, their sizes and
/// the namespace path.
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct Dbg2Device {
    pub revision: u8,
    pub length: U16,
    pub address_count: u8,
    pub namespace_string_length: U16,
    pub namespace_string_offset: U16,
    pub oem_data_length: U16,
    pub oem_data_offset: U16,
    pub port_type: U16,
    pub port_subtype: U16,
    reserved: U16,
    pub base_address_offset: U16,
    pub address_size_offset: U16,
}

#[allow(clippy::cast_possible_truncation)]
pub const DBG2_LEN: u32 = std::mem::size_of::<Dbg2>() as u32;
const DEVICE_LEN: usize = std::mem::size_of::<Dbg2Device>();
const GAS_LEN: usize = std::mem::size_of::<GenericAddressStructure>();

/// Kind of a PCI BAR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarKind {
    Io,
    Memory,
    /// Neither I/O nor memory: cannot be described.
    Unknown,
}

/// BAR 0 of a PCI UART.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartBar {
    pub kind: BarKind,
    pub base: u64,
    pub size: u32,
}

/// A PCI UART as enumerated by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciUart {
    /// Device path used in log messages.
    pub name: String,
    pub enabled: bool,
    pub bar0: Option<UartBar>,
    /// ACPI namespace path of the device.
    pub acpi_path: Option<String>,
}

fn offset_u16(offset: usize) -> Result<U16> {
    u16::try_from(offset)
        .map(U16::new)
        .map_err(|_| crate::AcpiError::TableTooLarge(offset))
}

/// Build a DBG2 with one debug device of `port_type`/`port_subtype` at `address`.
///
/// The namespace path defaults to `.` when the device has none.
pub fn create_dbg2(
    table: &mut SdtBuffer,
    port_type: u16,
    port_subtype: u16,
    address: &GenericAddressStructure,
    address_size: u32,
    device_path: Option<&str>,
) -> Result<()> {
    fill_header(Some(&mut *table), TableKind::Dbg2, DBG2_LEN)?;
    let dbg2 = Dbg2 {
        header: table.header(),
        devices_offset: U32::new(DBG2_LEN),
        devices_count: U32::new(1),
    };
    table.write_at(0, &dbg2);

    let path = device_path.unwrap_or(".");
    // Includes the NUL terminator.
    let path_len = path.len() + 1;
    let base_address_offset = DEVICE_LEN;
    let address_size_offset = base_address_offset + GAS_LEN;
    let namespace_offset = address_size_offset + 4;
    let device_len = namespace_offset + path_len;

    let device = Dbg2Device {
        revision: 0,
        length: offset_u16(device_len)?,
        address_count: 1,
        namespace_string_length: offset_u16(path_len)?,
        namespace_string_offset: offset_u16(namespace_offset)?,
        port_type: U16::new(port_type),
        port_subtype: U16::new(port_subtype),
        base_address_offset: offset_u16(base_address_offset)?,
        address_size_offset: offset_u16(address_size_offset)?,
        ..Default::default()
    };
    table.append(&device);
    table.append(address);
    table.append(&U32::new(address_size));
    table.append_bytes(path.as_bytes());
    table.append_bytes(&[0]);

    // (Re)calculate length.
    table.set_length(table_len(table.current())?);
    Ok(())
}

/// Describe the PCI UART `uart` in a DBG2 and add it to the tables. Returns the address of the
/// table, or `None` when the UART cannot be described.
pub fn write_dbg2_pci_uart(
    sink: &mut dyn TableSink,
    uart: Option<&PciUart>,
    access_size: u8,
) -> Result<Option<u64>> {
    let Some(uart) = uart else {
        debug!("acpi: DBG2: Device not found");
        return Ok(None);
    };
    if !uart.enabled {
        info!("acpi: DBG2: Device not enabled");
        return Ok(None);
    }
    let Some(bar) = uart.bar0 else {
        error!("acpi: DBG2: Unable to find resource for {}", uart.name);
        return Ok(None);
    };
    let space = match bar.kind {
        BarKind::Io => ADDRESS_SPACE_IO,
        BarKind::Memory => ADDRESS_SPACE_MEMORY,
        BarKind::Unknown => {
            error!("acpi: DBG2: Unknown address space type");
            return Ok(None);
        }
    };

    let address = GenericAddressStructure::new(space, 0, 0, access_size, bar.base);
    let mut table = SdtBuffer::new(DBG2_LEN as usize);
    create_dbg2(
        &mut table,
        DBG2_PORT_SERIAL,
        DBG2_PORT_SERIAL_16550,
        &address,
        bar.size,
        uart.acpi_path.as_deref(),
    )?;
    sink.add_table(&mut table).map(Some)
}
