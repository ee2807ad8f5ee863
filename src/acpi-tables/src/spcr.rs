// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use log::error;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::platform::{Platform, SerialAccess, SerialConsole, UartKind};
use crate::sdt::SdtBuffer;
use crate::{
    ACCESS_SIZE_BYTE, ACCESS_SIZE_DWORD, ACCESS_SIZE_UNDEFINED, ACCESS_SIZE_WORD,
    ADDRESS_SPACE_IO, ADDRESS_SPACE_MEMORY, GenericAddressStructure, Result, SdtHeader, TableKind,
    fill_header,
};

/// 16550 compatible, with parameters defined in the Generic Address Structure.
const INTERFACE_16550_GAS: u8 = 0x12;
const INTERFACE_PL011: u8 = 0x03;
/// VT-UTF8.
const TERMINAL_VT_UTF8: u8 = 2;

/// Serial Port Console Redirection table (SPCR)
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct Spcr {
    pub header: SdtHeader,
    pub interface_type: u8,
    reserved: [u8; 3],
    pub base_address: GenericAddressStructure,
    pub interrupt_type: u8,
    pub irq: u8,
    pub global_interrupt: U32,
    pub configured_baudrate: u8,
    pub parity: u8,
    pub stop_bits: u8,
    pub flow_control: u8,
    pub terminal_type: u8,
    pub language: u8,
    pub pci_did: U16,
    pub pci_vid: U16,
    pub pci_bus: u8,
    pub pci_dev: u8,
    pub pci_fun: u8,
    pub pci_flags: U32,
    pub pci_segment: u8,
    pub uart_clock_freq: U32,
}

#[allow(clippy::cast_possible_truncation)]
pub const SPCR_LEN: u32 = std::mem::size_of::<Spcr>() as u32;

fn access_size(regwidth: u8) -> u8 {
    match regwidth {
        1 => ACCESS_SIZE_BYTE,
        2 => ACCESS_SIZE_WORD,
        4 => ACCESS_SIZE_DWORD,
        _ => {
            error!("acpi: SPCR: Invalid serial regwidth {regwidth}");
            ACCESS_SIZE_UNDEFINED
        }
    }
}

/// Build the SPCR describing `console`.
pub fn create_spcr_for(table: &mut SdtBuffer, console: &SerialConsole) -> Result<()> {
    fill_header(Some(&mut *table), TableKind::Spcr, SPCR_LEN)?;

    let space = match console.access {
        SerialAccess::IoMapped => ADDRESS_SPACE_IO,
        SerialAccess::MemoryMapped => ADDRESS_SPACE_MEMORY,
    };
    let interface_type = match console.kind {
        UartKind::Ns16550 => INTERFACE_16550_GAS,
        UartKind::Pl011 => INTERFACE_PL011,
    };
    let spcr = Spcr {
        header: table.header(),
        interface_type,
        base_address: GenericAddressStructure::new(
            space,
            console.regwidth.wrapping_mul(8),
            0,
            access_size(console.regwidth),
            u64::from(console.base),
        ),
        // Have the OS use whatever baudrate is currently set.
        configured_baudrate: 0,
        stop_bits: 1,
        terminal_type: TERMINAL_VT_UTF8,
        pci_did: U16::new(0xffff),
        pci_vid: U16::new(0xffff),
        ..Default::default()
    };
    table.write_at(0, &spcr);
    Ok(())
}

/// Build the SPCR when a serial console is configured.
pub fn create_spcr<P: Platform + ?Sized>(table: &mut SdtBuffer, platform: &P) -> Result<()> {
    if !platform.config().console_serial {
        return Ok(());
    }
    match platform.serial_console() {
        Some(console) => create_spcr_for(table, &console),
        None => Ok(()),
    }
}
