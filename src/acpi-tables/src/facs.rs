// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use vm_memory::{Bytes, GuestAddress, GuestMemory};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{Result, Sdt, TableKind};

/// FACS has to live on a 64 byte boundary.
pub const FACS_ALIGNMENT: u64 = 64;

// clippy doesn't understand that we actually "use" the fields of this struct when we serialize
// them as bytes in guest memory, so here we just ignore dead code to avoid having to name
// everything with an underscore prefix
#[allow(dead_code)]
/// Firmware ACPI Control Structure (FACS)
///
/// Read/write structure shared with the OS; holds the waking vector used on resume from S3.
/// It has no checksum.
/// More information about this table can be found in the ACPI specification:
/// https://uefi.org/specs/ACPI/6.5/05_ACPI_Software_Programming_Model.html#firmware-acpi-control-structure-facs
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct Facs {
    signature: [u8; 4],
    length: U32,
    hardware_signature: U32,
    firmware_waking_vector: U32,
    global_lock: U32,
    flags: U32,
    x_firmware_waking_vector: U64,
    version: u8,
    reserved: [u8; 3],
    ospm_flags: U32,
    reserved2: [u8; 24],
}

impl Facs {
    pub fn new() -> Self {
        Facs {
            signature: TableKind::Facs.signature(),
            // 64 bytes.
            length: U32::new(64),
            version: TableKind::Facs.revision(),
            ..Default::default()
        }
    }

    pub fn firmware_waking_vector(&self) -> u32 {
        self.firmware_waking_vector.get()
    }

    pub fn set_firmware_waking_vector(&mut self, vector: u32) {
        self.firmware_waking_vector = U32::new(vector);
    }
}

impl Sdt for Facs {
    fn len(&self) -> usize {
        self.as_bytes().len()
    }

    fn write_to_guest<M: GuestMemory>(&mut self, mem: &M, address: GuestAddress) -> Result<()> {
        mem.write_slice(self.as_bytes(), address)?;
        Ok(())
    }
}
