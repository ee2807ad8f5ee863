// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use log::debug;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::platform::TableSink;
use crate::sdt::SdtBuffer;
use crate::{
    ACCESS_SIZE_UNDEFINED, ADDRESS_SPACE_MEMORY, GenericAddressStructure, Result, SdtHeader,
    TableKind, fill_header,
};

/// High Precision Event Timer table (HPET)
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct Hpet {
    pub header: SdtHeader,
    /// Event timer block id: the low half of the capabilities register.
    pub id: U32,
    pub address: GenericAddressStructure,
    pub number: u8,
    pub min_tick: U16,
    pub attributes: u8,
}

#[allow(clippy::cast_possible_truncation)]
pub const HPET_LEN: u32 = std::mem::size_of::<Hpet>() as u32;

/// Build the HPET for the timer block at `base`, whose general capabilities register reads `id`.
pub fn create_hpet(table: &mut SdtBuffer, base: u32, id: u32, min_tick: u16) -> Result<()> {
    fill_header(Some(&mut *table), TableKind::Hpet, HPET_LEN)?;
    let hpet = Hpet {
        header: table.header(),
        id: U32::new(id),
        address: GenericAddressStructure::new(
            ADDRESS_SPACE_MEMORY,
            64,
            0,
            ACCESS_SIZE_UNDEFINED,
            u64::from(base),
        ),
        number: 0,
        min_tick: U16::new(min_tick),
        attributes: 0,
    };
    table.write_at(0, &hpet);
    Ok(())
}

/// Build the HPET and add it to the tables. Returns the address it was written at.
pub fn write_hpet(sink: &mut dyn TableSink, base: u32, id: u32, min_tick: u16) -> Result<u64> {
    debug!("acpi:    * HPET");
    let mut table = SdtBuffer::new(HPET_LEN as usize);
    create_hpet(&mut table, base, id, min_tick)?;
    sink.add_table(&mut table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hpet() {
        assert_eq!(HPET_LEN, 56);
        let mut table = SdtBuffer::new(HPET_LEN as usize);
        create_hpet(&mut table, 0xfed0_0000, 0x8086_a201, 0x80).unwrap();

        let hpet = table.read_at::<Hpet>(0).unwrap();
        assert_eq!(hpet.header.signature, *b"HPET");
        assert_eq!(hpet.header.length.get(), 56);
        assert_eq!(hpet.id.get(), 0x8086_a201);
        let address = hpet.address;
        assert_eq!(address.address_space_id, ADDRESS_SPACE_MEMORY);
        assert_eq!(address.register_bit_width, 64);
        assert_eq!(address.address.get(), 0xfed0_0000);
        assert_eq!(hpet.min_tick.get(), 0x80);
    }
}
