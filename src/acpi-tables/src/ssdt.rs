// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Secondary System Description Table (SSDT) generated at build time.

use crate::aml::{self, Aml};
use crate::platform::{AcpiDevice, MemoryEntry};
use crate::sdt::SdtBuffer;
use crate::{AcpiError, Result, TableKind, fill_header, table_len};

/// Hardware id of the device exposing the coreboot tables to the OS.
pub const CBTABLE_HID: &str = "BOOT0000";
/// The generated SSDT starts out as a bare header.
const SSDT_LEN: u32 = 36;
/// _STA value: present, enabled and functioning, but hidden from the UI.
const STATUS_DEVICE_HIDDEN_ON: u8 = 0x0b;

/// Append the `CTBL` device describing the coreboot table area.
pub fn append_cbtable_device(aml: &mut Vec<u8>, cbtable: MemoryEntry) -> Result<()> {
    let base = u32::try_from(cbtable.address).map_err(|_| AcpiError::InvalidGuestAddress)?;
    let size = u32::try_from(cbtable.size).map_err(|_| AcpiError::InvalidGuestAddress)?;

    aml::Device::new(
        "CTBL".try_into()?,
        vec![
            &aml::Name::new("_HID".try_into()?, &CBTABLE_HID)?,
            &aml::Name::new("_UID".try_into()?, &aml::ZERO)?,
            &aml::Method::new(
                "_STA".try_into()?,
                0,
                false,
                vec![&aml::Return::new(&STATUS_DEVICE_HIDDEN_ON)],
            ),
            &aml::Name::new(
                "_CRS".try_into()?,
                &aml::ResourceTemplate::new(vec![&aml::Memory32Fixed::new(false, base, size)]),
            )?,
        ],
    )
    .append_aml_bytes(aml)?;
    Ok(())
}

/// Build the SSDT: the coreboot table device when that area exists, then whatever the devices
/// contribute.
pub fn create_ssdt(
    table: &mut SdtBuffer,
    cbtable: Option<MemoryEntry>,
    devices: &[&dyn AcpiDevice],
) -> Result<()> {
    fill_header(Some(&mut *table), TableKind::Ssdt, SSDT_LEN)?;

    let mut aml = Vec::new();
    if let Some(cbtable) = cbtable {
        append_cbtable_device(&mut aml, cbtable)?;
    }
    for device in devices {
        device.fill_ssdt(&mut aml);
    }
    table.append_bytes(&aml);

    // (Re)calculate length.
    table.set_length(table_len(table.current())?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SDT_HEADER_LEN;

    struct Gpio;

    impl AcpiDevice for Gpio {
        fn name(&self) -> &str {
            "gpio"
        }

        fn fill_ssdt(&self, aml: &mut Vec<u8>) {
            aml.extend_from_slice(&[0x10, 0x02, 0x5f]);
        }
    }

    #[test]
    fn test_ssdt_without_cbtable() {
        let mut table = SdtBuffer::new(SDT_HEADER_LEN);
        create_ssdt(&mut table, None, &[]).unwrap();
        assert_eq!(table.signature(), *b"SSDT");
        assert_eq!(table.header().revision, 2);
        assert_eq!(table.length(), 36);
    }

    #[test]
    fn test_ssdt_with_cbtable_and_devices() {
        let cbtable = MemoryEntry {
            address: 0x7ff0_0000,
            size: 0x2000,
        };
        let mut expected = Vec::new();
        append_cbtable_device(&mut expected, cbtable).unwrap();
        // ExtOpPrefix DeviceOp, then the package length, then the name.
        assert_eq!(&expected[..2], &[0x5b, 0x82]);
        assert_eq!(&expected[3..7], b"CTBL");
        let hid = b"BOOT0000\0";
        assert!(expected.windows(hid.len()).any(|w| w == hid));

        let gpio = Gpio;
        let mut table = SdtBuffer::new(SDT_HEADER_LEN);
        create_ssdt(&mut table, Some(cbtable), &[&gpio]).unwrap();
        let body = &table.as_slice()[36..];
        assert_eq!(&body[..expected.len()], expected.as_slice());
        assert_eq!(&body[expected.len()..], &[0x10, 0x02, 0x5f]);
    }

    #[test]
    fn test_cbtable_device_bytes() {
        let cbtable = MemoryEntry {
            address: 0x7ff0_0000,
            size: 0x2000,
        };
        let mut aml = Vec::new();
        append_cbtable_device(&mut aml, cbtable).unwrap();

        let mut expected = vec![0x5b, 0x82, 0x3b];
        expected.extend_from_slice(b"CTBL");
        expected.extend_from_slice(b"\x08_HID\x0dBOOT0000\x00");
        expected.extend_from_slice(b"\x08_UID\x00");
        expected.extend_from_slice(b"\x14\x09_STA\x00\xa4\x0a\x0b");
        expected.extend_from_slice(b"\x08_CRS\x11\x11\x0a\x0e");
        expected.extend_from_slice(&[
            0x86, 0x09, 0x00, 0x00, 0x00, 0x00, 0xf0, 0x7f, 0x00, 0x20, 0x00, 0x00, 0x79, 0x00,
        ]);
        assert_eq!(aml, expected);
    }

    #[test]
    fn test_cbtable_above_4g() {
        let cbtable = MemoryEntry {
            address: 0x1_0000_0000,
            size: 0x1000,
        };
        let mut aml = Vec::new();
        assert!(matches!(
            append_cbtable_device(&mut aml, cbtable),
            Err(AcpiError::InvalidGuestAddress)
        ));
    }
}
