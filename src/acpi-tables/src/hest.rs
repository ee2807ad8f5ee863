// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Hardware Error Source Table (HEST)

use log::debug;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::sdt::SdtBuffer;
use crate::{Result, TableKind, fill_header, table_len};

/// Header plus the error source count.
pub const HEST_LEN: u32 = 40;
const ERROR_SOURCE_COUNT_OFFSET: usize = 36;

/// Error source types.
pub const HEST_IA32_MCE: u16 = 0;
pub const HEST_IA32_CMC: u16 = 1;
pub const HEST_IA32_NMI: u16 = 2;
pub const HEST_AER_ROOT_PORT: u16 = 6;
pub const HEST_AER_ENDPOINT: u16 = 7;
pub const HEST_AER_BRIDGE: u16 = 8;
pub const HEST_GENERIC_HARDWARE: u16 = 9;

/// Notification through an SCI.
const NOTIFY_SCI: u8 = 3;

/// Common part of an error source descriptor.
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct ErrorSourceDescriptor {
    pub r#type: U16,
    pub source_id: U16,
    reserved: U16,
    pub flags: u8,
    pub enabled: u8,
    pub prealloc_erecords: U32,
    pub max_section_per_record: U32,
}

/// Hardware error notification structure.
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct HardwareErrorNotification {
    pub r#type: u8,
    pub length: u8,
    /// Configuration write enable.
    pub conf_we: U16,
    pub poll_interval: U32,
    pub vector: U32,
    pub sw2poll_threshold_val: U32,
    pub sw2poll_threshold_win: U32,
    pub error_threshold_val: U32,
    pub error_threshold_win: U32,
}

/// Append an error source of `source_type` followed by the type specific `data`, and bump the
/// table's error source count. Returns the number of bytes appended.
pub fn append_error_source(table: &mut SdtBuffer, source_type: u16, data: &[u8]) -> Result<usize> {
    let count = table
        .read_at::<U32>(ERROR_SOURCE_COUNT_OFFSET)
        .map_or(0, |count| count.get());
    let start = table.current();

    let descriptor = ErrorSourceDescriptor {
        r#type: U16::new(source_type),
        source_id: U16::new(u16::try_from(count).unwrap_or(u16::MAX)),
        // Firmware first.
        flags: 0,
        enabled: 1,
        prealloc_erecords: U32::new(1),
        max_section_per_record: U32::new(1),
        ..Default::default()
    };
    table.append(&descriptor);

    match source_type {
        HEST_IA32_MCE => {}
        HEST_IA32_CMC => {
            #[allow(clippy::cast_possible_truncation)]
            let length = std::mem::size_of::<HardwareErrorNotification>() as u8;
            table.append(&HardwareErrorNotification {
                r#type: NOTIFY_SCI,
                length,
                ..Default::default()
            });
        }
        HEST_IA32_NMI | HEST_AER_ROOT_PORT | HEST_AER_ENDPOINT | HEST_AER_BRIDGE
        | HEST_GENERIC_HARDWARE => {}
        _ => debug!("acpi: HEST: Invalid type of error source {source_type}"),
    }

    table.write_at(ERROR_SOURCE_COUNT_OFFSET, &U32::new(count + 1));
    table.append_bytes(data);

    table.set_length(table_len(table.current())?);
    Ok(table.current() - start)
}

/// Build the HEST; `fill` appends the error sources with [`append_error_source`].
pub fn create_hest<F>(table: &mut SdtBuffer, fill: F) -> Result<()>
where
    F: FnOnce(&mut SdtBuffer) -> Result<()>,
{
    fill_header(Some(&mut *table), TableKind::Hest, HEST_LEN)?;
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
    fn test_hest() {
        assert_eq!(std::mem::size_of::<ErrorSourceDescriptor>(), 16);
        assert_eq!(std::mem::size_of::<HardwareErrorNotification>(), 28);

        let mut sizes = Vec::new();
        let mut table = SdtBuffer::new(SDT_HEADER_LEN);
        create_hest(&mut table, |hest| {
            sizes.push(append_error_source(hest, HEST_IA32_MCE, &[0xaa; 4])?);
            sizes.push(append_error_source(hest, HEST_IA32_CMC, &[])?);
            sizes.push(append_error_source(hest, 42, &[0xbb])?);
            Ok(())
        })
        .unwrap();

        assert_eq!(sizes, vec![20, 44, 17]);
        assert_eq!(table.signature(), *b"HEST");
        assert_eq!(table.length(), 40 + 20 + 44 + 17);
        assert_eq!(table.read_at::<U32>(36).unwrap().get(), 3);

        let mce = table.read_at::<ErrorSourceDescriptor>(40).unwrap();
        assert_eq!(mce.source_id.get(), 0);
        assert_eq!(mce.enabled, 1);
        assert_eq!(&table.as_slice()[56..60], &[0xaa; 4]);

        let cmc = table.read_at::<ErrorSourceDescriptor>(60).unwrap();
        assert_eq!(cmc.r#type.get(), HEST_IA32_CMC);
        assert_eq!(cmc.source_id.get(), 1);
        let notification = table.read_at::<HardwareErrorNotification>(76).unwrap();
        assert_eq!((notification.r#type, notification.length), (3, 28));
    }
}
