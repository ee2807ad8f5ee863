// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Differentiated System Description Table (DSDT) and the SLIC/MSDM passthrough table.
//!
//! More information about the DSDT can be found in the ACPI specification:
//! https://uefi.org/specs/ACPI/6.5/05_ACPI_Software_Programming_Model.html#differentiated-system-description-table-dsdt

use log::error;
use zerocopy::FromBytes;

use crate::platform::AcpiDevice;
use crate::sdt::SdtBuffer;
use crate::{Result, SDT_HEADER_LEN, SdtHeader, TableKind, table_len};

/// Header of an AML image, if `image` is long enough to hold one.
fn image_header(image: &[u8]) -> Option<SdtHeader> {
    SdtHeader::read_from_prefix(image)
        .ok()
        .map(|(header, _)| header)
}

/// Whether `image` holds a table whose length fits both the image and a header, with one of the
/// accepted signatures.
fn is_valid_image(image: &[u8], signatures: &[[u8; 4]]) -> bool {
    let Some(header) = image_header(image) else {
        return false;
    };
    let length = utils::u64_to_usize(u64::from(header.length.get()));
    length <= image.len() && length >= SDT_HEADER_LEN && signatures.contains(&header.signature)
}

/// Check the compiled DSDT. Without a valid one no table can be written at all.
pub fn validate_dsdt(image: Option<&[u8]>) -> Option<&[u8]> {
    let Some(image) = image else {
        error!("acpi: No DSDT file, skipping ACPI tables");
        return None;
    };
    if !is_valid_image(image, &[TableKind::Dsdt.signature()]) {
        error!("acpi: Invalid DSDT file, skipping ACPI tables");
        return None;
    }
    Some(image)
}

/// Check an optional SLIC (or MSDM) image. Invalid images are ignored.
pub fn validate_slic(image: Option<&[u8]>) -> Option<&[u8]> {
    image.filter(|image| is_valid_image(image, &[*b"SLIC", *b"MSDM"]))
}

/// OEM id and OEM table id for the root tables: the SLIC's ones when there is a SLIC, ours
/// otherwise.
pub fn oem_ids(slic: Option<&[u8]>) -> ([u8; 6], [u8; 8]) {
    match slic.and_then(image_header) {
        Some(header) => (header.oem_id, header.oem_table_id),
        None => (crate::OEM_ID, crate::ACPI_TABLE_CREATOR),
    }
}

/// Build the DSDT from the compiled image `dsdt_file`, with the AML injected by `devices`
/// placed in front of the static definition block.
pub fn create_dsdt(table: &mut SdtBuffer, dsdt_file: &[u8], devices: &[&dyn AcpiDevice]) -> Result<()> {
    let Some(header) = image_header(dsdt_file) else {
        return Ok(());
    };
    table.set_header(&header);

    let length = utils::u64_to_usize(u64::from(header.length.get()));
    if length < SDT_HEADER_LEN {
        return Ok(());
    }
    table.resize(SDT_HEADER_LEN);

    let mut aml = Vec::new();
    for device in devices {
        device.inject_dsdt(&mut aml);
    }
    table.append_bytes(&aml);

    let body = dsdt_file
        .get(SDT_HEADER_LEN..length)
        .unwrap_or(&dsdt_file[SDT_HEADER_LEN..]);
    table.append_bytes(body);

    // (Re)calculate length.
    table.set_length(table_len(table.current())?);
    Ok(())
}

/// Copy the SLIC image verbatim. Without one the table stays empty and is skipped.
pub fn create_slic(table: &mut SdtBuffer, slic_file: Option<&[u8]>) {
    if let Some(image) = slic_file {
        let length = image_header(image)
            .map(|header| utils::u64_to_usize(u64::from(header.length.get())))
            .unwrap_or(0)
            .min(image.len());
        *table = SdtBuffer::from_bytes(&image[..length]);
    }
}
