// Copyright © 2019 Intel Corporation
// Copyright © 2023 Rivos, Inc.
// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
//
// SPDX-License-Identifier: Apache-2.0

use zerocopy::little_endian::{U16, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::platform::Platform;
use crate::sdt::SdtBuffer;
use crate::{Result, TableKind, fill_header, table_len};

/// Header plus 8 reserved bytes.
pub const MCFG_LEN: u32 = 44;

/// PCI Express enhanced configuration space base address allocation
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Default, Debug, IntoBytes, FromBytes, KnownLayout, Clone, Copy, Immutable)]
pub struct PciRangeEntry {
    pub base_address: U64,
    pub segment: U16,
    pub start: u8,
    pub end: u8,
    _reserved: [u8; 4],
}

impl PciRangeEntry {
    pub fn new(base_address: u64, segment: u16, start: u8, end: u8) -> Self {
        PciRangeEntry {
            base_address: U64::new(base_address),
            segment: U16::new(segment),
            start,
            end,
            _reserved: [0; 4],
        }
    }
}

/// PCI Express memory mapped configuration space table (MCFG)
///
/// MCFG is defined in the PCI Firmware Specification 3.0. When ECAM is supported, segment 0
/// gets one entry covering buses `0..bus_count`.
pub fn create_mcfg<P: Platform + ?Sized>(table: &mut SdtBuffer, platform: &P) -> Result<()> {
    fill_header(Some(&mut *table), TableKind::Mcfg, MCFG_LEN)?;

    if platform.config().ecam_mmconf_support {
        if let Some(ecam) = platform.ecam() {
            let end = u8::try_from(ecam.bus_count.saturating_sub(1)).unwrap_or(u8::MAX);
            table.append(&PciRangeEntry::new(ecam.base, 0, 0, end));
        }
    }

    // (Re)calculate length.
    table.set_length(table_len(table.current())?);
    Ok(())
}
