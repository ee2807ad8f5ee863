// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::platform::Platform;
use crate::sdt::SdtBuffer;
use crate::{Result, SdtHeader, TableKind, fill_header};

/// Boot Error Record Table (BERT)
///
/// Points the OS at the region holding errors recorded during the previous boot.
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct Bert {
    pub header: SdtHeader,
    pub region_length: U32,
    pub error_region: U64,
}

#[allow(clippy::cast_possible_truncation)]
pub const BERT_LEN: u32 = std::mem::size_of::<Bert>() as u32;

/// Build the BERT when enabled and the platform has an error region to report.
pub fn create_bert<P: Platform + ?Sized>(table: &mut SdtBuffer, platform: &P) -> Result<()> {
    if !platform.config().bert {
        return Ok(());
    }
    let Some(region) = platform.bert_region() else {
        return Ok(());
    };

    fill_header(Some(&mut *table), TableKind::Bert, BERT_LEN)?;
    let bert = Bert {
        header: table.header(),
        region_length: U32::new(region.length),
        error_region: U64::new(region.address),
    };
    table.write_at(0, &bert);
    Ok(())
}
