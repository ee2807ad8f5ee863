// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::sdt::SdtBuffer;
use crate::{Result, TableKind, fill_header, table_len};

/// Header plus 4 reserved bytes.
pub const HMAT_LEN: u32 = 40;

const HMAT_MPDA: u16 = 0;
/// The attached initiator proximity domain field is valid.
const MPDA_INITIATOR_VALID: u16 = 1 << 0;

/// Memory Proximity Domain Attributes structure
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct HmatMpda {
    pub r#type: U16,
    reserved: U16,
    pub length: U32,
    pub flags: U16,
    reserved1: U16,
    pub proximity_domain_initiator: U32,
    pub proximity_domain_memory: U32,
    reserved2: U32,
    reserved3: U64,
    reserved4: U64,
}

#[allow(clippy::cast_possible_truncation)]
const MPDA_LEN: u32 = std::mem::size_of::<HmatMpda>() as u32;

impl HmatMpda {
    pub fn new(initiator: u32, memory: u32) -> Self {
        HmatMpda {
            r#type: U16::new(HMAT_MPDA),
            length: U32::new(MPDA_LEN),
            // Bits 1 and 2 are reserved since revision 2.
            flags: U16::new(MPDA_INITIATOR_VALID),
            proximity_domain_initiator: U32::new(initiator),
            proximity_domain_memory: U32::new(memory),
            ..Default::default()
        }
    }
}

/// Heterogeneous Memory Attribute Table (HMAT); `fill` appends the structures.
pub fn create_hmat<F>(table: &mut SdtBuffer, fill: F) -> Result<()>
where
    F: FnOnce(&mut SdtBuffer) -> Result<()>,
{
    fill_header(Some(&mut *table), TableKind::Hmat, HMAT_LEN)?;
    fill(table)?;

    // (Re)calculate length.
    table.set_length(table_len(table.current())?);
    Ok(())
}
