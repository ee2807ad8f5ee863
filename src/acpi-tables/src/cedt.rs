// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! CXL Early Discovery Table (CEDT)

use log::error;
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::sdt::SdtBuffer;
use crate::{Result, SDT_HEADER_LEN, TableKind, fill_header, table_len};

const CEDT_CHBS: u8 = 0;
const CEDT_CFMWS: u8 = 1;

pub const CHBS_CXL_VER_1_1: u32 = 0;
pub const CHBS_CXL_VER_2_0: u32 = 1;

/// Largest encoded number of interleave ways.
const MAX_ENIW: u8 = 7;

/// CXL Host Bridge Structure
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct Chbs {
    pub r#type: u8,
    reserved: u8,
    pub length: U16,
    pub uid: U32,
    pub cxl_ver: U32,
    reserved1: U32,
    pub base: U64,
    /// Size of the register block.
    pub len: U64,
}

#[allow(clippy::cast_possible_truncation)]
const CHBS_LEN: u16 = std::mem::size_of::<Chbs>() as u16;

impl Chbs {
    /// An unknown CXL version is reported and leaves the register block size at 0.
    pub fn new(uid: u32, cxl_ver: u32, base: u64) -> Self {
        let len = match cxl_ver {
            CHBS_CXL_VER_1_1 => 8 << 10,
            CHBS_CXL_VER_2_0 => 64 << 10,
            _ => {
                error!("acpi: CEDT: Incorrect CXL version: {cxl_ver}");
                0
            }
        };
        Chbs {
            r#type: CEDT_CHBS,
            length: U16::new(CHBS_LEN),
            uid: U32::new(uid),
            cxl_ver: U32::new(cxl_ver),
            base: U64::new(base),
            len: U64::new(len),
            ..Default::default()
        }
    }
}

/// Fixed part of the CXL Fixed Memory Window Structure, followed by the interleave targets
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct Cfmws {
    pub r#type: u8,
    reserved: u8,
    pub length: U16,
    reserved1: U32,
    pub base_hpa: U64,
    pub window_size: U64,
    /// Encoded number of interleave ways: 2^eniw targets.
    pub eniw: u8,
    pub interleave_arithmetic: u8,
    reserved2: U16,
    /// Host bridge interleave granularity.
    pub hbig: U32,
    pub restriction: U16,
    pub qtg_id: U16,
}

/// Memory window description for [`append_cfmws`].
#[derive(Debug, Clone, Default)]
pub struct FixedMemoryWindow {
    pub base_hpa: u64,
    pub window_size: u64,
    pub eniw: u8,
    pub hbig: u32,
    pub restriction: u16,
    pub qtg_id: u16,
    /// Host bridge uids, at least 2^eniw of them.
    pub interleave_targets: Vec<u32>,
}

/// Append a CHBS and return its offset in the table.
pub fn append_chbs(table: &mut SdtBuffer, uid: u32, cxl_ver: u32, base: u64) -> usize {
    table.append(&Chbs::new(uid, cxl_ver, base))
}

/// Append a CFMWS with its interleave target list and return its offset in the table.
///
/// An out of range `eniw` is reported and the structure is written without targets.
pub fn append_cfmws(table: &mut SdtBuffer, window: &FixedMemoryWindow) -> usize {
    let niw = if window.eniw > MAX_ENIW {
        error!("acpi: CEDT: Incorrect eniw: {}", window.eniw);
        0
    } else {
        1usize << window.eniw
    };
    // At most 36 + 4 * 128 bytes.
    #[allow(clippy::cast_possible_truncation)]
    let length = (std::mem::size_of::<Cfmws>() + 4 * niw) as u16;

    let cfmws = Cfmws {
        r#type: CEDT_CFMWS,
        length: U16::new(length),
        base_hpa: U64::new(window.base_hpa),
        window_size: U64::new(window.window_size),
        eniw: window.eniw,
        // Standard modulo arithmetic.
        interleave_arithmetic: 0,
        hbig: U32::new(window.hbig),
        restriction: U16::new(window.restriction),
        qtg_id: U16::new(window.qtg_id),
        ..Default::default()
    };
    let offset = table.append(&cfmws);
    for index in 0..niw {
        let target = window.interleave_targets.get(index).copied().unwrap_or(0);
        table.append(&U32::new(target));
    }
    offset
}

/// Build the CEDT; `fill` appends the CHBS and CFMWS structures.
pub fn create_cedt<F>(table: &mut SdtBuffer, fill: F) -> Result<()>
where
    F: FnOnce(&mut SdtBuffer) -> Result<()>,
{
    fill_header(Some(&mut *table), TableKind::Cedt, table_len(SDT_HEADER_LEN)?)?;
    fill(table)?;

    // (Re)calculate length.
    table.set_length(table_len(table.current())?);
    Ok(())
}
