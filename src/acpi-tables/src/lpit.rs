// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Low Power Idle Table (LPIT)

use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::platform::{LpiState, Platform};
use crate::sdt::SdtBuffer;
use crate::{GenericAddressStructure, Result, SDT_HEADER_LEN, TableKind, fill_header, table_len};

const LPI_DESC_TYPE_NATIVE_CSTATE: u32 = 0;
/// The state is not used by the OS.
const LPI_FLAG_DISABLED: u32 = 1 << 0;

/// Native C-state based LPI descriptor
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct LpiDescNcst {
    pub desc_type: U32,
    pub length: U32,
    pub uid: U16,
    reserved: U16,
    pub flags: U32,
    pub entry_trigger: GenericAddressStructure,
    pub min_residency: U32,
    pub max_latency: U32,
    pub residency_counter: GenericAddressStructure,
    pub counter_frequency: U64,
}

#[allow(clippy::cast_possible_truncation)]
const LPI_DESC_NCST_LEN: u32 = std::mem::size_of::<LpiDescNcst>() as u32;

impl LpiDescNcst {
    pub fn new(state: &LpiState) -> Self {
        LpiDescNcst {
            desc_type: U32::new(LPI_DESC_TYPE_NATIVE_CSTATE),
            length: U32::new(LPI_DESC_NCST_LEN),
            uid: U16::new(state.uid),
            reserved: U16::ZERO,
            flags: U32::new(if state.disabled { LPI_FLAG_DISABLED } else { 0 }),
            entry_trigger: state.entry_trigger,
            min_residency: U32::new(state.min_residency),
            max_latency: U32::new(state.max_latency),
            residency_counter: state.residency_counter,
            counter_frequency: U64::new(state.counter_frequency),
        }
    }
}

/// Build the LPIT with one native C-state descriptor per low power idle state.
pub fn create_lpit<P: Platform + ?Sized>(table: &mut SdtBuffer, platform: &P) -> Result<()> {
    if !platform.config().lpit {
        return Ok(());
    }

    fill_header(Some(&mut *table), TableKind::Lpit, table_len(SDT_HEADER_LEN)?)?;
    for state in platform.lpit_states() {
        table.append(&LpiDescNcst::new(&state));
    }

    // (Re)calculate length.
    table.set_length(table_len(table.current())?);
    Ok(())
}
