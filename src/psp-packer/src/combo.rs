// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Combo directories, which let one image serve several SoCs.

use utils::checksum::fletcher32;
use zerocopy::little_endian::{U32, U64};

use crate::context::{BuildContext, Offset};
use crate::directory::check_entry_count;
use crate::layout::{COMBO_ENTRY_LEN, COMBO_HEADER_LEN, ComboEntry, ComboHeader};
use crate::{MAX_COMBO_ENTRIES, PackError, Result, TABLE_ALIGNMENT, to_u32};

/// Bytes after the checksum field covered by the checksum, besides the entries.
const CHECKSUMMED_HEADER_LEN: usize = 16;

/// A combo directory: entries mapping a PSP id to the directory serving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComboDirectory {
    offset: Offset,
}

impl ComboDirectory {
    pub const RESERVED_LEN: usize = COMBO_HEADER_LEN + MAX_COMBO_ENTRIES * COMBO_ENTRY_LEN;

    /// Reserve a combo directory at the next table boundary.
    pub fn new(ctx: &mut BuildContext) -> Result<Self> {
        ctx.adjust_current(0, TABLE_ALIGNMENT)?;
        let dir = ComboDirectory {
            offset: ctx.current(),
        };
        // 64 bytes.
        #[allow(clippy::cast_possible_truncation)]
        let len = Self::RESERVED_LEN as u32;
        ctx.adjust_current(len, 1)?;
        Ok(dir)
    }

    pub fn offset(&self) -> Offset {
        self.offset
    }

    pub fn header(&self, ctx: &BuildContext) -> Result<ComboHeader> {
        ctx.read_obj(self.offset)
    }

    fn entry_offset(&self, index: usize) -> Result<Offset> {
        check_entry_count("combo", index, MAX_COMBO_ENTRIES)?;
        let delta = COMBO_HEADER_LEN + index * COMBO_ENTRY_LEN;
        u32::try_from(delta)
            .ok()
            .and_then(|delta| self.offset.checked_add(delta))
            .ok_or(PackError::TooManyEntries("combo", index, MAX_COMBO_ENTRIES))
    }

    pub fn entry(&self, ctx: &BuildContext, index: usize) -> Result<ComboEntry> {
        ctx.read_obj(self.entry_offset(index)?)
    }

    /// Select the directory at run-time address `address` for SoCs with PSP id `psp_id`.
    pub fn set_entry(
        &self,
        ctx: &mut BuildContext,
        index: usize,
        psp_id: u32,
        address: u64,
    ) -> Result<()> {
        let entry = ComboEntry {
            // Match on the PSP id rather than the chip family.
            id_sel: U32::ZERO,
            id: U32::new(psp_id),
            lvl2_addr: U64::new(address),
        };
        ctx.write_obj(self.entry_offset(index)?, &entry)
    }

    /// Finalize a combo directory holding `count` entries. Nothing is written for an empty one.
    pub fn fill_header(&self, ctx: &mut BuildContext, count: usize, cookie: u32) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        ctx.adjust_current(0, TABLE_ALIGNMENT)?;

        let mut header = ComboHeader {
            cookie: U32::new(cookie),
            checksum: U32::ZERO,
            num_entries: U32::new(to_u32(utils::usize_to_u64(count))?),
            lookup: U32::new(1),
            reserved: [U32::ZERO; 4],
        };
        ctx.write_obj(self.offset, &header)?;

        let start = self.offset.checked_add(8).ok_or(PackError::Overflow(
            u64::from(self.offset.get()) + 8,
            ctx.rom_size(),
        ))?;
        let covered = count * COMBO_ENTRY_LEN + CHECKSUMMED_HEADER_LEN;
        header.checksum = U32::new(fletcher32(ctx.bytes(start, covered)?));
        ctx.write_obj(self.offset, &header)
    }
}
