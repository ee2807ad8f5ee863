// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Directory tables living inside the image, addressed by their offset.

use std::marker::PhantomData;

use utils::checksum::fletcher32;
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::context::{AddressMode, BuildContext, Offset};
use crate::layout::{BiosEntry, DIRECTORY_HEADER_LEN, DirectoryHeader, PSP_COOKIE, PspEntry};
use crate::{MAX_BIOS_ENTRIES, MAX_PSP_ENTRIES, PackError, Result, TABLE_ALIGNMENT};

/// Entry type of a directory table.
pub trait DirectoryEntry: FromBytes + IntoBytes + Immutable + Copy {
    /// Name used in diagnostics.
    const KIND: &'static str;
    /// Capacity of the entry array.
    const MAX_ENTRIES: usize;
}

impl DirectoryEntry for PspEntry {
    const KIND: &'static str = "PSP";
    const MAX_ENTRIES: usize = MAX_PSP_ENTRIES;
}

impl DirectoryEntry for BiosEntry {
    const KIND: &'static str = "BIOS";
    const MAX_ENTRIES: usize = MAX_BIOS_ENTRIES;
}

/// Fail when `count` entries already fill a table of `max` entries.
pub fn check_entry_count(kind: &'static str, count: usize, max: usize) -> Result<()> {
    if count >= max {
        return Err(PackError::TooManyEntries(kind, count, max));
    }
    Ok(())
}

/// A directory table at a fixed offset of the image.
#[derive(Debug)]
pub struct Directory<E> {
    offset: Offset,
    entry: PhantomData<E>,
}

impl<E> Clone for Directory<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for Directory<E> {}

impl<E> PartialEq for Directory<E> {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset
    }
}

pub type PspDirectory = Directory<PspEntry>;
pub type BiosDirectory = Directory<BiosEntry>;

impl<E: DirectoryEntry> Directory<E> {
    /// Size of the header plus a full entry array.
    pub const RESERVED_LEN: usize =
        DIRECTORY_HEADER_LEN + E::MAX_ENTRIES * std::mem::size_of::<E>();

    pub fn at(offset: Offset) -> Self {
        Directory {
            offset,
            entry: PhantomData,
        }
    }

    pub fn offset(&self) -> Offset {
        self.offset
    }

    /// Reserve a table at the cursor: align it to `align`, reset its header to an empty table
    /// in the context's address mode, then move past the full entry array and up to
    /// `align_end`.
    pub fn reserve(
        ctx: &mut BuildContext,
        align: u32,
        align_end: u32,
        reset_count: bool,
    ) -> Result<Self> {
        ctx.adjust_current(0, align)?;
        let dir = Self::at(ctx.current());
        let mut header = dir.header(ctx)?;
        if reset_count {
            header.num_entries = U32::ZERO;
        }
        header.additional_info = U32::ZERO;
        header.set_address_mode(ctx.address_mode());
        dir.set_header(ctx, &header)?;

        // The entry array is well under 4 GiB.
        #[allow(clippy::cast_possible_truncation)]
        let len = Self::RESERVED_LEN as u32;
        ctx.adjust_current(len, align_end)?;
        Ok(dir)
    }

    pub fn header(&self, ctx: &BuildContext) -> Result<DirectoryHeader> {
        ctx.read_obj(self.offset)
    }

    pub fn set_header(&self, ctx: &mut BuildContext, header: &DirectoryHeader) -> Result<()> {
        ctx.write_obj(self.offset, header)
    }

    pub fn num_entries(&self, ctx: &BuildContext) -> Result<usize> {
        Ok(utils::u64_to_usize(u64::from(
            self.header(ctx)?.num_entries.get(),
        )))
    }

    fn entry_offset(&self, index: usize) -> Result<Offset> {
        check_entry_count(E::KIND, index, E::MAX_ENTRIES)?;
        let delta = DIRECTORY_HEADER_LEN + index * std::mem::size_of::<E>();
        u32::try_from(delta)
            .ok()
            .and_then(|delta| self.offset.checked_add(delta))
            .ok_or(PackError::TooManyEntries(E::KIND, index, E::MAX_ENTRIES))
    }

    pub fn entry(&self, ctx: &BuildContext, index: usize) -> Result<E> {
        ctx.read_obj(self.entry_offset(index)?)
    }

    pub fn set_entry(&self, ctx: &mut BuildContext, index: usize, entry: &E) -> Result<()> {
        ctx.write_obj(self.entry_offset(index)?, entry)
    }

    /// Mode field for an entry requesting `requested`: only tables that are themselves
    /// relative-to-table carry a non-zero mode in their entries.
    pub fn entry_mode(&self, ctx: &BuildContext, requested: AddressMode) -> Result<u8> {
        let table_mode = self.header(ctx)?.address_mode();
        Ok(if table_mode == AddressMode::RelativeToTable as u8 {
            requested as u8
        } else {
            0
        })
    }

    /// Mode field for an entry using the table's own mode.
    pub fn table_mode(&self, ctx: &BuildContext) -> Result<u8> {
        let table_mode = self.header(ctx)?.address_mode();
        Ok(if table_mode == AddressMode::RelativeToTable as u8 {
            table_mode
        } else {
            0
        })
    }

    /// Recompute the Fletcher-32 checksum over everything after the checksum field up to the
    /// last of `count` entries.
    pub fn update_checksum(&self, ctx: &mut BuildContext, count: usize) -> Result<()> {
        let covered = 8 + count * std::mem::size_of::<E>();
        let start = self.offset.checked_add(8).ok_or(PackError::Overflow(
            u64::from(self.offset.get()) + 8,
            ctx.rom_size(),
        ))?;
        let checksum = fletcher32(ctx.bytes(start, covered)?);
        let mut header = self.header(ctx)?;
        header.checksum = U32::new(checksum);
        self.set_header(ctx, &header)
    }

    /// Finalize a table holding `count` entries that spans from the current table to the
    /// cursor. Nothing is written for an empty table.
    ///
    /// The table end is aligned to 4 KiB and its size recorded in 4 KiB units. A level-1 PSP
    /// directory followed by ISH records only covers its first 4 KiB.
    pub fn fill_header(
        &self,
        ctx: &mut BuildContext,
        count: usize,
        cookie: u32,
        need_ish: bool,
    ) -> Result<()> {
        if count == 0 {
            return Ok(());
        }

        ctx.adjust_current(0, TABLE_ALIGNMENT)?;
        let table_size = if cookie == PSP_COOKIE && need_ish {
            TABLE_ALIGNMENT
        } else {
            ctx.current().get().wrapping_sub(ctx.current_table().get())
        };
        if table_size % TABLE_ALIGNMENT != 0 {
            return Err(PackError::TableSizeAlignment(E::KIND, table_size));
        }

        let mut header = self.header(ctx)?;
        header.cookie = U32::new(cookie);
        header.num_entries = U32::new(
            u32::try_from(count).map_err(|_| {
                PackError::TooManyEntries(E::KIND, count, E::MAX_ENTRIES)
            })?,
        );
        header.set_dir_size(table_size / TABLE_ALIGNMENT);
        header.set_spi_block_size(1);
        header.set_base_addr(0);
        self.set_header(ctx, &header)?;
        self.update_checksum(ctx, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{BHD_COOKIE, PSPL2_COOKIE};

    #[test]
    fn test_reserved_lengths() {
        assert_eq!(PspDirectory::RESERVED_LEN, 16 + 0x2f * 16);
        assert_eq!(BiosDirectory::RESERVED_LEN, 16 + 0x3f * 24);
    }

    #[test]
    fn test_reserve() {
        let mut ctx = BuildContext::new(0x10000).unwrap();
        ctx.set_address_mode(AddressMode::RelativeToTable);
        ctx.set_current(0x10).unwrap();
        let dir = PspDirectory::reserve(&mut ctx, 0x1000, 0x1000, true).unwrap();
        assert_eq!(dir.offset().get(), 0x1000);
        assert_eq!(ctx.current().get(), 0x2000);
        let header = dir.header(&ctx).unwrap();
        assert_eq!(header.num_entries.get(), 0);
        assert_eq!(header.address_mode(), 2);
        // Cookie and checksum stay erased until the table is finalized.
        assert_eq!(header.cookie.get(), 0xFFFF_FFFF);

        let bios = BiosDirectory::reserve(&mut ctx, 0x1000, 1, false).unwrap();
        assert_eq!(bios.offset().get(), 0x2000);
        assert_eq!(ctx.current().get(), 0x2000 + 16 + 0x3f * 24);
        assert_eq!(bios.header(&ctx).unwrap().num_entries.get(), 0xFFFF_FFFF);
    }

    #[test]
    fn test_entry_modes() {
        let mut ctx = BuildContext::new(0x4000).unwrap();
        ctx.set_address_mode(AddressMode::RelativeToBios);
        let dir = PspDirectory::reserve(&mut ctx, 0x1000, 1, true).unwrap();
        assert_eq!(dir.entry_mode(&ctx, AddressMode::RelativeToBios).unwrap(), 0);
        assert_eq!(dir.table_mode(&ctx).unwrap(), 0);

        ctx.set_address_mode(AddressMode::RelativeToTable);
        let dir = PspDirectory::reserve(&mut ctx, 0x1000, 1, true).unwrap();
        assert_eq!(dir.entry_mode(&ctx, AddressMode::RelativeToBios).unwrap(), 1);
        assert_eq!(dir.table_mode(&ctx).unwrap(), 2);
    }

    #[test]
    fn test_entry_capacity() {
        let mut ctx = BuildContext::new(0x4000).unwrap();
        let dir = PspDirectory::reserve(&mut ctx, 0x1000, 1, true).unwrap();
        let entry = PspEntry::new(1, 0);
        dir.set_entry(&mut ctx, MAX_PSP_ENTRIES - 1, &entry).unwrap();
        let err = dir.set_entry(&mut ctx, MAX_PSP_ENTRIES, &entry).unwrap_err();
        assert!(matches!(err, PackError::TooManyEntries("PSP", 0x2f, 0x2f)), "{err}");
        assert!(check_entry_count("BIOS", 0x3e, MAX_BIOS_ENTRIES).is_ok());
        assert!(check_entry_count("BIOS", 0x3f, MAX_BIOS_ENTRIES).is_err());
    }

    #[test]
    fn test_fill_header() {
        let mut ctx = BuildContext::new(0x10000).unwrap();
        let dir = PspDirectory::reserve(&mut ctx, 0x1000, 1, true).unwrap();
        let mut entry = PspEntry::new(0x01, 0);
        entry.size = U32::new(0x100);
        entry.set_address(0xFFFF_2000, 0);
        dir.set_entry(&mut ctx, 0, &entry).unwrap();
        ctx.adjust_current(0x1500, 1).unwrap();

        ctx.with_table(dir.offset(), |ctx| dir.fill_header(ctx, 1, PSPL2_COOKIE, false))
            .unwrap();
        assert_eq!(ctx.current().get(), 0x2000);
        let header = dir.header(&ctx).unwrap();
        assert_eq!(header.cookie.get(), PSPL2_COOKIE);
        assert_eq!(header.num_entries.get(), 1);
        assert_eq!(header.dir_size(), 2);
        assert_eq!(header.spi_block_size(), 1);
        assert_eq!(header.base_addr(), 0);

        let covered = ctx.bytes(Offset::new(8), 8 + 16).unwrap();
        assert_eq!(header.checksum.get(), fletcher32(covered));
    }

    #[test]
    fn test_fill_header_level1_with_ish() {
        let mut ctx = BuildContext::new(0x10000).unwrap();
        let dir = PspDirectory::reserve(&mut ctx, 0x1000, 0x1000, true).unwrap();
        // ISH records after the table.
        ctx.adjust_current(0x2000, 1).unwrap();
        ctx.with_table(dir.offset(), |ctx| dir.fill_header(ctx, 2, PSP_COOKIE, true))
            .unwrap();
        assert_eq!(dir.header(&ctx).unwrap().dir_size(), 1);
    }

    #[test]
    fn test_empty_table_is_left_alone() {
        let mut ctx = BuildContext::new(0x4000).unwrap();
        let dir = BiosDirectory::reserve(&mut ctx, 0x1000, 1, false).unwrap();
        let before = ctx.current();
        ctx.with_table(dir.offset(), |ctx| dir.fill_header(ctx, 0, BHD_COOKIE, false))
            .unwrap();
        assert_eq!(ctx.current(), before);
        assert_eq!(dir.header(&ctx).unwrap().cookie.get(), 0xFFFF_FFFF);
    }

    #[test]
    fn test_unaligned_table_is_fatal() {
        let mut ctx = BuildContext::new(0x4000).unwrap();
        let dir = BiosDirectory::reserve(&mut ctx, 0x1000, 1, false).unwrap();
        let err = ctx
            .with_table(Offset::new(0x10), |ctx| dir.fill_header(ctx, 1, BHD_COOKIE, false))
            .unwrap_err();
        assert!(matches!(err, PackError::TableSizeAlignment("BIOS", 0xff0)), "{err}");
    }
}
