// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! PSP directory assembly.

use log::debug;
use zerocopy::little_endian::U32;

use crate::catalog::PspFirmware;
use crate::config::PackOptions;
use crate::context::{AddressMode, BuildContext, Offset};
use crate::directory::{PspDirectory, check_entry_count};
use crate::layout::{
    DIRECTORY_HEADER_LEN, ISH_LEN, IshDirectory, PSP_COOKIE, PSP_ENTRY_LEN, PSPL2_COOKIE, PspEntry,
};
use crate::types::{Level, PspFwType, Soc, psp_id};
use crate::{
    BLOB_ALIGNMENT, BLOB_ERASE_ALIGNMENT, ERASE_ALIGNMENT, MAX_PSP_ENTRIES, PackError, Result,
    TABLE_ALIGNMENT, TABLE_ERASE_ALIGNMENT, to_u32,
};

/// Size of the slot reserved for the token unlock data.
const TOKEN_UNLOCK_SIZE: u32 = 0x1000;

/// Position of a PSP directory in the directory tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PspTier {
    /// The only directory.
    Flat,
    /// A level-2 directory, the only kind holding most firmware.
    Level2,
    /// The level-1 directory and the level-2 directories it points at. `slot_b` is only set
    /// when slot B has level-2 directories of its own.
    Level1 {
        slot_a: PspDirectory,
        slot_b: Option<PspDirectory>,
    },
}

impl PspTier {
    /// Catalog levels placed in a directory of this tier.
    pub fn level(&self, recovery_ab: bool) -> Level {
        match (self, recovery_ab) {
            (PspTier::Flat, false) => Level::BOTH,
            (PspTier::Flat, true) => Level::BOTH_AB,
            (PspTier::Level2, false) => Level::LVL2,
            (PspTier::Level2, true) => Level::LVL2_AB,
            (PspTier::Level1 { .. }, false) => Level::LVL1,
            (PspTier::Level1 { .. }, true) => Level::LVL1_AB,
        }
    }

    pub fn cookie(&self) -> u32 {
        match self {
            PspTier::Level2 => PSPL2_COOKIE,
            PspTier::Flat | PspTier::Level1 { .. } => PSP_COOKIE,
        }
    }
}

/// Image Slot Header record of an A/B slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IshSlot(Offset);

impl IshSlot {
    pub fn offset(&self) -> Offset {
        self.0
    }
}

/// Reserve an empty PSP directory at the cursor.
pub fn new_psp_dir(ctx: &mut BuildContext, options: &PackOptions) -> Result<PspDirectory> {
    // Separate erase blocks let a level-2 directory be reprogrammed without touching level 1.
    let align = if options.topology.is_multi_level() {
        TABLE_ERASE_ALIGNMENT
    } else {
        TABLE_ALIGNMENT
    };
    let align_end = if options.need_ish { TABLE_ALIGNMENT } else { 1 };
    PspDirectory::reserve(ctx, align, align_end, true)
}

/// Reserve a 4 KiB ISH record at the next table boundary.
pub fn new_ish_dir(ctx: &mut BuildContext) -> Result<IshSlot> {
    ctx.adjust_current(0, TABLE_ALIGNMENT)?;
    let slot = IshSlot(ctx.current());
    ctx.adjust_current(TABLE_ALIGNMENT, 1)?;
    Ok(slot)
}

/// Place one firmware and describe it, or `None` when it is not part of this image.
fn place_psp_firmware(
    ctx: &mut BuildContext,
    dir: PspDirectory,
    fw: &PspFirmware,
) -> Result<Option<PspEntry>> {
    let mut entry = PspEntry::new(fw.desc.kind.0, fw.desc.subprog);

    if fw.desc.kind == PspFwType::TOKEN_UNLOCK {
        if fw.other == 0 {
            return Ok(None);
        }
        ctx.adjust_current(0, ERASE_ALIGNMENT)?;
        entry.size = U32::new(TOKEN_UNLOCK_SIZE);
        entry.set_address(ctx.run_current(), dir.table_mode(ctx)?);
        ctx.adjust_current(TOKEN_UNLOCK_SIZE, BLOB_ALIGNMENT)?;
    } else if fw.desc.kind == PspFwType::PSP_FUSE_CHAIN {
        entry.size = U32::new(u32::MAX);
        entry.set_address(fw.other, 0);
    } else if fw.desc.kind.is_nvram() {
        let (size, addr) = match &fw.filename {
            None if fw.size == 0 => return Ok(None),
            None => {
                if fw.dest != utils::align_up(fw.dest, u64::from(ERASE_ALIGNMENT)) {
                    return Err(PackError::NvramAlignment(fw.dest));
                }
                (to_u32(fw.size)?, fw.dest)
            }
            Some(filename) => {
                ctx.adjust_current(0, ERASE_ALIGNMENT)?;
                let bytes = ctx.copy_blob(filename)?;
                if bytes == 0 {
                    return Err(PackError::EmptyBlob(filename.display().to_string()));
                }
                let size = to_u32(utils::align_up(
                    u64::from(bytes),
                    u64::from(ERASE_ALIGNMENT),
                ))?;
                let addr = ctx.run_current();
                ctx.adjust_current(bytes, BLOB_ERASE_ALIGNMENT)?;
                (size, addr)
            }
        };
        entry.size = U32::new(size);
        entry.set_address(addr, dir.entry_mode(ctx, AddressMode::RelativeToBios)?);
    } else if let Some(filename) = &fw.filename {
        let bytes = match fw.addr_signed {
            Some(addr_signed) => {
                let addr = ctx.run_offset(addr_signed, ctx.address_mode());
                entry.set_address(addr, dir.table_mode(ctx)?);
                fw.file_size
            }
            None => {
                let bytes = ctx.copy_blob(filename)?;
                entry.set_address(ctx.run_current(), dir.table_mode(ctx)?);
                ctx.adjust_current(bytes, BLOB_ALIGNMENT)?;
                bytes
            }
        };
        entry.set_inst(fw.desc.inst);
        entry.size = U32::new(bytes);
    } else {
        return Ok(None);
    }

    Ok(Some(entry))
}

/// Fill `dir` with every firmware of its tier, followed by the pointers to level 2 for a
/// level-1 directory, and finalize its header.
pub fn integrate_psp_firmwares(
    ctx: &mut BuildContext,
    options: &PackOptions,
    soc: Option<Soc>,
    dir: PspDirectory,
    tier: PspTier,
    firmwares: &[PspFirmware],
) -> Result<()> {
    let recovery_ab = options.topology.is_recovery_ab();
    let level = tier.level(recovery_ab);

    ctx.with_table(dir.offset(), |ctx| {
        ctx.adjust_current(0, TABLE_ALIGNMENT)?;

        let mut count = 0;
        for fw in firmwares.iter().filter(|fw| fw.desc.level.intersects(level)) {
            check_entry_count("PSP", count, MAX_PSP_ENTRIES)?;
            if let Some(entry) = place_psp_firmware(ctx, dir, fw)? {
                debug!(
                    "PSP entry {count}: type {} size {:#x} at {:#x}",
                    fw.desc.kind,
                    entry.size.get(),
                    entry.address()
                );
                dir.set_entry(ctx, count, &entry)?;
                count += 1;
            }
        }

        if let PspTier::Level1 { slot_a, slot_b } = tier {
            if recovery_ab {
                let (ish_a, ish_b) = if options.need_ish {
                    let ish_a = new_ish_dir(ctx)?;
                    let ish_b = match slot_b {
                        Some(_) => Some(new_ish_dir(ctx)?),
                        None => None,
                    };
                    (Some(ish_a), ish_b)
                } else {
                    (None, None)
                };

                let mut header = dir.header(ctx)?;
                header.num_entries = U32::new(to_u32(utils::usize_to_u64(count))?);
                dir.set_header(ctx, &header)?;

                // Phoenix only boots from entries of type A.
                let kind_b = if soc == Some(Soc::Phoenix) {
                    PspFwType::RECOVERYAB_A
                } else {
                    PspFwType::RECOVERYAB_B
                };
                integrate_psp_ab(ctx, soc, dir, slot_a, ish_a, PspFwType::RECOVERYAB_A)?;
                match slot_b {
                    Some(slot_b) => integrate_psp_ab(ctx, soc, dir, slot_b, ish_b, kind_b)?,
                    None => integrate_psp_ab(ctx, soc, dir, slot_a, ish_a, kind_b)?,
                }
                count = dir.num_entries(ctx)?;
            } else {
                check_entry_count("PSP", count, MAX_PSP_ENTRIES)?;
                let mut entry = PspEntry::new(PspFwType::L2_PTR.0, 0);
                let l2_entries = slot_a.num_entries(ctx)?;
                entry.size = U32::new(to_u32(utils::usize_to_u64(
                    DIRECTORY_HEADER_LEN + l2_entries * PSP_ENTRY_LEN,
                ))?);
                entry.set_address(
                    ctx.run_address_mode(slot_a.offset(), AddressMode::RelativeToBios),
                    dir.entry_mode(ctx, AddressMode::RelativeToBios)?,
                );
                dir.set_entry(ctx, count, &entry)?;
                count += 1;
            }
        }

        dir.fill_header(ctx, count, tier.cookie(), options.need_ish)
    })
}

/// Append to `dir` the entry of kind `ab` that boots the slot whose level-2 directory is
/// `l2`, through its ISH record when there is one.
pub fn integrate_psp_ab(
    ctx: &mut BuildContext,
    soc: Option<Soc>,
    dir: PspDirectory,
    l2: PspDirectory,
    ish: Option<IshSlot>,
    ab: PspFwType,
) -> Result<()> {
    ctx.with_table(dir.offset(), |ctx| {
        let count = dir.num_entries(ctx)?;
        check_entry_count("PSP", count, MAX_PSP_ENTRIES)?;

        let mut entry = PspEntry::new(ab.0, 0);
        let mode = dir.entry_mode(ctx, AddressMode::RelativeToBios)?;
        match ish {
            Some(ish) => {
                let mut record: IshDirectory = ctx.read_obj(ish.offset())?;
                record.pl2_location = U32::new(to_u32(
                    ctx.run_address_mode(l2.offset(), AddressMode::RelativeToBios),
                )?);
                record.boot_priority = U32::new(if ab == PspFwType::RECOVERYAB_A {
                    u32::MAX
                } else {
                    1
                });
                record.update_retry_count = U32::new(2);
                record.glitch_retry_count = 0;
                record.psp_id = U32::new(psp_id(soc));
                ctx.write_obj(ish.offset(), &record)?;

                let body = ish.offset().checked_add(4).ok_or(PackError::Overflow(
                    u64::from(ish.offset().get()) + 4,
                    ctx.rom_size(),
                ))?;
                let checksum = utils::checksum::fletcher32(ctx.bytes(body, ISH_LEN - 4)?);
                record.checksum = U32::new(checksum);
                ctx.write_obj(ish.offset(), &record)?;

                entry.set_address(
                    ctx.run_address_mode(ish.offset(), AddressMode::RelativeToBios),
                    mode,
                );
                entry.size = U32::new(TABLE_ALIGNMENT);
            }
            None => {
                entry.set_address(
                    ctx.run_address_mode(l2.offset(), AddressMode::RelativeToBios),
                    mode,
                );
                let l2_len = DIRECTORY_HEADER_LEN
                    + l2.num_entries(ctx)? * PSP_ENTRY_LEN;
                entry.size = U32::new(TABLE_ALIGNMENT.max(to_u32(utils::usize_to_u64(l2_len))?));
            }
        }
        dir.set_entry(ctx, count, &entry)?;

        let mut header = dir.header(ctx)?;
        header.num_entries = U32::new(to_u32(utils::usize_to_u64(count + 1))?);
        dir.set_header(ctx, &header)
    })
}

/// Point the entry of type `kind` in `dir` at `table`, appending one when none exists, and
/// re-checksum the directory.
pub fn add_psp_firmware_entry(
    ctx: &mut BuildContext,
    dir: PspDirectory,
    table: Offset,
    kind: PspFwType,
    size: u32,
) -> Result<()> {
    ctx.with_table(dir.offset(), |ctx| {
        let mut count = dir.num_entries(ctx)?;
        let mut index = count;
        for i in 0..count {
            if dir.entry(ctx, i)?.kind == kind.0 {
                index = i;
                break;
            }
        }
        check_entry_count("PSP", count, MAX_PSP_ENTRIES)?;

        let mut entry = PspEntry::new(kind.0, 0);
        entry.set_address(ctx.run_address(table), dir.table_mode(ctx)?);
        entry.size = U32::new(size);
        dir.set_entry(ctx, index, &entry)?;
        if index == count {
            count += 1;
        }

        let mut header = dir.header(ctx)?;
        header.num_entries = U32::new(to_u32(utils::usize_to_u64(count))?);
        dir.set_header(ctx, &header)?;
        dir.update_checksum(ctx, count)
    })
}
