// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! BIOS directory assembly.
//!
//! Entries are updated in place: the bits of an entry slot the packager does not own (ROM id
//! and writable flag) keep whatever the image held before.

use log::debug;
use zerocopy::little_endian::{U32, U64};

use crate::catalog::BiosFirmware;
use crate::config::PackOptions;
use crate::context::{AddressMode, BuildContext};
use crate::directory::{BiosDirectory, check_entry_count};
use crate::layout::{BHD_COOKIE, BHDL2_COOKIE, BIOS_ENTRY_LEN, BiosEntry, BiosFlags};
use crate::types::{BiosFwType, Level};
use crate::{
    BLOB_ALIGNMENT, ERASE_ALIGNMENT, MAX_BIOS_ENTRIES, PackError, Result, TABLE_ALIGNMENT,
    TABLE_ERASE_ALIGNMENT, to_u32,
};

/// Bytes a level-1 directory claims for the level-2 directory it points at.
const L2_PTR_SIZE: usize = MAX_BIOS_ENTRIES * BIOS_ENTRY_LEN;

/// Position of a BIOS directory in the directory tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BiosTier {
    Flat,
    Level2,
    Level1 { l2: BiosDirectory },
}

impl BiosTier {
    pub fn level(&self) -> Level {
        match self {
            BiosTier::Flat => Level::BOTH,
            BiosTier::Level2 => Level::LVL2,
            BiosTier::Level1 { .. } => Level::LVL1,
        }
    }

    pub fn cookie(&self) -> u32 {
        match self {
            BiosTier::Level2 => BHDL2_COOKIE,
            BiosTier::Flat | BiosTier::Level1 { .. } => BHD_COOKIE,
        }
    }
}

/// Reserve a BIOS directory at the cursor. Its entry count is left as the image holds it.
pub fn new_bios_dir(ctx: &mut BuildContext, options: &PackOptions) -> Result<BiosDirectory> {
    let align = if options.topology.is_multi_level() {
        TABLE_ERASE_ALIGNMENT
    } else {
        TABLE_ALIGNMENT
    };
    BiosDirectory::reserve(ctx, align, 1, false)
}

/// Source address and size of the BIOS image referenced by a level-2 directory.
fn locate_l2_bios_bin(ctx: &BuildContext, l2: BiosDirectory) -> Result<Option<(u64, u32)>> {
    let count = l2.num_entries(ctx)?.min(MAX_BIOS_ENTRIES);
    for i in 0..count {
        let entry = l2.entry(ctx, i)?;
        if entry.kind == BiosFwType::BIN.0 {
            return Ok(Some((entry.source_address(), entry.size.get())));
        }
    }
    Ok(None)
}

/// Decide whether `fw` goes in the directory. Entries that cannot be placed are skipped,
/// unless their configuration is contradictory, which is fatal.
fn should_place(fw: &BiosFirmware, apob_dest: u64) -> Result<bool> {
    let kind = fw.desc.kind;
    let placed_without_file = [
        BiosFwType::SIG,
        BiosFwType::APOB,
        BiosFwType::APOB_NV,
        BiosFwType::L2_PTR,
        BiosFwType::BIN,
        BiosFwType::PSP_SHARED_MEM,
    ];
    if fw.filename.is_none() && !placed_without_file.contains(&kind) {
        return Ok(false);
    }

    match kind {
        BiosFwType::SIG if fw.size == 0 => Ok(false),
        BiosFwType::APOB_NV => {
            if fw.size == 0 && fw.src == 0 {
                return Ok(false);
            }
            if fw.size == 0 {
                return Err(PackError::ApobNvSize);
            }
            // Without APOB data there is nothing to keep in NV storage.
            Ok(apob_dest != 0)
        }
        BiosFwType::APOB if fw.dest == 0 => Err(PackError::ApobDestination),
        BiosFwType::BIN => {
            if fw.dest == 0 || fw.size == 0 {
                return Err(PackError::BiosBinPlacement);
            }
            if fw.filename.is_none() && fw.src == 0 {
                return Err(PackError::BiosBinSource);
            }
            Ok(true)
        }
        BiosFwType::PSP_SHARED_MEM => Ok(fw.dest != 0 && fw.size != 0),
        _ => Ok(true),
    }
}

/// Set the fields every entry takes from its configuration.
fn describe(entry: &mut BiosEntry, fw: &BiosFirmware) {
    entry.kind = fw.desc.kind.0;
    entry.region_type = fw.region_type;
    entry.dest = U64::new(if fw.dest != 0 { fw.dest } else { u64::MAX });
    entry.set_flags(BiosFlags {
        reset: fw.desc.reset,
        copy: fw.desc.copy,
        ro: fw.ro,
        compressed: fw.desc.compressed,
        inst: fw.desc.inst,
    });
    entry.set_subprog(fw.desc.subprog);
}

fn blob_name(fw: &BiosFirmware) -> String {
    fw.filename
        .as_ref()
        .map_or_else(|| fw.desc.config_name(), |f| f.display().to_string())
}

/// Fill `dir` with every firmware of its tier, point a level-1 directory at its level-2
/// directory and finalize the header.
///
/// Unless `have_apcb_bk` is set, every APCB is followed by a backup entry referencing the
/// same copy.
pub fn integrate_bios_firmwares(
    ctx: &mut BuildContext,
    options: &PackOptions,
    dir: BiosDirectory,
    tier: BiosTier,
    firmwares: &[BiosFirmware],
    have_apcb_bk: bool,
) -> Result<()> {
    let level = tier.level();
    let apob_dest = firmwares
        .iter()
        .find(|fw| fw.desc.kind == BiosFwType::APOB)
        .map_or(0, |fw| fw.dest);

    ctx.with_table(dir.offset(), |ctx| {
        ctx.adjust_current(0, TABLE_ALIGNMENT)?;

        let mut count = 0;
        for fw in firmwares.iter().filter(|fw| fw.desc.level.intersects(level)) {
            if !should_place(fw, apob_dest)? {
                continue;
            }
            check_entry_count("BIOS", count, MAX_BIOS_ENTRIES)?;

            let mut entry = dir.entry(ctx, count)?;
            describe(&mut entry, fw);

            match fw.desc.kind {
                BiosFwType::SIG => {
                    // Reserved for a signature added after packing.
                    let size = to_u32(fw.size)?;
                    entry.size = U32::new(size);
                    entry.set_source(ctx.run_current(), dir.table_mode(ctx)?);
                    ctx.fill(ctx.current(), size, 0xFF)?;
                    ctx.adjust_current(size, BLOB_ALIGNMENT)?;
                }
                BiosFwType::APOB => {
                    entry.size = U32::new(to_u32(fw.size)?);
                    entry.set_source(fw.src, dir.table_mode(ctx)?);
                }
                BiosFwType::APOB_NV => {
                    let mode = dir.entry_mode(ctx, AddressMode::RelativeToBios)?;
                    if fw.src != 0 {
                        entry.set_source(fw.src, mode);
                        entry.size = U32::new(to_u32(fw.size)?);
                    } else {
                        ctx.adjust_current(0, ERASE_ALIGNMENT)?;
                        let size = to_u32(utils::align_up(fw.size, u64::from(ERASE_ALIGNMENT)))?;
                        entry.set_source(ctx.run_current(), mode);
                        entry.size = U32::new(size);
                        ctx.fill(ctx.current(), size, 0xFF)?;
                        ctx.adjust_current(size, 1)?;
                    }
                }
                BiosFwType::BIN => {
                    let mode = dir.entry_mode(ctx, AddressMode::RelativeToBios)?;
                    let l2_copy = match tier {
                        BiosTier::Level1 { l2 } => locate_l2_bios_bin(ctx, l2)?,
                        _ => None,
                    };
                    if let Some((source, size)) = l2_copy {
                        // Share the level-2 copy instead of adding a second one.
                        entry.set_source(source, mode);
                        entry.size = U32::new(size);
                    } else {
                        entry.set_source(fw.src, mode);
                        entry.dest = U64::new(fw.dest);
                        entry.size = U32::new(to_u32(fw.size)?);
                        if let Some(filename) = &fw.filename {
                            let bytes = ctx.copy_blob(filename)?;
                            if bytes == 0 {
                                return Err(PackError::EmptyBlob(blob_name(fw)));
                            }
                            entry.set_source(
                                ctx.run_address_mode(ctx.current(), AddressMode::RelativeToBios),
                                mode,
                            );
                            ctx.adjust_current(bytes, BLOB_ALIGNMENT)?;
                        }
                    }
                }
                BiosFwType::PSP_SHARED_MEM => {
                    entry.dest = U64::new(fw.dest);
                    entry.size = U32::new(to_u32(fw.size)?);
                }
                kind => {
                    if kind == BiosFwType::APCB || kind == BiosFwType::APCB_BK {
                        ctx.adjust_current(0, ERASE_ALIGNMENT)?;
                    }
                    let bytes = match &fw.filename {
                        Some(filename) => ctx.copy_blob(filename)?,
                        None => 0,
                    };
                    if bytes == 0 {
                        return Err(PackError::EmptyBlob(blob_name(fw)));
                    }
                    entry.size = U32::new(bytes);
                    entry.set_source(ctx.run_current(), dir.table_mode(ctx)?);
                    ctx.adjust_current(bytes, BLOB_ALIGNMENT)?;
                }
            }

            debug!(
                "BIOS entry {count}: type {} size {:#x} at {:#x}",
                fw.desc.kind,
                entry.size.get(),
                entry.source_address()
            );
            dir.set_entry(ctx, count, &entry)?;

            count += 1;
            if fw.desc.kind == BiosFwType::APCB
                && !have_apcb_bk
                && add_apcb_backup(ctx, dir, count, firmwares, fw.desc.inst, &entry)?
            {
                count += 1;
            }
        }

        if let BiosTier::Level1 { l2 } = tier {
            check_entry_count("BIOS", count, MAX_BIOS_ENTRIES)?;
            let mut entry = dir.entry(ctx, count)?;
            entry.kind = BiosFwType::L2_PTR.0;
            entry.region_type = 0;
            entry.size = U32::new(to_u32(utils::usize_to_u64(L2_PTR_SIZE))?);
            entry.set_source(
                ctx.run_address(l2.offset()),
                dir.entry_mode(ctx, AddressMode::RelativeToBios)?,
            );
            entry.set_subprog(0);
            entry.set_flags(BiosFlags::default());
            entry.dest = U64::new(u64::MAX);
            dir.set_entry(ctx, count, &entry)?;
            count += 1;
        }

        dir.fill_header(ctx, count, tier.cookie(), options.need_ish)
    })
}

/// Write at `index` a backup entry sharing the copy of the APCB described by `apcb`, with
/// the placement attributes configured for the backup of instance `inst`. Returns whether an
/// entry was written.
fn add_apcb_backup(
    ctx: &mut BuildContext,
    dir: BiosDirectory,
    index: usize,
    firmwares: &[BiosFirmware],
    inst: u8,
    apcb: &BiosEntry,
) -> Result<bool> {
    let Some(backup) = firmwares
        .iter()
        .find(|fw| fw.desc.kind == BiosFwType::APCB_BK && fw.desc.inst == inst)
    else {
        return Ok(false);
    };
    check_entry_count("BIOS", index, MAX_BIOS_ENTRIES)?;

    let mut entry = dir.entry(ctx, index)?;
    describe(&mut entry, backup);
    entry.size = apcb.size;
    entry.set_source(apcb.source_address(), dir.table_mode(ctx)?);
    dir.set_entry(ctx, index, &entry)?;
    Ok(true)
}
