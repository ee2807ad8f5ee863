// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The packing pass: EFS, directory trees for every variant and the resulting image.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::bios::{BiosTier, integrate_bios_firmwares, new_bios_dir};
use crate::combo::ComboDirectory;
use crate::config::{PackOptions, Variant};
use crate::context::{AddressMode, BuildContext};
use crate::directory::{BiosDirectory, PspDirectory};
use crate::efs::{Efs, set_efs_table};
use crate::layout::{BHD2_COOKIE, EFS_LEN, PSP2_COOKIE};
use crate::psp::{PspTier, add_psp_firmware_entry, integrate_psp_firmwares, new_psp_dir};
use crate::signed::process_signed_psp_firmwares;
use crate::types::{PspFwType, Soc, psp_id};
use crate::{MAX_COMBO_ENTRIES, PackError, Result, TABLE_ALIGNMENT, write_file};

/// Alignment of the first directory on SoCs that need one.
const BODY_ALIGNMENT: u32 = 0x10000;

/// A packed flash image and the parts of it that get written out.
#[derive(Debug)]
pub struct PackedImage {
    rom: Vec<u8>,
    efs_location: u32,
    body_location: u32,
    end: u32,
}

impl PackedImage {
    /// The whole image, including the erased space around the written range.
    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    /// Offset just past the last byte written.
    pub fn end(&self) -> u32 {
        self.end
    }

    fn split_body(&self) -> bool {
        self.efs_location != self.body_location
    }

    fn range(&self, start: u32, end: u32) -> &[u8] {
        let start = utils::u64_to_usize(u64::from(start));
        let end = utils::u64_to_usize(u64::from(end));
        self.rom.get(start..end).unwrap_or_default()
    }

    /// Bytes of the main output: the EFS alone when the body is split off, else everything
    /// from the EFS on.
    pub fn output_bytes(&self) -> &[u8] {
        if self.split_body() {
            // EFS_LEN is a small constant.
            #[allow(clippy::cast_possible_truncation)]
            let efs_end = self.efs_location + EFS_LEN as u32;
            self.range(self.efs_location, efs_end)
        } else {
            self.range(self.efs_location, self.end)
        }
    }

    /// Bytes of the separate body output, if there is one.
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.split_body()
            .then(|| self.range(self.body_location, self.end))
    }

    /// Where the body goes when the main output is written to `output`.
    pub fn body_path(output: &Path) -> PathBuf {
        let mut path = output.as_os_str().to_owned();
        path.push(".body");
        PathBuf::from(path)
    }

    /// Write the main output to `output`, and the body next to it when split.
    pub fn write(&self, output: &Path) -> Result<()> {
        write_file(output, self.output_bytes())?;
        if let Some(body) = self.body_bytes() {
            write_file(&Self::body_path(output), body)?;
        }
        Ok(())
    }
}

/// Tables built for one variant that the image-wide structures point at.
#[derive(Debug)]
struct VariantTables {
    psp: PspDirectory,
    bios: Option<BiosDirectory>,
}

/// Build the PSP and BIOS directory trees of one variant.
fn pack_variant(
    ctx: &mut BuildContext,
    options: &PackOptions,
    soc: Option<Soc>,
    variant: &Variant,
) -> Result<VariantTables> {
    let topology = options.topology;
    let fw = &variant.firmwares;

    let (psp, psp_l2) = if topology.is_multi_level() {
        // Level 2 first, so that level 1 can point at it.
        let slot_a = new_psp_dir(ctx, options)?;
        integrate_psp_firmwares(ctx, options, soc, slot_a, PspTier::Level2, &fw.psp)?;
        let slot_b = if topology.has_slot_b() {
            let dir = new_psp_dir(ctx, options)?;
            integrate_psp_firmwares(ctx, options, soc, dir, PspTier::Level2, &fw.psp)?;
            Some(dir)
        } else {
            None
        };
        let l1 = new_psp_dir(ctx, options)?;
        let tier = PspTier::Level1 { slot_a, slot_b };
        integrate_psp_firmwares(ctx, options, soc, l1, tier, &fw.psp)?;
        (l1, Some((slot_a, slot_b)))
    } else {
        let dir = new_psp_dir(ctx, options)?;
        integrate_psp_firmwares(ctx, options, soc, dir, PspTier::Flat, &fw.psp)?;
        (dir, None)
    };

    if !fw.has_bios_tables() {
        return Ok(VariantTables { psp, bios: None });
    }

    let have_apcb_bk = options.apcb_backup || fw.has_apcb_backup();
    let bios = match psp_l2 {
        Some((psp_a, psp_b)) => {
            let l2 = new_bios_dir(ctx, options)?;
            integrate_bios_firmwares(ctx, options, l2, BiosTier::Level2, &fw.bios, have_apcb_bk)?;
            if topology.is_recovery_ab() {
                // Each slot reaches its BIOS directory through its own PSP directory.
                add_psp_firmware_entry(ctx, psp_a, l2.offset(), PspFwType::BIOS_TABLE, TABLE_ALIGNMENT)?;
                if let Some(psp_b) = psp_b {
                    let l2_b = new_bios_dir(ctx, options)?;
                    integrate_bios_firmwares(
                        ctx,
                        options,
                        l2_b,
                        BiosTier::Level2,
                        &fw.bios,
                        have_apcb_bk,
                    )?;
                    add_psp_firmware_entry(
                        ctx,
                        psp_b,
                        l2_b.offset(),
                        PspFwType::BIOS_TABLE,
                        TABLE_ALIGNMENT,
                    )?;
                }
                None
            } else {
                let l1 = new_bios_dir(ctx, options)?;
                let tier = BiosTier::Level1 { l2 };
                integrate_bios_firmwares(ctx, options, l1, tier, &fw.bios, have_apcb_bk)?;
                Some(l1)
            }
        }
        None => {
            let dir = new_bios_dir(ctx, options)?;
            integrate_bios_firmwares(ctx, options, dir, BiosTier::Flat, &fw.bios, have_apcb_bk)?;
            Some(dir)
        }
    };
    Ok(VariantTables { psp, bios })
}

/// Pack `variants` into one image. Without combo directories only the first variant is used.
///
/// `variants` receive the addresses of their separately signed blobs.
pub fn pack(options: &PackOptions, variants: &mut [Variant]) -> Result<PackedImage> {
    if variants.len() > MAX_COMBO_ENTRIES {
        return Err(PackError::TooManyVariants(variants.len(), MAX_COMBO_ENTRIES));
    }
    let mut fallback = [Variant::default()];
    let variants = if variants.is_empty() {
        &mut fallback[..]
    } else {
        variants
    };
    let used = if options.use_combo { variants.len() } else { 1 };
    if used < variants.len() {
        warn!("Without combo directories only the first configuration is packed");
    }

    let mut ctx = BuildContext::new(options.rom_size)?;
    let efs = Efs::create(&mut ctx, options.efs_location)?;

    let first_soc = variants[0].soc.or(options.soc);
    match first_soc {
        Some(soc) => efs.update(&mut ctx, |table| {
            set_efs_table(table, soc, options.second_gen, &options.spi)
        })?,
        None => warn!("No SOC name specified"),
    }

    ctx.set_address_mode(options.address_mode());
    if options.split_body() {
        ctx.set_current(u64::from(options.body_location()))?;
    } else {
        ctx.set_current(u64::from(efs.offset().get()) + utils::usize_to_u64(EFS_LEN))?;
    }
    efs.integrate_firmwares(&mut ctx, &variants[0].firmwares.efs)?;

    if first_soc.is_none_or(Soc::needs_initial_alignment) {
        ctx.adjust_current(0, BODY_ALIGNMENT)?;
    }

    if let Some(signed) = &options.signed {
        process_signed_psp_firmwares(signed, &mut variants[0].firmwares)?;
    }

    let combo = if options.use_combo {
        let psp = ComboDirectory::new(&mut ctx)?;
        ctx.adjust_current(0, TABLE_ALIGNMENT)?;
        let bhd = ComboDirectory::new(&mut ctx)?;
        Some((psp, bhd))
    } else {
        None
    };

    for (index, variant) in variants.iter_mut().take(used).enumerate() {
        info!("Packing configuration {index}");
        ctx.set_address_mode(options.address_mode());
        if options.token_unlock {
            if let Some(fw) = variant.firmwares.psp_by_type(PspFwType::TOKEN_UNLOCK) {
                fw.other = 1;
            }
        }
        if options.debug {
            variant.firmwares.dump();
        }

        let soc = variant.soc.or(options.soc);
        let tables = pack_variant(&mut ctx, options, soc, variant)?;

        match combo {
            None => efs.set_psp_directory(&mut ctx, soc, tables.psp.offset())?,
            Some((psp_combo, _)) => {
                efs.set_psp_directory(&mut ctx, soc, psp_combo.offset())?;
                let address =
                    ctx.run_address_mode(tables.psp.offset(), AddressMode::RelativeToBios);
                psp_combo.set_entry(&mut ctx, index, psp_id(soc), address)?;
                psp_combo.fill_header(&mut ctx, index + 1, PSP2_COOKIE)?;
            }
        }

        let Some(bios) = tables.bios else {
            continue;
        };
        let recovery_ab = options.topology.is_recovery_ab();
        match combo {
            None => efs.set_bios_directory(&mut ctx, soc, recovery_ab, bios.offset())?,
            Some((_, bhd_combo)) => {
                efs.set_bios_directory(&mut ctx, soc, recovery_ab, bhd_combo.offset())?;
                let address = ctx.run_address_mode(bios.offset(), AddressMode::RelativeToBios);
                bhd_combo.set_entry(&mut ctx, index, psp_id(soc), address)?;
                bhd_combo.fill_header(&mut ctx, index + 1, BHD2_COOKIE)?;
            }
        }
    }

    let end = ctx.current().get();
    info!("Packed {:#x} bytes", end.saturating_sub(options.body_location()));
    Ok(PackedImage {
        rom: ctx.into_rom(),
        efs_location: options.efs_location,
        body_location: options.body_location(),
        end,
    })
}
