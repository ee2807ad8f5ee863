// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The Embedded Firmware Structure: SPI settings and the pointers the PSP starts from.

use log::debug;
use zerocopy::little_endian::U32;

use crate::catalog::EfsFirmware;
use crate::config::SpiSettings;
use crate::context::{AddressMode, BuildContext, Offset};
use crate::layout::{EFS_BEFORE_SECOND_GEN, EFS_SECOND_GEN, EmbeddedFirmware};
use crate::types::{EfsFwType, Soc};
use crate::{BLOB_ALIGNMENT, PackError, Result, to_u32};

/// IMC firmware starts on a 64 KiB boundary.
const IMC_ALIGNMENT: u32 = 0x10000;

/// Fill the generation marker and the SPI settings of the SoC family `soc` belongs to.
pub fn set_efs_table(
    efs: &mut EmbeddedFirmware,
    soc: Soc,
    second_gen: bool,
    spi: &SpiSettings,
) -> Result<()> {
    let (Some(readmode), Some(speed)) = (spi.readmode, spi.speed) else {
        return Err(PackError::EfsSpiMode);
    };

    efs.efs_gen = U32::new(if second_gen {
        EFS_SECOND_GEN
    } else {
        EFS_BEFORE_SECOND_GEN
    });

    match soc {
        Soc::Carrizo | Soc::StoneyRidge => {
            efs.spi_readmode_f15_mod_60_6f = readmode;
            efs.fast_speed_new_f15_mod_60_6f = speed;
        }
        Soc::Raven | Soc::Picasso => {
            efs.spi_readmode_f17_mod_00_2f = readmode;
            efs.spi_fastspeed_f17_mod_00_2f = speed;
            efs.qpr_dummy_cycle_f17_mod_00_2f = match spi.micron_flag {
                0 => 0xff,
                1 => 0x0a,
                flag => return Err(PackError::MicronFlag(flag, soc)),
            };
        }
        Soc::Renoir
        | Soc::Lucienne
        | Soc::Cezanne
        | Soc::Mendocino
        | Soc::Phoenix
        | Soc::Glinda
        | Soc::Genoa => {
            efs.spi_readmode_f17_mod_30_3f = readmode;
            efs.spi_fastspeed_f17_mod_30_3f = speed;
            efs.micron_detect_f17_mod_30_3f = match spi.micron_flag {
                0 => 0xff,
                1 => 0xaa,
                2 => 0x55,
                flag => return Err(PackError::MicronFlag(flag, soc)),
            };
        }
    }
    Ok(())
}

/// The EFS at a fixed offset of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Efs {
    offset: Offset,
}

impl Efs {
    /// Write a blank EFS at `location`.
    pub fn create(ctx: &mut BuildContext, location: u32) -> Result<Self> {
        let efs = Efs {
            offset: Offset::new(location),
        };
        ctx.write_obj(efs.offset, &EmbeddedFirmware::new())?;
        Ok(efs)
    }

    pub fn offset(&self) -> Offset {
        self.offset
    }

    pub fn read(&self, ctx: &BuildContext) -> Result<EmbeddedFirmware> {
        ctx.read_obj(self.offset)
    }

    /// Apply `f` to the EFS held in the image.
    pub fn update(
        &self,
        ctx: &mut BuildContext,
        f: impl FnOnce(&mut EmbeddedFirmware) -> Result<()>,
    ) -> Result<()> {
        let mut efs = self.read(ctx)?;
        f(&mut efs)?;
        ctx.write_obj(self.offset, &efs)
    }

    /// Copy the firmware referenced straight from the EFS to the cursor.
    pub fn integrate_firmwares(
        &self,
        ctx: &mut BuildContext,
        firmwares: &[EfsFirmware],
    ) -> Result<()> {
        ctx.adjust_current(0, BLOB_ALIGNMENT)?;

        for fw in firmwares {
            let Some(filename) = &fw.filename else {
                continue;
            };
            if fw.desc.kind == EfsFwType::Imc {
                ctx.adjust_current(0, IMC_ALIGNMENT)?;
            }
            let address = to_u32(ctx.run_current())?;
            let bytes = ctx.copy_blob(filename)?;
            debug!("EFS {:?} firmware at {address:#x}", fw.desc.kind);
            self.update(ctx, |efs| {
                match fw.desc.kind {
                    EfsFwType::Imc => efs.imc_entry = U32::new(address),
                    EfsFwType::Gec => efs.gec_entry = U32::new(address),
                    EfsFwType::Xhci => efs.xhci_entry = U32::new(address),
                }
                Ok(())
            })?;
            ctx.adjust_current(bytes, BLOB_ALIGNMENT)?;
        }
        Ok(())
    }

    /// Point the EFS at the PSP directory (or PSP combo directory) at `dir`.
    pub fn set_psp_directory(
        &self,
        ctx: &mut BuildContext,
        soc: Option<Soc>,
        dir: Offset,
    ) -> Result<()> {
        let address = U32::new(to_u32(
            ctx.run_address_mode(dir, AddressMode::RelativeToBios),
        )?);
        self.update(ctx, |efs| {
            match soc {
                None => efs.psp_directory = address,
                Some(_) => efs.new_psp_directory = address,
            }
            Ok(())
        })
    }

    /// Point the EFS at the BIOS directory (or BIOS combo directory) at `dir`, in the slot
    /// the SoC reads. SoCs finding their BIOS directory through the PSP get nothing.
    pub fn set_bios_directory(
        &self,
        ctx: &mut BuildContext,
        soc: Option<Soc>,
        recovery_ab: bool,
        dir: Offset,
    ) -> Result<()> {
        let address = U32::new(to_u32(
            ctx.run_address_mode(dir, AddressMode::RelativeToBios),
        )?);
        self.update(ctx, |efs| {
            match soc {
                Some(Soc::Renoir | Soc::Lucienne | Soc::Cezanne | Soc::Genoa) => {
                    if !recovery_ab {
                        efs.bios3_entry = address;
                    }
                }
                Some(Soc::Mendocino | Soc::Phoenix | Soc::Glinda) => {}
                _ => efs.bios1_entry = address,
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use utils::tempdir::TempDir;

    use super::*;
    use crate::catalog::Firmwares;

    fn spi(micron_flag: u8) -> SpiSettings {
        SpiSettings {
            readmode: Some(3),
            speed: Some(1),
            micron_flag,
        }
    }

    #[test]
    fn test_spi_settings_per_family() {
        let mut efs = EmbeddedFirmware::new();
        set_efs_table(&mut efs, Soc::StoneyRidge, false, &spi(0)).unwrap();
        assert_eq!(efs.efs_gen.get(), 0xFFFF_FFFF);
        assert_eq!(efs.spi_readmode_f15_mod_60_6f, 3);
        assert_eq!(efs.fast_speed_new_f15_mod_60_6f, 1);
        assert_eq!(efs.spi_readmode_f17_mod_30_3f, 0xff);

        let mut efs = EmbeddedFirmware::new();
        set_efs_table(&mut efs, Soc::Picasso, false, &spi(1)).unwrap();
        assert_eq!(efs.spi_readmode_f17_mod_00_2f, 3);
        assert_eq!(efs.qpr_dummy_cycle_f17_mod_00_2f, 0x0a);

        let mut efs = EmbeddedFirmware::new();
        set_efs_table(&mut efs, Soc::Cezanne, true, &spi(2)).unwrap();
        assert_eq!(efs.efs_gen.get(), 0);
        assert_eq!(efs.spi_fastspeed_f17_mod_30_3f, 1);
        assert_eq!(efs.micron_detect_f17_mod_30_3f, 0x55);
        assert_eq!(efs.spi_readmode_f17_mod_00_2f, 0xff);
    }

    #[test]
    fn test_invalid_spi_settings() {
        let mut efs = EmbeddedFirmware::new();
        let missing = SpiSettings {
            readmode: Some(3),
            ..Default::default()
        };
        let err = set_efs_table(&mut efs, Soc::Renoir, true, &missing).unwrap_err();
        assert!(matches!(err, PackError::EfsSpiMode));

        let err = set_efs_table(&mut efs, Soc::Raven, false, &spi(2)).unwrap_err();
        assert!(matches!(err, PackError::MicronFlag(2, Soc::Raven)), "{err}");
        let err = set_efs_table(&mut efs, Soc::Genoa, true, &spi(3)).unwrap_err();
        assert_eq!(err.to_string(), "Invalid SPI micron flag 0x3 for Genoa");
    }

    fn write_blob(dir: &Path, name: &str, len: usize) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, vec![0x11; len]).unwrap();
        path
    }

    #[test]
    fn test_integrate_firmwares() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = BuildContext::new(0x10_0000).unwrap();
        let efs = Efs::create(&mut ctx, 0x2_0000).unwrap();
        ctx.set_current(0x2_0050).unwrap();

        let mut fw = Firmwares::pristine();
        fw.efs_by_name("XHCI").unwrap().filename = Some(write_blob(tmp.as_path(), "x", 0x10));
        fw.efs_by_name("IMC").unwrap().filename = Some(write_blob(tmp.as_path(), "i", 0x10));
        efs.integrate_firmwares(&mut ctx, &fw.efs).unwrap();

        let table = efs.read(&ctx).unwrap();
        assert_eq!(table.xhci_entry.get(), 0xFFF2_0100);
        assert_eq!(table.imc_entry.get(), 0xFFF3_0000);
        assert_eq!(table.gec_entry.get(), 0);
        assert_eq!(ctx.current().get(), 0x3_0100);
    }

    #[test]
    fn test_directory_pointers() {
        let mut ctx = BuildContext::new(0x100_0000).unwrap();
        let efs = Efs::create(&mut ctx, 0x2_0000).unwrap();
        let dir = Offset::new(0x3_0000);

        efs.set_psp_directory(&mut ctx, None, dir).unwrap();
        let table = efs.read(&ctx).unwrap();
        assert_eq!(table.psp_directory.get(), 0xFF03_0000);
        assert_eq!(table.new_psp_directory.get(), 0xFFFF_FFFF);

        ctx.set_address_mode(AddressMode::RelativeToTable);
        efs.set_psp_directory(&mut ctx, Some(Soc::Cezanne), dir).unwrap();
        assert_eq!(efs.read(&ctx).unwrap().new_psp_directory.get(), 0x3_0000);

        efs.set_bios_directory(&mut ctx, Some(Soc::Cezanne), true, dir).unwrap();
        assert_eq!(efs.read(&ctx).unwrap().bios3_entry.get(), 0xFFFF_FFFF);
        efs.set_bios_directory(&mut ctx, Some(Soc::Cezanne), false, dir).unwrap();
        assert_eq!(efs.read(&ctx).unwrap().bios3_entry.get(), 0x3_0000);

        efs.set_bios_directory(&mut ctx, Some(Soc::Phoenix), false, Offset::new(0x5_0000))
            .unwrap();
        let table = efs.read(&ctx).unwrap();
        assert_eq!(table.bios3_entry.get(), 0x3_0000);
        assert_eq!(table.bios1_entry.get(), 0xFFFF_FFFF);

        efs.set_bios_directory(&mut ctx, Some(Soc::Picasso), false, dir).unwrap();
        assert_eq!(efs.read(&ctx).unwrap().bios1_entry.get(), 0x3_0000);
    }
}
