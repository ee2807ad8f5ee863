// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use clap::Parser;
use log::info;
use psp_packer::config::{AbCopy, SpiSettings, parse_number};
use psp_packer::logger::{LOGGER, LoggerConfig, LoggerInitError, LoggerUpdateError};
use psp_packer::manifest::write_manifest;
use psp_packer::signed::SignedOutput;
use psp_packer::{AMD_ROMSIG_OFFSET, PackError, PackOptions, Soc, Topology, Variant, pack};

#[derive(Debug, thiserror::Error, displaydoc::Display)]
enum PackerError {
    /// Failed to initialize the logger: {0}
    LoggerInit(#[from] LoggerInitError),
    /// Failed to configure the logger: {0}
    LoggerUpdate(#[from] LoggerUpdateError),
    /// {0}
    Pack(#[from] PackError),
}

fn parse_u64(value: &str) -> Result<u64, String> {
    parse_number(value).ok_or_else(|| format!("invalid number {value:?}"))
}

fn parse_u32(value: &str) -> Result<u32, String> {
    u32::try_from(parse_u64(value)?).map_err(|_| format!("{value} does not fit 32 bits"))
}

fn parse_u8(value: &str) -> Result<u8, String> {
    u8::try_from(parse_u64(value)?).map_err(|_| format!("{value} does not fit 8 bits"))
}

/// Pack AMD PSP and BIOS firmware directories into a flash image.
#[derive(Debug, Parser)]
#[command(version = format!("v{}", env!("CARGO_PKG_VERSION")))]
struct Cli {
    /// Firmware configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Configuration of another SoC served through the combo directories.
    #[arg(long)]
    combo_config: Vec<PathBuf>,
    /// Output file.
    #[arg(long)]
    output: PathBuf,
    /// SoC of configurations that do not name one.
    #[arg(long)]
    soc_name: Option<Soc>,
    #[arg(long, value_parser = parse_u32, default_value = "0x1000000")]
    rom_size: u32,
    /// Offset of the EFS in the image.
    #[arg(long, value_parser = parse_u32, default_value_t = AMD_ROMSIG_OFFSET)]
    efs_location: u32,
    /// Offset of the directories. When it differs from the EFS location, the body is written
    /// to `<output>.body`.
    #[arg(long, value_parser = parse_u32)]
    body_location: Option<u32>,
    /// Build level-1 and level-2 directories.
    #[arg(long)]
    multilevel: bool,
    /// Build A/B recovery slots with their own level-2 directories.
    #[arg(long, conflicts_with = "recovery_ab_single_copy")]
    recovery_ab: bool,
    /// Build A/B recovery slots sharing one set of level-2 directories.
    #[arg(long)]
    recovery_ab_single_copy: bool,
    /// Reach the recovery slots through Image Slot Headers.
    #[arg(long)]
    need_ish: bool,
    /// The EFS uses the second generation layout.
    #[arg(long)]
    second_gen: bool,
    #[arg(long, value_parser = parse_u8)]
    spi_readmode: Option<u8>,
    #[arg(long, value_parser = parse_u8)]
    spi_speed: Option<u8>,
    #[arg(long, value_parser = parse_u8, default_value = "0")]
    spi_micron_flag: u8,
    /// APCB backups come from the configuration instead of being synthesized.
    #[arg(long)]
    apcb_backup: bool,
    /// Reserve the token unlock slot.
    #[arg(long)]
    token_unlock: bool,
    /// Emit combo directories for the configurations.
    #[arg(long)]
    use_combo: bool,
    /// Write the versions of the packed PSP firmware here.
    #[arg(long)]
    manifest: Option<PathBuf>,
    /// Collect separately signed PSP firmware into this file.
    #[arg(long, requires = "signed_addr")]
    signed_output: Option<PathBuf>,
    /// Flash offset of the signed firmware file.
    #[arg(long, value_parser = parse_u64, requires = "signed_output")]
    signed_addr: Option<u64>,
    /// Log to this file instead of standard error.
    #[arg(long)]
    log_path: Option<PathBuf>,
    /// Log the catalogs and every placement.
    #[arg(long)]
    debug: bool,
}

impl Cli {
    fn topology(&self) -> Topology {
        if self.recovery_ab {
            Topology::RecoveryAb(AbCopy::IndependentCopy)
        } else if self.recovery_ab_single_copy {
            Topology::RecoveryAb(AbCopy::SingleCopy)
        } else if self.multilevel {
            Topology::TwoLevel
        } else {
            Topology::Flat
        }
    }

    fn options(&self) -> PackOptions {
        let signed = match (&self.signed_output, self.signed_addr) {
            (Some(path), Some(start_addr)) => Some(SignedOutput {
                path: path.clone(),
                start_addr,
            }),
            _ => None,
        };
        PackOptions {
            soc: self.soc_name,
            rom_size: self.rom_size,
            efs_location: self.efs_location,
            body_location: self.body_location,
            topology: self.topology(),
            need_ish: self.need_ish,
            second_gen: self.second_gen,
            spi: SpiSettings {
                readmode: self.spi_readmode,
                speed: self.spi_speed,
                micron_flag: self.spi_micron_flag,
            },
            apcb_backup: self.apcb_backup,
            token_unlock: self.token_unlock,
            use_combo: self.use_combo,
            signed,
            debug: self.debug,
        }
    }

    fn config_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.config.iter().chain(self.combo_config.iter())
    }
}

fn main_exec() -> Result<(), PackerError> {
    let cli = Cli::parse();

    LOGGER.init()?;
    LOGGER.update(LoggerConfig {
        log_path: cli.log_path.clone(),
        level: cli.debug.then_some(log::LevelFilter::Debug),
        ..Default::default()
    })?;

    let mut variants = cli
        .config_paths()
        .map(|path| Variant::load(path))
        .collect::<Result<Vec<_>, _>>()?;
    let image = pack(&cli.options(), &mut variants)?;
    image.write(&cli.output)?;
    info!("Wrote {}", cli.output.display());

    if let (Some(path), Some(variant)) = (&cli.manifest, variants.last()) {
        write_manifest(path, &variant.firmwares.psp)?;
    }
    Ok(())
}

fn main() -> Result<(), PackerError> {
    let result = main_exec();
    if let Err(e) = result {
        eprintln!("{}", e);
        Err(e)
    } else {
        Ok(())
    }
}
