// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Packing options and per-variant firmware configuration files.

use std::path::Path;

use crate::catalog::Firmwares;
use crate::context::AddressMode;
use crate::signed::SignedOutput;
use crate::types::Soc;
use crate::{AMD_ROMSIG_OFFSET, PackError, Result, read_file};

/// How the level-2 directory of slot B relates to slot A.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbCopy {
    /// Both slots point at the same level-2 directories.
    SingleCopy,
    /// Slot B gets its own copy of every level-2 directory.
    IndependentCopy,
}

/// Shape of the directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topology {
    /// A single directory holding every entry.
    #[default]
    Flat,
    /// A level-1 directory pointing at a level-2 directory.
    TwoLevel,
    /// A level-1 directory pointing at recovery slots A and B.
    RecoveryAb(AbCopy),
}

impl Topology {
    pub fn is_multi_level(self) -> bool {
        self != Topology::Flat
    }

    pub fn is_recovery_ab(self) -> bool {
        matches!(self, Topology::RecoveryAb(_))
    }

    /// Whether slot B has level-2 directories of its own.
    pub fn has_slot_b(self) -> bool {
        self == Topology::RecoveryAb(AbCopy::IndependentCopy)
    }
}

/// SPI settings stored in the EFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpiSettings {
    pub readmode: Option<u8>,
    pub speed: Option<u8>,
    pub micron_flag: u8,
}

/// Image-wide packing options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackOptions {
    /// SoC used when a variant does not name one.
    pub soc: Option<Soc>,
    pub rom_size: u32,
    pub efs_location: u32,
    /// Start of the directories and blobs; defaults to right after the EFS.
    pub body_location: Option<u32>,
    pub topology: Topology,
    /// Put ISH records between the level-1 directory and the A/B slots.
    pub need_ish: bool,
    pub second_gen: bool,
    pub spi: SpiSettings,
    /// APCB backups are configured explicitly, so none are synthesized.
    pub apcb_backup: bool,
    pub token_unlock: bool,
    /// Emit combo directories selecting one of the variants by PSP id.
    pub use_combo: bool,
    pub signed: Option<SignedOutput>,
    pub debug: bool,
}

impl Default for PackOptions {
    fn default() -> Self {
        PackOptions {
            soc: None,
            rom_size: 0x100_0000,
            efs_location: AMD_ROMSIG_OFFSET,
            body_location: None,
            topology: Topology::Flat,
            need_ish: false,
            second_gen: false,
            spi: SpiSettings::default(),
            apcb_backup: false,
            token_unlock: false,
            use_combo: false,
            signed: None,
            debug: false,
        }
    }
}

impl PackOptions {
    /// Address mode of every directory built with these options.
    pub fn address_mode(&self) -> AddressMode {
        if self.need_ish {
            AddressMode::RelativeToTable
        } else if self.second_gen {
            AddressMode::RelativeToBios
        } else {
            AddressMode::Physical
        }
    }

    pub fn body_location(&self) -> u32 {
        self.body_location.unwrap_or(self.efs_location)
    }

    /// Whether the EFS and the body go to separate files.
    pub fn split_body(&self) -> bool {
        self.body_location() != self.efs_location
    }
}

/// One firmware configuration: the SoC it targets and the blobs it provides.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Variant {
    pub soc: Option<Soc>,
    pub firmwares: Firmwares,
}

/// Parse `0x` hexadecimal or decimal.
pub fn parse_number(value: &str) -> Option<u64> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" => Some(true),
        "false" | "no" => Some(false),
        other => parse_number(other).map(|n| n != 0),
    }
}

const SUFFIXES: [&str; 8] = [
    "_REGION_TYPE",
    "_SIGNED",
    "_FILE",
    "_SIZE",
    "_DEST",
    "_SRC",
    "_VALUE",
    "_RO",
];

impl Variant {
    /// Load a configuration file. Relative blob paths are taken from the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let data = read_file(path)?;
        let text = String::from_utf8(data)
            .map_err(|_| PackError::Config(0, format!("{} is not UTF-8", path.display())))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        Self::parse(&text, base_dir)
    }

    /// Parse `KEY VALUE` lines; `#` starts a comment.
    pub fn parse(text: &str, base_dir: &Path) -> Result<Self> {
        let mut variant = Variant::default();
        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once(char::is_whitespace)
                .map(|(key, value)| (key, value.trim()))
                .ok_or_else(|| PackError::Config(line_no, format!("missing value for {line}")))?;
            variant
                .apply(key, value, base_dir)
                .map_err(|msg| PackError::Config(line_no, msg))?;
        }
        Ok(variant)
    }

    fn apply(&mut self, key: &str, value: &str, base_dir: &Path) -> std::result::Result<(), String> {
        if key == "SOC_NAME" {
            self.soc = Some(value.parse().map_err(|err: PackError| err.to_string())?);
            return Ok(());
        }

        let (name, suffix) = SUFFIXES
            .iter()
            .find_map(|suffix| key.strip_suffix(suffix).map(|name| (name, *suffix)))
            .ok_or_else(|| format!("unknown key {key}"))?;
        let number = || parse_number(value).ok_or_else(|| format!("invalid number {value:?}"));
        let path = || base_dir.join(value);
        let unknown = || format!("unknown key {key}");

        if let Some(fw) = self.firmwares.psp_by_name(name) {
            match suffix {
                "_FILE" => fw.filename = Some(path()),
                "_SIZE" => fw.size = number()?,
                "_DEST" => fw.dest = number()?,
                "_VALUE" => fw.other = number()?,
                "_SIGNED" => {
                    fw.signed = parse_bool(value).ok_or_else(|| format!("invalid flag {value:?}"))?
                }
                _ => return Err(unknown()),
            }
        } else if let Some(fw) = self.firmwares.bios_by_name(name) {
            match suffix {
                "_FILE" => fw.filename = Some(path()),
                "_SIZE" => fw.size = number()?,
                "_DEST" => fw.dest = number()?,
                "_SRC" => fw.src = number()?,
                "_RO" => fw.ro = parse_bool(value).ok_or_else(|| format!("invalid flag {value:?}"))?,
                "_REGION_TYPE" => {
                    fw.region_type = u8::try_from(number()?)
                        .map_err(|_| format!("region type {value} does not fit a byte"))?
                }
                _ => return Err(unknown()),
            }
        } else if let Some(fw) = self.firmwares.efs_by_name(name) {
            match suffix {
                "_FILE" => fw.filename = Some(path()),
                _ => return Err(unknown()),
            }
        } else {
            return Err(unknown());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use utils::tempdir::TempDir;

    use std::path::PathBuf;

    use super::*;
    use crate::types::{BiosFwType, PspFwType};

    #[test]
    fn test_topology() {
        assert!(!Topology::Flat.is_multi_level());
        assert!(Topology::TwoLevel.is_multi_level());
        assert!(!Topology::TwoLevel.is_recovery_ab());
        let single = Topology::RecoveryAb(AbCopy::SingleCopy);
        let independent = Topology::RecoveryAb(AbCopy::IndependentCopy);
        assert!(single.is_multi_level() && single.is_recovery_ab());
        assert!(!single.has_slot_b());
        assert!(independent.has_slot_b());
    }

    #[test]
    fn test_address_mode() {
        let mut options = PackOptions::default();
        assert_eq!(options.address_mode(), AddressMode::Physical);
        options.second_gen = true;
        assert_eq!(options.address_mode(), AddressMode::RelativeToBios);
        options.need_ish = true;
        assert_eq!(options.address_mode(), AddressMode::RelativeToTable);
    }

    #[test]
    fn test_body_location() {
        let mut options = PackOptions::default();
        assert_eq!(options.body_location(), AMD_ROMSIG_OFFSET);
        assert!(!options.split_body());
        options.body_location = Some(0x10_0000);
        assert!(options.split_body());
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("0x1000"), Some(0x1000));
        assert_eq!(parse_number("0XfF"), Some(0xff));
        assert_eq!(parse_number("4096"), Some(4096));
        assert_eq!(parse_number("0x"), None);
        assert_eq!(parse_number("12k"), None);
    }

    #[test]
    fn test_parse() {
        let text = "\
# PSP firmware
SOC_NAME cezanne
PSPBTLDR_FILE   blobs/bootloader.bin
SMUFW_SUB1_FILE /abs/smu.sbin
PSP_FUSE_CHAIN_VALUE 0x1  # trailing comment

APOB_DEST 0x400000
APOB_NV_SIZE 0x10000
BIOS_BIN_SRC 0x30000
BIOS_BIN_RO 1
APCB3_REGION_TYPE 2
ABL0_SIGNED true
IMC_FILE imc.bin
";
        let variant = Variant::parse(text, Path::new("/cfg")).unwrap();
        assert_eq!(variant.soc, Some(Soc::Cezanne));
        let mut fw = variant.firmwares.clone();
        assert_eq!(
            fw.psp_by_type(PspFwType::BOOTLOADER).unwrap().filename,
            Some(PathBuf::from("/cfg/blobs/bootloader.bin"))
        );
        assert_eq!(
            fw.psp_by_name("SMUFW_SUB1").unwrap().filename,
            Some(PathBuf::from("/abs/smu.sbin"))
        );
        assert_eq!(fw.psp_by_type(PspFwType::PSP_FUSE_CHAIN).unwrap().other, 1);
        assert!(fw.psp_by_name("ABL0").unwrap().signed);
        assert_eq!(fw.bios_by_name("APOB").unwrap().dest, 0x40_0000);
        assert_eq!(fw.bios_by_name("APOB_NV").unwrap().size, 0x1_0000);
        let bin = fw.bios_by_name("BIOS_BIN").unwrap();
        assert_eq!(bin.desc.kind, BiosFwType::BIN);
        assert_eq!(bin.src, 0x3_0000);
        assert!(bin.ro);
        assert_eq!(fw.bios_by_name("APCB3").unwrap().region_type, 2);
        assert_eq!(
            fw.efs_by_name("IMC").unwrap().filename,
            Some(PathBuf::from("/cfg/imc.bin"))
        );
        assert_eq!(fw.efs_by_name("GEC").unwrap().filename, None);
    }

    #[test]
    fn test_parse_errors() {
        let err = |text: &str| Variant::parse(text, Path::new("")).unwrap_err().to_string();
        assert_eq!(
            err("PSPBTLDR_FILE a\nFOO_FILE b"),
            "Configuration parsing error at line 2: unknown key FOO_FILE"
        );
        assert_eq!(
            err("PSPBTLDR_FILE"),
            "Configuration parsing error at line 1: missing value for PSPBTLDR_FILE"
        );
        assert_eq!(
            err("APOB_DEST 0xZZ"),
            "Configuration parsing error at line 1: invalid number \"0xZZ\""
        );
        assert_eq!(
            err("IMC_SIZE 4"),
            "Configuration parsing error at line 1: unknown key IMC_SIZE"
        );
        assert_eq!(
            err("PSPBTLDR_SRC 4"),
            "Configuration parsing error at line 1: unknown key PSPBTLDR_SRC"
        );
        assert_eq!(
            err("SOC_NAME Zen9"),
            "Configuration parsing error at line 1: Unknown SoC name \"Zen9\""
        );
        assert_eq!(
            err("APCB_REGION_TYPE 0x100"),
            "Configuration parsing error at line 1: region type 0x100 does not fit a byte"
        );
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir.as_path().join("fw.cfg");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"PSPRCVR_FILE recovery.bin\n").unwrap();

        let mut variant = Variant::load(&path).unwrap();
        assert_eq!(
            variant.firmwares.psp_by_name("PSPRCVR").unwrap().filename,
            Some(dir.as_path().join("recovery.bin"))
        );

        let err = Variant::load(&dir.as_path().join("missing.cfg")).unwrap_err();
        assert!(matches!(err, PackError::Io(..)), "{err}");
    }
}
