// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Firmware type codes, directory levels and supported SoCs.

use std::fmt;
use std::str::FromStr;

use crate::PackError;

/// Type code of a PSP directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PspFwType(pub u8);

impl PspFwType {
    pub const PSP_PUBKEY: Self = Self(0x00);
    pub const BOOTLOADER: Self = Self(0x01);
    pub const SECURED_OS: Self = Self(0x02);
    pub const RECOVERY: Self = Self(0x03);
    pub const PSP_NVRAM: Self = Self(0x04);
    pub const RTM_PUBKEY: Self = Self(0x05);
    pub const SMU_FIRMWARE: Self = Self(0x08);
    pub const SECURED_DEBUG: Self = Self(0x09);
    pub const ABL_PUBKEY: Self = Self(0x0a);
    pub const PSP_FUSE_CHAIN: Self = Self(0x0b);
    pub const PSP_TRUSTLETS: Self = Self(0x0c);
    pub const PSP_TRUSTLETKEY: Self = Self(0x0d);
    pub const SMU_FIRMWARE2: Self = Self(0x12);
    pub const DEBUG_UNLOCK: Self = Self(0x13);
    pub const PSP_BOOT_DRIVER: Self = Self(0x1b);
    pub const PSP_SOC_DRIVER: Self = Self(0x1c);
    pub const PSP_DEBUG_DRIVER: Self = Self(0x1d);
    pub const PSP_INTERFACE_DRIVER: Self = Self(0x1f);
    pub const HW_IPCFG: Self = Self(0x20);
    pub const WRAPPED_IKEK: Self = Self(0x21);
    pub const TOKEN_UNLOCK: Self = Self(0x22);
    pub const SEC_GASKET: Self = Self(0x24);
    pub const MP2_FW: Self = Self(0x25);
    pub const DRIVER_ENTRIES: Self = Self(0x28);
    pub const KVM_IMAGE: Self = Self(0x29);
    pub const MP5: Self = Self(0x2a);
    pub const S0I3_DRIVER: Self = Self(0x2d);
    pub const ABL0: Self = Self(0x30);
    pub const ABL1: Self = Self(0x31);
    pub const ABL2: Self = Self(0x32);
    pub const ABL3: Self = Self(0x33);
    pub const ABL4: Self = Self(0x34);
    pub const ABL5: Self = Self(0x35);
    pub const ABL6: Self = Self(0x36);
    pub const ABL7: Self = Self(0x37);
    pub const SEV_DATA: Self = Self(0x38);
    pub const SEV_CODE: Self = Self(0x39);
    pub const PSP_WHITELIST: Self = Self(0x3a);
    pub const VBIOS_BTLOADER: Self = Self(0x3c);
    pub const L2_PTR: Self = Self(0x40);
    pub const DXIO: Self = Self(0x42);
    pub const USB_PHY: Self = Self(0x44);
    pub const TOS_SEC_POLICY: Self = Self(0x45);
    pub const DRTM_TA: Self = Self(0x47);
    pub const RECOVERYAB_A: Self = Self(0x48);
    pub const BIOS_TABLE: Self = Self(0x49);
    pub const RECOVERYAB_B: Self = Self(0x4a);
    pub const KEYDB_BL: Self = Self(0x50);
    pub const KEYDB_TOS: Self = Self(0x51);
    pub const PSP_VERSTAGE: Self = Self(0x52);
    pub const VERSTAGE_SIG: Self = Self(0x53);
    pub const RPMC_NVRAM: Self = Self(0x54);
    pub const SPL: Self = Self(0x55);
    pub const DMCU_ERAM: Self = Self(0x58);
    pub const DMCU_ISR: Self = Self(0x59);
    pub const MSMU: Self = Self(0x5a);
    pub const SPIROM_CFG: Self = Self(0x5c);
    pub const MPIO: Self = Self(0x5d);
    pub const PSP_SMUSCS: Self = Self(0x5f);
    pub const DMCUB: Self = Self(0x71);
    pub const PSP_BOOTLOADER_AB: Self = Self(0x73);
    pub const RIB: Self = Self(0x76);
    pub const AMF_SRAM: Self = Self(0x85);
    pub const AMF_DRAM: Self = Self(0x86);
    pub const AMF_WLAN: Self = Self(0x88);
    pub const AMF_MFD: Self = Self(0x89);
    pub const MPDMA_TF: Self = Self(0x8c);
    pub const TA_IKEK: Self = Self(0x8d);
    pub const MPCCX: Self = Self(0x90);
    pub const GMI3_PHY: Self = Self(0x91);
    pub const MPDMA_PM: Self = Self(0x92);
    pub const LSDMA: Self = Self(0x94);
    pub const C20_MP: Self = Self(0x95);
    pub const FCFG_TABLE: Self = Self(0x98);
    pub const MINIMSMU: Self = Self(0x9a);
    pub const SRAM_FW_EXT: Self = Self(0x9d);
    pub const UMSMU: Self = Self(0xa2);

    /// Types whose blob is a persistent store rather than code.
    pub fn is_nvram(self) -> bool {
        self == Self::PSP_NVRAM || self == Self::RPMC_NVRAM
    }
}

impl fmt::Display for PspFwType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Type code of a BIOS directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BiosFwType(pub u8);

impl BiosFwType {
    pub const RTM_PUBKEY: Self = Self(0x05);
    pub const SIG: Self = Self(0x07);
    pub const APCB: Self = Self(0x60);
    pub const APOB: Self = Self(0x61);
    pub const BIN: Self = Self(0x62);
    pub const APOB_NV: Self = Self(0x63);
    pub const PMUI: Self = Self(0x64);
    pub const PMUD: Self = Self(0x65);
    pub const UCODE: Self = Self(0x66);
    pub const APCB_BK: Self = Self(0x68);
    pub const MP2_CFG: Self = Self(0x6a);
    pub const PSP_SHARED_MEM: Self = Self(0x6b);
    pub const L2_PTR: Self = Self(0x70);
}

impl fmt::Display for BiosFwType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Firmware referenced directly from the EFS rather than from a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EfsFwType {
    Xhci,
    Imc,
    Gec,
}

/// Set of directory levels an entry is placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Level(u8);

impl Level {
    pub const LVL1: Self = Self(1);
    pub const LVL2: Self = Self(2);
    pub const BOTH: Self = Self(3);
    pub const LVL1_AB: Self = Self(4);
    pub const LVL2_AB: Self = Self(8);
    pub const BOTH_AB: Self = Self(12);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether the two sets share a level.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// SoCs with a known EFS layout and PSP id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Soc {
    Carrizo,
    StoneyRidge,
    Raven,
    Picasso,
    Renoir,
    Lucienne,
    Cezanne,
    Mendocino,
    Phoenix,
    Glinda,
    Genoa,
}

impl Soc {
    pub const ALL: [Soc; 11] = [
        Soc::Carrizo,
        Soc::StoneyRidge,
        Soc::Raven,
        Soc::Picasso,
        Soc::Renoir,
        Soc::Lucienne,
        Soc::Cezanne,
        Soc::Mendocino,
        Soc::Phoenix,
        Soc::Glinda,
        Soc::Genoa,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Soc::Carrizo => "Carrizo",
            Soc::StoneyRidge => "Stoneyridge",
            Soc::Raven => "Raven",
            Soc::Picasso => "Picasso",
            Soc::Renoir => "Renoir",
            Soc::Lucienne => "Lucienne",
            Soc::Cezanne => "Cezanne",
            Soc::Mendocino => "Mendocino",
            Soc::Phoenix => "Phoenix",
            Soc::Glinda => "Glinda",
            Soc::Genoa => "Genoa",
        }
    }

    /// Identifier the PSP matches against combo directory entries and ISH records.
    pub const fn psp_id(self) -> u32 {
        match self {
            Soc::Raven | Soc::Picasso => 0xBC0A_0000,
            Soc::Renoir | Soc::Lucienne => 0xBC0C_0000,
            Soc::Cezanne => 0xBC0C_0140,
            Soc::Mendocino => 0xBC0D_0900,
            Soc::StoneyRidge => 0x1022_0B00,
            Soc::Glinda => 0xBC0E_0200,
            Soc::Phoenix => 0xBC0D_0400,
            Soc::Genoa => 0xBC0C_0111,
            Soc::Carrizo => 0,
        }
    }

    /// Whether the body starts on a 64 KiB boundary.
    pub const fn needs_initial_alignment(self) -> bool {
        !matches!(self, Soc::Mendocino | Soc::Phoenix | Soc::Glinda)
    }
}

impl fmt::Display for Soc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Soc {
    type Err = PackError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Soc::ALL
            .into_iter()
            .find(|soc| soc.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| PackError::UnknownSoc(name.to_string()))
    }
}

/// PSP id of an optional SoC; unknown platforms use 0.
pub fn psp_id(soc: Option<Soc>) -> u32 {
    soc.map_or(0, Soc::psp_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soc_from_str() {
        assert_eq!("renoir".parse::<Soc>().unwrap(), Soc::Renoir);
        assert_eq!("StoneyRidge".parse::<Soc>().unwrap(), Soc::StoneyRidge);
        assert_eq!("GENOA".parse::<Soc>().unwrap(), Soc::Genoa);
        let err = "Zen9".parse::<Soc>().unwrap_err();
        assert!(matches!(err, PackError::UnknownSoc(ref name) if name == "Zen9"));
    }

    #[test]
    fn test_psp_ids() {
        assert_eq!(psp_id(Some(Soc::Picasso)), 0xBC0A_0000);
        assert_eq!(psp_id(Some(Soc::Lucienne)), 0xBC0C_0000);
        assert_eq!(psp_id(Some(Soc::Phoenix)), 0xBC0D_0400);
        assert_eq!(psp_id(Some(Soc::Carrizo)), 0);
        assert_eq!(psp_id(None), 0);
    }

    #[test]
    fn test_initial_alignment() {
        assert!(Soc::Cezanne.needs_initial_alignment());
        assert!(!Soc::Mendocino.needs_initial_alignment());
        assert!(!Soc::Glinda.needs_initial_alignment());
    }

    #[test]
    fn test_levels() {
        assert!(Level::BOTH.intersects(Level::LVL1));
        assert!(!Level::LVL2.intersects(Level::LVL1));
        assert!(Level::LVL2.union(Level::LVL2_AB).intersects(Level::LVL2_AB));
        assert!(!Level::BOTH.intersects(Level::BOTH_AB));
        assert_eq!(Level::BOTH_AB.bits(), 12);
    }
}
