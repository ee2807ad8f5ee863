// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Catalogs of every firmware the packager knows about.
//!
//! The catalogs are constant data. A packing pass works on [`Firmwares`], a copy of the
//! catalogs extended with what the configuration supplies (file names, sizes, addresses).

use std::path::PathBuf;

use log::info;

use crate::types::{BiosFwType, EfsFwType, Level, PspFwType};

const PSP_L1: Level = Level::LVL1;
const PSP_BOTH: Level = Level::BOTH;
const PSP_L2_ANY: Level = Level::LVL2.union(Level::LVL2_AB);
const PSP_BOTH_L2AB: Level = Level::BOTH.union(Level::LVL2_AB);
const PSP_BOTH_ANY: Level = Level::BOTH.union(Level::BOTH_AB);

/// Static description of a PSP directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PspDescriptor {
    pub kind: PspFwType,
    pub subprog: u8,
    pub inst: u8,
    pub level: Level,
    /// Not covered by the hash tables of signed images.
    pub skip_hashing: bool,
    /// Reported in the firmware version manifest.
    pub generate_manifest: bool,
    name: &'static str,
}

impl PspDescriptor {
    const fn new(kind: PspFwType, name: &'static str, level: Level) -> Self {
        PspDescriptor {
            kind,
            subprog: 0,
            inst: 0,
            level,
            skip_hashing: false,
            generate_manifest: false,
            name,
        }
    }

    const fn subprog(mut self, subprog: u8) -> Self {
        self.subprog = subprog;
        self
    }

    const fn inst(mut self, inst: u8) -> Self {
        self.inst = inst;
        self
    }

    const fn skip_hashing(mut self) -> Self {
        self.skip_hashing = true;
        self
    }

    const fn manifest(mut self) -> Self {
        self.generate_manifest = true;
        self
    }

    /// Name of the entry in configuration files.
    pub fn config_name(&self) -> String {
        config_name(self.name, self.inst, self.subprog)
    }
}

/// Static description of a BIOS directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiosDescriptor {
    pub kind: BiosFwType,
    pub subprog: u8,
    pub inst: u8,
    pub level: Level,
    pub reset: bool,
    pub copy: bool,
    pub compressed: bool,
    name: &'static str,
}

impl BiosDescriptor {
    const fn new(kind: BiosFwType, name: &'static str, level: Level) -> Self {
        BiosDescriptor {
            kind,
            subprog: 0,
            inst: 0,
            level,
            reset: false,
            copy: false,
            compressed: false,
            name,
        }
    }

    const fn subprog(mut self, subprog: u8) -> Self {
        self.subprog = subprog;
        self
    }

    const fn inst(mut self, inst: u8) -> Self {
        self.inst = inst;
        self
    }

    const fn boot_image(mut self) -> Self {
        self.reset = true;
        self.copy = true;
        self.compressed = true;
        self
    }

    pub fn config_name(&self) -> String {
        config_name(self.name, self.inst, self.subprog)
    }
}

/// Firmware referenced directly by the EFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EfsDescriptor {
    pub kind: EfsFwType,
    name: &'static str,
}

impl EfsDescriptor {
    pub fn config_name(&self) -> String {
        self.name.to_string()
    }
}

/// `<base><inst>_SUB<subprog>`, leaving out a zero instance or subprogram.
fn config_name(base: &str, inst: u8, subprog: u8) -> String {
    let mut name = base.to_string();
    if inst > 0 {
        name.push_str(&inst.to_string());
    }
    if subprog > 0 {
        name.push_str(&format!("_SUB{subprog}"));
    }
    name
}

macro_rules! psp {
    ($kind:ident, $name:literal, $level:expr) => {
        PspDescriptor::new(PspFwType::$kind, $name, $level)
    };
}

pub const PSP_CATALOG: &[PspDescriptor] = &[
    psp!(PSP_PUBKEY, "AMD_PUBKEY", PSP_BOTH_L2AB).skip_hashing(),
    psp!(BOOTLOADER, "PSPBTLDR", PSP_BOTH_L2AB).manifest(),
    psp!(SECURED_OS, "PSPSECUREOS", PSP_L2_ANY),
    psp!(RECOVERY, "PSPRCVR", PSP_L1),
    psp!(PSP_NVRAM, "PSPNVRAM", PSP_L2_ANY),
    psp!(RTM_PUBKEY, "PSP_RTM_PUBKEY", PSP_BOTH),
    psp!(SMU_FIRMWARE, "SMUFW", PSP_BOTH_L2AB).manifest(),
    psp!(SMU_FIRMWARE, "SMUFW", PSP_BOTH_L2AB).subprog(1),
    psp!(SMU_FIRMWARE, "SMUFW", PSP_BOTH_L2AB).subprog(2),
    psp!(SECURED_DEBUG, "PSPSECUREDEBUG", PSP_L2_ANY).skip_hashing(),
    psp!(ABL_PUBKEY, "ABL_PUBKEY", PSP_BOTH_ANY),
    psp!(PSP_FUSE_CHAIN, "PSP_FUSE_CHAIN", PSP_L2_ANY),
    psp!(PSP_TRUSTLETS, "PSPTRUSTLETS", PSP_L2_ANY),
    psp!(PSP_TRUSTLETKEY, "TRUSTLETKEY", PSP_L2_ANY),
    psp!(SMU_FIRMWARE2, "SMUFW2", PSP_BOTH_L2AB),
    psp!(SMU_FIRMWARE2, "SMUFW2", PSP_BOTH_L2AB).subprog(1),
    psp!(SMU_FIRMWARE2, "SMUFW2", PSP_BOTH_L2AB).subprog(2),
    psp!(PSP_BOOT_DRIVER, "PSP_BOOT_DRIVER", PSP_BOTH_L2AB),
    psp!(PSP_SOC_DRIVER, "PSP_SOC_DRIVER", PSP_BOTH_L2AB),
    psp!(PSP_DEBUG_DRIVER, "PSP_DEBUG_DRIVER", PSP_BOTH_L2AB),
    psp!(PSP_INTERFACE_DRIVER, "PSP_INTERFACE_DRIVER", PSP_BOTH_L2AB),
    psp!(DEBUG_UNLOCK, "DEBUG_UNLOCK", PSP_L2_ANY),
    psp!(HW_IPCFG, "HW_IPCFG", PSP_L2_ANY),
    psp!(HW_IPCFG, "HW_IPCFG", PSP_L2_ANY).subprog(1),
    psp!(WRAPPED_IKEK, "WRAPPED_IKEK", PSP_BOTH_L2AB).skip_hashing(),
    psp!(TOKEN_UNLOCK, "TOKEN_UNLOCK", PSP_BOTH_L2AB),
    psp!(SEC_GASKET, "SEC_GASKET", PSP_BOTH_L2AB),
    psp!(SEC_GASKET, "SEC_GASKET", PSP_BOTH_L2AB).subprog(1),
    psp!(SEC_GASKET, "SEC_GASKET", PSP_BOTH_L2AB).subprog(2),
    psp!(MP2_FW, "MP2_FW", PSP_L2_ANY),
    psp!(MP2_FW, "MP2_FW", PSP_L2_ANY).subprog(1),
    psp!(MP2_FW, "MP2_FW", PSP_L2_ANY).subprog(2),
    psp!(DRIVER_ENTRIES, "DRIVER_ENTRIES", PSP_L2_ANY),
    psp!(KVM_IMAGE, "KVM_IMAGE", PSP_L2_ANY),
    psp!(MP5, "MP5", PSP_BOTH_ANY),
    psp!(MP5, "MP5", PSP_BOTH_ANY).subprog(1),
    psp!(MP5, "MP5", PSP_BOTH_ANY).subprog(2),
    psp!(S0I3_DRIVER, "S0I3_DRIVER", PSP_L2_ANY),
    psp!(ABL0, "ABL0", PSP_BOTH_L2AB).manifest(),
    psp!(ABL1, "ABL1", PSP_BOTH_L2AB),
    psp!(ABL2, "ABL2", PSP_BOTH_L2AB),
    psp!(ABL3, "ABL3", PSP_BOTH_L2AB),
    psp!(ABL4, "ABL4", PSP_BOTH_L2AB),
    psp!(ABL5, "ABL5", PSP_BOTH_L2AB),
    psp!(ABL6, "ABL6", PSP_BOTH_L2AB),
    psp!(ABL7, "ABL7", PSP_BOTH_L2AB),
    psp!(SEV_DATA, "SEV_DATA", PSP_L2_ANY),
    psp!(SEV_CODE, "SEV_CODE", PSP_L2_ANY),
    psp!(PSP_WHITELIST, "PSP_WHITELIST", PSP_L2_ANY),
    psp!(VBIOS_BTLOADER, "VBIOS_BTLOADER", PSP_BOTH_L2AB),
    psp!(DXIO, "DXIO", PSP_BOTH_ANY),
    psp!(USB_PHY, "USB_PHY", PSP_L2_ANY),
    psp!(TOS_SEC_POLICY, "TOS_SEC_POLICY", PSP_BOTH_L2AB),
    psp!(DRTM_TA, "DRTM_TA", PSP_L2_ANY),
    psp!(KEYDB_BL, "KEYDB_BL", PSP_BOTH_L2AB),
    psp!(KEYDB_TOS, "KEYDB_TOS", PSP_L2_ANY),
    psp!(PSP_VERSTAGE, "PSP_VERSTAGE", PSP_BOTH_L2AB),
    psp!(VERSTAGE_SIG, "VERSTAGE_SIG", PSP_BOTH_L2AB),
    psp!(RPMC_NVRAM, "RPMC_NVRAM", PSP_L2_ANY),
    psp!(SPL, "SPL_TABLE", PSP_L2_ANY),
    psp!(DMCU_ERAM, "DMCU_ERAM", PSP_L2_ANY),
    psp!(DMCU_ISR, "DMCU_ISR", PSP_L2_ANY),
    psp!(MSMU, "MSMU", PSP_L2_ANY),
    psp!(SPIROM_CFG, "SPIROM_CFG", PSP_L2_ANY),
    psp!(MPIO, "MPIO", PSP_L2_ANY),
    psp!(PSP_SMUSCS, "PSP_SMUSCS", PSP_BOTH_L2AB),
    psp!(DMCUB, "DMCUB", PSP_L2_ANY),
    psp!(PSP_BOOTLOADER_AB, "PSPBTLDR_AB", PSP_L2_ANY).manifest(),
    psp!(RIB, "RIB", PSP_L2_ANY),
    psp!(RIB, "RIB", PSP_L2_ANY).subprog(1),
    psp!(MPDMA_TF, "MPDMA_TF", PSP_BOTH_ANY),
    psp!(TA_IKEK, "TA_IKEK", PSP_BOTH_L2AB).skip_hashing(),
    psp!(GMI3_PHY, "GMI3_PHY", PSP_BOTH_ANY),
    psp!(MPDMA_PM, "MPDMA_PM", PSP_BOTH_ANY),
    psp!(AMF_SRAM, "AMF_SRAM", PSP_L2_ANY),
    psp!(AMF_DRAM, "AMF_DRAM", PSP_L2_ANY),
    psp!(AMF_DRAM, "AMF_DRAM", PSP_L2_ANY).inst(1),
    psp!(FCFG_TABLE, "FCFG_TABLE", PSP_L2_ANY),
    psp!(AMF_WLAN, "AMF_WLAN", PSP_L2_ANY),
    psp!(AMF_WLAN, "AMF_WLAN", PSP_L2_ANY).inst(1),
    psp!(AMF_MFD, "AMF_MFD", PSP_L2_ANY),
    psp!(MPCCX, "MPCCX", PSP_L2_ANY),
    psp!(LSDMA, "LSDMA", PSP_L2_ANY),
    psp!(C20_MP, "C20_MP", PSP_BOTH_L2AB),
    psp!(MINIMSMU, "MINIMSMU", PSP_BOTH_L2AB),
    psp!(MINIMSMU, "MINIMSMU", PSP_BOTH_L2AB).inst(1),
    psp!(SRAM_FW_EXT, "SRAM_FW_EXT", PSP_L2_ANY),
    psp!(UMSMU, "UMSMU", PSP_L2_ANY),
];

/// Instances of the DRAM training images, per subprogram.
const PMU_INSTANCES: [u8; 12] = [1, 2, 3, 4, 5, 6, 7, 9, 10, 11, 12, 13];
const APCB_INSTANCES: usize = 16;
const UCODE_INSTANCES: usize = 7;

const fn bios(kind: BiosFwType, name: &'static str, level: Level) -> BiosDescriptor {
    BiosDescriptor::new(kind, name, level)
}

const fn build_bios_catalog() -> [BiosDescriptor; BIOS_CATALOG_LEN] {
    let filler = bios(BiosFwType::SIG, "", Level::BOTH);
    let mut table = [filler; BIOS_CATALOG_LEN];
    let mut i = 0;

    table[i] = bios(BiosFwType::RTM_PUBKEY, "BIOS_RTM_PUBKEY", Level::BOTH);
    i += 1;
    table[i] = bios(BiosFwType::SIG, "BIOS_SIG", Level::BOTH);
    i += 1;

    let mut inst = 0;
    while inst < APCB_INSTANCES {
        // Bounded by APCB_INSTANCES.
        #[allow(clippy::cast_possible_truncation)]
        let apcb_inst = inst as u8;
        table[i] = bios(BiosFwType::APCB, "APCB", Level::BOTH).inst(apcb_inst);
        i += 1;
        inst += 1;
    }
    inst = 0;
    while inst < APCB_INSTANCES {
        #[allow(clippy::cast_possible_truncation)]
        let apcb_inst = inst as u8;
        table[i] = bios(BiosFwType::APCB_BK, "APCB_BK", Level::BOTH).inst(apcb_inst);
        i += 1;
        inst += 1;
    }

    table[i] = bios(BiosFwType::APOB, "APOB", Level::BOTH);
    i += 1;
    table[i] = bios(BiosFwType::BIN, "BIOS_BIN", Level::BOTH).boot_image();
    i += 1;
    table[i] = bios(BiosFwType::APOB_NV, "APOB_NV", Level::LVL2);
    i += 1;

    let mut subprog = 0;
    while subprog < 2 {
        let mut n = 0;
        while n < PMU_INSTANCES.len() {
            let pmu_inst = PMU_INSTANCES[n];
            table[i] = bios(BiosFwType::PMUI, "PMUI", Level::BOTH)
                .inst(pmu_inst)
                .subprog(subprog);
            table[i + 1] = bios(BiosFwType::PMUD, "PMUD", Level::BOTH)
                .inst(pmu_inst)
                .subprog(subprog);
            i += 2;
            n += 1;
        }
        subprog += 1;
    }

    inst = 0;
    while inst < UCODE_INSTANCES {
        #[allow(clippy::cast_possible_truncation)]
        let ucode_inst = inst as u8;
        table[i] = bios(BiosFwType::UCODE, "UCODE", Level::LVL2).inst(ucode_inst);
        i += 1;
        inst += 1;
    }

    table[i] = bios(BiosFwType::MP2_CFG, "MP2_CFG", Level::LVL2);
    i += 1;
    table[i] = bios(BiosFwType::PSP_SHARED_MEM, "PSP_SHARED_MEM", Level::BOTH);
    i += 1;

    assert!(i == BIOS_CATALOG_LEN);
    table
}

const BIOS_CATALOG_LEN: usize =
    2 + 2 * APCB_INSTANCES + 3 + 2 * 2 * PMU_INSTANCES.len() + UCODE_INSTANCES + 2;

pub const BIOS_CATALOG: &[BiosDescriptor] = &build_bios_catalog();

pub const EFS_CATALOG: &[EfsDescriptor] = &[
    EfsDescriptor {
        kind: EfsFwType::Xhci,
        name: "XHCI",
    },
    EfsDescriptor {
        kind: EfsFwType::Imc,
        name: "IMC",
    },
    EfsDescriptor {
        kind: EfsFwType::Gec,
        name: "GEC",
    },
];

/// A PSP catalog entry with its configured values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PspFirmware {
    pub desc: PspDescriptor,
    pub filename: Option<PathBuf>,
    pub size: u64,
    pub dest: u64,
    /// Literal value for entries that store one instead of a blob.
    pub other: u64,
    /// Copied to the separately signed output rather than the image.
    pub signed: bool,
    /// Run-time address of the copy in the signed output.
    pub addr_signed: Option<u64>,
    pub file_size: u32,
}

impl From<PspDescriptor> for PspFirmware {
    fn from(desc: PspDescriptor) -> Self {
        PspFirmware {
            desc,
            filename: None,
            size: 0,
            dest: 0,
            other: 0,
            signed: false,
            addr_signed: None,
            file_size: 0,
        }
    }
}

/// A BIOS catalog entry with its configured values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiosFirmware {
    pub desc: BiosDescriptor,
    pub filename: Option<PathBuf>,
    pub size: u64,
    pub src: u64,
    pub dest: u64,
    pub ro: bool,
    pub region_type: u8,
}

impl From<BiosDescriptor> for BiosFirmware {
    fn from(desc: BiosDescriptor) -> Self {
        BiosFirmware {
            desc,
            filename: None,
            size: 0,
            src: 0,
            dest: 0,
            ro: false,
            region_type: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EfsFirmware {
    pub desc: EfsDescriptor,
    pub filename: Option<PathBuf>,
}

/// Working copy of the catalogs for one packing pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firmwares {
    pub psp: Vec<PspFirmware>,
    pub bios: Vec<BiosFirmware>,
    pub efs: Vec<EfsFirmware>,
}

impl Default for Firmwares {
    fn default() -> Self {
        Self::pristine()
    }
}

impl Firmwares {
    /// The catalogs with nothing configured.
    pub fn pristine() -> Self {
        Firmwares {
            psp: PSP_CATALOG.iter().copied().map(PspFirmware::from).collect(),
            bios: BIOS_CATALOG.iter().copied().map(BiosFirmware::from).collect(),
            efs: EFS_CATALOG
                .iter()
                .map(|desc| EfsFirmware {
                    desc: *desc,
                    filename: None,
                })
                .collect(),
        }
    }

    pub fn psp_by_name(&mut self, name: &str) -> Option<&mut PspFirmware> {
        self.psp.iter_mut().find(|fw| fw.desc.config_name() == name)
    }

    pub fn bios_by_name(&mut self, name: &str) -> Option<&mut BiosFirmware> {
        self.bios.iter_mut().find(|fw| fw.desc.config_name() == name)
    }

    pub fn efs_by_name(&mut self, name: &str) -> Option<&mut EfsFirmware> {
        self.efs.iter_mut().find(|fw| fw.desc.config_name() == name)
    }

    pub fn psp_by_type(&mut self, kind: PspFwType) -> Option<&mut PspFirmware> {
        self.psp.iter_mut().find(|fw| fw.desc.kind == kind)
    }

    /// Whether any APCB backup image is configured.
    pub fn has_apcb_backup(&self) -> bool {
        self.bios
            .iter()
            .any(|fw| fw.desc.kind == BiosFwType::APCB_BK && fw.filename.is_some())
    }

    /// Whether any entry placed in a level-1 BIOS directory has a file.
    pub fn has_bios_tables(&self) -> bool {
        self.bios
            .iter()
            .any(|fw| fw.desc.level.intersects(Level::LVL1) && fw.filename.is_some())
    }

    /// Log every configured entry.
    pub fn dump(&self) {
        for fw in self.psp.iter().filter(|fw| fw.filename.is_some() || fw.other != 0) {
            info!(
                "PSP {} {} sub {} inst {}: {}",
                fw.desc.config_name(),
                fw.desc.kind,
                fw.desc.subprog,
                fw.desc.inst,
                fw.filename
                    .as_ref()
                    .map_or_else(|| format!("value {:#x}", fw.other), |f| f.display().to_string())
            );
        }
        for fw in self.bios.iter().filter(|fw| fw.filename.is_some()) {
            info!(
                "BIOS {} {} sub {} inst {}: {}",
                fw.desc.config_name(),
                fw.desc.kind,
                fw.desc.subprog,
                fw.desc.inst,
                fw.filename.as_ref().map_or(String::new(), |f| f.display().to_string())
            );
        }
        for fw in &self.efs {
            if let Some(filename) = &fw.filename {
                info!("EFS {}: {}", fw.desc.config_name(), filename.display());
            }
        }
    }
}
