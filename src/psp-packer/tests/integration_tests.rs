// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;

use psp_packer::config::{AbCopy, SpiSettings};
use psp_packer::layout::{
    BHD_COOKIE, BHD2_COOKIE, BHDL2_COOKIE, BiosEntry, ComboEntry, ComboHeader, DirectoryHeader,
    EmbeddedFirmware, PSP_COOKIE, PSP2_COOKIE, PSPL2_COOKIE, PspEntry,
};
use psp_packer::types::{BiosFwType, PspFwType};
use psp_packer::{PackError, PackOptions, PackedImage, Soc, Topology, Variant, pack};
use utils::tempdir::TempDir;
use zerocopy::FromBytes;

const EFS: u64 = 0x2_0000;

fn read<T: FromBytes>(rom: &[u8], offset: u64) -> T {
    let start = usize::try_from(offset).unwrap();
    T::read_from_bytes(&rom[start..start + std::mem::size_of::<T>()])
        .ok()
        .unwrap()
}

fn entries<T: FromBytes>(rom: &[u8], dir: u64) -> Vec<T> {
    let header: DirectoryHeader = read(rom, dir);
    (0..u64::from(header.num_entries.get()))
        .map(|i| read(rom, dir + 16 + i * std::mem::size_of::<T>() as u64))
        .collect()
}

fn blob(dir: &Path, name: &str, byte: u8, len: usize) {
    std::fs::write(dir.join(name), vec![byte; len]).unwrap();
}

/// A configuration with a boot loader, an APCB and the mandatory BIOS placements.
fn variant(dir: &Path, soc: &str) -> Variant {
    blob(dir, "btldr.bin", 0x5A, 0x200);
    blob(dir, "apcb.bin", 0xA5, 0x100);
    let config = dir.join(format!("{soc}.cfg"));
    std::fs::write(
        &config,
        format!(
            "SOC_NAME {soc}\n\
             PSPBTLDR_FILE btldr.bin\n\
             APCB_FILE apcb.bin\n\
             APOB_DEST 0x400000\n\
             BIOS_BIN_DEST 0x9000000\n\
             BIOS_BIN_SIZE 0x10000\n\
             BIOS_BIN_SRC 0x300000\n"
        ),
    )
    .unwrap();
    Variant::load(&config).unwrap()
}

fn options() -> PackOptions {
    PackOptions {
        second_gen: true,
        spi: SpiSettings {
            readmode: Some(3),
            speed: Some(1),
            micron_flag: 0,
        },
        ..Default::default()
    }
}

#[test]
fn test_flat_image() {
    let tmp = TempDir::new().unwrap();
    let mut variants = [variant(tmp.as_path(), "Cezanne")];
    let image = pack(&options(), &mut variants).unwrap();
    let rom = image.rom();

    let efs: EmbeddedFirmware = read(rom, EFS);
    assert_eq!(efs.spi_readmode_f17_mod_30_3f, 3);
    assert_eq!(efs.efs_gen.get(), 0);

    // The first directory follows the 64 KiB alignment of the body.
    let psp = u64::from(efs.new_psp_directory.get());
    assert_eq!(psp, 0x3_0000);
    let header: DirectoryHeader = read(rom, psp);
    assert_eq!(header.cookie.get(), PSP_COOKIE);
    let psp_entries: Vec<PspEntry> = entries(rom, psp);
    let kinds: Vec<u8> = psp_entries.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, [PspFwType::BOOTLOADER.0, PspFwType::PSP_FUSE_CHAIN.0]);
    let btldr = psp_entries[0];
    assert_eq!(btldr.size.get(), 0x200);
    let start = usize::try_from(btldr.address()).unwrap();
    assert!(rom[start..start + 0x200].iter().all(|b| *b == 0x5A));

    let bios = u64::from(efs.bios3_entry.get());
    assert_eq!(bios, 0x3_2000);
    let header: DirectoryHeader = read(rom, bios);
    assert_eq!(header.cookie.get(), BHD_COOKIE);
    let bios_entries: Vec<BiosEntry> = entries(rom, bios);
    let kinds: Vec<u8> = bios_entries.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        [
            BiosFwType::APCB.0,
            BiosFwType::APCB_BK.0,
            BiosFwType::APOB.0,
            BiosFwType::BIN.0
        ]
    );
    assert_eq!(
        bios_entries[0].source_address(),
        bios_entries[1].source_address()
    );

    assert_eq!(image.end(), 0x3_4000);
    assert_eq!(image.output_bytes().len(), 0x1_4000);
    assert!(image.body_bytes().is_none());
}

#[test]
fn test_two_level_image() {
    let tmp = TempDir::new().unwrap();
    let mut variants = [variant(tmp.as_path(), "Renoir")];
    let options = PackOptions {
        topology: Topology::TwoLevel,
        ..options()
    };
    let image = pack(&options, &mut variants).unwrap();
    let rom = image.rom();
    let efs: EmbeddedFirmware = read(rom, EFS);

    let psp_l1 = u64::from(efs.new_psp_directory.get());
    let header: DirectoryHeader = read(rom, psp_l1);
    assert_eq!(header.cookie.get(), PSP_COOKIE);
    let l1_entries: Vec<PspEntry> = entries(rom, psp_l1);
    let pointer = l1_entries.last().unwrap();
    assert_eq!(pointer.kind, PspFwType::L2_PTR.0);
    let l2: DirectoryHeader = read(rom, pointer.address());
    assert_eq!(l2.cookie.get(), PSPL2_COOKIE);
    assert!(pointer.address() < psp_l1);

    let bios_l1 = u64::from(efs.bios3_entry.get());
    let header: DirectoryHeader = read(rom, bios_l1);
    assert_eq!(header.cookie.get(), BHD_COOKIE);
    let l1_entries: Vec<BiosEntry> = entries(rom, bios_l1);
    let pointer = l1_entries.last().unwrap();
    assert_eq!(pointer.kind, BiosFwType::L2_PTR.0);
    let l2: DirectoryHeader = read(rom, pointer.source_address());
    assert_eq!(l2.cookie.get(), BHDL2_COOKIE);

    // Both levels reference the same BIOS image.
    let l2_entries: Vec<BiosEntry> = entries(rom, pointer.source_address());
    let bin = |entries: &[BiosEntry]| {
        entries
            .iter()
            .find(|e| e.kind == BiosFwType::BIN.0)
            .map(|e| (e.source_address(), e.size.get()))
    };
    assert_eq!(bin(&l1_entries), bin(&l2_entries));
    assert_eq!(bin(&l2_entries), Some((0x30_0000, 0x1_0000)));
}

#[test]
fn test_recovery_ab_image() {
    let tmp = TempDir::new().unwrap();
    let mut variants = [variant(tmp.as_path(), "Cezanne")];
    let options = PackOptions {
        topology: Topology::RecoveryAb(AbCopy::IndependentCopy),
        ..options()
    };
    let image = pack(&options, &mut variants).unwrap();
    let rom = image.rom();
    let efs: EmbeddedFirmware = read(rom, EFS);
    // The BIOS directories are only reachable through the PSP slots.
    assert_eq!(efs.bios3_entry.get(), u32::MAX);

    let l1: Vec<PspEntry> = entries(rom, u64::from(efs.new_psp_directory.get()))
        .into_iter()
        .filter(|e: &PspEntry| {
            e.kind == PspFwType::RECOVERYAB_A.0 || e.kind == PspFwType::RECOVERYAB_B.0
        })
        .collect();
    let kinds: Vec<u8> = l1.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, [PspFwType::RECOVERYAB_A.0, PspFwType::RECOVERYAB_B.0]);
    assert_ne!(l1[0].address(), l1[1].address());

    for slot in l1 {
        let slot_entries: Vec<PspEntry> = entries(rom, slot.address());
        let table = slot_entries
            .iter()
            .find(|e| e.kind == PspFwType::BIOS_TABLE.0)
            .unwrap();
        let bios: DirectoryHeader = read(rom, table.address());
        assert_eq!(bios.cookie.get(), BHDL2_COOKIE);
    }
}

#[test]
fn test_combo_image() {
    let tmp = TempDir::new().unwrap();
    let cezanne = tmp.as_path().join("cezanne");
    let phoenix = tmp.as_path().join("phoenix");
    std::fs::create_dir(&cezanne).unwrap();
    std::fs::create_dir(&phoenix).unwrap();
    let mut variants = [variant(&cezanne, "Cezanne"), variant(&phoenix, "Phoenix")];
    let options = PackOptions {
        use_combo: true,
        ..options()
    };
    let image = pack(&options, &mut variants).unwrap();
    let rom = image.rom();
    let efs: EmbeddedFirmware = read(rom, EFS);

    let combo = u64::from(efs.new_psp_directory.get());
    assert_eq!(combo, 0x3_0000);
    let header: ComboHeader = read(rom, combo);
    assert_eq!(header.cookie.get(), PSP2_COOKIE);
    assert_eq!(header.num_entries.get(), 2);
    assert_eq!(header.lookup.get(), 1);

    let ids = [Soc::Cezanne.psp_id(), Soc::Phoenix.psp_id()];
    for (i, id) in ids.into_iter().enumerate() {
        let entry: ComboEntry = read(rom, combo + 32 + 16 * i as u64);
        assert_eq!(entry.id.get(), id);
        let dir: DirectoryHeader = read(rom, entry.lvl2_addr.get());
        assert_eq!(dir.cookie.get(), PSP_COOKIE);
    }

    // Cezanne reads its BIOS directory from the EFS, which points at the BIOS combo directory.
    let bhd_combo = u64::from(efs.bios3_entry.get());
    assert_eq!(bhd_combo, 0x3_1000);
    let header: ComboHeader = read(rom, bhd_combo);
    assert_eq!(header.cookie.get(), BHD2_COOKIE);
    assert_eq!(header.num_entries.get(), 2);
    let entry: ComboEntry = read(rom, bhd_combo + 32 + 16);
    let dir: DirectoryHeader = read(rom, entry.lvl2_addr.get());
    assert_eq!(dir.cookie.get(), BHD_COOKIE);
}

#[test]
fn test_split_output() {
    let tmp = TempDir::new().unwrap();
    let mut variants = [variant(tmp.as_path(), "Phoenix")];
    let options = PackOptions {
        body_location: Some(0x10_0000),
        ..options()
    };
    let image = pack(&options, &mut variants).unwrap();

    let output = tmp.as_path().join("amdfw.rom");
    image.write(&output).unwrap();
    let efs = std::fs::read(&output).unwrap();
    assert_eq!(efs.len(), 0x50);
    assert_eq!(&efs[..4], &[0xAA, 0x55, 0xAA, 0x55]);

    // No initial alignment on Phoenix: the body starts with the PSP directory.
    let body = std::fs::read(PackedImage::body_path(&output)).unwrap();
    assert_eq!(&body[..4], b"$PSP");
    assert_eq!(
        u64::try_from(body.len()).unwrap(),
        u64::from(image.end()) - 0x10_0000
    );
}

#[test]
fn test_invalid_configuration() {
    let tmp = TempDir::new().unwrap();
    let mut variant = variant(tmp.as_path(), "Cezanne");
    variant.firmwares.bios_by_name("APOB").unwrap().dest = 0;
    let err = pack(&options(), &mut [variant]).unwrap_err();
    assert!(matches!(err, PackError::ApobDestination), "{err}");

    let mut variants = [Variant::default()];
    let options = PackOptions {
        soc: Some(Soc::Genoa),
        spi: SpiSettings::default(),
        ..Default::default()
    };
    let err = pack(&options, &mut variants).unwrap_err();
    assert!(matches!(err, PackError::EfsSpiMode), "{err}");
}
