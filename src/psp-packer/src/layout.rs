// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! On-flash structures: directory headers and entries, combo directories, ISH records, the
//! Embedded Firmware Structure and the header carried by AMD firmware blobs.
//!
//! All structures are little-endian and packed. Bitfields are accessed through helper methods
//! that leave the bits they do not own untouched.

use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::context::AddressMode;

/// "$PSP": level-1 (or flat) PSP directory.
pub const PSP_COOKIE: u32 = 0x5053_5024;
/// "$PL2": level-2 PSP directory.
pub const PSPL2_COOKIE: u32 = 0x324c_5024;
/// "2PSP": PSP combo directory.
pub const PSP2_COOKIE: u32 = 0x5053_5032;
/// "$BHD": level-1 (or flat) BIOS directory.
pub const BHD_COOKIE: u32 = 0x4448_4224;
/// "$BL2": level-2 BIOS directory.
pub const BHDL2_COOKIE: u32 = 0x324c_4224;
/// "2BHD": BIOS combo directory.
pub const BHD2_COOKIE: u32 = 0x4448_4232;

/// Signature of the Embedded Firmware Structure.
pub const EMBEDDED_FW_SIGNATURE: u32 = 0x55AA_55AA;
pub const EFS_SECOND_GEN: u32 = 0;
pub const EFS_BEFORE_SECOND_GEN: u32 = 0xFFFF_FFFF;

/// Largest value of a 62-bit address field.
const ADDRESS_MASK: u64 = (1 << 62) - 1;

/// Replace `width` bits of `word` starting at `shift` with `value`.
const fn set_bits(word: u32, shift: u32, width: u32, value: u32) -> u32 {
    let mask = ((1u32 << width) - 1) << shift;
    (word & !mask) | ((value << shift) & mask)
}

const fn get_bits(word: u32, shift: u32, width: u32) -> u32 {
    (word >> shift) & ((1u32 << width) - 1)
}

/// Header shared by PSP and BIOS directories.
#[repr(C, packed)]
#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Clone, Copy, Debug, Default)]
pub struct DirectoryHeader {
    pub cookie: U32,
    pub checksum: U32,
    pub num_entries: U32,
    /// dir_size:10, spi_block_size:4, base_addr:15, address_mode:2, reserved:1
    pub additional_info: U32,
}

impl DirectoryHeader {
    /// Size of the table in 4 KiB units.
    pub fn dir_size(&self) -> u32 {
        get_bits(self.additional_info.get(), 0, 10)
    }

    pub fn set_dir_size(&mut self, value: u32) {
        self.update_info(0, 10, value);
    }

    pub fn spi_block_size(&self) -> u32 {
        get_bits(self.additional_info.get(), 10, 4)
    }

    pub fn set_spi_block_size(&mut self, value: u32) {
        self.update_info(10, 4, value);
    }

    pub fn base_addr(&self) -> u32 {
        get_bits(self.additional_info.get(), 14, 15)
    }

    pub fn set_base_addr(&mut self, value: u32) {
        self.update_info(14, 15, value);
    }

    /// Raw address mode of the table.
    pub fn address_mode(&self) -> u8 {
        // Two bits wide.
        #[allow(clippy::cast_possible_truncation)]
        let mode = get_bits(self.additional_info.get(), 29, 2) as u8;
        mode
    }

    pub fn set_address_mode(&mut self, mode: AddressMode) {
        self.update_info(29, 2, u32::from(mode as u8));
    }

    fn update_info(&mut self, shift: u32, width: u32, value: u32) {
        self.additional_info = U32::new(set_bits(self.additional_info.get(), shift, width, value));
    }
}

/// PSP directory entry.
#[repr(C, packed)]
#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Clone, Copy, Debug, Default)]
pub struct PspEntry {
    pub kind: u8,
    pub subprog: u8,
    /// rom_id:2, writable:1, inst:4, reserved:9
    pub flags: U16,
    pub size: U32,
    /// addr:62, address_mode:2
    pub addr: U64,
}

impl PspEntry {
    /// An entry with every flag cleared.
    pub fn new(kind: u8, subprog: u8) -> Self {
        Self {
            kind,
            subprog,
            ..Default::default()
        }
    }

    pub fn inst(&self) -> u8 {
        // Four bits wide.
        #[allow(clippy::cast_possible_truncation)]
        let inst = get_bits(u32::from(self.flags.get()), 3, 4) as u8;
        inst
    }

    pub fn set_inst(&mut self, inst: u8) {
        let flags = set_bits(u32::from(self.flags.get()), 3, 4, u32::from(inst));
        // Only the low 16 bits are ever set.
        #[allow(clippy::cast_possible_truncation)]
        let flags = flags as u16;
        self.flags = U16::new(flags);
    }

    pub fn address(&self) -> u64 {
        self.addr.get() & ADDRESS_MASK
    }

    pub fn address_mode(&self) -> u8 {
        // Two bits wide.
        #[allow(clippy::cast_possible_truncation)]
        let mode = (self.addr.get() >> 62) as u8;
        mode
    }

    /// Set the 62-bit address and the 2-bit mode stored above it.
    pub fn set_address(&mut self, address: u64, mode: u8) {
        self.addr = U64::new((address & ADDRESS_MASK) | (u64::from(mode & 3) << 62));
    }
}

/// BIOS directory entry.
#[repr(C, packed)]
#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Clone, Copy, Debug, Default)]
pub struct BiosEntry {
    pub kind: u8,
    pub region_type: u8,
    /// reset:1, copy:1, ro:1, compressed:1, inst:4
    pub flags: u8,
    /// subprog:3, rom_id:2, writable:1, reserved:2
    pub subprog: u8,
    pub size: U32,
    /// source:62, address_mode:2
    pub source: U64,
    pub dest: U64,
}

/// Placement attributes of a BIOS entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BiosFlags {
    pub reset: bool,
    pub copy: bool,
    pub ro: bool,
    pub compressed: bool,
    pub inst: u8,
}

impl BiosEntry {
    pub fn flags(&self) -> BiosFlags {
        BiosFlags {
            reset: self.flags & 1 != 0,
            copy: self.flags & 2 != 0,
            ro: self.flags & 4 != 0,
            compressed: self.flags & 8 != 0,
            inst: self.flags >> 4,
        }
    }

    pub fn set_flags(&mut self, flags: BiosFlags) {
        self.flags = u8::from(flags.reset)
            | u8::from(flags.copy) << 1
            | u8::from(flags.ro) << 2
            | u8::from(flags.compressed) << 3
            | (flags.inst & 0xf) << 4;
    }

    /// Only the low three bits belong to the subprogram.
    pub fn set_subprog(&mut self, subprog: u8) {
        self.subprog = (self.subprog & !7) | (subprog & 7);
    }

    pub fn source_address(&self) -> u64 {
        self.source.get() & ADDRESS_MASK
    }

    pub fn address_mode(&self) -> u8 {
        // Two bits wide.
        #[allow(clippy::cast_possible_truncation)]
        let mode = (self.source.get() >> 62) as u8;
        mode
    }

    pub fn set_source(&mut self, source: u64, mode: u8) {
        self.source = U64::new((source & ADDRESS_MASK) | (u64::from(mode & 3) << 62));
    }
}

/// Header of a combo directory.
#[repr(C, packed)]
#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Clone, Copy, Debug, Default)]
pub struct ComboHeader {
    pub cookie: U32,
    pub checksum: U32,
    pub num_entries: U32,
    /// 0: dynamic, 1: PSP id or chip family id
    pub lookup: U32,
    pub reserved: [U32; 4],
}

/// One firmware variant selectable from a combo directory.
#[repr(C, packed)]
#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Clone, Copy, Debug, Default)]
pub struct ComboEntry {
    /// 0: compare PSP id, 1: compare chip family id
    pub id_sel: U32,
    pub id: U32,
    pub lvl2_addr: U64,
}

/// Image Slot Header: boot policy of one A/B slot.
#[repr(C, packed)]
#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Clone, Copy, Debug, Default)]
pub struct IshDirectory {
    pub checksum: U32,
    pub boot_priority: U32,
    pub update_retry_count: U32,
    pub glitch_retry_count: u8,
    pub glitch_higherbits: [u8; 3],
    pub pl2_location: U32,
    pub psp_id: U32,
    pub slot_max_size: U32,
    pub reserved: U32,
}

/// Embedded Firmware Structure, the entry point the PSP looks for in flash.
#[repr(C, packed)]
#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Clone, Copy, Debug)]
pub struct EmbeddedFirmware {
    pub signature: U32,
    pub imc_entry: U32,
    pub gec_entry: U32,
    pub xhci_entry: U32,
    pub psp_directory: U32,
    /// Also the PSP combo directory.
    pub new_psp_directory: U32,
    pub bios0_entry: U32,
    pub bios1_entry: U32,
    pub bios2_entry: U32,
    pub efs_gen: U32,
    pub bios3_entry: U32,
    pub reserved_2c: U32,
    pub promontory_fw_ptr: U32,
    pub lp_promontory_fw_ptr: U32,
    pub reserved_38: U32,
    pub reserved_3c: U32,
    pub spi_readmode_f15_mod_60_6f: u8,
    pub fast_speed_new_f15_mod_60_6f: u8,
    pub reserved_42: u8,
    pub spi_readmode_f17_mod_00_2f: u8,
    pub spi_fastspeed_f17_mod_00_2f: u8,
    pub qpr_dummy_cycle_f17_mod_00_2f: u8,
    pub reserved_46: u8,
    pub spi_readmode_f17_mod_30_3f: u8,
    pub spi_fastspeed_f17_mod_30_3f: u8,
    pub micron_detect_f17_mod_30_3f: u8,
    pub reserved_4a: u8,
    pub reserved_4b: u8,
    pub reserved_4c: U32,
}

impl EmbeddedFirmware {
    /// A signed EFS with no embedded firmware and every other field erased (`0xFF`).
    pub fn new() -> Self {
        let mut efs = Self::new_zeroed();
        efs.as_mut_bytes().fill(0xFF);
        efs.signature = U32::new(EMBEDDED_FW_SIGNATURE);
        efs.imc_entry = U32::ZERO;
        efs.gec_entry = U32::ZERO;
        efs.xhci_entry = U32::ZERO;
        efs
    }
}

impl Default for EmbeddedFirmware {
    fn default() -> Self {
        Self::new()
    }
}

/// Header at the start of every AMD firmware blob.
#[repr(C, packed)]
#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Clone, Copy, Debug)]
pub struct AmdFwHeader {
    pub reserved_0: [u8; 16],
    pub fw_id_or_magic: U32,
    pub size_signed: U32,
    pub enc_opt: U32,
    pub reserved_1c: U32,
    pub reserved_20: [u8; 16],
    /// 1 when the blob carries a signature.
    pub sig_opt: U32,
    pub sig_id: U32,
    pub sig_param: [u8; 16],
    pub comp_opt: U32,
    pub reserved_4c: U32,
    pub uncomp_size: U32,
    pub comp_size: U32,
    pub fw_id: U16,
    pub reserved_5a: [u8; 6],
    pub version: [u8; 4],
    pub reserved_64: [u8; 8],
    pub size_total: U32,
    pub reserved_70: [u8; 12],
    pub fw_type: u8,
    pub fw_subtype: u8,
    pub fw_subprog: u8,
    pub reserved_7f: u8,
    pub reserved_80: [u8; 128],
}

pub const DIRECTORY_HEADER_LEN: usize = std::mem::size_of::<DirectoryHeader>();
pub const PSP_ENTRY_LEN: usize = std::mem::size_of::<PspEntry>();
pub const BIOS_ENTRY_LEN: usize = std::mem::size_of::<BiosEntry>();
pub const COMBO_HEADER_LEN: usize = std::mem::size_of::<ComboHeader>();
pub const COMBO_ENTRY_LEN: usize = std::mem::size_of::<ComboEntry>();
pub const ISH_LEN: usize = std::mem::size_of::<IshDirectory>();
pub const EFS_LEN: usize = std::mem::size_of::<EmbeddedFirmware>();
pub const AMD_FW_HEADER_LEN: usize = std::mem::size_of::<AmdFwHeader>();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(DIRECTORY_HEADER_LEN, 16);
        assert_eq!(PSP_ENTRY_LEN, 16);
        assert_eq!(BIOS_ENTRY_LEN, 24);
        assert_eq!(COMBO_HEADER_LEN, 32);
        assert_eq!(COMBO_ENTRY_LEN, 16);
        assert_eq!(ISH_LEN, 32);
        assert_eq!(EFS_LEN, 0x50);
        assert_eq!(AMD_FW_HEADER_LEN, 0x100);
    }

    #[test]
    fn test_cookies_spell_their_names() {
        assert_eq!(&PSP_COOKIE.to_le_bytes(), b"$PSP");
        assert_eq!(&PSPL2_COOKIE.to_le_bytes(), b"$PL2");
        assert_eq!(&PSP2_COOKIE.to_le_bytes(), b"2PSP");
        assert_eq!(&BHD_COOKIE.to_le_bytes(), b"$BHD");
        assert_eq!(&BHDL2_COOKIE.to_le_bytes(), b"$BL2");
        assert_eq!(&BHD2_COOKIE.to_le_bytes(), b"2BHD");
    }

    #[test]
    fn test_additional_info_bitfields() {
        let mut header = DirectoryHeader::new_zeroed();
        header.set_dir_size(3);
        header.set_spi_block_size(1);
        header.set_base_addr(0);
        header.set_address_mode(AddressMode::RelativeToTable);
        assert_eq!(header.additional_info.get(), 0x4000_0403);
        assert_eq!(header.dir_size(), 3);
        assert_eq!(header.spi_block_size(), 1);
        assert_eq!(header.address_mode(), 2);

        // Values wider than the field are truncated to it.
        header.set_dir_size(0x401);
        assert_eq!(header.dir_size(), 1);
        assert_eq!(header.address_mode(), 2);
    }

    #[test]
    fn test_psp_entry_fields() {
        let mut entry = PspEntry::new(0x30, 0);
        entry.set_inst(5);
        entry.set_address(0x1234_5000, 2);
        assert_eq!(entry.flags.get(), 5 << 3);
        assert_eq!(entry.inst(), 5);
        assert_eq!(entry.address(), 0x1234_5000);
        assert_eq!(entry.address_mode(), 2);
        assert_eq!(entry.addr.get(), 0x8000_0000_1234_5000);
    }

    #[test]
    fn test_bios_entry_keeps_unowned_bits() {
        let mut entry = BiosEntry::read_from_bytes(&[0xFF; 24]).unwrap();
        entry.set_subprog(1);
        assert_eq!(entry.subprog, 0xF9);

        let flags = BiosFlags {
            reset: true,
            copy: true,
            ro: false,
            compressed: true,
            inst: 3,
        };
        entry.set_flags(flags);
        assert_eq!(entry.flags, 0x3B);
        assert_eq!(entry.flags(), flags);

        entry.set_source(0x4_0000, 1);
        assert_eq!(entry.source_address(), 0x4_0000);
        assert_eq!(entry.address_mode(), 1);
    }

    #[test]
    fn test_new_efs() {
        let efs = EmbeddedFirmware::new();
        let bytes = efs.as_bytes();
        assert_eq!(&bytes[..4], &[0xAA, 0x55, 0xAA, 0x55]);
        assert_eq!(&bytes[4..16], &[0; 12]);
        assert!(bytes[16..].iter().all(|b| *b == 0xFF));
        assert_eq!(std::mem::offset_of!(EmbeddedFirmware, efs_gen), 0x24);
        assert_eq!(std::mem::offset_of!(EmbeddedFirmware, bios3_entry), 0x28);
        assert_eq!(
            std::mem::offset_of!(EmbeddedFirmware, spi_readmode_f17_mod_30_3f),
            0x47
        );
    }

    #[test]
    fn test_fw_header_offsets() {
        assert_eq!(std::mem::offset_of!(AmdFwHeader, sig_opt), 0x30);
        assert_eq!(std::mem::offset_of!(AmdFwHeader, version), 0x60);
        assert_eq!(std::mem::offset_of!(AmdFwHeader, size_total), 0x6c);
        assert_eq!(std::mem::offset_of!(AmdFwHeader, fw_type), 0x7c);
    }
}
