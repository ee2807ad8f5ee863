// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// Copyright 2023 Rivos, Inc.
//
// SPDX-License-Identifier: Apache-2.0

use vm_memory::{Bytes, GuestAddress, GuestMemory};
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::platform::Platform;
use crate::sdt::SdtBuffer;
use crate::{GenericAddressStructure, Result, Sdt, SdtHeader, TableKind, checksum, fill_header};

pub const IAPC_BOOT_ARG_FLAGS_LEGACY_DEVICES: u16 = 0;
pub const IAPC_BOOT_ARG_FLAGS_8042: u16 = 1;
pub const IAPC_BOOT_ARG_FLAGS_VGA_NOT_PRESENT: u16 = 2;
pub const IAPC_BOOT_ARG_FLAGS_MSI_NOT_PRESENT: u16 = 3;
pub const IAPC_BOOT_ARG_FLAGS_PCI_ASPM: u16 = 4;

// ACPI Flags. Reading from the specification here:
// https://uefi.org/specs/ACPI/6.5/05_ACPI_Software_Programming_Model.html#fixed-acpi-description-table-fixed-feature-flags

/// Flag for the Power Button functionality.
/// If the system does not have a power button, this value would be “1” and no power button device
/// would be present
pub const FADT_F_PWR_BUTTON: u8 = 4;
/// Flag for the Sleep Button Functionality.
/// If the system does not have a sleep button, this value would be “1” and no power button device
/// would be present
pub const FADT_F_SLP_BUTTON: u8 = 5;
/// Flag for Hardware Reduced API. If enabled, software-only alternatives are used for supported
/// fixed features.
pub const FADT_F_HW_REDUCED_ACPI: u8 = 20;

/// Worst case C2 latency above 100 means C2 is not supported.
pub const FADT_C2_NOT_SUPPORTED: u16 = 101;
/// Worst case C3 latency above 1000 means C3 is not supported.
pub const FADT_C3_NOT_SUPPORTED: u16 = 1001;
pub const FADT_MINOR_VERSION: u8 = 0;

// clippy doesn't understand that we actually "use" the fields of this struct when we serialize
// them as bytes in guest memory, so here we just ignore dead code to avoid having to name
// everything with an underscore prefix
#[allow(dead_code)]
/// Fixed ACPI Description Table (FADT)
///
/// This table includes fixed hardware ACPI information such as addresses of register blocks and
/// the pointer to the DSDT table.
/// More information about this table can be found in the ACPI specification:
/// https://uefi.org/specs/ACPI/6.5/05_ACPI_Software_Programming_Model.html#fixed-acpi-description-table-fadt
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct Fadt {
    header: SdtHeader,
    firmware_control: U32,
    dsdt: U32,
    reserved_1: u8,
    preferred_pm_profile: u8,
    // In HW-reduced mode, fields starting from SCI_INT until CENTURY are ignored
    sci_int: U16,
    smi_cmd: U32,
    acpi_enable: u8,
    acpi_disable: u8,
    s4bios_req: u8,
    pstate_cnt: u8,
    pm1a_evt_blk: U32,
    pm1b_evt_blk: U32,
    pm1a_cnt_blk: U32,
    pm1b_cnt_blk: U32,
    pm2_cnt_blk: U32,
    pm_tmr_blk: U32,
    gpe0_blk: U32,
    gpe1_blk: U32,
    pm1_evt_len: u8,
    pm1_cnt_len: u8,
    pm2_cnt_len: u8,
    pm_tmr_len: u8,
    gpe0_blk_len: u8,
    gpe1_blk_len: u8,
    gpe1_base: u8,
    cst_cnt: u8,
    p_lvl2_lat: U16,
    p_lvl3_lat: U16,
    flush_size: U16,
    flush_stride: U16,
    duty_offset: u8,
    duty_width: u8,
    day_alrm: u8,
    mon_alrm: u8,
    century: u8,
    iapc_boot_arch: U16,
    reserved_2: u8,
    flags: U32,
    reset_reg: GenericAddressStructure,
    reset_value: u8,
    arm_boot_arch: U16,
    fadt_minor_version: u8,
    x_firmware_ctrl: U64,
    x_dsdt: U64,
    // In HW-reduced mode, fields starting from X_PM1a_EVT_BLK through X_GPE1_BLK
    // are ignored
    x_pm1a_evt_blk: GenericAddressStructure,
    x_pm1b_evt_blk: GenericAddressStructure,
    x_pm1a_cnt_blk: GenericAddressStructure,
    x_pm1b_cnt_blk: GenericAddressStructure,
    x_pm2_cnt_blk: GenericAddressStructure,
    x_pm_tmr_blk: GenericAddressStructure,
    x_gpe0_blk: GenericAddressStructure,
    x_gpe1_blk: GenericAddressStructure,
    sleep_control_reg: GenericAddressStructure,
    sleep_status_reg: GenericAddressStructure,
    hypervisor_vendor_id: [u8; 8],
}

/// Size of the FADT in bytes.
// The structure is 276 bytes long.
#[allow(clippy::cast_possible_truncation)]
pub const FADT_LEN: u32 = std::mem::size_of::<Fadt>() as u32;

impl Fadt {
    /// A zeroed FADT carrying `header`.
    pub fn new(header: SdtHeader) -> Self {
        Fadt {
            header,
            fadt_minor_version: FADT_MINOR_VERSION,
            ..Default::default()
        }
    }

    /// Set the address of the FACS, in both the 32-bit and the 64-bit field.
    pub fn set_firmware_ctrl(&mut self, addr: u32) {
        self.firmware_control = U32::new(addr);
        self.x_firmware_ctrl = U64::new(u64::from(addr));
    }

    pub fn firmware_ctrl(&self) -> u32 {
        self.firmware_control.get()
    }

    /// Set the address of the DSDT, in both the 32-bit and the 64-bit field.
    pub fn set_dsdt(&mut self, addr: u32) {
        self.dsdt = U32::new(addr);
        self.x_dsdt = U64::new(u64::from(addr));
    }

    /// Set the address of the DSDT table
    ///
    /// This sets the 64bit variant, X_DSDT field of the FADT table
    pub fn set_x_dsdt(&mut self, addr: u64) {
        self.x_dsdt = U64::new(addr);
    }

    pub fn dsdt(&self) -> u32 {
        self.dsdt.get()
    }

    pub fn set_sci_int(&mut self, sci_int: u16) {
        self.sci_int = U16::new(sci_int);
    }

    pub fn sci_int(&self) -> u16 {
        self.sci_int.get()
    }

    pub fn set_preferred_pm_profile(&mut self, profile: u8) {
        self.preferred_pm_profile = profile;
    }

    /// Set the worst case C2/C3 latencies.
    pub fn set_cstate_latencies(&mut self, p_lvl2_lat: u16, p_lvl3_lat: u16) {
        self.p_lvl2_lat = U16::new(p_lvl2_lat);
        self.p_lvl3_lat = U16::new(p_lvl3_lat);
    }

    pub fn p_lvl2_lat(&self) -> u16 {
        self.p_lvl2_lat.get()
    }

    pub fn p_lvl3_lat(&self) -> u16 {
        self.p_lvl3_lat.get()
    }

    /// Set the processor duty cycle setting location.
    pub fn set_duty_cycle(&mut self, offset: u8, width: u8) {
        self.duty_offset = offset;
        self.duty_width = width;
    }

    /// Set the PM1a event and control register blocks.
    pub fn set_pm1a_blocks(&mut self, evt_blk: u32, evt_len: u8, cnt_blk: u32, cnt_len: u8) {
        self.pm1a_evt_blk = U32::new(evt_blk);
        self.pm1_evt_len = evt_len;
        self.pm1a_cnt_blk = U32::new(cnt_blk);
        self.pm1_cnt_len = cnt_len;
    }

    pub fn set_pm_tmr_blk(&mut self, blk: u32, len: u8) {
        self.pm_tmr_blk = U32::new(blk);
        self.pm_tmr_len = len;
    }

    pub fn set_gpe0_blk(&mut self, blk: u32, len: u8) {
        self.gpe0_blk = U32::new(blk);
        self.gpe0_blk_len = len;
    }

    /// Set the reset register and the value to write to it.
    pub fn set_reset_reg(&mut self, reg: GenericAddressStructure, value: u8) {
        self.reset_reg = reg;
        self.reset_value = value;
    }

    /// Set the FADT flags
    pub fn set_flags(&mut self, flags: u32) {
        self.flags = U32::new(flags);
    }

    /// Set the IA-PC specific flags
    pub fn setup_iapc_flags(&mut self, flags: u16) {
        self.iapc_boot_arch = U16::new(flags);
    }

    /// Set the hypervisor vendor ID
    pub fn set_hypervisor_vendor_id(&mut self, hypervisor_vendor_id: [u8; 8]) {
        self.hypervisor_vendor_id = hypervisor_vendor_id;
    }
}

impl Sdt for Fadt {
    fn len(&self) -> usize {
        utils::u64_to_usize(u64::from(self.header.length.get()))
    }

    fn write_to_guest<M: GuestMemory>(&mut self, mem: &M, address: GuestAddress) -> Result<()> {
        self.header.checksum = 0;
        self.header.checksum = checksum(&[self.as_bytes()]);
        mem.write_slice(self.as_bytes(), address)?;
        Ok(())
    }
}

/// The SCI interrupt as the OS expects it in the FADT: the ISA IRQ when a legacy 8259 PIC is
/// present, the GSI otherwise.
pub fn sci_int<P: Platform + ?Sized>(platform: &P) -> u16 {
    let sci = platform.sci_pin();
    if platform.config().have_pcat_8259 {
        u16::from(sci.irq)
    } else {
        u16::from(sci.gsi)
    }
}

/// Fill the FADT referencing `facs` and `dsdt`, then let the platform complete it.
pub fn create_fadt<P: Platform + ?Sized>(
    table: &mut SdtBuffer,
    platform: &P,
    facs: u32,
    dsdt: u32,
) -> Result<()> {
    fill_header(Some(&mut *table), TableKind::Fadt, FADT_LEN)?;

    let mut fadt = Fadt::new(table.header());
    fadt.set_firmware_ctrl(facs);
    fadt.set_dsdt(dsdt);
    // P_LVLx latencies are not used as CPU _CST will override them.
    fadt.set_cstate_latencies(FADT_C2_NOT_SUPPORTED, FADT_C3_NOT_SUPPORTED);
    // Use CPU _PTC instead to provide P_CNT details.
    fadt.set_duty_cycle(0, 0);
    fadt.set_preferred_pm_profile(platform.preferred_pm_profile());
    fadt.set_sci_int(sci_int(platform));

    platform.fill_fadt(&mut fadt);

    table.write_at(0, &fadt);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fadt_layout() {
        assert_eq!(FADT_LEN, 276);
        let fadt = Fadt::new(SdtHeader::new(*b"FACP", FADT_LEN, 6));
        assert_eq!(fadt.len(), 276);
        assert_eq!(fadt.as_bytes()[131], FADT_MINOR_VERSION);
    }

    #[test]
    fn test_fadt_pointers() {
        let mut fadt = Fadt::new(SdtHeader::new(*b"FACP", FADT_LEN, 6));
        fadt.set_firmware_ctrl(0x1000);
        fadt.set_dsdt(0x2000);
        assert_eq!(fadt.firmware_ctrl(), 0x1000);
        assert_eq!(fadt.dsdt(), 0x2000);
        // X_FIRMWARE_CTRL at offset 132, X_DSDT at 140.
        assert_eq!(&fadt.as_bytes()[132..140], &0x1000u64.to_le_bytes());
        assert_eq!(&fadt.as_bytes()[140..148], &0x2000u64.to_le_bytes());
    }
}
