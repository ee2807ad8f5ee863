// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// Copyright 2023 Rivos, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Multiple APIC Description Table (MADT)
//!
//! This table includes information about the interrupt controllers of the device.
//! More information about this table can be found in the ACPI specification:
//! https://uefi.org/specs/ACPI/6.5/05_ACPI_Software_Programming_Model.html#multiple-apic-description-table-madt

use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::platform::{CpuInfo, Platform};
use crate::sdt::SdtBuffer;
use crate::{Result, SDT_HEADER_LEN, TableKind, fill_header, table_len};

/// Size of the fixed part of the MADT: header, local APIC address and flags.
pub const MADT_LEN: u32 = 44;
/// Largest APIC id that fits the 8-bit local APIC record.
pub const MADT_MAX_LAPIC_ID: u32 = 0xfe;
/// Highest hardware thread id enumerated when listing processors.
const MAX_THREAD_ID: u32 = 1;

const MADT_PCAT_COMPAT: u32 = 1;
const MADT_CPU_ENABLE_FLAG: u32 = 0;

const LOCAL_APIC: u8 = 0;
const IO_APIC: u8 = 1;
const IRQ_SOURCE_OVERRIDE: u8 = 2;
const LOCAL_APIC_NMI: u8 = 4;
const LOCAL_X2APIC: u8 = 9;
const LOCAL_X2APIC_NMI: u8 = 0x0a;

pub const MP_BUS_ISA: u8 = 0;
pub const MP_IRQ_POLARITY_HIGH: u16 = 0x1;
pub const MP_IRQ_POLARITY_LOW: u16 = 0x3;
pub const MP_IRQ_TRIGGER_EDGE: u16 = 0x4;
pub const MP_IRQ_TRIGGER_LEVEL: u16 = 0xc;

const LAPIC_NMI_ALL_PROCESSORS: u8 = 0xff;
const X2APIC_NMI_ALL_PROCESSORS: u32 = 0xffff_ffff;

// clippy doesn't understand that we actually "use" the fields of this struct when we serialize
// them as bytes in guest memory, so here we just ignore dead code to avoid having to name
// everything with an underscore prefix
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct LocalApic {
    pub r#type: u8,
    pub length: u8,
    pub processor_uid: u8,
    pub apic_id: u8,
    pub flags: U32,
}

impl LocalApic {
    pub fn new(processor_uid: u8, apic_id: u8) -> Self {
        Self {
            r#type: LOCAL_APIC,
            length: 8,
            processor_uid,
            apic_id,
            flags: U32::new(1u32 << MADT_CPU_ENABLE_FLAG),
        }
    }
}

#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct LocalX2Apic {
    pub r#type: u8,
    pub length: u8,
    reserved: U16,
    pub x2apic_id: U32,
    pub flags: U32,
    pub processor_uid: U32,
}

impl LocalX2Apic {
    pub fn new(processor_uid: u32, x2apic_id: u32) -> Self {
        Self {
            r#type: LOCAL_X2APIC,
            length: 16,
            reserved: U16::ZERO,
            x2apic_id: U32::new(x2apic_id),
            flags: U32::new(1u32 << MADT_CPU_ENABLE_FLAG),
            processor_uid: U32::new(processor_uid),
        }
    }
}

#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct IoApic {
    pub r#type: u8,
    pub length: u8,
    pub ioapic_id: u8,
    reserved: u8,
    pub apic_address: U32,
    pub gsi_base: U32,
}

impl IoApic {
    pub fn new(ioapic_id: u8, apic_address: u32, gsi_base: u32) -> Self {
        IoApic {
            r#type: IO_APIC,
            length: 12,
            ioapic_id,
            reserved: 0,
            apic_address: U32::new(apic_address),
            gsi_base: U32::new(gsi_base),
        }
    }
}

#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct IrqOverride {
    pub r#type: u8,
    pub length: u8,
    pub bus: u8,
    pub source: u8,
    pub gsi: U32,
    pub flags: U16,
}

impl IrqOverride {
    pub fn new(bus: u8, source: u8, gsi: u32, flags: u16) -> Self {
        IrqOverride {
            r#type: IRQ_SOURCE_OVERRIDE,
            length: 10,
            bus,
            source,
            gsi: U32::new(gsi),
            flags: U16::new(flags),
        }
    }
}

#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct LocalApicNmi {
    pub r#type: u8,
    pub length: u8,
    pub processor_uid: u8,
    pub flags: U16,
    pub lint: u8,
}

impl LocalApicNmi {
    pub fn new(processor_uid: u8, flags: u16, lint: u8) -> Self {
        LocalApicNmi {
            r#type: LOCAL_APIC_NMI,
            length: 6,
            processor_uid,
            flags: U16::new(flags),
            lint,
        }
    }
}

#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct LocalX2ApicNmi {
    pub r#type: u8,
    pub length: u8,
    pub flags: U16,
    pub processor_uid: U32,
    pub lint: u8,
    reserved: [u8; 3],
}

impl LocalX2ApicNmi {
    pub fn new(processor_uid: u32, flags: u16, lint: u8) -> Self {
        LocalX2ApicNmi {
            r#type: LOCAL_X2APIC_NMI,
            length: 12,
            flags: U16::new(flags),
            processor_uid: U32::new(processor_uid),
            lint,
            reserved: [0; 3],
        }
    }
}

/// Hands out consecutive GSI ranges to IOAPICs.
///
/// The IOAPIC that may route the 8259 through ExtINT must be registered first so it gets GSI 0.
#[derive(Debug, Default)]
pub struct GsiAllocator {
    next: u32,
}

impl GsiAllocator {
    /// Return the base GSI for an IOAPIC with `count` redirection entries.
    pub fn allocate(&mut self, count: u8) -> u32 {
        let base = self.next;
        self.next += u32::from(count);
        base
    }
}

/// Append a local APIC record for processor `index`, or an x2APIC one when the id does not fit
/// in 8 bits. Returns the offset of the record.
pub fn append_lapic(table: &mut SdtBuffer, index: u32, apic_id: u32) -> usize {
    match (u8::try_from(index), u8::try_from(apic_id)) {
        (Ok(uid), Ok(id)) if apic_id <= MADT_MAX_LAPIC_ID => {
            table.append(&LocalApic::new(uid, id))
        }
        _ => table.append(&LocalX2Apic::new(index, apic_id)),
    }
}

/// APIC ids of the enabled processors in the order they are listed in the MADT.
///
/// Every core's first thread is listed before any core's second thread, so processors are
/// grouped by thread id and each group is sorted by APIC id.
pub fn madt_apic_ids(cpus: &[CpuInfo]) -> Vec<u32> {
    let mut apic_ids = Vec::with_capacity(cpus.len());
    for thread_id in 0..=MAX_THREAD_ID {
        let mut group: Vec<u32> = cpus
            .iter()
            .filter(|cpu| cpu.thread_id == thread_id)
            .map(|cpu| cpu.apic_id)
            .collect();
        group.sort_unstable();
        apic_ids.extend(group);
    }
    apic_ids
}

/// Append one local APIC (or x2APIC) record per enabled processor.
pub fn append_lapics(table: &mut SdtBuffer, cpus: &[CpuInfo]) {
    for (index, apic_id) in (0u32..).zip(madt_apic_ids(cpus)) {
        append_lapic(table, index, apic_id);
    }
}

/// Append NMI records connecting LINT1 to NMI on all processors.
pub fn append_lapic_nmis(table: &mut SdtBuffer, xapic_only: bool) {
    let flags = MP_IRQ_TRIGGER_EDGE | MP_IRQ_POLARITY_HIGH;
    table.append(&LocalApicNmi::new(LAPIC_NMI_ALL_PROCESSORS, flags, 1));
    if !xapic_only {
        table.append(&LocalX2ApicNmi::new(X2APIC_NMI_ALL_PROCESSORS, flags, 1));
    }
}

/// Append the IOAPIC routing GSI 0, the ISA IRQ0 to GSI2 override and the SCI override.
pub fn append_ioapic_gsi0_default<P: Platform + ?Sized>(
    table: &mut SdtBuffer,
    platform: &P,
    gsis: &mut GsiAllocator,
) {
    let io_apic = platform.io_apic();
    let gsi_base = gsis.allocate(io_apic.max_vectors);
    table.append(&IoApic::new(io_apic.id, io_apic.address, gsi_base));

    table.append(&IrqOverride::new(
        MP_BUS_ISA,
        0,
        2,
        MP_IRQ_TRIGGER_EDGE | MP_IRQ_POLARITY_HIGH,
    ));

    let sci = platform.sci_pin();
    let source = if platform.config().have_pcat_8259 {
        sci.irq
    } else {
        sci.gsi
    };
    table.append(&IrqOverride::new(
        MP_BUS_ISA,
        source,
        u32::from(sci.gsi),
        sci.flags,
    ));
}

/// Build the MADT into `table`.
pub fn create_madt<P: Platform + ?Sized>(table: &mut SdtBuffer, platform: &P) -> Result<()> {
    fill_header(Some(&mut *table), TableKind::Madt, MADT_LEN)?;
    let config = platform.config();

    table.write_at(SDT_HEADER_LEN, &U32::new(platform.lapic_address()));
    let flags = if config.have_pcat_8259 {
        MADT_PCAT_COMPAT
    } else {
        0
    };
    table.write_at(SDT_HEADER_LEN + 4, &U32::new(flags));

    if config.common_madt_lapic {
        append_lapics(table, &platform.enabled_cpus());
        append_lapic_nmis(table, config.xapic_only);
    }

    if config.common_madt_ioapic {
        append_ioapic_gsi0_default(table, platform, &mut GsiAllocator::default());
    }

    if config.custom_madt {
        platform.fill_madt(table);
    }

    // (Re)calculate length.
    table.set_length(table_len(table.current())?);
    Ok(())
}
