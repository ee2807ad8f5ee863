// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Interfaces through which the table builder learns about the platform it describes.

use std::collections::BTreeMap;

use serde::Deserialize;
use vm_allocator::{AddressAllocator, AllocPolicy};

use crate::fadt::Fadt;
use crate::sdt::SdtBuffer;
use crate::{GenericAddressStructure, Result};

/// Feature switches of the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AcpiConfig {
    /// A legacy 8259 PIC is present: SCI is reported as an ISA IRQ and the MADT PCAT flag is set.
    pub have_pcat_8259: bool,
    /// Emit LAPIC (or x2APIC) and NMI entries for all enabled CPUs in the MADT.
    pub common_madt_lapic: bool,
    /// Emit the IOAPIC entry, the IRQ0 override and the SCI override in the MADT.
    pub common_madt_ioapic: bool,
    /// Let the platform append its own MADT entries.
    pub custom_madt: bool,
    /// Only xAPIC mode is supported: no x2APIC NMI entry.
    pub xapic_only: bool,
    /// PCIe enhanced configuration access is available.
    pub ecam_mmconf_support: bool,
    /// A TPM 1.2 is present.
    pub tpm1: bool,
    /// A TPM 2.0 is present.
    pub tpm2: bool,
    /// Emit the Low Power Idle Table.
    pub lpit: bool,
    /// Emit the Boot Error Record Table.
    pub bert: bool,
    /// A serial console is configured.
    pub console_serial: bool,
    /// Dump every table in acpixtract compatible format once done.
    pub debug_acpica_compatible: bool,
}

/// An enabled logical processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuInfo {
    pub apic_id: u32,
    pub thread_id: u32,
}

/// The IOAPIC routing the legacy interrupts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoApicInfo {
    pub id: u8,
    pub address: u32,
    /// Number of redirection entries.
    pub max_vectors: u8,
}

/// Where the SCI is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SciPin {
    pub gsi: u8,
    pub irq: u8,
    /// MPS INTI flags (polarity and trigger mode).
    pub flags: u16,
}

/// PCIe enhanced configuration space window of segment 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcamInfo {
    pub base: u64,
    pub bus_count: u16,
}

/// How the console UART is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialAccess {
    IoMapped,
    MemoryMapped,
}

/// UART programming model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartKind {
    Ns16550,
    Pl011,
}

/// The console UART.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConsole {
    pub access: SerialAccess,
    pub kind: UartKind,
    pub base: u32,
    /// Register width in bytes.
    pub regwidth: u8,
}

/// How the OS talks to the TPM 2.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpmInterface {
    Fifo,
    Crb { base: u64 },
}

/// Region holding the boot error records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BertRegion {
    pub address: u64,
    pub length: u32,
}

/// A native C-state low power idle state.
#[derive(Debug, Clone, Copy, Default)]
pub struct LpiState {
    pub uid: u16,
    pub disabled: bool,
    pub entry_trigger: GenericAddressStructure,
    pub min_residency: u32,
    pub max_latency: u32,
    pub residency_counter: GenericAddressStructure,
    pub counter_frequency: u64,
}

/// Identifier of a persistent memory area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CbmemId(pub u32);

impl CbmemId {
    pub const CBTABLE: CbmemId = CbmemId(0x4342_5442);
    pub const TCPA_TCG_LOG: CbmemId = CbmemId(0x5443_5041);
    pub const TPM2_TCG_LOG: CbmemId = CbmemId(0x5450_4d32);
    pub const ACPI_EINJ: CbmemId = CbmemId(0x45494e4a);
}

/// A persistent memory area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryEntry {
    pub address: u64,
    pub size: u64,
}

/// Memory areas that survive into the OS, looked up by id.
pub trait PersistentMemory {
    /// Return the area registered under `id`.
    fn find(&self, id: CbmemId) -> Option<MemoryEntry>;

    /// Create an area of `size` bytes under `id`, or return the existing one.
    fn add(&mut self, id: CbmemId, size: u64) -> Result<MemoryEntry>;
}

/// [`PersistentMemory`] carved out of a fixed address range.
#[derive(Debug)]
pub struct CbmemAllocator {
    allocator: AddressAllocator,
    entries: BTreeMap<CbmemId, MemoryEntry>,
}

impl CbmemAllocator {
    /// Areas are aligned to this many bytes.
    pub const ALIGNMENT: u64 = 32;

    pub fn new(base: u64, size: u64) -> Result<Self> {
        Ok(CbmemAllocator {
            allocator: AddressAllocator::new(base, size)?,
            entries: BTreeMap::new(),
        })
    }
}

impl PersistentMemory for CbmemAllocator {
    fn find(&self, id: CbmemId) -> Option<MemoryEntry> {
        self.entries.get(&id).copied()
    }

    fn add(&mut self, id: CbmemId, size: u64) -> Result<MemoryEntry> {
        if let Some(entry) = self.entries.get(&id) {
            return Ok(*entry);
        }
        let address = self
            .allocator
            .allocate(size, Self::ALIGNMENT, AllocPolicy::FirstMatch)?
            .start();
        let entry = MemoryEntry { address, size };
        self.entries.insert(id, entry);
        Ok(entry)
    }
}

/// Where device code puts the tables it generates.
pub trait TableSink {
    /// Address the next table will be written at.
    fn current(&self) -> u64;

    /// Checksum `table`, write it at the cursor, advance past it and register it in the RSDT and
    /// XSDT. Returns the address of the table.
    fn add_table(&mut self, table: &mut SdtBuffer) -> Result<u64>;

    /// Write `data` at `address`, outside of the table area.
    fn write_bytes(&mut self, address: u64, data: &[u8]) -> Result<()>;

    /// Look up a persistent memory area.
    fn find_persistent(&self, id: CbmemId) -> Option<MemoryEntry>;

    /// Look up a persistent memory area, creating and zeroing it if it does not exist yet.
    fn add_persistent(&mut self, id: CbmemId, size: u64) -> Result<MemoryEntry>;
}

/// A device that contributes AML or whole tables.
pub trait AcpiDevice {
    /// Name used in log messages.
    fn name(&self) -> &str;

    /// Append AML to the DSDT, in front of the static definition block.
    fn inject_dsdt(&self, _aml: &mut Vec<u8>) {}

    /// Append AML to the generated SSDT.
    fn fill_ssdt(&self, _aml: &mut Vec<u8>) {}

    /// Write additional tables after the fixed ones.
    fn write_acpi_tables(&self, _sink: &mut dyn TableSink) -> Result<()> {
        Ok(())
    }
}

/// Everything the builder needs to know about the platform.
pub trait Platform {
    fn config(&self) -> &AcpiConfig;

    /// Enabled logical processors, in enumeration order.
    fn enabled_cpus(&self) -> Vec<CpuInfo>;

    fn lapic_address(&self) -> u32 {
        0xfee0_0000
    }

    fn io_apic(&self) -> IoApicInfo;

    fn sci_pin(&self) -> SciPin;

    fn ecam(&self) -> Option<EcamInfo> {
        None
    }

    fn serial_console(&self) -> Option<SerialConsole> {
        None
    }

    fn tpm_interface(&self) -> TpmInterface {
        TpmInterface::Fifo
    }

    fn bert_region(&self) -> Option<BertRegion> {
        None
    }

    fn lpit_states(&self) -> Vec<LpiState> {
        Vec::new()
    }

    /// Value of the FADT preferred PM profile field.
    fn preferred_pm_profile(&self) -> u8 {
        0
    }

    /// Compiled DSDT image. Without one no tables are written.
    fn dsdt_file(&self) -> Option<&[u8]>;

    /// Optional SLIC or MSDM image.
    fn slic_file(&self) -> Option<&[u8]> {
        None
    }

    /// Enabled devices, in enumeration order.
    fn devices(&self) -> Vec<&dyn AcpiDevice> {
        Vec::new()
    }

    /// Platform specific FADT fields.
    fn fill_fadt(&self, _fadt: &mut Fadt) {}

    /// Platform specific MADT entries, appended when `custom_madt` is set.
    fn fill_madt(&self, _madt: &mut SdtBuffer) {}
}
