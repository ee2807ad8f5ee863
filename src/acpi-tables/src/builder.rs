// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Lays out the whole set of ACPI tables in a flat memory region.
//!
//! The root structures (RSDP, RSDT, XSDT) and the FACS come first, followed by the tables of
//! the fixed generator list and then whatever the platform devices add. Every table starts on a
//! 16 byte boundary.

use std::fmt::Write as _;

use log::{debug, error, info, trace, warn};
use vm_memory::{Bytes, GuestAddress, GuestMemory};

use crate::dsdt::{create_dsdt, create_slic, oem_ids, validate_dsdt, validate_slic};
use crate::facs::{FACS_ALIGNMENT, Facs};
use crate::fadt::{FADT_LEN, Fadt, create_fadt};
use crate::madt::create_madt;
use crate::mcfg::{MCFG_LEN, create_mcfg};
use crate::platform::{CbmemId, MemoryEntry, PersistentMemory, Platform, TableSink};
use crate::rsdp::{Rsdp, valid_rsdp};
use crate::rsdt::{Rsdt, Xsdt, add_table, read_obj};
use crate::sdt::SdtBuffer;
use crate::ssdt::create_ssdt;
use crate::tpm::{TCPA_LEN, TPM2_LEN, create_tcpa, create_tpm2};
use crate::{AcpiError, Result, SDT_HEADER_LEN, Sdt, SdtHeader, TableKind, bert, lpit, spcr};

/// Alignment of every table.
pub const TABLE_ALIGNMENT: u64 = 16;
/// Legacy BIOS area scanned for the RSDP on resume.
const RSDP_SCAN_START: u64 = 0xe0000;
const RSDP_SCAN_END: u64 = 0xfffff;
const RSDP_SCAN_STEP: u64 = 16;

fn align_current(current: u64) -> u64 {
    utils::align_up(current, TABLE_ALIGNMENT)
}

/// Writes tables into guest memory at a monotonically advancing cursor and registers them in
/// the root tables.
pub struct AcpiTableWriter<'a, M: GuestMemory> {
    mem: &'a M,
    rsdp: Rsdp,
    current: u64,
    cbmem: &'a mut dyn PersistentMemory,
}

impl<M: GuestMemory> std::fmt::Debug for AcpiTableWriter<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcpiTableWriter")
            .field("rsdp", &self.rsdp)
            .field("current", &self.current)
            .finish()
    }
}

impl<'a, M: GuestMemory> AcpiTableWriter<'a, M> {
    /// Writer placing tables from `current` on, registering them through `rsdp`, whose RSDT and
    /// XSDT must already be in memory.
    pub fn new(
        mem: &'a M,
        rsdp: Rsdp,
        current: u64,
        cbmem: &'a mut dyn PersistentMemory,
    ) -> Self {
        AcpiTableWriter {
            mem,
            rsdp,
            current: align_current(current),
            cbmem,
        }
    }

    pub fn rsdp(&self) -> &Rsdp {
        &self.rsdp
    }

    /// Checksum `table` and write it at the cursor, without registering it. Returns the
    /// address it was written at.
    fn place(&mut self, table: &mut SdtBuffer) -> Result<u64> {
        let addr = self.current;
        table.update_checksum();
        table
            .write_to_guest(self.mem, GuestAddress(addr))
            .inspect_err(|err| error!("acpi: Could not write table in guest memory: {err}"))?;

        debug!(
            "acpi: Wrote table ({} bytes) at address: {:#010x}",
            table.len(),
            addr
        );

        self.current = align_current(addr + utils::usize_to_u64(table.len()));
        Ok(addr)
    }

    fn register(&self, addr: u64) -> Result<()> {
        add_table(self.mem, &self.rsdp, addr)?;
        Ok(())
    }
}

impl<M: GuestMemory> TableSink for AcpiTableWriter<'_, M> {
    fn current(&self) -> u64 {
        self.current
    }

    fn add_table(&mut self, table: &mut SdtBuffer) -> Result<u64> {
        let addr = self.place(table)?;
        self.register(addr)?;
        Ok(addr)
    }

    fn write_bytes(&mut self, address: u64, data: &[u8]) -> Result<()> {
        self.mem.write_slice(data, GuestAddress(address))?;
        Ok(())
    }

    fn find_persistent(&self, id: CbmemId) -> Option<MemoryEntry> {
        self.cbmem.find(id)
    }

    fn add_persistent(&mut self, id: CbmemId, size: u64) -> Result<MemoryEntry> {
        if let Some(entry) = self.cbmem.find(id) {
            return Ok(entry);
        }
        let entry = self.cbmem.add(id, size)?;
        let zeroes = vec![0u8; utils::u64_to_usize(entry.size)];
        self.write_bytes(entry.address, &zeroes)?;
        Ok(entry)
    }
}

/// The fixed, ordered list of table generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableGenerator {
    Dsdt,
    Fadt,
    Slic,
    Ssdt,
    Mcfg,
    Tcpa,
    Tpm2,
    Lpit,
    Madt,
    Bert,
    Spcr,
}

/// What the generators need besides the platform.
#[derive(Debug)]
struct GeneratorContext<'a> {
    dsdt_file: &'a [u8],
    slic_file: Option<&'a [u8]>,
    facs: u32,
    dsdt: u32,
}

impl TableGenerator {
    /// Generators in the order their tables are laid out.
    pub const ALL: [TableGenerator; 11] = [
        TableGenerator::Dsdt,
        TableGenerator::Fadt,
        TableGenerator::Slic,
        TableGenerator::Ssdt,
        TableGenerator::Mcfg,
        TableGenerator::Tcpa,
        TableGenerator::Tpm2,
        TableGenerator::Lpit,
        TableGenerator::Madt,
        TableGenerator::Bert,
        TableGenerator::Spcr,
    ];

    /// Tables shorter than this are not written.
    pub const fn min_size(self) -> usize {
        match self {
            TableGenerator::Fadt => FADT_LEN as usize,
            TableGenerator::Mcfg => MCFG_LEN as usize,
            TableGenerator::Tcpa => TCPA_LEN as usize,
            TableGenerator::Tpm2 => TPM2_LEN as usize,
            TableGenerator::Bert => bert::BERT_LEN as usize,
            TableGenerator::Spcr => spcr::SPCR_LEN as usize,
            TableGenerator::Dsdt
            | TableGenerator::Slic
            | TableGenerator::Ssdt
            | TableGenerator::Lpit
            | TableGenerator::Madt => SDT_HEADER_LEN,
        }
    }

    fn generate<P: Platform + ?Sized>(
        self,
        table: &mut SdtBuffer,
        platform: &P,
        context: &GeneratorContext<'_>,
        sink: &mut dyn TableSink,
    ) -> Result<()> {
        match self {
            TableGenerator::Dsdt => create_dsdt(table, context.dsdt_file, &platform.devices()),
            TableGenerator::Fadt => create_fadt(table, platform, context.facs, context.dsdt),
            TableGenerator::Slic => {
                create_slic(table, context.slic_file);
                Ok(())
            }
            TableGenerator::Ssdt => create_ssdt(
                table,
                sink.find_persistent(CbmemId::CBTABLE),
                &platform.devices(),
            ),
            TableGenerator::Mcfg => create_mcfg(table, platform),
            TableGenerator::Tcpa => create_tcpa(table, platform, sink),
            TableGenerator::Tpm2 => create_tpm2(table, platform, sink),
            TableGenerator::Lpit => lpit::create_lpit(table, platform),
            TableGenerator::Madt => create_madt(table, platform),
            TableGenerator::Bert => bert::create_bert(table, platform),
            TableGenerator::Spcr => spcr::create_spcr(table, platform),
        }
    }
}

fn address_u32(addr: u64) -> Result<u32> {
    u32::try_from(addr).map_err(|_| AcpiError::InvalidGuestAddress)
}

/// Write all ACPI tables from `start` on and return the next free address.
///
/// Without a valid DSDT image nothing is written and `start` is returned. Persistent memory
/// areas (TPM event logs, EINJ mailbox) come from `cbmem`.
pub fn write_acpi_tables<M, P>(
    mem: &M,
    start: u64,
    platform: &P,
    cbmem: &mut dyn PersistentMemory,
) -> Result<u64>
where
    M: GuestMemory,
    P: Platform + ?Sized,
{
    let mut current = align_current(start);

    let Some(dsdt_file) = validate_dsdt(platform.dsdt_file()) else {
        return Ok(start);
    };
    let slic_file = validate_slic(platform.slic_file());
    let (oem_id, oem_table_id) = oem_ids(slic_file);

    info!("acpi: Writing ACPI tables at {start:#x}.");

    // We need at least an RSDP and an RSDT table.
    let rsdp_addr = current;
    current = align_current(current + utils::usize_to_u64(std::mem::size_of::<Rsdp>()));
    let rsdt_addr = current;
    current = align_current(current + utils::usize_to_u64(std::mem::size_of::<Rsdt>()));
    let xsdt_addr = current;
    current = align_current(current + utils::usize_to_u64(std::mem::size_of::<Xsdt>()));

    // Clear all table memory.
    let zeroes = vec![0u8; utils::u64_to_usize(current - start)];
    mem.write_slice(&zeroes, GuestAddress(start))?;

    let mut rsdp = Rsdp::new(oem_id, address_u32(rsdt_addr)?, Some(xsdt_addr));
    rsdp.write_to_guest(mem, GuestAddress(rsdp_addr))
        .inspect_err(|err| error!("acpi: Could not write RSDP in guest memory: {err}"))?;
    Rsdt::new(oem_id, oem_table_id).write_to_guest(mem, GuestAddress(rsdt_addr))?;
    Xsdt::new(oem_id, oem_table_id).write_to_guest(mem, GuestAddress(xsdt_addr))?;

    current = utils::align_up(current, FACS_ALIGNMENT);
    debug!("acpi:    * FACS");
    let facs_addr = current;
    let mut facs = Facs::new();
    facs.write_to_guest(mem, GuestAddress(facs_addr))?;
    current = align_current(current + utils::usize_to_u64(facs.len()));

    let mut writer = AcpiTableWriter::new(mem, rsdp, current, cbmem);
    let mut context = GeneratorContext {
        dsdt_file,
        slic_file,
        facs: address_u32(facs_addr)?,
        dsdt: 0,
    };

    for generator in TableGenerator::ALL {
        let min_size = generator.min_size();
        let mut table = SdtBuffer::new(min_size);
        if let Err(err) = generator.generate(&mut table, platform, &context, &mut writer) {
            warn!("acpi: {generator:?} table not generated: {err}");
            continue;
        }
        if utils::u64_to_usize(u64::from(table.length())) < min_size {
            continue;
        }

        let addr = writer.place(&mut table)?;
        // The DSDT is referenced from the FADT only.
        if generator == TableGenerator::Dsdt {
            context.dsdt = address_u32(addr)?;
            continue;
        }

        debug!(
            "acpi:    * {}",
            String::from_utf8_lossy(&table.signature())
        );
        writer.register(addr)?;
    }

    debug!("acpi: current = {:#x}", writer.current());

    for device in platform.devices() {
        device.write_acpi_tables(&mut writer).inspect_err(|err| {
            error!("acpi: {}: Could not write tables: {err}", device.name())
        })?;
        writer.current = align_current(writer.current);
    }

    info!("acpi: done.");

    if platform.config().debug_acpica_compatible {
        debug!("acpi: Printing ACPI tables in ACPICA compatible format");
        let xsdt: Xsdt = read_obj(mem, GuestAddress(xsdt_addr))?;
        for addr in xsdt.entries() {
            acpidump_print(mem, addr)?;
        }
        debug!("acpi: Done printing ACPI tables in ACPICA compatible format");
    }

    Ok(writer.current())
}

/// Format `data` the way acpixtract expects it: offset, 16 hex bytes, then the printable ones.
pub fn acpixtract_hexdump(data: &[u8]) -> Vec<String> {
    data.chunks(16)
        .enumerate()
        .map(|(index, line)| {
            let mut out = format!("    {:04X}:", index * 16);
            for byte in line {
                let _ = write!(out, " {byte:02x}");
            }
            for _ in line.len()..16 {
                out.push_str("   ");
            }
            out.push_str("  ");
            out.extend(line.iter().map(|byte| {
                if byte.is_ascii_graphic() || *byte == b' ' {
                    char::from(*byte)
                } else {
                    '.'
                }
            }));
            out
        })
        .collect()
}

fn acpidump_print<M: GuestMemory>(mem: &M, addr: u64) -> Result<()> {
    let header: SdtHeader = read_obj(mem, GuestAddress(addr))?;
    let mut data = vec![0u8; utils::u64_to_usize(u64::from(header.length.get()))];
    mem.read_slice(&mut data, GuestAddress(addr))?;

    trace!(
        "{} @ 0x0000000000000000",
        String::from_utf8_lossy(&header.signature)
    );
    for line in acpixtract_hexdump(&data) {
        trace!("{line}");
    }
    trace!("");
    Ok(())
}

/// Find the OS waking vector left in the FACS by a previous boot.
///
/// Only meaningful when resuming from S3. The RSDP is looked for in the legacy BIOS area, then
/// the FADT through the RSDT, then the FACS through the FADT.
pub fn find_wakeup_vector<M: GuestMemory>(mem: &M) -> Option<u64> {
    debug!("acpi: Trying to find the wakeup vector...");

    let Some((rsdp_addr, rsdp)) = (RSDP_SCAN_START..RSDP_SCAN_END)
        .step_by(utils::u64_to_usize(RSDP_SCAN_STEP))
        .find_map(|addr| valid_rsdp(mem, GuestAddress(addr)).map(|rsdp| (addr, rsdp)))
    else {
        error!("acpi: No RSDP found, wake up from S3 not possible.");
        return None;
    };
    debug!("acpi: RSDP found at {rsdp_addr:#x}");

    let rsdt: Rsdt = read_obj(mem, GuestAddress(u64::from(rsdp.rsdt_addr()))).ok()?;
    debug!(
        "acpi: RSDT found at {:#x} ends at {:#x}",
        rsdp.rsdt_addr(),
        u64::from(rsdp.rsdt_addr()) + u64::from(rsdt.header().length.get())
    );

    let fadt_addr = rsdt.entries().into_iter().find(|addr| {
        read_obj::<[u8; 4], M>(mem, GuestAddress(*addr))
            .is_ok_and(|signature| signature == TableKind::Fadt.signature())
    });
    let Some(fadt_addr) = fadt_addr else {
        error!("acpi: No FADT found, wake up from S3 not possible.");
        return None;
    };
    debug!("acpi: FADT found at {fadt_addr:#x}");

    let fadt: Fadt = read_obj(mem, GuestAddress(fadt_addr)).ok()?;
    let facs_addr = fadt.firmware_ctrl();
    if facs_addr == 0 {
        error!("acpi: No FACS found, wake up from S3 not possible.");
        return None;
    }
    debug!("acpi: FACS found at {facs_addr:#x}");

    let facs: Facs = read_obj(mem, GuestAddress(u64::from(facs_addr))).ok()?;
    let vector = u64::from(facs.firmware_waking_vector());
    debug!("acpi: OS waking vector is {vector:#x}");
    Some(vector)
}
