// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! TCPA (TPM 1.2) and TPM2 tables, pointing the OS at the TCG event log.

use log::{debug, error};
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::platform::{CbmemId, MemoryEntry, Platform, TableSink, TpmInterface};
use crate::sdt::SdtBuffer;
use crate::{Result, SdtHeader, TableKind, fill_header};

/// Size of a freshly created event log.
pub const TCG_LOG_DEFAULT_LEN: u64 = 0x10000;
/// Offset of the CRB control area from the TPM base address.
const CRB_CONTROL_AREA_OFFSET: u64 = 0x40;
const START_METHOD_FIFO: u32 = 6;
const START_METHOD_CRB: u32 = 7;

/// Trusted Computing Platform Alliance capabilities table (TCPA)
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct Tcpa {
    pub header: SdtHeader,
    pub platform_class: U16,
    /// Log area minimum length.
    pub laml: U32,
    /// Log area start address.
    pub lasa: U64,
}

/// Trusted Platform Module 2 table (TPM2)
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct Tpm2 {
    pub header: SdtHeader,
    pub platform_class: U16,
    reserved: U16,
    pub control_area: U64,
    pub start_method: U32,
    /// Start method specific parameters.
    pub msp: [u8; 12],
    pub laml: U32,
    pub lasa: U64,
}

// Both structures are well under 4 GiB.
#[allow(clippy::cast_possible_truncation)]
pub const TCPA_LEN: u32 = std::mem::size_of::<Tcpa>() as u32;
#[allow(clippy::cast_possible_truncation)]
pub const TPM2_LEN: u32 = std::mem::size_of::<Tpm2>() as u32;

/// Find the event log `id`, or create a zeroed one of the default size.
fn get_tcg_log(sink: &mut dyn TableSink, id: CbmemId, name: &str) -> Option<MemoryEntry> {
    if let Some(log) = sink.find_persistent(id) {
        debug!("acpi: {name} log found at {:#x}", log.address);
        return Some(log);
    }
    match sink.add_persistent(id, TCG_LOG_DEFAULT_LEN) {
        Ok(log) => {
            debug!("acpi: {name} log created at {:#x}", log.address);
            Some(log)
        }
        Err(err) => {
            error!("acpi: {name} log creation failed: {err}");
            None
        }
    }
}

/// Event log sizes are reported in a 32-bit field.
fn log_len(log: &MemoryEntry) -> u32 {
    u32::try_from(log.size).unwrap_or(u32::MAX)
}

/// Build the TCPA table when a TPM 1.2 is present and its log area is available.
pub fn create_tcpa<P: Platform + ?Sized>(
    table: &mut SdtBuffer,
    platform: &P,
    sink: &mut dyn TableSink,
) -> Result<()> {
    if !platform.config().tpm1 {
        return Ok(());
    }

    let Some(log) = get_tcg_log(sink, CbmemId::TCPA_TCG_LOG, "TCPA") else {
        return Ok(());
    };

    fill_header(Some(&mut *table), TableKind::Tcpa, TCPA_LEN)?;
    let tcpa = Tcpa {
        header: table.header(),
        platform_class: U16::ZERO,
        laml: U32::new(log_len(&log)),
        lasa: U64::new(log.address),
    };
    table.write_at(0, &tcpa);
    Ok(())
}

/// Build the TPM2 table when a TPM 2.0 is present.
///
/// Some payloads depend on the log area to use the TPM, so one is created if needed. The table
/// is still written, with an empty log, when that fails.
pub fn create_tpm2<P: Platform + ?Sized>(
    table: &mut SdtBuffer,
    platform: &P,
    sink: &mut dyn TableSink,
) -> Result<()> {
    if !platform.config().tpm2 {
        return Ok(());
    }

    let log = get_tcg_log(sink, CbmemId::TPM2_TCG_LOG, "TPM2");

    fill_header(Some(&mut *table), TableKind::Tpm2, TPM2_LEN)?;
    let (control_area, start_method) = match platform.tpm_interface() {
        TpmInterface::Crb { base } => (base + CRB_CONTROL_AREA_OFFSET, START_METHOD_CRB),
        TpmInterface::Fifo => (0, START_METHOD_FIFO),
    };
    let tpm2 = Tpm2 {
        header: table.header(),
        // Hard to detect, just set it to 0.
        platform_class: U16::ZERO,
        reserved: U16::ZERO,
        control_area: U64::new(control_area),
        start_method: U32::new(start_method),
        msp: [0; 12],
        laml: U32::new(log.as_ref().map_or(0, log_len)),
        lasa: U64::new(log.map_or(0, |log| log.address)),
    };
    table.write_at(0, &tpm2);
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::madt::tests::{TestPlatform, cpu};
    use crate::{AcpiError, SDT_HEADER_LEN};

    /// A sink whose persistent memory may be full.
    #[derive(Default)]
    pub(crate) struct MemorySink {
        pub areas: BTreeMap<CbmemId, MemoryEntry>,
        pub next: u64,
        pub full: bool,
    }

    impl TableSink for MemorySink {
        fn current(&self) -> u64 {
            0
        }

        fn add_table(&mut self, _table: &mut SdtBuffer) -> Result<u64> {
            Ok(0)
        }

        fn write_bytes(&mut self, _address: u64, _data: &[u8]) -> Result<()> {
            Ok(())
        }

        fn find_persistent(&self, id: CbmemId) -> Option<MemoryEntry> {
            self.areas.get(&id).copied()
        }

        fn add_persistent(&mut self, id: CbmemId, size: u64) -> Result<MemoryEntry> {
            if self.full {
                return Err(AcpiError::InvalidGuestAddress);
            }
            let entry = MemoryEntry {
                address: 0x7f00_0000 + self.next,
                size,
            };
            self.next += size;
            self.areas.insert(id, entry);
            Ok(entry)
        }
    }

    #[test]
    fn test_sizes() {
        assert_eq!(TCPA_LEN, 50);
        assert_eq!(TPM2_LEN, 76);
    }

    #[test]
    fn test_tcpa_disabled() {
        let platform = TestPlatform::with_cpus(vec![cpu(0, 0)]);
        let mut sink = MemorySink::default();
        let mut table = SdtBuffer::new(TCPA_LEN as usize);
        create_tcpa(&mut table, &platform, &mut sink).unwrap();
        assert_eq!(table.length(), 0);
        assert!(sink.areas.is_empty());
    }

    #[test]
    fn test_tcpa_creates_log() {
        let mut platform = TestPlatform::with_cpus(vec![cpu(0, 0)]);
        platform.config.tpm1 = true;
        let mut sink = MemorySink::default();
        let mut table = SdtBuffer::new(TCPA_LEN as usize);
        create_tcpa(&mut table, &platform, &mut sink).unwrap();

        let tcpa = table.read_at::<Tcpa>(0).unwrap();
        assert_eq!(tcpa.header.signature, *b"TCPA");
        assert_eq!(tcpa.header.length.get(), 50);
        assert_eq!(tcpa.laml.get(), 0x10000);
        assert_eq!(tcpa.lasa.get(), 0x7f00_0000);
    }

    #[test]
    fn test_tcpa_without_log_is_skipped() {
        let mut platform = TestPlatform::with_cpus(vec![cpu(0, 0)]);
        platform.config.tpm1 = true;
        let mut sink = MemorySink {
            full: true,
            ..Default::default()
        };
        let mut table = SdtBuffer::new(TCPA_LEN as usize);
        create_tcpa(&mut table, &platform, &mut sink).unwrap();
        assert!(table.length() < TCPA_LEN);
    }

    #[test]
    fn test_tpm2_reuses_log() {
        let mut platform = TestPlatform::with_cpus(vec![cpu(0, 0)]);
        platform.config.tpm2 = true;
        let mut sink = MemorySink::default();
        sink.areas.insert(
            CbmemId::TPM2_TCG_LOG,
            MemoryEntry {
                address: 0x1234_0000,
                size: 0x8000,
            },
        );
        let mut table = SdtBuffer::new(SDT_HEADER_LEN);
        create_tpm2(&mut table, &platform, &mut sink).unwrap();

        let tpm2 = table.read_at::<Tpm2>(0).unwrap();
        assert_eq!(tpm2.header.revision, 4);
        assert_eq!(tpm2.header.length.get(), 76);
        assert_eq!(tpm2.start_method.get(), START_METHOD_FIFO);
        assert_eq!(tpm2.control_area.get(), 0);
        assert_eq!(tpm2.laml.get(), 0x8000);
        assert_eq!(tpm2.lasa.get(), 0x1234_0000);
    }

    #[test]
    fn test_tpm2_without_log() {
        let mut platform = TestPlatform::with_cpus(vec![cpu(0, 0)]);
        platform.config.tpm2 = true;
        let mut sink = MemorySink {
            full: true,
            ..Default::default()
        };
        let mut table = SdtBuffer::new(TPM2_LEN as usize);
        create_tpm2(&mut table, &platform, &mut sink).unwrap();
        let tpm2 = table.read_at::<Tpm2>(0).unwrap();
        assert_eq!(tpm2.header.length.get(), TPM2_LEN);
        assert_eq!(tpm2.laml.get(), 0);
        assert_eq!(tpm2.lasa.get(), 0);
    }
}
