// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// Copyright 2023 Rivos, Inc.
//
// SPDX-License-Identifier: Apache-2.0

use std::mem::size_of;

use log::{debug, error};
use vm_memory::{Bytes, GuestAddress, GuestMemory};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::rsdp::Rsdp;
use crate::{MAX_ACPI_TABLES, Result, SDT_HEADER_LEN, Sdt, SdtHeader, TableKind, checksum};

/// Root System Description Table (RSDT)
///
/// Fixed-capacity array of 32-bit pointers to the other tables. The header length only covers
/// the entries in use; the array itself always occupies `MAX_ACPI_TABLES` slots.
/// More information about this table can be found in the ACPI specification:
/// https://uefi.org/specs/ACPI/6.5/05_ACPI_Software_Programming_Model.html#root-system-description-table-rsdt
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct Rsdt {
    header: SdtHeader,
    entries: [U32; MAX_ACPI_TABLES],
}

/// Extended System Description Table (XSDT)
///
/// This table provides 64bit addresses to the rest of the ACPI tables defined by the platform.
/// It is kept in sync with the RSDT: same tables, same indexes.
/// More information about this table can be found in the ACPI specification:
/// https://uefi.org/specs/ACPI/6.5/05_ACPI_Software_Programming_Model.html#extended-system-description-table-xsdt
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct Xsdt {
    header: SdtHeader,
    entries: [U64; MAX_ACPI_TABLES],
}

// Both tables are at most a few hundred bytes long.
#[allow(clippy::cast_possible_truncation)]
const fn root_len(entry_size: usize, count: usize) -> u32 {
    (SDT_HEADER_LEN + entry_size * count) as u32
}

impl Rsdt {
    /// An empty RSDT. Its length initially spans the whole entry array.
    pub fn new(oem_id: [u8; 6], oem_table_id: [u8; 8]) -> Self {
        let mut rsdt = Rsdt::new_zeroed();
        rsdt.header = SdtHeader::new(
            TableKind::Rsdt.signature(),
            root_len(size_of::<u32>(), MAX_ACPI_TABLES),
            TableKind::Rsdt.revision(),
        );
        rsdt.header.oem_id = oem_id;
        rsdt.header.oem_table_id = oem_table_id;
        rsdt.header.checksum = checksum(&[rsdt.as_bytes()]);
        rsdt
    }

    /// Addresses of the tables registered so far.
    pub fn entries(&self) -> Vec<u64> {
        let entries = self.entries;
        entries
            .iter()
            .map(|entry| u64::from(entry.get()))
            .take_while(|addr| *addr != 0)
            .collect()
    }

    pub fn header(&self) -> SdtHeader {
        self.header
    }
}

impl Xsdt {
    /// An empty XSDT. Its length initially spans the whole entry array.
    pub fn new(oem_id: [u8; 6], oem_table_id: [u8; 8]) -> Self {
        let mut xsdt = Xsdt::new_zeroed();
        xsdt.header = SdtHeader::new(
            TableKind::Xsdt.signature(),
            root_len(size_of::<u64>(), MAX_ACPI_TABLES),
            TableKind::Xsdt.revision(),
        );
        xsdt.header.oem_id = oem_id;
        xsdt.header.oem_table_id = oem_table_id;
        xsdt.header.checksum = checksum(&[xsdt.as_bytes()]);
        xsdt
    }

    /// Addresses of the tables registered so far.
    pub fn entries(&self) -> Vec<u64> {
        let entries = self.entries;
        entries
            .iter()
            .map(|entry| entry.get())
            .take_while(|addr| *addr != 0)
            .collect()
    }

    pub fn header(&self) -> SdtHeader {
        self.header
    }
}

impl Sdt for Rsdt {
    fn len(&self) -> usize {
        self.as_bytes().len()
    }

    fn write_to_guest<M: GuestMemory>(&mut self, mem: &M, address: GuestAddress) -> Result<()> {
        mem.write_slice(self.as_bytes(), address)?;
        Ok(())
    }
}

impl Sdt for Xsdt {
    fn len(&self) -> usize {
        self.as_bytes().len()
    }

    fn write_to_guest<M: GuestMemory>(&mut self, mem: &M, address: GuestAddress) -> Result<()> {
        mem.write_slice(self.as_bytes(), address)?;
        Ok(())
    }
}

/// Read a plain structure from guest memory.
pub(crate) fn read_obj<T, M>(mem: &M, address: GuestAddress) -> Result<T>
where
    T: FromBytes + IntoBytes,
    M: GuestMemory,
{
    let mut value = T::new_zeroed();
    mem.read_slice(value.as_mut_bytes(), address)?;
    Ok(value)
}

/// Register `table` in the RSDT and, if the RSDP references one, the XSDT.
///
/// The first free RSDT slot is used, and the same index is used in the XSDT so both stay in
/// sync. Lengths and checksums of both root tables are recomputed. When every slot is taken,
/// or the table lies above 4 GiB, an error is logged and the table is left out; `Ok(false)`
/// is returned in that case.
pub fn add_table<M: GuestMemory>(mem: &M, rsdp: &Rsdp, table: u64) -> Result<bool> {
    let rsdt_addr = GuestAddress(u64::from(rsdp.rsdt_addr()));
    let mut rsdt: Rsdt = read_obj(mem, rsdt_addr)?;

    let entries = rsdt.entries;
    let Some(index) = entries.iter().position(|entry| entry.get() == 0) else {
        error!("acpi: Error: Could not add ACPI table, too many tables.");
        return Ok(false);
    };

    // The RSDT only holds 32-bit pointers and both roots share their slot indices.
    let Ok(table32) = u32::try_from(table) else {
        error!("acpi: Error: Could not add ACPI table at {table:#x}, above 4 GiB.");
        return Ok(false);
    };
    let mut entries = rsdt.entries;
    entries[index] = U32::new(table32);
    rsdt.entries = entries;
    let length = root_len(size_of::<u32>(), index + 1);
    rsdt.header.length = U32::new(length);
    rsdt.header.checksum = 0;
    rsdt.header.checksum = checksum(&[&rsdt.as_bytes()[..utils::u64_to_usize(u64::from(length))]]);
    mem.write_slice(rsdt.as_bytes(), rsdt_addr)?;

    if let Some(xsdt_addr) = rsdp.xsdt_addr() {
        let xsdt_addr = GuestAddress(xsdt_addr);
        let mut xsdt: Xsdt = read_obj(mem, xsdt_addr)?;
        let mut entries = xsdt.entries;
        entries[index] = U64::new(table);
        xsdt.entries = entries;
        let xlength = root_len(size_of::<u64>(), index + 1);
        xsdt.header.length = U32::new(xlength);
        xsdt.header.checksum = 0;
        xsdt.header.checksum =
            checksum(&[&xsdt.as_bytes()[..utils::u64_to_usize(u64::from(xlength))]]);
        mem.write_slice(xsdt.as_bytes(), xsdt_addr)?;
    }

    debug!(
        "acpi: added table {}/{}, length now {}",
        index + 1,
        MAX_ACPI_TABLES,
        length
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use vm_memory::{GuestAddress, GuestMemoryMmap};

    use super::*;
    use crate::{ACPI_TABLE_CREATOR, OEM_ID};

    const RSDP: u64 = 0x0;
    const RSDT: u64 = 0x40;
    const XSDT: u64 = 0x100;

    fn sum(bytes: &[u8]) -> u8 {
        bytes.iter().fold(0u8, |acc, x| acc.wrapping_add(*x))
    }

    fn setup(with_xsdt: bool) -> (GuestMemoryMmap, Rsdp) {
        let mem = GuestMemoryMmap::<()>::from_ranges(&[(GuestAddress(0), 0x1000)]).unwrap();
        let mut rsdp = Rsdp::new(OEM_ID, 0x40, with_xsdt.then_some(XSDT));
        rsdp.write_to_guest(&mem, GuestAddress(RSDP)).unwrap();
        Rsdt::new(OEM_ID, ACPI_TABLE_CREATOR)
            .write_to_guest(&mem, GuestAddress(RSDT))
            .unwrap();
        if with_xsdt {
            Xsdt::new(OEM_ID, ACPI_TABLE_CREATOR)
                .write_to_guest(&mem, GuestAddress(XSDT))
                .unwrap();
        }
        (mem, rsdp)
    }

    fn check_closed<M: GuestMemory>(mem: &M, address: u64, length: u32) {
        let mut raw = vec![0u8; length as usize];
        mem.read_slice(&mut raw, GuestAddress(address)).unwrap();
        assert_eq!(sum(&raw), 0);
    }

    #[test]
    fn test_empty_roots() {
        let rsdt = Rsdt::new(OEM_ID, ACPI_TABLE_CREATOR);
        let xsdt = Xsdt::new(OEM_ID, ACPI_TABLE_CREATOR);
        assert_eq!(rsdt.len(), 36 + 4 * 32);
        assert_eq!(xsdt.len(), 36 + 8 * 32);
        assert_eq!(sum(rsdt.as_bytes()), 0);
        assert_eq!(sum(xsdt.as_bytes()), 0);
        assert!(rsdt.entries().is_empty());
    }

    #[test]
    fn test_add_table_keeps_roots_in_sync() {
        let (mem, rsdp) = setup(true);
        for table in [0x400u64, 0x500, 0x600] {
            assert!(add_table(&mem, &rsdp, table).unwrap());
        }

        let rsdt: Rsdt = read_obj(&mem, GuestAddress(RSDT)).unwrap();
        let xsdt: Xsdt = read_obj(&mem, GuestAddress(XSDT)).unwrap();
        assert_eq!(rsdt.entries(), vec![0x400, 0x500, 0x600]);
        assert_eq!(rsdt.entries(), xsdt.entries());
        assert_eq!(rsdt.header().length.get(), 36 + 4 * 3);
        assert_eq!(xsdt.header().length.get(), 36 + 8 * 3);
        check_closed(&mem, RSDT, rsdt.header().length.get());
        check_closed(&mem, XSDT, xsdt.header().length.get());
    }

    #[test]
    fn test_add_table_without_xsdt() {
        let (mem, rsdp) = setup(false);
        assert!(add_table(&mem, &rsdp, 0x800).unwrap());
        let rsdt: Rsdt = read_obj(&mem, GuestAddress(RSDT)).unwrap();
        assert_eq!(rsdt.entries(), vec![0x800]);
        check_closed(&mem, RSDT, 40);
    }

    #[test]
    fn test_add_table_overflow_drops_table() {
        let (mem, rsdp) = setup(true);
        for i in 0..MAX_ACPI_TABLES as u64 {
            assert!(add_table(&mem, &rsdp, 0x1000 + i * 0x10).unwrap());
        }
        assert!(!add_table(&mem, &rsdp, 0xdead0).unwrap());

        let rsdt: Rsdt = read_obj(&mem, GuestAddress(RSDT)).unwrap();
        let xsdt: Xsdt = read_obj(&mem, GuestAddress(XSDT)).unwrap();
        assert_eq!(rsdt.entries().len(), MAX_ACPI_TABLES);
        assert!(!xsdt.entries().contains(&0xdead0));
        check_closed(&mem, RSDT, rsdt.header().length.get());
    }

    #[test]
    fn test_add_table_drops_high_address() {
        let (mem, rsdp) = setup(true);
        assert!(add_table(&mem, &rsdp, 0x400).unwrap());
        assert!(!add_table(&mem, &rsdp, 0x1_0000_0000).unwrap());
        assert!(add_table(&mem, &rsdp, 0x500).unwrap());

        let rsdt: Rsdt = read_obj(&mem, GuestAddress(RSDT)).unwrap();
        let xsdt: Xsdt = read_obj(&mem, GuestAddress(XSDT)).unwrap();
        assert_eq!(rsdt.entries(), vec![0x400, 0x500]);
        assert_eq!(rsdt.entries(), xsdt.entries());
        check_closed(&mem, RSDT, rsdt.header().length.get());
        check_closed(&mem, XSDT, xsdt.header().length.get());
    }
}
