// Copyright © 2019 Intel Corporation
// Copyright © 2023 Rivos, Inc.
// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
//
// SPDX-License-Identifier: Apache-2.0

use log::debug;
use vm_memory::{Bytes, GuestAddress, GuestMemory};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{Result, Sdt, checksum};

/// Signature of the RSDP. Space in the end of string is needed!
pub const RSDP_SIGNATURE: [u8; 8] = *b"RSD PTR ";
/// RSDP revision used when an XSDT is present (ACPI 2.0 and later).
pub const RSDP_REVISION: u8 = 2;
/// Number of bytes covered by the ACPI 1.0 checksum.
const RSDP_V1_LEN: usize = 20;
const RSDP_LEN: u32 = 36;

// clippy doesn't understand that we actually "use" the fields of this struct when we serialize
// them as bytes in guest memory, so here we just ignore dead code to avoid having to name
// everything with an underscore prefix
#[allow(dead_code)]
/// Root System Description Pointer
///
/// This is the root pointer to the ACPI hierarchy. This is what OSs
/// are looking for in the memory when initializing ACPI. It includes
/// a pointer to the RSDT and, from revision 2 on, to the XSDT.
/// More information about this structure can be found in the ACPI specification:
/// https://uefi.org/specs/ACPI/6.5/05_ACPI_Software_Programming_Model.html#root-system-description-pointer-rsdp
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable)]
pub struct Rsdp {
    signature: [u8; 8],
    checksum: u8,
    oem_id: [u8; 6],
    revision: u8,
    rsdt_addr: U32,
    length: U32,
    xsdt_addr: U64,
    extended_checksum: u8,
    reserved: [u8; 3],
}

impl Rsdp {
    /// Build an RSDP pointing at `rsdt_addr`, and at `xsdt_addr` if there is an XSDT.
    ///
    /// Without an XSDT the pointer is emitted as an ACPI 1.0 (revision 0) structure, since some
    /// OSes expect an XSDT whenever the revision is 2 or above.
    pub fn new(oem_id: [u8; 6], rsdt_addr: u32, xsdt_addr: Option<u64>) -> Self {
        let mut rsdp = Rsdp {
            signature: RSDP_SIGNATURE,
            checksum: 0,
            oem_id,
            revision: 0,
            rsdt_addr: U32::new(rsdt_addr),
            length: U32::new(RSDP_LEN),
            xsdt_addr: U64::ZERO,
            extended_checksum: 0,
            reserved: [0u8; 3],
        };
        if let Some(xsdt_addr) = xsdt_addr {
            rsdp.xsdt_addr = U64::new(xsdt_addr);
            rsdp.revision = RSDP_REVISION;
        }

        rsdp.checksum = checksum(&[&rsdp.as_bytes()[..RSDP_V1_LEN]]);
        rsdp.extended_checksum = checksum(&[rsdp.as_bytes()]);
        rsdp
    }

    pub fn revision(&self) -> u8 {
        self.revision
    }

    pub fn oem_id(&self) -> [u8; 6] {
        self.oem_id
    }

    pub fn rsdt_addr(&self) -> u32 {
        self.rsdt_addr.get()
    }

    /// Address of the XSDT, if there is one.
    pub fn xsdt_addr(&self) -> Option<u64> {
        match self.xsdt_addr.get() {
            0 => None,
            addr => Some(addr),
        }
    }

    /// Check signature and checksums.
    ///
    /// The extended checksum, over `length` bytes, is only checked for revisions above 1.
    pub fn is_valid(&self) -> bool {
        if self.signature != RSDP_SIGNATURE {
            return false;
        }
        if checksum(&[&self.as_bytes()[..RSDP_V1_LEN]]) != 0 {
            return false;
        }
        if self.revision > 1 {
            let length = utils::u64_to_usize(u64::from(self.length.get()));
            let bytes = self.as_bytes();
            if length > bytes.len() || checksum(&[&bytes[..length]]) != 0 {
                return false;
            }
        }
        true
    }
}

impl Sdt for Rsdp {
    fn len(&self) -> usize {
        self.as_bytes().len()
    }

    fn write_to_guest<M: GuestMemory>(&mut self, mem: &M, address: GuestAddress) -> Result<()> {
        mem.write_slice(self.as_bytes(), address)?;
        Ok(())
    }
}

/// Read the RSDP at `address` and return it if it is valid.
pub fn valid_rsdp<M: GuestMemory>(mem: &M, address: GuestAddress) -> Option<Rsdp> {
    let mut raw = [0u8; std::mem::size_of::<Rsdp>()];
    mem.read_slice(&mut raw, address).ok()?;
    let rsdp = Rsdp::read_from_bytes(&raw).ok()?;
    if rsdp.signature != RSDP_SIGNATURE {
        return None;
    }
    debug!("acpi: Looking on {:#x} for valid checksum", address.0);
    rsdp.is_valid().then_some(rsdp)
}

#[cfg(test)]
mod tests {
    use vm_memory::{GuestAddress, GuestMemoryMmap};

    use super::*;

    fn sum(bytes: &[u8]) -> u8 {
        bytes.iter().fold(0u8, |acc, x| acc.wrapping_add(*x))
    }

    #[test]
    fn test_rsdp_checksums() {
        let rsdp = Rsdp::new(*b"COREv4", 0x1000, Some(0x2000));
        assert_eq!(rsdp.len(), 36);
        assert_eq!(std::mem::size_of::<Rsdp>(), RSDP_LEN as usize);
        assert_eq!(rsdp.revision(), 2);
        assert_eq!(sum(&rsdp.as_bytes()[..20]), 0);
        assert_eq!(sum(rsdp.as_bytes()), 0);
        assert!(rsdp.is_valid());
    }

    #[test]
    fn test_rsdp_without_xsdt() {
        let rsdp = Rsdp::new(*b"COREv4", 0x1000, None);
        assert_eq!(rsdp.revision(), 0);
        assert_eq!(rsdp.xsdt_addr(), None);
        assert_eq!(rsdp.rsdt_addr(), 0x1000);
        assert!(rsdp.is_valid());
    }

    #[test]
    fn test_valid_rsdp_in_memory() {
        let mem = GuestMemoryMmap::<()>::from_ranges(&[(GuestAddress(0), 0x1000)]).unwrap();
        let mut rsdp = Rsdp::new(*b"COREv4", 0x100, Some(0x200));
        rsdp.write_to_guest(&mem, GuestAddress(0x40)).unwrap();
        assert!(valid_rsdp(&mem, GuestAddress(0x40)).is_some());
        assert!(valid_rsdp(&mem, GuestAddress(0x50)).is_none());

        // Corrupt a byte covered only by the extended checksum.
        mem.write_slice(&[0xaa], GuestAddress(0x40 + 30)).unwrap();
        assert!(valid_rsdp(&mem, GuestAddress(0x40)).is_none());
    }
}
