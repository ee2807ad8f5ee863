// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use vm_memory::{Bytes, GuestAddress, GuestMemory};
use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::{Result, SDT_HEADER_LEN, Sdt, SdtHeader, checksum, table_len};

const LENGTH_OFFSET: usize = 4;
const CHECKSUM_OFFSET: usize = 9;

/// Byte image of a System Descriptor Table under construction.
///
/// The buffer starts zeroed with at least room for the header. Records are appended at the end
/// of the buffer, and the header's length and checksum are fixed up once the body is complete.
/// The header length is authoritative: only `length` bytes are checksummed and written out, so a
/// table whose length is left below its minimum size is treated as absent by the builder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SdtBuffer {
    bytes: Vec<u8>,
}

impl SdtBuffer {
    /// Create a zeroed table of `min_size` bytes (never less than a header).
    pub fn new(min_size: usize) -> Self {
        SdtBuffer {
            bytes: vec![0; min_size.max(SDT_HEADER_LEN)],
        }
    }

    /// Create a table from an existing image, e.g. one read from a file.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut table = Self::new(data.len());
        table.bytes[..data.len()].copy_from_slice(data);
        table
    }

    /// Copy of the table header.
    pub fn header(&self) -> SdtHeader {
        self.read_at(0).unwrap_or_default()
    }

    /// Overwrite the table header.
    pub fn set_header(&mut self, header: &SdtHeader) {
        self.write_at(0, header);
    }

    pub fn signature(&self) -> [u8; 4] {
        self.header().signature
    }

    /// Value of the header length field.
    pub fn length(&self) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bytes[LENGTH_OFFSET..LENGTH_OFFSET + 4]);
        u32::from_le_bytes(raw)
    }

    pub fn set_length(&mut self, length: u32) {
        self.bytes[LENGTH_OFFSET..LENGTH_OFFSET + 4].copy_from_slice(&length.to_le_bytes());
    }

    /// Grow with zeroes or cut the buffer to `len` bytes, never below a header.
    pub fn resize(&mut self, len: usize) {
        self.bytes.resize(len.max(SDT_HEADER_LEN), 0);
    }

    /// Offset at which the next record will be appended.
    pub fn current(&self) -> usize {
        self.bytes.len()
    }

    /// Append a record and return the offset it was placed at.
    pub fn append<T: IntoBytes + Immutable>(&mut self, record: &T) -> usize {
        self.append_bytes(record.as_bytes())
    }

    /// Append raw bytes and return the offset they were placed at.
    pub fn append_bytes(&mut self, data: &[u8]) -> usize {
        let offset = self.bytes.len();
        self.bytes.extend_from_slice(data);
        offset
    }

    /// Write `value` at `offset`, growing the buffer with zeroes if needed.
    pub fn write_at<T: IntoBytes + Immutable>(&mut self, offset: usize, value: &T) {
        let data = value.as_bytes();
        let end = offset + data.len();
        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
        }
        self.bytes[offset..end].copy_from_slice(data);
    }

    /// Read a `T` stored at `offset`, if the buffer is large enough.
    pub fn read_at<T: FromBytes>(&self, offset: usize) -> Option<T> {
        let data = self.bytes.get(offset..)?;
        T::read_from_prefix(data).ok().map(|(value, _)| value)
    }

    /// Set the header length to everything appended so far.
    pub fn fix_length(&mut self) -> Result<()> {
        let length = table_len(self.bytes.len())?;
        self.set_length(length);
        Ok(())
    }

    /// Recompute the header checksum over the first `length` bytes.
    pub fn update_checksum(&mut self) {
        self.bytes[CHECKSUM_OFFSET] = 0;
        let sum = checksum(&[self.as_slice()]);
        self.bytes[CHECKSUM_OFFSET] = sum;
    }

    /// The table image as described by its header length.
    pub fn as_slice(&self) -> &[u8] {
        let length = utils::u64_to_usize(u64::from(self.length()));
        &self.bytes[..length.min(self.bytes.len())]
    }
}

impl Sdt for SdtBuffer {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn write_to_guest<M: GuestMemory>(&mut self, mem: &M, address: GuestAddress) -> Result<()> {
        mem.write_slice(self.as_slice(), address)?;
        Ok(())
    }
}
