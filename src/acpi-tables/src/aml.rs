// Copyright © 2019 Intel Corporation
// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Minimal AML encoder for the objects generated at table build time.

#[derive(Debug, PartialEq, Eq, thiserror::Error, displaydoc::Display)]
pub enum AmlError {
    /// Aml Path is empty
    NameEmpty,
    /// Invalid name part length
    InvalidPartLength,
    /// Object of {0} bytes does not fit a package length
    PkgLengthOverflow(usize),
}

pub trait Aml {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError>;

    fn to_aml_bytes(&self) -> Result<Vec<u8>, AmlError> {
        let mut bytes = Vec::new();
        self.append_aml_bytes(&mut bytes)?;
        Ok(bytes)
    }
}

pub const ZERO: Zero = Zero {};
#[derive(Debug)]
pub struct Zero {}

impl Aml for Zero {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        bytes.push(0x00); /* ZeroOp */
        Ok(())
    }
}

const ONE: One = One {};
#[derive(Debug)]
struct One {}

impl Aml for One {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        bytes.push(0x01); /* OneOp */
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    root: bool,
    name_parts: Vec<[u8; 4]>,
}

impl Aml for Path {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        if self.root {
            bytes.push(b'\\');
        }

        match self.name_parts.len() {
            0 => return Err(AmlError::NameEmpty),
            1 => {}
            2 => {
                bytes.push(0x2e); /* DualNamePrefix */
            }
            n => {
                bytes.push(0x2f); /* MultiNamePrefix */
                bytes.push(u8::try_from(n).map_err(|_| AmlError::InvalidPartLength)?);
            }
        };

        for part in &self.name_parts {
            bytes.extend_from_slice(part);
        }
        Ok(())
    }
}

impl Path {
    pub fn new(name: &str) -> Result<Self, AmlError> {
        let (root, relative) = match name.strip_prefix('\\') {
            Some(relative) => (true, relative),
            None => (false, name),
        };
        if relative.is_empty() {
            return Err(AmlError::NameEmpty);
        }

        let mut name_parts = Vec::new();
        for part in relative.split('.') {
            let name_part: [u8; 4] = part
                .as_bytes()
                .try_into()
                .map_err(|_| AmlError::InvalidPartLength)?;
            name_parts.push(name_part);
        }

        Ok(Path { root, name_parts })
    }
}

impl TryFrom<&str> for Path {
    type Error = AmlError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Path::new(s)
    }
}

impl Aml for u8 {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        bytes.push(0x0a); /* BytePrefix */
        bytes.push(*self);
        Ok(())
    }
}

impl Aml for u16 {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        bytes.push(0x0b); /* WordPrefix */
        bytes.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl Aml for u32 {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        bytes.push(0x0c); /* DWordPrefix */
        bytes.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl Aml for u64 {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        bytes.push(0x0e); /* QWordPrefix */
        bytes.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

/// An integer encoded with the shortest opcode able to hold it.
impl Aml for usize {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        let value = utils::usize_to_u64(*self);
        if value == 0 {
            ZERO.append_aml_bytes(bytes)
        } else if value == 1 {
            ONE.append_aml_bytes(bytes)
        } else if let Ok(v) = u8::try_from(value) {
            v.append_aml_bytes(bytes)
        } else if let Ok(v) = u16::try_from(value) {
            v.append_aml_bytes(bytes)
        } else if let Ok(v) = u32::try_from(value) {
            v.append_aml_bytes(bytes)
        } else {
            value.append_aml_bytes(bytes)
        }
    }
}

fn append_aml_string(v: &str, bytes: &mut Vec<u8>) {
    bytes.push(0x0d); /* StringPrefix */
    bytes.extend_from_slice(v.as_bytes());
    bytes.push(0x0); /* NullChar */
}

impl Aml for &str {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        append_aml_string(self, bytes);
        Ok(())
    }
}

/*

From the ACPI spec for PkgLength:

"The high 2 bits of the first byte reveal how many follow bytes are in the PkgLength. If the
PkgLength has only one byte, bit 0 through 5 are used to encode the package length (in other
words, values 0-63). If the package length value is more than 63, more than one byte must be
used for the encoding in which case bit 4 and 5 of the PkgLeadByte are reserved and must be zero.
If the multiple bytes encoding is used, bits 0-3 of the PkgLeadByte become the least significant 4
bits of the resulting package length value. The next ByteData will become the next least
significant 8 bits of the resulting value and so on, up to 3 ByteData bytes. Thus, the maximum
package length is 2**28."

*/

// Every shift below keeps the value within a byte after masking.
#[allow(clippy::cast_possible_truncation)]
fn create_pkg_length(data_len: usize) -> Result<Vec<u8>, AmlError> {
    // PkgLength is inclusive and includes the length bytes
    let length_length = if data_len < (1 << 6) - 1 {
        1
    } else if data_len < (1 << 12) - 2 {
        2
    } else if data_len < (1 << 20) - 3 {
        3
    } else if data_len < (1 << 28) - 4 {
        4
    } else {
        return Err(AmlError::PkgLengthOverflow(data_len));
    };

    let length = data_len + length_length;
    let mut result = Vec::with_capacity(length_length);
    if length_length == 1 {
        result.push(length as u8);
    } else {
        result.push((((length_length - 1) as u8) << 6) | (length & 0xf) as u8);
        for i in 0..length_length - 1 {
            result.push((length >> (4 + 8 * i)) as u8);
        }
    }
    Ok(result)
}

/// Emit `opcode`, the package length of `body`, then `body`.
fn append_package(opcode: &[u8], body: &[u8], bytes: &mut Vec<u8>) -> Result<(), AmlError> {
    bytes.extend_from_slice(opcode);
    bytes.extend(create_pkg_length(body.len())?);
    bytes.extend_from_slice(body);
    Ok(())
}

fn append_children(children: &[&dyn Aml], bytes: &mut Vec<u8>) -> Result<(), AmlError> {
    for child in children {
        child.append_aml_bytes(bytes)?;
    }
    Ok(())
}

#[derive(Debug)]
pub struct Name {
    bytes: Vec<u8>,
}

impl Aml for Name {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        bytes.extend_from_slice(&self.bytes);
        Ok(())
    }
}

impl Name {
    pub fn new(path: Path, inner: &dyn Aml) -> Result<Self, AmlError> {
        let mut bytes = vec![0x08]; /* NameOp */
        path.append_aml_bytes(&mut bytes)?;
        inner.append_aml_bytes(&mut bytes)?;
        Ok(Name { bytes })
    }
}

pub struct ResourceTemplate<'a> {
    children: Vec<&'a dyn Aml>,
}

impl Aml for ResourceTemplate<'_> {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        let mut data = Vec::new();
        append_children(&self.children, &mut data)?;
        // Mark with end and mark checksum as as always valid
        data.push(0x79); /* EndTag */
        data.push(0); /* zero checksum byte */

        // Buffer length is an encoded integer including buffer data
        // and EndTag and checksum byte
        let mut body = data.len().to_aml_bytes()?;
        body.extend(data);
        append_package(&[0x11], &body, bytes) /* BufferOp */
    }
}

impl<'a> ResourceTemplate<'a> {
    pub fn new(children: Vec<&'a dyn Aml>) -> Self {
        ResourceTemplate { children }
    }
}

#[derive(Debug)]
pub struct Memory32Fixed {
    read_write: bool, /* true for read & write, false for read only */
    base: u32,
    length: u32,
}

impl Memory32Fixed {
    pub fn new(read_write: bool, base: u32, length: u32) -> Self {
        Memory32Fixed {
            read_write,
            base,
            length,
        }
    }
}

impl Aml for Memory32Fixed {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        bytes.push(0x86); /* Memory32Fixed */
        bytes.extend_from_slice(&9u16.to_le_bytes());

        // 9 bytes of payload
        bytes.push(u8::from(self.read_write));
        bytes.extend_from_slice(&self.base.to_le_bytes());
        bytes.extend_from_slice(&self.length.to_le_bytes());
        Ok(())
    }
}

pub struct Device<'a> {
    path: Path,
    children: Vec<&'a dyn Aml>,
}

impl Aml for Device<'_> {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        let mut body = Vec::new();
        self.path.append_aml_bytes(&mut body)?;
        append_children(&self.children, &mut body)?;
        append_package(&[0x5b, 0x82], &body, bytes) /* ExtOpPrefix DeviceOp */
    }
}

impl<'a> Device<'a> {
    pub fn new(path: Path, children: Vec<&'a dyn Aml>) -> Self {
        Device { path, children }
    }
}

pub struct Method<'a> {
    path: Path,
    children: Vec<&'a dyn Aml>,
    args: u8,
    serialized: bool,
}

impl<'a> Method<'a> {
    pub fn new(path: Path, args: u8, serialized: bool, children: Vec<&'a dyn Aml>) -> Self {
        Method {
            path,
            children,
            args,
            serialized,
        }
    }
}

impl Aml for Method<'_> {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        let mut body = Vec::new();
        self.path.append_aml_bytes(&mut body)?;
        body.push((self.args & 0x7) | (u8::from(self.serialized) << 3));
        append_children(&self.children, &mut body)?;
        append_package(&[0x14], &body, bytes) /* MethodOp */
    }
}

pub struct Return<'a> {
    value: &'a dyn Aml,
}

impl<'a> Return<'a> {
    pub fn new(value: &'a dyn Aml) -> Self {
        Return { value }
    }
}

impl Aml for Return<'_> {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        bytes.push(0xa4); /* ReturnOp */
        self.value.append_aml_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path() {
        assert_eq!(
            Path::new("_SB_").unwrap().to_aml_bytes().unwrap(),
            [0x5F, 0x53, 0x42, 0x5F]
        );
        assert_eq!(
            Path::new("\\_SB_").unwrap().to_aml_bytes().unwrap(),
            [0x5C, 0x5F, 0x53, 0x42, 0x5F]
        );
        assert_eq!(
            Path::new("_SB_.COM1").unwrap().to_aml_bytes().unwrap(),
            [0x2E, 0x5F, 0x53, 0x42, 0x5F, 0x43, 0x4F, 0x4D, 0x31]
        );
        assert_eq!(
            Path::new("_SB_.PCI0._HID").unwrap().to_aml_bytes().unwrap(),
            [
                0x2F, 0x03, 0x5F, 0x53, 0x42, 0x5F, 0x50, 0x43, 0x49, 0x30, 0x5F, 0x48, 0x49, 0x44
            ]
        );
        assert_eq!(Path::new("_SB"), Err(AmlError::InvalidPartLength));
        assert_eq!(Path::new("\\"), Err(AmlError::NameEmpty));
    }

    #[test]
    fn test_integers() {
        assert_eq!(0usize.to_aml_bytes().unwrap(), [0x00]);
        assert_eq!(1usize.to_aml_bytes().unwrap(), [0x01]);
        assert_eq!(0x0busize.to_aml_bytes().unwrap(), [0x0a, 0x0b]);
        assert_eq!(0x1234usize.to_aml_bytes().unwrap(), [0x0b, 0x34, 0x12]);
        assert_eq!(
            0x1234_5678usize.to_aml_bytes().unwrap(),
            [0x0c, 0x78, 0x56, 0x34, 0x12]
        );
        assert_eq!(
            0x1_0000_0000usize.to_aml_bytes().unwrap(),
            [0x0e, 0, 0, 0, 0, 1, 0, 0, 0]
        );
    }

    #[test]
    fn test_pkg_length() {
        assert_eq!(create_pkg_length(62).unwrap(), [63]);
        assert_eq!(create_pkg_length(63).unwrap(), [(1 << 6) | (65 & 0xf), 65 >> 4]);
        assert_eq!(
            create_pkg_length(4094).unwrap(),
            [((2 << 6) | (4097u32 & 0xf)) as u8, (4097u32 >> 4) as u8, (4097u32 >> 12) as u8]
        );
    }

    #[test]
    fn test_resource_template() {
        // Name (_CRS, ResourceTemplate () { Memory32Fixed (ReadOnly, 0xE8000000, 0x10000) })
        let crs = Name::new(
            "_CRS".try_into().unwrap(),
            &ResourceTemplate::new(vec![&Memory32Fixed::new(false, 0xE800_0000, 0x10000)]),
        )
        .unwrap();
        assert_eq!(
            crs.to_aml_bytes().unwrap(),
            [
                0x08, 0x5F, 0x43, 0x52, 0x53, 0x11, 0x11, 0x0A, 0x0E, 0x86, 0x09, 0x00, 0x00,
                0x00, 0x00, 0x00, 0xE8, 0x00, 0x00, 0x01, 0x00, 0x79, 0x00
            ]
        );
    }

    #[test]
    fn test_device_and_method() {
        // Device (CTBL) { Method (_STA, 0, NotSerialized) { Return (0x0B) } }
        let ret = Return::new(&0x0bu8);
        let method = Method::new("_STA".try_into().unwrap(), 0, false, vec![&ret]);
        let device = Device::new("CTBL".try_into().unwrap(), vec![&method]);
        assert_eq!(
            device.to_aml_bytes().unwrap(),
            [
                0x5B, 0x82, 0x0F, 0x43, 0x54, 0x42, 0x4C, 0x14, 0x09, 0x5F, 0x53, 0x54, 0x41,
                0x00, 0xA4, 0x0A, 0x0B
            ]
        );
    }
}
