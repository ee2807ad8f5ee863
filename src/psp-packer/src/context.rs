// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The flash image under construction and its write cursor.

use std::path::Path;

use log::debug;
use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::{PackError, Result, read_file};

/// How the PSP interprets an address stored in a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum AddressMode {
    /// x86 physical address of the flash mapping below 4 GiB.
    #[default]
    Physical = 0,
    /// Offset from the start of the flash.
    RelativeToBios = 1,
    /// Offset from the start of the enclosing directory.
    RelativeToTable = 2,
    /// Offset from the start of the A/B slot.
    RelativeToSlot = 3,
}

/// Byte offset into the flash image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Offset(u32);

impl Offset {
    pub const ZERO: Offset = Offset(0);

    pub const fn new(offset: u32) -> Self {
        Offset(offset)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        utils::u64_to_usize(u64::from(self.0))
    }

    /// The offset `bytes` further, if it is representable.
    pub fn checked_add(self, bytes: u32) -> Option<Offset> {
        self.0.checked_add(bytes).map(Offset)
    }
}

impl std::fmt::LowerHex for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

/// State of one packing run: the `0xFF`-filled image, the write cursor, the start of the table
/// being filled and the address mode used for run-time addresses.
///
/// The cursor only moves through [`BuildContext::set_current`] and
/// [`BuildContext::adjust_current`], which refuse to move it past the end of the image.
#[derive(Debug)]
pub struct BuildContext {
    rom: Vec<u8>,
    current: u32,
    current_table: u32,
    address_mode: AddressMode,
}

impl BuildContext {
    pub fn new(rom_size: u32) -> Result<Self> {
        if rom_size == 0 {
            return Err(PackError::RomSize(0));
        }
        Ok(BuildContext {
            rom: vec![0xFF; utils::u64_to_usize(u64::from(rom_size))],
            current: 0,
            current_table: 0,
            address_mode: AddressMode::Physical,
        })
    }

    pub fn rom_size(&self) -> u32 {
        // The buffer was sized from a u32.
        #[allow(clippy::cast_possible_truncation)]
        let size = self.rom.len() as u32;
        size
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    pub fn into_rom(self) -> Vec<u8> {
        self.rom
    }

    pub fn current(&self) -> Offset {
        Offset(self.current)
    }

    /// Bytes left between the cursor and the end of the image.
    pub fn room(&self) -> u32 {
        self.rom_size() - self.current
    }

    /// Move the cursor to `value`. Moving past the end of the image is fatal.
    pub fn set_current(&mut self, value: u64) -> Result<()> {
        match u32::try_from(value) {
            Ok(value) if value <= self.rom_size() => {
                self.current = value;
                Ok(())
            }
            _ => Err(PackError::Overflow(value, self.rom_size())),
        }
    }

    /// Advance the cursor by `add` bytes, then up to the next multiple of `align`.
    pub fn adjust_current(&mut self, add: u32, align: u32) -> Result<()> {
        let target = u64::from(self.current) + u64::from(add);
        self.set_current(utils::align_up(target, u64::from(align)))
    }

    pub fn address_mode(&self) -> AddressMode {
        self.address_mode
    }

    pub fn set_address_mode(&mut self, mode: AddressMode) {
        self.address_mode = mode;
    }

    /// Start of the directory relative-to-table addresses are computed from.
    pub fn current_table(&self) -> Offset {
        Offset(self.current_table)
    }

    /// Run `f` with `table` as the current table, restoring the previous one afterwards.
    pub fn with_table<T>(
        &mut self,
        table: Offset,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let saved = self.current_table;
        self.current_table = table.0;
        let result = f(self);
        self.current_table = saved;
        result
    }

    /// Address of image offset `offset` as seen by the PSP in `mode`.
    pub fn run_offset(&self, offset: u64, mode: AddressMode) -> u64 {
        match mode {
            AddressMode::Physical => {
                u64::from(u32::MAX - self.rom_size() + 1).wrapping_add(offset)
            }
            AddressMode::RelativeToBios | AddressMode::RelativeToSlot => offset,
            AddressMode::RelativeToTable => offset.wrapping_sub(u64::from(self.current_table)),
        }
    }

    /// Address of `offset` in the context's own mode.
    pub fn run_address(&self, offset: Offset) -> u64 {
        self.run_offset(u64::from(offset.0), self.address_mode)
    }

    /// Address of `offset` in `requested` mode, clamped so it is never more relative than the
    /// context's mode.
    pub fn run_address_mode(&self, offset: Offset, requested: AddressMode) -> u64 {
        self.run_offset(u64::from(offset.0), self.address_mode.min(requested))
    }

    pub fn run_current(&self) -> u64 {
        self.run_address(self.current())
    }

    fn range(&self, offset: Offset, len: usize) -> Result<std::ops::Range<usize>> {
        let start = offset.index();
        match start.checked_add(len) {
            Some(end) if end <= self.rom.len() => Ok(start..end),
            _ => Err(PackError::Overflow(
                u64::from(offset.0) + utils::usize_to_u64(len),
                self.rom_size(),
            )),
        }
    }

    pub fn bytes(&self, offset: Offset, len: usize) -> Result<&[u8]> {
        let range = self.range(offset, len)?;
        Ok(&self.rom[range])
    }

    pub fn write_bytes(&mut self, offset: Offset, data: &[u8]) -> Result<()> {
        let range = self.range(offset, data.len())?;
        self.rom[range].copy_from_slice(data);
        Ok(())
    }

    pub fn fill(&mut self, offset: Offset, len: u32, byte: u8) -> Result<()> {
        let range = self.range(offset, utils::u64_to_usize(u64::from(len)))?;
        self.rom[range].fill(byte);
        Ok(())
    }

    pub fn read_obj<T: FromBytes>(&self, offset: Offset) -> Result<T> {
        let bytes = self.bytes(offset, std::mem::size_of::<T>())?;
        T::read_from_bytes(bytes)
            .map_err(|_| PackError::Overflow(u64::from(offset.0), self.rom_size()))
    }

    pub fn write_obj<T: IntoBytes + Immutable>(&mut self, offset: Offset, value: &T) -> Result<()> {
        self.write_bytes(offset, value.as_bytes())
    }

    /// Copy the file at `path` to the cursor without moving it. Returns the file size.
    pub fn copy_blob(&mut self, path: &Path) -> Result<u32> {
        let data = read_file(path)?;
        let len = utils::usize_to_u64(data.len());
        if len > u64::from(self.room()) {
            return Err(PackError::BlobTooLarge(
                path.display().to_string(),
                len,
                u64::from(self.room()),
            ));
        }
        debug!("Copying {} ({len:#x} bytes) to {:#x}", path.display(), self.current);
        self.write_bytes(self.current(), &data)?;
        // Bounded by the room left in the image.
        #[allow(clippy::cast_possible_truncation)]
        let len = len as u32;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use proptest::prelude::*;
    use utils::tempfile::TempFile;

    use super::*;

    #[test]
    fn test_new_image_is_erased() {
        let ctx = BuildContext::new(0x1000).unwrap();
        assert_eq!(ctx.rom_size(), 0x1000);
        assert!(ctx.rom().iter().all(|b| *b == 0xFF));
        assert_eq!(ctx.current(), Offset::ZERO);
        assert!(matches!(BuildContext::new(0), Err(PackError::RomSize(0))));
    }

    #[test]
    fn test_cursor_bounds() {
        let mut ctx = BuildContext::new(0x10000).unwrap();
        ctx.set_current(0x10000).unwrap();
        assert_eq!(ctx.room(), 0);
        let err = ctx.set_current(0x10001).unwrap_err();
        assert!(matches!(err, PackError::Overflow(0x10001, 0x10000)), "{err}");
        // A failed move leaves the cursor alone.
        assert_eq!(ctx.current().get(), 0x10000);

        ctx.set_current(0x20).unwrap();
        ctx.adjust_current(0x10, 0x100).unwrap();
        assert_eq!(ctx.current().get(), 0x100);
        ctx.adjust_current(0, 0x100).unwrap();
        assert_eq!(ctx.current().get(), 0x100);
        ctx.adjust_current(1, 1).unwrap();
        assert_eq!(ctx.current().get(), 0x101);
        assert!(ctx.adjust_current(0, 0x20000).is_err());
    }

    #[test]
    fn test_run_addresses() {
        let mut ctx = BuildContext::new(0x100_0000).unwrap();
        let offset = Offset::new(0x2_0000);
        assert_eq!(ctx.run_address(offset), 0xFF02_0000);

        ctx.set_address_mode(AddressMode::RelativeToBios);
        assert_eq!(ctx.run_address(offset), 0x2_0000);

        ctx.set_address_mode(AddressMode::RelativeToTable);
        let rel = ctx
            .with_table(Offset::new(0x1_0000), |ctx| Ok(ctx.run_address(offset)))
            .unwrap();
        assert_eq!(rel, 0x1_0000);
        assert_eq!(ctx.current_table(), Offset::ZERO);

        // A requested mode never ends up more relative than the context's.
        ctx.set_address_mode(AddressMode::RelativeToBios);
        assert_eq!(
            ctx.run_address_mode(offset, AddressMode::RelativeToTable),
            0x2_0000
        );
        ctx.set_address_mode(AddressMode::Physical);
        assert_eq!(
            ctx.run_address_mode(offset, AddressMode::RelativeToBios),
            0xFF02_0000
        );
    }

    #[test]
    fn test_with_table_restores_on_error() {
        let mut ctx = BuildContext::new(0x1000).unwrap();
        let result: Result<()> = ctx.with_table(Offset::new(0x800), |ctx| {
            assert_eq!(ctx.current_table().get(), 0x800);
            ctx.set_current(0x2000)
        });
        assert!(result.is_err());
        assert_eq!(ctx.current_table(), Offset::ZERO);
    }

    #[test]
    fn test_copy_blob() {
        let mut ctx = BuildContext::new(0x200).unwrap();
        let blob = TempFile::new().unwrap();
        blob.as_file().write_all(&[1, 2, 3]).unwrap();

        ctx.set_current(0x100).unwrap();
        assert_eq!(ctx.copy_blob(blob.as_path()).unwrap(), 3);
        assert_eq!(ctx.current().get(), 0x100);
        assert_eq!(ctx.bytes(Offset::new(0xff), 5).unwrap(), &[0xFF, 1, 2, 3, 0xFF]);

        ctx.set_current(0x1fe).unwrap();
        let err = ctx.copy_blob(blob.as_path()).unwrap_err();
        assert!(matches!(err, PackError::BlobTooLarge(_, 3, 2)), "{err}");

        let err = ctx.copy_blob(Path::new("/nonexistent/blob.bin")).unwrap_err();
        assert!(matches!(err, PackError::Io(..)), "{err}");
    }

    #[test]
    fn test_object_access() {
        let mut ctx = BuildContext::new(0x20).unwrap();
        ctx.write_obj(Offset::new(0x10), &0x1234_5678u32).unwrap();
        assert_eq!(ctx.read_obj::<u32>(Offset::new(0x10)).unwrap(), 0x1234_5678);
        assert!(ctx.write_obj(Offset::new(0x1e), &0u32).is_err());
        ctx.fill(Offset::new(0x10), 2, 0).unwrap();
        assert_eq!(ctx.bytes(Offset::new(0x10), 4).unwrap(), &[0, 0, 0x34, 0x12]);
    }

    #[test]
    fn test_cursor_never_exceeds_image() {
        let cfg = ProptestConfig::with_cases(256);
        proptest!(cfg, |(steps in proptest::collection::vec((0u32..0x3000, 0u32..14), 1..32))| {
            let mut ctx = BuildContext::new(0x10000).unwrap();
            for (add, align_shift) in steps {
                let before = ctx.current().get();
                let align = 1u32 << align_shift;
                match ctx.adjust_current(add, align) {
                    Ok(()) => {
                        let now = ctx.current().get();
                        prop_assert!(now >= before);
                        prop_assert!(now <= ctx.rom_size());
                        prop_assert_eq!(now % align, 0);
                    }
                    Err(err) => {
                        prop_assert!(matches!(err, PackError::Overflow(..)));
                        prop_assert_eq!(ctx.current().get(), before);
                    }
                }
            }
        });
    }
}
