// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Separately signed PSP firmware.
//!
//! Blobs marked as signed are collected into their own file, which is flashed at a fixed
//! offset. The PSP directories then reference that copy instead of embedding the blob.

use std::path::PathBuf;

use log::{debug, info};
use zerocopy::FromBytes;

use crate::catalog::Firmwares;
use crate::layout::{AMD_FW_HEADER_LEN, AmdFwHeader};
use crate::{BLOB_ALIGNMENT, PackError, Result, read_file, to_u32, write_file};

/// Where the signed firmware goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedOutput {
    pub path: PathBuf,
    /// Flash offset the signed output is placed at.
    pub start_addr: u64,
}

/// Whether `blob` starts with a firmware header announcing a signature.
fn is_signed(blob: &[u8]) -> bool {
    blob.get(..AMD_FW_HEADER_LEN)
        .and_then(|header| AmdFwHeader::read_from_bytes(header).ok())
        .is_some_and(|header| header.sig_opt.get() == 1)
}

/// Copy every signed PSP blob to `output` and record where each one landed. Returns the
/// number of blobs written.
pub fn process_signed_psp_firmwares(
    output: &SignedOutput,
    firmwares: &mut Firmwares,
) -> Result<usize> {
    let mut image = Vec::new();
    let mut count = 0;

    for fw in firmwares
        .psp
        .iter_mut()
        .filter(|fw| fw.signed && !fw.desc.skip_hashing)
    {
        let Some(filename) = &fw.filename else {
            continue;
        };
        let blob = read_file(filename)?;
        if !is_signed(&blob) {
            return Err(PackError::UnsignedBlob(filename.display().to_string()));
        }

        let offset = utils::align_up(utils::usize_to_u64(image.len()), u64::from(BLOB_ALIGNMENT));
        image.resize(utils::u64_to_usize(offset), 0xFF);
        image.extend_from_slice(&blob);

        let addr = output.start_addr + offset;
        let len = to_u32(utils::usize_to_u64(blob.len()))?;
        debug!(
            "Signed {} ({len:#x} bytes) at {addr:#x}",
            filename.display()
        );
        fw.addr_signed = Some(addr);
        fw.file_size = len;
        count += 1;
    }

    write_file(&output.path, &image)?;
    info!(
        "Wrote {count} signed PSP blobs to {}",
        output.path.display()
    );
    Ok(count)
}
