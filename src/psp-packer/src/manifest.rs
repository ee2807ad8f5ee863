// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Version manifest of the packed PSP firmware.

use std::fmt::Write as _;
use std::io::Read;
use std::path::Path;

use log::warn;
use zerocopy::FromBytes;

use crate::catalog::PspFirmware;
use crate::layout::{AMD_FW_HEADER_LEN, AmdFwHeader};
use crate::{Result, write_file};

/// Read the firmware header at the start of `path`.
fn read_header(path: &Path) -> std::io::Result<AmdFwHeader> {
    let mut buf = [0u8; AMD_FW_HEADER_LEN];
    std::fs::File::open(path)?.read_exact(&mut buf)?;
    AmdFwHeader::read_from_bytes(&buf)
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidData))
}

/// One `type: 0x.. ver:..` line per manifest entry with a file. Blobs whose header cannot
/// be read are left out.
pub fn render(firmwares: &[PspFirmware]) -> String {
    let mut manifest = String::new();
    for fw in firmwares.iter().filter(|fw| fw.desc.generate_manifest) {
        let Some(filename) = &fw.filename else {
            continue;
        };
        let header = match read_header(filename) {
            Ok(header) => header,
            Err(err) => {
                warn!("Error while reading {}: {err}", filename.display());
                continue;
            }
        };
        let [v0, v1, v2, v3] = header.version;
        // Writing to a String cannot fail.
        let _ = writeln!(
            manifest,
            "type: {:#04x} ver:{v3:02x}.{v2:02x}.{v1:02x}.{v0:02x}",
            fw.desc.kind.0
        );
    }
    manifest
}

/// Write the manifest of `firmwares` to `path`.
pub fn write_manifest(path: &Path, firmwares: &[PspFirmware]) -> Result<()> {
    write_file(path, render(firmwares).as_bytes())
}
