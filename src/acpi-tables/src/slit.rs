// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use zerocopy::little_endian::U64;

use crate::sdt::SdtBuffer;
use crate::{AcpiError, Result, SDT_HEADER_LEN, TableKind, fill_header, table_len};

/// Relative distance of a locality to itself.
pub const LOCAL_DISTANCE: u8 = 10;
/// The locality cannot be reached.
pub const UNREACHABLE_DISTANCE: u8 = 0xff;

/// System Locality Information Table (SLIT)
///
/// `distances[i][j]` is the relative distance from locality `i` to locality `j`. The matrix must
/// be square.
pub fn create_slit(table: &mut SdtBuffer, distances: &[Vec<u8>]) -> Result<()> {
    let localities = distances.len();
    if distances.iter().any(|row| row.len() != localities) {
        return Err(AcpiError::InvalidDistanceMatrix(localities));
    }

    fill_header(Some(&mut *table), TableKind::Slit, table_len(SDT_HEADER_LEN)?)?;
    table.append(&U64::new(utils::usize_to_u64(localities)));
    for row in distances {
        table.append_bytes(row);
    }

    // (Re)calculate length.
    table.set_length(table_len(table.current())?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slit() {
        let mut table = SdtBuffer::new(SDT_HEADER_LEN);
        create_slit(&mut table, &[vec![10, 21], vec![21, 10]]).unwrap();
        assert_eq!(table.signature(), *b"SLIT");
        assert_eq!(table.length(), 36 + 8 + 4);
        assert_eq!(table.read_at::<U64>(36).unwrap().get(), 2);
        assert_eq!(&table.as_slice()[44..], &[10, 21, 21, 10]);
    }

    #[test]
    fn test_slit_not_square() {
        let mut table = SdtBuffer::new(SDT_HEADER_LEN);
        let err = create_slit(&mut table, &[vec![10, 21], vec![21]]).unwrap_err();
        assert!(matches!(err, AcpiError::InvalidDistanceMatrix(2)), "{err:?}");
        assert_eq!(table.length(), 0);
    }
}
