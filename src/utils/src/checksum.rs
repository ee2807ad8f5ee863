// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

/// Number of 16-bit words summed before both Fletcher accumulators are folded.
/// 359 is the largest block for which the 32-bit accumulators cannot overflow.
const FLETCHER_BLOCK_WORDS: usize = 359;

/// Compute the byte checksum of a region serialized in several pieces.
///
/// The returned value makes the byte sum of all pieces plus the checksum itself equal to 0
/// (mod 256), provided the checksum byte inside the pieces is zero when this is called.
pub fn checksum(buf: &[&[u8]]) -> u8 {
    (255 - buf
        .iter()
        .flat_map(|b| b.iter())
        .fold(0u8, |acc, x| acc.wrapping_add(*x)))
    .wrapping_add(1)
}

/// Compute the byte checksum of a single contiguous region.
pub fn byte_checksum(buf: &[u8]) -> u8 {
    checksum(&[buf])
}

/// Fletcher-32 over the little-endian 16-bit words of `data`.
///
/// Both sums start at 0xFFFF. A trailing odd byte is not covered.
pub fn fletcher32(data: &[u8]) -> u32 {
    let mut c0: u32 = 0xFFFF;
    let mut c1: u32 = 0xFFFF;

    let words = data.chunks_exact(2).map(|w| u32::from(u16::from_le_bytes([w[0], w[1]])));
    let mut block = 0;
    for word in words {
        c0 += word;
        c1 += c0;
        block += 1;
        if block == FLETCHER_BLOCK_WORDS {
            c0 = (c0 & 0xFFFF) + (c0 >> 16);
            c1 = (c1 & 0xFFFF) + (c1 >> 16);
            block = 0;
        }
    }
    if block != 0 {
        c0 = (c0 & 0xFFFF) + (c0 >> 16);
        c1 = (c1 & 0xFFFF) + (c1 >> 16);
    }

    c0 = (c0 & 0xFFFF) + (c0 >> 16);
    c1 = (c1 & 0xFFFF) + (c1 >> 16);
    (c1 << 16) | c0
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_checksum() {
        assert_eq!(checksum(&[&[]]), 0u8);
        assert_eq!(checksum(&[]), 0u8);
        assert_eq!(checksum(&[&[1, 2, 3]]), 250u8);
        assert_eq!(checksum(&[&[1, 2, 3], &[]]), 250u8);
        assert_eq!(checksum(&[&[1, 2], &[3]]), 250u8);
        assert_eq!(checksum(&[&[1, 2], &[3], &[250]]), 0u8);
        assert_eq!(checksum(&[&[255]]), 1u8);
        assert_eq!(checksum(&[&[1, 2], &[3], &[250], &[255]]), 1u8);
        assert_eq!(byte_checksum(&[1, 2, 3]), 250u8);
    }

    #[test]
    fn test_fletcher32_known_values() {
        assert_eq!(fletcher32(&[]), 0xFFFF_FFFF);
        assert_eq!(fletcher32(&[1, 0]), 0x0001_0001);
        assert_eq!(fletcher32(b"abcdef"), 0x5650_2d2a);
        let ramp: Vec<u8> = (0..=255).collect();
        assert_eq!(fletcher32(&ramp), 0x7555_3fc0);
        // More than one fold block.
        assert_eq!(fletcher32(&[0xff; 2000]), 0xFFFF_FFFF);
    }

    #[test]
    fn test_fletcher32_ignores_odd_byte() {
        assert_eq!(fletcher32(b"abcde"), 0x2926_c6c4);
        assert_eq!(fletcher32(b"abcde"), fletcher32(b"abcd"));
    }

    proptest! {
        #[test]
        fn test_checksum_closes_region(mut data in proptest::collection::vec(any::<u8>(), 1..512)) {
            data[0] = 0;
            data[0] = byte_checksum(&data);
            let sum = data.iter().fold(0u8, |acc, x| acc.wrapping_add(*x));
            prop_assert_eq!(sum, 0);
        }

        #[test]
        fn test_fletcher32_trailing_byte(
            mut data in proptest::collection::vec(any::<u16>(), 0..2048),
            extra in any::<u8>(),
        ) {
            let mut bytes: Vec<u8> = data.drain(..).flat_map(u16::to_le_bytes).collect();
            let expected = fletcher32(&bytes);
            bytes.push(extra);
            prop_assert_eq!(fletcher32(&bytes), expected);
        }
    }
}
