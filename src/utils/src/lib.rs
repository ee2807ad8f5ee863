// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Primitives shared by the ACPI table builder and the firmware directory packager.

pub use vmm_sys_util::{tempdir, tempfile};

/// Byte-sum and Fletcher-32 checksums
pub mod checksum;

/// Round `value` up to the next multiple of `align`.
///
/// `align` must be a power of two. An alignment of 0 or 1 leaves the value untouched.
/// Returns `None` when the rounded value does not fit in 64 bits.
#[inline]
pub const fn checked_align_up(value: u64, align: u64) -> Option<u64> {
    if align <= 1 {
        return Some(value);
    }
    let mask = align - 1;
    match value.checked_add(mask) {
        Some(v) => Some(v & !mask),
        None => None,
    }
}

/// Same as [`checked_align_up`], for values that are known not to overflow.
#[inline]
pub const fn align_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        return value;
    }
    let mask = align - 1;
    value.wrapping_add(mask) & !mask
}

/// Safely converts a u64 value to a usize value.
/// This bypasses the Clippy lint check because we only support 64-bit platforms.
#[cfg(target_pointer_width = "64")]
#[inline]
#[allow(clippy::cast_possible_truncation)]
pub const fn u64_to_usize(num: u64) -> usize {
    num as usize
}

/// Safely converts a usize value to a u64 value.
/// This bypasses the Clippy lint check because we only support 64-bit platforms.
#[cfg(target_pointer_width = "64")]
#[inline]
#[allow(clippy::cast_possible_truncation)]
pub const fn usize_to_u64(num: usize) -> u64 {
    num as u64
}
