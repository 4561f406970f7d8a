//! Bounds-checked views of Postgres on-disk structures
//!
//! The layouts follow `bufpage.h`, `itemid.h`, `htup_details.h`, `itup.h`
//! and `nbtree.h` for `PG_PAGE_LAYOUT_VERSION` 4 with the default 8 KiB
//! block size. Every accessor works on a byte slice copied out of shared
//! buffers and returns `None` instead of reading past the slice, so the
//! views are safe to use on arbitrarily corrupted input.

pub mod attr;
#[cfg(any(test, feature = "fixture"))]
pub mod fixture;
pub mod heap;
pub mod nbtree;
pub mod page;
pub mod varlena;

/// Size of a disk block in bytes.
pub const BLCKSZ: usize = 8192;
/// Platform maximum alignment (`MAXIMUM_ALIGNOF`).
pub const MAXIMUM_ALIGNOF: usize = 8;

pub type BlockNumber = u32;
pub type OffsetNumber = u16;

pub const INVALID_BLOCK_NUMBER: BlockNumber = 0xFFFF_FFFF;
pub const MAX_BLOCK_NUMBER: BlockNumber = 0xFFFF_FFFE;

#[inline]
pub const fn maxalign(len: usize) -> usize {
    (len + MAXIMUM_ALIGNOF - 1) & !(MAXIMUM_ALIGNOF - 1)
}

#[inline]
pub(crate) fn read_u16(data: &[u8], off: usize) -> Option<u16> {
    let bytes = data.get(off..off.checked_add(2)?)?;
    Some(u16::from_ne_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub(crate) fn read_u32(data: &[u8], off: usize) -> Option<u32> {
    let bytes = data.get(off..off.checked_add(4)?)?;
    Some(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
