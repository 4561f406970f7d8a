//! Varlena header decoding (`varatt.h`).
//!
//! Only the header is interpreted: the walkers need the number of bytes the
//! value occupies on the page (`VARSIZE_ANY`), never the detoasted length.

use crate::read_u32;

pub const VARHDRSZ: usize = 4;
pub const VARHDRSZ_SHORT: usize = 1;
pub const VARHDRSZ_EXTERNAL: usize = 2;

pub const VARTAG_INDIRECT: u8 = 1;
pub const VARTAG_EXPANDED_RO: u8 = 2;
pub const VARTAG_EXPANDED_RW: u8 = 3;
pub const VARTAG_ONDISK: u8 = 18;

pub const VARLENA_EXTSIZE_BITS: u32 = 30;
pub const VARLENA_EXTSIZE_MASK: u32 = (1 << VARLENA_EXTSIZE_BITS) - 1;
/// `MaxAllocSize`, no datum can be larger than one allocation.
pub const MAX_ALLOC_SIZE: u32 = 0x3FFF_FFFF;
/// Largest raw (decompressed) payload a compressed datum may announce:
/// `MaxAllocSize - VARHDRSZ`, the limit the server enforces when it
/// decompresses, slightly below 1 GiB.
pub const MAX_VARLENA_RAW_SIZE: u32 = MAX_ALLOC_SIZE - VARHDRSZ as u32;

/// `VARTAG_SIZE`: payload size of an external pointer for a known tag.
pub fn vartag_size(tag: u8) -> Option<usize> {
    match tag {
        // varatt_indirect holds a single pointer
        VARTAG_INDIRECT => Some(8),
        // varatt_expanded holds a single pointer
        VARTAG_EXPANDED_RO | VARTAG_EXPANDED_RW => Some(8),
        // varatt_external: rawsize, extinfo, valueid, toastrelid
        VARTAG_ONDISK => Some(16),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionMethod {
    Pglz,
    Lz4,
    Invalid(u8),
}

impl CompressionMethod {
    fn from_id(id: u8) -> Self {
        match id {
            0 => CompressionMethod::Pglz,
            1 => CompressionMethod::Lz4,
            other => CompressionMethod::Invalid(other),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarlenaHeader {
    /// 1-byte header, inline value of at most 126 data bytes.
    Short { size: usize },
    /// 1-byte header followed by a TOAST pointer tag.
    External { tag: u8 },
    /// 4-byte header. `tcinfo` is read for compressed values when present.
    Long {
        size: usize,
        compressed: bool,
        tcinfo: Option<u32>,
    },
}

#[inline]
fn is_1b(b0: u8) -> bool {
    if cfg!(target_endian = "little") {
        (b0 & 0x01) == 0x01
    } else {
        (b0 & 0x80) == 0x80
    }
}

#[inline]
fn is_1b_external(b0: u8) -> bool {
    if cfg!(target_endian = "little") {
        b0 == 0x01
    } else {
        b0 == 0x80
    }
}

#[inline]
fn size_1b(b0: u8) -> usize {
    if cfg!(target_endian = "little") {
        ((b0 >> 1) & 0x7F) as usize
    } else {
        (b0 & 0x7F) as usize
    }
}

#[inline]
fn size_4b(hdr: u32) -> usize {
    if cfg!(target_endian = "little") {
        ((hdr >> 2) & 0x3FFF_FFFF) as usize
    } else {
        (hdr & 0x3FFF_FFFF) as usize
    }
}

#[inline]
fn is_4b_compressed(hdr: u32) -> bool {
    if cfg!(target_endian = "little") {
        (hdr & 0x03) == 0x02
    } else {
        (hdr & 0xC000_0000) == 0x4000_0000
    }
}

impl VarlenaHeader {
    /// Decode the header at `data[off..]`. `None` when the header bytes
    /// themselves are not inside `data`.
    pub fn parse(data: &[u8], off: usize) -> Option<Self> {
        let b0 = *data.get(off)?;
        if is_1b_external(b0) {
            let tag = *data.get(off + 1)?;
            return Some(VarlenaHeader::External { tag });
        }
        if is_1b(b0) {
            return Some(VarlenaHeader::Short { size: size_1b(b0) });
        }
        let hdr = read_u32(data, off)?;
        let compressed = is_4b_compressed(hdr);
        let tcinfo = if compressed {
            read_u32(data, off + VARHDRSZ)
        } else {
            None
        };
        Some(VarlenaHeader::Long {
            size: size_4b(hdr),
            compressed,
            tcinfo,
        })
    }

    /// `VARSIZE_ANY`: bytes occupied on the page including the header.
    /// `None` for external pointers with an unknown tag.
    pub fn size(&self) -> Option<usize> {
        match *self {
            VarlenaHeader::Short { size } => Some(size),
            VarlenaHeader::External { tag } => vartag_size(tag).map(|s| VARHDRSZ_EXTERNAL + s),
            VarlenaHeader::Long { size, .. } => Some(size),
        }
    }

    /// Smallest legal size for this header kind.
    pub fn min_size(&self) -> usize {
        match self {
            VarlenaHeader::Short { .. } => VARHDRSZ_SHORT,
            VarlenaHeader::External { .. } => VARHDRSZ_EXTERNAL,
            VarlenaHeader::Long { compressed: true, .. } => VARHDRSZ + 4,
            VarlenaHeader::Long { .. } => VARHDRSZ,
        }
    }

    #[inline]
    pub fn is_compressed(&self) -> bool {
        matches!(self, VarlenaHeader::Long { compressed: true, .. })
    }

    /// `VARDATA_COMPRESSED_GET_EXTSIZE`
    pub fn raw_size(&self) -> Option<u32> {
        match self {
            VarlenaHeader::Long {
                compressed: true,
                tcinfo: Some(tcinfo),
                ..
            } => Some(tcinfo & VARLENA_EXTSIZE_MASK),
            _ => None,
        }
    }

    /// `VARDATA_COMPRESSED_GET_COMPRESS_METHOD`
    pub fn compression_method(&self) -> Option<CompressionMethod> {
        match self {
            VarlenaHeader::Long {
                compressed: true,
                tcinfo: Some(tcinfo),
                ..
            } => Some(CompressionMethod::from_id((tcinfo >> VARLENA_EXTSIZE_BITS) as u8)),
            _ => None,
        }
    }
}

/// Encode a short (1-byte) header for a value of `total` bytes including
/// the header itself.
pub fn encode_short_header(total: usize) -> u8 {
    debug_assert!(total <= 0x7F);
    if cfg!(target_endian = "little") {
        ((total as u8) << 1) | 0x01
    } else {
        (total as u8) | 0x80
    }
}

/// Encode the two header bytes of a TOAST pointer with tag `tag`.
pub fn encode_external_header(tag: u8) -> [u8; 2] {
    if cfg!(target_endian = "little") {
        [0x01, tag]
    } else {
        [0x80, tag]
    }
}

/// Encode an uncompressed 4-byte header for a value of `total` bytes.
pub fn encode_long_header(total: usize) -> [u8; 4] {
    let total = total as u32 & 0x3FFF_FFFF;
    if cfg!(target_endian = "little") {
        (total << 2).to_ne_bytes()
    } else {
        total.to_ne_bytes()
    }
}

/// Encode a compressed 4-byte header followed by `va_tcinfo`.
pub fn encode_compressed_header(total: usize, raw_size: u32, method: u8) -> [u8; 8] {
    let total = total as u32 & 0x3FFF_FFFF;
    let hdr = if cfg!(target_endian = "little") {
        (total << 2) | 0x02
    } else {
        total | 0x4000_0000
    };
    let tcinfo = (raw_size & VARLENA_EXTSIZE_MASK) | ((method as u32) << VARLENA_EXTSIZE_BITS);
    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&hdr.to_ne_bytes());
    out[4..].copy_from_slice(&tcinfo.to_ne_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_header() {
        let data = [encode_short_header(6), b'h', b'e', b'l', b'l', b'o'];
        let hdr = VarlenaHeader::parse(&data, 0).unwrap();
        assert_eq!(hdr, VarlenaHeader::Short { size: 6 });
        assert_eq!(hdr.size(), Some(6));
    }

    #[test]
    fn long_header() {
        let mut data = vec![0u8; 300];
        data[..4].copy_from_slice(&encode_long_header(300));
        let hdr = VarlenaHeader::parse(&data, 0).unwrap();
        assert_eq!(hdr.size(), Some(300));
        assert!(!hdr.is_compressed());
    }

    #[test]
    fn compressed_header() {
        let data = encode_compressed_header(64, 4000, 1);
        let hdr = VarlenaHeader::parse(&data, 0).unwrap();
        assert!(hdr.is_compressed());
        assert_eq!(hdr.size(), Some(64));
        assert_eq!(hdr.raw_size(), Some(4000));
        assert_eq!(hdr.compression_method(), Some(CompressionMethod::Lz4));
    }

    #[test]
    fn external_pointer() {
        let hdr = VarlenaHeader::parse(&encode_external_header(VARTAG_ONDISK), 0).unwrap();
        assert_eq!(hdr, VarlenaHeader::External { tag: VARTAG_ONDISK });
        assert_eq!(hdr.size(), Some(18));
        let bogus = VarlenaHeader::parse(&encode_external_header(77), 0).unwrap();
        assert_eq!(bogus.size(), None);
    }

    #[test]
    fn raw_size_limit() {
        let at_limit = encode_compressed_header(16, MAX_VARLENA_RAW_SIZE, 0);
        let hdr = VarlenaHeader::parse(&at_limit, 0).unwrap();
        assert_eq!(hdr.raw_size(), Some(0x3FFF_FFFB));
        let over = encode_compressed_header(16, MAX_ALLOC_SIZE, 0);
        let hdr = VarlenaHeader::parse(&over, 0).unwrap();
        assert!(hdr.raw_size().unwrap() > MAX_VARLENA_RAW_SIZE);
    }

    #[test]
    fn truncated_header() {
        // a 4-byte header cut after two bytes
        let data = [0x00, 0x04];
        assert_eq!(VarlenaHeader::parse(&data, 0), None);
        assert_eq!(VarlenaHeader::parse(&data, 5), None);
    }
}
