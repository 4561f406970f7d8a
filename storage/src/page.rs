use crate::{read_u16, read_u32, BlockNumber, OffsetNumber, BLCKSZ};
use anyhow::{bail, Result};
use common::CheckError;

/// `SizeOfPageHeaderData`, also the offset of the line pointer array.
pub const SIZE_OF_PAGE_HEADER: usize = 24;
/// `sizeof(ItemIdData)`.
pub const ITEM_ID_SIZE: usize = 4;
pub const PG_PAGE_LAYOUT_VERSION: u8 = 4;

pub const PD_HAS_FREE_LINES: u16 = 0x0001;
pub const PD_PAGE_FULL: u16 = 0x0002;
pub const PD_ALL_VISIBLE: u16 = 0x0004;
pub const PD_VALID_FLAG_BITS: u16 = 0x0007;

/// Decoded `PageHeaderData`.
///
/// `checksum` holds `pd_tli` on clusters initialized before 9.3, the two
/// fields share the same bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageHeader {
    pub lsn_xlogid: u32,
    pub lsn_xrecoff: u32,
    pub checksum: u16,
    pub flags: u16,
    pub lower: u16,
    pub upper: u16,
    pub special: u16,
    pub pagesize_version: u16,
    pub prune_xid: u32,
}

impl PageHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < SIZE_OF_PAGE_HEADER {
            return None;
        }
        Some(Self {
            lsn_xlogid: read_u32(data, 0)?,
            lsn_xrecoff: read_u32(data, 4)?,
            checksum: read_u16(data, 8)?,
            flags: read_u16(data, 10)?,
            lower: read_u16(data, 12)?,
            upper: read_u16(data, 14)?,
            special: read_u16(data, 16)?,
            pagesize_version: read_u16(data, 18)?,
            prune_xid: read_u32(data, 20)?,
        })
    }

    /// Serialize the header into the first 24 bytes of `out`.
    pub fn write_to(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.lsn_xlogid.to_ne_bytes());
        out[4..8].copy_from_slice(&self.lsn_xrecoff.to_ne_bytes());
        out[8..10].copy_from_slice(&self.checksum.to_ne_bytes());
        out[10..12].copy_from_slice(&self.flags.to_ne_bytes());
        out[12..14].copy_from_slice(&self.lower.to_ne_bytes());
        out[14..16].copy_from_slice(&self.upper.to_ne_bytes());
        out[16..18].copy_from_slice(&self.special.to_ne_bytes());
        out[18..20].copy_from_slice(&self.pagesize_version.to_ne_bytes());
        out[20..24].copy_from_slice(&self.prune_xid.to_ne_bytes());
    }

    /// `PageGetPageSize`
    #[inline]
    pub fn page_size(&self) -> usize {
        (self.pagesize_version & 0xFF00) as usize
    }

    /// `PageGetPageLayoutVersion`
    #[inline]
    pub fn layout_version(&self) -> u8 {
        (self.pagesize_version & 0x00FF) as u8
    }

    /// Timeline of the last change, only meaningful on pre-9.3 layouts.
    #[inline]
    pub fn timeline(&self) -> u16 {
        self.checksum
    }

    /// A page that was extended but never initialized: the whole header
    /// is zero.
    pub fn is_new(&self) -> bool {
        self.upper == 0 && *self == Self::default()
    }

    /// `PageGetMaxOffsetNumber`: number of line pointers on the page.
    pub fn max_offset(&self) -> usize {
        let lower = self.lower as usize;
        if lower <= SIZE_OF_PAGE_HEADER {
            return 0;
        }
        (lower - SIZE_OF_PAGE_HEADER) / ITEM_ID_SIZE
    }
}

/// `lp_flags` of a line pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LpFlags {
    Unused,
    Normal,
    Redirect,
    Dead,
}

impl LpFlags {
    fn from_bits(bits: u32) -> Self {
        match bits & 0x03 {
            0 => LpFlags::Unused,
            1 => LpFlags::Normal,
            2 => LpFlags::Redirect,
            _ => LpFlags::Dead,
        }
    }

    fn bits(self) -> u32 {
        match self {
            LpFlags::Unused => 0,
            LpFlags::Normal => 1,
            LpFlags::Redirect => 2,
            LpFlags::Dead => 3,
        }
    }
}

/// Decoded `ItemIdData`, a 32-bit word of `lp_off:15, lp_flags:2, lp_len:15`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ItemId {
    pub off: u16,
    pub flags: LpFlags,
    pub len: u16,
}

impl ItemId {
    pub fn new(off: u16, flags: LpFlags, len: u16) -> Self {
        Self {
            off: off & 0x7FFF,
            flags,
            len: len & 0x7FFF,
        }
    }

    /// Decode the bitfield word the way the C compiler lays it out.
    pub fn from_raw(raw: u32) -> Self {
        if cfg!(target_endian = "little") {
            Self {
                off: (raw & 0x7FFF) as u16,
                flags: LpFlags::from_bits(raw >> 15),
                len: (raw >> 17) as u16,
            }
        } else {
            Self {
                off: (raw >> 17) as u16,
                flags: LpFlags::from_bits(raw >> 15),
                len: (raw & 0x7FFF) as u16,
            }
        }
    }

    pub fn to_raw(&self) -> u32 {
        let off = self.off as u32 & 0x7FFF;
        let len = self.len as u32 & 0x7FFF;
        if cfg!(target_endian = "little") {
            off | (self.flags.bits() << 15) | (len << 17)
        } else {
            (off << 17) | (self.flags.bits() << 15) | len
        }
    }

    /// `ItemIdHasStorage`
    #[inline]
    pub fn has_storage(&self) -> bool {
        match self.flags {
            LpFlags::Normal => true,
            LpFlags::Dead => self.len > 0,
            LpFlags::Unused | LpFlags::Redirect => false,
        }
    }

    /// First byte past the item.
    #[inline]
    pub fn end(&self) -> usize {
        self.off as usize + self.len as usize
    }
}

/// `ItemPointerData`: block number split in two halves plus the offset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ItemPointer {
    pub block: BlockNumber,
    pub offset: OffsetNumber,
}

impl ItemPointer {
    pub const SIZE: usize = 6;

    pub fn parse(data: &[u8], off: usize) -> Option<Self> {
        let hi = read_u16(data, off)? as u32;
        let lo = read_u16(data, off + 2)? as u32;
        let offset = read_u16(data, off + 4)?;
        Some(Self {
            block: (hi << 16) | lo,
            offset,
        })
    }

    pub fn write_to(&self, out: &mut [u8]) {
        let hi = (self.block >> 16) as u16;
        let lo = (self.block & 0xFFFF) as u16;
        out[0..2].copy_from_slice(&hi.to_ne_bytes());
        out[2..4].copy_from_slice(&lo.to_ne_bytes());
        out[4..6].copy_from_slice(&self.offset.to_ne_bytes());
    }
}

/// Read-only view over a copied block.
pub struct Page<'bytes> {
    data: &'bytes [u8],
    header: PageHeader,
}

impl<'bytes> Page<'bytes> {
    pub fn from_slice(data: &'bytes [u8]) -> Result<Self> {
        if data.len() < BLCKSZ {
            bail!(CheckError::BufferTooSmall(data.len()));
        }
        let data = &data[..BLCKSZ];
        let Some(header) = PageHeader::parse(data) else {
            bail!(CheckError::BufferTooSmall(data.len()));
        };
        Ok(Self { data, header })
    }

    #[inline]
    pub fn header(&self) -> &PageHeader {
        &self.header
    }

    #[inline]
    pub fn bytes(&self) -> &'bytes [u8] {
        self.data
    }

    #[inline]
    pub fn max_offset(&self) -> usize {
        self.header.max_offset()
    }

    /// Line pointer `i` (0-based), `None` when it would lie outside the block.
    pub fn item_id(&self, i: usize) -> Option<ItemId> {
        let pos = SIZE_OF_PAGE_HEADER.checked_add(i.checked_mul(ITEM_ID_SIZE)?)?;
        read_u32(self.data, pos).map(ItemId::from_raw)
    }

    /// Iterator over the line pointer array announced by `pd_lower`.
    pub fn item_ids(&self) -> ItemIdIter<'_, 'bytes> {
        ItemIdIter {
            page: self,
            cur: 0,
            end: self.max_offset(),
        }
    }

    /// Bytes of the item, `None` if `[off, off + len)` leaves the block.
    pub fn item(&self, lp: &ItemId) -> Option<&'bytes [u8]> {
        self.data.get(lp.off as usize..lp.end())
    }

    /// Start of the special space, `None` when `pd_special` is past the block.
    pub fn special(&self) -> Option<&'bytes [u8]> {
        self.data.get(self.header.special as usize..)
    }
}

/// Iterator over `(index, ItemId)` pairs of a page, stops at the block end.
pub struct ItemIdIter<'page, 'bytes> {
    page: &'page Page<'bytes>,
    cur: usize,
    end: usize,
}

impl Iterator for ItemIdIter<'_, '_> {
    type Item = (usize, ItemId);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur >= self.end {
            return None;
        }
        let idx = self.cur;
        self.cur += 1;
        self.page.item_id(idx).map(|lp| (idx, lp))
    }
}
