//! B-tree special space, meta page and index tuple layouts (`nbtree.h`,
//! `itup.h`).

use crate::page::{ItemPointer, SIZE_OF_PAGE_HEADER};
use crate::{maxalign, read_u16, read_u32, BlockNumber, OffsetNumber};

pub const BTREE_METAPAGE: BlockNumber = 0;
pub const BTREE_MAGIC: u32 = 0x053162;
pub const BTREE_VERSION: u32 = 4;

/// `sizeof(BTPageOpaqueData)`
pub const SIZEOF_BT_PAGE_OPAQUE: usize = 16;

pub const BTP_LEAF: u16 = 1 << 0;
pub const BTP_ROOT: u16 = 1 << 1;
pub const BTP_DELETED: u16 = 1 << 2;
pub const BTP_META: u16 = 1 << 3;
pub const BTP_HALF_DEAD: u16 = 1 << 4;
pub const BTP_SPLIT_END: u16 = 1 << 5;
pub const BTP_HAS_GARBAGE: u16 = 1 << 6;
pub const BTP_INCOMPLETE_SPLIT: u16 = 1 << 7;
pub const BTP_HAS_FULLXID: u16 = 1 << 8;

pub const P_NONE: BlockNumber = 0;
pub const P_HIKEY: OffsetNumber = 1;
pub const P_FIRSTKEY: OffsetNumber = 2;

/// `sizeof(IndexTupleData)`
pub const SIZEOF_INDEX_TUPLE: usize = 8;
/// `sizeof(IndexAttributeBitMapData)` for `INDEX_MAX_KEYS = 32`
pub const SIZEOF_INDEX_ATTR_BITMAP: usize = 4;

pub const INDEX_SIZE_MASK: u16 = 0x1FFF;
pub const INDEX_AM_RESERVED_BIT: u16 = 0x2000;
pub const INDEX_VAR_MASK: u16 = 0x4000;
pub const INDEX_NULL_MASK: u16 = 0x8000;

pub const BT_OFFSET_MASK: u16 = 0x0FFF;
pub const BT_STATUS_OFFSET_MASK: u16 = 0xF000;
pub const BT_PIVOT_HEAP_TID_ATTR: u16 = 0x1000;
pub const BT_IS_POSTING: u16 = 0x2000;

/// `BTMetaPageData`, stored right after the page header of block 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BtMeta {
    pub magic: u32,
    pub version: u32,
    pub root: BlockNumber,
    pub level: u32,
    pub fastroot: BlockNumber,
    pub fastlevel: u32,
}

impl BtMeta {
    pub const OFFSET: usize = maxalign(SIZE_OF_PAGE_HEADER);

    pub fn parse(page: &[u8]) -> Option<Self> {
        let base = Self::OFFSET;
        Some(Self {
            magic: read_u32(page, base)?,
            version: read_u32(page, base + 4)?,
            root: read_u32(page, base + 8)?,
            level: read_u32(page, base + 12)?,
            fastroot: read_u32(page, base + 16)?,
            fastlevel: read_u32(page, base + 20)?,
        })
    }

    pub fn write_to(&self, page: &mut [u8]) {
        let base = Self::OFFSET;
        for (i, v) in [
            self.magic,
            self.version,
            self.root,
            self.level,
            self.fastroot,
            self.fastlevel,
        ]
        .into_iter()
        .enumerate()
        {
            page[base + i * 4..base + i * 4 + 4].copy_from_slice(&v.to_ne_bytes());
        }
    }
}

/// `BTPageOpaqueData`, the special space of every non-meta b-tree page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BtPageOpaque {
    pub prev: BlockNumber,
    pub next: BlockNumber,
    /// Tree level, or part of the deleting xid on deleted pages.
    pub level: u32,
    pub flags: u16,
    pub cycleid: u16,
}

impl BtPageOpaque {
    pub fn parse(special: &[u8]) -> Option<Self> {
        if special.len() < SIZEOF_BT_PAGE_OPAQUE {
            return None;
        }
        Some(Self {
            prev: read_u32(special, 0)?,
            next: read_u32(special, 4)?,
            level: read_u32(special, 8)?,
            flags: read_u16(special, 12)?,
            cycleid: read_u16(special, 14)?,
        })
    }

    pub fn write_to(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.prev.to_ne_bytes());
        out[4..8].copy_from_slice(&self.next.to_ne_bytes());
        out[8..12].copy_from_slice(&self.level.to_ne_bytes());
        out[12..14].copy_from_slice(&self.flags.to_ne_bytes());
        out[14..16].copy_from_slice(&self.cycleid.to_ne_bytes());
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.flags & BTP_LEAF != 0
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.flags & BTP_DELETED != 0
    }

    #[inline]
    pub fn is_leftmost(&self) -> bool {
        self.prev == P_NONE
    }

    #[inline]
    pub fn is_rightmost(&self) -> bool {
        self.next == P_NONE
    }

    /// `P_FIRSTDATAKEY`: rightmost pages carry no high key.
    #[inline]
    pub fn first_data_key(&self) -> OffsetNumber {
        if self.is_rightmost() {
            P_HIKEY
        } else {
            P_FIRSTKEY
        }
    }
}

/// `IndexInfoFindDataOffset`
#[inline]
pub fn index_data_offset(t_info: u16) -> usize {
    if t_info & INDEX_NULL_MASK == 0 {
        maxalign(SIZEOF_INDEX_TUPLE)
    } else {
        maxalign(SIZEOF_INDEX_TUPLE + SIZEOF_INDEX_ATTR_BITMAP)
    }
}

/// Decoded `IndexTupleData` header with a view of the whole item.
#[derive(Clone, Copy, Debug)]
pub struct IndexTuple<'bytes> {
    pub tid: ItemPointer,
    pub info: u16,
    item: &'bytes [u8],
}

impl<'bytes> IndexTuple<'bytes> {
    pub fn parse(item: &'bytes [u8]) -> Option<Self> {
        if item.len() < SIZEOF_INDEX_TUPLE {
            return None;
        }
        Some(Self {
            tid: ItemPointer::parse(item, 0)?,
            info: read_u16(item, 6)?,
            item,
        })
    }

    /// `IndexTupleSize`
    #[inline]
    pub fn size(&self) -> usize {
        (self.info & INDEX_SIZE_MASK) as usize
    }

    #[inline]
    pub fn has_nulls(&self) -> bool {
        self.info & INDEX_NULL_MASK != 0
    }

    #[inline]
    pub fn data_offset(&self) -> usize {
        index_data_offset(self.info)
    }

    /// Bytes of key data (`IndexTupleSize - IndexInfoFindDataOffset`), may
    /// be negative on corrupted tuples.
    #[inline]
    pub fn data_len(&self) -> isize {
        self.size() as isize - self.data_offset() as isize
    }

    /// Null bitmap right after the fixed header.
    pub fn null_bitmap(&self) -> &'bytes [u8] {
        if !self.has_nulls() {
            return &[];
        }
        let end = (SIZEOF_INDEX_TUPLE + SIZEOF_INDEX_ATTR_BITMAP).min(self.item.len());
        &self.item[SIZEOF_INDEX_TUPLE..end]
    }

    #[inline]
    fn alt_tid(&self) -> bool {
        self.info & INDEX_AM_RESERVED_BIT != 0
    }

    /// `BTreeTupleIsPosting`
    #[inline]
    pub fn is_posting(&self) -> bool {
        self.alt_tid() && self.tid.offset & BT_IS_POSTING != 0
    }

    /// `BTreeTupleIsPivot`
    #[inline]
    pub fn is_pivot(&self) -> bool {
        self.alt_tid() && self.tid.offset & BT_IS_POSTING == 0
    }

    /// Number of key attributes stored in a truncated pivot tuple.
    pub fn pivot_natts(&self) -> Option<usize> {
        self.is_pivot()
            .then_some((self.tid.offset & BT_OFFSET_MASK) as usize)
    }

    /// Heap TIDs this tuple points to: the posting list for deduplicated
    /// tuples, otherwise `t_tid`. Entries that do not fit the item are
    /// dropped.
    pub fn heap_tids(&self) -> impl Iterator<Item = ItemPointer> + 'bytes {
        let (start, count, single) = if self.is_posting() {
            let start = self.tid.block as usize;
            let count = (self.tid.offset & BT_OFFSET_MASK) as usize;
            (start, count, None)
        } else {
            (0, 0, Some(self.tid))
        };
        let item = self.item;
        single.into_iter().chain(
            (0..count).map_while(move |i| ItemPointer::parse(item, start + i * ItemPointer::SIZE)),
        )
    }
}

/// Build the `t_tid` of a posting tuple whose list starts at `offset`.
pub fn posting_tid(offset: usize, count: usize) -> ItemPointer {
    ItemPointer {
        block: offset as BlockNumber,
        offset: (count as u16 & BT_OFFSET_MASK) | BT_IS_POSTING,
    }
}
