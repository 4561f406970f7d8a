use crate::page::{ItemPointer, ITEM_ID_SIZE, SIZE_OF_PAGE_HEADER};
use crate::{maxalign, read_u16, read_u32, BLCKSZ};

/// `SizeofHeapTupleHeader`: fixed part of the tuple header, up to `t_bits`.
pub const SIZEOF_HEAP_TUPLE_HEADER: usize = 23;
/// Offset of `t_bits` inside the tuple header.
const T_BITS_OFFSET: usize = SIZEOF_HEAP_TUPLE_HEADER;

/// `MaxHeapTuplesPerPage`
pub const MAX_HEAP_TUPLES_PER_PAGE: usize =
    (BLCKSZ - SIZE_OF_PAGE_HEADER) / (maxalign(SIZEOF_HEAP_TUPLE_HEADER) + ITEM_ID_SIZE);

// t_infomask
pub const HEAP_HASNULL: u16 = 0x0001;
pub const HEAP_HASVARLENA: u16 = 0x0002;
pub const HEAP_HASEXTERNAL: u16 = 0x0004;
pub const HEAP_XMIN_COMMITTED: u16 = 0x0100;
pub const HEAP_XMAX_INVALID: u16 = 0x0800;

// t_infomask2
pub const HEAP_NATTS_MASK: u16 = 0x07FF;
pub const HEAP_KEYS_UPDATED: u16 = 0x2000;
pub const HEAP_HOT_UPDATED: u16 = 0x4000;
pub const HEAP_ONLY_TUPLE: u16 = 0x8000;

/// `BITMAPLEN`: bytes needed for a null bitmap of `natts` attributes.
#[inline]
pub const fn bitmap_len(natts: usize) -> usize {
    natts.div_ceil(8)
}

/// `att_isnull`: bit clear means the attribute is NULL.
#[inline]
pub fn att_isnull(attno: usize, bits: &[u8]) -> bool {
    match bits.get(attno >> 3) {
        Some(byte) => (byte >> (attno & 0x07)) & 0x01 == 0,
        None => true,
    }
}

/// Decoded fixed part of a `HeapTupleHeaderData` plus a view of its null
/// bitmap.
#[derive(Clone, Copy, Debug)]
pub struct HeapTupleHeader<'bytes> {
    pub xmin: u32,
    pub xmax: u32,
    pub cid: u32,
    pub ctid: ItemPointer,
    pub infomask2: u16,
    pub infomask: u16,
    pub hoff: u8,
    tuple: &'bytes [u8],
}

impl<'bytes> HeapTupleHeader<'bytes> {
    /// Parse the header at the start of `tuple`, `None` if it is shorter than
    /// the fixed header.
    pub fn parse(tuple: &'bytes [u8]) -> Option<Self> {
        if tuple.len() < SIZEOF_HEAP_TUPLE_HEADER {
            return None;
        }
        Some(Self {
            xmin: read_u32(tuple, 0)?,
            xmax: read_u32(tuple, 4)?,
            cid: read_u32(tuple, 8)?,
            ctid: ItemPointer::parse(tuple, 12)?,
            infomask2: read_u16(tuple, 18)?,
            infomask: read_u16(tuple, 20)?,
            hoff: tuple[22],
            tuple,
        })
    }

    /// `HeapTupleHeaderGetNatts`
    #[inline]
    pub fn natts(&self) -> usize {
        (self.infomask2 & HEAP_NATTS_MASK) as usize
    }

    #[inline]
    pub fn has_nulls(&self) -> bool {
        self.infomask & HEAP_HASNULL != 0
    }

    /// `HeapTupleHeaderIsHeapOnly`
    #[inline]
    pub fn is_heap_only(&self) -> bool {
        self.infomask2 & HEAP_ONLY_TUPLE != 0
    }

    /// `HeapTupleHeaderIsHotUpdated` without the xmax validity test.
    #[inline]
    pub fn is_hot_updated(&self) -> bool {
        self.infomask2 & HEAP_HOT_UPDATED != 0
    }

    /// Smallest `t_hoff` able to hold the header and the null bitmap.
    pub fn min_hoff(&self) -> usize {
        if self.has_nulls() {
            SIZEOF_HEAP_TUPLE_HEADER + bitmap_len(self.natts())
        } else {
            SIZEOF_HEAP_TUPLE_HEADER
        }
    }

    /// Null bitmap bytes, clipped to what the tuple actually holds.
    pub fn null_bitmap(&self) -> &'bytes [u8] {
        if !self.has_nulls() {
            return &[];
        }
        let end = T_BITS_OFFSET + bitmap_len(self.natts());
        let end = end.min(self.tuple.len()).min(self.hoff as usize).max(T_BITS_OFFSET);
        &self.tuple[T_BITS_OFFSET..end]
    }

    /// Whether attribute `attno` (0-based) is NULL according to the bitmap.
    pub fn att_isnull(&self, attno: usize) -> bool {
        self.has_nulls() && att_isnull(attno, self.null_bitmap())
    }
}
