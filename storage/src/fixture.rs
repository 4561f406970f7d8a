//! Builders for synthetic pages, used by unit tests, integration tests and
//! benchmarks.
//!
//! Tuples are laid out the way `heap_fill_tuple` and `index_form_tuple` do
//! it: short varlena headers whenever the value fits, zero padding before
//! aligned attributes, every item placed at a `MAXALIGN`ed offset.

use crate::attr::TupleDesc;
use crate::heap::{
    bitmap_len, HEAP_HASNULL, HEAP_HASVARLENA, HEAP_NATTS_MASK, HEAP_XMAX_INVALID,
    HEAP_XMIN_COMMITTED, SIZEOF_HEAP_TUPLE_HEADER,
};
use crate::nbtree::{
    index_data_offset, posting_tid, BtMeta, BtPageOpaque, BTP_META, BTREE_MAGIC, BTREE_VERSION,
    INDEX_AM_RESERVED_BIT, INDEX_NULL_MASK, INDEX_SIZE_MASK, INDEX_VAR_MASK,
    SIZEOF_BT_PAGE_OPAQUE, SIZEOF_INDEX_TUPLE,
};
use crate::page::{
    ItemId, ItemPointer, LpFlags, PageHeader, ITEM_ID_SIZE, PG_PAGE_LAYOUT_VERSION,
    SIZE_OF_PAGE_HEADER,
};
use crate::varlena::{encode_long_header, encode_short_header, VarlenaHeader, VARHDRSZ};
use crate::{maxalign, BlockNumber, OffsetNumber, BLCKSZ};

/// Largest payload stored behind a 1-byte varlena header.
const SHORT_VARLENA_MAX_PAYLOAD: usize = 0x7F - 1;

/// One attribute value of a synthetic tuple.
#[derive(Clone, Copy, Debug)]
pub enum Value<'a> {
    Null,
    /// Fixed-length value, its length must match `attlen`.
    Fixed(&'a [u8]),
    /// Varlena payload, the header is chosen by the builder.
    Varlena(&'a [u8]),
    /// Pre-encoded varlena including its header (compressed values,
    /// TOAST pointers, deliberately broken headers).
    RawVarlena(&'a [u8]),
    CString(&'a str),
}

/// Zero-initialized block built like `PageInit`.
pub struct PageBuilder {
    buf: Vec<u8>,
    header: PageHeader,
}

impl PageBuilder {
    /// `PageInit(page, BLCKSZ, special_size)`.
    pub fn new(special_size: usize) -> Self {
        let special = (BLCKSZ - maxalign(special_size)) as u16;
        Self {
            buf: vec![0; BLCKSZ],
            header: PageHeader {
                lower: SIZE_OF_PAGE_HEADER as u16,
                upper: special,
                special,
                pagesize_version: BLCKSZ as u16 | PG_PAGE_LAYOUT_VERSION as u16,
                ..Default::default()
            },
        }
    }

    pub fn heap() -> Self {
        Self::new(0)
    }

    /// B-tree page with the given special space.
    pub fn btree(opaque: BtPageOpaque) -> Self {
        let mut builder = Self::new(SIZEOF_BT_PAGE_OPAQUE);
        let special = builder.header.special as usize;
        opaque.write_to(&mut builder.buf[special..special + SIZEOF_BT_PAGE_OPAQUE]);
        builder
    }

    /// Place `item` below `pd_upper` and append a `LP_NORMAL` line pointer
    /// for it. Returns the 1-based offset number.
    pub fn add_item(&mut self, item: &[u8]) -> OffsetNumber {
        let upper = self.header.upper as usize;
        let off = (upper - item.len()) & !(crate::MAXIMUM_ALIGNOF - 1);
        self.buf[off..off + item.len()].copy_from_slice(item);
        self.header.upper = off as u16;
        self.push_item_id(ItemId::new(off as u16, LpFlags::Normal, item.len() as u16))
    }

    /// Append a raw line pointer without touching the item area.
    pub fn push_item_id(&mut self, lp: ItemId) -> OffsetNumber {
        let pos = self.header.lower as usize;
        self.buf[pos..pos + ITEM_ID_SIZE].copy_from_slice(&lp.to_raw().to_ne_bytes());
        self.header.lower += ITEM_ID_SIZE as u16;
        ((pos - SIZE_OF_PAGE_HEADER) / ITEM_ID_SIZE + 1) as OffsetNumber
    }

    /// Overwrite line pointer `i` (0-based).
    pub fn set_item_id(&mut self, i: usize, lp: ItemId) {
        let pos = SIZE_OF_PAGE_HEADER + i * ITEM_ID_SIZE;
        self.buf[pos..pos + ITEM_ID_SIZE].copy_from_slice(&lp.to_raw().to_ne_bytes());
    }

    pub fn item_id(&self, i: usize) -> ItemId {
        let pos = SIZE_OF_PAGE_HEADER + i * ITEM_ID_SIZE;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.buf[pos..pos + ITEM_ID_SIZE]);
        ItemId::from_raw(u32::from_ne_bytes(raw))
    }

    pub fn header_mut(&mut self) -> &mut PageHeader {
        &mut self.header
    }

    /// Raw block bytes for deliberate corruption. The header is written
    /// over on `finish`.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.header.write_to(&mut self.buf);
        self.buf
    }
}

/// Block 0 of a b-tree pointing at `root`.
pub fn btree_meta_page(root: BlockNumber, level: u32) -> Vec<u8> {
    let mut builder = PageBuilder::btree(BtPageOpaque {
        flags: BTP_META,
        ..Default::default()
    });
    let meta = BtMeta {
        magic: BTREE_MAGIC,
        version: BTREE_VERSION,
        root,
        level,
        fastroot: root,
        fastlevel: level,
    };
    meta.write_to(builder.bytes_mut());
    // pd_lower points past sizeof(BTMetaPageData)
    builder.header_mut().lower = (BtMeta::OFFSET + 48) as u16;
    builder.finish()
}

/// Append the attribute data of `values` to `out`, whose first byte sits at
/// a `MAXALIGN`ed page offset. Returns whether any varlena was written.
fn fill_data(desc: &TupleDesc, values: &[Value<'_>], out: &mut Vec<u8>) -> bool {
    let mut has_varlena = false;
    for (attr, value) in desc.iter().zip(values) {
        match *value {
            Value::Null => {}
            Value::Fixed(bytes) => {
                out.resize(attr.attalign.align(out.len()), 0);
                out.extend_from_slice(bytes);
            }
            Value::Varlena(payload) if payload.len() <= SHORT_VARLENA_MAX_PAYLOAD => {
                has_varlena = true;
                out.push(encode_short_header(payload.len() + 1));
                out.extend_from_slice(payload);
            }
            Value::Varlena(payload) => {
                has_varlena = true;
                out.resize(attr.attalign.align(out.len()), 0);
                out.extend_from_slice(&encode_long_header(payload.len() + VARHDRSZ));
                out.extend_from_slice(payload);
            }
            Value::RawVarlena(raw) => {
                has_varlena = true;
                // only 4-byte headers are aligned
                let one_byte = matches!(
                    VarlenaHeader::parse(raw, 0),
                    Some(VarlenaHeader::Short { .. } | VarlenaHeader::External { .. })
                );
                if !one_byte {
                    out.resize(attr.attalign.align(out.len()), 0);
                }
                out.extend_from_slice(raw);
            }
            Value::CString(s) => {
                out.extend_from_slice(s.as_bytes());
                out.push(0);
            }
        }
    }
    has_varlena
}

/// Null bitmap with a set bit for every present value.
fn null_bits(values: &[Value<'_>]) -> Vec<u8> {
    let mut bits = vec![0u8; bitmap_len(values.len())];
    for (i, value) in values.iter().enumerate() {
        if !matches!(value, Value::Null) {
            bits[i >> 3] |= 1 << (i & 0x07);
        }
    }
    bits
}

/// Heap tuple as `heap_form_tuple` builds it. `infomask2` flags such as
/// `HEAP_ONLY_TUPLE` are or-ed into the attribute count.
pub fn heap_tuple(desc: &TupleDesc, values: &[Value<'_>], infomask2: u16) -> Vec<u8> {
    let has_nulls = values.iter().any(|v| matches!(v, Value::Null));
    let mut hoff = SIZEOF_HEAP_TUPLE_HEADER;
    if has_nulls {
        hoff += bitmap_len(values.len());
    }
    let hoff = maxalign(hoff);

    let mut out = vec![0u8; hoff];
    let has_varlena = fill_data(desc, values, &mut out);

    let mut infomask = HEAP_XMIN_COMMITTED | HEAP_XMAX_INVALID;
    if has_nulls {
        infomask |= HEAP_HASNULL;
        let bits = null_bits(values);
        out[SIZEOF_HEAP_TUPLE_HEADER..SIZEOF_HEAP_TUPLE_HEADER + bits.len()]
            .copy_from_slice(&bits);
    }
    if has_varlena {
        infomask |= HEAP_HASVARLENA;
    }
    // frozen xmin
    out[0..4].copy_from_slice(&2u32.to_ne_bytes());
    let natts = (values.len() as u16 & HEAP_NATTS_MASK) | (infomask2 & !HEAP_NATTS_MASK);
    out[18..20].copy_from_slice(&natts.to_ne_bytes());
    out[20..22].copy_from_slice(&infomask.to_ne_bytes());
    out[22] = hoff as u8;
    out
}

fn write_index_header(out: &mut [u8], tid: ItemPointer, info: u16) {
    tid.write_to(&mut out[0..ItemPointer::SIZE]);
    out[6..8].copy_from_slice(&info.to_ne_bytes());
}

fn index_tuple_body(desc: &TupleDesc, values: &[Value<'_>]) -> (Vec<u8>, u16) {
    let has_nulls = values.iter().any(|v| matches!(v, Value::Null));
    let mut info = 0u16;
    if has_nulls {
        info |= INDEX_NULL_MASK;
    }
    let mut out = vec![0u8; index_data_offset(info)];
    if has_nulls {
        let bits = null_bits(values);
        out[SIZEOF_INDEX_TUPLE..SIZEOF_INDEX_TUPLE + bits.len()].copy_from_slice(&bits);
    }
    if fill_data(desc, values, &mut out) {
        info |= INDEX_VAR_MASK;
    }
    out.resize(maxalign(out.len()), 0);
    (out, info)
}

/// Leaf index tuple as `index_form_tuple` builds it.
pub fn index_tuple(tid: ItemPointer, desc: &TupleDesc, values: &[Value<'_>]) -> Vec<u8> {
    let (mut out, info) = index_tuple_body(desc, values);
    let info = info | (out.len() as u16 & INDEX_SIZE_MASK);
    write_index_header(&mut out, tid, info);
    out
}

/// Pivot tuple keeping the first `natts` key attributes of `values`, with
/// `downlink` as child block. `natts == 0` yields a minus-infinity item.
pub fn pivot_tuple(
    downlink: BlockNumber,
    desc: &TupleDesc,
    values: &[Value<'_>],
    natts: usize,
) -> Vec<u8> {
    let natts = natts.min(values.len());
    let (mut out, info) = index_tuple_body(desc, &values[..natts]);
    let info = info | INDEX_AM_RESERVED_BIT | (out.len() as u16 & INDEX_SIZE_MASK);
    let tid = ItemPointer {
        block: downlink,
        offset: natts as OffsetNumber,
    };
    write_index_header(&mut out, tid, info);
    out
}

/// Deduplicated leaf tuple carrying `tids` in its posting list.
pub fn posting_tuple(desc: &TupleDesc, values: &[Value<'_>], tids: &[ItemPointer]) -> Vec<u8> {
    let (mut out, info) = index_tuple_body(desc, values);
    let list_off = out.len();
    for tid in tids {
        let pos = out.len();
        out.resize(pos + ItemPointer::SIZE, 0);
        tid.write_to(&mut out[pos..]);
    }
    out.resize(maxalign(out.len()), 0);
    let info = info | INDEX_AM_RESERVED_BIT | (out.len() as u16 & INDEX_SIZE_MASK);
    write_index_header(&mut out, posting_tid(list_off, tids.len()), info);
    out
}
