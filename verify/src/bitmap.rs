//! Dense bitmap of heap TIDs used to cross-check a table against its
//! indexes.
//!
//! Bit `page * MaxHeapTuplesPerPage + item` stands for heap TID
//! `(page, item + 1)`. The heap pass sets the TIDs an index entry is
//! expected to point to, the index pass sets the TIDs found on leaf pages,
//! and the two are compared bit by bit.

use crate::config::BitmapFormat;
use anyhow::{bail, Result};
use base64::{engine::general_purpose, Engine as _};
use bitvec::prelude::*;
use common::CheckError;
use std::fmt::Write as _;
use storage::heap::{HeapTupleHeader, MAX_HEAP_TUPLES_PER_PAGE};
use storage::nbtree::{BtPageOpaque, IndexTuple};
use storage::page::{LpFlags, Page};
use storage::BlockNumber;
use tracing::{trace, warn};

/// Bytes reserved for every page.
pub const BITMAP_BYTES_PER_PAGE: usize = MAX_HEAP_TUPLES_PER_PAGE.div_ceil(8);

/// Which side of the cross-check a bitmap was built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BitmapSource {
    Table,
    Index,
}

impl BitmapSource {
    fn as_str(&self) -> &'static str {
        match self {
            BitmapSource::Table => "table",
            BitmapSource::Index => "index",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ItemBitmap {
    source: BitmapSource,
    npages: BlockNumber,
    /// Number of items set per page.
    pages: Vec<u64>,
    data: BitVec<u8, Lsb0>,
}

#[inline]
fn bit_index(page: BlockNumber, item: usize) -> usize {
    page as usize * MAX_HEAP_TUPLES_PER_PAGE + item
}

impl ItemBitmap {
    /// Empty table bitmap covering `npages` heap blocks.
    pub fn new(npages: BlockNumber) -> Self {
        Self::with_source(npages, BitmapSource::Table)
    }

    fn with_source(npages: BlockNumber, source: BitmapSource) -> Self {
        let nbytes = npages as usize * BITMAP_BYTES_PER_PAGE;
        Self {
            source,
            npages,
            pages: vec![0; npages as usize],
            data: bitvec![u8, Lsb0; 0; nbytes * 8],
        }
    }

    /// Index bitmap with the same dimensions and no bits set.
    pub fn empty_copy(&self) -> Self {
        Self::with_source(self.npages, BitmapSource::Index)
    }

    /// Clear all bits and tallies, keeping the dimensions.
    pub fn reset(&mut self) {
        self.data.fill(false);
        self.pages.fill(0);
    }

    #[inline]
    pub fn npages(&self) -> BlockNumber {
        self.npages
    }

    #[inline]
    pub fn nbytes(&self) -> usize {
        self.data.len() / 8
    }

    #[inline]
    pub fn source(&self) -> BitmapSource {
        self.source
    }

    fn index_of(&self, page: BlockNumber, item: usize) -> Option<usize> {
        (page < self.npages && item < MAX_HEAP_TUPLES_PER_PAGE).then(|| bit_index(page, item))
    }

    /// Set the bit of `(page, item)`, `item` 0-based. Returns `false` when
    /// the position is outside the bitmap or the bit was already set.
    pub fn set(&mut self, page: BlockNumber, item: usize) -> bool {
        let Some(idx) = self.index_of(page, item) else {
            return false;
        };
        if self.data[idx] {
            return false;
        }
        self.data.set(idx, true);
        self.pages[page as usize] += 1;
        true
    }

    /// Bit of `(page, item)`, `false` outside the bitmap.
    pub fn get(&self, page: BlockNumber, item: usize) -> bool {
        self.index_of(page, item)
            .is_some_and(|idx| self.data[idx])
    }

    /// Number of bits set.
    pub fn count(&self) -> u64 {
        self.data.count_ones() as u64
    }

    /// Number of items tracked on `page`.
    pub fn page_tally(&self, page: BlockNumber) -> u64 {
        self.pages.get(page as usize).copied().unwrap_or(0)
    }

    /// Add the TIDs of a heap page an index is expected to reference: every
    /// line pointer except unused ones, redirect targets and heap-only
    /// tuples. Redirect stubs themselves stay in, they are the HOT chain
    /// heads the index points to.
    pub fn add_heap_items(&mut self, page: &Page<'_>, block: BlockNumber) -> u32 {
        let ntuples = page.max_offset().min(MAX_HEAP_TUPLES_PER_PAGE);
        let mut add = [true; MAX_HEAP_TUPLES_PER_PAGE];
        let mut errors = 0;

        // redirect targets may be heap-only tuples themselves, so all
        // exclusions are collected before anything is set
        for (item, lp) in page.item_ids().take(ntuples) {
            match lp.flags {
                LpFlags::Unused => add[item] = false,
                LpFlags::Redirect => {
                    if let Some(target) = (lp.off as usize).checked_sub(1) {
                        if target < ntuples {
                            add[target] = false;
                        }
                    }
                }
                LpFlags::Normal | LpFlags::Dead => {}
            }
        }

        for (item, lp) in page.item_ids().take(ntuples) {
            if !lp.has_storage() {
                continue;
            }
            let heap_only = page
                .item(&lp)
                .and_then(HeapTupleHeader::parse)
                .is_some_and(|t| t.is_heap_only());
            if heap_only {
                add[item] = false;
            }
        }

        for (item, _) in add.iter().enumerate().take(ntuples).filter(|(_, a)| **a) {
            if !self.set(block, item) {
                warn!(
                    "[{block}:{}] cannot add item to the table bitmap ({} pages)",
                    item + 1,
                    self.npages
                );
                errors += 1;
            }
        }

        errors
    }

    /// Add the heap TIDs referenced from a b-tree leaf page. Entries
    /// pointing outside the table or at a TID already referenced are
    /// counted as errors.
    pub fn add_btree_leaf_items(
        &mut self,
        page: &Page<'_>,
        opaque: &BtPageOpaque,
        block: BlockNumber,
    ) -> u32 {
        let first = opaque.first_data_key() as usize;
        let mut errors = 0;

        for (i, lp) in page.item_ids() {
            let offnum = i + 1;
            if offnum < first || lp.flags != LpFlags::Normal {
                continue;
            }
            let Some(tuple) = page.item(&lp).and_then(IndexTuple::parse) else {
                continue;
            };
            for tid in tuple.heap_tids() {
                trace!(
                    "[{block}:{offnum}] index entry points to ({},{})",
                    tid.block,
                    tid.offset
                );
                let Some(item) = (tid.offset as usize).checked_sub(1) else {
                    warn!(
                        "[{block}:{offnum}] index entry points to invalid heap TID ({},{})",
                        tid.block, tid.offset
                    );
                    errors += 1;
                    continue;
                };
                if self.index_of(tid.block, item).is_none() {
                    warn!(
                        "[{block}:{offnum}] index entry points to ({},{}) outside the table ({} pages)",
                        tid.block, tid.offset, self.npages
                    );
                    errors += 1;
                } else if !self.set(tid.block, item) {
                    warn!(
                        "[{block}:{offnum}] heap tuple ({},{}) is referenced by more than one index entry",
                        tid.block, tid.offset
                    );
                    errors += 1;
                }
            }
        }

        errors
    }

    /// Number of positions where `a` and `b` differ. Every mismatch is
    /// reported with the side it is missing from.
    pub fn compare(a: &ItemBitmap, b: &ItemBitmap) -> Result<u64> {
        if a.npages != b.npages {
            bail!(CheckError::BitmapMismatch(a.npages, b.npages));
        }

        let mut ndiff = 0;
        let bytes = a.data.as_raw_slice().iter().zip(b.data.as_raw_slice());
        for (byte, (x, y)) in bytes.enumerate() {
            let diff = x ^ y;
            if diff == 0 {
                continue;
            }
            for bit in (0..8).filter(|bit| diff & (1 << bit) != 0) {
                let idx = byte * 8 + bit;
                let block = idx / MAX_HEAP_TUPLES_PER_PAGE;
                let item = idx % MAX_HEAP_TUPLES_PER_PAGE;
                let missing = if x & (1 << bit) != 0 { b } else { a };
                warn!(
                    "bitmap mismatch of [{block},{}]: missing in the {}",
                    item + 1,
                    missing.source.as_str()
                );
                ndiff += 1;
            }
        }

        Ok(ndiff)
    }

    /// One-line description of the bitmap, data encoded per `format`.
    pub fn dump(&self, format: BitmapFormat) -> String {
        let pages = self
            .pages
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mut out = format!(
            "{} bitmap nbytes={} nbits={} npages={} pages=[{}]",
            self.source.as_str(),
            self.nbytes(),
            self.count(),
            self.npages,
            pages
        );
        let data = match format {
            BitmapFormat::None => return out,
            BitmapFormat::Base64 => general_purpose::STANDARD.encode(self.data.as_raw_slice()),
            BitmapFormat::Hex => {
                self.data
                    .as_raw_slice()
                    .iter()
                    .fold(String::new(), |mut acc, b| {
                        let _ = write!(acc, "{b:02x}");
                        acc
                    })
            }
            BitmapFormat::Binary => self
                .data
                .iter()
                .by_vals()
                .map(|bit| if bit { '1' } else { '0' })
                .collect(),
        };
        let _ = write!(out, " data=[{data}]");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::attr::{Align, AttrMeta, TupleDesc};
    use storage::fixture::{heap_tuple, index_tuple, posting_tuple, PageBuilder, Value};
    use storage::heap::{HEAP_HOT_UPDATED, HEAP_ONLY_TUPLE};
    use storage::nbtree::{BTP_LEAF, BTP_ROOT};
    use storage::page::{ItemId, ItemPointer};

    fn desc() -> TupleDesc {
        TupleDesc::new(vec![AttrMeta::fixed("id", 4, Align::Int)])
    }

    #[test]
    fn dimensions() {
        let bitmap = ItemBitmap::new(3);
        assert_eq!(BITMAP_BYTES_PER_PAGE, 37);
        assert_eq!(bitmap.nbytes(), 3 * 37);
        assert_eq!(bitmap.count(), 0);
        assert_eq!(bitmap.empty_copy().npages(), 3);
    }

    #[test]
    fn set_and_get() {
        let mut bitmap = ItemBitmap::new(2);
        assert!(bitmap.set(1, 290));
        assert!(!bitmap.set(1, 290));
        assert!(!bitmap.set(2, 0));
        assert!(!bitmap.set(0, MAX_HEAP_TUPLES_PER_PAGE));
        assert!(bitmap.get(1, 290));
        assert!(!bitmap.get(0, 290));
        assert_eq!(bitmap.count(), 1);
        assert_eq!(bitmap.page_tally(1), 1);
        bitmap.reset();
        assert_eq!(bitmap.count(), 0);
        assert_eq!(bitmap.page_tally(1), 0);
    }

    #[test]
    fn heap_items_skip_hot_chain_members() {
        let desc = desc();
        let v = 1i32.to_ne_bytes();
        let mut builder = PageBuilder::heap();
        // 1: redirect to 3, 2: regular tuple, 3: heap-only tuple,
        // 4: unused, 5: HOT-updated root with heap-only 6
        builder.push_item_id(ItemId::new(3, LpFlags::Redirect, 0));
        builder.add_item(&heap_tuple(&desc, &[Value::Fixed(&v)], 0));
        builder.add_item(&heap_tuple(&desc, &[Value::Fixed(&v)], HEAP_ONLY_TUPLE));
        builder.push_item_id(ItemId::new(0, LpFlags::Unused, 0));
        builder.add_item(&heap_tuple(&desc, &[Value::Fixed(&v)], HEAP_HOT_UPDATED));
        builder.add_item(&heap_tuple(&desc, &[Value::Fixed(&v)], HEAP_ONLY_TUPLE));
        let buf = builder.finish();
        let page = Page::from_slice(&buf).unwrap();

        let mut bitmap = ItemBitmap::new(1);
        assert_eq!(bitmap.add_heap_items(&page, 0), 0);
        let set: Vec<_> = (0..6).filter(|i| bitmap.get(0, *i)).collect();
        assert_eq!(set, vec![0, 1, 4]);
        assert_eq!(bitmap.count(), bitmap.page_tally(0));
    }

    #[test]
    fn leaf_items_and_posting_lists() {
        let desc = desc();
        let v = 1i32.to_ne_bytes();
        let tid = |block, offset| ItemPointer { block, offset };
        let mut builder = PageBuilder::btree(BtPageOpaque {
            flags: BTP_LEAF | BTP_ROOT,
            ..Default::default()
        });
        builder.add_item(&index_tuple(tid(0, 1), &desc, &[Value::Fixed(&v)]));
        builder.add_item(&posting_tuple(&desc, &[Value::Fixed(&v)], &[tid(0, 2), tid(1, 5)]));
        // duplicate and out of range
        builder.add_item(&index_tuple(tid(0, 2), &desc, &[Value::Fixed(&v)]));
        builder.add_item(&index_tuple(tid(7, 1), &desc, &[Value::Fixed(&v)]));
        let buf = builder.finish();
        let page = Page::from_slice(&buf).unwrap();
        let opaque = BtPageOpaque::parse(page.special().unwrap()).unwrap();

        let mut bitmap = ItemBitmap::new(2).empty_copy();
        assert_eq!(bitmap.add_btree_leaf_items(&page, &opaque, 1), 2);
        assert!(bitmap.get(0, 0));
        assert!(bitmap.get(0, 1));
        assert!(bitmap.get(1, 4));
        assert_eq!(bitmap.count(), 3);
    }

    #[test]
    fn high_key_is_skipped() {
        let desc = desc();
        let v = 1i32.to_ne_bytes();
        let mut builder = PageBuilder::btree(BtPageOpaque {
            next: 2,
            flags: BTP_LEAF,
            ..Default::default()
        });
        builder.add_item(&index_tuple(ItemPointer { block: 0, offset: 1 }, &desc, &[Value::Fixed(&v)]));
        builder.add_item(&index_tuple(ItemPointer { block: 0, offset: 2 }, &desc, &[Value::Fixed(&v)]));
        let buf = builder.finish();
        let page = Page::from_slice(&buf).unwrap();
        let opaque = BtPageOpaque::parse(page.special().unwrap()).unwrap();

        let mut bitmap = ItemBitmap::new(1);
        assert_eq!(bitmap.add_btree_leaf_items(&page, &opaque, 1), 0);
        assert!(!bitmap.get(0, 0));
        assert!(bitmap.get(0, 1));
    }

    #[test]
    fn compare_is_symmetric() {
        let mut a = ItemBitmap::new(2);
        let mut b = a.empty_copy();
        a.set(0, 3);
        a.set(1, 7);
        b.set(1, 7);
        b.set(1, 8);
        assert_eq!(ItemBitmap::compare(&a, &a).unwrap(), 0);
        assert_eq!(ItemBitmap::compare(&a, &b).unwrap(), 2);
        assert_eq!(ItemBitmap::compare(&b, &a).unwrap(), 2);

        let c = ItemBitmap::new(3);
        let err = ItemBitmap::compare(&a, &c).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CheckError>(),
            Some(CheckError::BitmapMismatch(2, 3))
        ));
    }

    #[test]
    fn dump_formats() {
        let mut bitmap = ItemBitmap::new(1);
        bitmap.set(0, 0);
        bitmap.set(0, 9);
        let binary = bitmap.dump(BitmapFormat::Binary);
        assert!(binary.starts_with("table bitmap nbytes=37 nbits=2 npages=1 pages=[2] data=[1000000001"));
        let hex = bitmap.dump(BitmapFormat::Hex);
        assert!(hex.contains("data=[0102"));
        let b64 = bitmap.dump(BitmapFormat::Base64);
        assert!(b64.contains("data=[AQI"));
        assert!(!bitmap.dump(BitmapFormat::None).contains("data="));
    }
}
