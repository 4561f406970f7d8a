#![allow(dead_code)]

use storage::attr::{Align, AttrMeta, TupleDesc};
use storage::fixture::{btree_meta_page, heap_tuple, index_tuple, PageBuilder, Value};
use storage::nbtree::{BtPageOpaque, BTP_LEAF, BTP_ROOT};
use storage::page::ItemPointer;
use verify::offline::{BlockStore, StaticCatalog};
use verify::relation::AccessMethod;

pub const TABLE: u32 = 16384;
pub const INDEX: u32 = 16390;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

pub fn table_desc() -> TupleDesc {
    TupleDesc::new(vec![
        AttrMeta::fixed("id", 4, Align::Int),
        AttrMeta::varlena("name", Align::Int),
    ])
}

pub fn index_desc() -> TupleDesc {
    TupleDesc::new(vec![AttrMeta::fixed("id", 4, Align::Int)])
}

/// Heap page with one row per id, named after the id.
pub fn heap_page(ids: std::ops::Range<i32>) -> Vec<u8> {
    let desc = table_desc();
    let mut builder = PageBuilder::heap();
    for id in ids {
        let key = id.to_ne_bytes();
        let name = format!("row {id}");
        builder.add_item(&heap_tuple(
            &desc,
            &[Value::Fixed(&key), Value::Varlena(name.as_bytes())],
            0,
        ));
    }
    builder.finish()
}

/// Two-block b-tree: the meta page and a single leaf root holding `tids`.
pub fn btree_blocks(tids: &[ItemPointer]) -> Vec<Vec<u8>> {
    let desc = index_desc();
    let mut leaf = PageBuilder::btree(BtPageOpaque {
        flags: BTP_LEAF | BTP_ROOT,
        ..Default::default()
    });
    for (n, tid) in tids.iter().enumerate() {
        let key = (n as i32).to_ne_bytes();
        leaf.add_item(&index_tuple(*tid, &desc, &[Value::Fixed(&key)]));
    }
    vec![btree_meta_page(1, 0), leaf.finish()]
}

/// TIDs of all rows of pages holding `rows_per_page[block]` rows each.
pub fn all_tids(rows_per_page: &[u16]) -> Vec<ItemPointer> {
    rows_per_page
        .iter()
        .enumerate()
        .flat_map(|(block, rows)| {
            (1..=*rows).map(move |offset| ItemPointer {
                block: block as u32,
                offset,
            })
        })
        .collect()
}

pub fn catalog(heap: Vec<Vec<u8>>, index: Option<Vec<Vec<u8>>>) -> StaticCatalog {
    let mut catalog = StaticCatalog::new();
    catalog.add_table(TABLE, "t", table_desc(), BlockStore::Memory(heap));
    if let Some(blocks) = index {
        catalog
            .add_index(
                INDEX,
                "t_id_idx",
                TABLE,
                AccessMethod::Btree,
                index_desc(),
                BlockStore::Memory(blocks),
            )
            .unwrap();
    }
    catalog
}
