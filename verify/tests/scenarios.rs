mod support;

use storage::fixture::{btree_meta_page, heap_tuple, PageBuilder, Value};
use storage::heap::HEAP_HASNULL;
use storage::nbtree::{BtMeta, BTREE_VERSION};
use storage::page::{ItemId, LpFlags, Page};
use support::*;
use verify::driver::{check_index, check_table};
use verify::header::{check_header, PageState};
use verify::CheckConfig;

fn check_single_page(page: Vec<u8>) -> u32 {
    init_tracing();
    let catalog = catalog(vec![page], None);
    check_table(&catalog, &CheckConfig::default(), TABLE, false, false).unwrap()
}

#[test]
fn empty_header_with_item_outside_line_pointer_array() {
    let mut builder = PageBuilder::heap();
    let header = builder.header_mut();
    header.lower = 24;
    header.upper = 24;
    header.special = 24;
    // not announced by pd_lower, so never looked at
    builder.set_item_id(0, ItemId::new(8100, LpFlags::Normal, 100));
    assert_eq!(check_single_page(builder.finish()), 0);
}

#[test]
fn upper_past_special() {
    let mut builder = PageBuilder::heap();
    let header = builder.header_mut();
    header.upper = 200;
    header.special = 100;
    let buf = builder.finish();

    let page = Page::from_slice(&buf).unwrap();
    let report = check_header(page.header(), 0, &CheckConfig::default());
    assert!(report.errors >= 1);
    assert_eq!(report.state, PageState::Corrupted);
    assert_eq!(check_single_page(buf), report.errors);
}

#[test]
fn overlapping_items() {
    let desc = table_desc();
    let id = 7i32.to_ne_bytes();
    // 24 header + 4 id + 1 varlena header + 71 payload
    let tuple = heap_tuple(&desc, &[Value::Fixed(&id), Value::Varlena(&[b'x'; 71])], 0);
    assert_eq!(tuple.len(), 100);

    let mut builder = PageBuilder::heap();
    builder.header_mut().upper = 8000;
    builder.bytes_mut()[8000..8100].copy_from_slice(&tuple);
    builder.bytes_mut()[8050..8150].copy_from_slice(&tuple);
    builder.push_item_id(ItemId::new(8000, LpFlags::Normal, 100));
    builder.push_item_id(ItemId::new(8050, LpFlags::Normal, 100));
    assert_eq!(check_single_page(builder.finish()), 1);
}

#[test]
fn hasnull_without_any_null() {
    let desc = table_desc();
    let id = 7i32.to_ne_bytes();
    let mut tuple = heap_tuple(&desc, &[Value::Fixed(&id), Value::Varlena(b"seven")], 0);
    let infomask = u16::from_ne_bytes([tuple[20], tuple[21]]) | HEAP_HASNULL;
    tuple[20..22].copy_from_slice(&infomask.to_ne_bytes());
    tuple[23] = 0xFF;

    let mut builder = PageBuilder::heap();
    builder.add_item(&tuple);
    assert_eq!(check_single_page(builder.finish()), 1);
}

#[test]
fn meta_page_with_bad_magic() {
    init_tracing();
    let mut blocks = btree_blocks(&all_tids(&[2]));
    BtMeta {
        magic: 0xDEAD_BEEF,
        version: BTREE_VERSION,
        root: 1,
        level: 0,
        fastroot: 1,
        fastlevel: 0,
    }
    .write_to(&mut blocks[0]);
    let catalog = catalog(vec![heap_page(0..2)], Some(blocks));
    assert_eq!(
        check_index(&catalog, &CheckConfig::default(), INDEX).unwrap(),
        1
    );
}

#[test]
fn missing_index_entry() {
    init_tracing();
    let mut tids = all_tids(&[3, 3]);
    tids.remove(4);
    let catalog = catalog(
        vec![heap_page(0..3), heap_page(3..6)],
        Some(btree_blocks(&tids)),
    );
    assert_eq!(
        check_table(&catalog, &CheckConfig::default(), TABLE, true, true).unwrap(),
        1
    );
}

#[test]
fn initialized_pages_pass() {
    assert_eq!(check_single_page(PageBuilder::heap().finish()), 0);
    assert_eq!(check_single_page(vec![0; storage::BLCKSZ]), 0);

    let meta = btree_meta_page(1, 0);
    let page = Page::from_slice(&meta).unwrap();
    assert!(check_header(page.header(), 0, &CheckConfig::default()).is_valid());
}
