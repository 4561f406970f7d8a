use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use storage::attr::{Align, AttrMeta, TupleDesc};
use storage::fixture::{heap_tuple, PageBuilder, Value};
use storage::page::{Page, ITEM_ID_SIZE, SIZE_OF_PAGE_HEADER};
use storage::{maxalign, BLCKSZ};
use verify::bitmap::ItemBitmap;
use verify::heap::check_heap_tuples;

fn full_heap_page(desc: &TupleDesc) -> Vec<u8> {
    let mut builder = PageBuilder::heap();
    let mut free = BLCKSZ - SIZE_OF_PAGE_HEADER;
    for id in 0i32.. {
        let key = id.to_ne_bytes();
        let name = format!("name {id}");
        let tuple = heap_tuple(
            desc,
            &[Value::Fixed(&key), Value::Varlena(name.as_bytes())],
            0,
        );
        let need = maxalign(tuple.len()) + ITEM_ID_SIZE;
        if need > free {
            break;
        }
        free -= need;
        builder.add_item(&tuple);
    }
    builder.finish()
}

fn bench_heap_page(c: &mut Criterion) {
    let desc = TupleDesc::new(vec![
        AttrMeta::fixed("id", 4, Align::Int),
        AttrMeta::varlena("name", Align::Int),
    ]);
    let buf = full_heap_page(&desc);
    let page = Page::from_slice(&buf).unwrap();

    let mut group = c.benchmark_group("heap_page");
    group.throughput(Throughput::Bytes(BLCKSZ as u64));
    group.bench_function("check_heap_tuples", |b| {
        b.iter(|| black_box(check_heap_tuples(&desc, black_box(&page), 0)))
    });
    group.bench_function("add_heap_items", |b| {
        let mut bitmap = ItemBitmap::new(1);
        b.iter(|| {
            bitmap.reset();
            black_box(bitmap.add_heap_items(black_box(&page), 0))
        })
    });
    group.finish();
}

criterion_group!(benches, bench_heap_page);
criterion_main!(benches);
