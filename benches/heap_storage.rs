//! Heap storage benchmarks: slotted page record churn and heap table insert/scan.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use heapdb::{
    page::SlottedPage, ColumnDefinition, DbRelation, HeapTable, MemoryBlockStore, Row, Value,
};

fn bench_row(i: i32) -> Row {
    Row::from([
        ("id".to_string(), Value::Int(i)),
        ("name".to_string(), Value::Text(format!("user{i}"))),
        ("age".to_string(), Value::Int(20 + i % 50)),
    ])
}

fn bench_table() -> HeapTable {
    let columns = vec![
        ColumnDefinition::int("id"),
        ColumnDefinition::text("name"),
        ColumnDefinition::int("age"),
    ];
    let mut table = HeapTable::new("bench_table", columns, Arc::new(MemoryBlockStore::new()));
    table.create().unwrap();
    table
}

/// Fill a page with small records until it runs out of room.
fn bench_page_fill(c: &mut Criterion) {
    c.bench_function("page/fill", |b| {
        b.iter(|| {
            let mut page = SlottedPage::new(1);
            let mut count = 0;
            while page.add(b"a small record").is_ok() {
                count += 1;
            }
            black_box(count)
        });
    });
}

/// Grow and shrink the first record of a full page, forcing every other record to slide.
fn bench_page_resize(c: &mut Criterion) {
    let mut page = SlottedPage::new(1);
    while page.available() > 64 {
        page.add(b"0123456789").unwrap();
    }
    let short = vec![b's'; 4];
    let long = vec![b'l'; 40];

    c.bench_function("page/resize_first_record", |b| {
        b.iter(|| {
            page.put(1, &long).unwrap();
            page.put(1, &short).unwrap();
            black_box(page.available())
        });
    });
}

fn bench_table_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("heap_table/insert");

    for size in [100, 1_000, 10_000].iter() {
        let rows: Vec<Row> = (0..*size).map(bench_row).collect();

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut table = bench_table();
                for row in &rows {
                    table.insert(row).unwrap();
                }
                black_box(table)
            });
        });
    }

    group.finish();
}

fn bench_table_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("heap_table/scan");

    for size in [100, 1_000, 10_000].iter() {
        let mut table = bench_table();
        for i in 0..*size {
            table.insert(&bench_row(i)).unwrap();
        }

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut total = 0i64;
                for handle in table.select().unwrap() {
                    let row = table.project(handle).unwrap();
                    total += row["age"].as_int().unwrap_or(0) as i64;
                }
                black_box(total)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_page_fill,
    bench_page_resize,
    bench_table_insert,
    bench_table_scan
);
criterion_main!(benches);
