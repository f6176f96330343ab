use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use tempfile::NamedTempFile;
use ipproxydb::{LoadOptions, ProxyDatabase};

/// 100k contiguous /24 ranges
fn build_database() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for i in 0..100_000u32 {
        let from = i * 256;
        writeln!(file, "\"{}\",\"{}\",\"PUB\",\"US\",\"United States of America\"", from, from + 255).unwrap();
    }
    file.flush().unwrap();
    file
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    let file = build_database();

    for memory_mapped in [false, true] {
        let name = if memory_mapped { "lookup_mmap" } else { "lookup_heap" };
        group.bench_function(name, |b| {
            let db = ProxyDatabase::open(file.path(), LoadOptions { memory_mapped }).unwrap();

            let mut counter = 0u32;
            b.iter(|| {
                let addr = IpAddr::V4(Ipv4Addr::from(counter.wrapping_mul(7919) % (100_000 * 256)));
                black_box(db.lookup(addr));
                counter = counter.wrapping_add(1);
            });
        });
    }

    group.finish();
}

fn bench_open(c: &mut Criterion) {
    let mut group = c.benchmark_group("open");
    group.sample_size(10);

    let file = build_database();
    group.bench_function("open_100k_ranges", |b| {
        b.iter(|| {
            black_box(ProxyDatabase::open(file.path(), LoadOptions::default()).unwrap());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_lookup, bench_open);
criterion_main!(benches);
