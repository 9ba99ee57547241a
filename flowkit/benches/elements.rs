use std::{net::Ipv4Addr, time::Duration};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pprof::criterion::{Output, PProfProfiler};
use rand::{seq::SliceRandom, Rng};

use flowkit::{
    packet::ip, AggregateFilter, AggregateFilterOptions, AggregateIPAddrPair, Discard, Packet,
    SplitTokenBucket, SplitTokenRate,
};

// Using jemalloc improves performance by ~10%
#[cfg(all(not(windows), not(target_env = "musl")))]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

const N_PACKETS: usize = 10_000;

fn token_bucket(c: &mut Criterion) {
    let mut group = c.benchmark_group("token_bucket");
    group.throughput(Throughput::Elements(N_PACKETS as u64));

    for rate in [1_000u32, 1_000_000] {
        let rate = SplitTokenRate::new(rate, rate / 100);
        group.bench_function(BenchmarkId::new("fill_remove", rate.rate()), |b| {
            b.iter(|| {
                let mut bucket = SplitTokenBucket::full(&rate, 0);
                let mut removed = 0;
                for epoch in 0..N_PACKETS as u64 {
                    bucket.fill(&rate, epoch);
                    removed += u32::from(bucket.remove_if(&rate, 1));
                }
                black_box(removed)
            });
        });
    }

    group.finish();
}

fn flow_table(c: &mut Criterion) {
    let _ = tracing_subscriber::fmt::try_init();

    let mut group = c.benchmark_group("aggregate_ipaddrpair");
    group.throughput(Throughput::Elements(N_PACKETS as u64));

    for hosts in [16u32, 4096] {
        let mut rng = rand::thread_rng();
        let packets: Vec<Packet> = (0..N_PACKETS)
            .map(|_| {
                let src = Ipv4Addr::from(0x0a00_0000 + rng.gen_range(0..hosts));
                let dst = Ipv4Addr::from(0x0a00_0000 + rng.gen_range(0..hosts));
                ip::ipv4(src, dst, &[0u8; 32])
            })
            .collect();

        group.bench_function(BenchmarkId::from_parameter(hosts), |b| {
            let mut agg = AggregateIPAddrPair::new();
            b.iter(|| {
                for p in &packets {
                    black_box(agg.simple_action(p.clone()));
                }
            });
        });
    }

    group.finish();
}

fn filter_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate_filter");
    group.throughput(Throughput::Elements(N_PACKETS as u64));

    let options = AggregateFilterOptions::default()
        .outputs(2)
        .pattern("allow 1-5000")
        .pattern("1 5001-10000 70000-80000")
        .pattern("drop 100000-110000");
    let mut filter =
        AggregateFilter::try_new(options).unwrap().connect(0, Discard).connect(1, Discard);

    let mut aggregates: Vec<u32> = (0..N_PACKETS as u32).map(|i| i * 13 % 120_000).collect();
    aggregates.shuffle(&mut rand::thread_rng());

    group.bench_function("lookup", |b| {
        b.iter(|| {
            for &agg in &aggregates {
                black_box(filter.lookup(agg));
            }
        });
    });

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_secs(1))
        .with_profiler(PProfProfiler::new(100, Output::Flamegraph(None)));
    targets = token_bucket, flow_table, filter_lookup
}

criterion_main!(benches);
