//! Universe buffer write throughput: a full 512-channel universe updated
//! every tick must stay far cheaper than the refresh interval it shares
//! with the actual UDP send.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dmx_engine::{ArtNetNode, ByteOrder};

fn bench_universe_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("universe_writes");

    group.bench_function("set_values_single_channel", |b| {
        let node = ArtNetNode::new("127.0.0.1", 6454);
        let universe = node.add_universe(0).unwrap();
        let channel = universe.add_channel(1, 1, "dimmer", 1, ByteOrder::Little).unwrap();

        let mut v = 0.0;
        b.iter(|| {
            v = if v >= 255.0 { 0.0 } else { v + 1.0 };
            channel.set_values(black_box(&[v])).unwrap();
        });
    });

    group.bench_function("set_values_full_512_universe", |b| {
        let node = ArtNetNode::new("127.0.0.1", 6454);
        let universe = node.add_universe(1).unwrap();
        let channels: Vec<_> = (1..=512u16)
            .map(|start| universe.add_channel(start, 1, "", 1, ByteOrder::Little).unwrap())
            .collect();

        b.iter(|| {
            for channel in &channels {
                channel.set_values(black_box(&[128.0])).unwrap();
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_universe_writes);
criterion_main!(benches);
