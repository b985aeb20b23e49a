use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use eipwatch::{FailureDetector, Member, NicId, Payload, PeerRegistry, elect, evaluate};
use std::hint::black_box;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

fn codec_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    let payload = Payload::new(10, Ipv4Addr::new(192, 0, 2, 10), NicId::from_u128(0x1128bd56));
    let encoded = payload.encode();

    group.bench_function("encode", |b| b.iter(|| black_box(payload.encode())));
    group.bench_function("decode", |b| {
        b.iter(|| black_box(Payload::decode(black_box(&encoded))))
    });
    group.bench_function("decode_bad_length", |b| {
        b.iter(|| black_box(Payload::decode(black_box(&encoded[..20]))))
    });

    group.finish();
}

fn election_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("election");

    for size in [2u8, 16, 128] {
        let priorities: Vec<u8> = (0..size).map(|i| 20 + i % 200).collect();
        group.bench_with_input(BenchmarkId::new("elect", size), &priorities, |b, p| {
            b.iter(|| black_box(elect(10, p.iter().copied())))
        });
    }

    let rt = tokio::runtime::Runtime::new().unwrap();
    for size in [2u8, 16, 128] {
        let registry = PeerRegistry::new(Ipv4Addr::UNSPECIFIED);
        let now = Instant::now();
        rt.block_on(async {
            for i in 0..size {
                let addr = Ipv4Addr::new(127, 0, 1, i);
                registry
                    .insert(Member {
                        addr: SocketAddrV4::new(addr, 12345),
                        nic_id: NicId::from_u128(i as u128),
                    })
                    .await
                    .unwrap();
                registry.upsert(addr, 20 + i, NicId::from_u128(i as u128), now).await;
            }
        });

        let detector = FailureDetector::new(Duration::from_secs(1), 3);
        group.bench_with_input(BenchmarkId::new("evaluate", size), &registry, |b, registry| {
            b.iter(|| {
                rt.block_on(async {
                    let peers = registry.read().await;
                    black_box(evaluate(now, 10, &peers, &detector))
                })
            })
        });
    }

    group.finish();
}

criterion_group!(benches, codec_benchmark, election_benchmark);
criterion_main!(benches);
