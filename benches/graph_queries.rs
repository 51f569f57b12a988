//! Benchmark suite for shard queries on the walk hot path

use std::net::Ipv4Addr;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rwfleet::{EdgeRecord, GraphStore, PartitionedGraph};

const HOST_A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const HOST_B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

fn create_edges(vertex_count: u32, edge_count: usize) -> Vec<EdgeRecord> {
    let mut rng = StdRng::seed_from_u64(17);
    (0..edge_count)
        .map(|_| {
            let dst = rng.gen_range(0..vertex_count * 2);
            let owner = if dst < vertex_count { HOST_A } else { HOST_B };
            EdgeRecord::new(rng.gen_range(0..vertex_count), dst, owner)
        })
        .collect()
}

fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");

    for size in [1_000, 10_000, 100_000] {
        let edges = create_edges(size / 10, size as usize);
        group.bench_with_input(BenchmarkId::from_parameter(size), &edges, |b, edges| {
            b.iter(|| {
                PartitionedGraph::from_edges(edges.iter().copied(), HOST_A, (size / 5) as usize)
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_neighbor_at(c: &mut Criterion) {
    let graph = PartitionedGraph::from_edges(create_edges(10_000, 200_000), HOST_A, 20_000).unwrap();
    let vertices = graph.my_vertices();
    let mut rng = StdRng::seed_from_u64(3);

    c.bench_function("neighbor_at", |b| {
        b.iter(|| {
            let v = vertices[rng.gen_range(0..vertices.len())];
            let degree = graph.degree_of(v).unwrap();
            let idx = rng.gen_range(0..degree);
            black_box(graph.neighbor_at(v, idx, &mut rng).unwrap())
        });
    });
}

fn bench_neighbor_rank(c: &mut Criterion) {
    let graph = PartitionedGraph::from_edges(create_edges(10_000, 200_000), HOST_A, 20_000).unwrap();
    let vertices = graph.my_vertices();
    let mut rng = StdRng::seed_from_u64(5);

    c.bench_function("neighbor_rank", |b| {
        b.iter(|| {
            let u = vertices[rng.gen_range(0..vertices.len())];
            let v = rng.gen_range(0..20_000);
            black_box(graph.neighbor_rank(u, v).unwrap())
        });
    });
}

criterion_group!(benches, bench_ingest, bench_neighbor_at, bench_neighbor_rank);
criterion_main!(benches);
