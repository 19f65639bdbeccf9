use std::time::{Duration, Instant};

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use pe_comm::algs::communicator::{Communicator, LocalComm};
use pe_comm::data::descriptor::TypedBufferDescriptor;
use pe_comm::data::storage::shared;
use pe_comm::pattern::{CommPattern, GlobalId, PatternConfig, Rank};

const RANKS: usize = 4;

/// Block decomposition of `n` ids with `halo` ghosts borrowed from each
/// neighbouring block.
fn block_assignment(n: u64, halo: u64) -> Vec<(Vec<GlobalId>, Vec<Rank>)> {
    let block = n / RANKS as u64;
    let owner = |g: u64| ((g / block) as usize).min(RANKS - 1);
    (0..RANKS)
        .map(|r| {
            let lo = (r as u64 * block).saturating_sub(halo);
            let hi = if r == RANKS - 1 { n } else { ((r as u64 + 1) * block + halo).min(n) };
            let ids: Vec<GlobalId> = (lo..hi).collect();
            let owners = ids.iter().map(|&g| owner(g)).collect();
            (ids, owners)
        })
        .collect()
}

/// Time `iters` synchronize calls on every rank; report the slowest rank.
fn run_sync(assignment: &[(Vec<GlobalId>, Vec<Rank>)], arity: usize, iters: u64) -> Duration {
    let group = LocalComm::group(RANKS);
    std::thread::scope(|s| {
        let handles: Vec<_> = group
            .into_iter()
            .map(|comm| {
                s.spawn(move || {
                    let me = comm.rank();
                    let (ids, owners) = &assignment[me];
                    let mut rng = SmallRng::seed_from_u64(me as u64);
                    let values: Vec<f64> = (0..ids.len() * arity).map(|_| rng.r#gen()).collect();
                    let field = shared(values);
                    let mut p =
                        CommPattern::with_assignment(comm, PatternConfig::default(), ids, owners)
                            .unwrap();
                    let d = TypedBufferDescriptor::tuple::<f64>(arity).unwrap();
                    p.add_array("u", d, field).unwrap();
                    p.build().unwrap();
                    let start = Instant::now();
                    for _ in 0..iters {
                        p.synchronize().unwrap();
                    }
                    start.elapsed()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .max()
            .unwrap_or_default()
    })
}

fn bench_synchronize(c: &mut Criterion) {
    let mut group = c.benchmark_group("synchronize");
    for &(n, halo) in &[(10_000u64, 64u64), (100_000, 512)] {
        let assignment = block_assignment(n, halo);
        for &arity in &[1usize, 3] {
            group.bench_with_input(
                BenchmarkId::new(format!("n{n}_halo{halo}"), arity),
                &arity,
                |b, &arity| b.iter_custom(|iters| run_sync(&assignment, arity, iters)),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_synchronize);
criterion_main!(benches);
