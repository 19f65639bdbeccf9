#![allow(dead_code)]
use pe_comm::algs::communicator::LocalComm;
use pe_comm::pattern::{GlobalId, Rank};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Run `f` on every rank of a fresh `n`-rank group, one thread per rank.
/// Results come back in rank order.
pub fn run_ranks<R, F>(n: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(LocalComm) -> R + Sync,
{
    let group = LocalComm::group(n);
    std::thread::scope(|s| {
        let handles: Vec<_> = group
            .into_iter()
            .map(|comm| {
                let f = &f;
                s.spawn(move || f(comm))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

/// Assert vec is a permutation of another vec (order-agnostic).
pub fn assert_permutation<T: Ord + Copy + std::fmt::Debug>(got: &[T], want: &[T]) {
    let mut a = got.to_vec();
    a.sort_unstable();
    let mut b = want.to_vec();
    b.sort_unstable();
    assert_eq!(a, b, "not a permutation\n got={:?}\nwant={:?}", got, want);
}

/// A valid random decomposition of `0..n_ids` over `n_ranks` ranks.
///
/// Every id gets one random owner that holds it; each other rank also holds
/// it as a ghost with probability `ghost_p`. Local orders are shuffled.
pub fn random_assignment(
    seed: u64,
    n_ranks: usize,
    n_ids: u64,
    ghost_p: f64,
) -> Vec<(Vec<GlobalId>, Vec<Rank>)> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut per_rank: Vec<Vec<(GlobalId, Rank)>> = vec![Vec::new(); n_ranks];
    for gid in 0..n_ids {
        let owner = rng.gen_range(0..n_ranks);
        for (r, local) in per_rank.iter_mut().enumerate() {
            if r == owner || rng.gen_bool(ghost_p) {
                local.push((gid, owner));
            }
        }
    }
    per_rank
        .into_iter()
        .map(|mut local| {
            local.shuffle(&mut rng);
            local.into_iter().unzip()
        })
        .collect()
}

/// Value an owner stores for `gid` in test arrays.
pub fn owner_value(gid: GlobalId) -> f64 {
    gid as f64 * 1.5 + 0.25
}
