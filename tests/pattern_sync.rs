mod util;

use pe_comm::algs::communicator::Communicator;
use pe_comm::comm_error::PeCommError;
use pe_comm::data::descriptor::TypedBufferDescriptor;
use pe_comm::data::storage::shared;
use pe_comm::pattern::{CommPattern, GlobalId, PatternConfig, Rank};
use util::{owner_value, random_assignment, run_ranks};

const GHOST: f64 = -1.0;

fn scalar_field(me: Rank, ids: &[GlobalId], owners: &[Rank]) -> Vec<f64> {
    ids.iter()
        .zip(owners)
        .map(|(&g, &o)| if o == me { owner_value(g) } else { GHOST })
        .collect()
}

#[test]
fn owner_values_reach_every_ghost() {
    let assignment = random_assignment(11, 4, 60, 0.35);
    let fields = run_ranks(4, |comm| {
        let me = comm.rank();
        let (ids, owners) = &assignment[me];
        let field = shared(scalar_field(me, ids, owners));
        let mut p =
            CommPattern::with_assignment(comm, PatternConfig::default(), ids, owners).unwrap();
        p.add_array("p", TypedBufferDescriptor::scalar::<f64>(), field.clone())
            .unwrap();
        p.build().unwrap();
        p.synchronize().unwrap();
        let out = field.read().clone();
        out
    });
    for (me, values) in fields.iter().enumerate() {
        let (ids, _) = &assignment[me];
        for (&g, &v) in ids.iter().zip(values) {
            assert_eq!(v, owner_value(g), "rank {me}, gid {g}");
        }
    }
}

#[test]
fn repeated_synchronize_is_idempotent() {
    let assignment = random_assignment(3, 3, 25, 0.5);
    let snapshots = run_ranks(3, |comm| {
        let me = comm.rank();
        let (ids, owners) = &assignment[me];
        let field = shared(scalar_field(me, ids, owners));
        let mut p =
            CommPattern::with_assignment(comm, PatternConfig::default(), ids, owners).unwrap();
        p.add_array("p", TypedBufferDescriptor::scalar::<f64>(), field.clone())
            .unwrap();
        p.build().unwrap();
        p.synchronize().unwrap();
        let once = field.read().clone();
        p.synchronize().unwrap();
        let twice = field.read().clone();
        (once, twice)
    });
    for (once, twice) in snapshots {
        assert_eq!(once, twice);
    }
}

#[test]
fn strided_tuples_leave_padding_alone() {
    // two ranks, each owning one id and ghosting the other's
    let assignment = [(vec![0u64, 1], vec![0usize, 1]), (vec![1, 0], vec![1, 0])];
    let results = run_ranks(2, |comm| {
        let me = comm.rank();
        let (ids, owners) = &assignment[me];
        // xyz + one padding slot per entry
        let mut values = vec![0.0f32; 8];
        for (slot, (&g, &o)) in ids.iter().zip(owners).enumerate() {
            let base = slot * 4;
            if o == me {
                values[base..base + 3].copy_from_slice(&[g as f32, 10.0 + g as f32, 20.0 + g as f32]);
            }
            values[base + 3] = 100.0 + me as f32;
        }
        let velocity = shared(values);
        let d = TypedBufferDescriptor::new(pe_comm::data::descriptor::ElementKind::F32, 3, 4)
            .unwrap();
        let mut p =
            CommPattern::with_assignment(comm, PatternConfig::default(), ids, owners).unwrap();
        p.add_array("velocity", d, velocity.clone()).unwrap();
        p.build().unwrap();
        p.synchronize().unwrap();
        let out = velocity.read().clone();
        out
    });
    assert_eq!(
        results[0],
        vec![0.0, 10.0, 20.0, 100.0, 1.0, 11.0, 21.0, 100.0]
    );
    assert_eq!(
        results[1],
        vec![1.0, 11.0, 21.0, 101.0, 0.0, 10.0, 20.0, 101.0]
    );
}

#[test]
fn several_arrays_of_different_kinds() {
    let assignment = random_assignment(5, 3, 20, 0.5);
    let results = run_ranks(3, |comm| {
        let me = comm.rank();
        let (ids, owners) = &assignment[me];
        let ints: Vec<i64> = ids
            .iter()
            .zip(owners)
            .map(|(&g, &o)| if o == me { -(g as i64) } else { i64::MAX })
            .collect();
        let flags: Vec<u8> = owners.iter().map(|&o| (o == me) as u8 * 7).collect();
        let a = shared(ints);
        let b = shared(flags);
        let mut p =
            CommPattern::with_assignment(comm, PatternConfig::default(), ids, owners).unwrap();
        p.add_array("b_flags", TypedBufferDescriptor::scalar::<u8>(), b.clone())
            .unwrap();
        p.add_array("a_ints", TypedBufferDescriptor::scalar::<i64>(), a.clone())
            .unwrap();
        assert_eq!(p.array_names().collect::<Vec<_>>(), vec!["a_ints", "b_flags"]);
        p.build().unwrap();
        p.synchronize().unwrap();
        let ints = a.read().clone();
        let flags = b.read().clone();
        (ids.clone(), ints, flags)
    });
    for (ids, ints, flags) in results {
        for (k, &g) in ids.iter().enumerate() {
            assert_eq!(ints[k], -(g as i64));
            assert_eq!(flags[k], 7);
        }
    }
}

#[test]
fn removed_array_is_not_touched() {
    let assignment = [(vec![0u64, 1], vec![0usize, 1]), (vec![1, 0], vec![1, 0])];
    let results = run_ranks(2, |comm| {
        let me = comm.rank();
        let (ids, owners) = &assignment[me];
        let kept = shared(scalar_field(me, ids, owners));
        let dropped = shared(scalar_field(me, ids, owners));
        let mut p =
            CommPattern::with_assignment(comm, PatternConfig::default(), ids, owners).unwrap();
        p.add_array("kept", TypedBufferDescriptor::scalar::<f64>(), kept.clone())
            .unwrap();
        p.add_array("dropped", TypedBufferDescriptor::scalar::<f64>(), dropped.clone())
            .unwrap();
        p.build().unwrap();
        assert!(p.remove_array("dropped"));
        p.synchronize().unwrap();
        let k = kept.read()[1];
        let d = dropped.read()[1];
        (k, d)
    });
    assert_eq!(results[0], (owner_value(1), GHOST));
    assert_eq!(results[1], (owner_value(0), GHOST));
}

#[test]
fn stale_pattern_is_rejected_by_default() {
    let errs = run_ranks(2, |comm| {
        let me = comm.rank() as u64;
        let mut p =
            CommPattern::with_assignment(comm, PatternConfig::default(), &[me], &[me as usize])
                .unwrap();
        p.synchronize().unwrap_err()
    });
    assert_eq!(errs, vec![PeCommError::PatternStale; 2]);
}

#[test]
fn auto_rebuild_follows_new_assignment() {
    let results = run_ranks(2, |comm| {
        let me = comm.rank();
        // start: each rank owns its own id only
        let mut p = CommPattern::with_assignment(
            comm,
            PatternConfig::auto_rebuild(),
            &[me as u64],
            &[me],
        )
        .unwrap();
        p.build().unwrap();

        // then both ranks hold both ids, all owned by rank 1
        let field = shared(if me == 1 { vec![5.0, 6.0] } else { vec![GHOST, GHOST] });
        p.set_assignment(&[0, 1], &[1, 1]).unwrap();
        p.add_array("f", TypedBufferDescriptor::scalar::<f64>(), field.clone())
            .unwrap();
        p.synchronize().unwrap();
        let out = field.read().clone();
        (p.is_up_to_date(), out)
    });
    for (up_to_date, values) in results {
        assert!(up_to_date);
        assert_eq!(values, vec![5.0, 6.0]);
    }
}

#[test]
fn resized_storage_is_caught_before_exchanging() {
    let errs = run_ranks(2, |comm| {
        let me = comm.rank();
        let field = shared(vec![1.0f64]);
        let mut p =
            CommPattern::with_assignment(comm, PatternConfig::default(), &[me as u64], &[me])
                .unwrap();
        p.add_array("f", TypedBufferDescriptor::scalar::<f64>(), field.clone())
            .unwrap();
        p.build().unwrap();
        field.write().push(2.0);
        p.synchronize().unwrap_err()
    });
    for e in errs {
        assert_eq!(
            e,
            PeCommError::SizeMismatch {
                name: "f".into(),
                expected: 1,
                found: 2
            }
        );
    }
}
