mod util;

use std::collections::BTreeSet;

use kernel_filter_exchange::algs::communicator::Communicator;
use kernel_filter_exchange::algs::exchanger::{ParallelExchanger, SharedPairs};
use kernel_filter_exchange::filter_error::FilterError;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use util::run_ranks;

/// Rank 0 holds 4 points, rank 1 holds 3; rank 0's points 2 and 3 are rank
/// 1's points 0 and 1.
fn two_rank_pairs(rank: usize) -> (usize, SharedPairs) {
    if rank == 0 {
        (4, SharedPairs::from([(1, vec![(2, 0), (3, 1)])]))
    } else {
        (3, SharedPairs::from([(0, vec![(0, 2), (1, 3)])]))
    }
}

#[test]
fn two_rank_ownership_and_lists() {
    let out = run_ranks(2, |comm| {
        let (n, pairs) = two_rank_pairs(comm.rank());
        let e = ParallelExchanger::build(comm, n, &pairs).unwrap();
        (
            e.ownership_codes(),
            e.local_contracted_indexes().to_vec(),
            e.send_list(1 - comm.rank()).to_vec(),
            e.recv_list(1 - comm.rank()).to_vec(),
        )
    });
    assert_eq!(out[0], (vec![0, 0, 1, 1], vec![0, 1, 2, 3], vec![2, 3], vec![]));
    assert_eq!(out[1], (vec![-2, -2, 0], vec![2], vec![], vec![0, 1]));
}

#[test]
fn expansion_fills_ghosts_from_owner() {
    let out = run_ranks(2, |comm| {
        let (n, pairs) = two_rank_pairs(comm.rank());
        let e = ParallelExchanger::build(comm, n, &pairs).unwrap();
        let compact: Vec<f64> = if comm.rank() == 0 {
            vec![10.0, 11.0, 12.0, 13.0]
        } else {
            vec![20.0]
        };
        let mut full = vec![-1.0; n];
        e.expansion(comm, &compact, &mut full).unwrap();
        full
    });
    assert_eq!(out[0], vec![10.0, 11.0, 12.0, 13.0]);
    assert_eq!(out[1], vec![12.0, 13.0, 20.0]);
}

#[test]
fn consistent_vector_has_zero_parallel_error() {
    let out = run_ranks(2, |comm| {
        let (n, pairs) = two_rank_pairs(comm.rank());
        let e = ParallelExchanger::build(comm, n, &pairs).unwrap();
        let values = if comm.rank() == 0 {
            vec![1.0, 2.0, 3.0, 4.0]
        } else {
            vec![3.0, 4.0, 7.0]
        };
        e.get_maximum_absolute_parallel_error(comm, &values).unwrap()
    });
    assert_eq!(out, vec![0.0, 0.0]);
}

#[test]
fn swapped_receive_list_is_detected() {
    let out = run_ranks(2, |comm| {
        let (n, pairs) = two_rank_pairs(comm.rank());
        let mut parts = ParallelExchanger::build(comm, n, &pairs).unwrap().into_parts();
        if comm.rank() == 1 {
            parts.recv_lists.get_mut(&0).unwrap().swap(0, 1);
        }
        let e = ParallelExchanger::from_parts(parts).unwrap();
        let values = if comm.rank() == 0 {
            vec![1.0, 2.0, 3.0, 4.0]
        } else {
            vec![3.0, 4.0, 7.0]
        };
        e.get_maximum_absolute_parallel_error(comm, &values).unwrap()
    });
    assert_eq!(out, vec![1.0, 1.0]);
}

#[test]
fn receive_size_mismatch_is_fatal() {
    let out = run_ranks(2, |comm| {
        let (n, pairs) = two_rank_pairs(comm.rank());
        let mut parts = ParallelExchanger::build(comm, n, &pairs).unwrap().into_parts();
        if comm.rank() == 1 {
            parts.recv_lists.get_mut(&0).unwrap().push(2);
        }
        let e = ParallelExchanger::from_parts(parts).unwrap();
        let compact = vec![0.5; e.local_contracted_indexes().len()];
        let mut full = vec![0.0; n];
        e.expansion(comm, &compact, &mut full)
    });
    assert!(out[0].is_ok());
    assert!(matches!(
        out[1],
        Err(FilterError::MessageLengthMismatch {
            neighbor: 0,
            expected: 3,
            found: 2,
            ..
        })
    ));
}

/// Rank `r` holds globals `4r ..= 4r + 4` in a shuffled local order, so
/// neighbouring ranks share exactly one point.
fn chain_globals(rank: usize, rng: &mut SmallRng) -> Vec<u64> {
    let lo = 4 * rank as u64;
    let mut g: Vec<u64> = (lo..=lo + 4).collect();
    g.shuffle(rng);
    g
}

#[test]
fn global_ids_build_partitions_the_point_set() {
    let size = 4;
    let out = run_ranks(size, |comm| {
        let mut rng = SmallRng::seed_from_u64(17 + comm.rank() as u64);
        let globals = chain_globals(comm.rank(), &mut rng);
        let e = ParallelExchanger::from_global_ids(comm, &globals).unwrap();

        let consistent: Vec<f64> = globals.iter().map(|&g| g as f64 * 0.5).collect();
        let zero = e.get_maximum_absolute_parallel_error(comm, &consistent).unwrap();

        // every rank disagrees with its lower neighbour by exactly 100
        let skewed: Vec<f64> = globals
            .iter()
            .map(|&g| g as f64 + 100.0 * comm.rank() as f64)
            .collect();
        let skew = e.get_maximum_absolute_parallel_error(comm, &skewed).unwrap();

        let owned: Vec<u64> = e
            .local_contracted_indexes()
            .iter()
            .map(|&i| globals[i])
            .collect();
        (zero, skew, owned)
    });

    let mut seen = BTreeSet::new();
    for (zero, skew, owned) in &out {
        assert_eq!(*zero, 0.0);
        assert_eq!(*skew, 100.0);
        for g in owned {
            assert!(seen.insert(*g), "global {g} owned twice");
        }
    }
    assert_eq!(seen, (0..=4 * (size as u64 - 1) + 4).collect());
}

#[test]
fn random_sharing_round_trips() {
    // three ranks over 30 globals, each holding a random subset
    let size = 3;
    let mut rng = SmallRng::seed_from_u64(5);
    let subsets: Vec<Vec<u64>> = (0..size)
        .map(|_| {
            let mut g: Vec<u64> = (0..30u64).filter(|_| rng.gen_bool(0.6)).collect();
            g.shuffle(&mut rng);
            g
        })
        .collect();
    let subsets = &subsets;
    let out = run_ranks(size, move |comm| {
        let globals = &subsets[comm.rank()];
        let e = ParallelExchanger::from_global_ids(comm, globals).unwrap();
        let values: Vec<f64> = globals.iter().map(|&g| (g * g) as f64).collect();
        let err = e.get_maximum_absolute_parallel_error(comm, &values).unwrap();
        let owned: Vec<u64> = e
            .local_contracted_indexes()
            .iter()
            .map(|&i| globals[i])
            .collect();
        (err, owned)
    });

    let mut owned_all: Vec<u64> = out.iter().flat_map(|(_, o)| o.clone()).collect();
    owned_all.sort_unstable();
    let mut expected: Vec<u64> = subsets.iter().flatten().copied().collect();
    expected.sort_unstable();
    expected.dedup();
    assert_eq!(owned_all, expected);
    assert!(out.iter().all(|(err, _)| *err == 0.0));
}

/// Rank 0 holds globals 10..=13, rank 1 holds 12..=14.
fn flagged_globals(rank: usize) -> Vec<u64> {
    if rank == 0 { vec![10, 11, 12, 13] } else { vec![12, 13, 14] }
}

#[test]
fn owned_flags_may_pick_a_higher_rank() {
    let out = run_ranks(2, |comm| {
        let globals = flagged_globals(comm.rank());
        // rank 1 owns 13 even though rank 0 holds it too
        let is_owned: Vec<bool> = globals
            .iter()
            .map(|&g| if comm.rank() == 0 { g <= 12 } else { g >= 13 })
            .collect();
        let e = ParallelExchanger::from_ownership_and_global_ids(comm, &globals, &is_owned).unwrap();

        let compact: Vec<f64> = e
            .local_contracted_indexes()
            .iter()
            .map(|&i| globals[i] as f64)
            .collect();
        let mut full = vec![-1.0; globals.len()];
        e.expansion(comm, &compact, &mut full).unwrap();

        let consistent: Vec<f64> = globals.iter().map(|&g| g as f64 * 3.0).collect();
        let err = e.get_maximum_absolute_parallel_error(comm, &consistent).unwrap();
        (e.ownership_codes(), e.neighbors_above(), full, err)
    });
    assert_eq!(out[0].0, vec![0, 0, 1, -1]);
    assert_eq!(out[1].0, vec![-2, 1, 0]);
    assert_eq!(out[0].1, vec![1]);
    assert_eq!(out[0].2, vec![10.0, 11.0, 12.0, 13.0]);
    assert_eq!(out[1].2, vec![12.0, 13.0, 14.0]);
    assert_eq!((out[0].3, out[1].3), (0.0, 0.0));
}

#[test]
fn point_claimed_by_two_ranks_is_ambiguous() {
    let out = run_ranks(2, |comm| {
        let globals = flagged_globals(comm.rank());
        let is_owned: Vec<bool> = if comm.rank() == 0 {
            vec![true, true, true, false]
        } else {
            vec![true, true, true]
        };
        ParallelExchanger::from_ownership_and_global_ids(comm, &globals, &is_owned)
    });
    assert!(matches!(
        out[0],
        Err(FilterError::AmbiguousOwnership {
            local: 2,
            first: 0,
            second: 1
        })
    ));
    assert!(matches!(
        out[1],
        Err(FilterError::AmbiguousOwnership {
            local: 0,
            first: 1,
            second: 0
        })
    ));
}

#[test]
fn point_claimed_by_no_rank_is_incomplete() {
    let out = run_ranks(2, |comm| {
        let globals = flagged_globals(comm.rank());
        let is_owned: Vec<bool> = if comm.rank() == 0 {
            vec![true, true, true, false]
        } else {
            vec![false, false, true]
        };
        ParallelExchanger::from_ownership_and_global_ids(comm, &globals, &is_owned)
    });
    assert!(matches!(out[0], Err(FilterError::IncompleteOwnership { local: 3 })));
    assert!(matches!(out[1], Err(FilterError::IncompleteOwnership { local: 1 })));
}
