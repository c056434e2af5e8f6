//! Shared-pair discovery from global point identifiers.
//!
//! Each rank publishes the `[min, max]` range of its global ids. Two ranks
//! whose ranges intersect run a pairwise handshake in rank order: the higher
//! rank ships its in-range `(local, global)` entries down, the lower rank
//! matches them against its own ids with a linear merge over global-sorted
//! lists and ships the matched local pairs back.
//!
//! With caller-supplied ownership flags, a second round swaps the flags of
//! the shared points with each neighbour, ordered by global id, to learn
//! which rank owns every ghost.

use std::collections::BTreeMap;

use log::debug;

use super::ownership::ownership_from_claims;
use super::{ParallelExchanger, SharedPairs};
use crate::algs::communicator::{Communicator, tags};
use crate::algs::wire::{decode_indices, encode_indices};
use crate::filter_error::FilterError;

#[inline]
fn intersect(a_lower: u64, a_upper: u64, b_lower: u64, b_upper: u64) -> bool {
    b_lower <= a_upper && a_lower <= b_upper
}

fn recv_indices<C: Communicator>(
    comm: &C,
    peer: usize,
    step: &'static str,
    expected: Option<usize>,
) -> Result<Vec<u64>, FilterError> {
    let values = decode_indices(&comm.recv(peer, tags::GLOBAL_IDS)?)?;
    if let Some(expected) = expected {
        if values.len() != expected {
            return Err(FilterError::MessageLengthMismatch {
                neighbor: peer,
                step,
                expected,
                found: values.len(),
            });
        }
    }
    Ok(values)
}

impl ParallelExchanger {
    /// Discover shared pairs from one global id per local index, then
    /// [`build`](ParallelExchanger::build). Collective over `comm`.
    pub fn from_global_ids<C: Communicator>(
        comm: &C,
        globals: &[u64],
    ) -> Result<Self, FilterError> {
        let pairs = shared_pairs_from_global_ids(comm, globals)?;
        Self::build(comm, globals.len(), &pairs)
    }

    /// Like [`from_global_ids`](Self::from_global_ids), but the owner of each
    /// point is whichever rank flags it in `is_owned` rather than the lowest
    /// holder. Every held point must be flagged by exactly one rank.
    /// Collective over `comm`.
    pub fn from_ownership_and_global_ids<C: Communicator>(
        comm: &C,
        globals: &[u64],
        is_owned: &[bool],
    ) -> Result<Self, FilterError> {
        if is_owned.len() != globals.len() {
            return Err(FilterError::VectorLengthMismatch {
                expected: globals.len(),
                found: is_owned.len(),
            });
        }
        let pairs = shared_pairs_from_global_ids(comm, globals)?;
        let claims = exchange_owned_flags(comm, globals, is_owned, &pairs)?;
        let ownership = ownership_from_claims(comm.rank(), is_owned, &pairs, &claims)?;
        Ok(Self::from_ownership(comm.rank(), comm.size(), ownership, &pairs))
    }
}

/// Swap owned flags with every neighbour; returns, per neighbour, the local
/// indices it claims. Runs every handshake before any claim is judged.
fn exchange_owned_flags<C: Communicator>(
    comm: &C,
    globals: &[u64],
    is_owned: &[bool],
    pairs: &SharedPairs,
) -> Result<BTreeMap<usize, Vec<usize>>, FilterError> {
    let rank = comm.rank();
    let mut claims = BTreeMap::new();
    for (&nbr, list) in pairs {
        let mut by_global: Vec<(u64, usize)> = list.iter().map(|&(local, _)| (globals[local], local)).collect();
        by_global.sort_unstable();
        let mine: Vec<u64> = by_global.iter().map(|&(_, local)| u64::from(is_owned[local])).collect();

        let theirs = if nbr < rank {
            comm.send(nbr, tags::GLOBAL_IDS, &encode_indices(&mine))?;
            recv_indices(comm, nbr, "owned flags", Some(mine.len()))?
        } else {
            let theirs = recv_indices(comm, nbr, "owned flags", Some(mine.len()))?;
            comm.send(nbr, tags::GLOBAL_IDS, &encode_indices(&mine))?;
            theirs
        };

        let claimed: Vec<usize> = by_global
            .iter()
            .zip(theirs)
            .filter(|&(_, flag)| flag != 0)
            .map(|(&(_, local), _)| local)
            .collect();
        if !claimed.is_empty() {
            claims.insert(nbr, claimed);
        }
    }
    Ok(claims)
}

/// Run the range exchange and pairwise handshakes; returns this rank's
/// shared-pair lists.
pub fn shared_pairs_from_global_ids<C: Communicator>(
    comm: &C,
    globals: &[u64],
) -> Result<SharedPairs, FilterError> {
    let rank = comm.rank();

    let mut sorted: Vec<(u64, usize)> = globals
        .iter()
        .enumerate()
        .map(|(local, &global)| (global, local))
        .collect();
    sorted.sort_unstable();

    // an empty rank publishes an inverted range that intersects nothing
    let (own_min, own_max) = match (sorted.first(), sorted.last()) {
        (Some(&(lo, _)), Some(&(hi, _))) => (lo, hi),
        _ => (u64::MAX, 0),
    };
    let mins = comm.all_gather_u64(own_min)?;
    let maxs = comm.all_gather_u64(own_max)?;

    let mut pairs = SharedPairs::new();
    for proc in 0..comm.size() {
        if proc == rank || !intersect(own_min, own_max, mins[proc], maxs[proc]) {
            continue;
        }
        let found = if proc < rank {
            handshake_send_first(comm, proc, &sorted, mins[proc], maxs[proc])?
        } else {
            handshake_receive_first(comm, proc, &sorted)?
        };
        if !found.is_empty() {
            pairs.insert(proc, found);
        }
    }
    debug!(
        "rank {rank}: discovered shared pairs with {:?}",
        pairs.iter().map(|(r, p)| (*r, p.len())).collect::<Vec<_>>()
    );
    Ok(pairs)
}

fn handshake_send_first<C: Communicator>(
    comm: &C,
    proc: usize,
    sorted: &[(u64, usize)],
    lower: u64,
    upper: u64,
) -> Result<Vec<(usize, usize)>, FilterError> {
    let (locals, globals): (Vec<u64>, Vec<u64>) = sorted
        .iter()
        .filter(|&&(g, _)| lower <= g && g <= upper)
        .map(|&(g, l)| (l as u64, g))
        .unzip();
    comm.send(proc, tags::GLOBAL_IDS, &encode_indices(&locals))?;
    comm.send(proc, tags::GLOBAL_IDS, &encode_indices(&globals))?;

    let mine = recv_indices(comm, proc, "global-id pairs (local)", None)?;
    let theirs = recv_indices(comm, proc, "global-id pairs (remote)", Some(mine.len()))?;
    Ok(mine
        .into_iter()
        .zip(theirs)
        .map(|(l, r)| (l as usize, r as usize))
        .collect())
}

fn handshake_receive_first<C: Communicator>(
    comm: &C,
    proc: usize,
    sorted: &[(u64, usize)],
) -> Result<Vec<(usize, usize)>, FilterError> {
    let remote_locals = recv_indices(comm, proc, "global-id entries (local)", None)?;
    let remote_globals = recv_indices(
        comm,
        proc,
        "global-id entries (global)",
        Some(remote_locals.len()),
    )?;

    let mut found = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    while i < sorted.len() && j < remote_globals.len() {
        let (global, local) = sorted[i];
        match global.cmp(&remote_globals[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                found.push((local, remote_locals[j] as usize));
                i += 1;
                j += 1;
            }
        }
    }

    let theirs: Vec<u64> = found.iter().map(|&(_, r)| r as u64).collect();
    let mine: Vec<u64> = found.iter().map(|&(l, _)| l as u64).collect();
    comm.send(proc, tags::GLOBAL_IDS, &encode_indices(&theirs))?;
    comm.send(proc, tags::GLOBAL_IDS, &encode_indices(&mine))?;
    Ok(found)
}
