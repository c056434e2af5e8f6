//! Parallel exchanger: contraction to owned points and halo expansion.
//!
//! Built once from per-neighbour shared-pair lists, then reused for every
//! exchange. Expansion visits neighbours in ascending rank: with a lower
//! neighbour it receives and then sends, with a higher one it sends and then
//! receives, skipping empty lists. Under lowest-rank ownership every receive
//! list points down and every send list up, so this is the two-phase
//! "receive from below, then send above" order. Caller-assigned owners (see
//! [`ParallelExchanger::from_ownership_and_global_ids`]) may point either way;
//! every rank still orders its pairs by `(higher rank, lower rank)`, so the
//! exchange cannot deadlock.
//!
//! Send lists are ordered by local index and receive lists by the neighbour's
//! index, which makes sender and receiver agree position by position without
//! per-message tags.

pub mod global_ids;
pub mod ownership;

use std::collections::BTreeMap;

use itertools::Itertools;
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::algs::communicator::{Communicator, tags};
use crate::algs::wire::{decode_scalars, encode_scalars};
use crate::filter_error::FilterError;

pub use ownership::{Ownership, compute_ownership, ownership_from_claims};

/// Per-neighbour `(local_index, remote_local_index)` pairs, keyed by rank.
pub type SharedPairs = BTreeMap<usize, Vec<(usize, usize)>>;

/// Raw exchanger state, for callers that assemble lists themselves.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangerParts {
    pub rank: usize,
    pub size: usize,
    pub ownership: Vec<Ownership>,
    pub send_lists: BTreeMap<usize, Vec<usize>>,
    pub recv_lists: BTreeMap<usize, Vec<usize>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParallelExchanger {
    rank: usize,
    size: usize,
    ownership: Vec<Ownership>,
    contracted_to_local: Vec<usize>,
    send_lists: BTreeMap<usize, Vec<usize>>,
    recv_lists: BTreeMap<usize, Vec<usize>>,
}

impl ParallelExchanger {
    /// Build for the calling rank of `comm`.
    pub fn build<C: Communicator>(
        comm: &C,
        num_local: usize,
        shared_pairs: &SharedPairs,
    ) -> Result<Self, FilterError> {
        Self::build_for_rank(comm.rank(), comm.size(), num_local, shared_pairs)
    }

    /// Build ownership, contracted set and send/receive lists for `rank` of
    /// `size`. Purely local; pair lists are not checked for symmetry.
    pub fn build_for_rank(
        rank: usize,
        size: usize,
        num_local: usize,
        shared_pairs: &SharedPairs,
    ) -> Result<Self, FilterError> {
        let ownership = compute_ownership(rank, size, num_local, shared_pairs)?;
        Ok(Self::from_ownership(rank, size, ownership, shared_pairs))
    }

    /// Send and receive lists for a resolved `ownership`: owned-and-shared
    /// indices go to every neighbour holding them, ghosts come from their
    /// owner.
    pub(crate) fn from_ownership(
        rank: usize,
        size: usize,
        ownership: Vec<Ownership>,
        shared_pairs: &SharedPairs,
    ) -> Self {
        let mut send_lists = BTreeMap::new();
        let mut recv_lists = BTreeMap::new();
        for (&nbr, pairs) in shared_pairs {
            let mut by_local = pairs.clone();
            by_local.sort_unstable();
            let send: Vec<usize> = by_local
                .iter()
                .filter(|&&(local, _)| ownership[local] == Ownership::Shared)
                .map(|&(local, _)| local)
                .collect();

            let mut by_remote: Vec<(usize, usize)> =
                pairs.iter().map(|&(local, remote)| (remote, local)).collect();
            by_remote.sort_unstable();
            let recv: Vec<usize> = by_remote
                .iter()
                .filter(|&&(_, local)| ownership[local] == Ownership::Ghost { owner: nbr })
                .map(|&(_, local)| local)
                .collect();

            if !send.is_empty() {
                send_lists.insert(nbr, send);
            }
            if !recv.is_empty() {
                recv_lists.insert(nbr, recv);
            }
        }

        let num_local = ownership.len();
        let exchanger = Self::assemble(ExchangerParts {
            rank,
            size,
            ownership,
            send_lists,
            recv_lists,
        });
        debug!(
            "rank {rank}: exchanger built, {} of {num_local} indices owned, sends {:?}, receives {:?}",
            exchanger.contracted_to_local.len(),
            exchanger
                .send_lists
                .iter()
                .map(|(r, l)| (*r, l.len()))
                .collect::<Vec<_>>(),
            exchanger
                .recv_lists
                .iter()
                .map(|(r, l)| (*r, l.len()))
                .collect::<Vec<_>>(),
        );
        exchanger
    }

    /// Assemble from explicit parts. Lists are used exactly as given.
    pub fn from_parts(parts: ExchangerParts) -> Result<Self, FilterError> {
        let len = parts.ownership.len();
        for (&nbr, list) in parts.send_lists.iter().chain(parts.recv_lists.iter()) {
            if nbr == parts.rank || nbr >= parts.size {
                return Err(FilterError::InvalidNeighbor {
                    rank: nbr,
                    own: parts.rank,
                    size: parts.size,
                });
            }
            if let Some(&index) = list.iter().find(|&&i| i >= len) {
                return Err(FilterError::IndexOutOfBounds { index, len });
            }
        }
        Ok(Self::assemble(parts))
    }

    pub fn into_parts(self) -> ExchangerParts {
        ExchangerParts {
            rank: self.rank,
            size: self.size,
            ownership: self.ownership,
            send_lists: self.send_lists,
            recv_lists: self.recv_lists,
        }
    }

    fn assemble(parts: ExchangerParts) -> Self {
        let contracted_to_local = parts
            .ownership
            .iter()
            .enumerate()
            .filter(|(_, o)| o.is_owned())
            .map(|(i, _)| i)
            .collect();
        Self {
            rank: parts.rank,
            size: parts.size,
            ownership: parts.ownership,
            contracted_to_local,
            send_lists: parts.send_lists,
            recv_lists: parts.recv_lists,
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Length of a full local vector.
    pub fn num_local(&self) -> usize {
        self.ownership.len()
    }

    pub fn ownership(&self) -> &[Ownership] {
        &self.ownership
    }

    /// Integer ownership codes, one per local index.
    pub fn ownership_codes(&self) -> Vec<i64> {
        self.ownership.iter().map(|o| o.code(self.size)).collect()
    }

    /// Sorted local indices owned by this rank.
    pub fn local_contracted_indexes(&self) -> &[usize] {
        &self.contracted_to_local
    }

    pub fn send_list(&self, rank: usize) -> &[usize] {
        self.send_lists.get(&rank).map_or(&[], Vec::as_slice)
    }

    pub fn recv_list(&self, rank: usize) -> &[usize] {
        self.recv_lists.get(&rank).map_or(&[], Vec::as_slice)
    }

    /// Ranks below this one that share points with it, ascending.
    pub fn neighbors_below(&self) -> Vec<usize> {
        self.neighbor_ranks().filter(|&r| r < self.rank).collect()
    }

    /// Ranks above this one that share points with it, ascending.
    pub fn neighbors_above(&self) -> Vec<usize> {
        self.neighbor_ranks().filter(|&r| r > self.rank).collect()
    }

    fn neighbor_ranks(&self) -> impl Iterator<Item = usize> + '_ {
        self.send_lists
            .keys()
            .merge(self.recv_lists.keys())
            .dedup()
            .copied()
    }

    /// Copy owned values out of a full local vector, in contracted order.
    pub fn contraction(&self, full: &[f64]) -> Result<Vec<f64>, FilterError> {
        if full.len() != self.num_local() {
            return Err(FilterError::VectorLengthMismatch {
                expected: self.num_local(),
                found: full.len(),
            });
        }
        Ok(self.contracted_to_local.iter().map(|&i| full[i]).collect())
    }

    /// Write owned values into `full`, then run the halo exchange so every
    /// ghost slot receives its owner's value. Blocks until all sends and
    /// receives of this rank complete.
    pub fn expansion<C: Communicator>(
        &self,
        comm: &C,
        compact: &[f64],
        full: &mut [f64],
    ) -> Result<(), FilterError> {
        if compact.len() != self.contracted_to_local.len() {
            return Err(FilterError::VectorLengthMismatch {
                expected: self.contracted_to_local.len(),
                found: compact.len(),
            });
        }
        if full.len() != self.num_local() {
            return Err(FilterError::VectorLengthMismatch {
                expected: self.num_local(),
                found: full.len(),
            });
        }
        for (&local, &value) in self.contracted_to_local.iter().zip(compact) {
            full[local] = value;
        }

        for nbr in self.neighbor_ranks() {
            if nbr < self.rank {
                self.halo_receive(comm, nbr, full)?;
                self.halo_send(comm, nbr, full)?;
            } else {
                self.halo_send(comm, nbr, full)?;
                self.halo_receive(comm, nbr, full)?;
            }
        }
        Ok(())
    }

    fn halo_receive<C: Communicator>(
        &self,
        comm: &C,
        nbr: usize,
        full: &mut [f64],
    ) -> Result<(), FilterError> {
        let Some(list) = self.recv_lists.get(&nbr) else {
            return Ok(());
        };
        trace!("rank {}: halo receive {} values from {nbr}", self.rank, list.len());
        let values = decode_scalars(&comm.recv(nbr, tags::HALO)?)?;
        if values.len() != list.len() {
            return Err(FilterError::MessageLengthMismatch {
                neighbor: nbr,
                step: "halo receive",
                expected: list.len(),
                found: values.len(),
            });
        }
        for (&local, value) in list.iter().zip(values) {
            full[local] = value;
        }
        Ok(())
    }

    fn halo_send<C: Communicator>(&self, comm: &C, nbr: usize, full: &[f64]) -> Result<(), FilterError> {
        let Some(list) = self.send_lists.get(&nbr) else {
            return Ok(());
        };
        trace!("rank {}: halo send {} values to {nbr}", self.rank, list.len());
        let values: Vec<f64> = list.iter().map(|&i| full[i]).collect();
        comm.send(nbr, tags::HALO, &encode_scalars(&values))
    }

    /// Contract then expand a copy of `values` and return the largest absolute
    /// change over all ranks. Collective: every rank must call it.
    ///
    /// A correctly built exchanger on a consistent vector returns exactly `0`.
    pub fn get_maximum_absolute_parallel_error<C: Communicator>(
        &self,
        comm: &C,
        values: &[f64],
    ) -> Result<f64, FilterError> {
        let mut roundtrip = values.to_vec();
        let compact = self.contraction(values)?;
        self.expansion(comm, &compact, &mut roundtrip)?;
        let local_max = values
            .iter()
            .zip(&roundtrip)
            .fold(0.0f64, |m, (a, b)| m.max((a - b).abs()));
        comm.allreduce_max(local_max)
    }
}
