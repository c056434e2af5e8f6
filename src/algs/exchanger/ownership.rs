//! Ownership of replicated points.
//!
//! By default a point held by several ranks is owned by the lowest of them;
//! callers may instead flag owned points themselves, in which case every held
//! point needs exactly one claimant. Every local index gets an [`Ownership`]:
//! exclusive, owned-and-shared (values go out to the other holders), or ghost
//! (values come in from the owner).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::filter_error::FilterError;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Ownership {
    /// Owned here and held by no other rank.
    Exclusive,
    /// Owned here and also held by at least one other rank.
    Shared,
    /// Held here, owned by rank `owner`.
    Ghost { owner: usize },
}

impl Ownership {
    /// Whether this rank holds the canonical value.
    #[inline]
    pub fn is_owned(self) -> bool {
        !matches!(self, Ownership::Ghost { .. })
    }

    /// Integer encoding: `0` exclusive, `1` shared, `owner - size` for ghosts.
    pub fn code(self, size: usize) -> i64 {
        match self {
            Ownership::Exclusive => 0,
            Ownership::Shared => 1,
            Ownership::Ghost { owner } => owner as i64 - size as i64,
        }
    }

    /// Inverse of [`Ownership::code`].
    pub fn from_code(code: i64, size: usize) -> Option<Self> {
        match code {
            0 => Some(Ownership::Exclusive),
            1 => Some(Ownership::Shared),
            c if c < 0 && c >= -(size as i64) => Some(Ownership::Ghost {
                owner: (size as i64 + c) as usize,
            }),
            _ => None,
        }
    }
}

/// Compute ownership for `num_local` indices from per-neighbour shared pairs.
///
/// Pair lists are trusted: an index paired with any lower rank becomes a ghost
/// of the lowest such rank, one paired only with higher ranks becomes shared.
pub fn compute_ownership(
    rank: usize,
    size: usize,
    num_local: usize,
    shared_pairs: &BTreeMap<usize, Vec<(usize, usize)>>,
) -> Result<Vec<Ownership>, FilterError> {
    let mut ownership = vec![Ownership::Exclusive; num_local];
    for (&nbr, pairs) in shared_pairs {
        if nbr == rank || nbr >= size {
            return Err(FilterError::InvalidNeighbor {
                rank: nbr,
                own: rank,
                size,
            });
        }
        for &(local, _) in pairs {
            let slot = ownership
                .get_mut(local)
                .ok_or(FilterError::IndexOutOfBounds {
                    index: local,
                    len: num_local,
                })?;
            *slot = if nbr < rank {
                match *slot {
                    Ownership::Ghost { owner } => Ownership::Ghost {
                        owner: owner.min(nbr),
                    },
                    _ => Ownership::Ghost { owner: nbr },
                }
            } else {
                match *slot {
                    Ownership::Exclusive => Ownership::Shared,
                    other => other,
                }
            };
        }
    }
    Ok(ownership)
}

/// Resolve caller-flagged ownership.
///
/// `remote_claims[q]` lists the local indices that rank `q` flags as owned.
/// An index claimed twice (here and remotely, or by two neighbours) is
/// [`FilterError::AmbiguousOwnership`]; one claimed by nobody is
/// [`FilterError::IncompleteOwnership`].
pub fn ownership_from_claims(
    rank: usize,
    is_owned: &[bool],
    shared_pairs: &BTreeMap<usize, Vec<(usize, usize)>>,
    remote_claims: &BTreeMap<usize, Vec<usize>>,
) -> Result<Vec<Ownership>, FilterError> {
    let len = is_owned.len();
    let mut owners: Vec<Option<usize>> = is_owned.iter().map(|&o| o.then_some(rank)).collect();
    for (&nbr, locals) in remote_claims {
        for &local in locals {
            let slot = owners
                .get_mut(local)
                .ok_or(FilterError::IndexOutOfBounds { index: local, len })?;
            if let Some(first) = *slot {
                return Err(FilterError::AmbiguousOwnership {
                    local,
                    first,
                    second: nbr,
                });
            }
            *slot = Some(nbr);
        }
    }

    let mut shared = vec![false; len];
    for &(local, _) in shared_pairs.values().flatten() {
        *shared
            .get_mut(local)
            .ok_or(FilterError::IndexOutOfBounds { index: local, len })? = true;
    }

    owners
        .into_iter()
        .zip(shared)
        .enumerate()
        .map(|(local, (owner, shared))| match owner {
            None => Err(FilterError::IncompleteOwnership { local }),
            Some(o) if o != rank => Ok(Ownership::Ghost { owner: o }),
            Some(_) if shared => Ok(Ownership::Shared),
            Some(_) => Ok(Ownership::Exclusive),
        })
        .collect()
}
