//! Rank-ordered exchange of normalized kernel blocks.
//!
//! Each rank sends its row block addressed to a neighbour and receives that
//! neighbour's row block addressed to itself, stored as a column block. The
//! four phases run in a fixed order on every rank:
//!
//! 1. send row blocks to ranks below,
//! 2. receive column blocks from ranks above,
//! 3. receive column blocks from ranks below,
//! 4. send row blocks to ranks above.
//!
//! A rank's phase-1 sends pair with the lower rank's phase 2, and its phase-3
//! receives pair with the lower rank's phase 4.

use std::collections::BTreeMap;

use log::trace;

use crate::algs::communicator::{Communicator, tags};
use crate::algs::wire::{decode_matrix, encode_matrix};
use crate::data::point_cloud::PointProvider;
use crate::data::sparse::{KernelBlocks, RowBlockMatrix};
use crate::filter_error::FilterError;

pub fn send_matrix<C: Communicator>(
    comm: &C,
    peer: usize,
    matrix: &RowBlockMatrix,
) -> Result<(), FilterError> {
    comm.send(peer, tags::MATRIX, &encode_matrix(matrix))
}

pub fn receive_matrix<C: Communicator>(comm: &C, peer: usize) -> Result<RowBlockMatrix, FilterError> {
    decode_matrix(&comm.recv(peer, tags::MATRIX)?)
}

fn check_neighbors(
    rank: usize,
    size: usize,
    kernel: &KernelBlocks,
    below: &[usize],
    above: &[usize],
) -> Result<(), FilterError> {
    let invalid = |q: usize| FilterError::InvalidNeighbor { rank: q, own: rank, size };
    for &q in below {
        if q >= rank {
            return Err(invalid(q));
        }
    }
    for &q in above {
        if q <= rank || q >= size {
            return Err(invalid(q));
        }
    }
    for &q in below.iter().chain(above) {
        if !kernel.row_blocks.contains_key(&q) {
            return Err(FilterError::MissingNeighborBlock(q));
        }
    }
    Ok(())
}

/// Receive `q`'s row block addressed to this rank; it has one row per point
/// of `q`.
fn receive_column_block<C: Communicator, P: PointProvider>(
    comm: &C,
    q: usize,
    nonlocal_points: &BTreeMap<usize, P>,
) -> Result<RowBlockMatrix, FilterError> {
    trace!("rank {}: receive column block from {q}", comm.rank());
    let block = receive_matrix(comm, q)?;
    if let Some(points) = nonlocal_points.get(&q) {
        if block.num_rows() != points.get_num_points() {
            return Err(FilterError::MessageLengthMismatch {
                neighbor: q,
                step: "column block receive",
                expected: points.get_num_points(),
                found: block.num_rows(),
            });
        }
    }
    Ok(block)
}

/// Run the four-phase exchange, filling `kernel.column_blocks`.
pub fn exchange_blocks<C: Communicator, P: PointProvider>(
    comm: &C,
    kernel: &mut KernelBlocks,
    nonlocal_points: &BTreeMap<usize, P>,
    below: &[usize],
    above: &[usize],
) -> Result<(), FilterError> {
    let rank = comm.rank();
    check_neighbors(rank, comm.size(), kernel, below, above)?;

    for &q in below {
        trace!("rank {rank}: send row block to {q}");
        send_matrix(comm, q, &kernel.row_blocks[&q])?;
    }
    for &q in above {
        let block = receive_column_block(comm, q, nonlocal_points)?;
        kernel.column_blocks.insert(q, block);
    }
    for &q in below {
        let block = receive_column_block(comm, q, nonlocal_points)?;
        kernel.column_blocks.insert(q, block);
    }
    for &q in above {
        trace!("rank {rank}: send row block to {q}");
        send_matrix(comm, q, &kernel.row_blocks[&q])?;
    }
    Ok(())
}
