//! Fixed, versioned, little-endian wire types for the exchange protocols.
//!
//! Every message starts with a [`WireHdr`] and a [`WireCount`], followed by
//! `count` fixed-size records. Decoders check the version, the kind and the
//! exact byte length before touching the payload, and read records unaligned
//! so received buffers never need special alignment.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::size_of;

use crate::data::sparse::RowBlockMatrix;
use crate::filter_error::FilterError;

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

pub const KIND_SCALARS: u16 = 1;
pub const KIND_INDICES: u16 = 2;
pub const KIND_MATRIX: u16 = 3;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,
    pub kind_le: u16,
    pub reserved_le: u32, // keep zero
}

impl WireHdr {
    pub fn new(kind: u16) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            reserved_le: 0,
        }
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
}

/// Number of records following the header.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u64,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

/// An `f64` carried as its little-endian bit pattern.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireScalar {
    pub bits_le: u64,
}

impl WireScalar {
    pub fn of(v: f64) -> Self {
        Self {
            bits_le: v.to_bits().to_le(),
        }
    }
    pub fn get(&self) -> f64 {
        f64::from_bits(u64::from_le(self.bits_le))
    }
}

/// An index (local index, global id) carried on the wire.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireIndex {
    pub id_le: u64,
}

impl WireIndex {
    pub fn of(id: u64) -> Self {
        Self { id_le: id.to_le() }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.id_le)
    }
}

/// Shape of a sparse block, sent right after the header.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireMatrixDims {
    pub rows_le: u64,
    pub cols_le: u64,
}

/// One stored nonzero `(row, col, value)`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireEntry {
    pub row_le: u64,
    pub col_le: u64,
    pub value_bits_le: u64,
}

impl WireEntry {
    pub fn new(row: usize, col: usize, value: f64) -> Self {
        Self {
            row_le: (row as u64).to_le(),
            col_le: (col as u64).to_le(),
            value_bits_le: value.to_bits().to_le(),
        }
    }
    pub fn decode(&self) -> (usize, usize, f64) {
        (
            u64::from_le(self.row_le) as usize,
            u64::from_le(self.col_le) as usize,
            f64::from_bits(u64::from_le(self.value_bits_le)),
        )
    }
}

const_assert_eq!(size_of::<WireHdr>(), 8);
const_assert_eq!(size_of::<WireCount>(), 8);
const_assert_eq!(size_of::<WireScalar>(), 8);
const_assert_eq!(size_of::<WireIndex>(), 8);
const_assert_eq!(size_of::<WireMatrixDims>(), 16);
const_assert_eq!(size_of::<WireEntry>(), 24);

const PREFIX: usize = size_of::<WireHdr>() + size_of::<WireCount>();

fn encode_records<T: Pod>(kind: u16, extra: &[u8], records: &[T]) -> Vec<u8> {
    let mut out =
        Vec::with_capacity(PREFIX + extra.len() + records.len() * size_of::<T>());
    out.extend_from_slice(bytemuck::bytes_of(&WireHdr::new(kind)));
    out.extend_from_slice(bytemuck::bytes_of(&WireCount::new(records.len())));
    out.extend_from_slice(extra);
    out.extend_from_slice(bytemuck::cast_slice(records));
    out
}

/// Validate header and length; returns `(count, body)` with `body` starting
/// right after the count.
fn split_prefix(bytes: &[u8], kind: u16) -> Result<(usize, &[u8]), FilterError> {
    if bytes.len() < PREFIX {
        return Err(FilterError::WireDecode(format!(
            "expected at least {PREFIX} bytes, got {}",
            bytes.len()
        )));
    }
    let hdr: WireHdr = bytemuck::pod_read_unaligned(&bytes[..size_of::<WireHdr>()]);
    if hdr.version() != WIRE_VERSION {
        return Err(FilterError::WireDecode(format!(
            "wire version {} (expected {WIRE_VERSION})",
            hdr.version()
        )));
    }
    if hdr.kind() != kind {
        return Err(FilterError::WireDecode(format!(
            "message kind {} (expected {kind})",
            hdr.kind()
        )));
    }
    let count: WireCount = bytemuck::pod_read_unaligned(&bytes[size_of::<WireHdr>()..PREFIX]);
    Ok((count.get(), &bytes[PREFIX..]))
}

fn read_records<T: Pod>(body: &[u8], count: usize) -> Result<Vec<T>, FilterError> {
    let expected = count
        .checked_mul(size_of::<T>())
        .ok_or_else(|| FilterError::WireDecode(format!("record count {count} overflows")))?;
    expect_exact_len(body.len(), expected)?;
    Ok(body
        .chunks_exact(size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), FilterError> {
    if actual == expected {
        Ok(())
    } else {
        Err(FilterError::WireDecode(format!(
            "expected {expected} bytes, got {actual}"
        )))
    }
}

pub fn encode_scalars(values: &[f64]) -> Vec<u8> {
    let records: Vec<WireScalar> = values.iter().copied().map(WireScalar::of).collect();
    encode_records(KIND_SCALARS, &[], &records)
}

pub fn decode_scalars(bytes: &[u8]) -> Result<Vec<f64>, FilterError> {
    let (count, body) = split_prefix(bytes, KIND_SCALARS)?;
    let records: Vec<WireScalar> = read_records(body, count)?;
    Ok(records.iter().map(WireScalar::get).collect())
}

pub fn encode_indices(values: &[u64]) -> Vec<u8> {
    let records: Vec<WireIndex> = values.iter().copied().map(WireIndex::of).collect();
    encode_records(KIND_INDICES, &[], &records)
}

pub fn decode_indices(bytes: &[u8]) -> Result<Vec<u64>, FilterError> {
    let (count, body) = split_prefix(bytes, KIND_INDICES)?;
    let records: Vec<WireIndex> = read_records(body, count)?;
    Ok(records.iter().map(WireIndex::get).collect())
}

/// Serialize a sparse block as dims + one [`WireEntry`] per stored nonzero,
/// in row-major storage order.
pub fn encode_matrix(matrix: &RowBlockMatrix) -> Vec<u8> {
    let dims = WireMatrixDims {
        rows_le: (matrix.num_rows() as u64).to_le(),
        cols_le: (matrix.num_columns() as u64).to_le(),
    };
    let records: Vec<WireEntry> = matrix
        .triplets()
        .map(|(r, c, v)| WireEntry::new(r, c, v))
        .collect();
    encode_records(KIND_MATRIX, bytemuck::bytes_of(&dims), &records)
}

pub fn decode_matrix(bytes: &[u8]) -> Result<RowBlockMatrix, FilterError> {
    let (count, body) = split_prefix(bytes, KIND_MATRIX)?;
    if body.len() < size_of::<WireMatrixDims>() {
        return Err(FilterError::WireDecode("truncated matrix dimensions".into()));
    }
    let (dims_bytes, entries) = body.split_at(size_of::<WireMatrixDims>());
    let dims: WireMatrixDims = bytemuck::pod_read_unaligned(dims_bytes);
    let records: Vec<WireEntry> = read_records(entries, count)?;
    RowBlockMatrix::from_triplets(
        u64::from_le(dims.rows_le) as usize,
        u64::from_le(dims.cols_le) as usize,
        records.iter().map(WireEntry::decode),
    )
}
