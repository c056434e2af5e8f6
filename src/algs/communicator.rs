//! Thin façade over intra-process (thread) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices*. Every point-to-point call is
//! **blocking**: `send` returns once the buffer may be reused and `recv` returns
//! only after a full message from `peer` has arrived. Messages between one
//! `(src, dst, tag)` triple are delivered in FIFO order, which is what the
//! rank-ordered protocols rely on instead of per-message tags.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;

use crate::filter_error::FilterError;

/// Typed message tag. Keeps halo traffic, matrix blocks, global-id
/// handshakes and collectives on separate channels.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

/// Tags used by this crate.
pub mod tags {
    use super::CommTag;

    /// Halo expansion values.
    pub const HALO: CommTag = CommTag(0x4841);
    /// Row/column block matrices during normalization.
    pub const MATRIX: CommTag = CommTag(0x4d41);
    /// Shared-pair discovery from global identifiers.
    pub const GLOBAL_IDS: CommTag = CommTag(0x4749);
    /// Collectives implemented on top of point-to-point.
    pub const COLLECTIVE: CommTag = CommTag(0x434f);
}

/// Blocking communication interface.
pub trait Communicator {
    /// Rank of this process.
    fn rank(&self) -> usize;
    /// Number of processes.
    fn size(&self) -> usize;

    /// Blocking send of `buf` to `peer`.
    fn send(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<(), FilterError>;
    /// Blocking receive of one message from `peer`.
    fn recv(&self, peer: usize, tag: CommTag) -> Result<Vec<u8>, FilterError>;

    /// Gather one `f64` from every rank, indexed by rank.
    fn all_gather_f64(&self, local: f64) -> Result<Vec<f64>, FilterError>;
    /// Gather one `u64` from every rank, indexed by rank.
    fn all_gather_u64(&self, local: u64) -> Result<Vec<u64>, FilterError>;

    fn allreduce_max(&self, local: f64) -> Result<f64, FilterError> {
        Ok(self
            .all_gather_f64(local)?
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max))
    }

    fn allreduce_min(&self, local: f64) -> Result<f64, FilterError> {
        Ok(self
            .all_gather_f64(local)?
            .into_iter()
            .fold(f64::INFINITY, f64::min))
    }

    /// Sum in ascending rank order, so every rank sees the same bits.
    fn allreduce_sum(&self, local: f64) -> Result<f64, FilterError> {
        Ok(self.all_gather_f64(local)?.into_iter().sum())
    }
}

/// Compile-time no-op comm for pure serial runs: rank 0 of 1.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, peer: usize, _tag: CommTag, _buf: &[u8]) -> Result<(), FilterError> {
        Err(no_peers(peer))
    }

    fn recv(&self, peer: usize, _tag: CommTag) -> Result<Vec<u8>, FilterError> {
        Err(no_peers(peer))
    }

    fn all_gather_f64(&self, local: f64) -> Result<Vec<f64>, FilterError> {
        Ok(vec![local])
    }

    fn all_gather_u64(&self, local: u64) -> Result<Vec<u64>, FilterError> {
        Ok(vec![local])
    }
}

fn no_peers(peer: usize) -> FilterError {
    FilterError::CommError {
        neighbor: peer,
        source: "serial communicator has no peers".into(),
    }
}

// --- RayonComm: intra-process / multi-thread ---
type Key = (usize, usize, u16); // (src, dst, tag)

struct Mailbox {
    slots: DashMap<Key, VecDeque<Bytes>>,
    /// Live handles per rank; a rank at zero can never send again.
    live: Vec<AtomicUsize>,
}

/// Default bound on a single receive.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(120);

/// In-process communicator: one handle per simulated rank, each driven from
/// its own thread. Sends never block. A receive waits until the message
/// lands, the sender's last handle is dropped, or the timeout passes.
pub struct RayonComm {
    rank: usize,
    size: usize,
    timeout: Duration,
    mailbox: Arc<Mailbox>,
}

impl Clone for RayonComm {
    fn clone(&self) -> Self {
        self.mailbox.live[self.rank].fetch_add(1, Ordering::SeqCst);
        Self {
            rank: self.rank,
            size: self.size,
            timeout: self.timeout,
            mailbox: Arc::clone(&self.mailbox),
        }
    }
}

impl Drop for RayonComm {
    fn drop(&mut self) {
        self.mailbox.live[self.rank].fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for RayonComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RayonComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RayonComm {
    /// Create `size` connected handles, one per rank, sharing a private mailbox.
    pub fn world(size: usize) -> Vec<Self> {
        let mailbox = Arc::new(Mailbox {
            slots: DashMap::new(),
            live: (0..size).map(|_| AtomicUsize::new(1)).collect(),
        });
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                timeout: DEFAULT_RECV_TIMEOUT,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }

    /// Bound every receive on this handle by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn pop(&self, key: &Key) -> Option<Bytes> {
        self.mailbox.slots.get_mut(key)?.pop_front()
    }

    fn check_peer(&self, peer: usize) -> Result<(), FilterError> {
        if peer >= self.size || peer == self.rank {
            return Err(FilterError::InvalidNeighbor {
                rank: peer,
                own: self.rank,
                size: self.size,
            });
        }
        Ok(())
    }

    fn gather_bytes(&self, local: [u8; 8]) -> Result<Vec<[u8; 8]>, FilterError> {
        for peer in (0..self.size).filter(|&p| p != self.rank) {
            self.send(peer, tags::COLLECTIVE, &local)?;
        }
        let mut out = Vec::with_capacity(self.size);
        for peer in 0..self.size {
            if peer == self.rank {
                out.push(local);
                continue;
            }
            let raw = self.recv(peer, tags::COLLECTIVE)?;
            let word: [u8; 8] = raw.as_slice().try_into().map_err(|_| {
                FilterError::MessageLengthMismatch {
                    neighbor: peer,
                    step: "all-gather",
                    expected: 8,
                    found: raw.len(),
                }
            })?;
            out.push(word);
        }
        Ok(out)
    }
}

impl Communicator for RayonComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<(), FilterError> {
        self.check_peer(peer)?;
        let key = (self.rank, peer, tag.as_u16());
        self.mailbox
            .slots
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
        Ok(())
    }

    fn recv(&self, peer: usize, tag: CommTag) -> Result<Vec<u8>, FilterError> {
        self.check_peer(peer)?;
        let key = (peer, self.rank, tag.as_u16());
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(bytes) = self.pop(&key) {
                return Ok(bytes.to_vec());
            }
            if self.mailbox.live[peer].load(Ordering::SeqCst) == 0 {
                // its sends all happened before the drop
                return match self.pop(&key) {
                    Some(bytes) => Ok(bytes.to_vec()),
                    None => Err(FilterError::CommError {
                        neighbor: peer,
                        source: format!("rank {peer} left without sending tag {:#x}", tag.as_u16())
                            .into(),
                    }),
                };
            }
            if Instant::now() >= deadline {
                return Err(FilterError::CommError {
                    neighbor: peer,
                    source: format!("receive timed out after {:?}", self.timeout).into(),
                });
            }
            std::thread::yield_now();
        }
    }

    fn all_gather_f64(&self, local: f64) -> Result<Vec<f64>, FilterError> {
        Ok(self
            .gather_bytes(local.to_le_bytes())?
            .into_iter()
            .map(f64::from_le_bytes)
            .collect())
    }

    fn all_gather_u64(&self, local: u64) -> Result<Vec<u64>, FilterError> {
        Ok(self
            .gather_bytes(local.to_le_bytes())?
            .into_iter()
            .map(u64::from_le_bytes)
            .collect())
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{CommTag, Communicator};
    use crate::filter_error::FilterError;
    use mpi::collective::SystemOperation;
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// MPI world communicator. Dropping it finalizes MPI.
    pub struct MpiComm {
        _universe: Universe,
        pub world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, FilterError> {
            let universe = mpi::initialize().ok_or(FilterError::MpiInit)?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                _universe: universe,
                world,
                rank,
                size,
            })
        }
    }

    impl Communicator for MpiComm {
        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn send(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<(), FilterError> {
            self.world
                .process_at_rank(peer as i32)
                .send_with_tag(buf, tag.as_u16() as i32);
            Ok(())
        }

        fn recv(&self, peer: usize, tag: CommTag) -> Result<Vec<u8>, FilterError> {
            let (data, _status) = self
                .world
                .process_at_rank(peer as i32)
                .receive_vec_with_tag::<u8>(tag.as_u16() as i32);
            Ok(data)
        }

        fn all_gather_f64(&self, local: f64) -> Result<Vec<f64>, FilterError> {
            let mut out = vec![0.0f64; self.size];
            self.world.all_gather_into(&local, &mut out[..]);
            Ok(out)
        }

        fn all_gather_u64(&self, local: u64) -> Result<Vec<u64>, FilterError> {
            let mut out = vec![0u64; self.size];
            self.world.all_gather_into(&local, &mut out[..]);
            Ok(out)
        }

        fn allreduce_max(&self, local: f64) -> Result<f64, FilterError> {
            let mut global = 0.0f64;
            self.world
                .all_reduce_into(&local, &mut global, SystemOperation::max());
            Ok(global)
        }

        fn allreduce_min(&self, local: f64) -> Result<f64, FilterError> {
            let mut global = 0.0f64;
            self.world
                .all_reduce_into(&local, &mut global, SystemOperation::min());
            Ok(global)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
