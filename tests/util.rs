#![allow(dead_code)]
use std::collections::BTreeMap;

use kernel_filter_exchange::{
    algs::communicator::RayonComm,
    data::{point_cloud::PointCloud, sparse::KernelBlocks, sparse::RowBlockMatrix},
};

/// Run `f` on every rank of a fresh in-process world; results by rank.
/// Each handle is dropped as its rank returns, so a rank that bails out
/// early fails its peers' pending receives instead of hanging them.
pub fn run_ranks<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&RayonComm) -> T + Sync,
{
    let world = RayonComm::world(size);
    let f = &f;
    std::thread::scope(|s| {
        let handles: Vec<_> = world.into_iter().map(|comm| s.spawn(move || f(&comm))).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Unit-spaced grid points with x in `x0..x0 + nx`, x fastest.
pub fn grid(x0: usize, nx: usize, ny: usize, nz: usize) -> Vec<[f64; 3]> {
    let mut out = Vec::with_capacity(nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                out.push([(x0 + i) as f64, j as f64, k as f64]);
            }
        }
    }
    out
}

/// Hat-kernel triplets `radius - |p - q|` for every pair closer than `radius`.
pub fn hat_kernel(rows: &[[f64; 3]], cols: &[[f64; 3]], radius: f64) -> Vec<(usize, usize, f64)> {
    let mut out = Vec::new();
    for (i, p) in rows.iter().enumerate() {
        for (j, q) in cols.iter().enumerate() {
            let d = ((p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2) + (p[2] - q[2]).powi(2)).sqrt();
            if d < radius {
                out.push((i, j, radius - d));
            }
        }
    }
    out
}

/// Full single-rank kernel over `coords`.
pub fn serial_kernel(coords: &[[f64; 3]], radius: f64) -> KernelBlocks {
    let n = coords.len();
    KernelBlocks::new(RowBlockMatrix::from_triplets(n, n, hat_kernel(coords, coords, radius)).unwrap())
}

/// One rank's share of a grid cut into slabs of `per` x-layers.
pub struct Slab {
    pub coords: Vec<[f64; 3]>,
    pub nonlocal: BTreeMap<usize, PointCloud>,
    pub kernel: KernelBlocks,
    pub below: Vec<usize>,
    pub above: Vec<usize>,
}

impl Slab {
    pub fn points(&self) -> PointCloud {
        PointCloud::new(self.coords.clone())
    }
}

/// Slab `rank` of `size`; neighbours are the adjacent slabs, which holds as
/// long as `radius <= per`.
pub fn slab(rank: usize, size: usize, per: usize, ny: usize, nz: usize, radius: f64) -> Slab {
    let coords = grid(rank * per, per, ny, nz);
    let n = coords.len();
    let mut kernel =
        KernelBlocks::new(RowBlockMatrix::from_triplets(n, n, hat_kernel(&coords, &coords, radius)).unwrap());
    let mut nonlocal = BTreeMap::new();
    let mut below = Vec::new();
    let mut above = Vec::new();
    let nbrs = [rank.checked_sub(1), Some(rank + 1).filter(|&q| q < size)];
    for q in nbrs.into_iter().flatten() {
        let theirs = grid(q * per, per, ny, nz);
        let block =
            RowBlockMatrix::from_triplets(n, theirs.len(), hat_kernel(&coords, &theirs, radius)).unwrap();
        kernel.row_blocks.insert(q, block);
        nonlocal.insert(q, PointCloud::new(theirs));
        if q < rank {
            below.push(q);
        } else {
            above.push(q);
        }
    }
    Slab {
        coords,
        nonlocal,
        kernel,
        below,
        above,
    }
}

/// `[Σw, Σw·dx, Σw·dy, Σw·dz]` of one logical row of a slab kernel.
pub fn row_moments(
    kernel: &KernelBlocks,
    coords: &[[f64; 3]],
    nonlocal: &BTreeMap<usize, Vec<[f64; 3]>>,
    row: usize,
) -> [f64; 4] {
    let center = coords[row];
    let mut m = [0.0; 4];
    let mut add = |w: f64, p: [f64; 3]| {
        m[0] += w;
        for a in 0..3 {
            m[a + 1] += w * (p[a] - center[a]);
        }
    };
    let (w, c) = kernel.local.get_row(row).unwrap();
    for (&w, &c) in w.iter().zip(c) {
        add(w, coords[c]);
    }
    for (q, block) in &kernel.row_blocks {
        let (w, c) = block.get_row(row).unwrap();
        for (&w, &c) in w.iter().zip(c) {
            add(w, nonlocal[q][c]);
        }
    }
    m
}
