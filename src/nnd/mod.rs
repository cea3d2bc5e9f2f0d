//! NN-Descent approximate k-nearest-neighbor index.
//!
//! Builds a k-NN graph with the Nearest-Neighbor Descent algorithm
//! (Dong, Moses & Li 2011): seed each point's neighbor heap from the leaf
//! buckets of a random-projection forest, then repeatedly run local joins —
//! "a neighbor of a neighbor is likely a neighbor" — until the rate of
//! improvement drops below `delta`. Queries descend the retained forest for
//! entry points and walk the finished graph best-first.
//!
//! # Usage
//!
//! ```
//! use descent::{Matrix, NNDescentIndex, NNDescentParams};
//!
//! # fn main() -> Result<(), descent::DescentError> {
//! let data = Matrix::from_vec(100, (0..500).map(|i| (i % 17) as f32).collect());
//! let params = NNDescentParams {
//!     n_neighbors: 5,
//!     ..Default::default()
//! };
//! let index = NNDescentIndex::build(data, &params)?;
//!
//! let query = Matrix::from_vec(1, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
//! let (ids, dists) = index.query(&query, 3, 10)?;
//! assert_eq!(ids.ncols(), 3);
//! # let _ = dists;
//! # Ok(())
//! # }
//! ```
//!
//! # References
//!
//! - Dong, Moses & Li (2011): "Efficient K-Nearest Neighbor Graph
//!   Construction for Generic Similarity Measures"
//! - Dasgupta & Freund (2008): "Random projection trees and low dimensional
//!   manifolds"

pub(crate) mod construction;
pub(crate) mod search;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fixedbitset::FixedBitSet;
use rand::rngs::SmallRng;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::distance::{self, Correction, MetricParams, ResolvedMetric};
use crate::error::{DescentError, Result};
use crate::forest::RPForest;
use crate::heap::{HeapList, NONE};
use crate::matrix::Matrix;
use crate::rng::{self, PURPOSE_QUERY};
use crate::sparse::{self, ResolvedSparseMetric, SparseRows};

use construction::{NNUpdate, RefineOpts};

/// Construction parameters.
///
/// `None` knobs derive their defaults from the data at build time:
/// `n_trees = 5 + floor(N^0.25)` clamped to `[1, 32]`,
/// `leaf_size = max(10, n_neighbors)`,
/// `max_candidates = min(60, n_neighbors)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NNDescentParams {
    /// Metric name from the registry (see [`crate::distance::resolve`]).
    pub metric: String,
    /// Optional per-metric parameters.
    pub metric_params: MetricParams,
    /// Neighbors per point in the final graph (K).
    pub n_neighbors: usize,
    /// Number of random-projection trees.
    pub n_trees: Option<usize>,
    /// Maximum leaf bucket size during tree construction.
    pub leaf_size: Option<usize>,
    /// Cap on sampled candidates per node per round.
    pub max_candidates: Option<usize>,
    /// Maximum refinement rounds.
    pub n_iters: usize,
    /// Convergence threshold: stop when a round pushes fewer than
    /// `delta * K * N` improvements.
    pub delta: f32,
    /// Seed for every randomized stage.
    pub seed: u64,
    /// Stage updates in per-chunk buffers instead of striped direct writes.
    /// Slower, smaller peak footprint, bit-reproducible.
    pub low_memory: bool,
    /// On cancellation, return the partially refined graph instead of
    /// [`DescentError::Cancelled`].
    pub allow_partial: bool,
}

impl Default for NNDescentParams {
    fn default() -> Self {
        Self {
            metric: "euclidean".to_string(),
            metric_params: MetricParams::default(),
            n_neighbors: 30,
            n_trees: None,
            leaf_size: None,
            max_candidates: None,
            n_iters: 10,
            delta: 0.001,
            seed: 42,
            low_memory: false,
            allow_partial: false,
        }
    }
}

/// Cooperative cancellation handle for builds.
///
/// Cloneable; `cancel()` from any thread is observed at the next
/// inter-phase barrier of the refinement loop.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.inner.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::Relaxed)
    }

    pub(crate) fn flag(&self) -> &AtomicBool {
        &self.inner
    }
}

/// What a build did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildStats {
    /// Points indexed.
    pub n_points: usize,
    /// Trees in the seeding forest.
    pub n_trees: usize,
    /// Successful pushes during forest seeding.
    pub seed_pushes: usize,
    /// Successful pushes per refinement round.
    pub push_counts: Vec<usize>,
    /// Whether the delta test stopped the loop.
    pub converged: bool,
    /// Whether a cancellation signal stopped the loop.
    pub cancelled: bool,
}

/// Point storage plus the metric resolved for it.
enum Backend {
    Dense {
        data: Matrix<f32>,
        metric: ResolvedMetric,
    },
    Sparse {
        data: SparseRows,
        metric: ResolvedSparseMetric,
    },
}

impl Backend {
    fn n(&self) -> usize {
        match self {
            Backend::Dense { data, .. } => data.nrows(),
            Backend::Sparse { data, .. } => data.nrows(),
        }
    }

    fn dim(&self) -> usize {
        match self {
            Backend::Dense { data, .. } => data.ncols(),
            Backend::Sparse { data, .. } => data.ncols(),
        }
    }

    fn correction(&self) -> Option<Correction> {
        match self {
            Backend::Dense { metric, .. } => metric.correction(),
            Backend::Sparse { metric, .. } => metric.correction(),
        }
    }
}

/// An immutable approximate k-NN index.
pub struct NNDescentIndex {
    backend: Backend,
    forest: RPForest,
    neighbor_indices: Matrix<i32>,
    neighbor_distances: Matrix<f32>,
    stats: BuildStats,
    n_neighbors: usize,
    seed: u64,
}

impl NNDescentIndex {
    /// Build an index over dense row-major points.
    pub fn build(data: Matrix<f32>, params: &NNDescentParams) -> Result<Self> {
        Self::build_with_signal(data, params, None)
    }

    /// Build with a cancellation signal.
    ///
    /// When the signal fires mid-build the behavior follows
    /// `params.allow_partial`: either [`DescentError::Cancelled`] or an
    /// index holding the partially refined (still valid, sorted and
    /// corrected) graph.
    pub fn build_with_signal(
        data: Matrix<f32>,
        params: &NNDescentParams,
        cancel: Option<&CancelSignal>,
    ) -> Result<Self> {
        validate_build(data.nrows(), data.ncols(), params)?;
        let metric = distance::resolve(&params.metric, &params.metric_params, data.ncols())?;
        Self::build_common(Backend::Dense { data, metric }, params, cancel)
    }

    /// Build an index over sparse rows.
    pub fn build_sparse(data: SparseRows, params: &NNDescentParams) -> Result<Self> {
        Self::build_sparse_with_signal(data, params, None)
    }

    /// Sparse variant of [`NNDescentIndex::build_with_signal`].
    pub fn build_sparse_with_signal(
        data: SparseRows,
        params: &NNDescentParams,
        cancel: Option<&CancelSignal>,
    ) -> Result<Self> {
        validate_build(data.nrows(), data.ncols(), params)?;
        let metric = sparse::resolve_sparse(&params.metric, &params.metric_params, data.ncols())?;
        Self::build_common(Backend::Sparse { data, metric }, params, cancel)
    }

    fn build_common(
        backend: Backend,
        params: &NNDescentParams,
        cancel: Option<&CancelSignal>,
    ) -> Result<Self> {
        let n = backend.n();
        let k = params.n_neighbors;
        let n_trees = params
            .n_trees
            .unwrap_or_else(|| (5 + (n as f64).powf(0.25).floor() as usize).clamp(1, 32));
        let leaf_size = params.leaf_size.unwrap_or_else(|| k.max(10));
        let max_candidates = params.max_candidates.unwrap_or_else(|| k.min(60));
        let opts = RefineOpts {
            max_candidates,
            n_iters: params.n_iters,
            delta: params.delta,
            seed: params.seed,
            low_memory: params.low_memory,
        };
        let cancel_flag = cancel.map(CancelSignal::flag);

        let mut heaps = HeapList::with_flags(n, k, f32::INFINITY, 1);

        let (forest, seed_pushes, outcome) = match &backend {
            Backend::Dense { data, metric } => {
                let forest = RPForest::build_dense(data, n_trees, leaf_size, params.seed);
                let kernel = metric.working();
                let dist = |i: usize, j: usize| kernel(data.row(i), data.row(j));
                let seed_pushes = seed_from_forest(&mut heaps, &forest, &dist);
                let outcome = construction::refine(&mut heaps, &dist, &opts, cancel_flag);
                (forest, seed_pushes, outcome)
            }
            Backend::Sparse { data, metric } => {
                let forest = RPForest::build_sparse(data, n_trees, leaf_size, params.seed);
                let kernel = metric.working();
                let dist = |i: usize, j: usize| {
                    let (ai, av) = data.row(i);
                    let (bi, bv) = data.row(j);
                    kernel(ai, av, bi, bv)
                };
                let seed_pushes = seed_from_forest(&mut heaps, &forest, &dist);
                let outcome = construction::refine(&mut heaps, &dist, &opts, cancel_flag);
                (forest, seed_pushes, outcome)
            }
        };

        if outcome.cancelled && !params.allow_partial {
            return Err(DescentError::Cancelled);
        }

        if let Some(correction) = backend.correction() {
            heaps.apply_correction(correction);
        }
        heaps.heapsort();

        let stats = BuildStats {
            n_points: n,
            n_trees,
            seed_pushes,
            push_counts: outcome.push_counts,
            converged: outcome.converged,
            cancelled: outcome.cancelled,
        };
        let (neighbor_indices, neighbor_distances) = heaps.into_parts();

        Ok(Self {
            backend,
            forest,
            neighbor_indices,
            neighbor_distances,
            stats,
            n_neighbors: k,
            seed: params.seed,
        })
    }

    /// Neighbor ids, one row per point, ascending by distance. Unfilled
    /// slots hold [`NONE`].
    pub fn neighbor_indices(&self) -> &Matrix<i32> {
        &self.neighbor_indices
    }

    /// Corrected neighbor distances matching [`neighbor_indices`].
    ///
    /// [`neighbor_indices`]: NNDescentIndex::neighbor_indices
    pub fn neighbor_distances(&self) -> &Matrix<f32> {
        &self.neighbor_distances
    }

    /// Build statistics.
    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    /// Points in the index.
    pub fn n_points(&self) -> usize {
        self.backend.n()
    }

    /// Dimensionality of the indexed points.
    pub fn dim(&self) -> usize {
        self.backend.dim()
    }

    /// Neighbors per point in the built graph.
    pub fn n_neighbors(&self) -> usize {
        self.n_neighbors
    }

    /// Query with dense vectors: `k` nearest neighbors per query row,
    /// explored through a frontier of `search_size >= k` candidates.
    pub fn query(
        &self,
        queries: &Matrix<f32>,
        k: usize,
        search_size: usize,
    ) -> Result<(Matrix<i32>, Matrix<f32>)> {
        let Backend::Dense { data, metric } = &self.backend else {
            return Err(DescentError::InvalidParameter(
                "dense queries against a sparse index".to_string(),
            ));
        };
        if queries.ncols() != data.ncols() {
            return Err(DescentError::DimensionMismatch {
                query_dim: queries.ncols(),
                index_dim: data.ncols(),
            });
        }
        self.validate_query(k, search_size)?;

        let kernel = metric.working();
        let rows: Vec<(Vec<i32>, Vec<f32>)> = (0..queries.nrows())
            .into_par_iter()
            .map(|qi| {
                let q = queries.row(qi);
                let mut rng = rng::stream(self.seed, qi as u64, 0, PURPOSE_QUERY);
                let mut seeds = Vec::new();
                self.forest.route_dense(q, &mut rng, &mut seeds);
                let dist_to = |j: usize| kernel(q, data.row(j));
                self.search_row(&mut rng, seeds, &dist_to, k, search_size)
            })
            .collect();

        Ok(assemble(rows, k))
    }

    /// Query with sparse rows.
    pub fn query_sparse(
        &self,
        queries: &SparseRows,
        k: usize,
        search_size: usize,
    ) -> Result<(Matrix<i32>, Matrix<f32>)> {
        let Backend::Sparse { data, metric } = &self.backend else {
            return Err(DescentError::InvalidParameter(
                "sparse queries against a dense index".to_string(),
            ));
        };
        if queries.ncols() != data.ncols() {
            return Err(DescentError::DimensionMismatch {
                query_dim: queries.ncols(),
                index_dim: data.ncols(),
            });
        }
        self.validate_query(k, search_size)?;

        let kernel = metric.working();
        let rows: Vec<(Vec<i32>, Vec<f32>)> = (0..queries.nrows())
            .into_par_iter()
            .map(|qi| {
                let (qidx, qval) = queries.row(qi);
                let mut rng = rng::stream(self.seed, qi as u64, 0, PURPOSE_QUERY);
                let mut seeds = Vec::new();
                self.forest.route_sparse(qidx, qval, &mut rng, &mut seeds);
                let dist_to = |j: usize| {
                    let (bi, bv) = data.row(j);
                    kernel(qidx, qval, bi, bv)
                };
                self.search_row(&mut rng, seeds, &dist_to, k, search_size)
            })
            .collect();

        Ok(assemble(rows, k))
    }

    fn validate_query(&self, k: usize, search_size: usize) -> Result<()> {
        if k == 0 {
            return Err(DescentError::InvalidParameter(
                "k must be positive".to_string(),
            ));
        }
        if search_size < k {
            return Err(DescentError::InvalidParameter(format!(
                "search_size {search_size} must be at least k = {k}"
            )));
        }
        Ok(())
    }

    /// One query row: pad the routed seeds with random distinct ids up to
    /// `search_size`, walk the graph, correct, sort, take the top k.
    fn search_row<D>(
        &self,
        rng: &mut SmallRng,
        mut seeds: Vec<i32>,
        dist_to: &D,
        k: usize,
        search_size: usize,
    ) -> (Vec<i32>, Vec<f32>)
    where
        D: Fn(usize) -> f32,
    {
        let n = self.backend.n();
        let mut visited = FixedBitSet::with_capacity(n);
        for &s in &seeds {
            visited.insert(s as usize);
        }
        let target = search_size.min(n);
        let mut attempts = 0;
        while seeds.len() < target && attempts < target * 10 {
            let j = rng.gen_range(0..n);
            attempts += 1;
            if !visited.contains(j) {
                visited.insert(j);
                seeds.push(j as i32);
            }
        }

        let mut results =
            search::search_one(&self.neighbor_indices, &seeds, dist_to, search_size, &mut visited);
        if let Some(correction) = self.backend.correction() {
            results.apply_correction(correction);
        }
        results.heapsort();
        (
            results.row_indices(0)[..k].to_vec(),
            results.row_keys(0)[..k].to_vec(),
        )
    }
}

/// Seed the heaps from the forest: evaluate all in-leaf pairs and push both
/// directions, flagged new.
///
/// Updates are generated per leaf in parallel and drained serially, so
/// seeding is reproducible regardless of scheduling.
fn seed_from_forest<D>(heaps: &mut HeapList, forest: &RPForest, dist: &D) -> usize
where
    D: Fn(usize, usize) -> f32 + Sync,
{
    let leaves: Vec<&[i32]> = forest.leaf_buckets().collect();
    let updates: Vec<Vec<NNUpdate>> = leaves
        .par_iter()
        .map(|bucket| {
            let mut batch = Vec::with_capacity(bucket.len() * bucket.len().saturating_sub(1) / 2);
            for (pos, &i) in bucket.iter().enumerate() {
                for &j in &bucket[pos + 1..] {
                    batch.push(NNUpdate {
                        i,
                        j,
                        key: dist(i as usize, j as usize),
                    });
                }
            }
            batch
        })
        .collect();

    let mut pushed = 0usize;
    for batch in &updates {
        for update in batch {
            pushed += heaps.checked_push_flagged(update.i as usize, update.j, update.key, 1) as usize;
            pushed += heaps.checked_push_flagged(update.j as usize, update.i, update.key, 1) as usize;
        }
    }
    pushed
}

fn validate_build(n: usize, dim: usize, params: &NNDescentParams) -> Result<()> {
    if n == 0 {
        return Err(DescentError::EmptyIndex);
    }
    if dim == 0 {
        return Err(DescentError::InvalidParameter(
            "points must have at least one dimension".to_string(),
        ));
    }
    if params.n_neighbors == 0 {
        return Err(DescentError::InvalidParameter(
            "n_neighbors must be positive".to_string(),
        ));
    }
    if params.n_neighbors >= n {
        return Err(DescentError::InvalidParameter(format!(
            "n_neighbors {} must be smaller than the number of points {}",
            params.n_neighbors, n
        )));
    }
    if params.n_trees == Some(0) {
        return Err(DescentError::InvalidParameter(
            "n_trees must be positive".to_string(),
        ));
    }
    if params.leaf_size == Some(0) {
        return Err(DescentError::InvalidParameter(
            "leaf_size must be positive".to_string(),
        ));
    }
    if params.max_candidates == Some(0) {
        return Err(DescentError::InvalidParameter(
            "max_candidates must be positive".to_string(),
        ));
    }
    if !(params.delta >= 0.0) {
        return Err(DescentError::InvalidParameter(format!(
            "delta must be non-negative, got {}",
            params.delta
        )));
    }
    Ok(())
}

fn assemble(rows: Vec<(Vec<i32>, Vec<f32>)>, k: usize) -> (Matrix<i32>, Matrix<f32>) {
    let nq = rows.len();
    let mut out_indices = Matrix::full(nq, k, NONE);
    let mut out_distances = Matrix::full(nq, k, f32::INFINITY);
    for (i, (ids, dists)) in rows.into_iter().enumerate() {
        out_indices.row_mut(i).copy_from_slice(&ids);
        out_distances.row_mut(i).copy_from_slice(&dists);
    }
    (out_indices, out_distances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn random_points(n: usize, d: usize, seed: u64) -> Matrix<f32> {
        let mut rng = SmallRng::seed_from_u64(seed);
        Matrix::from_vec(n, (0..n * d).map(|_| rng.gen::<f32>()).collect())
    }

    #[test]
    fn build_validates_inputs() {
        let params = NNDescentParams {
            n_neighbors: 5,
            ..Default::default()
        };
        assert_eq!(
            NNDescentIndex::build(Matrix::full(0, 4, 0.0f32), &params).err(),
            Some(DescentError::EmptyIndex)
        );
        assert!(matches!(
            NNDescentIndex::build(Matrix::full(4, 4, 0.0f32), &params),
            Err(DescentError::InvalidParameter(_))
        ));
        let bad_metric = NNDescentParams {
            metric: "warp".to_string(),
            n_neighbors: 5,
            ..Default::default()
        };
        assert!(matches!(
            NNDescentIndex::build(random_points(20, 4, 1), &bad_metric),
            Err(DescentError::UnknownMetric(_))
        ));
    }

    #[test]
    fn zero_knob_overrides_are_rejected() {
        let base = NNDescentParams {
            n_neighbors: 5,
            ..Default::default()
        };
        let overrides = [
            NNDescentParams {
                n_trees: Some(0),
                ..base.clone()
            },
            NNDescentParams {
                leaf_size: Some(0),
                ..base.clone()
            },
            NNDescentParams {
                max_candidates: Some(0),
                ..base.clone()
            },
        ];
        for params in overrides {
            assert!(
                matches!(
                    NNDescentIndex::build(random_points(20, 4, 1), &params),
                    Err(DescentError::InvalidParameter(_))
                ),
                "{params:?} should be rejected"
            );
        }
        // The smallest legal overrides still build.
        let minimal = NNDescentParams {
            n_trees: Some(1),
            leaf_size: Some(1),
            max_candidates: Some(1),
            ..base
        };
        assert!(NNDescentIndex::build(random_points(20, 4, 1), &minimal).is_ok());
    }

    #[test]
    fn built_graph_rows_are_sorted_and_clean() {
        let data = random_points(120, 6, 5);
        let params = NNDescentParams {
            n_neighbors: 8,
            ..Default::default()
        };
        let index = NNDescentIndex::build(data, &params).unwrap();
        let ids = index.neighbor_indices();
        let dists = index.neighbor_distances();
        for i in 0..ids.nrows() {
            let row_ids = ids.row(i);
            let row_dists = dists.row(i);
            assert!(!row_ids.contains(&(i as i32)));
            for j in 1..row_dists.len() {
                assert!(row_dists[j - 1] <= row_dists[j]);
            }
        }
    }

    #[test]
    fn query_shape_and_dimension_checks() {
        let data = random_points(80, 5, 8);
        let params = NNDescentParams {
            n_neighbors: 6,
            ..Default::default()
        };
        let index = NNDescentIndex::build(data, &params).unwrap();

        let queries = random_points(3, 5, 9);
        let (ids, dists) = index.query(&queries, 4, 12).unwrap();
        assert_eq!((ids.nrows(), ids.ncols()), (3, 4));
        assert_eq!((dists.nrows(), dists.ncols()), (3, 4));

        let wrong = random_points(1, 7, 9);
        assert!(matches!(
            index.query(&wrong, 4, 12),
            Err(DescentError::DimensionMismatch { query_dim: 7, index_dim: 5 })
        ));
        assert!(index.query(&queries, 5, 4).is_err());
    }

    #[test]
    fn cancelled_build_errors_unless_partial_allowed() {
        let data = random_points(100, 4, 11);
        let signal = CancelSignal::new();
        signal.cancel();

        let params = NNDescentParams {
            n_neighbors: 6,
            ..Default::default()
        };
        assert_eq!(
            NNDescentIndex::build_with_signal(random_points(100, 4, 11), &params, Some(&signal))
                .err(),
            Some(DescentError::Cancelled)
        );

        let partial_params = NNDescentParams {
            n_neighbors: 6,
            allow_partial: true,
            ..Default::default()
        };
        let index = NNDescentIndex::build_with_signal(data, &partial_params, Some(&signal)).unwrap();
        assert!(index.stats().cancelled);
        // Forest seeding already ran, so the graph is populated and sorted.
        for i in 0..index.n_points() {
            let dists = index.neighbor_distances().row(i);
            for j in 1..dists.len() {
                assert!(dists[j - 1] <= dists[j]);
            }
        }
    }

    #[test]
    fn sparse_build_and_query_roundtrip() {
        let mut rows = SparseRows::new(12);
        let mut rng = SmallRng::seed_from_u64(77);
        for _ in 0..60 {
            let idx: Vec<u32> = (0..12).filter(|_| rng.gen_bool(0.4)).collect();
            let idx = if idx.is_empty() { vec![0] } else { idx };
            let vals: Vec<f32> = idx.iter().map(|_| rng.gen::<f32>() + 0.1).collect();
            rows.push_row(&idx, &vals).unwrap();
        }
        let params = NNDescentParams {
            n_neighbors: 5,
            metric: "cosine".to_string(),
            ..Default::default()
        };
        let queries = rows.clone();
        let index = NNDescentIndex::build_sparse(rows, &params).unwrap();

        let (ids, dists) = index.query_sparse(&queries, 1, 10).unwrap();
        // A point queried against its own index returns itself at distance 0.
        let mut self_hits = 0;
        for i in 0..ids.nrows() {
            if ids.get(i, 0) == i as i32 {
                self_hits += 1;
                assert!(dists.get(i, 0).abs() < 1e-5);
            }
        }
        assert!(self_hits >= ids.nrows() * 9 / 10, "{self_hits} self hits");
    }

    #[test]
    fn dense_query_on_sparse_index_is_rejected() {
        let mut rows = SparseRows::new(4);
        for i in 0..10u32 {
            rows.push_row(&[i % 4], &[1.0 + i as f32]).unwrap();
        }
        let params = NNDescentParams {
            n_neighbors: 3,
            ..Default::default()
        };
        let index = NNDescentIndex::build_sparse(rows, &params).unwrap();
        let queries = Matrix::full(1, 4, 0.5f32);
        assert!(matches!(
            index.query(&queries, 2, 8),
            Err(DescentError::InvalidParameter(_))
        ));
    }
}
