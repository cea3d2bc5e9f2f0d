//! descent: approximate k-nearest-neighbor graphs via NN-Descent.
//!
//! Builds a k-NN graph over N points under a registry-selected distance
//! metric and serves k-NN queries against the built graph:
//!
//! - **Construction**: random-projection forest seeding followed by
//!   NN-Descent local-join refinement ([`nnd`], [`forest`])
//! - **Queries**: forest-routed entry points plus a best-first graph walk
//! - **Metrics**: a catalog of interchangeable scalar kernels with
//!   monotone-transform "alternative" forms for the expensive ones
//!   ([`distance`], [`sparse`])
//!
//! # Quick Start
//!
//! ```
//! use descent::{Matrix, NNDescentIndex, NNDescentParams};
//!
//! # fn main() -> Result<(), descent::DescentError> {
//! let points = Matrix::from_vec(200, (0..200 * 8).map(|i| (i % 13) as f32).collect());
//! let params = NNDescentParams {
//!     metric: "euclidean".to_string(),
//!     n_neighbors: 10,
//!     ..Default::default()
//! };
//!
//! let index = NNDescentIndex::build(points, &params)?;
//!
//! // The graph itself: (N, K) ids ascending by distance, plus distances.
//! let neighbors = index.neighbor_indices();
//! assert_eq!(neighbors.ncols(), 10);
//!
//! // Queries walk the graph from forest-routed seeds.
//! let q = Matrix::from_vec(1, (0..8).map(|i| i as f32).collect());
//! let (ids, dists) = index.query(&q, 5, 20)?;
//! # let _ = (ids, dists);
//! # Ok(())
//! # }
//! ```
//!
//! # Picking Knobs
//!
//! | Knob | Effect |
//! |------|--------|
//! | `n_neighbors` | Graph degree K; larger = better recall, more memory |
//! | `n_trees` | Seeding diversity; default `5 + N^0.25` is usually enough |
//! | `max_candidates` | Per-round join width; caps work at `O(N * mc^2)` |
//! | `delta` | Convergence sensitivity; smaller = more rounds |
//! | `search_size` (query) | Frontier cap; larger = higher recall, slower |
//! | `low_memory` | Staged writes: slower, smaller peak, bit-reproducible |
//!
//! # Determinism
//!
//! Every randomized stage draws from streams keyed by
//! `(seed, work item, iteration, purpose)`, so forest construction,
//! sampling, and query padding do not depend on thread scheduling. With
//! `low_memory = true` the whole build is bit-reproducible for a fixed
//! seed; the default striped-write path can reorder equal-key arrivals.
//!
//! # References
//!
//! - Dong, Moses & Li (2011): "Efficient K-Nearest Neighbor Graph
//!   Construction for Generic Similarity Measures"
//! - Dasgupta & Freund (2008): "Random projection trees and low
//!   dimensional manifolds"

pub mod distance;
pub mod error;
pub mod forest;
pub mod heap;
pub mod matrix;
pub mod nnd;
pub mod sparse;

mod rng;

// Re-exports
pub use distance::MetricParams;
pub use error::{DescentError, Result};
pub use heap::{HeapList, NONE};
pub use matrix::Matrix;
pub use nnd::{BuildStats, CancelSignal, NNDescentIndex, NNDescentParams};
pub use sparse::SparseRows;
