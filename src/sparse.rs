//! Sparse row storage and sparse distance kernels.
//!
//! Rows are CSR-style: sorted index arrays with parallel value arrays.
//! Kernels walk two sorted coordinate lists with a two-pointer merge, so a
//! missing coordinate is an exact zero. Only metrics whose value on absent
//! coordinates is computable from that convention are offered here; the
//! dense registry carries the rest.

use serde::{Deserialize, Serialize};

use crate::distance::Correction;
use crate::error::{DescentError, Result};

/// CSR-style sparse row collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseRows {
    n_cols: usize,
    indptr: Vec<usize>,
    indices: Vec<u32>,
    data: Vec<f32>,
}

impl SparseRows {
    /// Create an empty collection with the given logical column count.
    pub fn new(n_cols: usize) -> Self {
        Self {
            n_cols,
            indptr: vec![0],
            indices: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Append one row. `indices` must be strictly increasing and in bounds.
    pub fn push_row(&mut self, indices: &[u32], values: &[f32]) -> Result<()> {
        if indices.len() != values.len() {
            return Err(DescentError::InvalidParameter(format!(
                "sparse row has {} indices but {} values",
                indices.len(),
                values.len()
            )));
        }
        for (pos, &idx) in indices.iter().enumerate() {
            if idx as usize >= self.n_cols {
                return Err(DescentError::InvalidParameter(format!(
                    "sparse index {idx} out of bounds for {} columns",
                    self.n_cols
                )));
            }
            if pos > 0 && indices[pos - 1] >= idx {
                return Err(DescentError::InvalidParameter(
                    "sparse indices must be strictly increasing".to_string(),
                ));
            }
        }
        self.indices.extend_from_slice(indices);
        self.data.extend_from_slice(values);
        self.indptr.push(self.indices.len());
        Ok(())
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.indptr.len() - 1
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.n_cols
    }

    /// Stored entries across all rows.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// Borrow row `i` as parallel (indices, values) slices.
    #[inline]
    pub fn row(&self, i: usize) -> (&[u32], &[f32]) {
        let start = self.indptr[i];
        let end = self.indptr[i + 1];
        (&self.indices[start..end], &self.data[start..end])
    }
}

/// A resolved sparse kernel over (indices, values) row pairs.
pub type SparseKernel =
    Box<dyn Fn(&[u32], &[f32], &[u32], &[f32]) -> f32 + Send + Sync>;

/// A metric resolved for sparse rows; mirrors
/// [`ResolvedMetric`](crate::distance::ResolvedMetric).
pub struct ResolvedSparseMetric {
    name: String,
    canonical: SparseKernel,
    alternative: Option<SparseKernel>,
    correction: Option<Correction>,
}

impl ResolvedSparseMetric {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The kernel the engine computes with.
    #[inline]
    pub fn working(&self) -> &(dyn Fn(&[u32], &[f32], &[u32], &[f32]) -> f32 + Send + Sync) {
        match &self.alternative {
            Some(alt) => alt.as_ref(),
            None => self.canonical.as_ref(),
        }
    }

    /// The canonical (user-facing) kernel.
    #[inline]
    pub fn canonical(&self) -> &(dyn Fn(&[u32], &[f32], &[u32], &[f32]) -> f32 + Send + Sync) {
        self.canonical.as_ref()
    }

    #[inline]
    pub fn has_alternative(&self) -> bool {
        self.alternative.is_some()
    }

    /// Map a working-form key to the true distance.
    #[inline]
    pub fn correct(&self, key: f32) -> f32 {
        match self.correction {
            Some(f) => f(key),
            None => key,
        }
    }

    pub fn correction(&self) -> Option<Correction> {
        self.correction
    }
}

impl std::fmt::Debug for ResolvedSparseMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSparseMetric")
            .field("name", &self.name)
            .field("has_alternative", &self.alternative.is_some())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Merged-iteration kernels
// ─────────────────────────────────────────────────────────────────────────────

/// Fold over the merged union of two sorted coordinate lists.
///
/// `f(acc, x, y)` sees the pair of values at each union coordinate, with an
/// exact `0.0` on the side that lacks the coordinate.
#[inline]
fn merge_fold<F>(ai: &[u32], av: &[f32], bi: &[u32], bv: &[f32], init: f32, mut f: F) -> f32
where
    F: FnMut(f32, f32, f32) -> f32,
{
    let mut acc = init;
    let mut i = 0;
    let mut j = 0;
    while i < ai.len() && j < bi.len() {
        if ai[i] < bi[j] {
            acc = f(acc, av[i], 0.0);
            i += 1;
        } else if ai[i] > bi[j] {
            acc = f(acc, 0.0, bv[j]);
            j += 1;
        } else {
            acc = f(acc, av[i], bv[j]);
            i += 1;
            j += 1;
        }
    }
    while i < ai.len() {
        acc = f(acc, av[i], 0.0);
        i += 1;
    }
    while j < bi.len() {
        acc = f(acc, 0.0, bv[j]);
        j += 1;
    }
    acc
}

/// Sparse dot product over the intersection of two sorted coordinate lists.
#[inline]
#[must_use]
pub fn sparse_dot_product(ai: &[u32], av: &[f32], bi: &[u32], bv: &[f32]) -> f32 {
    let mut result = 0.0f32;
    let mut i = 0;
    let mut j = 0;
    while i < ai.len() && j < bi.len() {
        if ai[i] < bi[j] {
            i += 1;
        } else if ai[i] > bi[j] {
            j += 1;
        } else {
            result += av[i] * bv[j];
            i += 1;
            j += 1;
        }
    }
    result
}

/// Sparse squared euclidean distance.
#[inline]
#[must_use]
pub fn sparse_sqeuclidean(ai: &[u32], av: &[f32], bi: &[u32], bv: &[f32]) -> f32 {
    merge_fold(ai, av, bi, bv, 0.0, |acc, x, y| acc + (x - y) * (x - y))
}

/// Sparse euclidean distance.
#[inline]
#[must_use]
pub fn sparse_euclidean(ai: &[u32], av: &[f32], bi: &[u32], bv: &[f32]) -> f32 {
    sparse_sqeuclidean(ai, av, bi, bv).sqrt()
}

/// Sparse manhattan distance.
#[inline]
#[must_use]
pub fn sparse_manhattan(ai: &[u32], av: &[f32], bi: &[u32], bv: &[f32]) -> f32 {
    merge_fold(ai, av, bi, bv, 0.0, |acc, x, y| acc + (x - y).abs())
}

/// Sparse chebyshev distance.
#[inline]
#[must_use]
pub fn sparse_chebyshev(ai: &[u32], av: &[f32], bi: &[u32], bv: &[f32]) -> f32 {
    merge_fold(ai, av, bi, bv, 0.0, |acc, x, y| acc.max((x - y).abs()))
}

/// Sparse canberra distance.
#[inline]
#[must_use]
pub fn sparse_canberra(ai: &[u32], av: &[f32], bi: &[u32], bv: &[f32]) -> f32 {
    merge_fold(ai, av, bi, bv, 0.0, |acc, x, y| {
        let denominator = x.abs() + y.abs();
        if denominator > 0.0 {
            acc + (x - y).abs() / denominator
        } else {
            acc
        }
    })
}

/// Sparse Bray-Curtis dissimilarity.
#[inline]
#[must_use]
pub fn sparse_bray_curtis(ai: &[u32], av: &[f32], bi: &[u32], bv: &[f32]) -> f32 {
    let numerator = merge_fold(ai, av, bi, bv, 0.0, |acc, x, y| acc + (x - y).abs());
    let denominator = merge_fold(ai, av, bi, bv, 0.0, |acc, x, y| acc + (x + y).abs());
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

#[inline]
fn sparse_norms_and_dot(ai: &[u32], av: &[f32], bi: &[u32], bv: &[f32]) -> (f32, f32, f32) {
    let dot = sparse_dot_product(ai, av, bi, bv);
    let norm_a = av.iter().map(|x| x * x).sum::<f32>();
    let norm_b = bv.iter().map(|y| y * y).sum::<f32>();
    (dot, norm_a, norm_b)
}

/// Sparse cosine distance.
#[inline]
#[must_use]
pub fn sparse_cosine(ai: &[u32], av: &[f32], bi: &[u32], bv: &[f32]) -> f32 {
    let (dot, norm_a, norm_b) = sparse_norms_and_dot(ai, av, bi, bv);
    if norm_a == 0.0 && norm_b == 0.0 {
        0.0
    } else if norm_a == 0.0 || norm_b == 0.0 {
        1.0
    } else {
        1.0 - dot / (norm_a * norm_b).sqrt()
    }
}

/// Sparse log-scaled cosine.
#[inline]
#[must_use]
pub fn sparse_alternative_cosine(ai: &[u32], av: &[f32], bi: &[u32], bv: &[f32]) -> f32 {
    let (dot, norm_a, norm_b) = sparse_norms_and_dot(ai, av, bi, bv);
    if norm_a == 0.0 && norm_b == 0.0 {
        0.0
    } else if norm_a == 0.0 || norm_b == 0.0 || dot <= 0.0 {
        f32::INFINITY
    } else {
        ((norm_a * norm_b).sqrt() / dot).log2()
    }
}

/// Sparse dot-product distance.
#[inline]
#[must_use]
pub fn sparse_dot_distance(ai: &[u32], av: &[f32], bi: &[u32], bv: &[f32]) -> f32 {
    let d = sparse_dot_product(ai, av, bi, bv);
    if d <= 0.0 {
        1.0
    } else {
        1.0 - d
    }
}

/// Sparse log-scaled dot distance.
#[inline]
#[must_use]
pub fn sparse_alternative_dot(ai: &[u32], av: &[f32], bi: &[u32], bv: &[f32]) -> f32 {
    let d = sparse_dot_product(ai, av, bi, bv);
    if d <= 0.0 {
        f32::INFINITY
    } else {
        -d.log2()
    }
}

/// Sparse hamming distance over `dim` logical coordinates.
#[inline]
#[must_use]
pub fn sparse_hamming(ai: &[u32], av: &[f32], bi: &[u32], bv: &[f32], dim: usize) -> f32 {
    let differing = merge_fold(ai, av, bi, bv, 0.0, |acc, x, y| {
        if x != y {
            acc + 1.0
        } else {
            acc
        }
    });
    differing / dim as f32
}

#[inline]
fn sparse_jaccard_counts(ai: &[u32], av: &[f32], bi: &[u32], bv: &[f32]) -> (f32, f32) {
    let mut non_zero = 0.0f32;
    let mut equal = 0.0f32;
    merge_fold(ai, av, bi, bv, 0.0, |acc, x, y| {
        let xt = x != 0.0;
        let yt = y != 0.0;
        if xt || yt {
            non_zero += 1.0;
        }
        if xt && yt {
            equal += 1.0;
        }
        acc
    });
    (non_zero, equal)
}

/// Sparse jaccard distance.
#[inline]
#[must_use]
pub fn sparse_jaccard(ai: &[u32], av: &[f32], bi: &[u32], bv: &[f32]) -> f32 {
    let (non_zero, equal) = sparse_jaccard_counts(ai, av, bi, bv);
    if non_zero == 0.0 {
        0.0
    } else {
        (non_zero - equal) / non_zero
    }
}

/// Sparse log-scaled jaccard.
#[inline]
#[must_use]
pub fn sparse_alternative_jaccard(ai: &[u32], av: &[f32], bi: &[u32], bv: &[f32]) -> f32 {
    let (non_zero, equal) = sparse_jaccard_counts(ai, av, bi, bv);
    if non_zero == 0.0 {
        0.0
    } else {
        -(equal / non_zero).log2()
    }
}

#[inline]
fn sparse_hellinger_terms(ai: &[u32], av: &[f32], bi: &[u32], bv: &[f32]) -> (f32, f32, f32) {
    let mut result = 0.0f32;
    let mut i = 0;
    let mut j = 0;
    while i < ai.len() && j < bi.len() {
        if ai[i] < bi[j] {
            i += 1;
        } else if ai[i] > bi[j] {
            j += 1;
        } else {
            result += (av[i] * bv[j]).sqrt();
            i += 1;
            j += 1;
        }
    }
    let l1_a = av.iter().sum::<f32>();
    let l1_b = bv.iter().sum::<f32>();
    (result, l1_a, l1_b)
}

/// Sparse hellinger distance.
#[inline]
#[must_use]
pub fn sparse_hellinger(ai: &[u32], av: &[f32], bi: &[u32], bv: &[f32]) -> f32 {
    let (result, l1_a, l1_b) = sparse_hellinger_terms(ai, av, bi, bv);
    if l1_a == 0.0 && l1_b == 0.0 {
        0.0
    } else if l1_a == 0.0 || l1_b == 0.0 {
        1.0
    } else {
        (1.0 - result / (l1_a * l1_b).sqrt()).max(0.0).sqrt()
    }
}

/// Sparse log-scaled hellinger.
#[inline]
#[must_use]
pub fn sparse_alternative_hellinger(ai: &[u32], av: &[f32], bi: &[u32], bv: &[f32]) -> f32 {
    let (result, l1_a, l1_b) = sparse_hellinger_terms(ai, av, bi, bv);
    if l1_a == 0.0 && l1_b == 0.0 {
        0.0
    } else if l1_a == 0.0 || l1_b == 0.0 || result <= 0.0 {
        f32::INFINITY
    } else {
        ((l1_a * l1_b).sqrt() / result).log2()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Resolve a metric name for sparse rows.
///
/// Supports the subset of the registry whose value on absent coordinates is
/// an exact zero contribution; metrics needing dense zero semantics
/// (`correlation`, the smoothed divergences, `wasserstein_1d`,
/// `seuclidean`, `minkowski`) are reported as unknown for sparse data.
pub fn resolve_sparse(
    name: &str,
    _params: &crate::distance::MetricParams,
    dim: usize,
) -> Result<ResolvedSparseMetric> {
    let lower = name.to_ascii_lowercase();
    let resolved = |canonical: SparseKernel,
                    alternative: Option<SparseKernel>,
                    correction: Option<Correction>| {
        ResolvedSparseMetric {
            name: lower.clone(),
            canonical,
            alternative,
            correction,
        }
    };

    fn correct_sqrt(d: f32) -> f32 {
        d.sqrt()
    }
    fn correct_exp2(d: f32) -> f32 {
        1.0 - (-d).exp2()
    }
    fn correct_exp2_sqrt(d: f32) -> f32 {
        (1.0 - (-d).exp2()).max(0.0).sqrt()
    }

    let metric = match lower.as_str() {
        "euclidean" | "l2" => resolved(
            Box::new(sparse_euclidean),
            Some(Box::new(sparse_sqeuclidean)),
            Some(correct_sqrt),
        ),
        "sqeuclidean" => resolved(Box::new(sparse_sqeuclidean), None, None),
        "manhattan" | "taxicab" | "l1" => resolved(Box::new(sparse_manhattan), None, None),
        "chebyshev" | "linfinity" | "linfty" | "linf" => {
            resolved(Box::new(sparse_chebyshev), None, None)
        }
        "canberra" => resolved(Box::new(sparse_canberra), None, None),
        "braycurtis" | "bray_curtis" => resolved(Box::new(sparse_bray_curtis), None, None),
        "cosine" => resolved(
            Box::new(sparse_cosine),
            Some(Box::new(sparse_alternative_cosine)),
            Some(correct_exp2),
        ),
        "dot" => resolved(
            Box::new(sparse_dot_distance),
            Some(Box::new(sparse_alternative_dot)),
            Some(correct_exp2),
        ),
        "hamming" => resolved(
            Box::new(move |ai, av, bi, bv| sparse_hamming(ai, av, bi, bv, dim)),
            None,
            None,
        ),
        "jaccard" => resolved(
            Box::new(sparse_jaccard),
            Some(Box::new(sparse_alternative_jaccard)),
            Some(correct_exp2),
        ),
        "hellinger" => resolved(
            Box::new(sparse_hellinger),
            Some(Box::new(sparse_alternative_hellinger)),
            Some(correct_exp2_sqrt),
        ),
        _ => return Err(DescentError::UnknownMetric(format!("{name} (sparse)"))),
    };
    Ok(metric)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance;

    fn densify(ai: &[u32], av: &[f32], dim: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; dim];
        for (&i, &v) in ai.iter().zip(av.iter()) {
            out[i as usize] = v;
        }
        out
    }

    #[test]
    fn push_row_validates() {
        let mut rows = SparseRows::new(8);
        assert!(rows.push_row(&[1, 3, 5], &[1.0, 2.0, 3.0]).is_ok());
        assert!(rows.push_row(&[3, 1], &[1.0, 2.0]).is_err());
        assert!(rows.push_row(&[1, 8], &[1.0, 2.0]).is_err());
        assert!(rows.push_row(&[1], &[1.0, 2.0]).is_err());
        assert_eq!(rows.nrows(), 1);
        assert_eq!(rows.row(0).0, &[1, 3, 5]);
    }

    #[test]
    fn sparse_kernels_match_dense_on_densified_rows() {
        let dim = 10;
        let ai = [0u32, 2, 5, 9];
        let av = [1.5f32, -2.0, 0.5, 3.0];
        let bi = [1u32, 2, 6, 9];
        let bv = [2.0f32, 1.0, -1.0, 0.5];
        let da = densify(&ai, &av, dim);
        let db = densify(&bi, &bv, dim);

        let cases: Vec<(f32, f32)> = vec![
            (
                sparse_sqeuclidean(&ai, &av, &bi, &bv),
                distance::sqeuclidean(&da, &db),
            ),
            (
                sparse_manhattan(&ai, &av, &bi, &bv),
                distance::manhattan(&da, &db),
            ),
            (
                sparse_chebyshev(&ai, &av, &bi, &bv),
                distance::chebyshev(&da, &db),
            ),
            (
                sparse_canberra(&ai, &av, &bi, &bv),
                distance::canberra(&da, &db),
            ),
            (
                sparse_bray_curtis(&ai, &av, &bi, &bv),
                distance::bray_curtis(&da, &db),
            ),
            (sparse_cosine(&ai, &av, &bi, &bv), distance::cosine(&da, &db)),
            (
                sparse_hamming(&ai, &av, &bi, &bv, dim),
                distance::hamming(&da, &db),
            ),
            (
                sparse_jaccard(&ai, &av, &bi, &bv),
                distance::jaccard(&da, &db),
            ),
        ];
        for (sparse, dense) in cases {
            assert!(
                (sparse - dense).abs() < 1e-5,
                "sparse {sparse} != dense {dense}"
            );
        }
    }

    #[test]
    fn hellinger_matches_dense_on_nonnegative_rows() {
        let dim = 6;
        let ai = [0u32, 3, 4];
        let av = [0.5f32, 1.0, 0.25];
        let bi = [0u32, 2, 4];
        let bv = [0.75f32, 0.5, 1.0];
        let da = densify(&ai, &av, dim);
        let db = densify(&bi, &bv, dim);
        assert!(
            (sparse_hellinger(&ai, &av, &bi, &bv) - distance::hellinger(&da, &db)).abs() < 1e-5
        );
    }

    #[test]
    fn resolve_sparse_subset() {
        let params = crate::distance::MetricParams::default();
        assert!(resolve_sparse("euclidean", &params, 16).is_ok());
        assert!(resolve_sparse("jaccard", &params, 16).is_ok());
        assert!(resolve_sparse("correlation", &params, 16).is_err());
        assert!(resolve_sparse("wasserstein_1d", &params, 16).is_err());
    }
}
