//! Distance kernels and the metric registry for dense vectors.
//!
//! Every metric is a pure scalar kernel over `&[f32]` pairs. Some metrics
//! additionally carry an *alternative* form: a cheaper monotone transform of
//! the true distance (squared euclidean for euclidean, log-scaled forms for
//! cosine/dot/hellinger/jaccard). The engine runs its hot loops on the
//! alternative form and applies the matching *correction* once, when keys are
//! exposed to callers. Rankings under the alternative and the canonical
//! kernel agree, which is all graph construction needs.
//!
//! ## Degenerate inputs
//!
//! Kernels are total. Documented conventions: `cosine` of two zero vectors
//! is `0`, of one zero vector is `1`; `jaccard` of two all-zero vectors is
//! `0`; alternative forms return `+inf` where the log transform is
//! undefined (non-positive dot products), which keeps them max-heap safe.

use serde::{Deserialize, Serialize};

use crate::error::{DescentError, Result};

/// A resolved dense kernel. Boxed so per-metric parameters (Minkowski `p`,
/// per-coordinate variances) are captured at resolve time and the hot loop
/// sees a plain call.
pub type Kernel = Box<dyn Fn(&[f32], &[f32]) -> f32 + Send + Sync>;

/// Monotone correction from alternative-form keys to true distances.
pub type Correction = fn(f32) -> f32;

/// Optional per-metric parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricParams {
    /// Exponent for `minkowski` and `wasserstein_1d` (default 2 and 1).
    pub p: Option<f32>,
    /// Per-coordinate variances for `seuclidean`; length must equal the
    /// data dimension.
    pub variances: Option<Vec<f32>>,
}

/// A metric resolved from the registry: the canonical kernel, the optional
/// alternative form, and the correction tying them together.
pub struct ResolvedMetric {
    name: String,
    canonical: Kernel,
    alternative: Option<Kernel>,
    correction: Option<Correction>,
}

impl ResolvedMetric {
    /// Registry name this metric resolved from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The kernel the engine computes with: the alternative form when one
    /// exists, the canonical kernel otherwise.
    #[inline]
    pub fn working(&self) -> &(dyn Fn(&[f32], &[f32]) -> f32 + Send + Sync) {
        match &self.alternative {
            Some(alt) => alt.as_ref(),
            None => self.canonical.as_ref(),
        }
    }

    /// The canonical (user-facing) kernel.
    #[inline]
    pub fn canonical(&self) -> &(dyn Fn(&[f32], &[f32]) -> f32 + Send + Sync) {
        self.canonical.as_ref()
    }

    /// Whether working-form keys need a correction pass.
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

    /// The raw correction function, if any.
    pub fn correction(&self) -> Option<Correction> {
        self.correction
    }
}

impl std::fmt::Debug for ResolvedMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedMetric")
            .field("name", &self.name)
            .field("has_alternative", &self.alternative.is_some())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Corrections
// ─────────────────────────────────────────────────────────────────────────────

fn correct_sqrt(d: f32) -> f32 {
    d.sqrt()
}

/// Inverse of the log2-scaled alternatives: `1 - 2^(-d)`.
fn correct_exp2(d: f32) -> f32 {
    1.0 - (-d).exp2()
}

/// Hellinger correction: `sqrt(1 - 2^(-d))`.
fn correct_exp2_sqrt(d: f32) -> f32 {
    (1.0 - (-d).exp2()).max(0.0).sqrt()
}

// ─────────────────────────────────────────────────────────────────────────────
// Minkowski family
// ─────────────────────────────────────────────────────────────────────────────

/// Squared euclidean distance.
#[inline]
#[must_use]
pub fn sqeuclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}

/// Euclidean (L2) distance.
#[inline]
#[must_use]
pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    sqeuclidean(a, b).sqrt()
}

/// Euclidean distance standardised by per-coordinate variances:
/// `sqrt(sum((x_i - y_i)^2 / v_i))`.
#[inline]
#[must_use]
pub fn standardised_euclidean(a: &[f32], b: &[f32], variances: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .zip(variances.iter())
        .map(|((x, y), v)| (x - y) * (x - y) / v)
        .sum::<f32>()
        .sqrt()
}

/// Manhattan (taxicab, L1) distance.
#[inline]
#[must_use]
pub fn manhattan(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
}

/// Chebyshev (L-infinity) distance.
#[inline]
#[must_use]
pub fn chebyshev(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f32::max)
}

/// Minkowski distance `(sum |x_i - y_i|^p)^(1/p)`.
///
/// p=1 is manhattan, p=2 is euclidean; prefer the specialised kernels for
/// those exponents.
#[inline]
#[must_use]
pub fn minkowski(a: &[f32], b: &[f32], p: f32) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs().powf(p))
        .sum::<f32>()
        .powf(1.0 / p)
}

// ─────────────────────────────────────────────────────────────────────────────
// Inner-product family
// ─────────────────────────────────────────────────────────────────────────────

/// Cosine distance `1 - cos(a, b)`.
#[inline]
#[must_use]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 && norm_b == 0.0 {
        0.0
    } else if norm_a == 0.0 || norm_b == 0.0 {
        1.0
    } else {
        1.0 - dot / (norm_a * norm_b).sqrt()
    }
}

/// Log-scaled cosine: `log2(sqrt(|a||b|) / <a,b>)`.
///
/// Order-equivalent to [`cosine`] on the positive-dot-product domain;
/// saturates to `+inf` elsewhere so those pairs sort last either way.
#[inline]
#[must_use]
pub fn alternative_cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 && norm_b == 0.0 {
        0.0
    } else if norm_a == 0.0 || norm_b == 0.0 || dot <= 0.0 {
        f32::INFINITY
    } else {
        ((norm_a * norm_b).sqrt() / dot).log2()
    }
}

/// Dot-product distance `1 - <a,b>`, clamped to 1 for non-positive products.
#[inline]
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    let d: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    if d <= 0.0 {
        1.0
    } else {
        1.0 - d
    }
}

/// Log-scaled dot distance: `-log2(<a,b>)`, `+inf` for non-positive products.
#[inline]
#[must_use]
pub fn alternative_dot(a: &[f32], b: &[f32]) -> f32 {
    let d: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    if d <= 0.0 {
        f32::INFINITY
    } else {
        -d.log2()
    }
}

/// Correlation distance: cosine of the mean-centered vectors.
#[inline]
#[must_use]
pub fn correlation(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len() as f32;
    let mu_a: f32 = a.iter().sum::<f32>() / n;
    let mu_b: f32 = b.iter().sum::<f32>() / n;

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        let sx = x - mu_a;
        let sy = y - mu_b;
        dot += sx * sy;
        norm_a += sx * sx;
        norm_b += sy * sy;
    }
    if norm_a == 0.0 && norm_b == 0.0 {
        0.0
    } else if dot == 0.0 {
        1.0
    } else {
        1.0 - dot / (norm_a * norm_b).sqrt()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Set / element-wise distances
// ─────────────────────────────────────────────────────────────────────────────

/// Hamming distance: fraction of coordinates that differ.
#[inline]
#[must_use]
pub fn hamming(a: &[f32], b: &[f32]) -> f32 {
    let differing = a.iter().zip(b.iter()).filter(|(x, y)| x != y).count();
    differing as f32 / a.len() as f32
}

/// Jaccard distance on nonzero supports: `(union - intersection) / union`.
#[inline]
#[must_use]
pub fn jaccard(a: &[f32], b: &[f32]) -> f32 {
    let mut non_zero = 0u32;
    let mut equal = 0u32;
    for (x, y) in a.iter().zip(b.iter()) {
        let xt = *x != 0.0;
        let yt = *y != 0.0;
        non_zero += (xt || yt) as u32;
        equal += (xt && yt) as u32;
    }
    if non_zero == 0 {
        0.0
    } else {
        (non_zero - equal) as f32 / non_zero as f32
    }
}

/// Log-scaled jaccard: `-log2(intersection / union)`.
#[inline]
#[must_use]
pub fn alternative_jaccard(a: &[f32], b: &[f32]) -> f32 {
    let mut non_zero = 0u32;
    let mut equal = 0u32;
    for (x, y) in a.iter().zip(b.iter()) {
        let xt = *x != 0.0;
        let yt = *y != 0.0;
        non_zero += (xt || yt) as u32;
        equal += (xt && yt) as u32;
    }
    if non_zero == 0 {
        0.0
    } else {
        -(equal as f32 / non_zero as f32).log2()
    }
}

/// Canberra distance: `sum |x_i - y_i| / (|x_i| + |y_i|)` over nonzero
/// denominators.
#[inline]
#[must_use]
pub fn canberra(a: &[f32], b: &[f32]) -> f32 {
    let mut result = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        let denominator = x.abs() + y.abs();
        if denominator > 0.0 {
            result += (x - y).abs() / denominator;
        }
    }
    result
}

/// Bray-Curtis dissimilarity: `sum |x_i - y_i| / sum |x_i + y_i|`.
#[inline]
#[must_use]
pub fn bray_curtis(a: &[f32], b: &[f32]) -> f32 {
    let mut numerator = 0.0f32;
    let mut denominator = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        numerator += (x - y).abs();
        denominator += (x + y).abs();
    }
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Distribution distances
// ─────────────────────────────────────────────────────────────────────────────

/// Hellinger distance between non-negative vectors treated as unnormalized
/// distributions.
#[inline]
#[must_use]
pub fn hellinger(a: &[f32], b: &[f32]) -> f32 {
    let mut result = 0.0f32;
    let mut l1_a = 0.0f32;
    let mut l1_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        result += (x * y).sqrt();
        l1_a += x;
        l1_b += y;
    }
    if l1_a == 0.0 && l1_b == 0.0 {
        0.0
    } else if l1_a == 0.0 || l1_b == 0.0 {
        1.0
    } else {
        (1.0 - result / (l1_a * l1_b).sqrt()).max(0.0).sqrt()
    }
}

/// Log-scaled hellinger: `log2(sqrt(l1_a * l1_b) / sum sqrt(x_i * y_i))`.
#[inline]
#[must_use]
pub fn alternative_hellinger(a: &[f32], b: &[f32]) -> f32 {
    let mut result = 0.0f32;
    let mut l1_a = 0.0f32;
    let mut l1_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        result += (x * y).sqrt();
        l1_a += x;
        l1_b += y;
    }
    if l1_a == 0.0 && l1_b == 0.0 {
        0.0
    } else if l1_a == 0.0 || l1_b == 0.0 || result <= 0.0 {
        f32::INFINITY
    } else {
        ((l1_a * l1_b).sqrt() / result).log2()
    }
}

/// Jensen-Shannon divergence of epsilon-smoothed distributions.
#[inline]
#[must_use]
pub fn jensen_shannon(a: &[f32], b: &[f32]) -> f32 {
    let dim = a.len() as f32;
    let l1_a: f32 = a.iter().sum::<f32>() + f32::EPSILON * dim;
    let l1_b: f32 = b.iter().sum::<f32>() + f32::EPSILON * dim;

    let mut result = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        let px = (x + f32::EPSILON) / l1_a;
        let py = (y + f32::EPSILON) / l1_b;
        let m = 0.5 * (px + py);
        result += 0.5 * (px * (px / m).ln() + py * (py / m).ln());
    }
    result
}

/// Symmetric Kullback-Leibler divergence of epsilon-smoothed distributions.
#[inline]
#[must_use]
pub fn symmetric_kl(a: &[f32], b: &[f32]) -> f32 {
    let dim = a.len() as f32;
    let l1_a: f32 = a.iter().sum::<f32>() + f32::EPSILON * dim;
    let l1_b: f32 = b.iter().sum::<f32>() + f32::EPSILON * dim;

    let mut result = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        let px = (x + f32::EPSILON) / l1_a;
        let py = (y + f32::EPSILON) / l1_b;
        result += px * (px / py).ln() + py * (py / px).ln();
    }
    result
}

/// 1-D Wasserstein distance: Minkowski distance between the normalized
/// cumulative distributions.
#[inline]
#[must_use]
pub fn wasserstein_1d(a: &[f32], b: &[f32], p: f32) -> f32 {
    let sum_a: f32 = a.iter().sum();
    let sum_b: f32 = b.iter().sum();

    let mut cdf_a = 0.0f32;
    let mut cdf_b = 0.0f32;
    let mut result = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        cdf_a += x / sum_a;
        cdf_b += y / sum_b;
        result += (cdf_a - cdf_b).abs().powf(p);
    }
    result.powf(1.0 / p)
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Resolve a metric name to its kernels.
///
/// Names are matched case-insensitively and include the common aliases
/// (`l2`, `l1`, `taxicab`, `linf`, `seuclidean`, `braycurtis`,
/// `jensen-shannon`, `kantorovich_1d`, ...). `dim` is the data dimension,
/// used to validate parameter vectors.
pub fn resolve(name: &str, params: &MetricParams, dim: usize) -> Result<ResolvedMetric> {
    let lower = name.to_ascii_lowercase();
    let resolved =
        |canonical: Kernel, alternative: Option<Kernel>, correction: Option<Correction>| {
            ResolvedMetric {
                name: lower.clone(),
                canonical,
                alternative,
                correction,
            }
        };

    let metric = match lower.as_str() {
        "euclidean" | "l2" => resolved(
            Box::new(euclidean),
            Some(Box::new(sqeuclidean)),
            Some(correct_sqrt),
        ),
        "sqeuclidean" => resolved(Box::new(sqeuclidean), None, None),
        "manhattan" | "taxicab" | "l1" => resolved(Box::new(manhattan), None, None),
        "chebyshev" | "linfinity" | "linfty" | "linf" => {
            resolved(Box::new(chebyshev), None, None)
        }
        "minkowski" => {
            let p = params.p.unwrap_or(2.0);
            if !(p > 0.0) {
                return Err(DescentError::InvalidParameter(format!(
                    "minkowski requires p > 0, got {p}"
                )));
            }
            resolved(Box::new(move |a, b| minkowski(a, b, p)), None, None)
        }
        "seuclidean" | "standardised_euclidean" | "standardized_euclidean" => {
            let variances = params.variances.clone().ok_or_else(|| {
                DescentError::InvalidParameter(
                    "seuclidean requires per-coordinate variances".to_string(),
                )
            })?;
            if variances.len() != dim {
                return Err(DescentError::InvalidParameter(format!(
                    "seuclidean variance length {} does not match dimension {}",
                    variances.len(),
                    dim
                )));
            }
            if variances.iter().any(|v| !(*v > 0.0)) {
                return Err(DescentError::InvalidParameter(
                    "seuclidean variances must be positive".to_string(),
                ));
            }
            resolved(
                Box::new(move |a, b| standardised_euclidean(a, b, &variances)),
                None,
                None,
            )
        }
        "cosine" => resolved(
            Box::new(cosine),
            Some(Box::new(alternative_cosine)),
            Some(correct_exp2),
        ),
        "dot" => resolved(
            Box::new(dot),
            Some(Box::new(alternative_dot)),
            Some(correct_exp2),
        ),
        "correlation" => resolved(Box::new(correlation), None, None),
        "hamming" => resolved(Box::new(hamming), None, None),
        "jaccard" => resolved(
            Box::new(jaccard),
            Some(Box::new(alternative_jaccard)),
            Some(correct_exp2),
        ),
        "canberra" => resolved(Box::new(canberra), None, None),
        "braycurtis" | "bray_curtis" => resolved(Box::new(bray_curtis), None, None),
        "hellinger" => resolved(
            Box::new(hellinger),
            Some(Box::new(alternative_hellinger)),
            Some(correct_exp2_sqrt),
        ),
        "jensen_shannon" | "jensen-shannon" => resolved(Box::new(jensen_shannon), None, None),
        "symmetric_kl" | "symmetric-kl" | "symmetric_kullback_liebler" => {
            resolved(Box::new(symmetric_kl), None, None)
        }
        "wasserstein_1d" | "wasserstein-1d" | "kantorovich_1d" | "kantorovich-1d" => {
            let p = params.p.unwrap_or(1.0);
            if !(p > 0.0) {
                return Err(DescentError::InvalidParameter(format!(
                    "wasserstein_1d requires p > 0, got {p}"
                )));
            }
            resolved(Box::new(move |a, b| wasserstein_1d(a, b, p)), None, None)
        }
        _ => return Err(DescentError::UnknownMetric(name.to_string())),
    };
    Ok(metric)
}
