//! Random-projection tree forest.
//!
//! Each tree recursively halves the point set with a random affine
//! hyperplane: two distinct pivots drawn from the bucket, normal
//! `X[a] - X[b]`, offset at their midpoint, ties broken by a fair coin so
//! duplicate-heavy data still splits. Buckets at or below `leaf_size`
//! become leaves. The forest serves two roles: its leaf buckets seed the
//! neighbor graph before refinement, and at query time descending the
//! trees yields locality-aware entry points for the graph walk.

use rand::rngs::SmallRng;
use rand::Rng;
use rayon::prelude::*;

use crate::matrix::Matrix;
use crate::rng::{self, PURPOSE_TREE};
use crate::sparse::SparseRows;

/// Splitting hyperplane: dense normal vector or sorted coordinate list.
#[derive(Debug, Clone)]
enum Hyperplane {
    Dense(Vec<f32>),
    Sparse(Vec<(u32, f32)>),
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        normal: Hyperplane,
        offset: f32,
        left: u32,
        right: u32,
    },
    Leaf(Vec<i32>),
}

#[derive(Debug, Clone)]
struct RPTree {
    nodes: Vec<Node>,
    root: u32,
}

/// An ensemble of independent random-projection trees.
#[derive(Debug, Clone)]
pub struct RPForest {
    trees: Vec<RPTree>,
}

#[inline]
fn dense_dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Dot of a coordinate-list hyperplane against a sparse row.
#[inline]
fn plane_sparse_dot(plane: &[(u32, f32)], qi: &[u32], qv: &[f32]) -> f32 {
    let mut result = 0.0f32;
    let mut i = 0;
    let mut j = 0;
    while i < plane.len() && j < qi.len() {
        if plane[i].0 < qi[j] {
            i += 1;
        } else if plane[i].0 > qi[j] {
            j += 1;
        } else {
            result += plane[i].1 * qv[j];
            i += 1;
            j += 1;
        }
    }
    result
}

/// Merged subtraction of two sparse rows into a sorted coordinate list.
fn sparse_difference(ai: &[u32], av: &[f32], bi: &[u32], bv: &[f32]) -> Vec<(u32, f32)> {
    let mut out = Vec::with_capacity(ai.len() + bi.len());
    let mut i = 0;
    let mut j = 0;
    while i < ai.len() && j < bi.len() {
        if ai[i] < bi[j] {
            out.push((ai[i], av[i]));
            i += 1;
        } else if ai[i] > bi[j] {
            out.push((bi[j], -bv[j]));
            j += 1;
        } else {
            out.push((ai[i], av[i] - bv[j]));
            i += 1;
            j += 1;
        }
    }
    out.extend(ai[i..].iter().zip(av[i..].iter()).map(|(&c, &v)| (c, v)));
    out.extend(bi[j..].iter().zip(bv[j..].iter()).map(|(&c, &v)| (c, -v)));
    out
}

/// Pick two distinct positions in `0..len` uniformly.
#[inline]
fn distinct_pair(len: usize, rng: &mut SmallRng) -> (usize, usize) {
    let a = rng.gen_range(0..len);
    let mut b = rng.gen_range(0..len - 1);
    if b >= a {
        b += 1;
    }
    (a, b)
}

/// Route one bucket to left/right by hyperplane side; ties flip a coin.
fn partition<F>(bucket: &[i32], margin: F, rng: &mut SmallRng) -> (Vec<i32>, Vec<i32>)
where
    F: Fn(usize) -> f32,
{
    let mut left = Vec::with_capacity(bucket.len() / 2 + 1);
    let mut right = Vec::with_capacity(bucket.len() / 2 + 1);
    for &id in bucket {
        let m = margin(id as usize);
        let go_left = if m > 0.0 {
            true
        } else if m < 0.0 {
            false
        } else {
            rng.gen_bool(0.5)
        };
        if go_left {
            left.push(id);
        } else {
            right.push(id);
        }
    }
    (left, right)
}

fn split_dense(
    data: &Matrix<f32>,
    bucket: Vec<i32>,
    leaf_size: usize,
    depth: usize,
    max_depth: usize,
    rng: &mut SmallRng,
    nodes: &mut Vec<Node>,
) -> u32 {
    if bucket.len() <= leaf_size || depth >= max_depth {
        nodes.push(Node::Leaf(bucket));
        return (nodes.len() - 1) as u32;
    }

    let (ia, ib) = distinct_pair(bucket.len(), rng);
    let pa = data.row(bucket[ia] as usize);
    let pb = data.row(bucket[ib] as usize);
    let normal: Vec<f32> = pa.iter().zip(pb.iter()).map(|(x, y)| x - y).collect();
    let offset = 0.5 * (dense_dot(&normal, pa) + dense_dot(&normal, pb));

    let (left_bucket, right_bucket) = partition(
        &bucket,
        |id| dense_dot(&normal, data.row(id)) - offset,
        rng,
    );
    if left_bucket.is_empty() || right_bucket.is_empty() {
        // All coin flips landed one way on a duplicate bucket; the depth
        // cap bounds the retry.
        return split_dense(data, bucket, leaf_size, depth + 1, max_depth, rng, nodes);
    }

    let left = split_dense(data, left_bucket, leaf_size, depth + 1, max_depth, rng, nodes);
    let right = split_dense(data, right_bucket, leaf_size, depth + 1, max_depth, rng, nodes);
    nodes.push(Node::Split {
        normal: Hyperplane::Dense(normal),
        offset,
        left,
        right,
    });
    (nodes.len() - 1) as u32
}

fn split_sparse(
    data: &SparseRows,
    bucket: Vec<i32>,
    leaf_size: usize,
    depth: usize,
    max_depth: usize,
    rng: &mut SmallRng,
    nodes: &mut Vec<Node>,
) -> u32 {
    if bucket.len() <= leaf_size || depth >= max_depth {
        nodes.push(Node::Leaf(bucket));
        return (nodes.len() - 1) as u32;
    }

    let (ia, ib) = distinct_pair(bucket.len(), rng);
    let (ai, av) = data.row(bucket[ia] as usize);
    let (bi, bv) = data.row(bucket[ib] as usize);
    let normal = sparse_difference(ai, av, bi, bv);
    let offset = 0.5 * (plane_sparse_dot(&normal, ai, av) + plane_sparse_dot(&normal, bi, bv));

    let (left_bucket, right_bucket) = partition(
        &bucket,
        |id| {
            let (xi, xv) = data.row(id);
            plane_sparse_dot(&normal, xi, xv) - offset
        },
        rng,
    );
    if left_bucket.is_empty() || right_bucket.is_empty() {
        return split_sparse(data, bucket, leaf_size, depth + 1, max_depth, rng, nodes);
    }

    let left = split_sparse(data, left_bucket, leaf_size, depth + 1, max_depth, rng, nodes);
    let right = split_sparse(data, right_bucket, leaf_size, depth + 1, max_depth, rng, nodes);
    nodes.push(Node::Split {
        normal: Hyperplane::Sparse(normal),
        offset,
        left,
        right,
    });
    (nodes.len() - 1) as u32
}

/// Forced-leaf depth: `2 * ceil(log2(n)) + 8`.
fn depth_cap(n: usize) -> usize {
    2 * ((usize::BITS - n.next_power_of_two().leading_zeros()) as usize - 1) + 8
}

impl RPForest {
    /// Build `n_trees` independent trees over dense points.
    pub(crate) fn build_dense(
        data: &Matrix<f32>,
        n_trees: usize,
        leaf_size: usize,
        seed: u64,
    ) -> Self {
        let n = data.nrows();
        let max_depth = depth_cap(n);
        let trees = (0..n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = rng::stream(seed, t as u64, 0, PURPOSE_TREE);
                let mut nodes = Vec::new();
                let bucket: Vec<i32> = (0..n as i32).collect();
                let root = split_dense(data, bucket, leaf_size, 0, max_depth, &mut rng, &mut nodes);
                RPTree { nodes, root }
            })
            .collect();
        Self { trees }
    }

    /// Build `n_trees` independent trees over sparse points.
    pub(crate) fn build_sparse(
        data: &SparseRows,
        n_trees: usize,
        leaf_size: usize,
        seed: u64,
    ) -> Self {
        let n = data.nrows();
        let max_depth = depth_cap(n);
        let trees = (0..n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = rng::stream(seed, t as u64, 0, PURPOSE_TREE);
                let mut nodes = Vec::new();
                let bucket: Vec<i32> = (0..n as i32).collect();
                let root = split_sparse(data, bucket, leaf_size, 0, max_depth, &mut rng, &mut nodes);
                RPTree { nodes, root }
            })
            .collect();
        Self { trees }
    }

    /// Number of trees in the ensemble.
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Every leaf bucket across every tree.
    pub(crate) fn leaf_buckets(&self) -> impl Iterator<Item = &[i32]> + '_ {
        self.trees.iter().flat_map(|tree| {
            tree.nodes.iter().filter_map(|node| match node {
                Node::Leaf(bucket) => Some(bucket.as_slice()),
                Node::Split { .. } => None,
            })
        })
    }

    fn route_tree<'a, F>(tree: &'a RPTree, margin: &F, rng: &mut SmallRng) -> &'a [i32]
    where
        F: Fn(&Hyperplane, f32) -> f32,
    {
        let mut node = &tree.nodes[tree.root as usize];
        loop {
            match node {
                Node::Leaf(bucket) => return bucket,
                Node::Split {
                    normal,
                    offset,
                    left,
                    right,
                } => {
                    let m = margin(normal, *offset);
                    let go_left = if m > 0.0 {
                        true
                    } else if m < 0.0 {
                        false
                    } else {
                        rng.gen_bool(0.5)
                    };
                    let child = if go_left { *left } else { *right };
                    node = &tree.nodes[child as usize];
                }
            }
        }
    }

    fn route<F>(&self, margin: F, rng: &mut SmallRng, out: &mut Vec<i32>)
    where
        F: Fn(&Hyperplane, f32) -> f32,
    {
        out.clear();
        for tree in &self.trees {
            out.extend_from_slice(Self::route_tree(tree, &margin, rng));
        }
        out.sort_unstable();
        out.dedup();
    }

    /// Candidate seed ids for a dense query: union of the leaf buckets the
    /// query descends into, deduplicated.
    pub(crate) fn route_dense(&self, q: &[f32], rng: &mut SmallRng, out: &mut Vec<i32>) {
        self.route(
            |normal, offset| match normal {
                Hyperplane::Dense(n) => dense_dot(n, q) - offset,
                Hyperplane::Sparse(n) => {
                    // Dense query against a sparse-built tree: treat the
                    // coordinate list as the only nonzero entries.
                    n.iter().map(|&(c, v)| v * q[c as usize]).sum::<f32>() - offset
                }
            },
            rng,
            out,
        );
    }

    /// Candidate seed ids for a sparse query.
    pub(crate) fn route_sparse(
        &self,
        qi: &[u32],
        qv: &[f32],
        rng: &mut SmallRng,
        out: &mut Vec<i32>,
    ) {
        self.route(
            |normal, offset| match normal {
                Hyperplane::Sparse(n) => plane_sparse_dot(n, qi, qv) - offset,
                Hyperplane::Dense(n) => {
                    qi.iter()
                        .zip(qv.iter())
                        .map(|(&c, &v)| n[c as usize] * v)
                        .sum::<f32>()
                        - offset
                }
            },
            rng,
            out,
        );
    }
}
