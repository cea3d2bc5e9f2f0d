//! Bounded max-heaps in packed parallel arrays.
//!
//! A [`HeapList`] is H fixed-capacity binary max-heaps stored as three
//! parallel H x K matrices (`indices`, `keys`, `flags`). Row `i` is one
//! heap addressed as `left = 2c + 1`, `right = 2c + 2`; the root holds the
//! worst (largest) key, so a candidate beats the heap iff it beats the root.
//! Keys are packed into their own matrix because the sift loop only compares
//! keys; splitting the streams keeps the comparisons cache-dense.
//!
//! Duplicate suppression is a linear scan of the row's ids. K is small
//! (tens), the row is contiguous, and the scan is cheaper in practice than
//! maintaining a side hash set per heap.

use crate::distance::Correction;
use crate::matrix::Matrix;

/// Sentinel id for an empty heap slot. Never a valid point id.
pub const NONE: i32 = i32::MIN;

/// Push a candidate into one heap row, carrying a flag through the sift.
///
/// Rejects when the key does not beat the row maximum (`>=`: equal keys
/// lose) or when the id is already present. On success the root is replaced
/// and sifted down; returns 1 iff the row changed.
pub(crate) fn checked_push_row(
    indices: &mut [i32],
    keys: &mut [f32],
    flags: &mut [u8],
    idx: i32,
    key: f32,
    flag: u8,
) -> u32 {
    if key >= keys[0] {
        return 0;
    }
    if indices.contains(&idx) {
        return 0;
    }

    let stop = indices.len();
    let mut current = 0;
    loop {
        let left = 2 * current + 1;
        let right = left + 1;
        let swap;
        if left >= stop {
            break;
        } else if right >= stop {
            if keys[left] > key {
                swap = left;
            } else {
                break;
            }
        } else if keys[left] >= keys[right] {
            if keys[left] > key {
                swap = left;
            } else {
                break;
            }
        } else if keys[right] > key {
            swap = right;
        } else {
            break;
        }
        indices[current] = indices[swap];
        keys[current] = keys[swap];
        flags[current] = flags[swap];
        current = swap;
    }

    indices[current] = idx;
    keys[current] = key;
    flags[current] = flag;
    1
}

/// Flagless variant of [`checked_push_row`] for query-time heaps.
pub(crate) fn checked_push_row_flagless(
    indices: &mut [i32],
    keys: &mut [f32],
    idx: i32,
    key: f32,
) -> u32 {
    if key >= keys[0] {
        return 0;
    }
    if indices.contains(&idx) {
        return 0;
    }

    let stop = indices.len();
    let mut current = 0;
    loop {
        let left = 2 * current + 1;
        let right = left + 1;
        let swap;
        if left >= stop {
            break;
        } else if right >= stop {
            if keys[left] > key {
                swap = left;
            } else {
                break;
            }
        } else if keys[left] >= keys[right] {
            if keys[left] > key {
                swap = left;
            } else {
                break;
            }
        } else if keys[right] > key {
            swap = right;
        } else {
            break;
        }
        indices[current] = indices[swap];
        keys[current] = keys[swap];
        current = swap;
    }

    indices[current] = idx;
    keys[current] = key;
    1
}

/// Sift the root of a row down within `[0, stop)`.
fn siftdown_row(indices: &mut [i32], keys: &mut [f32], stop: usize) {
    let key = keys[0];
    let idx = indices[0];

    let mut current = 0;
    loop {
        let left = 2 * current + 1;
        let right = left + 1;
        let swap;
        if left >= stop {
            break;
        } else if right >= stop {
            if keys[left] > key {
                swap = left;
            } else {
                break;
            }
        } else if keys[left] >= keys[right] {
            if keys[left] > key {
                swap = left;
            } else {
                break;
            }
        } else if keys[right] > key {
            swap = right;
        } else {
            break;
        }
        indices[current] = indices[swap];
        keys[current] = keys[swap];
        current = swap;
    }
    indices[current] = idx;
    keys[current] = key;
}

/// A list of H bounded max-heaps over `(idx, key, flag)` tuples.
#[derive(Debug, Clone)]
pub struct HeapList {
    n_heaps: usize,
    n_nodes: usize,
    indices: Matrix<i32>,
    keys: Matrix<f32>,
    flags: Matrix<u8>,
}

impl HeapList {
    /// Create `n_heaps` empty heaps of capacity `n_nodes` with flag columns.
    ///
    /// Empty slots read `(NONE, key0, flag0)`; `key0` is normally `+inf` so
    /// any finite candidate is accepted until the heap fills.
    pub fn with_flags(n_heaps: usize, n_nodes: usize, key0: f32, flag0: u8) -> Self {
        Self {
            n_heaps,
            n_nodes,
            indices: Matrix::full(n_heaps, n_nodes, NONE),
            keys: Matrix::full(n_heaps, n_nodes, key0),
            flags: Matrix::full(n_heaps, n_nodes, flag0),
        }
    }

    /// Create heaps without flag columns (query-time result heaps).
    pub fn flagless(n_heaps: usize, n_nodes: usize, key0: f32) -> Self {
        Self {
            n_heaps,
            n_nodes,
            indices: Matrix::full(n_heaps, n_nodes, NONE),
            keys: Matrix::full(n_heaps, n_nodes, key0),
            flags: Matrix::full(0, 0, 0),
        }
    }

    #[inline]
    pub fn nheaps(&self) -> usize {
        self.n_heaps
    }

    #[inline]
    pub fn nnodes(&self) -> usize {
        self.n_nodes
    }

    /// Whether this list carries no flag columns.
    #[inline]
    pub fn noflags(&self) -> bool {
        self.flags.nrows() == 0
    }

    /// Largest key currently in heap `i`.
    #[inline]
    pub fn max(&self, i: usize) -> f32 {
        self.keys.get(i, 0)
    }

    /// Number of occupied slots in heap `i`.
    pub fn size(&self, i: usize) -> usize {
        self.indices.row(i).iter().filter(|&&idx| idx != NONE).count()
    }

    /// Push with a flag; see [`checked_push_row`].
    #[inline]
    pub fn checked_push_flagged(&mut self, i: usize, idx: i32, key: f32, flag: u8) -> u32 {
        checked_push_row(
            self.indices.row_mut(i),
            self.keys.row_mut(i),
            self.flags.row_mut(i),
            idx,
            key,
            flag,
        )
    }

    /// Push without a flag; see [`checked_push_row_flagless`].
    #[inline]
    pub fn checked_push(&mut self, i: usize, idx: i32, key: f32) -> u32 {
        checked_push_row_flagless(self.indices.row_mut(i), self.keys.row_mut(i), idx, key)
    }

    /// Sort every row ascending by key.
    ///
    /// Each row already satisfies the max-heap criterion, so only the
    /// extraction half of heapsort runs: swap the root with the last
    /// unsorted slot and sift the new root down within the shrunken prefix.
    pub fn heapsort(&mut self) {
        for i in 0..self.n_heaps {
            let indices = self.indices.row_mut(i);
            let keys = self.keys.row_mut(i);
            for j in (1..indices.len()).rev() {
                indices.swap(0, j);
                keys.swap(0, j);
                siftdown_row(indices, keys, j);
            }
        }
    }

    /// Retire every occupant: clear all flags to "old".
    pub fn retire_all(&mut self) {
        self.flags.fill(0);
    }

    /// Apply a correction to every occupied key.
    pub fn apply_correction(&mut self, correction: Correction) {
        for (idx, key) in self
            .indices
            .as_slice()
            .iter()
            .zip(self.keys.as_mut_slice().iter_mut())
        {
            if *idx != NONE {
                *key = correction(*key);
            }
        }
    }

    /// Ids of heap `i`.
    #[inline]
    pub fn row_indices(&self, i: usize) -> &[i32] {
        self.indices.row(i)
    }

    /// Keys of heap `i`.
    #[inline]
    pub fn row_keys(&self, i: usize) -> &[f32] {
        self.keys.row(i)
    }

    /// Flags of heap `i`. Panics on a flagless list.
    #[inline]
    pub fn row_flags(&self, i: usize) -> &[u8] {
        self.flags.row(i)
    }

    /// The full id matrix.
    pub fn indices(&self) -> &Matrix<i32> {
        &self.indices
    }

    /// The full key matrix.
    pub fn keys(&self) -> &Matrix<f32> {
        &self.keys
    }

    /// Consume into the (indices, keys) matrices.
    pub fn into_parts(self) -> (Matrix<i32>, Matrix<f32>) {
        (self.indices, self.keys)
    }

    /// Base pointers for the striped-lock writer.
    ///
    /// Rows of the three matrices share the stride `n_nodes`; the writer
    /// reconstructs disjoint row slices from these.
    pub(crate) fn as_raw_parts(&mut self) -> (*mut i32, *mut f32, *mut u8, usize) {
        (
            self.indices.as_mut_slice().as_mut_ptr(),
            self.keys.as_mut_slice().as_mut_ptr(),
            self.flags.as_mut_slice().as_mut_ptr(),
            self.n_nodes,
        )
    }
}
