//! Best-first graph search for queries.
//!
//! A query walks the built neighbor graph from forest-routed entry points:
//! a min-heap frontier orders unexplored nodes by distance to the query, a
//! bounded flagless heap row tracks the best `search_size` results, and the
//! walk stops once the closest frontier entry cannot beat the current worst
//! result. A visited bitset guarantees each point is evaluated at most once,
//! so the walk terminates even on graphs with isolated vertices.

use std::collections::BinaryHeap;

use fixedbitset::FixedBitSet;

use crate::heap::{HeapList, NONE};
use crate::matrix::Matrix;

/// Frontier entry during a graph walk.
#[derive(Clone, Copy, PartialEq)]
pub(crate) struct Candidate {
    pub id: i32,
    pub key: f32,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Min-heap: smaller key = higher priority. total_cmp gives IEEE 754
        // total ordering, so NaN cannot poison the heap.
        self.key.total_cmp(&other.key).reverse()
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Walk the neighbor graph for one query.
///
/// `seeds` must be deduplicated and already marked in `visited`;
/// `dist_to` evaluates the working-form kernel against the query. Returns
/// the result heap, unsorted and in working-form keys.
pub(crate) fn search_one<D>(
    neighbors: &Matrix<i32>,
    seeds: &[i32],
    dist_to: &D,
    search_size: usize,
    visited: &mut FixedBitSet,
) -> HeapList
where
    D: Fn(usize) -> f32,
{
    let mut results = HeapList::flagless(1, search_size, f32::INFINITY);
    let mut frontier: BinaryHeap<Candidate> = BinaryHeap::with_capacity(search_size * 2);

    for &s in seeds {
        let key = dist_to(s as usize);
        results.checked_push(0, s, key);
        frontier.push(Candidate { id: s, key });
    }

    while let Some(candidate) = frontier.pop() {
        if candidate.key > results.max(0) {
            break;
        }
        // Graph rows are sorted ascending with NONE padding at the tail.
        for &nb in neighbors.row(candidate.id as usize) {
            if nb == NONE {
                break;
            }
            if visited.contains(nb as usize) {
                continue;
            }
            visited.insert(nb as usize);
            let key = dist_to(nb as usize);
            if results.checked_push(0, nb, key) == 1 {
                frontier.push(Candidate { id: nb, key });
            }
        }
    }

    results
}
