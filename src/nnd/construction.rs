//! The NN-Descent refinement loop.
//!
//! Each round: partition every node's neighbors into new/old by flag,
//! subsample, build the reverse (transpose) lists, then run the local join
//! over candidate pairs and push improvements back into the shared heap
//! list. The round's successful-push count drives the convergence test.
//!
//! Two write strategies feed the shared heaps during the join:
//!
//! - striped per-row locks (default): workers push directly; a row's
//!   stripe lock serializes writers that land on the same rows,
//! - staged buffers (`low_memory`): workers emit [`NNUpdate`] batches per
//!   id chunk and a serial barrier drains them in chunk order, which makes
//!   the result bit-reproducible for a fixed seed.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::Rng;
use rayon::prelude::*;
use smallvec::SmallVec;

use crate::heap::{checked_push_row, HeapList, NONE};
use crate::rng::{self, PURPOSE_REVERSE, PURPOSE_SAMPLE};

/// Lock stripes for the shared heap list; far more stripes than worker
/// threads keeps collision probability negligible.
const STRIPES: usize = 2048;

/// Ids processed per staged-write work item.
const CHUNK: usize = 256;

/// One candidate edge produced by a local join.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NNUpdate {
    pub i: i32,
    pub j: i32,
    pub key: f32,
}

/// Knobs for [`refine`].
pub(crate) struct RefineOpts {
    pub max_candidates: usize,
    pub n_iters: usize,
    pub delta: f32,
    pub seed: u64,
    pub low_memory: bool,
}

/// What a refinement run did.
pub(crate) struct RefineOutcome {
    pub push_counts: Vec<usize>,
    pub converged: bool,
    pub cancelled: bool,
}

type CandidateList = SmallVec<[i32; 32]>;

/// Reservoir-downsample `list` to at most `cap` entries in place.
fn reservoir_truncate(list: &mut Vec<i32>, cap: usize, rng: &mut SmallRng) {
    if list.len() <= cap {
        return;
    }
    for t in cap..list.len() {
        let r = rng.gen_range(0..=t);
        if r < cap {
            list[r] = list[t];
        }
    }
    list.truncate(cap);
}

/// Striped-lock writer over a `HeapList`.
///
/// Holds the parent mutably for its whole lifetime and hands out pushes on
/// raw row slices.
struct StripedHeaps<'a> {
    indices: *mut i32,
    keys: *mut f32,
    flags: *mut u8,
    k: usize,
    locks: Box<[Mutex<()>]>,
    _heaps: PhantomData<&'a mut HeapList>,
}

// SAFETY: every access reconstructs only the slices of one row and takes
// that row's stripe lock first, so no two threads touch a row's memory
// concurrently; distinct rows are disjoint ranges of the backing store.
unsafe impl Send for StripedHeaps<'_> {}
unsafe impl Sync for StripedHeaps<'_> {}

impl<'a> StripedHeaps<'a> {
    fn new(heaps: &'a mut HeapList) -> Self {
        let (indices, keys, flags, k) = heaps.as_raw_parts();
        let locks = (0..STRIPES).map(|_| Mutex::new(())).collect::<Vec<_>>();
        Self {
            indices,
            keys,
            flags,
            k,
            locks: locks.into_boxed_slice(),
            _heaps: PhantomData,
        }
    }

    fn checked_push(&self, i: usize, idx: i32, key: f32) -> u32 {
        let _guard = self.locks[i % self.locks.len()].lock();
        // SAFETY: see the Sync impl; the row is exclusively ours while the
        // stripe lock is held.
        unsafe {
            let indices = std::slice::from_raw_parts_mut(self.indices.add(i * self.k), self.k);
            let keys = std::slice::from_raw_parts_mut(self.keys.add(i * self.k), self.k);
            let flags = std::slice::from_raw_parts_mut(self.flags.add(i * self.k), self.k);
            checked_push_row(indices, keys, flags, idx, key, 1)
        }
    }
}

fn is_cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.is_some_and(|c| c.load(Ordering::Relaxed))
}

/// Enumerate the round's join pairs for node `i` and feed them to `emit`.
///
/// Pairs are `(p, q)` with `p` drawn from the new list, `q` from new or
/// old, and `p < q`; symmetric coverage of the remaining orderings comes
/// from the reverse-neighbor union.
#[inline]
fn join_pairs<E>(new_list: &[i32], old_list: &[i32], mut emit: E)
where
    E: FnMut(i32, i32),
{
    for &p in new_list {
        for &q in new_list {
            if p < q {
                emit(p, q);
            }
        }
        for &q in old_list {
            if p < q {
                emit(p, q);
            }
        }
    }
}

/// Run NN-Descent rounds over `heaps` until convergence, iteration budget
/// exhaustion, or cancellation.
///
/// `dist` evaluates the working (alternative-form) kernel for a point pair.
pub(crate) fn refine<D>(
    heaps: &mut HeapList,
    dist: &D,
    opts: &RefineOpts,
    cancel: Option<&AtomicBool>,
) -> RefineOutcome
where
    D: Fn(usize, usize) -> f32 + Sync,
{
    let n = heaps.nheaps();
    let k = heaps.nnodes();
    let threshold = (opts.delta * k as f32 * n as f32) as usize;

    let mut outcome = RefineOutcome {
        push_counts: Vec::with_capacity(opts.n_iters),
        converged: false,
        cancelled: false,
    };

    for iter in 0..opts.n_iters {
        if is_cancelled(cancel) {
            outcome.cancelled = true;
            break;
        }

        // Sampling: per-row split into flagged-new (reservoir-capped) and
        // old neighbors. Lists are gathered in id order before sampling so
        // the draw depends on the neighbor set, not on heap array layout.
        let shared = &*heaps;
        let forward: Vec<(CandidateList, CandidateList)> = (0..n)
            .into_par_iter()
            .map(|i| {
                let mut rng = rng::stream(opts.seed, i as u64, iter as u64, PURPOSE_SAMPLE);
                let mut new_list = CandidateList::new();
                let mut old_list = CandidateList::new();
                let ids = shared.row_indices(i);
                let flags = shared.row_flags(i);
                for (slot, &id) in ids.iter().enumerate() {
                    if id == NONE {
                        continue;
                    }
                    if flags[slot] == 1 {
                        new_list.push(id);
                    } else {
                        old_list.push(id);
                    }
                }
                new_list.sort_unstable();
                old_list.sort_unstable();
                if new_list.len() > opts.max_candidates {
                    for t in opts.max_candidates..new_list.len() {
                        let r = rng.gen_range(0..=t);
                        if r < opts.max_candidates {
                            new_list[r] = new_list[t];
                        }
                    }
                    new_list.truncate(opts.max_candidates);
                }
                (new_list, old_list)
            })
            .collect();

        if is_cancelled(cancel) {
            outcome.cancelled = true;
            break;
        }

        // Reverse neighbors: transpose the sampled lists, then cap each
        // reverse list with its own reservoir stream.
        let mut rev_new: Vec<Vec<i32>> = vec![Vec::new(); n];
        let mut rev_old: Vec<Vec<i32>> = vec![Vec::new(); n];
        for (i, (new_list, old_list)) in forward.iter().enumerate() {
            for &j in new_list {
                rev_new[j as usize].push(i as i32);
            }
            for &j in old_list {
                rev_old[j as usize].push(i as i32);
            }
        }
        rev_new
            .par_iter_mut()
            .zip(rev_old.par_iter_mut())
            .enumerate()
            .for_each(|(i, (rn, ro))| {
                let mut rng = rng::stream(opts.seed, i as u64, iter as u64, PURPOSE_REVERSE);
                reservoir_truncate(rn, opts.max_candidates, &mut rng);
                reservoir_truncate(ro, opts.max_candidates, &mut rng);
            });

        // Union forward and reverse per node.
        let candidates: Vec<(Vec<i32>, Vec<i32>)> = forward
            .into_par_iter()
            .zip(rev_new.into_par_iter().zip(rev_old.into_par_iter()))
            .map(|((fwd_new, fwd_old), (rn, ro))| {
                let mut new_list: Vec<i32> = fwd_new.into_vec();
                new_list.extend(rn);
                new_list.sort_unstable();
                new_list.dedup();
                let mut old_list: Vec<i32> = fwd_old.into_vec();
                old_list.extend(ro);
                old_list.sort_unstable();
                old_list.dedup();
                (new_list, old_list)
            })
            .collect();

        // Everything present before this round is now old; only pushes
        // that land below retain flag = 1 into the next round.
        heaps.retire_all();

        if is_cancelled(cancel) {
            outcome.cancelled = true;
            break;
        }

        // Local join.
        let pushed = if opts.low_memory {
            join_staged(heaps, dist, &candidates, n)
        } else {
            join_striped(heaps, dist, &candidates, n)
        };
        outcome.push_counts.push(pushed);

        if pushed < threshold {
            outcome.converged = true;
            break;
        }
    }

    outcome
}

fn join_striped<D>(
    heaps: &mut HeapList,
    dist: &D,
    candidates: &[(Vec<i32>, Vec<i32>)],
    n: usize,
) -> usize
where
    D: Fn(usize, usize) -> f32 + Sync,
{
    let counter = AtomicUsize::new(0);
    let striped = StripedHeaps::new(heaps);
    (0..n).into_par_iter().for_each(|i| {
        let (new_list, old_list) = &candidates[i];
        let mut pushed = 0u32;
        join_pairs(new_list, old_list, |p, q| {
            let d = dist(p as usize, q as usize);
            pushed += striped.checked_push(p as usize, q, d);
            pushed += striped.checked_push(q as usize, p, d);
        });
        if pushed > 0 {
            counter.fetch_add(pushed as usize, Ordering::Relaxed);
        }
    });
    counter.into_inner()
}

fn join_staged<D>(
    heaps: &mut HeapList,
    dist: &D,
    candidates: &[(Vec<i32>, Vec<i32>)],
    n: usize,
) -> usize
where
    D: Fn(usize, usize) -> f32 + Sync,
{
    let n_chunks = n.div_ceil(CHUNK);
    let buffers: Vec<Vec<NNUpdate>> = (0..n_chunks)
        .into_par_iter()
        .map(|c| {
            let mut buffer = Vec::new();
            let lo = c * CHUNK;
            let hi = (lo + CHUNK).min(n);
            for i in lo..hi {
                let (new_list, old_list) = &candidates[i];
                join_pairs(new_list, old_list, |p, q| {
                    buffer.push(NNUpdate {
                        i: p,
                        j: q,
                        key: dist(p as usize, q as usize),
                    });
                });
            }
            buffer
        })
        .collect();

    // Serial drain in chunk order: arrival order, and therefore the graph,
    // is independent of thread scheduling.
    let mut pushed = 0usize;
    for buffer in &buffers {
        for update in buffer {
            pushed += heaps.checked_push_flagged(update.i as usize, update.j, update.key, 1) as usize;
            pushed += heaps.checked_push_flagged(update.j as usize, update.i, update.key, 1) as usize;
        }
    }
    pushed
}
