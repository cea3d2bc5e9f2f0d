//! Property-based tests for the heap list and the metric catalog.
//!
//! These verify invariants that must hold for any input:
//! - heap rows stay max-ordered, duplicate-free, and sortable
//! - kernels are symmetric where mathematics says so
//! - sparse kernels agree with dense kernels on densified rows

use proptest::prelude::*;

mod heap_props {
    use super::*;
    use descent::{HeapList, NONE};

    fn max_heap_ordered(keys: &[f32]) -> bool {
        for c in 0..keys.len() {
            let left = 2 * c + 1;
            let right = left + 1;
            if left < keys.len() && keys[c] < keys[left] {
                return false;
            }
            if right < keys.len() && keys[c] < keys[right] {
                return false;
            }
        }
        true
    }

    prop_compose! {
        fn arb_pushes(max_len: usize)(
            pushes in prop::collection::vec((0i32..64, 0.0f32..100.0), 1..max_len)
        ) -> Vec<(i32, f32)> {
            pushes
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn heap_order_survives_any_push_sequence(
            pushes in arb_pushes(80),
            capacity in 1usize..12,
        ) {
            let mut heaps = HeapList::with_flags(1, capacity, f32::INFINITY, 1);
            for (id, key) in pushes {
                heaps.checked_push_flagged(0, id, key, 1);
                prop_assert!(max_heap_ordered(heaps.row_keys(0)));
            }
        }

        #[test]
        fn ids_stay_unique(pushes in arb_pushes(80), capacity in 1usize..12) {
            let mut heaps = HeapList::with_flags(1, capacity, f32::INFINITY, 1);
            for (id, key) in pushes {
                heaps.checked_push_flagged(0, id, key, 1);
            }
            let mut ids: Vec<i32> = heaps
                .row_indices(0)
                .iter()
                .copied()
                .filter(|&id| id != NONE)
                .collect();
            let before = ids.len();
            ids.sort_unstable();
            ids.dedup();
            prop_assert_eq!(before, ids.len());
        }

        #[test]
        fn push_accepts_iff_it_improves(pushes in arb_pushes(80)) {
            let capacity = 6;
            let mut heaps = HeapList::with_flags(1, capacity, f32::INFINITY, 1);
            for (id, key) in pushes {
                let max_before = heaps.max(0);
                let present = heaps.row_indices(0).contains(&id);
                let accepted = heaps.checked_push_flagged(0, id, key, 1);
                if key >= max_before || present {
                    prop_assert_eq!(accepted, 0);
                } else {
                    prop_assert_eq!(accepted, 1);
                }
            }
        }

        #[test]
        fn heapsort_orders_rows_ascending(
            pushes in arb_pushes(80),
            capacity in 1usize..12,
        ) {
            let mut heaps = HeapList::with_flags(1, capacity, f32::INFINITY, 1);
            for (id, key) in pushes {
                heaps.checked_push_flagged(0, id, key, 1);
            }
            let occupied = heaps.size(0);
            heaps.heapsort();
            let keys = heaps.row_keys(0);
            for j in 1..keys.len() {
                prop_assert!(keys[j - 1] <= keys[j]);
            }
            // Occupied slots come first, empty padding last.
            let ids = heaps.row_indices(0);
            prop_assert!(ids[..occupied].iter().all(|&id| id != NONE));
            prop_assert!(ids[occupied..].iter().all(|&id| id == NONE));
        }
    }
}

mod metric_props {
    use super::*;
    use descent::distance;

    prop_compose! {
        fn arb_vector(dim: usize)(vec in prop::collection::vec(-10.0f32..10.0, dim)) -> Vec<f32> {
            vec
        }
    }

    prop_compose! {
        fn arb_positive_vector(dim: usize)(
            vec in prop::collection::vec(0.01f32..10.0, dim)
        ) -> Vec<f32> {
            vec
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn symmetric_kernels_commute(a in arb_vector(24), b in arb_vector(24)) {
            let pairs: [(&str, fn(&[f32], &[f32]) -> f32); 6] = [
                ("sqeuclidean", distance::sqeuclidean),
                ("manhattan", distance::manhattan),
                ("chebyshev", distance::chebyshev),
                ("cosine", distance::cosine),
                ("canberra", distance::canberra),
                ("hamming", distance::hamming),
            ];
            for (name, kernel) in pairs {
                let ab = kernel(&a, &b);
                let ba = kernel(&b, &a);
                prop_assert!(
                    (ab - ba).abs() <= 1e-4 * ab.abs().max(1.0),
                    "{} not symmetric: {} vs {}", name, ab, ba
                );
            }
        }

        #[test]
        fn euclidean_triangle_inequality(
            a in arb_vector(12),
            b in arb_vector(12),
            c in arb_vector(12),
        ) {
            let ac = distance::euclidean(&a, &c);
            let ab = distance::euclidean(&a, &b);
            let bc = distance::euclidean(&b, &c);
            prop_assert!(ac <= ab + bc + 1e-3);
        }

        #[test]
        fn cosine_correction_inverts_alternative(
            a in arb_positive_vector(16),
            b in arb_positive_vector(16),
        ) {
            // Positive vectors keep the dot product positive, where the
            // log-scaled form is finite.
            let alt = distance::alternative_cosine(&a, &b);
            let corrected = 1.0 - (-alt).exp2();
            let truth = distance::cosine(&a, &b);
            prop_assert!(
                (corrected - truth).abs() < 1e-3,
                "corrected {} vs cosine {}", corrected, truth
            );
        }

        #[test]
        fn sqeuclidean_orders_like_euclidean(
            q in arb_vector(8),
            a in arb_vector(8),
            b in arb_vector(8),
        ) {
            let cmp_alt = distance::sqeuclidean(&q, &a) < distance::sqeuclidean(&q, &b);
            let cmp_true = distance::euclidean(&q, &a) < distance::euclidean(&q, &b);
            prop_assert_eq!(cmp_alt, cmp_true);
        }
    }
}

mod sparse_props {
    use super::*;
    use descent::sparse;

    prop_compose! {
        fn arb_sparse_row(dim: usize)(
            mask in prop::collection::vec(any::<bool>(), dim),
            values in prop::collection::vec(-5.0f32..5.0, dim),
        ) -> (Vec<u32>, Vec<f32>) {
            let mut idx = Vec::new();
            let mut val = Vec::new();
            for (i, (&keep, &v)) in mask.iter().zip(values.iter()).enumerate() {
                if keep && v != 0.0 {
                    idx.push(i as u32);
                    val.push(v);
                }
            }
            (idx, val)
        }
    }

    fn densify(idx: &[u32], val: &[f32], dim: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; dim];
        for (&i, &v) in idx.iter().zip(val.iter()) {
            out[i as usize] = v;
        }
        out
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn sparse_kernels_agree_with_dense(
            a in arb_sparse_row(20),
            b in arb_sparse_row(20),
        ) {
            use descent::distance;
            let da = densify(&a.0, &a.1, 20);
            let db = densify(&b.0, &b.1, 20);

            let cases = [
                (
                    sparse::sparse_sqeuclidean(&a.0, &a.1, &b.0, &b.1),
                    distance::sqeuclidean(&da, &db),
                ),
                (
                    sparse::sparse_manhattan(&a.0, &a.1, &b.0, &b.1),
                    distance::manhattan(&da, &db),
                ),
                (
                    sparse::sparse_cosine(&a.0, &a.1, &b.0, &b.1),
                    distance::cosine(&da, &db),
                ),
                (
                    sparse::sparse_jaccard(&a.0, &a.1, &b.0, &b.1),
                    distance::jaccard(&da, &db),
                ),
                (
                    sparse::sparse_hamming(&a.0, &a.1, &b.0, &b.1, 20),
                    distance::hamming(&da, &db),
                ),
            ];
            for (sparse_val, dense_val) in cases {
                prop_assert!(
                    (sparse_val - dense_val).abs() <= 1e-4 * dense_val.abs().max(1.0),
                    "sparse {} vs dense {}", sparse_val, dense_val
                );
            }
        }
    }
}
