//! Descriptor matching.
//!
//! A stateless linear scan over a candidate pool: the query matches a
//! candidate when the Euclidean distance between their descriptors falls
//! strictly below the threshold, and an image matches when any of its
//! faces does. Distances accumulate in f64 so sums over 128 terms do not
//! drift across the threshold.

use std::collections::HashSet;

use super::FaceError;

/// Euclidean distance between two equal-length descriptors.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = *x as f64 - *y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Scan a candidate pool of `(image id, descriptor)` pairs and return the
/// ids of images with at least one face within `threshold` of the query.
///
/// An empty pool yields an empty set. A query of the wrong length is
/// rejected; candidates of a different length (descriptors written under
/// another model configuration) are never comparable and are skipped.
pub fn match_images<'a, I>(
    query: &[f32],
    descriptor_len: usize,
    candidates: I,
    threshold: f64,
) -> Result<HashSet<i64>, FaceError>
where
    I: IntoIterator<Item = (i64, &'a [f32])>,
{
    if query.len() != descriptor_len {
        return Err(FaceError::Validation {
            expected: descriptor_len,
            actual: query.len(),
        });
    }

    let mut matches = HashSet::new();
    for (image_id, descriptor) in candidates {
        if descriptor.len() != query.len() {
            continue;
        }
        if euclidean_distance(query, descriptor) < threshold {
            matches.insert(image_id);
        }
    }

    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matched(query: &[f32], pool: &[(i64, Vec<f32>)], threshold: f64) -> HashSet<i64> {
        let candidates = pool.iter().map(|(id, d)| (*id, d.as_slice()));
        match_images(query, query.len(), candidates, threshold).unwrap()
    }

    #[test]
    fn exact_match_has_zero_distance() {
        let d: Vec<f32> = (0..128).map(|i| (i as f32).sin()).collect();
        assert_eq!(euclidean_distance(&d, &d), 0.0);
        let pool = vec![(7, d.clone())];
        // Zero distance matches for any positive threshold
        assert_eq!(matched(&d, &pool, 1e-9), HashSet::from([7]));
    }

    #[test]
    fn threshold_is_strict() {
        // 0.5 is exactly representable, so the distance is exactly the
        // threshold and the strict comparison is actually exercised
        let a = vec![0.0f32; 128];
        let mut b = vec![0.0f32; 128];
        b[0] = 0.5;
        assert_eq!(euclidean_distance(&a, &b), 0.5);

        let pool = vec![(1, b)];
        // Exactly at the threshold: no match
        assert!(matched(&a, &pool, 0.5).is_empty());
        // Just above the distance: match
        assert_eq!(matched(&a, &pool, 0.5 + 1e-9), HashSet::from([1]));
    }

    #[test]
    fn any_face_of_an_image_matches() {
        let near: Vec<f32> = vec![0.0; 128];
        let mut far = vec![0.0f32; 128];
        far[0] = 10.0;

        // Image 1 has one far and one near face; image 2 only far
        let pool = vec![(1, far.clone()), (1, near.clone()), (2, far)];
        assert_eq!(matched(&near, &pool, 0.6), HashSet::from([1]));
    }

    #[test]
    fn empty_pool_is_empty_result() {
        let d = vec![0.0f32; 128];
        assert!(matched(&d, &[], 0.6).is_empty());
    }

    #[test]
    fn wrong_length_query_is_rejected() {
        let query = vec![0.0f32; 64];
        let err = match_images(&query, 128, std::iter::empty(), 0.6).unwrap_err();
        match err {
            FaceError::Validation { expected, actual } => {
                assert_eq!(expected, 128);
                assert_eq!(actual, 64);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn mismatched_candidates_are_skipped() {
        let query = vec![0.0f32; 128];
        let stale = vec![0.0f32; 512];
        let pool = vec![(1, stale)];
        assert!(matched_with_len(&query, &pool, 0.6).is_empty());

        fn matched_with_len(
            query: &[f32],
            pool: &[(i64, Vec<f32>)],
            threshold: f64,
        ) -> HashSet<i64> {
            let candidates = pool.iter().map(|(id, d)| (*id, d.as_slice()));
            match_images(query, 128, candidates, threshold).unwrap()
        }
    }

    #[test]
    fn distance_is_accumulated_in_double_precision() {
        // Each of the 128 components contributes a tiny squared term;
        // an f32 accumulator would round them away
        let a = vec![0.0f32; 128];
        let b = vec![1e-4f32; 128];
        let component = 1e-4f32 as f64;
        let expected = (128.0 * component * component).sqrt();
        let got = euclidean_distance(&a, &b);
        assert!((got - expected).abs() < 1e-15, "got {got}, expected {expected}");
    }
}
