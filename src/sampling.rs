//! Exclusion-constrained random sampling.
//!
//! Negative examples must never collide with a user's known positives, so
//! every sampling site in the crate draws through [`sample_excluding`]:
//! uniform integers from `[0, n)` with a forbidden subset.

use std::collections::HashSet;

use failure::Fail;
use rand::seq::SliceRandom;
use rand::Rng;

/// Above this excluded fraction, without-replacement sampling materializes
/// the explicit complement instead of rejection sampling. Rejection keeps
/// the expected cost sub-linear in `n` only while most draws are accepted.
const COMPLEMENT_THRESHOLD: f64 = 0.5;

/// Sampling error types.
#[derive(Debug, Fail)]
pub enum SamplingError {
    /// Sampling from an empty range.
    #[fail(display = "cannot draw {} values from an empty range", requested)]
    EmptyRange {
        /// Number of values requested.
        requested: usize,
    },
    /// The exclusion set leaves fewer candidates than requested.
    #[fail(
        display = "insufficient candidates: requested {} of {} values, but only {} are not excluded",
        requested, range, available
    )]
    InsufficientCandidates {
        /// Number of values requested.
        requested: usize,
        /// Size of the sampled range.
        range: usize,
        /// Number of non-excluded values in the range.
        available: usize,
    },
}

/// Draws `k` integers uniformly from `[0, n)`, none of which is a member
/// of `exclusion`.
///
/// With replacement, values are rejection-sampled and may repeat. Without
/// replacement, the returned values are distinct; when the exclusion set
/// covers more than half the range, the complement is materialized and
/// sampled directly, which bounds the cost when rejection would thrash.
///
/// Requests that cannot be satisfied fail with
/// [`SamplingError::InsufficientCandidates`]; the output is never silently
/// truncated. Exclusion members outside `[0, n)` are ignored.
pub fn sample_excluding<R: Rng + ?Sized>(
    n: usize,
    k: usize,
    with_replacement: bool,
    exclusion: &HashSet<usize>,
    rng: &mut R,
) -> Result<Vec<usize>, SamplingError> {
    if k == 0 {
        return Ok(Vec::new());
    }

    if n == 0 {
        return Err(SamplingError::EmptyRange { requested: k });
    }

    let num_excluded = if exclusion.len() < n {
        exclusion.iter().filter(|&&value| value < n).count()
    } else {
        (0..n).filter(|value| exclusion.contains(value)).count()
    };
    let available = n - num_excluded;

    let required = if with_replacement { 1 } else { k };
    if available < required {
        return Err(SamplingError::InsufficientCandidates {
            requested: k,
            range: n,
            available,
        });
    }

    if with_replacement {
        let mut sampled = Vec::with_capacity(k);

        while sampled.len() < k {
            let candidate = rng.gen_range(0..n);

            if !exclusion.contains(&candidate) {
                sampled.push(candidate);
            }
        }

        return Ok(sampled);
    }

    if num_excluded as f64 / n as f64 > COMPLEMENT_THRESHOLD {
        let mut complement: Vec<usize> =
            (0..n).filter(|value| !exclusion.contains(value)).collect();
        let (chosen, _) = complement.partial_shuffle(rng, k);

        Ok(chosen.to_vec())
    } else {
        let mut sampled = Vec::with_capacity(k);
        let mut drawn = HashSet::with_capacity(k);

        while sampled.len() < k {
            let candidate = rng.gen_range(0..n);

            if !exclusion.contains(&candidate) && drawn.insert(candidate) {
                sampled.push(candidate);
            }
        }

        Ok(sampled)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;

    use super::*;

    fn exclusion(values: &[usize]) -> HashSet<usize> {
        values.iter().cloned().collect()
    }

    #[test]
    fn never_returns_excluded_values() {
        let mut rng = XorShiftRng::seed_from_u64(42);
        let excluded = exclusion(&[1, 2]);

        for _ in 0..100 {
            let sampled = sample_excluding(5, 3, false, &excluded, &mut rng).unwrap();

            assert_eq!(sampled.len(), 3);
            for value in &sampled {
                assert!([0, 3, 4].contains(value));
            }
        }
    }

    #[test]
    fn without_replacement_values_are_distinct() {
        let mut rng = XorShiftRng::seed_from_u64(17);

        for _ in 0..100 {
            let sampled = sample_excluding(100, 50, false, &exclusion(&[0, 1, 2]), &mut rng).unwrap();
            let distinct: HashSet<usize> = sampled.iter().cloned().collect();

            assert_eq!(distinct.len(), sampled.len());
        }
    }

    #[test]
    fn with_replacement_respects_exclusion() {
        let mut rng = XorShiftRng::seed_from_u64(7);
        let excluded = exclusion(&[0, 2, 4, 6, 8]);

        let sampled = sample_excluding(10, 1000, true, &excluded, &mut rng).unwrap();

        assert_eq!(sampled.len(), 1000);
        assert!(sampled.iter().all(|value| value % 2 == 1));
    }

    #[test]
    fn large_exclusion_takes_complement_path() {
        let mut rng = XorShiftRng::seed_from_u64(3);
        // 7 of 10 values excluded: forces complement materialization.
        let excluded = exclusion(&[0, 1, 2, 3, 4, 5, 6]);

        let sampled = sample_excluding(10, 3, false, &excluded, &mut rng).unwrap();
        let distinct: HashSet<usize> = sampled.iter().cloned().collect();

        assert_eq!(distinct.len(), 3);
        assert!(sampled.iter().all(|value| *value >= 7 && *value < 10));
    }

    #[test]
    fn insufficient_candidates_is_an_error() {
        let mut rng = XorShiftRng::seed_from_u64(1);

        let result = sample_excluding(5, 4, false, &exclusion(&[1, 2]), &mut rng);

        match result {
            Err(SamplingError::InsufficientCandidates {
                requested,
                range,
                available,
            }) => {
                assert_eq!(requested, 4);
                assert_eq!(range, 5);
                assert_eq!(available, 3);
            }
            other => panic!("expected insufficient candidates, got {:?}", other),
        }
    }

    #[test]
    fn fully_excluded_range_fails_with_replacement() {
        let mut rng = XorShiftRng::seed_from_u64(9);

        let result = sample_excluding(3, 1, true, &exclusion(&[0, 1, 2]), &mut rng);

        assert!(matches!(
            result,
            Err(SamplingError::InsufficientCandidates { available: 0, .. })
        ));
    }

    #[test]
    fn empty_range_fails() {
        let mut rng = XorShiftRng::seed_from_u64(11);

        assert!(matches!(
            sample_excluding(0, 1, true, &HashSet::new(), &mut rng),
            Err(SamplingError::EmptyRange { requested: 1 })
        ));
    }

    #[test]
    fn zero_requests_succeed_trivially() {
        let mut rng = XorShiftRng::seed_from_u64(5);

        let sampled = sample_excluding(0, 0, false, &HashSet::new(), &mut rng).unwrap();

        assert!(sampled.is_empty());
    }

    #[test]
    fn same_seed_same_draws() {
        let excluded = exclusion(&[3, 4, 5]);

        let first =
            sample_excluding(50, 10, false, &excluded, &mut XorShiftRng::seed_from_u64(99)).unwrap();
        let second =
            sample_excluding(50, 10, false, &excluded, &mut XorShiftRng::seed_from_u64(99)).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn exclusion_members_outside_range_are_ignored() {
        let mut rng = XorShiftRng::seed_from_u64(21);
        let excluded = exclusion(&[100, 200, 300]);

        let sampled = sample_excluding(5, 5, false, &excluded, &mut rng).unwrap();
        let distinct: HashSet<usize> = sampled.iter().cloned().collect();

        assert_eq!(distinct.len(), 5);
    }
}
