//! Classifier interface and vector distances
//!
//! A classifier partitions a [`PairMap`] of similarity vectors into
//! matches and non-matches, each scored. The three implementations
//! ([`crate::classify_kmeans`], [`crate::classify_nearest`],
//! [`crate::classify_rule`]) share this trait and these distances.

use std::sync::Arc;

use crate::types::{LinkError, PairMap, Record, ScoreMap, SimVector};

/// Partition similarity vectors into scored matches and non-matches.
pub trait Classifier {
    fn classify(&self, comparisons: &PairMap) -> Result<(ScoreMap, ScoreMap), LinkError>;
}

/// Tri-state pair judgement: `Some(true)` match, `Some(false)`
/// non-match, `None` cannot say. Used both as the rule-based classifier
/// and as an override on the nearest-neighbour classifier.
pub type Rule = Arc<dyn Fn(&Record, &Record, &SimVector) -> Option<bool> + Send + Sync>;

/// Distance between similarity vectors
///
/// Dimensions where either operand is missing are dropped from the sum;
/// a missing component reduces the dimensionality of the calculation
/// rather than contributing a substituted value.
#[derive(Clone, Debug)]
pub enum Distance {
    /// Euclidean distance.
    L2,
    /// Normalized Euclidean distance (Mahalanobis with a diagonal
    /// covariance matrix): each squared difference is divided by the
    /// squared per-component standard deviation, so noisy components
    /// weigh less.
    NormL2(Vec<f64>),
}

impl Distance {
    /// Check this distance can handle vectors of `dimension` components.
    pub fn validate(&self, dimension: usize) -> Result<(), LinkError> {
        match self {
            Distance::L2 => Ok(()),
            Distance::NormL2(stdevs) if stdevs.len() == dimension => Ok(()),
            Distance::NormL2(stdevs) => Err(LinkError::VectorLength {
                expected: dimension,
                actual: stdevs.len(),
            }),
        }
    }

    /// Distance between two equal-length vectors.
    pub fn between(&self, a: &[Option<f64>], b: &[Option<f64>]) -> f64 {
        let terms = a.iter().zip(b).enumerate().filter_map(|(i, (x, y))| {
            let (x, y) = (x.as_ref()?, y.as_ref()?);
            let diff = match self {
                Distance::L2 => x - y,
                Distance::NormL2(stdevs) => (x - y) / stdevs[i],
            };
            Some(diff * diff)
        });
        terms.sum::<f64>().sqrt()
    }
}

/// Check that every vector has the same number of components and return
/// that dimensionality, `None` for an empty map.
pub fn check_dimension(comparisons: &PairMap) -> Result<Option<usize>, LinkError> {
    let mut vectors = comparisons.values();
    let Some(first) = vectors.next() else {
        return Ok(None);
    };
    for vector in vectors {
        if vector.len() != first.len() {
            return Err(LinkError::VectorLength {
                expected: first.len(),
                actual: vector.len(),
            });
        }
    }
    Ok(Some(first.len()))
}

/// Smoothed confidence score: the log of the ratio of the distances to
/// the non-match and match sides. Positive means match, negative
/// non-match; the 0.1 terms keep zero distances finite.
pub fn log_ratio_score(dist_nomatch: f64, dist_match: f64) -> f64 {
    ((dist_nomatch + 0.1) / (dist_match + 0.1)).log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2() {
        let d = Distance::L2;
        assert_eq!(d.between(&[Some(2.0), Some(2.0)], &[Some(3.0), Some(3.0)]), 2.0f64.sqrt());
        assert_eq!(d.between(&[Some(3.0), Some(2.0)], &[Some(3.0), Some(2.0)]), 0.0);
        assert_eq!(
            d.between(
                &[Some(4.0), Some(3.0), Some(2.0), Some(3.0)],
                &[Some(4.0), Some(1.0), Some(3.0), Some(3.0)]
            ),
            5.0f64.sqrt()
        );
    }

    #[test]
    fn test_l2_drops_missing_dimensions() {
        let d = Distance::L2;
        assert_eq!(d.between(&[Some(1.0), None], &[Some(0.0), Some(9.0)]), 1.0);
        assert_eq!(d.between(&[None], &[None]), 0.0);
    }

    #[test]
    fn test_norm_l2() {
        let d = Distance::NormL2(vec![1.0, 1.0]);
        assert_eq!(d.between(&[Some(2.0), Some(2.0)], &[Some(3.0), Some(3.0)]), 2.0f64.sqrt());
        let d = Distance::NormL2(vec![0.5, 1.0]);
        assert_eq!(d.between(&[Some(2.0), Some(2.0)], &[Some(3.0), Some(3.0)]), 5.0f64.sqrt());
    }

    #[test]
    fn test_norm_l2_validates_stdev_length() {
        let d = Distance::NormL2(vec![1.0]);
        assert!(d.validate(2).is_err());
        assert!(d.validate(1).is_ok());
    }

    #[test]
    fn test_log_ratio_score_sign() {
        assert!(log_ratio_score(1.0, 0.0) > 0.0);
        assert!(log_ratio_score(0.0, 1.0) < 0.0);
        assert_eq!(log_ratio_score(0.5, 0.5), 0.0);
    }
}
