//! Two-centroid clustering of similarity vectors
//!
//! A specialized k-means with k=2. Similarity vectors live in `[0, 1]`
//! per component, so the match cluster sits near the upper corner: the
//! per-component maxima seed the match centroid and the minima the
//! non-match centroid. Missing components are excluded from distances
//! and from centroid means, and a centroid component with no
//! contributing vectors becomes missing itself.
//!
//! Accuracy degrades with many dimensions or many missing values; the
//! decision boundary is linear.

use log::debug;

use crate::classify::{check_dimension, log_ratio_score, Classifier, Distance};
use crate::types::{LinkError, PairMap, ScoreMap, SimVector};

pub struct KMeansClassifier {
    distance: Distance,
    max_iter: usize,
}

impl KMeansClassifier {
    pub fn new(distance: Distance) -> Self {
        KMeansClassifier {
            distance,
            max_iter: 10,
        }
    }

    /// Cap on refinement iterations (default 10); the loop also stops at
    /// a fixed point of the assignments.
    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }
}

impl Classifier for KMeansClassifier {
    fn classify(&self, comparisons: &PairMap) -> Result<(ScoreMap, ScoreMap), LinkError> {
        if comparisons.is_empty() {
            return Ok((ScoreMap::new(), ScoreMap::new()));
        }
        let dim = check_dimension(comparisons)?.unwrap_or(0);
        self.distance.validate(dim)?;
        debug!("k-means over {} vectors of dimension {dim}", comparisons.len());

        let component = |i: usize, pick: fn(f64, f64) -> f64| -> Option<f64> {
            comparisons
                .values()
                .filter_map(|v| v[i])
                .reduce(pick)
        };
        let mut high: SimVector = (0..dim).map(|i| component(i, f64::max)).collect();
        let mut low: SimVector = (0..dim).map(|i| component(i, f64::min)).collect();

        // Every vector starts in the non-match class.
        let mut assignments: Vec<bool> = vec![false; comparisons.len()];
        let mut iters = 0;
        let mut changed = 1;

        while changed > 0 && iters < self.max_iter {
            changed = 0;
            iters += 1;

            let mut high_total = vec![0.0; dim];
            let mut high_count = vec![0usize; dim];
            let mut low_total = vec![0.0; dim];
            let mut low_count = vec![0usize; dim];

            for (vector, assigned) in comparisons.values().zip(assignments.iter_mut()) {
                let dist_high = self.distance.between(vector, &high);
                let dist_low = self.distance.between(vector, &low);
                let is_match = dist_high < dist_low;
                if is_match != *assigned {
                    changed += 1;
                    *assigned = is_match;
                }
                let (total, count) = if is_match {
                    (&mut high_total, &mut high_count)
                } else {
                    (&mut low_total, &mut low_count)
                };
                for (i, value) in vector.iter().enumerate() {
                    if let Some(value) = value {
                        total[i] += value;
                        count[i] += 1;
                    }
                }
            }

            let mean = |total: &[f64], count: &[usize], i: usize| -> Option<f64> {
                (count[i] > 0).then(|| total[i] / count[i] as f64)
            };
            high = (0..dim).map(|i| mean(&high_total, &high_count, i)).collect();
            low = (0..dim).map(|i| mean(&low_total, &low_count, i)).collect();
            debug!("k-means iteration {iters}: {changed} reassigned");
        }

        let mut matches = ScoreMap::new();
        let mut nomatches = ScoreMap::new();
        for ((pair, vector), is_match) in comparisons.iter().zip(&assignments) {
            let score = log_ratio_score(
                self.distance.between(vector, &low),
                self.distance.between(vector, &high),
            );
            if *is_match {
                matches.insert(pair.clone(), score);
            } else {
                nomatches.insert(pair.clone(), score);
            }
        }
        debug!(
            "k-means finished after {iters} iterations: {} matches, {} non-matches",
            matches.len(),
            nomatches.len()
        );
        Ok((matches, nomatches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Record, Schema};
    use std::sync::Arc;

    /// One-field records standing in for arbitrary pair endpoints.
    fn pairs(vectors: &[(&str, &str, SimVector)]) -> PairMap {
        let schema = Arc::new(Schema::new(["Id"]).unwrap());
        let rec = |id: &str| Record::new(schema.clone(), vec![id.to_string()]);
        vectors
            .iter()
            .map(|(a, b, v)| ((rec(a), rec(b)), v.clone()))
            .collect()
    }

    fn ids(scores: &ScoreMap) -> Vec<(String, String)> {
        scores
            .keys()
            .map(|(a, b)| {
                (
                    a.get(0).unwrap().to_string(),
                    b.get(0).unwrap().to_string(),
                )
            })
            .collect()
    }

    #[test]
    fn test_clusters_one_dimensional_vectors() {
        let comparisons = pairs(&[
            ("1", "2", vec![Some(0.5)]),
            ("2", "3", vec![Some(0.8)]),
            ("3", "4", vec![Some(0.9)]),
            ("4", "5", vec![Some(0.0)]),
        ]);
        let (matches, nomatches) = KMeansClassifier::new(Distance::L2)
            .classify(&comparisons)
            .unwrap();
        assert_eq!(
            ids(&matches),
            vec![
                ("1".to_string(), "2".to_string()),
                ("2".to_string(), "3".to_string()),
                ("3".to_string(), "4".to_string())
            ]
        );
        assert_eq!(ids(&nomatches), vec![("4".to_string(), "5".to_string())]);
        assert!(matches.values().all(|score| *score > 0.0));
        assert!(nomatches.values().all(|score| *score < 0.0));
    }

    #[test]
    fn test_missing_components_do_not_contaminate_centroids() {
        let comparisons = pairs(&[
            ("1", "2", vec![Some(0.5), None]),
            ("2", "3", vec![Some(0.8), Some(0.7)]),
            ("3", "4", vec![Some(0.9), Some(0.5)]),
            ("4", "5", vec![Some(0.0), Some(0.5)]),
        ]);
        let (matches, nomatches) = KMeansClassifier::new(Distance::L2)
            .classify(&comparisons)
            .unwrap();
        assert_eq!(matches.len(), 3);
        assert_eq!(ids(&nomatches), vec![("4".to_string(), "5".to_string())]);
    }

    #[test]
    fn test_empty_input() {
        let (matches, nomatches) = KMeansClassifier::new(Distance::L2)
            .classify(&PairMap::new())
            .unwrap();
        assert!(matches.is_empty());
        assert!(nomatches.is_empty());
    }

    #[test]
    fn test_rejects_ragged_vectors() {
        let comparisons = pairs(&[
            ("1", "2", vec![Some(0.5)]),
            ("2", "3", vec![Some(0.8), Some(0.1)]),
        ]);
        let result = KMeansClassifier::new(Distance::L2).classify(&comparisons);
        assert!(matches!(result, Err(LinkError::VectorLength { .. })));
    }

    #[test]
    fn test_all_missing_component_becomes_missing_centroid() {
        // Second component is missing everywhere; classification must
        // still partition on the first component alone.
        let comparisons = pairs(&[
            ("1", "2", vec![Some(0.9), None]),
            ("2", "3", vec![Some(0.1), None]),
        ]);
        let (matches, nomatches) = KMeansClassifier::new(Distance::L2)
            .classify(&comparisons)
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(nomatches.len(), 1);
    }
}
