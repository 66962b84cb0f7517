//! Nearest-neighbour classification of similarity vectors
//!
//! Labeled example vectors (typically produced by comparing known
//! duplicate and known distinct record pairs) anchor the two classes;
//! each input vector joins whichever class holds its nearest example.
//! An optional tri-state rule can overrule the geometry for pairs the
//! caller understands better than the examples do.

use crate::classify::{check_dimension, log_ratio_score, Classifier, Distance, Rule};
use crate::types::{LinkError, PairMap, ScoreMap, SimVector};

pub struct NearestClassifier {
    match_examples: Vec<SimVector>,
    nomatch_examples: Vec<SimVector>,
    distance: Distance,
    rule: Option<Rule>,
}

impl NearestClassifier {
    /// Requires at least one example of each class; example vectors must
    /// agree on dimensionality with each other and with the distance.
    pub fn new(
        match_examples: Vec<SimVector>,
        nomatch_examples: Vec<SimVector>,
        distance: Distance,
    ) -> Result<Self, LinkError> {
        if match_examples.is_empty() || nomatch_examples.is_empty() {
            return Err(LinkError::EmptyExamples);
        }
        let dim = match_examples[0].len();
        for example in match_examples.iter().chain(&nomatch_examples) {
            if example.len() != dim {
                return Err(LinkError::VectorLength {
                    expected: dim,
                    actual: example.len(),
                });
            }
        }
        distance.validate(dim)?;
        Ok(NearestClassifier {
            match_examples,
            nomatch_examples,
            distance,
            rule: None,
        })
    }

    /// Attach a rule override: `Some(true)` forces a match with score
    /// 1.0, `Some(false)` a non-match with score 0.0, `None` falls back
    /// to the nearest-neighbour decision.
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rule = Some(rule);
        self
    }

    fn nearest(&self, vector: &SimVector, examples: &[SimVector]) -> f64 {
        examples
            .iter()
            .map(|example| self.distance.between(vector, example))
            .fold(f64::INFINITY, f64::min)
    }
}

impl Classifier for NearestClassifier {
    fn classify(&self, comparisons: &PairMap) -> Result<(ScoreMap, ScoreMap), LinkError> {
        if let Some(dim) = check_dimension(comparisons)? {
            if dim != self.match_examples[0].len() {
                return Err(LinkError::VectorLength {
                    expected: self.match_examples[0].len(),
                    actual: dim,
                });
            }
        }

        let mut matches = ScoreMap::new();
        let mut nomatches = ScoreMap::new();
        for (pair, vector) in comparisons {
            if let Some(rule) = &self.rule {
                match rule(&pair.0, &pair.1, vector) {
                    Some(true) => {
                        matches.insert(pair.clone(), 1.0);
                        continue;
                    }
                    Some(false) => {
                        nomatches.insert(pair.clone(), 0.0);
                        continue;
                    }
                    None => {}
                }
            }
            let match_dist = self.nearest(vector, &self.match_examples);
            let nomatch_dist = self.nearest(vector, &self.nomatch_examples);
            let score = log_ratio_score(nomatch_dist, match_dist);
            if score >= 0.0 {
                matches.insert(pair.clone(), score);
            } else {
                nomatches.insert(pair.clone(), score);
            }
        }
        Ok((matches, nomatches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Record, Schema};
    use std::sync::Arc;

    fn pairs(vectors: &[(&str, &str, SimVector)]) -> PairMap {
        let schema = Arc::new(Schema::new(["Id"]).unwrap());
        let rec = |id: &str| Record::new(schema.clone(), vec![id.to_string()]);
        vectors
            .iter()
            .map(|(a, b, v)| ((rec(a), rec(b)), v.clone()))
            .collect()
    }

    fn id_pairs(scores: &ScoreMap) -> Vec<(String, String)> {
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

    fn comparisons() -> PairMap {
        pairs(&[
            ("1", "2", vec![Some(0.5)]),
            ("2", "3", vec![Some(0.8)]),
            ("3", "4", vec![Some(0.9)]),
            ("4", "5", vec![Some(0.0)]),
        ])
    }

    #[test]
    fn test_assigns_by_nearest_example() {
        let classifier = NearestClassifier::new(
            vec![vec![Some(1.0)]],
            vec![vec![Some(0.4)]],
            Distance::L2,
        )
        .unwrap();
        let (matches, nomatches) = classifier.classify(&comparisons()).unwrap();
        assert_eq!(
            id_pairs(&matches),
            vec![
                ("2".to_string(), "3".to_string()),
                ("3".to_string(), "4".to_string())
            ]
        );
        assert_eq!(
            id_pairs(&nomatches),
            vec![
                ("1".to_string(), "2".to_string()),
                ("4".to_string(), "5".to_string())
            ]
        );
    }

    #[test]
    fn test_rule_override_forces_assignment() {
        let rule: Rule = Arc::new(|a, b, _| {
            (a.get(0) == Some("4") && b.get(0) == Some("5")).then_some(true)
        });
        let classifier = NearestClassifier::new(
            vec![vec![Some(1.0)]],
            vec![vec![Some(0.4)]],
            Distance::L2,
        )
        .unwrap()
        .rule(rule);
        let (matches, nomatches) = classifier.classify(&comparisons()).unwrap();
        let matched = id_pairs(&matches);
        assert!(matched.contains(&("4".to_string(), "5".to_string())));
        assert_eq!(matches[&comparisons().keys().last().unwrap().clone()], 1.0);
        assert!(id_pairs(&nomatches).contains(&("1".to_string(), "2".to_string())));
    }

    #[test]
    fn test_empty_examples_are_rejected() {
        let result = NearestClassifier::new(vec![], vec![vec![Some(0.0)]], Distance::L2);
        assert!(matches!(result, Err(LinkError::EmptyExamples)));
        let result = NearestClassifier::new(vec![vec![Some(1.0)]], vec![], Distance::L2);
        assert!(matches!(result, Err(LinkError::EmptyExamples)));
    }

    #[test]
    fn test_dimension_mismatch_with_input() {
        let classifier = NearestClassifier::new(
            vec![vec![Some(1.0), Some(1.0)]],
            vec![vec![Some(0.0), Some(0.0)]],
            Distance::L2,
        )
        .unwrap();
        let result = classifier.classify(&comparisons());
        assert!(matches!(result, Err(LinkError::VectorLength { .. })));
    }

    #[test]
    fn test_empty_input() {
        let classifier = NearestClassifier::new(
            vec![vec![Some(1.0)]],
            vec![vec![Some(0.4)]],
            Distance::L2,
        )
        .unwrap();
        let (matches, nomatches) = classifier.classify(&PairMap::new()).unwrap();
        assert!(matches.is_empty() && nomatches.is_empty());
    }
}
