//! Rule-based classification
//!
//! A tri-state rule judges every pair directly: match (score 1.0),
//! non-match (score 0.0) or uncertain. Uncertain is a first-class
//! outcome: the driver can collect the undecided pairs and hand them to
//! a geometric classifier, using rules for the easy calls and geometry
//! for the rest.

use crate::classify::{Classifier, Rule};
use crate::types::{LinkError, PairMap, ScoreMap};

pub struct RuleClassifier {
    rule: Rule,
}

impl RuleClassifier {
    pub fn new(rule: Rule) -> Self {
        RuleClassifier { rule }
    }

    /// Classify and also return the undecided pairs with their vectors,
    /// ready to feed into another classifier.
    pub fn classify_with_uncertain(&self, comparisons: &PairMap) -> (ScoreMap, ScoreMap, PairMap) {
        let mut matches = ScoreMap::new();
        let mut nomatches = ScoreMap::new();
        let mut uncertain = PairMap::new();
        for (pair, vector) in comparisons {
            match (self.rule)(&pair.0, &pair.1, vector) {
                Some(true) => {
                    matches.insert(pair.clone(), 1.0);
                }
                Some(false) => {
                    nomatches.insert(pair.clone(), 0.0);
                }
                None => {
                    uncertain.insert(pair.clone(), vector.clone());
                }
            }
        }
        (matches, nomatches, uncertain)
    }
}

impl Classifier for RuleClassifier {
    fn classify(&self, comparisons: &PairMap) -> Result<(ScoreMap, ScoreMap), LinkError> {
        let (matches, nomatches, _) = self.classify_with_uncertain(comparisons);
        Ok((matches, nomatches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Record, Schema, SimVector};
    use std::sync::Arc;

    fn pairs(vectors: &[(&str, &str, SimVector)]) -> PairMap {
        let schema = Arc::new(Schema::new(["Id"]).unwrap());
        let rec = |id: &str| Record::new(schema.clone(), vec![id.to_string()]);
        vectors
            .iter()
            .map(|(a, b, v)| ((rec(a), rec(b)), v.clone()))
            .collect()
    }

    /// Match above 0.8, non-match below 0.2, otherwise undecided.
    fn banded_rule() -> Rule {
        Arc::new(|_, _, vector| {
            let value = vector[0]?;
            if value >= 0.8 {
                Some(true)
            } else if value <= 0.2 {
                Some(false)
            } else {
                None
            }
        })
    }

    #[test]
    fn test_tri_state_split() {
        let comparisons = pairs(&[
            ("1", "2", vec![Some(0.9)]),
            ("2", "3", vec![Some(0.5)]),
            ("3", "4", vec![Some(0.1)]),
            ("4", "5", vec![None]),
        ]);
        let classifier = RuleClassifier::new(banded_rule());
        let (matches, nomatches, uncertain) = classifier.classify_with_uncertain(&comparisons);

        assert_eq!(matches.len(), 1);
        assert_eq!(matches.values().copied().collect::<Vec<_>>(), vec![1.0]);
        assert_eq!(nomatches.len(), 1);
        assert_eq!(nomatches.values().copied().collect::<Vec<_>>(), vec![0.0]);
        // The mid-band pair and the missing-component pair are undecided,
        // with their vectors intact for a second classifier.
        assert_eq!(uncertain.len(), 2);
        assert!(uncertain.values().any(|v| v == &vec![Some(0.5)]));
    }

    #[test]
    fn test_classifier_interface_drops_uncertain() {
        let comparisons = pairs(&[("1", "2", vec![Some(0.5)])]);
        let (matches, nomatches) = RuleClassifier::new(banded_rule())
            .classify(&comparisons)
            .unwrap();
        assert!(matches.is_empty());
        assert!(nomatches.is_empty());
    }

    #[test]
    fn test_empty_input() {
        let classifier = RuleClassifier::new(banded_rule());
        let (matches, nomatches, uncertain) = classifier.classify_with_uncertain(&PairMap::new());
        assert!(matches.is_empty() && nomatches.is_empty() && uncertain.is_empty());
    }
}
