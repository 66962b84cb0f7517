//! Record and value similarity
//!
//! The framework composes in layers:
//!
//! 1. a [`ValueCompare`] turns two encoded field values into a score in
//!    `[0, 1]` or the missing sentinel;
//! 2. [`Field`], [`Average`] and [`Maximum`] lift a `ValueCompare` to a
//!    pair of *records*, wiring in getters and encoders;
//! 3. [`RecordComparator`] applies a named, ordered set of field
//!    comparators and yields the similarity vector for the pair.
//!
//! No aggregation into a single score happens here; collapsing vectors
//! into match/non-match decisions is the classifiers' job.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::encode::EncoderFn;
use crate::get::{FieldSpec, Getter, MultiGetter, ValueTest};
use crate::types::{LinkError, Record, SimVector};

/// Compares two encoded values. Either side may already be missing, and
/// the comparer owns the policy for that case: most return `None`, so a
/// missing value stays missing in the vector.
pub type ValueCompare = Arc<dyn Fn(Option<&str>, Option<&str>) -> Option<f64> + Send + Sync>;

/// Normalized Damerau-Levenshtein similarity.
pub fn damerau() -> ValueCompare {
    Arc::new(|a, b| match (a, b) {
        (Some(a), Some(b)) => Some(strsim::normalized_damerau_levenshtein(a, b)),
        _ => None,
    })
}

/// Jaro-Winkler similarity, which favours matching prefixes.
pub fn jaro_winkler() -> ValueCompare {
    Arc::new(|a, b| match (a, b) {
        (Some(a), Some(b)) => Some(strsim::jaro_winkler(a, b)),
        _ => None,
    })
}

/// Levenshtein similarity with a leniency threshold.
///
/// `maxdiff` is the proportion of the longer string's length beyond
/// which edits count for nothing: the similarity is 0.0 once the edit
/// distance reaches `maxdiff * max(len)`, and scales linearly below it.
/// Must lie in `(0, 1]`.
pub fn levenshtein(maxdiff: f64) -> ValueCompare {
    assert!(
        maxdiff > 0.0 && maxdiff <= 1.0,
        "maxdiff must be in (0, 1], got {maxdiff}"
    );
    Arc::new(move |a, b| match (a, b) {
        (Some(a), Some(b)) => {
            let ndiffs = strsim::levenshtein(a, b) as f64;
            let maxdiffs = a.chars().count().max(b.chars().count()) as f64 * maxdiff;
            if ndiffs >= maxdiffs {
                Some(0.0)
            } else {
                Some(1.0 - ndiffs / maxdiffs)
            }
        }
        _ => None,
    })
}

/// Exact equality: 1.0 or 0.0.
pub fn exact() -> ValueCompare {
    Arc::new(|a, b| match (a, b) {
        (Some(a), Some(b)) => Some(if a == b { 1.0 } else { 0.0 }),
        _ => None,
    })
}

/// Range-mapping wrapper around a value comparer
///
/// Lets a reusable primitive be tightened (`low`), loosened (`high`) or
/// downweighted (`rmax < 1`) without touching the primitive itself:
/// raw scores at or below `low` map to 0.0, at or above `high` to
/// `rmax`, with linear interpolation between.
pub struct Scale {
    inner: ValueCompare,
    low: f64,
    high: f64,
    rmax: f64,
    test: Option<ValueTest>,
}

impl Scale {
    /// Requires `0 <= low < high`.
    pub fn new(inner: ValueCompare, low: f64, high: f64) -> Result<Self, LinkError> {
        if !(0.0 <= low && low < high) {
            return Err(LinkError::BadScale { low, high });
        }
        Ok(Scale {
            inner,
            low,
            high,
            rmax: 1.0,
            test: None,
        })
    }

    /// Cap the scaled result at `rmax`, downweighting this component in
    /// vector distances.
    pub fn rmax(mut self, rmax: f64) -> Self {
        self.rmax = rmax;
        self
    }

    /// Guard against bad values: when either argument is missing or
    /// fails `test`, the result is missing and `inner` is never called.
    pub fn test(mut self, test: ValueTest) -> Self {
        self.test = Some(test);
        self
    }

    fn scale(&self, value: f64) -> f64 {
        if value <= self.low {
            0.0
        } else if value >= self.high {
            self.rmax
        } else {
            self.rmax * (value - self.low) / (self.high - self.low)
        }
    }

    /// Finish the wrapper as a [`ValueCompare`].
    pub fn into_compare(self) -> ValueCompare {
        Arc::new(move |a, b| {
            if let Some(test) = &self.test {
                match (a, b) {
                    (Some(a), Some(b)) if test(a) && test(b) => {}
                    _ => return None,
                }
            }
            (self.inner)(a, b).map(|v| self.scale(v))
        })
    }
}

/// Computes the similarity of a pair of records on one (possibly
/// virtual) field.
///
/// Implementations may also expose the raw field values they compare,
/// which the pair reports use to show each side of a comparison.
pub trait FieldComparator: Send + Sync {
    fn compare(&self, a: &Record, b: &Record) -> Option<f64>;

    /// Raw value this comparator reads from a left-hand record.
    fn left_value(&self, _record: &Record) -> Option<String> {
        None
    }

    /// Raw value this comparator reads from a right-hand record.
    fn right_value(&self, _record: &Record) -> Option<String> {
        None
    }
}

impl<F> FieldComparator for F
where
    F: Fn(&Record, &Record) -> Option<f64> + Send + Sync,
{
    fn compare(&self, a: &Record, b: &Record) -> Option<f64> {
        self(a, b)
    }
}

fn apply_encoder(encoder: &Option<EncoderFn>, value: String) -> Option<String> {
    match encoder {
        Some(enc) => enc(&value),
        None => Some(value),
    }
}

/// Single-valued field similarity: `compare(encode1(get1(a)), encode2(get2(b)))`.
///
/// Missing on either getter short-circuits to missing; what an encoder
/// maps to missing is left to the value comparer's policy.
pub struct Field {
    compare: ValueCompare,
    get1: Getter,
    encode1: Option<EncoderFn>,
    get2: Getter,
    encode2: Option<EncoderFn>,
}

impl Field {
    pub fn new(compare: ValueCompare, spec: impl Into<FieldSpec>) -> Self {
        let get = Getter::new(spec);
        Field {
            compare,
            get1: get.clone(),
            encode1: None,
            get2: get,
            encode2: None,
        }
    }

    pub fn encoded(
        compare: ValueCompare,
        spec: impl Into<FieldSpec>,
        encoder: EncoderFn,
    ) -> Self {
        let get = Getter::new(spec);
        Field {
            compare,
            get1: get.clone(),
            encode1: Some(encoder.clone()),
            get2: get,
            encode2: Some(encoder),
        }
    }

    /// Different getter/encoder per side, for cross-linkage where the
    /// two schemas name or format the field differently.
    pub fn asymmetric(
        compare: ValueCompare,
        spec1: impl Into<FieldSpec>,
        encode1: Option<EncoderFn>,
        spec2: impl Into<FieldSpec>,
        encode2: Option<EncoderFn>,
    ) -> Self {
        Field {
            compare,
            get1: Getter::new(spec1),
            encode1,
            get2: Getter::new(spec2),
            encode2,
        }
    }
}

impl FieldComparator for Field {
    fn compare(&self, a: &Record, b: &Record) -> Option<f64> {
        let v1 = self.get1.get(a)?;
        let v2 = self.get2.get(b)?;
        let e1 = apply_encoder(&self.encode1, v1);
        let e2 = apply_encoder(&self.encode2, v2);
        (self.compare)(e1.as_deref(), e2.as_deref())
    }

    fn left_value(&self, record: &Record) -> Option<String> {
        self.get1.get(record)
    }

    fn right_value(&self, record: &Record) -> Option<String> {
        self.get2.get(record)
    }
}

/// Shared plumbing for the multi-valued comparators.
struct MultiField {
    compare: ValueCompare,
    get1: MultiGetter,
    encode1: Option<EncoderFn>,
    get2: MultiGetter,
    encode2: Option<EncoderFn>,
}

impl MultiField {
    fn new(compare: ValueCompare, get: MultiGetter) -> Self {
        MultiField {
            compare,
            get1: get.clone(),
            encode1: None,
            get2: get,
            encode2: None,
        }
    }

    /// Encoded value sets for both sides; values an encoder rejects are
    /// dropped so only comparable values remain.
    fn encoded_sets(&self, a: &Record, b: &Record) -> (BTreeSet<String>, BTreeSet<String>) {
        let encode = |values: Vec<String>, encoder: &Option<EncoderFn>| {
            values
                .into_iter()
                .filter_map(|v| apply_encoder(encoder, v))
                .collect::<BTreeSet<String>>()
        };
        (
            encode(self.get1.get(a), &self.encode1),
            encode(self.get2.get(b), &self.encode2),
        )
    }

    fn join_values(getter: &MultiGetter, record: &Record) -> Option<String> {
        let values = getter.get(record);
        if values.is_empty() {
            None
        } else {
            Some(values.join(";"))
        }
    }
}

/// Average best-match similarity of a multi-valued field.
///
/// Walks the smaller encoded set, accumulating each value's best
/// similarity against the larger set, and averages. A smaller set fully
/// contained in the larger one therefore scores 1.0. An empty side
/// delegates the missing decision to `compare(None, None)`.
pub struct Average(MultiField);

impl Average {
    pub fn new(compare: ValueCompare, get: MultiGetter) -> Self {
        Average(MultiField::new(compare, get))
    }

    pub fn encoded(compare: ValueCompare, get: MultiGetter, encoder: EncoderFn) -> Self {
        let mut inner = MultiField::new(compare, get);
        inner.encode1 = Some(encoder.clone());
        inner.encode2 = Some(encoder);
        Average(inner)
    }

    pub fn asymmetric(
        compare: ValueCompare,
        get1: MultiGetter,
        encode1: Option<EncoderFn>,
        get2: MultiGetter,
        encode2: Option<EncoderFn>,
    ) -> Self {
        Average(MultiField {
            compare,
            get1,
            encode1,
            get2,
            encode2,
        })
    }
}

impl FieldComparator for Average {
    fn compare(&self, a: &Record, b: &Record) -> Option<f64> {
        let (f1, f2) = self.0.encoded_sets(a, b);
        let (small, large) = if f1.len() <= f2.len() { (f1, f2) } else { (f2, f1) };
        if small.is_empty() || large.is_empty() {
            return (self.0.compare)(None, None);
        }
        let mut total = 0.0;
        for v1 in &small {
            let mut best = 0.0f64;
            for v2 in &large {
                if let Some(score) = (self.0.compare)(Some(v1), Some(v2)) {
                    best = best.max(score);
                }
            }
            total += best;
        }
        Some(total / small.len() as f64)
    }

    fn left_value(&self, record: &Record) -> Option<String> {
        MultiField::join_values(&self.0.get1, record)
    }

    fn right_value(&self, record: &Record) -> Option<String> {
        MultiField::join_values(&self.0.get2, record)
    }
}

/// Greatest pairwise similarity of a multi-valued field.
pub struct Maximum(MultiField);

impl Maximum {
    pub fn new(compare: ValueCompare, get: MultiGetter) -> Self {
        Maximum(MultiField::new(compare, get))
    }

    pub fn encoded(compare: ValueCompare, get: MultiGetter, encoder: EncoderFn) -> Self {
        let mut inner = MultiField::new(compare, get);
        inner.encode1 = Some(encoder.clone());
        inner.encode2 = Some(encoder);
        Maximum(inner)
    }
}

impl FieldComparator for Maximum {
    fn compare(&self, a: &Record, b: &Record) -> Option<f64> {
        let (f1, f2) = self.0.encoded_sets(a, b);
        if f1.is_empty() || f2.is_empty() {
            return (self.0.compare)(None, None);
        }
        let mut best = 0.0f64;
        for v1 in &f1 {
            for v2 in &f2 {
                if let Some(score) = (self.0.compare)(Some(v1), Some(v2)) {
                    best = best.max(score);
                }
            }
        }
        Some(best)
    }

    fn left_value(&self, record: &Record) -> Option<String> {
        MultiField::join_values(&self.0.get1, record)
    }

    fn right_value(&self, record: &Record) -> Option<String> {
        MultiField::join_values(&self.0.get2, record)
    }
}

/// Named, ordered collection of field comparators
///
/// Applied to a pair of records it produces the similarity vector, one
/// component per comparator in registration order. The names label the
/// vector components in the comparison reports, and the vector length is
/// invariant for the lifetime of the comparator.
pub struct RecordComparator {
    comparators: Vec<(String, Box<dyn FieldComparator>)>,
}

impl RecordComparator {
    pub fn new() -> Self {
        RecordComparator {
            comparators: Vec::new(),
        }
    }

    /// Register a named component; order of registration is the order of
    /// vector components.
    pub fn push(
        mut self,
        name: impl Into<String>,
        comparator: impl FieldComparator + 'static,
    ) -> Self {
        self.comparators.push((name.into(), Box::new(comparator)));
        self
    }

    /// Component names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.comparators.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Number of vector components.
    pub fn len(&self) -> usize {
        self.comparators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comparators.is_empty()
    }

    pub fn components(&self) -> impl Iterator<Item = (&str, &dyn FieldComparator)> {
        self.comparators
            .iter()
            .map(|(n, c)| (n.as_str(), c.as_ref()))
    }

    /// Similarity vector for a pair of records.
    pub fn compare(&self, a: &Record, b: &Record) -> SimVector {
        self.comparators
            .iter()
            .map(|(_, comparator)| comparator.compare(a, b))
            .collect()
    }
}

impl Default for RecordComparator {
    fn default() -> Self {
        RecordComparator::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{encoder, lowstrip};
    use crate::types::Schema;

    fn record(fields: &[&str], values: &[&str]) -> Record {
        let schema = Arc::new(Schema::new(fields.iter().copied()).unwrap());
        Record::new(schema, values.iter().map(|v| v.to_string()).collect())
    }

    /// 2^-|a-b| over parsed numbers; unparseable values are missing.
    fn numsim() -> ValueCompare {
        Arc::new(|a, b| {
            let a: f64 = a?.parse().ok()?;
            let b: f64 = b?.parse().ok()?;
            Some(2.0f64.powf(-(a - b).abs()))
        })
    }

    #[test]
    fn test_primitive_comparers() {
        assert_eq!(damerau()(Some("abcd"), Some("abcd")), Some(1.0));
        assert_eq!(damerau()(Some("abcd"), Some("abdc")), Some(0.75));
        assert_eq!(damerau()(Some("abcd"), None), None);
        assert_eq!(exact()(Some("x"), Some("x")), Some(1.0));
        assert_eq!(exact()(Some("x"), Some("y")), Some(0.0));
        let jw = jaro_winkler()(Some("martha"), Some("marhta")).unwrap();
        assert!(jw > 0.9);
    }

    #[test]
    fn test_levenshtein_threshold() {
        let lenient = levenshtein(1.0);
        assert_eq!(lenient(Some("abcd"), Some("abcd")), Some(1.0));
        assert_eq!(lenient(Some("abcd"), Some("abdc")), Some(0.5));
        let strict = levenshtein(0.5);
        assert_eq!(strict(Some("abcd"), Some("abdc")), Some(0.0));
    }

    #[test]
    fn test_scale_maps_range() {
        let base = Scale::new(numsim(), 0.0, 1.0).unwrap().into_compare();
        assert_eq!(base(Some("1"), Some("2")), Some(0.5));

        let tightened = Scale::new(numsim(), 0.6, 1.0).unwrap().into_compare();
        assert_eq!(tightened(Some("1"), Some("2")), Some(0.0));

        let loosened = Scale::new(numsim(), 0.0, 0.4).unwrap().into_compare();
        assert_eq!(loosened(Some("1"), Some("2")), Some(1.0));

        let banded = Scale::new(numsim(), 0.4, 0.6).unwrap().into_compare();
        assert_eq!(banded(Some("1"), Some("2")), Some(0.5));

        let weighted = Scale::new(numsim(), 0.4, 0.6)
            .unwrap()
            .rmax(0.5)
            .into_compare();
        assert_eq!(weighted(Some("1"), Some("2")), Some(0.25));
    }

    #[test]
    fn test_scale_rmax_caps_high_values() {
        let capped = Scale::new(numsim(), 0.0, 0.4)
            .unwrap()
            .rmax(0.5)
            .into_compare();
        assert_eq!(capped(Some("1"), Some("2")), Some(0.5));
    }

    #[test]
    fn test_scale_rejects_bad_bounds() {
        assert!(Scale::new(numsim(), 0.6, 0.6).is_err());
        assert!(Scale::new(numsim(), -0.1, 1.0).is_err());
    }

    #[test]
    fn test_scale_test_guard() {
        let is_num: ValueTest = Arc::new(|v: &str| v.parse::<f64>().is_ok());
        let guarded = Scale::new(numsim(), 0.0, 1.0)
            .unwrap()
            .test(is_num)
            .into_compare();
        assert_eq!(guarded(Some("blah"), Some("2")), None);
        assert_eq!(guarded(Some("1"), Some("2")), Some(0.5));
    }

    #[test]
    fn test_field_compares_encoded_values() {
        let a = record(&["Name"], &["  JOE  Bloggs "]);
        let b = record(&["Name"], &["joe bloggs"]);
        let field = Field::encoded(exact(), "Name", encoder(lowstrip));
        assert_eq!(field.compare(&a, &b), Some(1.0));
    }

    #[test]
    fn test_field_missing_getter_value() {
        let a = record(&["Name"], &[""]);
        let b = record(&["Name"], &["joe"]);
        let field = Field::new(exact(), "Name");
        assert_eq!(field.compare(&a, &b), None);
    }

    #[test]
    fn test_field_asymmetric_getters() {
        let a = record(&["Surname"], &["bloggs"]);
        let b = record(&["FamilyName"], &["bloggs"]);
        let field = Field::asymmetric(exact(), "Surname", None, "FamilyName", None);
        assert_eq!(field.compare(&a, &b), Some(1.0));
    }

    #[test]
    fn test_average_best_match() {
        let a = record(&["V"], &["0;1"]);
        let b = record(&["V"], &["1;2"]);
        let avg = Average::new(numsim(), MultiGetter::new(Some(";"), vec!["V".into()]));
        assert_eq!(avg.compare(&a, &b), Some(0.75));
    }

    #[test]
    fn test_average_subset_is_perfect() {
        let a = record(&["V"], &["0;1;2"]);
        let b = record(&["V"], &["0;1;2;3;4"]);
        let avg = Average::new(numsim(), MultiGetter::new(Some(";"), vec!["V".into()]));
        assert_eq!(avg.compare(&a, &b), Some(1.0));
    }

    #[test]
    fn test_average_empty_side_is_missing() {
        let a = record(&["V"], &[""]);
        let b = record(&["V"], &["1;2"]);
        let avg = Average::new(numsim(), MultiGetter::new(Some(";"), vec!["V".into()]));
        assert_eq!(avg.compare(&a, &b), None);
    }

    #[test]
    fn test_maximum_best_pair() {
        let a = record(&["V"], &["0;1;2"]);
        let b = record(&["V"], &["3;4;5"]);
        let max = Maximum::new(numsim(), MultiGetter::new(Some(";"), vec!["V".into()]));
        assert_eq!(max.compare(&a, &b), Some(0.5));
    }

    #[test]
    fn test_record_comparator_vector() {
        let a = record(&["A", "B"], &["1", "1"]);
        let b = record(&["A", "B"], &["2", "4"]);
        let rc = RecordComparator::new()
            .push("V1", Field::new(numsim(), "A"))
            .push("V2", Field::new(numsim(), "B"));
        assert_eq!(rc.names(), vec!["V1", "V2"]);
        assert_eq!(rc.compare(&a, &b), vec![Some(0.5), Some(0.125)]);
    }

    #[test]
    fn test_record_comparator_reflexivity() {
        let r = record(&["A", "B"], &["joe", ""]);
        let rc = RecordComparator::new()
            .push("A", Field::new(damerau(), "A"))
            .push("B", Field::new(damerau(), "B"));
        for component in rc.compare(&r, &r) {
            assert!(component.is_none() || component == Some(1.0));
        }
    }

    #[test]
    fn test_symmetry() {
        let a = record(&["A"], &["abcd"]);
        let b = record(&["A"], &["abdc"]);
        let field = Field::new(damerau(), "A");
        assert_eq!(field.compare(&a, &b), field.compare(&b, &a));
    }
}
