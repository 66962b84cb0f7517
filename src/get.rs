//! Field getters
//!
//! A [`FieldSpec`] names a way to pull a value out of a record: by field
//! name, by position, or through an arbitrary function of the record.
//! Getters are resolved once at construction time and reused for every
//! record, so per-call work is a single lookup.

use std::fmt;
use std::sync::Arc;

use crate::types::Record;

/// A computed-field function.
pub type GetterFn = Arc<dyn Fn(&Record) -> Option<String> + Send + Sync>;

/// Predicate deciding whether a fallback value is usable.
pub type ValueTest = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// How to extract one field from a record.
#[derive(Clone)]
pub enum FieldSpec {
    /// Look the field up by name through the record's schema.
    Name(String),
    /// Look the field up by position.
    Index(usize),
    /// Compute the field with a function of the whole record.
    Func(GetterFn),
}

impl FieldSpec {
    pub fn name(name: impl Into<String>) -> Self {
        FieldSpec::Name(name.into())
    }

    pub fn index(position: usize) -> Self {
        FieldSpec::Index(position)
    }

    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&Record) -> Option<String> + Send + Sync + 'static,
    {
        FieldSpec::Func(Arc::new(f))
    }
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldSpec::Name(name) => write!(f, "Name({name:?})"),
            FieldSpec::Index(i) => write!(f, "Index({i})"),
            FieldSpec::Func(_) => write!(f, "Func(..)"),
        }
    }
}

impl From<&str> for FieldSpec {
    fn from(name: &str) -> Self {
        FieldSpec::Name(name.to_string())
    }
}

impl From<usize> for FieldSpec {
    fn from(position: usize) -> Self {
        FieldSpec::Index(position)
    }
}

/// A single-valued field getter.
///
/// `get` returns `None` for an absent field and for a value that is
/// empty after trimming: both mean "missing" downstream.
#[derive(Clone)]
pub struct Getter {
    spec: FieldSpec,
}

impl Getter {
    pub fn new(spec: impl Into<FieldSpec>) -> Self {
        Getter { spec: spec.into() }
    }

    /// Build a getter that tries `specs` in order and returns the first
    /// value passing `test` (default: any non-missing value), else
    /// `default`.
    pub fn fallback(
        specs: Vec<FieldSpec>,
        test: Option<ValueTest>,
        default: Option<String>,
    ) -> Self {
        let getters: Vec<Getter> = specs.into_iter().map(Getter::new).collect();
        Getter::new(FieldSpec::func(move |record: &Record| {
            for getter in &getters {
                if let Some(value) = getter.get(record) {
                    match &test {
                        Some(test) if !test(&value) => continue,
                        _ => return Some(value),
                    }
                }
            }
            default.clone()
        }))
    }

    pub fn get(&self, record: &Record) -> Option<String> {
        let raw = match &self.spec {
            FieldSpec::Name(name) => record.get_named(name).map(str::to_string),
            FieldSpec::Index(i) => record.get(*i).map(str::to_string),
            FieldSpec::Func(f) => f(record),
        };
        raw.and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else if trimmed.len() == v.len() {
                Some(v)
            } else {
                Some(trimmed.to_string())
            }
        })
    }
}

/// A multi-valued field getter
///
/// Concatenates the values of several getters, optionally splitting each
/// on a separator, and returns the trimmed non-empty parts. Used with
/// [`crate::sim::Average`] and [`crate::sim::Maximum`] for fields that
/// hold several values (alternate phone numbers, `;`-separated name
/// lists, or one logical value spread over columns).
#[derive(Clone)]
pub struct MultiGetter {
    sep: Option<String>,
    getters: Vec<Getter>,
}

impl MultiGetter {
    pub fn new(sep: Option<&str>, specs: Vec<FieldSpec>) -> Self {
        MultiGetter {
            sep: sep.map(str::to_string),
            getters: specs.into_iter().map(Getter::new).collect(),
        }
    }

    /// Combine several fields without separator splitting.
    pub fn combine(specs: Vec<FieldSpec>) -> Self {
        MultiGetter::new(None, specs)
    }

    pub fn get(&self, record: &Record) -> Vec<String> {
        let mut result = Vec::new();
        for getter in &self.getters {
            let Some(value) = getter.get(record) else {
                continue;
            };
            match &self.sep {
                None => result.push(value),
                Some(sep) => result.extend(
                    value
                        .split(sep.as_str())
                        .map(str::trim)
                        .filter(|part| !part.is_empty())
                        .map(str::to_string),
                ),
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Schema;
    use std::sync::Arc;

    fn record(fields: &[&str], values: &[&str]) -> Record {
        let schema = Arc::new(Schema::new(fields.iter().copied()).unwrap());
        Record::new(schema, values.iter().map(|v| v.to_string()).collect())
    }

    #[test]
    fn test_get_by_name_index_and_func() {
        let r = record(&["A", "B"], &["foo", "bar"]);
        assert_eq!(Getter::new("A").get(&r), Some("foo".to_string()));
        assert_eq!(Getter::new(1usize).get(&r), Some("bar".to_string()));
        let joined = Getter::new(FieldSpec::func(|r: &Record| {
            Some(format!("{}{}", r.get(0).unwrap_or(""), r.get(1).unwrap_or("")))
        }));
        assert_eq!(joined.get(&r), Some("foobar".to_string()));
    }

    #[test]
    fn test_missing_and_blank_values() {
        let r = record(&["A", "B"], &["  ", "x"]);
        assert_eq!(Getter::new("A").get(&r), None);
        assert_eq!(Getter::new("Nope").get(&r), None);
        assert_eq!(Getter::new(9usize).get(&r), None);
    }

    #[test]
    fn test_fallback_prefers_earlier_fields() {
        let r = record(&["Phone", "Mobile"], &["", "555"]);
        let g = Getter::fallback(vec!["Phone".into(), "Mobile".into()], None, None);
        assert_eq!(g.get(&r), Some("555".to_string()));
    }

    #[test]
    fn test_fallback_test_and_default() {
        let r = record(&["Phone", "Mobile"], &["n/a", "n/a"]);
        let digits: ValueTest = Arc::new(|v: &str| v.chars().any(|c| c.is_ascii_digit()));
        let g = Getter::fallback(
            vec!["Phone".into(), "Mobile".into()],
            Some(digits),
            Some("unknown".to_string()),
        );
        assert_eq!(g.get(&r), Some("unknown".to_string()));
    }

    #[test]
    fn test_multivalue_split_and_combine() {
        let r = record(&["A", "B"], &["a; b ;", "c;d"]);
        let m = MultiGetter::new(Some(";"), vec!["A".into(), "B".into()]);
        assert_eq!(m.get(&r), vec!["a", "b", "c", "d"]);

        let c = MultiGetter::combine(vec!["A".into(), "B".into()]);
        assert_eq!(c.get(&r), vec!["a; b ;", "c;d"]);
    }

    #[test]
    fn test_multivalue_skips_missing_fields() {
        let r = record(&["A", "B"], &["", "x"]);
        let m = MultiGetter::combine(vec!["A".into(), "B".into()]);
        assert_eq!(m.get(&r), vec!["x"]);
    }
}
