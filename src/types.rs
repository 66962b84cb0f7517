//! Core data types for RecordLink
//!
//! This module defines the shared types used across the linkage pipeline:
//! record schemas, immutable records, similarity vectors, pair maps and
//! the library error enum.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use thiserror::Error;

/// A similarity vector: one component per configured field comparator.
///
/// `None` is the missing sentinel, meaning "this field could not be
/// compared for this pair". Classifiers and distance functions treat
/// missing components by dimension reduction, never by substituting a
/// number.
pub type SimVector = Vec<Option<f64>>;

/// An ordered pair of records.
///
/// In self-mode the pair is canonicalized so that `pair.0 < pair.1`;
/// in cross-mode `pair.0` comes from the input set and `pair.1` from
/// the master set.
pub type RecordPair = (Record, Record);

/// Similarity vectors keyed by record pair.
///
/// Doubles as the comparison cache: an index consults it before invoking
/// the record comparator, so a pair candidate under several indexes is
/// compared exactly once. `BTreeMap` keeps iteration deterministic for
/// reproducible reports.
pub type PairMap = BTreeMap<RecordPair, SimVector>;

/// Classifier scores keyed by record pair.
pub type ScoreMap = BTreeMap<RecordPair, f64>;

/// Errors surfaced by the linkage library
///
/// Configuration errors (`EmptyKey`, `IndexMismatch`, `VectorLength`,
/// `BadScale`, `EmptyExamples`) indicate a programming mistake and are
/// fatal at the call site. Data errors (`BadHeader`, `Decode`,
/// `UnsupportedEncoding`, `Csv`, `Io`) are reported at the CSV boundary.
/// Missing field values are *not* errors; they travel through the
/// pipeline as the `None` sentinel.
#[derive(Debug, Error)]
pub enum LinkError {
    /// A key function emitted an empty key for a record.
    ///
    /// Key functions must filter empty codes themselves; an empty key
    /// reaching the index means the blocking strategy is broken.
    #[error("empty index key in {keys:?} for record {record:?}")]
    EmptyKey { keys: Vec<String>, record: Vec<String> },

    /// Cross-mode comparison paired two indexes of different kinds.
    #[error("indexes at position {position} are incompatible: {left} vs {right}")]
    IndexMismatch {
        position: usize,
        left: &'static str,
        right: &'static str,
    },

    /// Two vectors (or a vector and its standard deviations) disagree on
    /// dimensionality.
    #[error("vector length mismatch: expected {expected} components, got {actual}")]
    VectorLength { expected: usize, actual: usize },

    /// `Scale` was constructed with an invalid range.
    #[error("scale bounds must satisfy 0 <= low < high (low={low}, high={high})")]
    BadScale { low: f64, high: f64 },

    /// The nearest-neighbour classifier needs at least one example of
    /// each class.
    #[error("nearest-neighbour classifier requires a non-empty set of match and non-match examples")]
    EmptyExamples,

    /// A CSV header field is empty or not a valid identifier.
    #[error("column {position} has an invalid header name {name:?}")]
    BadHeader { position: usize, name: String },

    /// Input bytes could not be decoded in the configured encoding.
    #[error("undecodable {encoding} bytes in {source_name}")]
    Decode {
        encoding: String,
        source_name: String,
    },

    /// Output text has no representation in the configured encoding.
    #[error("text cannot be encoded as {encoding}: {text:?}")]
    Unencodable { encoding: String, text: String },

    /// The configured encoding cannot be used for CSV text.
    #[error("encoding {0:?} is not supported (encodings that use null bytes cannot be read as CSV)")]
    UnsupportedEncoding(String),

    /// CSV-level parse or write failure.
    #[error(transparent)]
    Csv(#[from] csv::Error),

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Ordered field names for one record collection
///
/// Built once per input (from the CSV header or an explicit field list)
/// and shared by every record of that collection via `Arc`. Provides
/// name-to-position lookup so that getters can resolve field names once
/// at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<String>,
    positions: HashMap<String, usize>,
}

impl Schema {
    /// Build a schema, validating every field name.
    ///
    /// Names must be identifiers: an ASCII letter or underscore followed
    /// by ASCII alphanumerics or underscores. An empty or malformed name
    /// is a [`LinkError::BadHeader`].
    pub fn new<I, S>(fields: I) -> Result<Self, LinkError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields
            .into_iter()
            .map(|f| f.into().trim().to_string())
            .collect();
        for (position, name) in fields.iter().enumerate() {
            if !is_identifier(name) {
                return Err(LinkError::BadHeader {
                    position,
                    name: name.clone(),
                });
            }
        }
        let positions = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.clone(), i))
            .collect();
        Ok(Schema { fields, positions })
    }

    /// Field names in declaration order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Position of a named field, if present.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Check that a header name is usable as a field identifier.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// An immutable record: a schema plus a tuple of text field values
///
/// Records are cheap to clone (two `Arc`s). Equality, ordering and
/// hashing are over the value tuple, which gives the deterministic pair
/// ordering the indexes rely on. Engine-internal identity ("this is the
/// same inserted record, seen again under another key") is pointer
/// identity of the value slice, tested with [`Record::same_identity`].
#[derive(Clone)]
pub struct Record {
    schema: Arc<Schema>,
    values: Arc<[String]>,
}

impl Record {
    /// Build a record, padding or truncating `values` to the schema width.
    pub fn new(schema: Arc<Schema>, mut values: Vec<String>) -> Self {
        values.resize(schema.len(), String::new());
        Record {
            schema,
            values: values.into(),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Field value by position.
    pub fn get(&self, position: usize) -> Option<&str> {
        self.values.get(position).map(String::as_str)
    }

    /// Field value by name, resolved through the schema.
    pub fn get_named(&self, name: &str) -> Option<&str> {
        self.schema.position(name).and_then(|i| self.get(i))
    }

    /// True when both records are the *same inserted record*, not merely
    /// equal-valued rows.
    pub fn same_identity(&self, other: &Record) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Eq for Record {}

impl PartialOrd for Record {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Record {
    fn cmp(&self, other: &Self) -> Ordering {
        self.values.cmp(&other.values)
    }
}

impl Hash for Record {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.values.hash(state);
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.values.iter()).finish()
    }
}
