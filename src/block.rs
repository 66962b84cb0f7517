//! Blocking indexes and candidate pair enumeration
//!
//! An [`Index`] groups records by the keys a key function emits, so only
//! records sharing a key are ever compared. Phonetic keys make the
//! blocking typo-tolerant; the [`Index::AllPairs`] variant disables
//! blocking for small inputs or exhaustive validation. [`Indices`]
//! aggregates several indexes over one record set so that a pair
//! candidate under *any* strategy is compared, while a shared cache
//! guarantees each pair is compared exactly once.
//!
//! Uncached candidate pairs are compared on the rayon pool and the
//! results merged back into the cache, so the cache-once property holds
//! regardless of parallelism.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use log::info;
use rayon::prelude::*;

use crate::sim::RecordComparator;
use crate::types::{LinkError, PairMap, Record, RecordPair, SimVector};

/// Emits zero or more index keys for a record.
///
/// Multi-keyed indexing is first-class: double-metaphone emits up to two
/// codes, n-gram schemes emit several. Emitting no keys leaves the
/// record out of this index; emitting an *empty* key is an error the key
/// function must prevent by filtering.
pub type KeyFunc = Arc<dyn Fn(&Record) -> Vec<String> + Send + Sync>;

/// How to build one constituent index.
#[derive(Clone)]
pub enum IndexSpec {
    /// Inverted index over the keys emitted by the function.
    Block(KeyFunc),
    /// Ignore keys and enumerate every distinct pair.
    AllPairs,
}

/// Named list of index builders; one linkage run uses the same strategy
/// for the input and (in cross-mode) the master records.
pub type IndexStrategy = Vec<(String, IndexSpec)>;

/// Per-index block statistics for operator visibility.
#[derive(Debug, Clone, Copy)]
pub struct BlockStats {
    pub records: usize,
    pub blocks: usize,
    pub largest: usize,
    pub average: f64,
}

/// An inverted index from key to the records inserted under that key.
pub struct BlockIndex {
    makekey: KeyFunc,
    buckets: BTreeMap<String, Vec<Record>>,
}

impl BlockIndex {
    fn new(makekey: KeyFunc) -> Self {
        BlockIndex {
            makekey,
            buckets: BTreeMap::new(),
        }
    }

    /// Validated keys for a record: [`LinkError::EmptyKey`] if the key
    /// function emitted an empty key.
    fn make_keys(&self, record: &Record) -> Result<Vec<String>, LinkError> {
        let keys = (self.makekey)(record);
        if keys.iter().any(String::is_empty) {
            return Err(LinkError::EmptyKey {
                keys,
                record: record.values().to_vec(),
            });
        }
        Ok(keys)
    }

    fn insert_keys(&mut self, keys: Vec<String>, record: &Record) {
        for key in keys {
            self.buckets.entry(key).or_default().push(record.clone());
        }
    }
}

/// Candidate pair enumerator: a blocking index or the compare-everything
/// fallback.
pub enum Index {
    Block(BlockIndex),
    AllPairs(Vec<Record>),
}

impl Index {
    pub fn from_spec(spec: &IndexSpec) -> Self {
        match spec {
            IndexSpec::Block(makekey) => Index::Block(BlockIndex::new(makekey.clone())),
            IndexSpec::AllPairs => Index::AllPairs(Vec::new()),
        }
    }

    /// Variant name, used in mismatch errors and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Index::Block(_) => "block",
            Index::AllPairs(_) => "all-pairs",
        }
    }

    /// Insert a record, filing it under every emitted key.
    pub fn insert(&mut self, record: &Record) -> Result<(), LinkError> {
        match self {
            Index::Block(block) => {
                let keys = block.make_keys(record)?;
                block.insert_keys(keys, record);
            }
            Index::AllPairs(records) => records.push(record.clone()),
        }
        Ok(())
    }

    /// Keys this index would file the record under; `None` for the
    /// keyless all-pairs variant.
    pub fn keys(&self, record: &Record) -> Option<Vec<String>> {
        match self {
            Index::Block(block) => Some((block.makekey)(record)),
            Index::AllPairs(_) => None,
        }
    }

    /// Upper bound on the distinct pairs this index will yield, within
    /// itself or against `other`. The actual number of comparator calls
    /// is lower when records share several keys or pairs are already
    /// cached. Mismatched variants yield no pairs (comparison would be
    /// rejected) and count zero.
    pub fn count(&self, other: Option<&Index>) -> u64 {
        match other {
            None => match self {
                Index::Block(block) => block
                    .buckets
                    .values()
                    .map(|recs| pairs_within(recs.len()))
                    .sum(),
                Index::AllPairs(records) => pairs_within(records.len()),
            },
            Some(Index::Block(other)) => match self {
                Index::Block(block) => block
                    .buckets
                    .iter()
                    .filter_map(|(key, recs)| {
                        other
                            .buckets
                            .get(key)
                            .map(|others| recs.len() as u64 * others.len() as u64)
                    })
                    .sum(),
                Index::AllPairs(_) => 0,
            },
            Some(Index::AllPairs(others)) => match self {
                Index::AllPairs(records) => records.len() as u64 * others.len() as u64,
                Index::Block(_) => 0,
            },
        }
    }

    /// Block statistics; `None` when the index holds nothing.
    pub fn stats(&self) -> Option<BlockStats> {
        let sizes: Vec<usize> = match self {
            Index::Block(block) => block.buckets.values().map(Vec::len).collect(),
            Index::AllPairs(records) if !records.is_empty() => vec![records.len()],
            Index::AllPairs(_) => Vec::new(),
        };
        if sizes.is_empty() {
            return None;
        }
        let records: usize = sizes.iter().sum();
        let blocks = sizes.len();
        Some(BlockStats {
            records,
            blocks,
            largest: sizes.iter().copied().max().unwrap_or(0),
            average: records as f64 / blocks as f64,
        })
    }

    /// Bucket contents for report files: `(key, records)` per bucket,
    /// with a single unkeyed bucket for the all-pairs variant.
    pub fn entries(&self) -> Vec<(&str, &[Record])> {
        match self {
            Index::Block(block) => block
                .buckets
                .iter()
                .map(|(key, recs)| (key.as_str(), recs.as_slice()))
                .collect(),
            Index::AllPairs(records) => {
                if records.is_empty() {
                    Vec::new()
                } else {
                    vec![("", records.as_slice())]
                }
            }
        }
    }

    /// Compare candidate pairs, consulting and populating `cache`.
    ///
    /// Self-mode (`other` = `None`) sorts each bucket and enumerates
    /// `i < j` pairs, skipping a record that meets itself under another
    /// key, so every cached pair satisfies `a <= b`. Cross-mode
    /// enumerates the bucket products for shared keys, keeping the left
    /// record from `self`. Pairs not yet cached are compared in parallel.
    pub fn compare(
        &self,
        comparator: &RecordComparator,
        other: Option<&Index>,
        cache: &mut PairMap,
    ) -> Result<(), LinkError> {
        let mut pending: Vec<RecordPair> = Vec::new();
        let mut queued: HashSet<RecordPair> = HashSet::new();
        let mut queue = |pair: RecordPair, cache: &PairMap, pending: &mut Vec<RecordPair>| {
            if !cache.contains_key(&pair) && queued.insert(pair.clone()) {
                pending.push(pair);
            }
        };

        match other {
            None => {
                for (_, bucket) in self.entries() {
                    let mut records = bucket.to_vec();
                    records.sort();
                    for j in 0..records.len() {
                        for i in 0..j {
                            let (a, b) = (&records[i], &records[j]);
                            if a.same_identity(b) {
                                continue;
                            }
                            queue((a.clone(), b.clone()), cache, &mut pending);
                        }
                    }
                }
            }
            Some(other) => match (self, other) {
                (Index::Block(left), Index::Block(right)) => {
                    for (key, recs1) in &left.buckets {
                        let Some(recs2) = right.buckets.get(key) else {
                            continue;
                        };
                        for r1 in recs1 {
                            for r2 in recs2 {
                                queue((r1.clone(), r2.clone()), cache, &mut pending);
                            }
                        }
                    }
                }
                (Index::AllPairs(left), Index::AllPairs(right)) => {
                    for r1 in left {
                        for r2 in right {
                            queue((r1.clone(), r2.clone()), cache, &mut pending);
                        }
                    }
                }
                (left, right) => {
                    return Err(LinkError::IndexMismatch {
                        position: 0,
                        left: left.kind(),
                        right: right.kind(),
                    });
                }
            },
        }

        let computed: Vec<(RecordPair, SimVector)> = pending
            .into_par_iter()
            .map(|pair| {
                let vector = comparator.compare(&pair.0, &pair.1);
                (pair, vector)
            })
            .collect();
        cache.extend(computed);
        Ok(())
    }
}

fn pairs_within(n: usize) -> u64 {
    let n = n as u64;
    n * n.saturating_sub(1) / 2
}

/// Ordered, named collection of indexes over a single record set
///
/// Inserting is atomic per record: every constituent's keys are computed
/// and validated before any bucket is touched, so a failing key function
/// leaves the whole collection unchanged.
pub struct Indices {
    indexes: Vec<(String, Index)>,
}

impl Indices {
    pub fn new(strategy: &IndexStrategy) -> Self {
        Indices {
            indexes: strategy
                .iter()
                .map(|(name, spec)| (name.clone(), Index::from_spec(spec)))
                .collect(),
        }
    }

    /// Build and fill in one step.
    pub fn build(strategy: &IndexStrategy, records: &[Record]) -> Result<Self, LinkError> {
        let mut indices = Indices::new(strategy);
        indices.insert_many(records)?;
        Ok(indices)
    }

    pub fn insert(&mut self, record: &Record) -> Result<(), LinkError> {
        // Validate every constituent's keys before touching any bucket.
        let mut keyed: Vec<Option<Vec<String>>> = Vec::with_capacity(self.indexes.len());
        for (_, index) in &self.indexes {
            match index {
                Index::Block(block) => keyed.push(Some(block.make_keys(record)?)),
                Index::AllPairs(_) => keyed.push(None),
            }
        }
        for ((_, index), keys) in self.indexes.iter_mut().zip(keyed) {
            match (index, keys) {
                (Index::Block(block), Some(keys)) => block.insert_keys(keys, record),
                (Index::AllPairs(records), None) => records.push(record.clone()),
                _ => unreachable!("index kinds cannot change between passes"),
            }
        }
        Ok(())
    }

    pub fn insert_many(&mut self, records: &[Record]) -> Result<(), LinkError> {
        for record in records {
            self.insert(record)?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Index)> {
        self.indexes.iter().map(|(name, idx)| (name.as_str(), idx))
    }

    pub fn names(&self) -> Vec<&str> {
        self.indexes.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Compare under every constituent index, sharing one cache so a
    /// pair blocked by several strategies is compared once.
    ///
    /// With `other`, constituents are paired positionally; pairing
    /// indexes of different kinds is a configuration error.
    pub fn compare(
        &self,
        comparator: &RecordComparator,
        other: Option<&Indices>,
    ) -> Result<PairMap, LinkError> {
        let mut cache = PairMap::new();
        match other {
            None => {
                for (_, index) in &self.indexes {
                    index.compare(comparator, None, &mut cache)?;
                }
            }
            Some(other) => {
                for (position, ((_, left), (_, right))) in
                    self.indexes.iter().zip(&other.indexes).enumerate()
                {
                    if std::mem::discriminant(left) != std::mem::discriminant(right) {
                        return Err(LinkError::IndexMismatch {
                            position,
                            left: left.kind(),
                            right: right.kind(),
                        });
                    }
                    left.compare(comparator, Some(right), &mut cache)?;
                }
            }
        }
        Ok(cache)
    }

    /// Comparison estimates and block statistics, as log lines.
    ///
    /// Returned as strings so the driver can both log them and tee them
    /// into the run log file.
    pub fn stat_lines(&self, other: Option<&Indices>) -> Vec<String> {
        fn size_line(name: &str, side: &str, index: &Index) -> String {
            match index.stats() {
                Some(s) => format!(
                    "{side} index {name}: {} records in {} blocks (largest {}, average {:.2})",
                    s.records, s.blocks, s.largest, s.average
                ),
                None => format!("{side} index {name}: empty"),
            }
        }

        let mut lines = Vec::new();
        match other {
            None => {
                for (name, index) in &self.indexes {
                    lines.push(format!(
                        "Index {name} needs at most {} comparisons",
                        index.count(None)
                    ));
                    lines.push(size_line(name, "Input", index));
                }
            }
            Some(other) => {
                for ((name1, idx1), (name2, idx2)) in self.indexes.iter().zip(&other.indexes) {
                    lines.push(format!(
                        "Comparing index {name1} to {name2} needs at most {} comparisons",
                        idx1.count(Some(idx2))
                    ));
                    lines.push(size_line(name1, "Input", idx1));
                    lines.push(size_line(name2, "Master", idx2));
                }
            }
        }
        lines
    }

    /// Log the statistics through the `log` facade.
    pub fn log_stats(&self, other: Option<&Indices>) {
        for line in self.stat_lines(other) {
            info!("{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Field, ValueCompare};
    use crate::types::Schema;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(["Id", "Num"]).unwrap())
    }

    fn record(s: &Arc<Schema>, id: &str, num: &str) -> Record {
        Record::new(s.clone(), vec![id.to_string(), num.to_string()])
    }

    /// Key on the integer floor of the Num field.
    fn floor_key() -> KeyFunc {
        Arc::new(|r: &Record| {
            r.get_named("Num")
                .and_then(|v| v.parse::<f64>().ok())
                .map(|n| vec![format!("{}", n.floor() as i64)])
                .unwrap_or_default()
        })
    }

    /// Comparator: 1.0 when the Num floors match, counting invocations.
    fn counting_comparator(counter: Arc<AtomicUsize>) -> RecordComparator {
        let compare: ValueCompare = Arc::new(move |a, b| {
            counter.fetch_add(1, Ordering::SeqCst);
            let a: f64 = a?.parse().ok()?;
            let b: f64 = b?.parse().ok()?;
            Some(if a.floor() == b.floor() { 1.0 } else { 0.0 })
        });
        RecordComparator::new().push("Num", Field::new(compare, "Num"))
    }

    fn comparator() -> RecordComparator {
        counting_comparator(Arc::new(AtomicUsize::new(0)))
    }

    #[test]
    fn test_insert_rejects_empty_key() {
        let s = schema();
        let empty_key: KeyFunc = Arc::new(|_| vec![String::new()]);
        let mut index = Index::from_spec(&IndexSpec::Block(empty_key));
        let err = index.insert(&record(&s, "A", "1")).unwrap_err();
        assert!(matches!(err, LinkError::EmptyKey { .. }));
    }

    #[test]
    fn test_self_compare_blocks_and_orders_pairs() {
        let s = schema();
        let records = [
            record(&s, "A", "5.5"),
            record(&s, "B", "3.5"),
            record(&s, "C", "5.25"),
        ];
        let mut index = Index::from_spec(&IndexSpec::Block(floor_key()));
        for r in &records {
            index.insert(r).unwrap();
        }
        assert_eq!(index.count(None), 1);

        let mut cache = PairMap::new();
        index.compare(&comparator(), None, &mut cache).unwrap();
        assert_eq!(cache.len(), 1);
        let ((a, b), vector) = cache.iter().next().unwrap();
        assert!(a < b);
        assert_eq!(a.get_named("Id"), Some("A"));
        assert_eq!(b.get_named("Id"), Some("C"));
        assert_eq!(vector, &vec![Some(1.0)]);
    }

    #[test]
    fn test_multi_key_record_not_compared_with_itself() {
        let s = schema();
        let two_keys: KeyFunc = Arc::new(|_| vec!["x".to_string(), "x".to_string()]);
        let mut index = Index::from_spec(&IndexSpec::Block(two_keys));
        let only = record(&s, "A", "1.0");
        index.insert(&only).unwrap();

        let mut cache = PairMap::new();
        index.compare(&comparator(), None, &mut cache).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cross_compare_keeps_sides() {
        let s = schema();
        let mut left = Index::from_spec(&IndexSpec::Block(floor_key()));
        let mut right = Index::from_spec(&IndexSpec::Block(floor_key()));
        for r in [record(&s, "A", "5.5"), record(&s, "B", "4.5")] {
            left.insert(&r).unwrap();
        }
        for r in [record(&s, "D", "5.5"), record(&s, "E", "4.5")] {
            right.insert(&r).unwrap();
        }
        assert_eq!(left.count(Some(&right)), 2);

        let mut cache = PairMap::new();
        left.compare(&comparator(), Some(&right), &mut cache).unwrap();
        assert_eq!(cache.len(), 2);
        for (a, b) in cache.keys() {
            assert!(matches!(a.get_named("Id"), Some("A" | "B")));
            assert!(matches!(b.get_named("Id"), Some("D" | "E")));
        }
    }

    #[test]
    fn test_allpairs_compares_everything() {
        let s = schema();
        let mut index = Index::from_spec(&IndexSpec::AllPairs);
        for r in [
            record(&s, "A", "1"),
            record(&s, "B", "2"),
            record(&s, "C", "3"),
        ] {
            index.insert(&r).unwrap();
        }
        assert_eq!(index.count(None), 3);

        let mut cache = PairMap::new();
        index.compare(&comparator(), None, &mut cache).unwrap();
        assert_eq!(cache.len(), 3);
        for (a, b) in cache.keys() {
            assert!(a < b);
        }
    }

    #[test]
    fn test_empty_cross_compare_is_empty() {
        let s = schema();
        let left = Index::from_spec(&IndexSpec::Block(floor_key()));
        let mut right = Index::from_spec(&IndexSpec::Block(floor_key()));
        right.insert(&record(&s, "A", "1.0")).unwrap();

        let mut cache = PairMap::new();
        left.compare(&comparator(), Some(&right), &mut cache).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_indices_share_cache_across_indexes() {
        let s = schema();
        let strategy: IndexStrategy = vec![
            ("floor".to_string(), IndexSpec::Block(floor_key())),
            ("everything".to_string(), IndexSpec::AllPairs),
        ];
        let records = [
            record(&s, "A", "5.5"),
            record(&s, "B", "3.5"),
            record(&s, "C", "5.25"),
        ];
        let indices = Indices::build(&strategy, &records).unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let pairs = indices
            .compare(&counting_comparator(counter.clone()), None)
            .unwrap();
        // Three distinct pairs overall; the (A, C) pair blocked by both
        // indexes is compared once.
        assert_eq!(pairs.len(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_indices_reject_mismatched_kinds() {
        let s = schema();
        let left = Indices::build(
            &vec![("a".to_string(), IndexSpec::Block(floor_key()))],
            &[record(&s, "A", "1")],
        )
        .unwrap();
        let right = Indices::build(
            &vec![("a".to_string(), IndexSpec::AllPairs)],
            &[record(&s, "B", "1")],
        )
        .unwrap();

        let err = left.compare(&comparator(), Some(&right)).unwrap_err();
        assert!(matches!(err, LinkError::IndexMismatch { position: 0, .. }));
    }

    #[test]
    fn test_indices_insert_is_atomic() {
        let s = schema();
        // Second constituent rejects everything with an empty key.
        let strategy: IndexStrategy = vec![
            ("good".to_string(), IndexSpec::Block(floor_key())),
            (
                "bad".to_string(),
                IndexSpec::Block(Arc::new(|_| vec![String::new()])),
            ),
        ];
        let mut indices = Indices::new(&strategy);
        assert!(indices.insert(&record(&s, "A", "1.0")).is_err());
        // The failing constituent kept the record out of every index.
        let (_, good) = indices.iter().next().map(|(n, i)| (n.to_string(), i)).unwrap();
        assert!(good.stats().is_none());
    }

    #[test]
    fn test_count_is_upper_bound() {
        let s = schema();
        // Record A lands in two buckets; B shares one of them.
        let initials: KeyFunc = Arc::new(|r: &Record| {
            r.get_named("Id")
                .map(|id| id.chars().map(|c| c.to_string()).collect())
                .unwrap_or_default()
        });
        let mut index = Index::from_spec(&IndexSpec::Block(initials));
        for r in [record(&s, "xy", "1"), record(&s, "x", "2")] {
            index.insert(&r).unwrap();
        }
        let mut cache = PairMap::new();
        index.compare(&comparator(), None, &mut cache).unwrap();
        assert!(index.count(None) >= cache.len() as u64);
    }

    #[test]
    fn test_stat_lines_shape() {
        let s = schema();
        let strategy: IndexStrategy = vec![("floor".to_string(), IndexSpec::Block(floor_key()))];
        let indices = Indices::build(
            &strategy,
            &[record(&s, "A", "5.5"), record(&s, "C", "5.25")],
        )
        .unwrap();
        let lines = indices.stat_lines(None);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("at most 1 comparisons"));
        assert!(lines[1].contains("2 records in 1 blocks"));
    }
}
