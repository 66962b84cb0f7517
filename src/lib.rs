//! RecordLink - record linkage engine
//!
//! This library identifies pairs of records that plausibly refer to the
//! same real-world entity despite data-entry noise, and groups mutually
//! linked records. It supports both CLI and programmatic use by sharing
//! the same engine:
//!
//! 1. blocking indexes enumerate candidate pairs cheaply;
//! 2. a record comparator turns each candidate pair into a named
//!    similarity vector;
//! 3. a classifier partitions the vectors into matches and non-matches
//!    with confidence scores;
//! 4. the match graph is transitively closed into groups.

pub mod block;
pub mod classify;
pub mod classify_kmeans;
pub mod classify_nearest;
pub mod classify_rule;
pub mod encode;
pub mod export;
pub mod geo;
pub mod get;
pub mod groups;
pub mod namedcsv;
pub mod sim;
pub mod types;

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::block::{Indices, IndexStrategy};
use crate::classify::Classifier;
use crate::export::{LinkageSummary, RunLog};
use crate::namedcsv::{Projection, TextEncoding};
use crate::sim::RecordComparator;
use crate::types::{PairMap, Record, ScoreMap};

/// Trait for reporting progress during long-running operations
pub trait ProgressReporter: Send + Sync {
    fn start(&self, total: u64, message: &str);
    fn inc(&self, delta: u64);
    fn finish(&self, message: &str);
}

/// A no-op progress reporter that does nothing
pub struct NoopProgressReporter;
impl ProgressReporter for NoopProgressReporter {
    fn start(&self, _total: u64, _message: &str) {}
    fn inc(&self, _delta: u64) {}
    fn finish(&self, _message: &str) {}
}

/// Core linkage engine that can be used by both the CLI and library callers
///
/// Configured with the three strategy pieces (index strategy, record
/// comparator, classifier) and run over one record set (self-linkage)
/// or an input set plus a master set (cross-linkage). The run computes
/// everything up front; the returned [`Linkage`] holds the artifacts and
/// writes the reports on demand.
pub struct LinkageEngine<'a> {
    outdir: PathBuf,
    strategy: &'a IndexStrategy,
    comparator: &'a RecordComparator,
    classifier: &'a dyn Classifier,
    encoding: TextEncoding,
    logname: Option<String>,
    progress: Option<&'a dyn ProgressReporter>,
}

impl<'a> LinkageEngine<'a> {
    pub fn new(
        outdir: impl Into<PathBuf>,
        strategy: &'a IndexStrategy,
        comparator: &'a RecordComparator,
        classifier: &'a dyn Classifier,
    ) -> Self {
        LinkageEngine {
            outdir: outdir.into(),
            strategy,
            comparator,
            classifier,
            encoding: TextEncoding::default(),
            logname: Some("linkage.log".to_string()),
            progress: None,
        }
    }

    /// Text encoding for every report file (default Windows-1252).
    pub fn encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Name of the run log in the output directory; `None` disables the
    /// file and keeps only `log` facade output.
    pub fn logname(mut self, logname: Option<String>) -> Self {
        self.logname = logname;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run the full linkage pipeline.
    ///
    /// Self-linkage when `master` is `None`, cross-linkage otherwise.
    /// The output directory is created; index statistics go to the run
    /// log before comparison starts so that a doomed blocking strategy
    /// is visible even if the run is cut short.
    pub fn run(
        &self,
        records: Vec<Record>,
        master: Option<Vec<Record>>,
    ) -> Result<Linkage<'a>> {
        let start = Instant::now();
        fs::create_dir_all(&self.outdir)
            .with_context(|| format!("Failed to create output directory {}", self.outdir.display()))?;
        let mut runlog = match &self.logname {
            Some(name) => RunLog::create(&self.outdir.join(name))
                .context("Failed to create linkage log")?,
            None => RunLog::disabled(),
        };

        // Stage 1: index the records.
        if let Some(p) = self.progress {
            p.start(0, "Indexing records...");
        }
        let indices = Indices::build(self.strategy, &records)
            .context("Failed to index input records")?;
        let master_records = master.unwrap_or_default();
        let master_indices = if master_records.is_empty() {
            None
        } else {
            Some(
                Indices::build(self.strategy, &master_records)
                    .context("Failed to index master records")?,
            )
        };
        for line in indices.stat_lines(master_indices.as_ref()) {
            runlog.line(&line);
        }

        // Stage 2: compare candidate pairs into similarity vectors.
        if let Some(p) = self.progress {
            p.start(0, "Comparing candidate pairs...");
        }
        let comparisons = indices
            .compare(self.comparator, master_indices.as_ref())
            .context("Failed to compare candidate pairs")?;
        runlog.line(&format!("Compared {} record pairs", comparisons.len()));

        // Stage 3: classify the similarity vectors.
        if let Some(p) = self.progress {
            p.start(0, "Classifying similarity vectors...");
        }
        let (matches, nonmatches) = self
            .classifier
            .classify(&comparisons)
            .context("Failed to classify similarity vectors")?;
        runlog.line(&format!(
            "Classified {} matches and {} non-matches",
            matches.len(),
            nonmatches.len()
        ));
        if let Some(p) = self.progress {
            p.finish("Linkage complete");
        }

        Ok(Linkage {
            outdir: self.outdir.clone(),
            encoding: self.encoding,
            comparator: self.comparator,
            records,
            master: master_records,
            indices,
            master_indices,
            comparisons,
            matches,
            nonmatches,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// The artifacts of one linkage run, with report writers
///
/// All intermediate results are kept so callers can inspect them
/// programmatically or emit any subset of the CSV reports.
pub struct Linkage<'a> {
    outdir: PathBuf,
    encoding: TextEncoding,
    comparator: &'a RecordComparator,
    /// Input records.
    pub records: Vec<Record>,
    /// Master records; empty in self-linkage mode.
    pub master: Vec<Record>,
    /// Indexed input records.
    pub indices: Indices,
    /// Indexed master records, in cross-linkage mode.
    pub master_indices: Option<Indices>,
    /// Similarity vectors for every compared pair.
    pub comparisons: PairMap,
    /// Classifier scores for matched pairs.
    pub matches: ScoreMap,
    /// Classifier scores for non-matched pairs.
    pub nonmatches: ScoreMap,
    /// Wall-clock duration of the pipeline run.
    pub elapsed_ms: u64,
}

impl Linkage<'_> {
    fn opath(&self, name: &str) -> PathBuf {
        self.outdir.join(name)
    }

    /// Field names of the input records.
    pub fn input_fields(&self) -> Vec<String> {
        self.records
            .first()
            .map(|r| r.schema().fields().to_vec())
            .unwrap_or_default()
    }

    /// Field names of the master records.
    pub fn master_fields(&self) -> Vec<String> {
        self.master
            .first()
            .map(|r| r.schema().fields().to_vec())
            .unwrap_or_default()
    }

    /// Projection of both record sets onto one output schema, master
    /// fields leading.
    pub fn projection(&self) -> Result<Projection> {
        Projection::union_fields(&self.master_fields(), &self.input_fields())
            .context("Failed to build output projection")
    }

    /// Transitively closed groups plus unmatched singles, over input and
    /// master records together.
    pub fn singles_and_groups(&self) -> (Vec<Record>, Vec<Vec<Record>>) {
        let mut allrecords = self.records.clone();
        allrecords.extend(self.master.iter().cloned());
        groups::singles_and_groups(self.matches.keys(), &allrecords)
    }

    /// Aggregate statistics for this run.
    pub fn summary(&self) -> LinkageSummary {
        let (singles, groups) = self.singles_and_groups();
        LinkageSummary {
            input_records: self.records.len(),
            master_records: self.master.len(),
            pairs_compared: self.comparisons.len(),
            matches: self.matches.len(),
            nonmatches: self.nonmatches.len(),
            groups: groups.len(),
            singles: singles.len(),
            elapsed_ms: self.elapsed_ms,
        }
    }

    /// Write every report.
    ///
    /// The full output can be an order of magnitude larger than the
    /// input files.
    pub fn write_all(&self) -> Result<()> {
        self.write_records()?;
        self.write_indices()?;
        if !self.master.is_empty() {
            self.write_input_splits()?;
        }
        self.write_match_pairs()?;
        self.write_nonmatch_pairs()?;
        self.write_groups()?;
        self.write_summary()?;
        Ok(())
    }

    /// Dump the input (and master) records as read.
    pub fn write_records(&self) -> Result<()> {
        export::write_records_file(
            &self.opath("input-records.csv"),
            self.encoding,
            &self.records,
            &self.input_fields(),
        )
        .context("Failed to write input records")?;
        if !self.master.is_empty() {
            export::write_records_file(
                &self.opath("input-master.csv"),
                self.encoding,
                &self.master,
                &self.master_fields(),
            )
            .context("Failed to write master records")?;
        }
        Ok(())
    }

    /// Dump the contents of every index.
    pub fn write_indices(&self) -> Result<()> {
        export::write_indices(&self.indices, &self.outdir, "InputIdx-", self.encoding)
            .context("Failed to write input index files")?;
        if let Some(master_indices) = &self.master_indices {
            export::write_indices(master_indices, &self.outdir, "MasterIdx-", self.encoding)
                .context("Failed to write master index files")?;
        }
        Ok(())
    }

    /// Split input records by whether they matched master (cross-linkage
    /// only).
    pub fn write_input_splits(&self) -> Result<()> {
        let matched: std::collections::BTreeSet<&Record> =
            self.matches.keys().map(|(a, _)| a).collect();
        let (matchrows, singlerows): (Vec<Record>, Vec<Record>) = self
            .records
            .iter()
            .cloned()
            .partition(|r| matched.contains(r));
        let fields = self.input_fields();
        export::write_records_file(
            &self.opath("input-matchrows.csv"),
            self.encoding,
            &matchrows,
            &fields,
        )
        .context("Failed to write matched input records")?;
        export::write_records_file(
            &self.opath("input-singlerows.csv"),
            self.encoding,
            &singlerows,
            &fields,
        )
        .context("Failed to write unmatched input records")?;
        Ok(())
    }

    /// For matched pairs, write the comparison report and the original
    /// record pairs.
    pub fn write_match_pairs(&self) -> Result<()> {
        self.write_pair_reports(&self.matches, "match-comparisons.csv", "match-pairs.csv")
    }

    /// For non-matched pairs, write the comparison report and the
    /// original record pairs.
    pub fn write_nonmatch_pairs(&self) -> Result<()> {
        self.write_pair_reports(
            &self.nonmatches,
            "nonmatch-comparisons.csv",
            "nonmatch-pairs.csv",
        )
    }

    fn write_pair_reports(&self, scores: &ScoreMap, comps: &str, pairs: &str) -> Result<()> {
        let projection = self.projection()?;
        export::write_comparisons(
            &self.opath(comps),
            Some(&self.opath(pairs)),
            self.comparator,
            &self.comparisons,
            scores,
            &self.indices,
            self.master_indices.as_ref(),
            Some(&projection),
            self.encoding,
        )
        .with_context(|| format!("Failed to write {comps}"))
    }

    /// Write all records with numbered groups of mutually linked records
    /// first and singles last.
    pub fn write_groups(&self) -> Result<()> {
        let mut allrecords = self.records.clone();
        allrecords.extend(self.master.iter().cloned());
        let projection = self.projection()?;
        export::write_groups_file(
            &self.opath("groups.csv"),
            &self.matches,
            &allrecords,
            &projection,
            self.encoding,
        )
        .context("Failed to write groups")
    }

    /// Write the JSON run summary.
    pub fn write_summary(&self) -> Result<()> {
        export::write_summary(&self.opath("summary.json"), &self.summary())
            .context("Failed to write summary")
    }
}
