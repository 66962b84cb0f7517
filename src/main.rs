//! RecordLink - record linkage tool
//!
//! A standalone executable for finding duplicate records within one CSV
//! file (`dedupe`) or linking input records against a master CSV file
//! (`link`):
//! - blocking on key columns (exact, normalized, phonetic or digit keys)
//! - per-column Damerau-Levenshtein similarity vectors
//! - k-means or threshold-rule classification with confidence scores
//! - CSV reports plus a grouped output file and JSON summary

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Table};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use recordlink::block::{IndexSpec, IndexStrategy, KeyFunc};
use recordlink::classify::{Classifier, Distance, Rule};
use recordlink::classify_kmeans::KMeansClassifier;
use recordlink::classify_rule::RuleClassifier;
use recordlink::encode::{self, encoder};
use recordlink::export::LinkageSummary;
use recordlink::namedcsv::{self, TextEncoding};
use recordlink::sim::{damerau, Field, RecordComparator, Scale};
use recordlink::types::{LinkError, PairMap, Record, ScoreMap};
use recordlink::{LinkageEngine, ProgressReporter};

/// RecordLink - record linkage tool
#[derive(Parser)]
#[command(name = "recordlink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find duplicate records within one CSV file
    Dedupe {
        #[command(flatten)]
        args: SharedArgs,
    },

    /// Link input records against a master CSV file
    Link {
        /// Master CSV file to link against
        #[arg(short, long)]
        master: PathBuf,

        #[command(flatten)]
        args: SharedArgs,
    },
}

#[derive(Args)]
struct SharedArgs {
    /// Input CSV file (first row is the header)
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory for reports and logs
    #[arg(short, long, default_value = "linkage-out")]
    outdir: PathBuf,

    /// Text encoding of input and output files
    #[arg(long, value_enum, default_value_t = TextEncoding::Windows1252)]
    encoding: TextEncoding,

    /// Blocking key columns (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    key: Vec<String>,

    /// Encoding applied to key values before blocking
    #[arg(long, value_enum, default_value_t = KeyEncoding::Metaphone)]
    key_encoding: KeyEncoding,

    /// Compare every pair of records instead of blocking
    #[arg(long)]
    all_pairs: bool,

    /// Columns to compare (comma-separated; default: all non-key columns)
    #[arg(short, long, value_delimiter = ',')]
    compare: Vec<String>,

    /// Similarity below this is scaled to zero in each component
    #[arg(long, default_value = "0.0")]
    low: f64,

    /// Classifier for the similarity vectors
    #[arg(long, value_enum, default_value_t = ClassifierChoice::Kmeans)]
    classifier: ClassifierChoice,

    /// Mean-similarity threshold for the rule classifier
    #[arg(long, default_value = "0.75")]
    threshold: f64,

    /// Maximum k-means iterations
    #[arg(long, default_value = "10")]
    max_iter: usize,

    /// Verbose output (debug-level logging)
    #[arg(short, long)]
    verbose: bool,
}

/// How key-column values become index keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KeyEncoding {
    /// The trimmed value itself
    Exact,
    /// Lowercased with collapsed whitespace
    Lowstrip,
    /// Double-metaphone phonetic codes (up to two keys per value)
    Metaphone,
    /// Digits only, for phone-number-like columns
    Digits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ClassifierChoice {
    /// Two-centroid k-means over the similarity vectors
    Kmeans,
    /// Mean-similarity threshold rule; undecided pairs fall through to
    /// k-means
    Rule,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Dedupe { args } => run_linkage(args, None),
        Commands::Link { master, args } => run_linkage(args, Some(master)),
    }
}

fn run_linkage(args: SharedArgs, master_path: Option<PathBuf>) -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        if args.verbose { "debug" } else { "info" },
    ))
    .init();

    let records = namedcsv::read_path(&args.input, args.encoding)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let master = master_path
        .as_ref()
        .map(|path| {
            namedcsv::read_path(path, args.encoding)
                .with_context(|| format!("Failed to read {}", path.display()))
        })
        .transpose()?;

    let strategy = build_strategy(&args)?;
    let comparator = build_comparator(&args, &records)?;
    let classifier = build_classifier(&args);

    eprintln!(
        "{} {} records{}",
        style("Linking").cyan().bold(),
        records.len(),
        master
            .as_ref()
            .map(|m| format!(" against {} master records", m.len()))
            .unwrap_or_default()
    );

    let progress = CliProgress::new();
    let linkage = LinkageEngine::new(&args.outdir, &strategy, &comparator, classifier.as_ref())
        .encoding(args.encoding)
        .with_progress(&progress)
        .run(records, master)?;
    linkage.write_all()?;

    let summary = linkage.summary();
    print_summary(&summary);
    eprintln!(
        "{} reports written to {}",
        style("Done:").green().bold(),
        args.outdir.display()
    );
    Ok(())
}

/// One index per key column, or the all-pairs index.
fn build_strategy(args: &SharedArgs) -> Result<IndexStrategy> {
    if args.all_pairs {
        return Ok(vec![("AllPairs".to_string(), IndexSpec::AllPairs)]);
    }
    if args.key.is_empty() {
        bail!("no blocking strategy: give at least one --key column or --all-pairs");
    }
    let strategy = args
        .key
        .iter()
        .map(|column| {
            (
                column.clone(),
                IndexSpec::Block(key_func(column, args.key_encoding)),
            )
        })
        .collect();
    Ok(strategy)
}

fn key_func(column: &str, key_encoding: KeyEncoding) -> KeyFunc {
    let column = column.to_string();
    Arc::new(move |record: &Record| {
        let Some(value) = record.get_named(&column).filter(|v| !v.trim().is_empty()) else {
            return Vec::new();
        };
        match key_encoding {
            KeyEncoding::Exact => vec![value.trim().to_string()],
            KeyEncoding::Lowstrip => encode::lowstrip(value).into_iter().collect(),
            KeyEncoding::Metaphone => encode::double_metaphone(value),
            KeyEncoding::Digits => encode::digits(value).into_iter().collect(),
        }
    })
}

/// Scaled Damerau-Levenshtein similarity on every compared column.
fn build_comparator(args: &SharedArgs, records: &[Record]) -> Result<RecordComparator> {
    let columns: Vec<String> = if args.compare.is_empty() {
        records
            .first()
            .map(|r| {
                r.schema()
                    .fields()
                    .iter()
                    .filter(|f| !args.key.contains(*f))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    } else {
        args.compare.clone()
    };
    if columns.is_empty() {
        bail!("nothing to compare: every column is a key column; name columns with --compare");
    }

    let mut comparator = RecordComparator::new();
    for column in columns {
        let compare = if args.low > 0.0 {
            Scale::new(damerau(), args.low, 1.0)?.into_compare()
        } else {
            damerau()
        };
        comparator = comparator.push(
            column.clone(),
            Field::encoded(compare, column.as_str(), encoder(encode::lowstrip)),
        );
    }
    Ok(comparator)
}

fn build_classifier(args: &SharedArgs) -> Box<dyn Classifier> {
    let kmeans = KMeansClassifier::new(Distance::L2).max_iter(args.max_iter);
    match args.classifier {
        ClassifierChoice::Kmeans => Box::new(kmeans),
        ClassifierChoice::Rule => Box::new(ThresholdThenKmeans {
            threshold: args.threshold,
            kmeans,
        }),
    }
}

/// Mean-similarity threshold rule with k-means fallback
///
/// Pairs whose mean non-missing similarity clears the threshold match,
/// pairs below it do not, and pairs with nothing comparable are handed
/// to k-means along with the rest of the undecided band.
struct ThresholdThenKmeans {
    threshold: f64,
    kmeans: KMeansClassifier,
}

impl Classifier for ThresholdThenKmeans {
    fn classify(&self, comparisons: &PairMap) -> Result<(ScoreMap, ScoreMap), LinkError> {
        let threshold = self.threshold;
        let rule: Rule = Arc::new(move |_, _, vector| {
            let present: Vec<f64> = vector.iter().flatten().copied().collect();
            if present.is_empty() {
                return None;
            }
            let mean = present.iter().sum::<f64>() / present.len() as f64;
            Some(mean >= threshold)
        });
        let (mut matches, mut nonmatches, uncertain) =
            RuleClassifier::new(rule).classify_with_uncertain(comparisons);
        let (kmeans_matches, kmeans_nonmatches) = self.kmeans.classify(&uncertain)?;
        matches.extend(kmeans_matches);
        nonmatches.extend(kmeans_nonmatches);
        Ok((matches, nonmatches))
    }
}

/// Spinner-backed progress reporting for the terminal.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        CliProgress { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn start(&self, total: u64, message: &str) {
        if total > 0 {
            self.bar.set_length(total);
        }
        self.bar.set_message(message.to_string());
    }

    fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

fn print_summary(summary: &LinkageSummary) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Metric", "Value"]);
    table.add_row(vec![
        Cell::new("Input records"),
        Cell::new(summary.input_records),
    ]);
    if summary.master_records > 0 {
        table.add_row(vec![
            Cell::new("Master records"),
            Cell::new(summary.master_records),
        ]);
    }
    table.add_row(vec![
        Cell::new("Pairs compared"),
        Cell::new(summary.pairs_compared),
    ]);
    table.add_row(vec![Cell::new("Matches"), Cell::new(summary.matches)]);
    table.add_row(vec![
        Cell::new("Non-matches"),
        Cell::new(summary.nonmatches),
    ]);
    table.add_row(vec![Cell::new("Groups"), Cell::new(summary.groups)]);
    table.add_row(vec![Cell::new("Singles"), Cell::new(summary.singles)]);
    table.add_row(vec![
        Cell::new("Elapsed"),
        Cell::new(format!("{} ms", summary.elapsed_ms)),
    ]);
    println!("{table}");
}
