//! Report writers
//!
//! Every artifact of a linkage run is written as CSV next to a
//! timestamped `linkage.log` and a machine-readable `summary.json`:
//! record dumps, per-index block contents, match/non-match comparison
//! reports (with per-index key-overlap flags and the similarity vector),
//! projected record pairs, and the final grouped output.

use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::Path;

use chrono::Local;
use log::info;
use serde::{Deserialize, Serialize};

use crate::block::Indices;
use crate::groups::singles_and_groups;
use crate::namedcsv::{Projection, TextEncoding, Writer};
use crate::sim::RecordComparator;
use crate::types::{LinkError, PairMap, Record, ScoreMap};

/// Progress log teed to the `log` facade and a file in the output
/// directory, so a run leaves an audit trail beside its reports.
pub struct RunLog {
    out: Option<File>,
}

impl RunLog {
    pub fn create(path: &Path) -> Result<Self, LinkError> {
        Ok(RunLog {
            out: Some(File::create(path)?),
        })
    }

    /// A log that only forwards to the `log` facade.
    pub fn disabled() -> Self {
        RunLog { out: None }
    }

    /// Record one progress line. File write failures are swallowed; the
    /// run log must never abort the run it describes.
    pub fn line(&mut self, message: &str) {
        info!("{message}");
        if let Some(out) = &mut self.out {
            let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
            let _ = writeln!(out, "{stamp} {message}");
        }
    }
}

/// Write a header and rows to a CSV file.
pub fn write_csv_file<R, S>(
    path: &Path,
    encoding: TextEncoding,
    header: Option<&[String]>,
    rows: R,
) -> Result<(), LinkError>
where
    R: IntoIterator<Item = Vec<S>>,
    S: AsRef<str>,
{
    let mut writer = Writer::new(BufWriter::new(File::create(path)?), encoding);
    if let Some(header) = header {
        writer.write_row(header)?;
    }
    for row in rows {
        writer.write_row(row)?;
    }
    writer.flush()
}

/// Dump records under their schema's header.
pub fn write_records_file(
    path: &Path,
    encoding: TextEncoding,
    records: &[Record],
    fields: &[String],
) -> Result<(), LinkError> {
    write_csv_file(
        path,
        encoding,
        Some(fields),
        records.iter().map(|r| r.values().to_vec()),
    )
}

/// One CSV per index: each row is the block key followed by a record
/// filed under it.
pub fn write_indices(
    indices: &Indices,
    outdir: &Path,
    prefix: &str,
    encoding: TextEncoding,
) -> Result<(), LinkError> {
    for (name, index) in indices.iter() {
        let path = outdir.join(format!("{prefix}{name}.csv"));
        let mut writer = Writer::new(BufWriter::new(File::create(&path)?), encoding);
        for (key, records) in index.entries() {
            for record in records {
                let mut row = vec![key.to_string()];
                row.extend(record.values().iter().cloned());
                writer.write_row(&row)?;
            }
        }
        writer.flush()?;
    }
    Ok(())
}

fn index_keys(indices: &Indices, record: &Record) -> Vec<Option<Vec<String>>> {
    indices.iter().map(|(_, index)| index.keys(record)).collect()
}

fn joined_keys(keys: &[Option<Vec<String>>]) -> Vec<String> {
    keys.iter()
        .map(|k| k.as_ref().map(|k| k.join(";")).unwrap_or_default())
        .collect()
}

fn key_overlap_flags(
    keys1: &[Option<Vec<String>>],
    keys2: &[Option<Vec<String>>],
) -> Vec<String> {
    keys1
        .iter()
        .zip(keys2)
        .map(|(k1, k2)| match (k1, k2) {
            (Some(k1), Some(k2)) => k1.iter().any(|k| k2.contains(k)).to_string(),
            _ => String::new(),
        })
        .collect()
}

fn format_component(component: &Option<f64>) -> String {
    component.map(|v| v.to_string()).unwrap_or_default()
}

/// Write the scored pairs as a comparison report, and optionally the
/// projected original record pairs.
///
/// Each pair takes three rows in the comparison report: the left record
/// (its per-index keys and the field values each comparator read), the
/// right record likewise, then the classifier score, a key-overlap flag
/// per index and the similarity vector. Inspection shows which index
/// produced the candidate and which fields drove the decision.
#[allow(clippy::too_many_arguments)]
pub fn write_comparisons(
    comps_path: &Path,
    pairs_path: Option<&Path>,
    comparator: &RecordComparator,
    comparisons: &PairMap,
    scores: &ScoreMap,
    indices1: &Indices,
    indices2: Option<&Indices>,
    projection: Option<&Projection>,
    encoding: TextEncoding,
) -> Result<(), LinkError> {
    let indices2 = indices2.unwrap_or(indices1);
    let mut writer = Writer::new(BufWriter::new(File::create(comps_path)?), encoding);

    let mut header = vec!["Score".to_string()];
    header.extend(indices1.names().iter().map(|n| n.to_string()));
    header.extend(comparator.names().iter().map(|n| n.to_string()));
    writer.write_row(&header)?;

    let mut pair_writer = match pairs_path {
        Some(path) => {
            let mut w = Writer::new(BufWriter::new(File::create(path)?), encoding);
            if let Some(projection) = projection {
                w.write_row(projection.fields())?;
            }
            Some(w)
        }
        None => None,
    };

    for ((rec1, rec2), score) in scores {
        let Some(weights) = comparisons.get(&(rec1.clone(), rec2.clone())) else {
            continue;
        };
        let keys1 = index_keys(indices1, rec1);
        let keys2 = index_keys(indices2, rec2);

        for (record, keys, side) in [(rec1, &keys1, Side::Left), (rec2, &keys2, Side::Right)] {
            let mut row = vec![String::new()];
            row.extend(joined_keys(keys));
            for (_, component) in comparator.components() {
                let value = match side {
                    Side::Left => component.left_value(record),
                    Side::Right => component.right_value(record),
                };
                row.push(value.unwrap_or_default());
            }
            writer.write_row(&row)?;
        }

        let mut row = vec![score.to_string()];
        row.extend(key_overlap_flags(&keys1, &keys2));
        row.extend(weights.iter().map(format_component));
        writer.write_row(&row)?;

        if let Some(pair_writer) = &mut pair_writer {
            match projection {
                Some(projection) => {
                    pair_writer.write_record(&projection.project(rec1))?;
                    pair_writer.write_record(&projection.project(rec2))?;
                }
                None => {
                    pair_writer.write_record(rec1)?;
                    pair_writer.write_record(rec2)?;
                }
            }
        }
    }

    writer.flush()?;
    if let Some(mut pair_writer) = pair_writer {
        pair_writer.flush()?;
    }
    Ok(())
}

enum Side {
    Left,
    Right,
}

/// Write every record with its group: grouped records first under group
/// numbers counted from 0, then the unmatched singles marked `-`.
pub fn write_groups_file(
    path: &Path,
    matches: &ScoreMap,
    allrecords: &[Record],
    projection: &Projection,
    encoding: TextEncoding,
) -> Result<(), LinkError> {
    let (singles, groups) = singles_and_groups(matches.keys(), allrecords);
    let mut writer = Writer::new(BufWriter::new(File::create(path)?), encoding);

    let mut header = vec!["GroupID".to_string()];
    header.extend(projection.fields().iter().cloned());
    writer.write_row(&header)?;

    for (group_id, group) in groups.iter().enumerate() {
        for record in group {
            let mut row = vec![group_id.to_string()];
            row.extend(projection.project(record).values().iter().cloned());
            writer.write_row(&row)?;
        }
    }
    for record in &singles {
        let mut row = vec!["-".to_string()];
        row.extend(projection.project(record).values().iter().cloned());
        writer.write_row(&row)?;
    }
    writer.flush()
}

/// Aggregate run statistics for dashboards and scripted callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkageSummary {
    pub input_records: usize,
    pub master_records: usize,
    pub pairs_compared: usize,
    pub matches: usize,
    pub nonmatches: usize,
    pub groups: usize,
    pub singles: usize,
    pub elapsed_ms: u64,
}

/// Write the run summary as pretty-printed JSON.
pub fn write_summary(path: &Path, summary: &LinkageSummary) -> Result<(), LinkError> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), summary)
        .map_err(|e| LinkError::Io(std::io::Error::other(e)))?;
    Ok(())
}
