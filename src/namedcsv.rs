//! CSV boundary with header schemas and legacy encodings
//!
//! Reads CSV files whose first row names the columns into
//! schema-carrying [`Record`]s, and writes report rows back out. The
//! default text encoding is Windows-1252 with UTF-8 as the alternative;
//! encodings that use null bytes (UTF-16 and friends) are rejected.
//! Output uses CRLF line terminators in the Excel dialect.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};

use crate::types::{LinkError, Record, Schema};

/// Supported text encodings for CSV input and output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TextEncoding {
    /// Windows-1252, the common legacy encoding of Excel exports.
    #[default]
    #[value(name = "windows-1252")]
    Windows1252,
    /// UTF-8.
    #[value(name = "utf-8")]
    Utf8,
}

impl TextEncoding {
    /// Resolve an encoding label; null-byte encodings are unsupported.
    pub fn parse(name: &str) -> Result<Self, LinkError> {
        match name.to_ascii_lowercase().as_str() {
            "windows-1252" | "cp1252" => Ok(TextEncoding::Windows1252),
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            _ => Err(LinkError::UnsupportedEncoding(name.to_string())),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TextEncoding::Windows1252 => "windows-1252",
            TextEncoding::Utf8 => "utf-8",
        }
    }

    fn encoding(&self) -> &'static Encoding {
        match self {
            TextEncoding::Windows1252 => WINDOWS_1252,
            TextEncoding::Utf8 => UTF_8,
        }
    }

    fn decode(&self, bytes: &[u8], source_name: &str) -> Result<String, LinkError> {
        let (text, had_errors) = self.encoding().decode_with_bom_removal(bytes);
        if had_errors {
            return Err(LinkError::Decode {
                encoding: self.label().to_string(),
                source_name: source_name.to_string(),
            });
        }
        Ok(text.into_owned())
    }

    fn encode(&self, text: &str) -> Result<Vec<u8>, LinkError> {
        let (bytes, _, had_unmappable) = self.encoding().encode(text);
        if had_unmappable {
            return Err(LinkError::Unencodable {
                encoding: self.label().to_string(),
                text: text.to_string(),
            });
        }
        Ok(bytes.into_owned())
    }
}

/// Read records from a CSV file, taking the header row as the schema.
pub fn read_path(path: &Path, encoding: TextEncoding) -> Result<Vec<Record>, LinkError> {
    let bytes = fs::read(path)?;
    read_bytes(&bytes, encoding, &path.display().to_string(), None)
}

/// Read records from CSV bytes.
///
/// With `fields`, the header row is replaced by the given schema and the
/// first row is treated as data. Header names must be identifiers; an
/// empty input yields no records.
pub fn read_bytes(
    bytes: &[u8],
    encoding: TextEncoding,
    source_name: &str,
    fields: Option<Vec<String>>,
) -> Result<Vec<Record>, LinkError> {
    let text = encoding.decode(bytes, source_name)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = reader.records();
    let schema = match fields {
        Some(fields) => Arc::new(Schema::new(fields)?),
        None => match rows.next() {
            Some(header) => Arc::new(Schema::new(header?.iter().map(str::to_string))?),
            None => return Ok(Vec::new()),
        },
    };

    let mut records = Vec::new();
    for row in rows {
        let row = row?;
        records.push(Record::new(
            schema.clone(),
            row.iter().map(str::to_string).collect(),
        ));
    }
    Ok(records)
}

/// CSV writer that encodes rows to the configured text encoding, with
/// CRLF line terminators.
pub struct Writer<W: Write> {
    out: W,
    encoding: TextEncoding,
}

impl<W: Write> Writer<W> {
    pub fn new(out: W, encoding: TextEncoding) -> Self {
        Writer { out, encoding }
    }

    pub fn write_row<I, S>(&mut self, row: I) -> Result<(), LinkError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut buf = Vec::new();
        {
            let mut csv_writer = csv::WriterBuilder::new()
                .terminator(csv::Terminator::CRLF)
                .from_writer(&mut buf);
            csv_writer.write_record(row.into_iter().map(|s| s.as_ref().to_string()))?;
            csv_writer.flush()?;
        }
        let text = String::from_utf8_lossy(&buf);
        let bytes = self.encoding.encode(&text)?;
        self.out.write_all(&bytes)?;
        Ok(())
    }

    pub fn write_record(&mut self, record: &Record) -> Result<(), LinkError> {
        self.write_row(record.values())
    }

    pub fn flush(&mut self) -> Result<(), LinkError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Projects records from two schemas onto one output schema
///
/// The union schema preserves the order of the first field list and
/// appends fields from the second not already present. Projecting a
/// record drops fields the union does not name and fills absent fields
/// with the empty string, so input and master rows can share one output
/// file.
#[derive(Debug, Clone)]
pub struct Projection {
    schema: Arc<Schema>,
}

impl Projection {
    pub fn new<I, S>(fields: I) -> Result<Self, LinkError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Projection {
            schema: Arc::new(Schema::new(fields)?),
        })
    }

    /// Union of two field lists, first list's order preserved.
    pub fn union_fields(first: &[String], second: &[String]) -> Result<Self, LinkError> {
        let mut fields: Vec<String> = first.to_vec();
        for field in second {
            if !fields.contains(field) {
                fields.push(field.clone());
            }
        }
        Projection::new(fields)
    }

    pub fn fields(&self) -> &[String] {
        self.schema.fields()
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Rewrite a record onto the projection's schema.
    pub fn project(&self, record: &Record) -> Record {
        let values = self
            .schema
            .fields()
            .iter()
            .map(|field| record.get_named(field).unwrap_or("").to_string())
            .collect();
        Record::new(self.schema.clone(), values)
    }
}
