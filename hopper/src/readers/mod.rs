mod delimited;
mod json;
mod spreadsheet;

use std::{collections::HashMap, path::Path};
use hopper_core::source::{SourceConfig, SourceFormat};
use crate::{error::HopperError, folders::ToCanonicalString};

///
/// One raw row from a source file - field values keyed by the header labels
/// observed in the file (source aliases, not canonical names).
///
pub type FieldMap = HashMap<String, String>;

///
/// Row-level problems spotted by the reader itself. These never abort the
/// file; the validator turns them into dead-letter entries.
///
#[derive(Debug)]
pub enum RowDefect {
    Surplus { count: usize },
    Malformed { detail: String },
}

#[derive(Debug, Default)]
pub struct RawRecord {
    pub row_number: u64, // 1-based, counted after skip_rows and the header.
    pub fields: FieldMap,
    pub defects: Vec<RowDefect>,
}

///
/// A single-pass, ordered stream of records from one file.
///
/// Readers are not restartable - the pipeline opens one reader per file and
/// drops it on every exit path.
///
pub trait RecordReader: Send {
    ///
    /// The header labels observed in the file, used to validate the source's
    /// required columns before any record is streamed.
    ///
    fn headers(&self) -> &[String];

    fn next_record(&mut self) -> Option<Result<RawRecord, HopperError>>;
}

///
/// Classify a filename by its extension: the source format and whether the
/// content is gzip-compressed.
///
pub fn file_format(filename: &str) -> Option<(SourceFormat, bool)> {
    let lower = filename.to_lowercase();

    if lower.ends_with(".csv.gz") {
        Some((SourceFormat::Delimited, true))
    } else if lower.ends_with(".csv") {
        Some((SourceFormat::Delimited, false))
    } else if lower.ends_with(".json.gz") {
        Some((SourceFormat::Json, true))
    } else if lower.ends_with(".json") {
        Some((SourceFormat::Json, false))
    } else if lower.ends_with(".xlsx") || lower.ends_with(".xls") {
        Some((SourceFormat::Spreadsheet, false))
    } else {
        None
    }
}

///
/// Select and open a reader for the file, checking the extension against the
/// source's configured format.
///
pub fn open_reader(path: &Path, source: &SourceConfig) -> Result<Box<dyn RecordReader>, HopperError> {
    let filename = path.file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_default();

    let (format, gzipped) = file_format(&filename)
        .ok_or(HopperError::UnsupportedFormat { path: path.to_canonical_string() })?;

    if format != source.format() {
        return Err(HopperError::ReaderMismatch {
            path: path.to_canonical_string(),
            source_name: source.name().to_string(),
            expected: source.format().as_str().to_string(),
            actual: format.as_str().to_string(),
        })
    }

    Ok(match format {
        SourceFormat::Delimited   => Box::new(delimited::DelimitedReader::open(path, source, gzipped)?),
        SourceFormat::Json        => Box::new(json::JsonReader::open(path, source, gzipped)?),
        SourceFormat::Spreadsheet => Box::new(spreadsheet::SpreadsheetReader::open(path, source)?),
    })
}

///
/// Every required source column must appear in the observed header. Extra
/// columns are tolerated - the validator prunes them.
///
pub fn validate_header(path: &Path, source: &SourceConfig, headers: &[String]) -> Result<(), HopperError> {
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(HopperError::MissingHeader { path: path.to_canonical_string() })
    }

    let missing: Vec<&str> = source.required_columns()
        .into_iter()
        .filter(|column| !headers.iter().any(|header| header == column))
        .collect();

    if !missing.is_empty() {
        return Err(HopperError::MissingColumns { path: path.to_canonical_string(), columns: missing.join(", ") })
    }

    Ok(())
}
