use calamine::{open_workbook_auto, Data, Reader};
use std::path::Path;
use hopper_core::source::SourceConfig;
use crate::error::HopperError;
use crate::folders::ToCanonicalString;
use super::{FieldMap, RawRecord, RecordReader, RowDefect};

///
/// Streams records from a workbook sheet. The configured sheet is used when
/// set, otherwise the first sheet in the workbook.
///
/// Native cell values are rendered to their canonical string forms before
/// validation so a numeric cell survives coercion into an integer column.
///
pub struct SpreadsheetReader {
    headers: Vec<String>,
    rows: std::vec::IntoIter<Vec<Data>>,
    row_number: u64,
}

impl SpreadsheetReader {
    pub fn open(path: &Path, source: &SourceConfig) -> Result<Self, HopperError> {
        let mut workbook = open_workbook_auto(path)
            .map_err(|source| HopperError::CannotOpenWorkbook { path: path.to_canonical_string(), source })?;

        let sheet = match source.sheet() {
            Some(sheet) => sheet.to_string(),
            None => workbook.sheet_names().first().cloned()
                .ok_or(HopperError::MissingSheet { path: path.to_canonical_string(), sheet: "<first>".into() })?,
        };

        let range = workbook.worksheet_range(&sheet)
            .map_err(|_| HopperError::MissingSheet { path: path.to_canonical_string(), sheet: sheet.clone() })?;

        let mut rows = range.rows()
            .map(|row| row.to_vec())
            .collect::<Vec<Vec<Data>>>()
            .into_iter();

        for _ in 0..source.skip_rows() {
            rows.next();
        }

        // The next non-empty row is the header.
        let mut headers = vec!();
        for row in rows.by_ref() {
            if row.iter().any(|cell| !matches!(cell, Data::Empty)) {
                headers = row.iter().map(|cell| cell_to_string(cell).trim().to_string()).collect();
                break;
            }
        }

        Ok(Self { headers, rows, row_number: 0 })
    }
}

impl RecordReader for SpreadsheetReader {
    fn headers(&self) -> &[String] {
        &self.headers
    }

    fn next_record(&mut self) -> Option<Result<RawRecord, HopperError>> {
        loop {
            let row = self.rows.next()?;

            // Trailing regions of a sheet often contain fully-empty rows.
            if row.iter().all(|cell| matches!(cell, Data::Empty)) {
                continue
            }

            self.row_number += 1;

            let mut fields = FieldMap::with_capacity(self.headers.len());
            for (idx, header) in self.headers.iter().enumerate() {
                let value = row.get(idx).map(cell_to_string).unwrap_or_default();
                fields.insert(header.clone(), value);
            }

            let mut defects = vec!();
            if row.len() > self.headers.len() && row[self.headers.len()..].iter().any(|cell| !matches!(cell, Data::Empty)) {
                defects.push(RowDefect::Surplus { count: row.len() - self.headers.len() });
            }

            return Some(Ok(RawRecord { row_number: self.row_number, fields, defects }))
        }
    }
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),

        // Integral floats print without a fraction so INT columns coerce.
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),

        Data::Bool(b) => match b { true => "true", false => "false" }.to_string(),
        Data::DateTime(dt) => dt.as_datetime()
            .map(|naive| naive.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            .unwrap_or_default(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(err) => format!("{:?}", err).to_lowercase(),
    }
}
