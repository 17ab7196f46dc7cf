use encoding_rs::Encoding;
use encoding_rs_io::DecodeReaderBytesBuilder;
use flate2::read::MultiGzDecoder;
use std::{fs::File, io::Read, path::Path};
use hopper_core::source::SourceConfig;
use crate::error::HopperError;
use crate::folders::ToCanonicalString;
use super::{FieldMap, RawRecord, RecordReader, RowDefect};

///
/// Streams records from a delimited text file (optionally gzipped) using the
/// source's delimiter, encoding and skip_rows options.
///
pub struct DelimitedReader {
    path: String,
    rdr: csv::Reader<Box<dyn Read + Send>>,
    headers: Vec<String>,
    record: csv::StringRecord,
    row_number: u64,
}

impl DelimitedReader {
    pub fn open(path: &Path, source: &SourceConfig, gzipped: bool) -> Result<Self, HopperError> {
        let file = File::open(path)
            .map_err(|source| HopperError::CannotOpenFile { path: path.to_canonical_string(), source })?;

        let raw: Box<dyn Read + Send> = match gzipped {
            true  => Box::new(MultiGzDecoder::new(file)),
            false => Box::new(file),
        };

        // Decode the configured encoding (or sniff a BOM) into UTF-8.
        let encoding = match source.encoding() {
            Some(label) => Some(Encoding::for_label(label.as_bytes())
                .ok_or(HopperError::UnknownEncoding { label: label.to_string() })?),
            None => None,
        };
        let decoded: Box<dyn Read + Send> = Box::new(DecodeReaderBytesBuilder::new()
            .encoding(encoding)
            .build(raw));

        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(source.delimiter())
            .from_reader(decoded);

        let mut record = csv::StringRecord::new();

        for _ in 0..source.skip_rows() {
            if !rdr.read_record(&mut record)? {
                break
            }
        }

        // The next non-empty row is the header.
        let mut headers = vec!();
        while rdr.read_record(&mut record)? {
            if record.iter().any(|field| !field.trim().is_empty()) {
                headers = record.iter().map(|header| header.trim().to_string()).collect();
                break;
            }
        }

        Ok(Self {
            path: path.to_canonical_string(),
            rdr,
            headers,
            record: csv::StringRecord::new(),
            row_number: 0,
        })
    }
}

impl RecordReader for DelimitedReader {
    fn headers(&self) -> &[String] {
        &self.headers
    }

    fn next_record(&mut self) -> Option<Result<RawRecord, HopperError>> {
        match self.rdr.read_record(&mut self.record) {
            Ok(false) => None,
            Ok(true) => {
                self.row_number += 1;

                // Short rows pad with empty fields; surplus fields fail the row.
                let mut fields = FieldMap::with_capacity(self.headers.len());
                for (idx, header) in self.headers.iter().enumerate() {
                    fields.insert(header.clone(), self.record.get(idx).unwrap_or("").to_string());
                }

                let mut defects = vec!();
                if self.record.len() > self.headers.len() {
                    defects.push(RowDefect::Surplus { count: self.record.len() - self.headers.len() });
                }

                Some(Ok(RawRecord { row_number: self.row_number, fields, defects }))
            },
            Err(err) => {
                log::debug!("Malformed row in {}: {}", self.path, err);
                self.row_number += 1;
                Some(Ok(RawRecord {
                    row_number: self.row_number,
                    fields: FieldMap::new(),
                    defects: vec!(RowDefect::Malformed { detail: err.to_string().to_lowercase() }),
                }))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn widgets_source(extra: &str) -> SourceConfig {
        serde_yaml::from_str(&format!(r#"
name: widgets
pattern: "widgets*.csv"
format: delimited
table: widgets
grain: [id]
{}
schema:
  - {{ name: id, data_type: integer, required: true }}
  - {{ name: name, data_type: string }}
"#, extra)).unwrap()
    }

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_reads_rows_in_order_with_padding_and_surplus() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "widgets.csv", "id,name\n1,a\n2\n3,c,extra\n");

        let mut rdr = DelimitedReader::open(&path, &widgets_source(""), false).unwrap();
        assert_eq!(vec!("id".to_string(), "name".to_string()), rdr.headers().to_vec());

        let first = rdr.next_record().unwrap().unwrap();
        assert_eq!(1, first.row_number);
        assert_eq!("a", first.fields.get("name").unwrap());

        // Short row pads with an empty string.
        let second = rdr.next_record().unwrap().unwrap();
        assert_eq!("", second.fields.get("name").unwrap());
        assert!(second.defects.is_empty());

        // Long row carries a surplus defect.
        let third = rdr.next_record().unwrap().unwrap();
        assert!(matches!(third.defects[0], RowDefect::Surplus { count: 1 }));

        assert!(rdr.next_record().is_none());
    }

    #[test]
    fn test_skip_rows_and_blank_lines_before_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "widgets.csv", "junk preamble\n\nid,name\n1,a\n");

        let source = widgets_source("skip_rows: 1");
        let mut rdr = DelimitedReader::open(&path, &source, false).unwrap();

        assert_eq!(vec!("id".to_string(), "name".to_string()), rdr.headers().to_vec());
        assert_eq!(1, rdr.next_record().unwrap().unwrap().row_number);
    }

    #[test]
    fn test_alternate_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "widgets.csv", "id|name\n1|a\n");

        let source = widgets_source("delimiter: '|'");
        let mut rdr = DelimitedReader::open(&path, &source, false).unwrap();

        assert_eq!(vec!("id".to_string(), "name".to_string()), rdr.headers().to_vec());
        assert_eq!("a", rdr.next_record().unwrap().unwrap().fields.get("name").unwrap());
    }

    #[test]
    fn test_header_only_file_yields_no_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "widgets.csv", "id,name\n");

        let mut rdr = DelimitedReader::open(&path, &widgets_source(""), false).unwrap();
        assert!(!rdr.headers().is_empty());
        assert!(rdr.next_record().is_none());
    }

    #[test]
    fn test_empty_file_has_no_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "widgets.csv", "");

        let rdr = DelimitedReader::open(&path, &widgets_source(""), false).unwrap();
        assert!(rdr.headers().is_empty());
    }

    #[test]
    fn test_gzipped_content_is_decompressed() {
        use flate2::{write::GzEncoder, Compression};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("widgets.csv.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(b"id,name\n1,a\n").unwrap();
        encoder.finish().unwrap();

        let mut rdr = DelimitedReader::open(&path, &widgets_source(""), true).unwrap();
        assert_eq!("a", rdr.next_record().unwrap().unwrap().fields.get("name").unwrap());
    }
}
