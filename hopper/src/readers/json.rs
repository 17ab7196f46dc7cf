use flate2::read::MultiGzDecoder;
use std::{fs::File, io::{BufReader, Read}, path::Path};
use hopper_core::source::SourceConfig;
use crate::error::HopperError;
use crate::folders::ToCanonicalString;
use super::{FieldMap, RawRecord, RecordReader, RowDefect};

///
/// Streams records from a JSON document. The configured json_path selects the
/// array to read (a dot-separated object path); the default is a top-level
/// array. Each item must be an object.
///
/// The declared header set is taken from the first item's keys - later items
/// with extra keys are pruned by the validator, later items missing keys only
/// fail when those keys are required.
///
#[derive(Debug)]
pub struct JsonReader {
    headers: Vec<String>,
    items: std::vec::IntoIter<serde_json::Value>,
    row_number: u64,
}

impl JsonReader {
    pub fn open(path: &Path, source: &SourceConfig, gzipped: bool) -> Result<Self, HopperError> {
        let file = File::open(path)
            .map_err(|source| HopperError::CannotOpenFile { path: path.to_canonical_string(), source })?;

        let raw: Box<dyn Read + Send> = match gzipped {
            true  => Box::new(MultiGzDecoder::new(file)),
            false => Box::new(file),
        };

        let document: serde_json::Value = serde_json::from_reader(BufReader::new(raw))
            .map_err(|source| HopperError::CannotParseJson { path: path.to_canonical_string(), source })?;

        let selector = source.json_path().unwrap_or("");
        let mut node = &document;
        for part in selector.split('.').filter(|part| !part.is_empty()) {
            node = node.get(part).ok_or(HopperError::JsonSelectorNotArray {
                path: path.to_canonical_string(),
                selector: selector.to_string(),
            })?;
        }

        let items = node.as_array()
            .ok_or(HopperError::JsonSelectorNotArray {
                path: path.to_canonical_string(),
                selector: match selector.is_empty() { true => "<root>".to_string(), false => selector.to_string() },
            })?
            .clone();

        let headers = items.first()
            .and_then(|item| item.as_object())
            .map(|object| object.keys().cloned().collect())
            .unwrap_or_default();

        Ok(Self { headers, items: items.into_iter(), row_number: 0 })
    }
}

impl RecordReader for JsonReader {
    fn headers(&self) -> &[String] {
        &self.headers
    }

    fn next_record(&mut self) -> Option<Result<RawRecord, HopperError>> {
        let item = self.items.next()?;
        self.row_number += 1;

        match item.as_object() {
            Some(object) => {
                let mut fields = FieldMap::with_capacity(object.len());
                for (key, value) in object {
                    if value.is_null() {
                        continue // Null and absent are both 'missing'.
                    }
                    fields.insert(key.clone(), scalar_to_string(value));
                }
                Some(Ok(RawRecord { row_number: self.row_number, fields, defects: vec!() }))
            },
            None => Some(Ok(RawRecord {
                row_number: self.row_number,
                fields: FieldMap::new(),
                defects: vec!(RowDefect::Malformed { detail: "item is not a json object".into() }),
            })),
        }
    }
}

fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => match b { true => "true", false => "false" }.to_string(),
        serde_json::Value::Number(n) => n.to_string(),

        // Nested structures only survive validation into string columns.
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn widgets_source(extra: &str) -> SourceConfig {
        serde_yaml::from_str(&format!(r#"
name: widgets
pattern: "widgets*.json"
format: json
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
    fn test_top_level_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "widgets.json", r#"[{"id": 1, "name": "a"}, {"id": 2, "name": "b"}]"#);

        let mut rdr = JsonReader::open(&path, &widgets_source(""), false).unwrap();
        assert_eq!(vec!("id".to_string(), "name".to_string()), rdr.headers().to_vec());

        let first = rdr.next_record().unwrap().unwrap();
        assert_eq!(1, first.row_number);
        assert_eq!("1", first.fields.get("id").unwrap());
        assert_eq!("a", first.fields.get("name").unwrap());

        assert_eq!(2, rdr.next_record().unwrap().unwrap().row_number);
        assert!(rdr.next_record().is_none());
    }

    #[test]
    fn test_selector_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "widgets.json", r#"{"data": {"rows": [{"id": 1, "name": "a"}]}}"#);

        let source = widgets_source("json_path: data.rows");
        let mut rdr = JsonReader::open(&path, &source, false).unwrap();
        assert_eq!("a", rdr.next_record().unwrap().unwrap().fields.get("name").unwrap());
    }

    #[test]
    fn test_selector_must_be_an_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "widgets.json", r#"{"data": 42}"#);

        let source = widgets_source("json_path: data");
        match JsonReader::open(&path, &source, false).unwrap_err() {
            HopperError::JsonSelectorNotArray { selector, .. } => assert_eq!("data", selector),
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn test_headers_come_from_first_item_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "widgets.json", r#"[{"id": 1}, {"id": 2, "name": "late"}]"#);

        let mut rdr = JsonReader::open(&path, &widgets_source(""), false).unwrap();
        assert_eq!(vec!("id".to_string()), rdr.headers().to_vec());

        // The later item still carries its extra key; the validator prunes it.
        rdr.next_record();
        assert_eq!("late", rdr.next_record().unwrap().unwrap().fields.get("name").unwrap());
    }

    #[test]
    fn test_null_values_are_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "widgets.json", r#"[{"id": 1, "name": null}]"#);

        let mut rdr = JsonReader::open(&path, &widgets_source(""), false).unwrap();
        let record = rdr.next_record().unwrap().unwrap();
        assert!(record.fields.get("name").is_none());
    }

    #[test]
    fn test_non_object_item_is_a_row_defect() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "widgets.json", r#"[{"id": 1, "name": "a"}, 42]"#);

        let mut rdr = JsonReader::open(&path, &widgets_source(""), false).unwrap();
        rdr.next_record();
        let bad = rdr.next_record().unwrap().unwrap();
        assert!(matches!(bad.defects[0], RowDefect::Malformed { .. }));
    }
}
