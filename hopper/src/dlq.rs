use chrono::Utc;
use itertools::Itertools;
use uuid::Uuid;
use hopper_core::{data_type::DataType, source::SourceConfig, value::Value};
use crate::db::{self, dialect::Dialect, Db, RetryPolicy, DLQ_TABLE};
use crate::error::HopperError;
use crate::readers::RawRecord;
use crate::validate::RowError;

///
/// One record that failed validation, bound for the dead-letter table.
///
/// record_data holds the grain fields plus the fields that errored - enough
/// to identify and diagnose the row without persisting the whole record.
///
#[derive(Debug)]
pub struct DlqEntry {
    pub filename: String,
    pub row_number: u64,
    pub record_data: serde_json::Value,
    pub errors: Vec<RowError>,
}

///
/// Build a dead-letter entry from the raw record and its validation errors.
///
pub fn entry(source: &SourceConfig, raw: &RawRecord, errors: Vec<RowError>, filename: &str) -> DlqEntry {
    let mut data = serde_json::Map::new();

    for grain in source.grain() {
        let column = source.field(grain).map(|field| field.source_column()).unwrap_or(grain);
        if let Some(value) = raw.fields.get(column) {
            data.insert(grain.clone(), serde_json::Value::String(value.clone()));
        }
    }

    for error in &errors {
        if !error.column_name.is_empty() {
            if let Some(value) = raw.fields.get(&error.column_name) {
                data.insert(error.column_name.clone(), serde_json::Value::String(value.clone()));
            }
        }
    }

    DlqEntry {
        filename: filename.to_string(),
        row_number: raw.row_number,
        record_data: serde_json::Value::Object(data),
        errors,
    }
}

///
/// Batched writer for dead-letter entries. Same batch size and retry
/// discipline as the staging writer.
///
pub struct DlqWriter<'d> {
    db: &'d Db,
    log_id: String,
    target_table: String,
    buffer: Vec<DlqEntry>,
    batch_size: usize,
    retry: RetryPolicy,
    written: u64,
}

const COLUMNS: [(&str, DataType); 8] = [
    ("id", DataType::String),
    ("source_filename", DataType::String),
    ("file_row_number", DataType::Integer),
    ("record_data", DataType::String),
    ("validation_errors", DataType::String),
    ("file_load_log_id", DataType::String),
    ("target_table_name", DataType::String),
    ("failed_at", DataType::Datetime),
];

impl<'d> DlqWriter<'d> {
    pub fn new(db: &'d Db, log_id: String, target_table: String, batch_size: usize) -> Self {
        Self {
            db,
            log_id,
            target_table,
            buffer: vec!(),
            batch_size: batch_size.max(1),
            retry: RetryPolicy::default(),
            written: 0,
        }
    }

    pub async fn push(&mut self, entry: DlqEntry) -> Result<(), HopperError> {
        self.buffer.push(entry);

        if self.buffer.len() >= self.batch_size {
            self.flush().await?;
        }

        Ok(())
    }

    pub async fn commit(&mut self) -> Result<u64, HopperError> {
        self.flush().await?;
        Ok(self.written)
    }

    async fn flush(&mut self) -> Result<(), HopperError> {
        if self.buffer.is_empty() {
            return Ok(())
        }

        let d = self.db.dialect();
        let failed_at = Value::Datetime(Utc::now()).to_sql_string();
        let entries = std::mem::take(&mut self.buffer);

        let max_rows = (d.max_bind_params() / COLUMNS.len()).max(1);

        for chunk in entries.chunks(max_rows) {
            let sql = insert_sql(d, chunk.len());

            let mut params: Vec<Option<String>> = Vec::with_capacity(chunk.len() * COLUMNS.len());
            for entry in chunk {
                params.push(Some(Uuid::new_v4().to_string()));
                params.push(Some(entry.filename.clone()));
                params.push(Some(entry.row_number.to_string()));
                params.push(Some(entry.record_data.to_string()));
                params.push(Some(serde_json::to_string(&entry.errors).unwrap_or_default()));
                params.push(Some(self.log_id.clone()));
                params.push(Some(self.target_table.clone()));
                params.push(failed_at.clone());
            }

            db::with_retry(&self.retry, || self.db.execute("dead letter insert", &sql, &params)).await?;

            self.written += chunk.len() as u64;
        }

        Ok(())
    }
}

fn insert_sql(d: Dialect, rows: usize) -> String {
    let column_list = COLUMNS.iter().map(|(name, _)| *name).join(", ");

    let mut idx = 0;
    let tuples = (0..rows)
        .map(|_| {
            let placeholders = COLUMNS.iter()
                .map(|(_, dt)| {
                    idx += 1;
                    d.placeholder(idx, Some(*dt))
                })
                .join(", ");
            format!("({})", placeholders)
        })
        .join(", ");

    format!("INSERT INTO {} ({}) VALUES {}", DLQ_TABLE, column_list, tuples)
}

///
/// After a successful merge, dead letters from earlier runs of the same file
/// are stale - delete them in batches, keeping the current run's rows.
///
pub async fn purge_previous(db: &Db, filename: &str, current_log_id: &str, batch_size: usize) -> Result<u64, HopperError> {
    let d = db.dialect();
    let mut purged = 0u64;

    let select = format!(
        "SELECT id FROM {} WHERE source_filename = {} AND file_load_log_id <> {} LIMIT {}",
        DLQ_TABLE,
        d.placeholder(1, None),
        d.placeholder(2, None),
        batch_size.max(1));

    loop {
        let rows = db.fetch_all("select stale dead letters", &select,
            &[Some(filename.to_string()), Some(current_log_id.to_string())]).await?;

        if rows.is_empty() {
            break
        }

        let ids: Vec<Option<String>> = rows.iter()
            .map(|row| sqlx::Row::try_get::<String, _>(row, 0).ok())
            .collect();

        let delete = format!(
            "DELETE FROM {} WHERE id IN ({})",
            DLQ_TABLE,
            (1..=ids.len()).map(|idx| d.placeholder(idx, None)).join(", "));

        purged += db.execute("delete stale dead letters", &delete, &ids).await?;
    }

    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readers::FieldMap;

    #[test]
    fn test_entry_keeps_grain_and_errored_fields_only() {
        let source: SourceConfig = serde_yaml::from_str(r#"
name: widgets
pattern: "widgets*.csv"
format: delimited
table: widgets
grain: [id]
schema:
  - { name: id, data_type: integer, required: true }
  - { name: name, data_type: string }
  - { name: colour, data_type: string }
"#).unwrap();

        let mut fields = FieldMap::new();
        fields.insert("id".to_string(), "1".to_string());
        fields.insert("name".to_string(), "bad-value".to_string());
        fields.insert("colour".to_string(), "red".to_string());
        let raw = RawRecord { row_number: 3, fields, defects: vec!() };

        let errors = vec!(RowError {
            column_name: "name".to_string(),
            column_value: "bad-value".to_string(),
            error_type: "too_long".to_string(),
            error_msg: "value is longer than the maximum length of 3".to_string(),
        });

        let entry = entry(&source, &raw, errors, "widgets.csv");

        assert_eq!(3, entry.row_number);
        assert_eq!("1", entry.record_data["id"]);
        assert_eq!("bad-value", entry.record_data["name"]);
        assert!(entry.record_data.get("colour").is_none());
    }
}
