use itertools::Itertools;
use hopper_core::{data_type::DataType, source::SourceConfig, value::Value};
use crate::db::{self, dialect::Dialect, Db, RetryPolicy};
use crate::error::HopperError;

///
/// Owns one file's stage table: creates it after header validation, buffers
/// validated records and lands them in batched multi-row inserts.
///
/// Flushes retry transient failures with exponential backoff; a non-transient
/// failure aborts the pipeline. Every staged row carries the provenance
/// columns source_filename and file_row_number.
///
pub struct StageWriter<'d> {
    db: &'d Db,
    table: String,
    columns: Vec<(String, DataType)>,
    filename: String,
    buffer: Vec<Vec<Option<String>>>,
    batch_size: usize,
    retry: RetryPolicy,
    staged: u64,
}

impl<'d> StageWriter<'d> {
    pub async fn create(db: &'d Db, source: &SourceConfig, table: String, filename: String, batch_size: usize)
        -> Result<StageWriter<'d>, HopperError> {

        let d = db.dialect();

        let mut columns: Vec<(String, DataType)> = source.schema()
            .iter()
            .map(|field| (field.name().to_string(), field.data_type()))
            .collect();
        columns.push(("source_filename".to_string(), DataType::String));
        columns.push(("file_row_number".to_string(), DataType::Integer));

        // Same shape as the target plus provenance, and no indexes - the
        // stage is written once, audited, merged and dropped.
        let ddl = format!("CREATE TABLE {} ({})",
            d.quote(&table),
            columns.iter().map(|(name, dt)| format!("{} {}", d.quote(name), d.sql_type(*dt))).join(", "));

        db.execute("create stage table", &ddl, &[]).await?;

        log::debug!("Created stage table {} for {}", table, filename);

        Ok(Self {
            db,
            table,
            columns,
            filename,
            buffer: Vec::with_capacity(batch_size.min(65_536)),
            batch_size: batch_size.max(1),
            retry: RetryPolicy::default(),
            staged: 0,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn push(&mut self, values: &[Value], row_number: u64) -> Result<(), HopperError> {
        let mut row: Vec<Option<String>> = values.iter().map(|value| value.to_sql_string()).collect();
        row.push(Some(self.filename.clone()));
        row.push(Some(row_number.to_string()));

        self.buffer.push(row);

        if self.buffer.len() >= self.batch_size {
            self.flush().await?;
        }

        Ok(())
    }

    ///
    /// Flush any partial batch and return the total rows staged.
    ///
    pub async fn commit(&mut self) -> Result<u64, HopperError> {
        self.flush().await?;
        Ok(self.staged)
    }

    async fn flush(&mut self) -> Result<(), HopperError> {
        if self.buffer.is_empty() {
            return Ok(())
        }

        let d = self.db.dialect();

        // One multi-row insert per batch, chunked further only if the batch
        // would breach the dialect's bind-parameter ceiling.
        let max_rows = (d.max_bind_params() / self.columns.len()).max(1);
        let rows = std::mem::take(&mut self.buffer);

        for chunk in rows.chunks(max_rows) {
            let sql = insert_sql(d, &self.table, &self.columns, chunk.len());
            let params: Vec<Option<String>> = chunk.iter().flatten().cloned().collect();

            db::with_retry(&self.retry, || self.db.execute("stage insert", &sql, &params)).await?;

            self.staged += chunk.len() as u64;
        }

        log::debug!("Staged {} records into {}", self.staged, self.table);

        Ok(())
    }
}

fn insert_sql(d: Dialect, table: &str, columns: &[(String, DataType)], rows: usize) -> String {
    let column_list = columns.iter().map(|(name, _)| d.quote(name)).join(", ");

    let mut idx = 0;
    let tuples = (0..rows)
        .map(|_| {
            let placeholders = columns.iter()
                .map(|(_, dt)| {
                    idx += 1;
                    d.placeholder(idx, Some(*dt))
                })
                .join(", ");
            format!("({})", placeholders)
        })
        .join(", ");

    format!("INSERT INTO {} ({}) VALUES {}", d.quote(table), column_list, tuples)
}

///
/// Tear the stage table down - called on every pipeline exit path, so a
/// missing table is not an error.
///
pub async fn drop_stage(db: &Db, table: &str) -> Result<(), HopperError> {
    let d = db.dialect();

    // Truncate first, then drop. DELETE is the portable truncation.
    if let Err(err) = db.execute("clear stage table", &format!("DELETE FROM {}", d.quote(table)), &[]).await {
        log::debug!("Stage table {} could not be cleared before dropping: {}", table, err);
    }

    db.execute("drop stage table", &format!("DROP TABLE IF EXISTS {}", d.quote(table)), &[]).await?;

    log::debug!("Dropped stage table {}", table);

    Ok(())
}
