pub mod dialect;

use dialect::Dialect;
use lazy_static::lazy_static;
use sqlx::any::{Any, AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::AnyPool;
use sqlx::query::Query;
use sqlx::Row;
use std::{collections::HashSet, future::Future, time::Duration};
use hopper_core::{data_type::DataType, registry::Registry, source::SourceConfig};
use crate::error::HopperError;

pub const LOG_TABLE: &str = "file_load_log";
pub const DLQ_TABLE: &str = "dead_letter_queue";

lazy_static! {
    static ref DRIVERS: () = sqlx::any::install_default_drivers();
}

///
/// The process-wide database capability.
///
/// One pool, one dialect, one per-call timeout. Every operation checks a
/// connection out of the pool for its own duration; nothing holds a
/// connection across file pipelines.
///
pub struct Db {
    pool: AnyPool,
    dialect: Dialect,
    timeout: Duration,
}

impl Db {
    pub async fn connect(url: &str, max_connections: u32, timeout: Duration) -> Result<Self, HopperError> {
        lazy_static::initialize(&DRIVERS);

        let dialect = Dialect::from_url(url)?;
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(timeout)
            .connect(url)
            .await
            .map_err(|source| HopperError::DbFatal { context: "connect".into(), source })?;

        Ok(Self { pool, dialect, timeout })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn call_timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn execute(&self, context: &str, sql: &str, params: &[Option<String>]) -> Result<u64, HopperError> {
        let result = self.guard(context, bind_all(sqlx::query(sql), params).execute(&self.pool)).await?;
        Ok(result.rows_affected())
    }

    pub async fn fetch_all(&self, context: &str, sql: &str, params: &[Option<String>]) -> Result<Vec<AnyRow>, HopperError> {
        self.guard(context, bind_all(sqlx::query(sql), params).fetch_all(&self.pool)).await
    }

    pub async fn fetch_optional(&self, context: &str, sql: &str, params: &[Option<String>]) -> Result<Option<AnyRow>, HopperError> {
        self.guard(context, bind_all(sqlx::query(sql), params).fetch_optional(&self.pool)).await
    }

    pub async fn fetch_scalar_i64(&self, context: &str, sql: &str, params: &[Option<String>]) -> Result<i64, HopperError> {
        let row = self.guard(context, bind_all(sqlx::query(sql), params).fetch_one(&self.pool)).await?;
        row.try_get::<i64, _>(0).map_err(|source| HopperError::DbFatal { context: context.into(), source })
    }

    ///
    /// Apply the per-call timeout and the transient/fatal classification.
    ///
    async fn guard<T, F>(&self, context: &str, fut: F) -> Result<T, HopperError>
    where F: Future<Output = Result<T, sqlx::Error>> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(classify(context, source)),
            Err(_elapsed) => Err(HopperError::DbTransient { context: context.into(), source: sqlx::Error::PoolTimedOut }),
        }
    }
}

pub fn bind_all<'q>(mut query: Query<'q, Any, AnyArguments<'q>>, params: &'q [Option<String>])
    -> Query<'q, Any, AnyArguments<'q>> {

    for param in params {
        query = query.bind(param.as_deref());
    }
    query
}

///
/// Wrap a database error with its transient/fatal disposition.
///
pub fn classify(context: &str, source: sqlx::Error) -> HopperError {
    match is_transient(&source) {
        true  => HopperError::DbTransient { context: context.into(), source },
        false => HopperError::DbFatal { context: context.into(), source },
    }
}

///
/// Deadlocks, serialisation failures, lock timeouts and dropped connections
/// are worth retrying; everything else is not.
///
pub fn is_transient(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.to_string()).unwrap_or_default();
            let message = db.message().to_lowercase();

            matches!(code.as_str(), "40001" | "40P01" | "55P03" | "1205" | "1213")
                || message.contains("deadlock")
                || message.contains("serialization failure")
                || message.contains("lock wait timeout")
                || message.contains("database is locked")
                || message.contains("database table is locked")
                || message.contains("connection reset")
                || message.contains("broken pipe")
                || message.contains("connection closed")
        },
        _ => false,
    }
}

///
/// Backoff for batched inserts: 200ms doubling to a 5s ceiling, 5 attempts.
///
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub factor: u32,
    pub cap: Duration,
    pub attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            factor: 2,
            cap: Duration::from_secs(5),
            attempts: 5,
        }
    }
}

pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, HopperError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HopperError>>,
{
    let mut delay = policy.initial;

    for attempt in 1..=policy.attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error @ HopperError::DbTransient { .. }) if attempt < policy.attempts => {
                log::warn!("Transient database error on attempt {}/{}: {} - retrying in {:?}",
                    attempt,
                    policy.attempts,
                    error,
                    delay);
                tokio::time::sleep(delay).await;
                delay = (delay * policy.factor).min(policy.cap);
            },
            Err(error) => return Err(error),
        }
    }

    unreachable!("retry loop either returns a value or the final error")
}

///
/// Start-up DDL: every target table from the registry plus the run-log and
/// dead-letter tables, all create-if-not-exists so restarts are harmless.
///
pub async fn ensure_schema(db: &Db, registry: &Registry) -> Result<(), HopperError> {
    let mut seen = HashSet::new();
    for source in registry.sources() {
        if seen.insert(source.table()) {
            create_target_table(db, source).await?;
        }
    }

    create_log_table(db).await?;
    create_dlq_table(db).await?;

    Ok(())
}

async fn create_target_table(db: &Db, source: &SourceConfig) -> Result<(), HopperError> {
    let d = db.dialect();

    let mut columns: Vec<String> = source.schema()
        .iter()
        .map(|field| format!("{} {}", d.quote(field.name()), d.sql_type(field.data_type())))
        .collect();
    columns.push(format!("{} {}", d.quote("source_filename"), d.sql_type(DataType::String)));

    let sql = format!("CREATE TABLE IF NOT EXISTS {} ({})", d.quote(source.table()), columns.join(", "));
    db.execute("create target table", &sql, &[]).await?;

    create_index(db, source.table(), &format!("ix_{}_source_filename", source.table()),
        &["source_filename".to_string()], false).await?;

    // The grain is the natural key - a unique index both enforces it and
    // drives the merge's conflict detection.
    create_index(db, source.table(), &format!("ux_{}_grain", source.table()),
        source.grain(), true).await?;

    Ok(())
}

async fn create_index(db: &Db, table: &str, name: &str, columns: &[String], unique: bool) -> Result<(), HopperError> {
    let d = db.dialect();
    let name: String = name.chars().take(d.max_identifier_len()).collect();
    let column_list = columns.iter().map(|c| d.quote(c)).collect::<Vec<String>>().join(", ");
    let uniqueness = match unique { true => "UNIQUE ", false => "" };

    match d {
        // MySQL has no CREATE INDEX IF NOT EXISTS - probe the catalog instead.
        Dialect::MySql => {
            let existing = db.fetch_scalar_i64(
                "check index",
                "SELECT COUNT(*) FROM information_schema.statistics WHERE table_schema = DATABASE() AND table_name = ? AND index_name = ?",
                &[Some(table.to_string()), Some(name.clone())]).await?;

            if existing == 0 {
                let sql = format!("CREATE {}INDEX {} ON {} ({})", uniqueness, d.quote(&name), d.quote(table), column_list);
                db.execute("create index", &sql, &[]).await?;
            }
        },
        _ => {
            let sql = format!("CREATE {}INDEX IF NOT EXISTS {} ON {} ({})", uniqueness, d.quote(&name), d.quote(table), column_list);
            db.execute("create index", &sql, &[]).await?;
        },
    }

    Ok(())
}

async fn create_log_table(db: &Db) -> Result<(), HopperError> {
    let d = db.dialect();
    let text = d.sql_type(DataType::String);
    let ts = d.sql_type(DataType::Datetime);

    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id VARCHAR(36) PRIMARY KEY,
            filename {text},
            source_name {text},
            target_table {text},
            status VARCHAR(20),
            started_at {ts},
            ended_at {ts},
            archive_started_at {ts},
            archive_ended_at {ts},
            processing_started_at {ts},
            processing_ended_at {ts},
            staging_started_at {ts},
            staging_ended_at {ts},
            audit_started_at {ts},
            audit_ended_at {ts},
            merge_started_at {ts},
            merge_ended_at {ts},
            records_processed BIGINT,
            validation_errors BIGINT,
            staged BIGINT,
            inserted BIGINT,
            updated BIGINT,
            audit_ok BOOLEAN,
            error_kind VARCHAR(40),
            error_message TEXT
        )",
        table = LOG_TABLE,
        text = text,
        ts = ts);

    db.execute("create run log table", &sql, &[]).await?;

    Ok(())
}

async fn create_dlq_table(db: &Db) -> Result<(), HopperError> {
    let d = db.dialect();
    let text = d.sql_type(DataType::String);
    let ts = d.sql_type(DataType::Datetime);

    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id VARCHAR(36) PRIMARY KEY,
            source_filename {text},
            file_row_number BIGINT,
            record_data TEXT,
            validation_errors TEXT,
            file_load_log_id VARCHAR(36),
            target_table_name {text},
            failed_at {ts}
        )",
        table = DLQ_TABLE,
        text = text,
        ts = ts);

    db.execute("create dead letter table", &sql, &[]).await?;

    create_index(db, DLQ_TABLE, "ix_dlq_file_load_log_id", &["file_load_log_id".to_string()], false).await?;
    create_index(db, DLQ_TABLE, "ix_dlq_source_filename", &["source_filename".to_string()], false).await?;

    Ok(())
}
