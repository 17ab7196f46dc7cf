use chrono::Utc;
use itertools::Itertools;
use uuid::Uuid;
use hopper_core::{data_type::DataType, value::Value};
use crate::db::{Db, LOG_TABLE};
use crate::error::HopperError;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_DUPLICATE: &str = "duplicate_skipped";

///
/// The pipeline phases that stamp their own start/end times onto the run-log
/// row.
///
#[derive(Clone, Copy, Debug)]
pub enum Phase {
    Archive,
    Processing,
    Staging,
    Audit,
    Merge,
}

impl Phase {
    fn prefix(&self) -> &str {
        match self {
            Phase::Archive    => "archive",
            Phase::Processing => "processing",
            Phase::Staging    => "staging",
            Phase::Audit      => "audit",
            Phase::Merge      => "merge",
        }
    }
}

///
/// Writes the per-file run record: inserted as pending when the pipeline
/// starts, updated field-by-field as phases complete, finalised exactly once
/// with the terminal status.
///
/// Only the owning pipeline ever touches its row. A row left pending after a
/// crash is deliberate - it is the operator's evidence.
///
pub struct LogRecorder<'d> {
    db: &'d Db,
    id: String,
}

impl<'d> LogRecorder<'d> {
    pub async fn start(db: &'d Db, filename: &str, source_name: &str, target_table: &str)
        -> Result<LogRecorder<'d>, HopperError> {

        let id = Uuid::new_v4().to_string();
        let d = db.dialect();

        let sql = format!(
            "INSERT INTO {} (id, filename, source_name, target_table, status, started_at) VALUES ({}, {}, {}, {}, {}, {})",
            LOG_TABLE,
            d.placeholder(1, None),
            d.placeholder(2, None),
            d.placeholder(3, None),
            d.placeholder(4, None),
            d.placeholder(5, None),
            d.placeholder(6, Some(DataType::Datetime)));

        db.execute("run log insert", &sql, &[
            Some(id.clone()),
            Some(filename.to_string()),
            Some(source_name.to_string()),
            Some(target_table.to_string()),
            Some(STATUS_PENDING.to_string()),
            now()]).await?;

        Ok(Self { db, id })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn phase_started(&self, phase: Phase) -> Result<(), HopperError> {
        self.update(&[(format!("{}_started_at", phase.prefix()), DataType::Datetime, now())]).await
    }

    pub async fn phase_ended(&self, phase: Phase) -> Result<(), HopperError> {
        self.update(&[(format!("{}_ended_at", phase.prefix()), DataType::Datetime, now())]).await
    }

    pub async fn processed(&self, records: u64, errors: u64) -> Result<(), HopperError> {
        self.update(&[
            ("records_processed".to_string(), DataType::Integer, Some(records.to_string())),
            ("validation_errors".to_string(), DataType::Integer, Some(errors.to_string()))]).await
    }

    pub async fn staged(&self, staged: u64) -> Result<(), HopperError> {
        self.update(&[("staged".to_string(), DataType::Integer, Some(staged.to_string()))]).await
    }

    pub async fn audit_passed(&self) -> Result<(), HopperError> {
        self.update(&[("audit_ok".to_string(), DataType::Boolean, Some("1".to_string()))]).await
    }

    pub async fn merged(&self, inserted: u64, updated: u64) -> Result<(), HopperError> {
        self.update(&[
            ("inserted".to_string(), DataType::Integer, Some(inserted.to_string())),
            ("updated".to_string(), DataType::Integer, Some(updated.to_string()))]).await
    }

    ///
    /// One update sets the terminal status and end timestamp together - after
    /// this the row is never written again.
    ///
    pub async fn finalize(&self, status: &str, error: Option<(&str, String)>) -> Result<(), HopperError> {
        let mut fields = vec!(
            ("status".to_string(), DataType::String, Some(status.to_string())),
            ("ended_at".to_string(), DataType::Datetime, now()));

        if let Some((kind, message)) = error {
            fields.push(("error_kind".to_string(), DataType::String, Some(kind.to_string())));
            fields.push(("error_message".to_string(), DataType::String, Some(message)));
        }

        self.update(&fields).await
    }

    async fn update(&self, fields: &[(String, DataType, Option<String>)]) -> Result<(), HopperError> {
        let d = self.db.dialect();

        let assignments = fields.iter()
            .enumerate()
            .map(|(idx, (column, data_type, _))| format!("{} = {}", column, d.placeholder(idx + 1, Some(*data_type))))
            .join(", ");

        let sql = format!("UPDATE {} SET {} WHERE id = {}",
            LOG_TABLE,
            assignments,
            d.placeholder(fields.len() + 1, None));

        let mut params: Vec<Option<String>> = fields.iter().map(|(_, _, value)| value.clone()).collect();
        params.push(Some(self.id.clone()));

        self.db.execute("run log update", &sql, &params).await?;

        Ok(())
    }
}

fn now() -> Option<String> {
    Value::Datetime(Utc::now()).to_sql_string()
}
