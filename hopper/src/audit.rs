use itertools::Itertools;
use sqlx::{any::AnyRow, Column, Row};
use crate::db::Db;
use crate::error::HopperError;

///
/// Gate one: the grain must be unique within the stage table, or the merge
/// would be non-deterministic.
///
/// Counted as total rows minus distinct grain tuples - COUNT(DISTINCT a, b)
/// is not portable, a subquery on the grain projection is.
///
pub async fn check_grain(db: &Db, stage: &str, grain: &[String]) -> Result<(), HopperError> {
    let d = db.dialect();
    let grain_list = grain.iter().map(|column| d.quote(column)).join(", ");

    let sql = format!(
        "SELECT (SELECT COUNT(*) FROM {stage}) - (SELECT COUNT(*) FROM (SELECT DISTINCT {grain_list} FROM {stage}) {alias})",
        stage = d.quote(stage),
        grain_list = grain_list,
        alias = d.quote("grains"));

    let duplicates = db.fetch_scalar_i64("grain audit", &sql, &[]).await?;

    match duplicates {
        0 => Ok(()),
        count => Err(HopperError::GrainDuplicates { table: stage.to_string(), count }),
    }
}

///
/// Gate two: the user's audit query, run against the stage table.
///
/// The query must return exactly one row, and every column of that row must
/// read as integer 1. Any 0 fails the audit, reporting the failing column
/// names; a column that cannot be read as 0/1 also fails - a check that
/// cannot be proven to pass has not passed.
///
pub async fn run_user_audit(db: &Db, stage: &str, template: &str) -> Result<(), HopperError> {
    let sql = template.replace("{table}", &db.dialect().quote(stage));

    let rows = db.fetch_all("user audit", &sql, &[]).await?;

    if rows.len() != 1 {
        return Err(HopperError::AuditShape { table: stage.to_string(), rows: rows.len() })
    }

    let row = &rows[0];
    let mut failing = vec!();

    for (idx, column) in row.columns().iter().enumerate() {
        match audit_flag(row, idx) {
            Some(1) => {},
            Some(_) | None => failing.push(column.name().to_string()),
        }
    }

    match failing.is_empty() {
        true  => Ok(()),
        false => Err(HopperError::AuditFailed { table: stage.to_string(), columns: failing.join(", ") }),
    }
}

///
/// Audit columns arrive as whatever type the dialect picked for the
/// expression - ints, booleans, floats or even text. Interpret liberally.
///
fn audit_flag(row: &AnyRow, idx: usize) -> Option<i64> {
    if let Ok(value) = row.try_get::<i64, _>(idx) {
        return Some(value)
    }

    if let Ok(value) = row.try_get::<i32, _>(idx) {
        return Some(value as i64)
    }

    if let Ok(value) = row.try_get::<bool, _>(idx) {
        return Some(value as i64)
    }

    if let Ok(value) = row.try_get::<f64, _>(idx) {
        if value == 0.0 || value == 1.0 {
            return Some(value as i64)
        }
    }

    if let Ok(value) = row.try_get::<String, _>(idx) {
        return value.trim().parse::<i64>().ok()
    }

    None
}
