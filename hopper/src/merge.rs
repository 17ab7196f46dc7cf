use itertools::Itertools;
use sqlx::Row;
use hopper_core::source::SourceConfig;
use crate::db::{classify, dialect::Dialect, Db};
use crate::error::HopperError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeCounts {
    pub inserted: u64,
    pub updated: u64,
}

///
/// The duplicate-file guard: true if any target row already carries this
/// source_filename. Runs before the stage table is created.
///
pub async fn already_loaded(db: &Db, table: &str, filename: &str) -> Result<bool, HopperError> {
    let d = db.dialect();

    let sql = format!("SELECT 1 FROM {} WHERE {} = {} LIMIT 1",
        d.quote(table),
        d.quote("source_filename"),
        d.placeholder(1, None));

    Ok(db.fetch_optional("duplicate file check", &sql, &[Some(filename.to_string())]).await?.is_some())
}

///
/// Publish the stage into the target: one atomic upsert keyed on the grain.
///
/// Stage rows whose grain matches an existing target row update its non-grain
/// columns; the rest insert. The counters are computed inside the same
/// transaction before the upsert - the grain audit has already proven the
/// stage's grains unique, so matched-count equals updated-count.
///
pub async fn merge(db: &Db, source: &SourceConfig, stage: &str) -> Result<MergeCounts, HopperError> {
    let d = db.dialect();

    let mut tx = db.pool().begin().await.map_err(|err| classify("merge begin", err))?;

    let join_on = source.grain()
        .iter()
        .map(|grain| format!("s.{g} = t.{g}", g = d.quote(grain)))
        .join(" AND ");

    let staged_sql = format!("SELECT COUNT(*) FROM {}", d.quote(stage));
    let matched_sql = format!("SELECT COUNT(*) FROM {} s INNER JOIN {} t ON {}",
        d.quote(stage), d.quote(source.table()), join_on);

    let staged: i64 = sqlx::query(&staged_sql)
        .fetch_one(&mut *tx).await
        .and_then(|row| row.try_get(0))
        .map_err(|err| classify("merge count", err))?;

    let matched: i64 = sqlx::query(&matched_sql)
        .fetch_one(&mut *tx).await
        .and_then(|row| row.try_get(0))
        .map_err(|err| classify("merge count", err))?;

    let upsert = upsert_sql(d, source, stage);
    sqlx::query(&upsert)
        .execute(&mut *tx).await
        .map_err(|err| classify("merge upsert", err))?;

    tx.commit().await.map_err(|err| classify("merge commit", err))?;

    Ok(MergeCounts {
        inserted: (staged - matched).max(0) as u64,
        updated: matched.max(0) as u64,
    })
}

///
/// The dialect-appropriate idempotent upsert. The stage's provenance column
/// file_row_number is deliberately absent from the column list.
///
fn upsert_sql(d: Dialect, source: &SourceConfig, stage: &str) -> String {
    let mut columns: Vec<String> = source.schema().iter().map(|field| field.name().to_string()).collect();
    columns.push("source_filename".to_string());

    let grain = source.grain();
    let non_grain: Vec<&String> = columns.iter().filter(|column| !grain.iter().any(|g| g == *column)).collect();

    let column_list = columns.iter().map(|column| d.quote(column)).join(", ");
    let grain_list = grain.iter().map(|column| d.quote(column)).join(", ");

    match d {
        Dialect::Postgres => {
            let assignments = non_grain.iter()
                .map(|column| format!("{c} = EXCLUDED.{c}", c = d.quote(column)))
                .join(", ");
            format!(
                "INSERT INTO {target} ({columns}) SELECT {columns} FROM {stage} ON CONFLICT ({grain}) DO UPDATE SET {assignments}",
                target = d.quote(source.table()),
                columns = column_list,
                stage = d.quote(stage),
                grain = grain_list,
                assignments = assignments)
        },

        Dialect::Sqlite => {
            let assignments = non_grain.iter()
                .map(|column| format!("{c} = excluded.{c}", c = d.quote(column)))
                .join(", ");
            // WHERE true disambiguates the upsert clause after INSERT..SELECT.
            format!(
                "INSERT INTO {target} ({columns}) SELECT {columns} FROM {stage} WHERE true ON CONFLICT ({grain}) DO UPDATE SET {assignments}",
                target = d.quote(source.table()),
                columns = column_list,
                stage = d.quote(stage),
                grain = grain_list,
                assignments = assignments)
        },

        Dialect::MySql => {
            let assignments = non_grain.iter()
                .map(|column| format!("{c} = VALUES({c})", c = d.quote(column)))
                .join(", ");
            format!(
                "INSERT INTO {target} ({columns}) SELECT {columns} FROM {stage} ON DUPLICATE KEY UPDATE {assignments}",
                target = d.quote(source.table()),
                columns = column_list,
                stage = d.quote(stage),
                assignments = assignments)
        },
    }
}
