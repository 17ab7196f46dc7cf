use sqlx::Row;
use std::{fs, path::PathBuf, time::Duration};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use hopper::{config::Settings, db::Db};

///
/// A scratch deployment: watch/archive/duplicates folders and a sqlite
/// database inside one temp dir, plus a sources file.
///
pub struct Fixture {
    pub dir: TempDir,
    pub settings: Settings,
    pub sources_path: PathBuf,
    pub db_url: String,
}

impl Fixture {
    pub fn new(sources_yaml: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();

        let watch = dir.path().join("inbox");
        let archive = dir.path().join("archive");
        let duplicates = dir.path().join("duplicates");
        fs::create_dir_all(&watch).unwrap();

        let db_url = format!("sqlite://{}?mode=rwc", dir.path().join("hopper.db").display());

        let settings = Settings::new(&db_url, &watch, &archive, &duplicates)
            .with_workers(4)
            .with_batch_size(500)
            .with_db_timeout(Duration::from_secs(10));

        let sources_path = dir.path().join("sources.yaml");
        fs::write(&sources_path, sources_yaml).unwrap();

        Self { dir, settings, sources_path, db_url }
    }

    pub fn watch_path(&self, name: &str) -> PathBuf {
        self.dir.path().join("inbox").join(name)
    }

    pub fn drop_file(&self, name: &str, content: &str) {
        fs::write(self.watch_path(name), content).unwrap();
    }

    ///
    /// One scheduler pass over the watch folder.
    ///
    pub async fn run_once(&self) {
        hopper::run(
            self.sources_path.to_str().unwrap(),
            self.settings.clone(),
            true,
            CancellationToken::new()).await.unwrap();
    }

    pub async fn db(&self) -> Db {
        Db::connect(&self.db_url, 1, Duration::from_secs(10)).await.unwrap()
    }

    pub fn archived_files(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.dir.path().join("archive"))
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.file_name().to_string_lossy().to_string()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn duplicate_files(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.dir.path().join("duplicates"))
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.file_name().to_string_lossy().to_string()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

///
/// The scenario source: widgets(id INT, name TEXT) keyed on id.
///
pub fn widgets_sources(error_threshold: f64) -> String {
    format!(r#"
sources:
  - name: widgets
    pattern: "widgets*.csv"
    format: delimited
    table: widgets
    grain: [id]
    error_threshold: {}
    schema:
      - {{ name: id, data_type: integer, required: true }}
      - {{ name: name, data_type: string }}
"#, error_threshold)
}

pub async fn count(db: &Db, sql: &str) -> i64 {
    db.fetch_scalar_i64("test count", sql, &[]).await.unwrap()
}

#[derive(Debug)]
pub struct LogRow {
    pub status: String,
    pub error_kind: Option<String>,
    pub records_processed: Option<i64>,
    pub validation_errors: Option<i64>,
    pub staged: Option<i64>,
    pub inserted: Option<i64>,
    pub updated: Option<i64>,
}

pub async fn log_rows(db: &Db, filename: &str) -> Vec<LogRow> {
    let rows = db.fetch_all(
        "test log rows",
        "SELECT status, error_kind, records_processed, validation_errors, staged, inserted, updated \
         FROM file_load_log WHERE filename = ? ORDER BY started_at, id",
        &[Some(filename.to_string())]).await.unwrap();

    rows.iter()
        .map(|row| LogRow {
            status: row.try_get(0).unwrap(),
            error_kind: row.try_get(1).ok(),
            records_processed: row.try_get(2).ok(),
            validation_errors: row.try_get(3).ok(),
            staged: row.try_get(4).ok(),
            inserted: row.try_get(5).ok(),
            updated: row.try_get(6).ok(),
        })
        .collect()
}

///
/// No stage_* table may survive a pipeline, success or failure.
///
pub async fn assert_no_stage_tables(db: &Db) {
    let leftover = count(db, "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'stage_%'").await;
    assert_eq!(0, leftover, "stage tables were left behind");
}
