use std::{path::{Path, PathBuf}, time::Duration};
use crate::error::HopperError;

const DEFAULT_BATCH_SIZE: usize = 10_000;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_DB_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

///
/// Runtime settings for the engine, sourced from the environment.
///
/// Variables are namespaced by deployment environment: when HOPPER_ENV is
/// dev, test or prod the DEV_/TEST_/PROD_ prefixed variable is consulted
/// first, falling back to the bare name. One .env file can therefore carry
/// every environment.
///
#[derive(Clone, Debug)]
pub struct Settings {
    database_url: String,
    watch_dir: PathBuf,
    archive_dir: PathBuf,
    duplicates_dir: PathBuf,
    batch_size: usize,
    workers: usize,
    poll_interval: Duration,
    db_timeout: Duration,
    max_connections: u32,
    data_team_email: Option<String>,
}

impl Settings {
    pub fn new<P: AsRef<Path>>(database_url: &str, watch_dir: P, archive_dir: P, duplicates_dir: P) -> Self {
        Self {
            database_url: database_url.into(),
            watch_dir: watch_dir.as_ref().into(),
            archive_dir: archive_dir.as_ref().into(),
            duplicates_dir: duplicates_dir.as_ref().into(),
            batch_size: DEFAULT_BATCH_SIZE,
            workers: num_cpus::get(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            db_timeout: Duration::from_secs(DEFAULT_DB_TIMEOUT_SECS),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            data_team_email: None,
        }
    }

    pub fn from_env() -> Result<Self, HopperError> {
        let mut settings = Settings::new(
            &require("DATABASE_URL")?,
            require("DIRECTORY_PATH")?,
            require("ARCHIVE_PATH")?,
            require("DUPLICATE_FILES_PATH")?);

        if let Some(raw) = lookup("BATCH_SIZE") {
            settings.batch_size = parse_env("BATCH_SIZE", &raw)?;
        }

        if let Some(raw) = lookup("WORKER_COUNT") {
            settings.workers = parse_env("WORKER_COUNT", &raw)?;
        }

        if let Some(raw) = lookup("POLL_INTERVAL_SECS") {
            settings.poll_interval = Duration::from_secs(parse_env("POLL_INTERVAL_SECS", &raw)?);
        }

        if let Some(raw) = lookup("DB_TIMEOUT_SECS") {
            settings.db_timeout = Duration::from_secs(parse_env("DB_TIMEOUT_SECS", &raw)?);
        }

        if let Some(raw) = lookup("DB_MAX_CONNECTIONS") {
            settings.max_connections = parse_env("DB_MAX_CONNECTIONS", &raw)?;
        }

        settings.data_team_email = lookup("DATA_TEAM_EMAIL");

        Ok(settings)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_db_timeout(mut self, timeout: Duration) -> Self {
        self.db_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_data_team_email(mut self, email: &str) -> Self {
        self.data_team_email = Some(email.into());
        self
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    pub fn duplicates_dir(&self) -> &Path {
        &self.duplicates_dir
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn db_timeout(&self) -> Duration {
        self.db_timeout
    }

    pub fn max_connections(&self) -> u32 {
        self.max_connections
    }

    pub fn data_team_email(&self) -> Option<&str> {
        self.data_team_email.as_deref()
    }
}

fn env_prefix() -> &'static str {
    match std::env::var("HOPPER_ENV").unwrap_or_default().to_lowercase().as_str() {
        "dev"  => "DEV_",
        "test" => "TEST_",
        "prod" => "PROD_",
        _      => "",
    }
}

fn lookup(name: &str) -> Option<String> {
    std::env::var(format!("{}{}", env_prefix(), name))
        .or_else(|_| std::env::var(name))
        .ok()
        .filter(|value| !value.is_empty())
}

fn require(name: &str) -> Result<String, HopperError> {
    lookup(name).ok_or(HopperError::MissingEnv { setting: name.into() })
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, HopperError> {
    raw.parse().map_err(|_| HopperError::InvalidEnv { setting: name.into(), value: raw.into() })
}
