pub mod audit;
pub mod config;
pub mod db;
pub mod dlq;
pub mod error;
pub mod folders;
pub mod merge;
pub mod notify;
pub mod pipeline;
pub mod readers;
pub mod runlog;
pub mod scheduler;
pub mod staging;
pub mod validate;

use std::{path::Path, str::FromStr, sync::Arc, time::Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use hopper_core::registry::Registry;
use crate::config::Settings;
use crate::db::Db;
use crate::error::HopperError;
use crate::notify::{LogNotifier, Notifier};

///
/// Created once per process. Used to pass the main top-level job 'things' around.
///
/// Everything in here is read-only once the engine is running - the pipelines
/// own their per-file mutable state themselves.
///
pub struct Context {
    started: Instant,        // When the engine started.
    job_id: Uuid,            // Each engine run is given a unique id.
    registry: Registry,      // The named sources and their row-models.
    settings: Settings,      // Folder paths, batch size, worker count.
    db: Db,                  // The pooled database capability.
    notifier: Box<dyn Notifier>,
    cancel: CancellationToken,
}

impl Context {
    pub fn new(registry: Registry, settings: Settings, db: Db, notifier: Box<dyn Notifier>, cancel: CancellationToken) -> Self {
        let job_id = match std::env::var("HOPPER_FIXED_JOB_ID") {
            Ok(job_id) => Uuid::from_str(&job_id).expect("Test JOB_ID has invalid format"),
            Err(_) => Uuid::new_v4(),
        };

        Self {
            started: Instant::now(),
            job_id,
            registry,
            settings,
            db,
            notifier,
            cancel,
        }
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn job_id(&self) -> &Uuid {
        &self.job_id
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

///
/// Load the sources, connect the database, bootstrap the folders and schema,
/// then run the scheduler - a single pass with `once`, otherwise the poll
/// loop until the cancellation token fires.
///
pub async fn run(sources_path: &str, settings: Settings, once: bool, cancel: CancellationToken) -> Result<(), HopperError> {
    let registry = Registry::load(Path::new(sources_path))?;

    folders::ensure_dirs_exist(&settings)?;

    let db = Db::connect(settings.database_url(), settings.max_connections(), settings.db_timeout()).await?;
    db::ensure_schema(&db, &registry).await?;

    let notifier = Box::new(LogNotifier::new(settings.data_team_email().map(String::from)));
    let ctx = Arc::new(Context::new(registry, settings, db, notifier, cancel));

    log::info!("Starting hopper:");
    log::info!("    Job ID: {}", ctx.job_id());
    log::info!("   Sources: {} ({} defined)", sources_path, ctx.registry().sources().len());
    log::info!("   Dialect: {}", ctx.db().dialect().name());
    log::info!("     Watch: {:?}", ctx.settings().watch_dir());
    log::info!("   Archive: {:?}", ctx.settings().archive_dir());
    log::info!("   Workers: {}", ctx.settings().workers());

    match once {
        true => {
            let finished = scheduler::run_once(&ctx).await?;
            log::info!("Single scan complete - {} files processed", finished);
        },
        false => scheduler::watch(&ctx).await?,
    }

    Ok(())
}
