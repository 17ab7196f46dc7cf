use std::{path::Path, time::Instant};
use hopper_core::{formatted_duration_rate, blue, source::SourceConfig};
use crate::{audit, dlq, folders, merge, staging};
use crate::Context;
use crate::dlq::DlqWriter;
use crate::error::{ErrorKind, HopperError};
use crate::readers;
use crate::runlog::{self, LogRecorder, Phase};
use crate::staging::StageWriter;
use crate::validate::Validator;

enum Terminal {
    Success { processed: u64 },
    Duplicate,
}

///
/// Run one file end-to-end. Never returns an error - every terminal state is
/// absorbed here: the run-log row is finalised, the stage table is dropped,
/// the file is deleted or left in place, and exactly one notification goes
/// out for a failure. Nothing escapes to take a sibling pipeline down.
///
pub async fn process_file(ctx: &Context, path: &Path) {
    let filename = path.file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_default();

    let source = match ctx.registry().match_file(&filename) {
        Some(source) => source,
        None => {
            // Not discoverable - no source claims this file.
            log::warn!("No source pattern matches {} - leaving it in place", filename);
            return
        },
    };

    let started = Instant::now();
    log::info!("Processing {} for source {} into {}", filename, source.name(), source.table());

    let log = match LogRecorder::start(ctx.db(), &filename, source.name(), source.table()).await {
        Ok(log) => log,
        Err(err) => {
            log::error!("Unable to create a run log row for {}: {}", filename, err);
            ctx.notifier().internal_error(&filename, &err.to_string());
            return
        },
    };

    let mut stage: Option<String> = None;
    let result = run(ctx, source, path, &filename, &log, &mut stage).await;

    // The stage table never outlives its pipeline, success or failure.
    if let Some(stage) = stage {
        if let Err(err) = staging::drop_stage(ctx.db(), &stage).await {
            log::warn!("Unable to drop stage table {}: {}", stage, err);
        }
    }

    match result {
        Ok(Terminal::Success { processed }) => {
            if let Err(err) = folders::delete_file(path) {
                log::warn!("{} was loaded but could not be removed from the watch folder: {}", filename, err);
            }

            if let Err(err) = log.finalize(runlog::STATUS_SUCCESS, None).await {
                log::warn!("Unable to finalise the run log for {}: {}", filename, err);
            }

            let (duration, rate) = formatted_duration_rate(processed.max(1) as usize, started.elapsed());
            log::info!("Loaded {} - {} records in {} ({}/record)", filename, processed, blue(&duration), rate);
        },

        Ok(Terminal::Duplicate) => {
            if let Err(err) = log.finalize(runlog::STATUS_DUPLICATE, None).await {
                log::warn!("Unable to finalise the run log for {}: {}", filename, err);
            }

            let message = format!("{} has already been loaded into {} - moved to the duplicates folder", filename, source.table());
            log::warn!("{}", message);
            ctx.notifier().file_problem(&filename, ErrorKind::DuplicateFile, &message, source.notify());
        },

        Err(err) => {
            let kind = err.kind();

            if let Err(log_err) = log.finalize(runlog::STATUS_FAILED, Some((kind.as_str(), err.to_string()))).await {
                log::warn!("Unable to finalise the run log for {}: {}", filename, log_err);
            }

            log::error!("{} failed [{}]: {}", filename, kind.as_str(), err);

            // Cancellation is operator-driven - no alert needed.
            if kind == ErrorKind::Cancelled {
                return
            }

            match kind.business() {
                true  => ctx.notifier().file_problem(&filename, kind, &err.to_string(), source.notify()),
                false => ctx.notifier().internal_error(&filename, &err.to_string()),
            }
        },
    }
}

///
/// The state machine proper:
///
/// DEDUPE_CHECK -> ARCHIVE_COPY -> READER_OPEN -> HEADER_VALIDATE
///   -> STREAM (validate -> stage | dlq) -> STAGE_COMMIT
///   -> GRAIN_AUDIT -> USER_AUDIT -> MERGE -> DLQ_CLEANUP
///
/// The caller performs STAGE_DROP (always) and FILE_DELETE (success only).
///
async fn run(
    ctx: &Context,
    source: &SourceConfig,
    path: &Path,
    filename: &str,
    log: &LogRecorder<'_>,
    stage_out: &mut Option<String>) -> Result<Terminal, HopperError> {

    if ctx.cancelled() {
        return Err(HopperError::Cancelled)
    }

    // DEDUPE_CHECK - before the database or filesystem is touched.
    if merge::already_loaded(ctx.db(), source.table(), filename).await? {
        folders::move_to_duplicates(path, ctx.settings().duplicates_dir())?;
        return Ok(Terminal::Duplicate)
    }

    // ARCHIVE_COPY - nothing may mutate until the recovery copy exists.
    log.phase_started(Phase::Archive).await?;
    let archived = folders::archive_copy(path, ctx.settings().archive_dir())?;
    log.phase_ended(Phase::Archive).await?;
    log::debug!("Archived {} to {:?}", filename, archived);

    // READER_OPEN and HEADER_VALIDATE.
    let mut reader = readers::open_reader(path, source)?;
    readers::validate_header(path, source, reader.headers())?;

    // STREAM - validated records into the stage, failures into the DLQ.
    log.phase_started(Phase::Processing).await?;

    let stage_name = folders::stage_table_name(filename, ctx.db().dialect().max_identifier_len());
    let mut writer = StageWriter::create(ctx.db(), source, stage_name.clone(), filename.to_string(),
        ctx.settings().batch_size()).await?;
    *stage_out = Some(stage_name.clone());

    let mut dead_letters = DlqWriter::new(ctx.db(), log.id().to_string(), source.table().to_string(),
        ctx.settings().batch_size());
    let validator = Validator::new(source);

    let mut processed: u64 = 0;
    let mut errors: u64 = 0;

    while let Some(item) = reader.next_record() {
        if ctx.cancelled() {
            return Err(HopperError::Cancelled)
        }

        let raw = item?;
        processed += 1;

        match validator.validate(&raw) {
            Ok(values) => writer.push(&values, raw.row_number).await?,
            Err(row_errors) => {
                errors += 1;
                dead_letters.push(dlq::entry(source, &raw, row_errors, filename)).await?;
            },
        }
    }

    log.phase_ended(Phase::Processing).await?;
    log.processed(processed, errors).await?;

    // Dead letters are evidence - they persist even when the threshold kills
    // the file, so flush them before the verdict.
    dead_letters.commit().await?;

    let threshold = source.error_threshold();
    if processed > 0 && errors as f64 / processed as f64 > threshold {
        return Err(HopperError::ThresholdExceeded { filename: filename.to_string(), errors, processed, threshold })
    }

    // STAGE_COMMIT.
    log.phase_started(Phase::Staging).await?;
    let staged = writer.commit().await?;
    log.phase_ended(Phase::Staging).await?;
    log.staged(staged).await?;

    if ctx.cancelled() {
        return Err(HopperError::Cancelled)
    }

    // GRAIN_AUDIT then USER_AUDIT - the second never runs if the first fails.
    log.phase_started(Phase::Audit).await?;
    audit::check_grain(ctx.db(), &stage_name, source.grain()).await?;
    if let Some(template) = source.audit() {
        audit::run_user_audit(ctx.db(), &stage_name, template).await?;
    }
    log.phase_ended(Phase::Audit).await?;
    log.audit_passed().await?;

    if ctx.cancelled() {
        return Err(HopperError::Cancelled)
    }

    // MERGE - write-audit-publish completes here.
    log.phase_started(Phase::Merge).await?;
    let counts = merge::merge(ctx.db(), source, &stage_name).await?;
    log.phase_ended(Phase::Merge).await?;
    log.merged(counts.inserted, counts.updated).await?;

    log::info!("Merged {} into {} - {} inserted, {} updated",
        filename, source.table(), counts.inserted, counts.updated);

    // DLQ_CLEANUP - this run supersedes any earlier attempt at the same file.
    let purged = dlq::purge_previous(ctx.db(), filename, log.id(), ctx.settings().batch_size()).await?;
    if purged > 0 {
        log::info!("Purged {} dead-letter rows from previous runs of {}", purged, filename);
    }

    Ok(Terminal::Success { processed })
}
