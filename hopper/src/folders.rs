use chrono::Utc;
use crate::{config::Settings, error::HopperError, readers};
use std::{fs, path::{Path, PathBuf}};

///
/// Ensure the folders exist to process files for this engine.
///
pub fn ensure_dirs_exist(settings: &Settings) -> Result<(), HopperError> {
    let folders = vec!(
        settings.watch_dir(),
        settings.archive_dir(),
        settings.duplicates_dir());

    for folder in folders {
        log::debug!("Creating folder {}", folder.to_canonical_string());
        fs::create_dir_all(folder)
            .map_err(|source| HopperError::CannotCreateDir { source, path: folder.to_canonical_string() })?;
    }

    Ok(())
}

///
/// Return all the files in the watch folder with a supported extension.
///
pub fn files_in_watch(settings: &Settings) -> Result<Vec<PathBuf>, HopperError> {
    let mut files = vec!();
    for entry in settings.watch_dir().read_dir()? {
        if let Ok(entry) = entry {
            let is_file = entry.metadata().map(|meta| meta.is_file()).unwrap_or(false);
            if is_file && readers::file_format(&entry.file_name().to_string_lossy()).is_some() {
                files.push(entry.path());
            }
        }
    }

    // Return files sorted by filename - for consistent behaviour.
    files.sort();

    Ok(files)
}

///
/// Copy the source file into the archive folder before anything else can touch it. e.g.
///
/// invoices.csv -> archive/invoices.csv.20211229_113200000
///
pub fn archive_copy(file: &Path, archive_dir: &Path) -> Result<PathBuf, HopperError> {
    let filename = file.file_name().expect("filename missing from watched file").to_string_lossy();
    let destination = archive_dir.join(format!("{}.{}", filename, new_timestamp()));

    log::debug!("Archiving {:?} to {:?}", file, destination);

    fs::copy(file, &destination)
        .map_err(|source| HopperError::CannotCopyFile { path: file.to_canonical_string(), destination: destination.to_canonical_string(), source })?;

    Ok(destination)
}

///
/// Move a short-circuited file into the duplicates folder.
///
pub fn move_to_duplicates(file: &Path, duplicates_dir: &Path) -> Result<PathBuf, HopperError> {
    let filename = file.file_name().expect("filename missing from watched file").to_string_lossy().to_string();
    let destination = duplicates_dir.join(filename);

    log::debug!("Moving {:?} to {:?}", file, destination);

    fs::rename(file, &destination)
        .map_err(|source| HopperError::CannotMoveFile { path: file.to_canonical_string(), destination: destination.to_canonical_string(), source })?;

    Ok(destination)
}

///
/// Remove a fully-loaded file from the watch folder.
///
pub fn delete_file(file: &Path) -> Result<(), HopperError> {
    fs::remove_file(file)
        .map_err(|source| HopperError::CannotRemoveFile { path: file.to_canonical_string(), source })
}

///
/// Return a new timestamp in the file suffix format.
///
pub fn new_timestamp() -> String {

    // This behaviour can be overriden by the tests.
    if let Ok(ts) = std::env::var("HOPPER_FIXED_TS") {
        return ts
    }

    Utc::now().format("%Y%m%d_%H%M%S%3f").to_string()
}

///
/// The stage table name for a file. Anything outside [A-Za-z0-9_] becomes an
/// underscore and the result is clipped to the dialect's identifier limit. e.g.
///
/// widgets-2022.csv -> stage_widgets_2022_csv
///
pub fn stage_table_name(filename: &str, max_len: usize) -> String {
    let sanitised: String = filename
        .chars()
        .map(|c| match c.is_ascii_alphanumeric() || c == '_' {
            true  => c.to_ascii_lowercase(),
            false => '_',
        })
        .collect();

    format!("stage_{}", sanitised).chars().take(max_len).collect()
}

///
/// Returns a canonicalised path if possible, otherwise just the debug output.
///
pub trait ToCanonicalString: std::fmt::Debug {
    fn to_canonical_string(&self) -> String;
}

impl ToCanonicalString for Path {
    fn to_canonical_string(&self) -> String {
        match self.canonicalize() {
            Ok(path) => path.to_string_lossy().into(),
            Err(_) => self.to_string_lossy().into(),
        }
    }
}
