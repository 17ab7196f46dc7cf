use thiserror::Error;

#[derive(Error, Debug)]
pub enum HopperError {

    #[error("{path} has an unsupported file format")]
    UnsupportedFormat { path: String },

    #[error("{path} is a {actual} file but source {source_name} is configured as {expected}")]
    ReaderMismatch { path: String, source_name: String, expected: String, actual: String },

    #[error("{path} has no usable header row")]
    MissingHeader { path: String },

    #[error("{path} is missing required columns: {columns}")]
    MissingColumns { path: String, columns: String },

    #[error("{filename} breached its validation threshold - {errors} errors in {processed} records exceeds {threshold}")]
    ThresholdExceeded { filename: String, errors: u64, processed: u64, threshold: f64 },

    #[error("stage table {table} contains {count} duplicated grain keys")]
    GrainDuplicates { table: String, count: i64 },

    #[error("audit failed for {table} - failing checks: {columns}")]
    AuditFailed { table: String, columns: String },

    #[error("audit query for {table} must return exactly one row but returned {rows}")]
    AuditShape { table: String, rows: usize },

    #[error("{filename} has already been loaded into {table}")]
    DuplicateFile { filename: String, table: String },

    #[error("database error during {context}")]
    DbTransient { context: String, source: sqlx::Error },

    #[error("database error during {context}")]
    DbFatal { context: String, source: sqlx::Error },

    #[error("job cancelled by shutdown signal")]
    Cancelled,

    #[error("Unable to create directory {path}")]
    CannotCreateDir { path: String, source: std::io::Error },

    #[error("Unable to open file {path}")]
    CannotOpenFile { path: String, source: std::io::Error },

    #[error("Unable to copy {path} to {destination}")]
    CannotCopyFile { path: String, destination: String, source: std::io::Error },

    #[error("Unable to move file from {path} to {destination}")]
    CannotMoveFile { path: String, destination: String, source: std::io::Error },

    #[error("Unable to remove file {path}")]
    CannotRemoveFile { path: String, source: std::io::Error },

    #[error("{path} is not valid JSON")]
    CannotParseJson { path: String, source: serde_json::Error },

    #[error("{path} does not contain an array at {selector}")]
    JsonSelectorNotArray { path: String, selector: String },

    #[error("Unable to open workbook {path}")]
    CannotOpenWorkbook { path: String, source: calamine::Error },

    #[error("workbook {path} has no sheet named {sheet}")]
    MissingSheet { path: String, sheet: String },

    #[error("{label} is not a recognised character encoding")]
    UnknownEncoding { label: String },

    #[error("{setting} is not set in the environment")]
    MissingEnv { setting: String },

    #[error("{setting} has an invalid value: {value}")]
    InvalidEnv { setting: String, value: String },

    #[error("connection URL scheme is not a supported database dialect")]
    UnsupportedDatabaseUrl,

    #[error("Sources failed to load")]
    SourcesLoadError ( #[from] hopper_core::error::Error ),

    #[error(transparent)]
    CSVError(#[from] csv::Error),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    GeneralError(#[from] anyhow::Error),
}

///
/// The failure taxonomy used for run-log rows and notification routing.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    UnsupportedFormat,
    MissingHeader,
    MissingColumns,
    ThresholdExceeded,
    GrainDuplicates,
    AuditFailed,
    DuplicateFile,
    DbTransient,
    DbFatal,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorKind::UnsupportedFormat => "unsupported-format",
            ErrorKind::MissingHeader     => "missing-header",
            ErrorKind::MissingColumns    => "missing-columns",
            ErrorKind::ThresholdExceeded => "threshold-exceeded",
            ErrorKind::GrainDuplicates   => "grain-duplicates",
            ErrorKind::AuditFailed       => "audit-failed",
            ErrorKind::DuplicateFile     => "duplicate-file",
            ErrorKind::DbTransient       => "db-transient",
            ErrorKind::DbFatal           => "db-fatal",
            ErrorKind::Cancelled         => "cancelled",
            ErrorKind::Internal          => "internal-error",
        }
    }

    ///
    /// True for problems with the data itself - these go to the source's own
    /// recipients rather than the internal channel.
    ///
    pub fn business(&self) -> bool {
        matches!(self,
            ErrorKind::MissingHeader
            | ErrorKind::MissingColumns
            | ErrorKind::ThresholdExceeded
            | ErrorKind::GrainDuplicates
            | ErrorKind::AuditFailed
            | ErrorKind::DuplicateFile)
    }
}

impl HopperError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HopperError::UnsupportedFormat { .. }
            | HopperError::ReaderMismatch { .. }    => ErrorKind::UnsupportedFormat,
            HopperError::MissingHeader { .. }
            | HopperError::MissingSheet { .. }      => ErrorKind::MissingHeader,
            HopperError::MissingColumns { .. }      => ErrorKind::MissingColumns,
            HopperError::ThresholdExceeded { .. }   => ErrorKind::ThresholdExceeded,
            HopperError::GrainDuplicates { .. }     => ErrorKind::GrainDuplicates,
            HopperError::AuditFailed { .. }
            | HopperError::AuditShape { .. }        => ErrorKind::AuditFailed,
            HopperError::DuplicateFile { .. }       => ErrorKind::DuplicateFile,
            HopperError::DbTransient { .. }         => ErrorKind::DbTransient,
            HopperError::DbFatal { .. }             => ErrorKind::DbFatal,
            HopperError::Cancelled                  => ErrorKind::Cancelled,
            _                                       => ErrorKind::Internal,
        }
    }
}
