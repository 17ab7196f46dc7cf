use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Sources file {path} not found")]
    SourcesFileNotFound { path: String, source: std::io::Error },

    #[error("Sources file {path} contains invalid configuration")]
    InvalidSources { path: String, source: serde_yaml::Error },

    #[error("Sources configuration is invalid - {reason}")]
    SourcesValidationError { reason: String },
}
