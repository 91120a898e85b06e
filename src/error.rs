use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot read DICOM file {}: {message}", .path.display())]
    Dicom { path: PathBuf, message: String },

    #[error("polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("datafusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("malformed RTF at character {offset}: {message}")]
    Rtf { offset: usize, message: String },

    #[error("conversion of {} failed: {message}", .source_dir.display())]
    Conversion { source_dir: PathBuf, message: String },

    #[error("directory does not exist: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, EtlError>;
