//! DICOM archive preprocessing: per-series metadata to CSV, DICOM series to
//! NIfTI, and anonymized radiology reports pulled from the report database.

pub mod audit;
pub mod config;
pub mod db_access;
pub mod dicom_data;
pub mod error;
pub mod file_ops;
pub mod nifti;
pub mod paths;
pub mod pipeline;
pub mod reader;
pub mod report_table;
pub mod reports;
pub mod rtf;
pub mod table;

#[cfg(test)]
mod test_support;

pub use config::PipelineConfig;
pub use error::{EtlError, Result};
pub use pipeline::{Pipeline, PipelineReport};
pub use reader::{DicomReader, SeriesRecord};
pub use table::MetadataTable;
