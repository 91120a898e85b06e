use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use crate::config::PipelineConfig;
use crate::db_access::{DatabaseAccess, QueryRunner};
use crate::error::{EtlError, Result};
use crate::file_ops;
use crate::nifti::{convert_all, ConversionSummary, Dcm2niix, SeriesConverter};
use crate::paths::assign_output_paths;
use crate::reader::DicomReader;
use crate::report_table::CsvReportTable;
use crate::reports::{extract_reports, ReportSummary};
use crate::table::MetadataTable;

pub const METADATA_FILE: &str = "metadata.csv";

/// Outcome of every stage of one run. A stage that did not run is `None`.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub series: usize,
    pub metadata_written: bool,
    pub directories_created: bool,
    pub reports: Option<ReportSummary>,
    pub nifti: Option<ConversionSummary>,
}

impl PipelineReport {
    pub fn success(&self) -> bool {
        self.metadata_written
            && self.directories_created
            && self.reports.as_ref().map_or(true, |r| r.success())
            && self.nifti.as_ref().map_or(true, |n| n.success())
    }
}

fn ensure_directory(path: &Path) -> Result<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(EtlError::MissingDirectory(path.to_path_buf()))
    }
}

/// Reads every series below `input_dir` and derives its output paths under `output_dir`.
pub fn extract_metadata(input_dir: impl AsRef<Path>, output_dir: impl AsRef<Path>, salt: &str) -> MetadataTable {
    let reader = DicomReader::new(input_dir.as_ref());
    info!("reading {} series directories under {}",
          reader.series_directories().len(), input_dir.as_ref().display());
    let mut table = MetadataTable::new(reader.read_all());
    assign_output_paths(table.records_mut(), output_dir, salt);
    table
}

/// The report source named by the configuration: a CSV export when one is set,
/// otherwise the database, otherwise none.
pub fn report_source_from_config(config: &PipelineConfig) -> Option<Box<dyn QueryRunner>> {
    if let Some(csv) = &config.reports.csv {
        return Some(Box::new(CsvReportTable::new(csv, &config.reports.table)));
    }
    config.database
          .clone()
          .map(|database| Box::new(DatabaseAccess::new(database)) as Box<dyn QueryRunner>)
}

pub struct Pipeline {
    config: PipelineConfig,
    report_source: Option<Box<dyn QueryRunner>>,
    converter: Option<Box<dyn SeriesConverter>>,
}

impl Pipeline {
    /// Pipeline with the collaborators the configuration describes.
    pub fn new(config: PipelineConfig) -> Self {
        let report_source = report_source_from_config(&config);
        let converter: Option<Box<dyn SeriesConverter>> = if config.nifti.enabled {
            Some(Box::new(Dcm2niix::from_config(&config.nifti)))
        } else {
            None
        };
        Pipeline { config, report_source, converter }
    }

    pub fn with_report_source(mut self, report_source: Option<Box<dyn QueryRunner>>) -> Self {
        self.report_source = report_source;
        self
    }

    pub fn with_converter(mut self, converter: Option<Box<dyn SeriesConverter>>) -> Self {
        self.converter = converter;
        self
    }

    /// Runs every stage in order. Only missing input or output roots abort the run;
    /// stage failures are logged and recorded in the returned report.
    pub async fn run(&self, input_dir: impl AsRef<Path>, output_dir: impl AsRef<Path>) -> Result<PipelineReport> {
        let input_dir = input_dir.as_ref();
        let output_dir = output_dir.as_ref();
        ensure_directory(input_dir)?;
        ensure_directory(output_dir)?;
        let mut report = PipelineReport::default();

        let table = extract_metadata(input_dir, output_dir, &self.config.pseudonym.salt);
        report.series = table.len();
        info!("{} series with DICOM files", table.len());

        let metadata_file = output_dir.join(METADATA_FILE);
        report.metadata_written = match table.write_csv(&metadata_file) {
            Ok(()) => {
                info!("metadata written to {}", metadata_file.display());
                true
            }
            Err(err) => {
                error!("cannot write {}: {}", metadata_file.display(), err);
                false
            }
        };

        let outputs: Vec<&Path> = table.records()
                                       .iter()
                                       .flat_map(|r| [r.nifti_path.as_deref(), r.form_path.as_deref()])
                                       .flatten()
                                       .collect();
        report.directories_created = file_ops::create_parent_directories(outputs);
        if !report.directories_created {
            error!("some output directories could not be created");
        }

        match &self.report_source {
            Some(report_source) => {
                let summary = extract_reports(&table, report_source.as_ref(), &self.config.reports).await;
                if summary.success() {
                    info!("reports: {} written, {} already present", summary.written, summary.skipped);
                } else {
                    error!("reports: {} failed, check the log", summary.failed.len());
                }
                report.reports = Some(summary);
            }
            None => warn!("no report source configured, reports not extracted"),
        }

        if let Some(converter) = &self.converter {
            let pairs: Vec<(&Path, &Path)> = table.records()
                                                  .iter()
                                                  .filter_map(|r| Some((r.series_dir.as_path(), r.nifti_path.as_deref()?)))
                                                  .collect();
            let summary = convert_all(converter.as_ref(), pairs);
            if summary.success() {
                info!("NIfTI conversion done: {} converted, {} already present", summary.converted, summary.skipped);
            } else {
                error!("error while converting to NIfTI: {} series failed, check the log", summary.failed.len());
            }
            report.nifti = Some(summary);
        }

        Ok(report)
    }
}

/// Metadata only: reads `input_dir` and writes the table to `output_file`.
/// Output paths are derived relative to the directory holding `output_file`.
pub fn write_metadata(input_dir: impl AsRef<Path>, output_file: impl AsRef<Path>, salt: &str) -> Result<usize> {
    let input_dir = input_dir.as_ref();
    let output_file = output_file.as_ref();
    ensure_directory(input_dir)?;
    if output_file.extension().and_then(|e| e.to_str()) != Some("csv") {
        return Err(EtlError::InvalidArgument(format!("{} should have extension csv", output_file.display())));
    }
    let output_root: PathBuf = output_file.parent().map(Path::to_path_buf).unwrap_or_default();
    let table = extract_metadata(input_dir, &output_root, salt);
    table.write_csv(output_file)?;
    Ok(table.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_roots_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(PipelineConfig::default());
        let missing = dir.path().join("missing");

        let result = pipeline.run(&missing, dir.path()).await;
        assert!(matches!(result, Err(EtlError::MissingDirectory(p)) if p == missing));
        let result = pipeline.run(dir.path(), &missing).await;
        assert!(matches!(result, Err(EtlError::MissingDirectory(_))));
    }

    #[test]
    fn test_report_source_selection() {
        let mut config = PipelineConfig::default();
        assert!(report_source_from_config(&config).is_none());
        config.reports.csv = Some(PathBuf::from("/exports/citas_informes.csv"));
        assert!(report_source_from_config(&config).is_some());
    }

    #[test]
    fn test_write_metadata_requires_csv_extension() {
        let dir = tempfile::tempdir().unwrap();
        let result = write_metadata(dir.path(), dir.path().join("metadata.xlsx"), "");
        assert!(matches!(result, Err(EtlError::InvalidArgument(_))));
        assert_eq!(write_metadata(dir.path(), dir.path().join("metadata.csv"), "").unwrap(), 0);
    }
}
