use std::path::PathBuf;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use dicom_etl::audit;
use dicom_etl::pipeline::{self, Pipeline, METADATA_FILE};
use dicom_etl::PipelineConfig;

#[derive(Parser, Debug)]
#[command(name = "dicom-etl")]
#[command(about = "Extracts DICOM series metadata, converts series to NIfTI and exports anonymized reports")]
struct Cli {
    /// Log filter, e.g. `info` or `dicom_etl=debug`
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Full pipeline: metadata, output tree, reports and NIfTI conversion
    Run {
        /// Path where DICOM files are stored ({study}/{series}/*.dcm)
        #[arg(short, long)]
        input_directory: PathBuf,

        /// Path where metadata, NIfTI images and reports are going to be stored
        #[arg(short, long)]
        output_directory: PathBuf,

        /// Configuration file (TOML, YAML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// CSV export of the report table, used instead of the database
        #[arg(long)]
        reports_csv: Option<PathBuf>,

        #[arg(long)]
        skip_reports: bool,

        #[arg(long)]
        skip_nifti: bool,
    },
    /// Metadata CSV only
    Metadata {
        #[arg(short, long)]
        input_directory: PathBuf,

        /// CSV file the metadata is written to
        #[arg(short, long)]
        output_file: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Lists NIfTI files without metadata rows and empty study folders
    Audit {
        #[arg(short, long)]
        output_directory: PathBuf,

        /// Defaults to metadata.csv inside the output directory
        #[arg(short, long)]
        metadata_file: Option<PathBuf>,

        /// DICOM tree to re-read for NIfTI files without metadata; their rows are appended
        #[arg(long)]
        repair_from: Option<PathBuf>,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&cli.log_level))
        .init();

    match cli.command {
        Command::Run { input_directory, output_directory, config, reports_csv, skip_reports, skip_nifti } => {
            let mut config = PipelineConfig::load(config.as_deref())
                .context("cannot load configuration")?;
            if reports_csv.is_some() {
                config.reports.csv = reports_csv;
            }
            if skip_nifti {
                config.nifti.enabled = false;
            }
            let mut etl = Pipeline::new(config);
            if skip_reports {
                etl = etl.with_report_source(None);
            }

            let report = etl.run(&input_directory, &output_directory).await?;
            if report.success() {
                info!("pipeline finished: {} series", report.series);
            } else {
                error!("pipeline finished with errors, check the log");
                std::process::exit(1);
            }
        }
        Command::Metadata { input_directory, output_file, config } => {
            let config = PipelineConfig::load(config.as_deref())
                .context("cannot load configuration")?;
            let rows = pipeline::write_metadata(&input_directory, &output_file, &config.pseudonym.salt)?;
            info!("{} series written to {}", rows, output_file.display());
        }
        Command::Audit { output_directory, metadata_file, repair_from, config } => {
            if !output_directory.is_dir() {
                bail!("output directory {} does not exist", output_directory.display());
            }
            let metadata_file = metadata_file.unwrap_or_else(|| output_directory.join(METADATA_FILE));
            if let Some(input_directory) = repair_from {
                let config = PipelineConfig::load(config.as_deref())
                    .context("cannot load configuration")?;
                let rows = audit::repair_missing_metadata(&input_directory, &output_directory,
                                                          &metadata_file, &config.pseudonym.salt)?;
                info!("{} metadata rows recovered", rows);
            }
            for entry in audit::nifti_files_missing_metadata(&output_directory, &metadata_file)? {
                warn!("no metadata for {} (visit {})",
                      entry.path.display(), entry.date_id.as_deref().unwrap_or("unknown"));
            }
            for entry in audit::empty_study_folders(&output_directory)? {
                warn!("empty study folder {} (visit {})",
                      entry.path.display(), entry.date_id.as_deref().unwrap_or("unknown"));
            }
        }
    }
    Ok(())
}
