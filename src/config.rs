//! Pipeline configuration: an optional file layered under `DICOM_ETL_*` environment variables.

use std::fmt;
use std::path::{Path, PathBuf};
use config::{Config, Environment, File};
use serde::Deserialize;
use crate::error::Result;

pub const ENV_PREFIX: &str = "DICOM_ETL";

/// Connection parameters of the report database.
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    /// Log every query before running it.
    #[serde(default)]
    pub verbose: bool,
}

fn default_port() -> u16 {
    5432
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
         .field("host", &self.host)
         .field("port", &self.port)
         .field("name", &self.name)
         .field("user", &self.user)
         .field("password", &"***")
         .field("verbose", &self.verbose)
         .finish()
    }
}

/// Where reports live and how they are fetched.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportsConfig {
    pub table: String,
    pub id_column: String,
    pub body_column: String,
    pub number_column: String,
    pub batch_size: usize,
    /// CSV export of the report table, queried instead of the database.
    pub csv: Option<PathBuf>,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        ReportsConfig {
            table: "citas_informes".to_string(),
            id_column: "idcita".to_string(),
            body_column: "informertf".to_string(),
            number_column: "numero".to_string(),
            batch_size: 1000,
            csv: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NiftiConfig {
    pub enabled: bool,
    pub converter: String,
    pub extra_args: Vec<String>,
}

impl Default for NiftiConfig {
    fn default() -> Self {
        NiftiConfig {
            enabled: true,
            converter: "dcm2niix".to_string(),
            extra_args: vec![],
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PseudonymConfig {
    pub salt: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub reports: ReportsConfig,
    #[serde(default)]
    pub nifti: NiftiConfig,
    #[serde(default)]
    pub pseudonym: PseudonymConfig,
}

impl PipelineConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX)
                            .prefix_separator("_")
                            .separator("__")
                            .try_parsing(true))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert!(config.database.is_none());
        assert_eq!(config.reports.batch_size, 1000);
        assert_eq!(config.reports.table, "citas_informes");
        assert!(config.nifti.enabled);
        assert_eq!(config.nifti.converter, "dcm2niix");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etl.toml");
        std::fs::write(&path, r#"
[database]
host = "reports.local"
name = "ris"
user = "reader"
password = "secret"

[reports]
batch_size = 250

[nifti]
extra_args = ["-b", "n"]

[pseudonym]
salt = "pepper"
"#).unwrap();

        let config = PipelineConfig::load(Some(&path)).unwrap();
        let database = config.database.unwrap();
        assert_eq!(database.host, "reports.local");
        assert_eq!(database.port, 5432);
        assert!(!database.verbose);
        assert!(!format!("{:?}", database).contains("secret"));
        assert_eq!(config.reports.batch_size, 250);
        assert_eq!(config.reports.id_column, "idcita");
        assert_eq!(config.nifti.extra_args, vec!["-b", "n"]);
        assert_eq!(config.pseudonym.salt, "pepper");
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etl.toml");
        std::fs::write(&path, "[nifti]\nconverter = \"dcm2niix\"\n").unwrap();
        std::env::set_var("DICOM_ETL_NIFTI__CONVERTER", "/opt/mricrogl/dcm2niix");

        let config = PipelineConfig::load(Some(&path));
        std::env::remove_var("DICOM_ETL_NIFTI__CONVERTER");
        assert_eq!(config.unwrap().nifti.converter, "/opt/mricrogl/dcm2niix");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PipelineConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
