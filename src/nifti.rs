use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, error, info};
use crate::config::NiftiConfig;
use crate::error::{EtlError, Result};
use crate::paths::nifti_stem;

/// Turns one DICOM series directory into one NIfTI file.
pub trait SeriesConverter {
    fn convert(&self, source_dir: &Path, destination: &Path) -> Result<()>;

    /// Whether the converter can run at all, checked once per sweep.
    fn is_available(&self) -> bool {
        true
    }
}

/// The external `dcm2niix` tool, writing gzipped output named after the destination file.
pub struct Dcm2niix {
    program: String,
    extra_args: Vec<String>,
}

impl Dcm2niix {
    pub fn new(program: impl Into<String>) -> Self {
        Dcm2niix {
            program: program.into(),
            extra_args: vec![],
        }
    }

    pub fn with_extra_args(mut self, extra_args: Vec<String>) -> Self {
        self.extra_args = extra_args;
        self
    }

    pub fn from_config(config: &NiftiConfig) -> Self {
        Self::new(config.converter.clone()).with_extra_args(config.extra_args.clone())
    }
}

impl SeriesConverter for Dcm2niix {
    fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("-h")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn convert(&self, source_dir: &Path, destination: &Path) -> Result<()> {
        let failure = |message: String| EtlError::Conversion {
            source_dir: source_dir.to_path_buf(),
            message,
        };
        let stem = nifti_stem(destination)
            .ok_or_else(|| failure(format!("{} is not a .nii.gz path", destination.display())))?;
        let output_dir = destination.parent()
            .ok_or_else(|| failure(format!("{} has no parent directory", destination.display())))?;

        let output = Command::new(&self.program)
            .args(["-z", "y"])
            .args(&self.extra_args)
            .arg("-f")
            .arg(&stem)
            .arg("-o")
            .arg(output_dir)
            .arg(source_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| failure(format!("cannot run {}: {}", self.program, err)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                String::from_utf8_lossy(&output.stdout).into_owned()
            } else {
                stderr.into_owned()
            };
            return Err(failure(format!("{} exited with {}: {}", self.program, output.status, message.trim())));
        }
        if !destination.exists() {
            return Err(failure(format!("{} produced no {}", self.program, destination.display())));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionSummary {
    pub converted: usize,
    pub skipped: usize,
    pub failed: Vec<PathBuf>,
}

impl ConversionSummary {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Converts every (series directory, destination) pair whose destination does not exist yet.
///
/// A failed pair is logged and does not stop the sweep. Half-written outputs are left in place.
/// When the converter is unavailable every pending pair fails without being attempted.
pub fn convert_all<'a>(converter: &dyn SeriesConverter,
                       pairs: impl IntoIterator<Item = (&'a Path, &'a Path)>) -> ConversionSummary {
    let mut summary = ConversionSummary::default();
    let mut available = None;
    for (source_dir, destination) in pairs {
        if destination.exists() {
            debug!("{} already converted", destination.display());
            summary.skipped += 1;
            continue;
        }
        if !*available.get_or_insert_with(|| converter.is_available()) {
            if summary.failed.is_empty() {
                error!("NIfTI converter is not available, no series will be converted");
            }
            summary.failed.push(source_dir.to_path_buf());
            continue;
        }
        match converter.convert(source_dir, destination) {
            Ok(()) => {
                info!("converted {} -> {}", source_dir.display(), destination.display());
                summary.converted += 1;
            }
            Err(err) => {
                error!("DICOM to NIfTI failed for series {}: {}", source_dir.display(), err);
                summary.failed.push(source_dir.to_path_buf());
            }
        }
    }
    summary
}
