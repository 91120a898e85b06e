//! Canonical locations of the pipeline outputs.
//!
//! ```text
//! {root}/{patient}/{YYYY-MM-DD}/{studyUID}/{seriesUID}.nii.gz
//! {root}/{patient}/{YYYY-MM-DD}/Report/{visitId}.txt
//! ```

use std::path::{Path, PathBuf};
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use tracing::warn;
use crate::reader::SeriesRecord;

pub const NIFTI_SUFFIX: &str = ".nii.gz";
pub const REPORT_DIR: &str = "Report";
pub const REPORT_EXTENSION: &str = "txt";

/// Stable pseudonym for a patient id: the first 8 bytes of `SHA-256(salt || id)` in hex.
pub fn patient_pseudonym(salt: &str, patient_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(patient_id.as_bytes());
    hasher.finalize()[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

fn study_dir(root: &Path, patient: &str, date: NaiveDate) -> PathBuf {
    root.join(patient).join(date.format("%Y-%m-%d").to_string())
}

/// Whether a tag value can be used as one path component below the output root.
pub fn is_safe_component(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\', '\0'])
}

/// `None` when a UID is not a single safe path component.
pub fn nifti_path(root: impl AsRef<Path>,
                  patient: &str,
                  date: NaiveDate,
                  study_uid: &str,
                  series_uid: &str) -> Option<PathBuf> {
    if ![patient, study_uid, series_uid].iter().all(|c| is_safe_component(c)) {
        return None;
    }
    Some(study_dir(root.as_ref(), patient, date)
        .join(study_uid)
        .join(format!("{}{}", series_uid, NIFTI_SUFFIX)))
}

/// `None` when the visit id is not a single safe path component.
pub fn report_path(root: impl AsRef<Path>,
                   patient: &str,
                   date: NaiveDate,
                   visit_id: &str) -> Option<PathBuf> {
    if !is_safe_component(patient) || !is_safe_component(visit_id) {
        return None;
    }
    Some(study_dir(root.as_ref(), patient, date)
        .join(REPORT_DIR)
        .join(format!("{}.{}", visit_id, REPORT_EXTENSION)))
}

/// File name of a NIfTI output without its `.nii.gz` suffix.
pub fn nifti_stem(path: impl AsRef<Path>) -> Option<String> {
    let name = path.as_ref().file_name()?.to_str()?;
    name.strip_suffix(NIFTI_SUFFIX).map(|stem| stem.to_string())
}

/// Fills the derived columns of every record.
///
/// A record that lacks any component of a path keeps that path unset and is
/// skipped by the stages that need it.
pub fn assign_output_paths(records: &mut [SeriesRecord], root: impl AsRef<Path>, salt: &str) {
    let root = root.as_ref();
    for record in records.iter_mut() {
        record.patient_id = record.text("OriginalPatientId")
                                  .map(|id| patient_pseudonym(salt, id));
        record.date_id = record.text("AccessionNumber").map(|id| id.to_string());

        let (Some(patient), Some(date)) = (record.patient_id.clone(), record.study_date()) else {
            warn!("{}: no patient id or study date, output paths left empty", record.series_dir.display());
            continue;
        };
        record.nifti_path = match (record.text("StudyInstanceUID"), record.text("SeriesInstanceUID")) {
            (Some(study_uid), Some(series_uid)) => {
                let path = nifti_path(root, &patient, date, study_uid, series_uid);
                if path.is_none() {
                    warn!("{}: unusable UID {:?} / {:?}, no NIfTI path",
                          record.series_dir.display(), study_uid, series_uid);
                }
                path
            }
            _ => None,
        };
        record.form_path = match record.date_id.as_deref() {
            Some(visit_id) => {
                let path = report_path(root, &patient, date, visit_id);
                if path.is_none() {
                    warn!("{}: unusable accession number {:?}, no report path",
                          record.series_dir.display(), visit_id);
                }
                path
            }
            None => None,
        };
    }
}
