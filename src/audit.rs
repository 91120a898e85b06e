//! Consistency checks over an already populated output tree.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;
use crate::error::{EtlError, Result};
use crate::file_ops::{directories_at_depth, iter_directory};
use crate::paths::{NIFTI_SUFFIX, REPORT_DIR, REPORT_EXTENSION};
use crate::pipeline::extract_metadata;
use crate::table::{read_csv_column, MetadataTable, NIFTI_PATH_COLUMN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub path: PathBuf,
    /// Visit identifier recovered from the report written next to the study.
    pub date_id: Option<String>,
}

/// Visit identifier of a `{root}/{patient}/{date}` directory, taken from its first report file.
pub fn visit_id(date_dir: impl AsRef<Path>) -> Option<String> {
    iter_directory(date_dir.as_ref().join(REPORT_DIR), &[REPORT_EXTENSION])
        .first()
        .and_then(|report| report.file_stem())
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.to_string())
}

fn entry(path: PathBuf, date_dir: Option<&Path>) -> AuditEntry {
    let date_id = date_dir.and_then(visit_id);
    AuditEntry { path, date_id }
}

/// NIfTI files under `root` that no row of the metadata CSV points to.
pub fn nifti_files_missing_metadata(root: impl AsRef<Path>, metadata_csv: impl AsRef<Path>) -> Result<Vec<AuditEntry>> {
    let known: HashSet<PathBuf> = read_csv_column(metadata_csv, NIFTI_PATH_COLUMN)?
        .into_iter()
        .flatten()
        .map(PathBuf::from)
        .collect();

    let missing = WalkDir::new(root)
        .min_depth(4)
        .max_depth(4)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.to_str().map_or(false, |s| s.ends_with(NIFTI_SUFFIX)))
        .filter(|p| !known.contains(p))
        .map(|p| {
            let date_dir = p.parent().and_then(Path::parent).map(Path::to_path_buf);
            entry(p, date_dir.as_deref())
        })
        .collect();
    Ok(missing)
}

/// Re-reads the DICOM tree under `input_root` and appends to `metadata_csv` one row
/// for every series whose NIfTI file exists under `output_root` without a row.
///
/// Returns the number of rows appended.
pub fn repair_missing_metadata(input_root: impl AsRef<Path>,
                               output_root: impl AsRef<Path>,
                               metadata_csv: impl AsRef<Path>,
                               salt: &str) -> Result<usize> {
    let input_root = input_root.as_ref();
    let output_root = output_root.as_ref();
    let metadata_csv = metadata_csv.as_ref();
    if !input_root.is_dir() {
        return Err(EtlError::MissingDirectory(input_root.to_path_buf()));
    }
    let missing: HashSet<PathBuf> = nifti_files_missing_metadata(output_root, metadata_csv)?
        .into_iter()
        .map(|entry| entry.path)
        .collect();
    if missing.is_empty() {
        return Ok(0);
    }

    let table = extract_metadata(input_root, output_root, salt);
    let mut appended = HashSet::new();
    let records: Vec<_> = table.records()
                               .iter()
                               .filter(|r| r.nifti_path.as_ref().map_or(false, |p| missing.contains(p)))
                               .filter(|r| appended.insert(r.nifti_path.clone()))
                               .cloned()
                               .collect();
    let found = records.len();
    if found < missing.len() {
        warn!("{} NIfTI files have no series under {}", missing.len() - found, input_root.display());
    }
    MetadataTable::new(records).append_csv(metadata_csv)?;
    info!("{} rows appended to {}", found, metadata_csv.display());
    Ok(found)
}

/// Study folders (`{root}/{patient}/{date}/{studyUID}`) with nothing in them.
pub fn empty_study_folders(root: impl AsRef<Path>) -> Result<Vec<AuditEntry>> {
    let mut empty = vec![];
    for dir in directories_at_depth(root, 3) {
        if dir.file_name().map_or(false, |name| name == REPORT_DIR) {
            continue;
        }
        if fs::read_dir(&dir)?.next().is_none() {
            let date_dir = dir.parent().map(Path::to_path_buf);
            empty.push(entry(dir, date_dir.as_deref()));
        }
    }
    Ok(empty)
}
