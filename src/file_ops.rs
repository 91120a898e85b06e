use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const DICOM_EXTENSION: &str = "dcm";

/// Files directly inside `directory_path` whose extension is one of `file_extensions`
/// (compared case-insensitively), sorted by name.
pub fn iter_directory(directory_path: impl AsRef<Path>, file_extensions: &[&str]) -> Vec<PathBuf> {
    let directory_path = directory_path.as_ref();
    let entries = match fs::read_dir(directory_path) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("cannot list {}: {}", directory_path.display(), err);
            return vec![];
        }
    };

    let mut result = vec![];
    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(err) => {
                warn!("cannot read entry in {}: {}", directory_path.display(), err);
                continue;
            }
        };
        let matches = path.extension()
                          .and_then(|ext| ext.to_str())
                          .map(|ext| file_extensions.iter().any(|wanted| ext.eq_ignore_ascii_case(wanted)))
                          .unwrap_or(false);
        if matches && path.is_file() {
            result.push(path);
        }
    }
    result.sort();
    result
}

/// Candidate files for the header of a series, in the order they are tried.
pub fn dicom_files(series_dir: impl AsRef<Path>) -> Vec<PathBuf> {
    iter_directory(series_dir, &[DICOM_EXTENSION])
}

/// Directories exactly `depth` levels below `root`, in path order.
pub fn directories_at_depth(root: impl AsRef<Path>, depth: usize) -> Vec<PathBuf> {
    WalkDir::new(root)
        .min_depth(depth)
        .max_depth(depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("skipping unreadable entry: {}", err);
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect()
}

/// Series live at `{input}/{study}/{series}`.
pub fn series_directories(input_root: impl AsRef<Path>) -> Vec<PathBuf> {
    directories_at_depth(input_root, 2)
}

/// Creates every distinct parent directory of `paths`. Existing directories are left alone.
/// Returns false when at least one directory could not be created.
pub fn create_parent_directories<'a>(paths: impl IntoIterator<Item = &'a Path>) -> bool {
    let parents: BTreeSet<&Path> = paths.into_iter()
                                        .filter_map(|path| path.parent())
                                        .collect();
    let mut success = true;
    for parent in parents {
        if parent.is_dir() {
            continue;
        }
        match fs::create_dir_all(parent) {
            Ok(()) => debug!("created {}", parent.display()),
            Err(err) => {
                warn!("cannot create {}: {}", parent.display(), err);
                success = false;
            }
        }
    }
    success
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iter_directory_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.dcm"), b"").unwrap();
        fs::write(dir.path().join("a.DCM"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();
        fs::create_dir(dir.path().join("nested.dcm")).unwrap();

        let files = iter_directory(dir.path(), &[DICOM_EXTENSION]);
        let names: Vec<_> = files.iter()
                                 .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
                                 .collect();
        assert_eq!(names, vec!["a.DCM", "b.dcm"]);
    }

    #[test]
    fn test_dicom_files_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(dicom_files(dir.path()).is_empty());
        assert!(dicom_files(dir.path().join("does-not-exist")).is_empty());
    }

    #[test]
    fn test_series_directories_depth_two() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("study2/s1")).unwrap();
        fs::create_dir_all(dir.path().join("study1/s2")).unwrap();
        fs::create_dir_all(dir.path().join("study1/s1/deeper")).unwrap();
        fs::write(dir.path().join("study1/file.dcm"), b"").unwrap();

        let series = series_directories(dir.path());
        assert_eq!(series, vec![
            dir.path().join("study1/s1"),
            dir.path().join("study1/s2"),
            dir.path().join("study2/s1"),
        ]);
    }

    #[test]
    fn test_create_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("p/2023-01-01")).unwrap();
        let a = dir.path().join("p/2023-01-01/1.2/3.4.nii.gz");
        let b = dir.path().join("p/2023-01-01/Report/7.txt");
        let c = dir.path().join("p/2023-01-01/1.2/3.5.nii.gz");

        assert!(create_parent_directories([a.as_path(), b.as_path(), c.as_path()]));
        assert!(dir.path().join("p/2023-01-01/1.2").is_dir());
        assert!(dir.path().join("p/2023-01-01/Report").is_dir());
        // second pass finds everything in place
        assert!(create_parent_directories([a.as_path(), b.as_path()]));
    }
}
