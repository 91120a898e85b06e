use std::path::{Path, PathBuf};
use chrono::NaiveDate;
use tracing::{debug, warn};
use crate::dicom_data::{column_index, DicomData, TagValue};
use crate::file_ops;

/// One row of the metadata table: the header of one series plus the derived fields.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRecord {
    pub series_dir: PathBuf,
    /// Aligned with [`crate::dicom_data::TAG_COLUMNS`].
    pub values: Vec<Option<TagValue>>,
    pub patient_id: Option<String>,
    pub date_id: Option<String>,
    pub nifti_path: Option<PathBuf>,
    pub form_path: Option<PathBuf>,
}

impl SeriesRecord {
    pub fn new(series_dir: impl AsRef<Path>, values: Vec<Option<TagValue>>) -> Self {
        SeriesRecord {
            series_dir: series_dir.as_ref().to_path_buf(),
            values,
            patient_id: None,
            date_id: None,
            nifti_path: None,
            form_path: None,
        }
    }

    pub fn get(&self, column: &str) -> Option<&TagValue> {
        column_index(column).and_then(|i| self.values.get(i)?.as_ref())
    }

    pub fn text(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(|value| value.as_text())
    }

    pub fn study_date(&self) -> Option<NaiveDate> {
        self.get("StudyDate").and_then(|value| value.as_date())
    }
}

/// Reads the representative file of every series directory it is given.
pub struct DicomReader {
    series_dirs: Vec<PathBuf>,
}

impl DicomReader {
    /// Reader over every `{study}/{series}` directory below `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::from_series(file_ops::series_directories(path))
    }

    pub fn from_series(series_dirs: Vec<PathBuf>) -> Self {
        DicomReader { series_dirs }
    }

    pub fn series_directories(&self) -> &[PathBuf] {
        &self.series_dirs
    }

    pub fn iter(&self) -> DicomIter {
        DicomIter {
            dicom_reader: self,
            index: 0,
        }
    }

    pub fn read_all(&self) -> Vec<SeriesRecord> {
        self.iter().collect()
    }
}

impl<'a> IntoIterator for &'a DicomReader {
    type Item = SeriesRecord;
    type IntoIter = DicomIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct DicomIter<'a> {
    dicom_reader: &'a DicomReader,
    index: usize,
}

/// Header of the first file in the series that parses.
fn read_series_header(series_dir: &Path) -> Option<DicomData> {
    let files = file_ops::dicom_files(series_dir);
    if files.is_empty() {
        debug!("no DICOM file in {}, skipping", series_dir.display());
        return None;
    }
    for file in &files {
        match DicomData::open_header(file) {
            Ok(dicom_data) => return Some(dicom_data),
            Err(err) => warn!("{}", err),
        }
    }
    warn!("skipping series {}: none of its {} DICOM files could be read",
          series_dir.display(), files.len());
    None
}

impl Iterator for DicomIter<'_> {
    type Item = SeriesRecord;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.dicom_reader.series_dirs.len() {
            let series_dir = &self.dicom_reader.series_dirs[self.index];
            self.index += 1;

            if let Some(dicom_data) = read_series_header(series_dir) {
                return Some(SeriesRecord::new(series_dir, dicom_data.values()));
            }
        }
        None
    }
}
