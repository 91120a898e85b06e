use std::fmt;
use std::path::Path;
use chrono::NaiveDate;
use dicom::core::Tag;
use dicom::object::{DefaultDicomObject, OpenFileOptions};
use dicom::dictionary_std::tags;
use crate::error::{EtlError, Result};

/// How the value of a tag is interpreted when it lands in the metadata table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Float,
    Int,
    Date,
    /// Image orientation cosines reduced to the anatomical plane name.
    Plane,
}

#[derive(Debug, Clone, Copy)]
pub struct TagColumn {
    pub name: &'static str,
    pub tag: Tag,
    pub kind: ValueKind,
}

const fn column(name: &'static str, group: u16, element: u16, kind: ValueKind) -> TagColumn {
    TagColumn { name, tag: Tag(group, element), kind }
}

/// Every tag pulled from the representative file of a series, in table order.
pub const TAG_COLUMNS: &[TagColumn] = &[
    column("OriginalPatientId", 0x0010, 0x0020, ValueKind::Text),
    column("StudyId", 0x0020, 0x0010, ValueKind::Text),
    column("StudyInstanceUID", 0x0020, 0x000D, ValueKind::Text),
    column("SeriesInstanceUID", 0x0020, 0x000E, ValueKind::Text),
    column("AccessionNumber", 0x0008, 0x0050, ValueKind::Text),
    column("SeriesDescription", 0x0008, 0x103E, ValueKind::Text),
    column("RepetitionTime", 0x0018, 0x0080, ValueKind::Float),
    column("EchoTime", 0x0018, 0x0081, ValueKind::Float),
    column("InversionTime", 0x0018, 0x0082, ValueKind::Float),
    column("ImagePlane", 0x0020, 0x0037, ValueKind::Plane),
    column("StudyDate", 0x0008, 0x0020, ValueKind::Date),
    column("MRAcquisitionType", 0x0018, 0x0023, ValueKind::Text),
    column("PatientSex", 0x0010, 0x0040, ValueKind::Text),
    column("PatientBirthDate", 0x0010, 0x0030, ValueKind::Text),
    column("Manufacturer", 0x0008, 0x0070, ValueKind::Text),
    column("ManufacturerModelName", 0x0008, 0x1090, ValueKind::Text),
    column("MagneticFieldStrength", 0x0018, 0x0087, ValueKind::Float),
    column("SpacingBetweenSlices", 0x0018, 0x0088, ValueKind::Float),
    column("SliceThickness", 0x0018, 0x0050, ValueKind::Float),
    column("PixelSpacing", 0x0028, 0x0030, ValueKind::Text),
    column("SamplesPerPixel", 0x0028, 0x0002, ValueKind::Int),
    column("Rows", 0x0028, 0x0010, ValueKind::Int),
    column("Columns", 0x0028, 0x0011, ValueKind::Int),
    column("BitsAllocated", 0x0028, 0x0100, ValueKind::Int),
    column("BitsStored", 0x0028, 0x0101, ValueKind::Int),
    column("HighBit", 0x0028, 0x0102, ValueKind::Int),
    column("PixelRepresentation", 0x0028, 0x0103, ValueKind::Int),
    column("SmallestImagePixelValue", 0x0028, 0x0106, ValueKind::Int),
    column("LargestImagePixelValue", 0x0028, 0x0107, ValueKind::Int),
    column("NumberOfSlices", 0x0054, 0x0081, ValueKind::Int),
];

/// Position of a column in [`TAG_COLUMNS`].
pub fn column_index(name: &str) -> Option<usize> {
    TAG_COLUMNS.iter().position(|c| c.name == name)
}

#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Text(String),
    Float(f64),
    Int(i64),
    Date(NaiveDate),
}

impl TagValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TagValue::Text(value) => Some(value),
            _ => None,
        }
    }
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            TagValue::Date(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Text(value) => write!(f, "{}", value),
            TagValue::Float(value) => write!(f, "{}", value),
            TagValue::Int(value) => write!(f, "{}", value),
            TagValue::Date(value) => write!(f, "{}", value.format("%Y-%m-%d")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagePlane {
    Sagittal,
    Coronal,
    Axial,
}

impl ImagePlane {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImagePlane::Sagittal => "Sagittal",
            ImagePlane::Coronal => "Coronal",
            ImagePlane::Axial => "Axial",
        }
    }
}

/// Classifies an image orientation (row cosines followed by column cosines).
///
/// The cosines are rounded to the nearest integer and the plane follows from
/// the axis the slice normal (their cross product) points along.
pub fn image_plane(cosines: &[f64]) -> Option<ImagePlane> {
    if cosines.len() < 6 {
        return None;
    }
    let r: Vec<f64> = cosines[..6].iter().map(|x| x.round()).collect();
    let normal = [
        (r[1] * r[5] - r[2] * r[4]).abs(),
        (r[2] * r[3] - r[0] * r[5]).abs(),
        (r[0] * r[4] - r[1] * r[3]).abs(),
    ];
    if normal[0] == 1.0 {
        Some(ImagePlane::Sagittal)
    } else if normal[1] == 1.0 {
        Some(ImagePlane::Coronal)
    } else if normal[2] == 1.0 {
        Some(ImagePlane::Axial)
    } else {
        None
    }
}

/// Header of one DICOM file, read without pixel data.
pub struct DicomData {
    dicom_obj: DefaultDicomObject,
}

impl DicomData {
    pub fn open_header(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let dicom_obj = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)
            .map_err(|err| EtlError::Dicom { path: path.to_path_buf(), message: err.to_string() })?;
        Ok(DicomData { dicom_obj })
    }

    pub fn text(&self, tag: Tag) -> Option<String> {
        if let Ok(value) = self.dicom_obj.element(tag) {
            if let Ok(value) = value.to_str() {
                let value = value.trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
                                 .trim_start();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
        None
    }
    pub fn float(&self, tag: Tag) -> Option<f64> {
        if let Ok(value) = self.dicom_obj.element(tag) {
            if let Ok(value) = value.to_float64() {
                return Some(value);
            }
        }
        None
    }
    pub fn floats(&self, tag: Tag) -> Option<Vec<f64>> {
        if let Ok(value) = self.dicom_obj.element(tag) {
            if let Ok(value) = value.to_multi_float64() {
                return Some(value);
            }
        }
        None
    }
    pub fn int(&self, tag: Tag) -> Option<i64> {
        if let Ok(value) = self.dicom_obj.element(tag) {
            if let Ok(value) = value.to_int::<i64>() {
                return Some(value);
            }
        }
        None
    }
    pub fn date(&self, tag: Tag) -> Option<NaiveDate> {
        if let Ok(value) = self.dicom_obj.element(tag) {
            if let Ok(value) = value.to_date() {
                if let Ok(value) = value.to_naive_date() {
                    return Some(value);
                }
            }
        }
        None
    }

    /// Value of one table column, `None` when the tag is absent or cannot be converted.
    pub fn value(&self, column: &TagColumn) -> Option<TagValue> {
        match column.kind {
            ValueKind::Text => self.text(column.tag).map(TagValue::Text),
            ValueKind::Float => self.float(column.tag).map(TagValue::Float),
            ValueKind::Int => self.int(column.tag).map(TagValue::Int),
            ValueKind::Date => self.date(column.tag).map(TagValue::Date),
            ValueKind::Plane => self.floats(column.tag)
                                    .and_then(|cosines| image_plane(&cosines))
                                    .map(|plane| TagValue::Text(plane.as_str().to_string())),
        }
    }

    pub fn values(&self) -> Vec<Option<TagValue>> {
        TAG_COLUMNS.iter().map(|column| self.value(column)).collect()
    }
}
