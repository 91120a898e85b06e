use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use arrow::array::{ArrayRef, Date32Builder, Float64Builder, Int64Builder, RecordBatch, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use chrono::NaiveDate;
use polars::prelude::{col, CsvWriter, DataFrame, LazyCsvReader, LazyFileListReader,
                      PolarsResult, SerWriter, Series};
use crate::dicom_data::{TagValue, ValueKind, TAG_COLUMNS};
use crate::error::Result;
use crate::reader::SeriesRecord;

pub const SERIES_DIR_COLUMN: &str = "OriginalSeriesDir";
pub const PATIENT_ID_COLUMN: &str = "PatientID";
pub const DATE_ID_COLUMN: &str = "DateID";
pub const NIFTI_PATH_COLUMN: &str = "NiftiPath";
pub const FORM_PATH_COLUMN: &str = "FormPath";

const DERIVED_COLUMNS: [&str; 4] = [PATIENT_ID_COLUMN, DATE_ID_COLUMN, NIFTI_PATH_COLUMN, FORM_PATH_COLUMN];

/// The metadata table header, in the order the columns are written.
pub fn column_names() -> Vec<&'static str> {
    std::iter::once(SERIES_DIR_COLUMN)
        .chain(TAG_COLUMNS.iter().map(|c| c.name))
        .chain(DERIVED_COLUMNS)
        .collect()
}

enum ColumnBuilder {
    Text(StringBuilder),
    Float(Float64Builder),
    Int(Int64Builder),
    Date(Date32Builder),
}

impl ColumnBuilder {
    fn new(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Text | ValueKind::Plane => ColumnBuilder::Text(StringBuilder::new()),
            ValueKind::Float => ColumnBuilder::Float(Float64Builder::new()),
            ValueKind::Int => ColumnBuilder::Int(Int64Builder::new()),
            ValueKind::Date => ColumnBuilder::Date(Date32Builder::new()),
        }
    }

    fn data_type(&self) -> DataType {
        match self {
            ColumnBuilder::Text(_) => DataType::Utf8,
            ColumnBuilder::Float(_) => DataType::Float64,
            ColumnBuilder::Int(_) => DataType::Int64,
            ColumnBuilder::Date(_) => DataType::Date32,
        }
    }

    fn append(&mut self, value: Option<&TagValue>) {
        match (self, value) {
            (ColumnBuilder::Text(builder), Some(TagValue::Text(value))) => builder.append_value(value),
            (ColumnBuilder::Float(builder), Some(TagValue::Float(value))) => builder.append_value(*value),
            (ColumnBuilder::Int(builder), Some(TagValue::Int(value))) => builder.append_value(*value),
            (ColumnBuilder::Date(builder), Some(TagValue::Date(value))) => builder.append_value(days_since_epoch(*value)),
            (ColumnBuilder::Text(builder), _) => builder.append_null(),
            (ColumnBuilder::Float(builder), _) => builder.append_null(),
            (ColumnBuilder::Int(builder), _) => builder.append_null(),
            (ColumnBuilder::Date(builder), _) => builder.append_null(),
        }
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Text(builder) => Arc::new(builder.finish()),
            ColumnBuilder::Float(builder) => Arc::new(builder.finish()),
            ColumnBuilder::Int(builder) => Arc::new(builder.finish()),
            ColumnBuilder::Date(builder) => Arc::new(builder.finish()),
        }
    }
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    date.signed_duration_since(epoch).num_days() as i32
}

/// All series records of one run, one row each.
#[derive(Debug, Clone, Default)]
pub struct MetadataTable {
    records: Vec<SeriesRecord>,
}

impl MetadataTable {
    pub fn new(records: Vec<SeriesRecord>) -> Self {
        MetadataTable { records }
    }

    pub fn records(&self) -> &[SeriesRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [SeriesRecord] {
        &mut self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let mut series_dir_builder = StringBuilder::new();
        let mut tag_builders: Vec<ColumnBuilder> = TAG_COLUMNS.iter()
                                                              .map(|c| ColumnBuilder::new(c.kind))
                                                              .collect();
        let mut derived_builders: Vec<StringBuilder> = DERIVED_COLUMNS.iter()
                                                                      .map(|_| StringBuilder::new())
                                                                      .collect();

        for record in self.records.iter() {
            series_dir_builder.append_value(record.series_dir.to_string_lossy());
            for (i, builder) in tag_builders.iter_mut().enumerate() {
                builder.append(record.values.get(i).and_then(|v| v.as_ref()));
            }
            let derived = [
                record.patient_id.clone(),
                record.date_id.clone(),
                record.nifti_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
                record.form_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
            ];
            for (builder, value) in derived_builders.iter_mut().zip(derived) {
                builder.append_option(value);
            }
        }

        let mut fields = vec![Field::new(SERIES_DIR_COLUMN, DataType::Utf8, false)];
        let mut arrays: Vec<ArrayRef> = vec![Arc::new(series_dir_builder.finish())];
        for (column, builder) in TAG_COLUMNS.iter().zip(tag_builders.iter_mut()) {
            fields.push(Field::new(column.name, builder.data_type(), true));
            arrays.push(builder.finish());
        }
        for (name, builder) in DERIVED_COLUMNS.iter().zip(derived_builders.iter_mut()) {
            fields.push(Field::new(*name, DataType::Utf8, true));
            arrays.push(Arc::new(builder.finish()));
        }

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
    }

    pub fn to_dataframe(&self) -> Result<DataFrame> {
        Ok(recordbatch_to_polars_dataframe(self.to_record_batch()?)?)
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut df = self.to_dataframe()?;
        let mut file = File::create(path)?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut df)?;
        Ok(())
    }

    /// Appends the rows to an existing metadata CSV, or writes a new one with a header.
    pub fn append_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            return self.write_csv(path);
        }
        let mut df = self.to_dataframe()?;
        let mut file = OpenOptions::new().append(true).open(path)?;
        CsvWriter::new(&mut file)
            .include_header(false)
            .finish(&mut df)?;
        Ok(())
    }
}

pub fn recordbatch_to_polars_dataframe(record_batch: RecordBatch) -> PolarsResult<DataFrame> {
    let schema = record_batch.schema();
    let columns = record_batch.columns()
                              .iter()
                              .zip(schema.fields().iter().map(|field| field.name().as_str()))
                              .map(|(arc_dyn_array, col_name)| (arc_dyn_array.to_data(), col_name))
                              .map(|(array_data, col_name)| (polars_arrow::array::from_data(&array_data), col_name))
                              .map(|(box_dyn_array, col_name)| Series::try_from((col_name, box_dyn_array)))
                              .collect::<PolarsResult<Vec<_>>>()?;
    DataFrame::new(columns)
}

/// One column of a CSV file, every value read as text.
pub fn read_csv_column(path: impl AsRef<Path>, column: &str) -> Result<Vec<Option<String>>> {
    let df = LazyCsvReader::new(path.as_ref())
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .finish()?
        .select([col(column)])
        .collect()?;
    let values = df.column(column)?
                   .str()?
                   .into_iter()
                   .map(|value| value.map(|v| v.to_string()))
                   .collect();
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use crate::dicom_data::column_index;

    fn record(series_dir: &str, fields: &[(&str, TagValue)]) -> SeriesRecord {
        let mut values = vec![None; TAG_COLUMNS.len()];
        for (name, value) in fields {
            values[column_index(name).unwrap()] = Some(value.clone());
        }
        SeriesRecord::new(series_dir, values)
    }

    fn sample() -> MetadataTable {
        let mut first = record("/in/a/1", &[
            ("SeriesInstanceUID", TagValue::Text("1.2.3".into())),
            ("StudyDate", TagValue::Date(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap())),
            ("Rows", TagValue::Int(512)),
            ("EchoTime", TagValue::Float(4.5)),
        ]);
        first.nifti_path = Some(PathBuf::from("/out/p/2023-01-01/1/1.2.3.nii.gz"));
        let second = record("/in/a/2", &[]);
        MetadataTable::new(vec![first, second])
    }

    #[test]
    fn test_record_batch_schema() {
        let batch = sample().to_record_batch().unwrap();
        assert_eq!(batch.num_rows(), 2);
        let names: Vec<_> = batch.schema().fields().iter().map(|f| f.name().clone()).collect();
        assert_eq!(names, column_names());
        assert_eq!(batch.schema().field_with_name("StudyDate").unwrap().data_type(), &DataType::Date32);
        assert_eq!(batch.column(column_index("Rows").unwrap() + 1).null_count(), 1);
    }

    #[test]
    fn test_dataframe_conversion() {
        let df = sample().to_dataframe().unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.width(), column_names().len());
        let rows = df.column("Rows").unwrap().i64().unwrap();
        assert_eq!(rows.get(0), Some(512));
        assert_eq!(rows.get(1), None);
    }

    #[test]
    fn test_csv_round_trip_of_paths() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("metadata.csv");
        sample().write_csv(&csv).unwrap();

        let text = std::fs::read_to_string(&csv).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(header, column_names().join(","));
        assert!(text.contains("2023-01-01"));

        let paths = read_csv_column(&csv, NIFTI_PATH_COLUMN).unwrap();
        assert_eq!(paths, vec![Some("/out/p/2023-01-01/1/1.2.3.nii.gz".to_string()), None]);
    }

    #[test]
    fn test_append_keeps_single_header() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("metadata.csv");
        sample().write_csv(&csv).unwrap();
        sample().append_csv(&csv).unwrap();

        let text = std::fs::read_to_string(&csv).unwrap();
        assert_eq!(text.lines().count(), 5);
        assert_eq!(read_csv_column(&csv, NIFTI_PATH_COLUMN).unwrap().len(), 4);

        let fresh = dir.path().join("fresh.csv");
        sample().append_csv(&fresh).unwrap();
        assert_eq!(std::fs::read_to_string(&fresh).unwrap().lines().count(), 3);
    }

    #[test]
    fn test_empty_table_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("metadata.csv");
        MetadataTable::default().write_csv(&csv).unwrap();
        let text = std::fs::read_to_string(&csv).unwrap();
        assert_eq!(text.lines().count(), 1);
    }
}
