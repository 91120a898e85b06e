use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use polars::prelude::{DataFrame, DataType};
use tracing::{debug, error, info, warn};
use crate::config::ReportsConfig;
use crate::db_access::QueryRunner;
use crate::error::Result;
use crate::rtf::anonymize_rtf;
use crate::table::MetadataTable;

pub const DATE_ID_ALIAS: &str = "date_id";
pub const FORM_ALIAS: &str = "form";

/// An anonymized report, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRecord {
    pub date_id: String,
    pub text: String,
}

/// SQL string literal for a visit identifier. Always quoted, so `00101` stays `00101`.
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// The report query for one batch of visit identifiers.
pub fn build_query(config: &ReportsConfig, ids: &[String]) -> String {
    let predicate = match ids {
        [single] => format!("{} = {}", config.id_column, sql_literal(single)),
        _ => format!("{} IN ({})",
                     config.id_column,
                     ids.iter().map(|id| sql_literal(id)).collect::<Vec<_>>().join(", ")),
    };
    format!("SELECT {} AS {}, {} AS {} FROM {} WHERE {} AND {} = 1",
            config.id_column, DATE_ID_ALIAS,
            config.body_column, FORM_ALIAS,
            config.table,
            predicate,
            config.number_column)
}

fn frame_rows(df: &DataFrame) -> Result<Vec<(String, Option<String>)>> {
    let ids = df.column(DATE_ID_ALIAS)?.cast(&DataType::String)?;
    let forms = df.column(FORM_ALIAS)?.cast(&DataType::String)?;
    let rows = ids.str()?
                  .into_iter()
                  .zip(forms.str()?.into_iter())
                  .filter_map(|(id, form)| Some((id?.trim().to_string(), form.map(|f| f.to_string()))))
                  .collect();
    Ok(rows)
}

/// Raw report bodies for `ids`, queried in batches of `config.batch_size`.
/// When a visit identifier comes back more than once the first row wins.
pub async fn fetch_report_bodies(runner: &dyn QueryRunner,
                                 ids: &[String],
                                 config: &ReportsConfig) -> BTreeMap<String, Option<String>> {
    let mut bodies = BTreeMap::new();
    for batch in ids.chunks(config.batch_size.max(1)) {
        let df = runner.run_query(&build_query(config, batch)).await;
        if df.height() == 0 {
            warn!("no reports returned for a batch of {} visit id(s)", batch.len());
            continue;
        }
        match frame_rows(&df) {
            Ok(rows) => {
                for (id, body) in rows {
                    bodies.entry(id).or_insert(body);
                }
            }
            Err(err) => error!("unexpected report result shape: {}", err),
        }
    }
    bodies
}

/// Anonymized reports for `ids`, together with the identifiers whose body was missing or malformed.
pub async fn get_reports(runner: &dyn QueryRunner,
                         ids: &[String],
                         config: &ReportsConfig) -> (Vec<ReportRecord>, Vec<String>) {
    let bodies = fetch_report_bodies(runner, ids, config).await;
    let mut reports = vec![];
    let mut failed = vec![];
    for (date_id, body) in bodies {
        match body.as_deref().map(anonymize_rtf) {
            Some(Ok(text)) => reports.push(ReportRecord { date_id, text }),
            Some(Err(err)) => {
                error!("report {} cannot be parsed: {}", date_id, err);
                failed.push(date_id);
            }
            None => {
                error!("report {} has an empty body", date_id);
                failed.push(date_id);
            }
        }
    }
    (reports, failed)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub written: usize,
    pub skipped: usize,
    pub failed: Vec<String>,
}

impl ReportSummary {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Writes the anonymized report of every visit in `table` that has no report file yet.
pub async fn extract_reports(table: &MetadataTable,
                             runner: &dyn QueryRunner,
                             config: &ReportsConfig) -> ReportSummary {
    let mut summary = ReportSummary::default();

    let mut targets: BTreeMap<String, PathBuf> = BTreeMap::new();
    for record in table.records() {
        match (&record.date_id, &record.form_path) {
            (Some(date_id), Some(form_path)) => {
                targets.entry(date_id.clone()).or_insert_with(|| form_path.clone());
            }
            _ => warn!("{}: no visit id or report path, report not extracted", record.series_dir.display()),
        }
    }

    let mut pending = vec![];
    for (date_id, path) in targets.iter() {
        if path.exists() {
            debug!("{} already written", path.display());
            summary.skipped += 1;
        } else {
            pending.push(date_id.clone());
        }
    }
    if pending.is_empty() {
        return summary;
    }
    info!("fetching {} report(s)", pending.len());

    let (reports, failed) = get_reports(runner, &pending, config).await;
    summary.failed.extend(failed);
    let mut reports: BTreeMap<String, String> = reports.into_iter()
                                                       .map(|r| (r.date_id, r.text))
                                                       .collect();

    for date_id in pending {
        if summary.failed.contains(&date_id) {
            continue;
        }
        let Some(text) = reports.remove(&date_id) else {
            error!("no report found for visit {}", date_id);
            summary.failed.push(date_id);
            continue;
        };
        let path = &targets[&date_id];
        match fs::write(path, text) {
            Ok(()) => summary.written += 1,
            Err(err) => {
                error!("cannot write {}: {}", path.display(), err);
                summary.failed.push(date_id);
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use async_trait::async_trait;
    use polars::prelude::{NamedFrom, Series};
    use crate::dicom_data::TAG_COLUMNS;
    use crate::reader::SeriesRecord;

    struct FakeDatabase {
        rows: Vec<(&'static str, &'static str)>,
        queries: Mutex<Vec<String>>,
    }

    impl FakeDatabase {
        fn new(rows: Vec<(&'static str, &'static str)>) -> Self {
            FakeDatabase { rows, queries: Mutex::new(vec![]) }
        }
        fn queries(&self) -> Vec<String> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl QueryRunner for FakeDatabase {
        async fn run_query(&self, query: &str) -> DataFrame {
            self.queries.lock().unwrap().push(query.to_string());
            if self.rows.is_empty() {
                return DataFrame::empty();
            }
            let ids: Vec<&str> = self.rows.iter().map(|r| r.0).collect();
            let forms: Vec<&str> = self.rows.iter().map(|r| r.1).collect();
            DataFrame::new(vec![Series::new(DATE_ID_ALIAS, ids), Series::new(FORM_ALIAS, forms)]).unwrap()
        }
    }

    fn config(batch_size: usize) -> ReportsConfig {
        ReportsConfig { batch_size, ..ReportsConfig::default() }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn table(root: &std::path::Path, visits: &[&str]) -> MetadataTable {
        let records = visits.iter()
                            .map(|visit| {
                                let mut record = SeriesRecord::new(root.join("in"), vec![None; TAG_COLUMNS.len()]);
                                record.date_id = Some(visit.to_string());
                                record.form_path = Some(root.join(format!("{}.txt", visit)));
                                record
                            })
                            .collect();
        MetadataTable::new(records)
    }

    #[test]
    fn test_build_query_singleton_and_batch() {
        let config = config(1000);
        assert_eq!(
            build_query(&config, &ids(&["42"])),
            "SELECT idcita AS date_id, informertf AS form FROM citas_informes WHERE idcita = '42' AND numero = 1"
        );
        assert_eq!(
            build_query(&config, &ids(&["1", "2", "O'Neil"])),
            "SELECT idcita AS date_id, informertf AS form FROM citas_informes WHERE idcita IN ('1', '2', 'O''Neil') AND numero = 1"
        );
        assert_eq!(sql_literal("00101"), "'00101'");
    }

    #[tokio::test]
    async fn test_batches_and_deduplication() {
        let database = FakeDatabase::new(vec![
            ("1", r"{\rtf1 first\par}"),
            ("1", r"{\rtf1 duplicate\par}"),
            ("2", r"{\rtf1 Paciente: X\par second\par}"),
        ]);
        let (reports, failed) = get_reports(&database, &ids(&["1", "2", "3", "4", "5"]), &config(2)).await;

        let queries = database.queries();
        assert_eq!(queries.len(), 3);
        assert!(queries[0].contains("IN ('1', '2')"));
        assert!(queries[2].contains("idcita = '5'"));
        assert!(failed.is_empty());
        assert_eq!(reports, vec![
            ReportRecord { date_id: "1".into(), text: "first\n".into() },
            ReportRecord { date_id: "2".into(), text: "second\n".into() },
        ]);
    }

    #[tokio::test]
    async fn test_extract_reports_writes_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let table = table(dir.path(), &["1", "2"]);
        let database = FakeDatabase::new(vec![
            ("1", r"{\rtf1 Solicitado por: Dr. Ruiz\par uno\par}"),
            ("2", r"{\rtf1 dos\par}"),
        ]);

        let summary = extract_reports(&table, &database, &config(1000)).await;
        assert!(summary.success());
        assert_eq!(summary.written, 2);
        assert_eq!(std::fs::read_to_string(dir.path().join("1.txt")).unwrap(), "uno\n");

        let rerun = FakeDatabase::new(vec![]);
        let summary = extract_reports(&table, &rerun, &config(1000)).await;
        assert_eq!(summary, ReportSummary { written: 0, skipped: 2, failed: vec![] });
        assert!(rerun.queries().is_empty());
    }

    #[tokio::test]
    async fn test_missing_and_malformed_reports_fail_but_continue() {
        let dir = tempfile::tempdir().unwrap();
        let table = table(dir.path(), &["1", "2", "3"]);
        let database = FakeDatabase::new(vec![
            ("1", r"{\rtf1 broken"),
            ("3", r"{\rtf1 fine\par}"),
        ]);

        let summary = extract_reports(&table, &database, &config(1000)).await;
        assert!(!summary.success());
        assert_eq!(summary.written, 1);
        assert_eq!(summary.failed, vec!["1".to_string(), "2".to_string()]);
        assert!(dir.path().join("3.txt").exists());
        assert!(!dir.path().join("1.txt").exists());
    }

    #[tokio::test]
    async fn test_database_failure_marks_every_visit_failed() {
        let dir = tempfile::tempdir().unwrap();
        let table = table(dir.path(), &["7"]);
        let summary = extract_reports(&table, &FakeDatabase::new(vec![]), &config(1000)).await;
        assert_eq!(summary.failed, vec!["7".to_string()]);
        assert_eq!(summary.written, 0);
    }
}
