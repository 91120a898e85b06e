use std::path::{Path, PathBuf};
use async_trait::async_trait;
use datafusion::execution::context::SessionContext;
use datafusion::prelude::CsvReadOptions;
use polars::prelude::DataFrame;
use tracing::{error, info};
use crate::db_access::{stringify_columns, QueryRunner};
use crate::error::Result;
use crate::table::recordbatch_to_polars_dataframe;

/// A CSV export of the report table, answered by DataFusion with the same SQL
/// the database would receive.
///
/// Unquoted SQL identifiers are lowercased, so the CSV header has to use
/// lowercase column names. Every column is read as text.
pub struct CsvReportTable {
    path: PathBuf,
    table_name: String,
}

impl CsvReportTable {
    pub fn new(path: impl AsRef<Path>, table_name: &str) -> Self {
        CsvReportTable {
            path: path.as_ref().to_path_buf(),
            table_name: table_name.to_lowercase(),
        }
    }

    async fn query(&self, query: &str) -> Result<DataFrame> {
        let ctx = SessionContext::new();
        ctx.register_csv(&self.table_name,
                         &self.path.to_string_lossy(),
                         CsvReadOptions::new().schema_infer_max_records(0)).await?;

        let batches = ctx.sql(query).await?.collect().await?;
        let mut result: Option<DataFrame> = None;
        for batch in batches {
            let df = recordbatch_to_polars_dataframe(batch)?;
            match result.as_mut() {
                Some(acc) => {
                    acc.vstack_mut(&df)?;
                }
                None => result = Some(df),
            }
        }
        match result {
            Some(df) => stringify_columns(df),
            None => Ok(DataFrame::empty()),
        }
    }
}

#[async_trait]
impl QueryRunner for CsvReportTable {
    async fn run_query(&self, query: &str) -> DataFrame {
        info!("querying {} ({})", self.table_name, self.path.display());
        match self.query(query).await {
            Ok(df) => df,
            Err(err) => {
                error!("query against {} failed: {}", self.path.display(), err);
                DataFrame::empty()
            }
        }
    }
}
