use async_trait::async_trait;
use polars::prelude::{DataFrame, DataType, NamedFrom, Series};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Column, Connection, Row};
use tracing::{error, info, warn};
use crate::config::DatabaseConfig;
use crate::error::Result;

/// Something that answers a SQL query with a table.
///
/// Implementations never fail: a connection or query error is logged and an
/// empty `DataFrame` is returned, so callers only have to handle the empty case.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    async fn run_query(&self, query: &str) -> DataFrame;
}

/// The radiology report database. A connection is opened per query and always closed.
pub struct DatabaseAccess {
    config: DatabaseConfig,
}

impl DatabaseAccess {
    pub fn new(config: DatabaseConfig) -> Self {
        DatabaseAccess { config }
    }

    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .database(&self.config.name)
            .username(&self.config.user)
            .password(&self.config.password)
    }
}

#[async_trait]
impl QueryRunner for DatabaseAccess {
    async fn run_query(&self, query: &str) -> DataFrame {
        if self.config.verbose {
            info!("{}", query);
        }
        let mut conn = match PgConnection::connect_with(&self.connect_options()).await {
            Ok(conn) => conn,
            Err(err) => {
                error!("connection to {}:{}/{} failed: {}",
                       self.config.host, self.config.port, self.config.name, err);
                return DataFrame::empty();
            }
        };

        let result = fetch_dataframe(&mut conn, query).await;
        if let Err(err) = conn.close().await {
            warn!("closing connection to {} failed: {}", self.config.host, err);
        }
        match result {
            Ok(df) => df,
            Err(err) => {
                error!("query failed: {}", err);
                DataFrame::empty()
            }
        }
    }
}

async fn fetch_dataframe(conn: &mut PgConnection, query: &str) -> Result<DataFrame> {
    let rows = sqlx::query(query).fetch_all(&mut *conn).await?;
    rows_to_dataframe(&rows)
}

fn rows_to_dataframe(rows: &[PgRow]) -> Result<DataFrame> {
    let Some(first) = rows.first() else {
        return Ok(DataFrame::empty());
    };
    let columns = first.columns()
                       .iter()
                       .enumerate()
                       .map(|(i, column)| {
                           let values: Vec<Option<String>> = rows.iter().map(|row| cell_to_string(row, i)).collect();
                           Series::new(column.name(), values)
                       })
                       .collect();
    Ok(DataFrame::new(columns)?)
}

fn cell_to_string(row: &PgRow, index: usize) -> Option<String> {
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return value;
    }
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return value.map(|v| v.to_string());
    }
    if let Ok(value) = row.try_get::<Option<i32>, _>(index) {
        return value.map(|v| v.to_string());
    }
    if let Ok(value) = row.try_get::<Option<i16>, _>(index) {
        return value.map(|v| v.to_string());
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return value.map(|v| v.to_string());
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
        return value.map(|v| v.to_string());
    }
    if let Ok(value) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return value.map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
    }
    None
}

/// Casts every column to a nullable string column.
pub fn stringify_columns(df: DataFrame) -> Result<DataFrame> {
    let columns = df.get_columns()
                    .iter()
                    .map(|series| series.cast(&DataType::String))
                    .collect::<polars::prelude::PolarsResult<Vec<_>>>()?;
    Ok(DataFrame::new(columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_database() -> DatabaseConfig {
        DatabaseConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            name: "reports".to_string(),
            user: "nobody".to_string(),
            password: "nothing".to_string(),
            verbose: true,
        }
    }

    #[tokio::test]
    async fn test_connection_failure_yields_empty_table() {
        let db_access = DatabaseAccess::new(unreachable_database());
        let df = db_access.run_query("SELECT 1").await;
        assert_eq!(df.height(), 0);
        assert_eq!(df.width(), 0);
    }

    #[test]
    fn test_stringify_columns() {
        let df = DataFrame::new(vec![
            Series::new("idcita", &[1_i64, 2]),
            Series::new("form", &["a", "b"]),
        ]).unwrap();
        let df = stringify_columns(df).unwrap();
        let ids: Vec<_> = df.column("idcita").unwrap().str().unwrap().into_iter().collect();
        assert_eq!(ids, vec![Some("1"), Some("2")]);
    }
}
