use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::{
    schema::{Dataset, Value},
    Result, SnowcheckError,
};

/// Data source name the Spark connector registers under.
pub const SNOWFLAKE_SOURCE_NAME: &str = "net.snowflake.spark.snowflake";

/// Connector option naming the table a read or write targets.
pub const OPTION_DBTABLE: &str = "dbtable";

/// Connector option carrying a query to read from instead of a table.
pub const OPTION_QUERY: &str = "query";

/// A warehouse session, the JDBC-style side of the connector.
#[async_trait]
pub trait Connection: Send {
    /// Run a statement that returns rows.
    async fn execute_query(&mut self, sql: &str) -> Result<ResultSet>;

    /// Run a statement for its side effect and return the affected row count.
    async fn execute_update(&mut self, sql: &str) -> Result<u64>;

    async fn commit(&mut self) -> Result<()>;

    async fn table_exists(&mut self, name: &str) -> Result<bool>;
}

/// The dataframe side of the connector: writes and reads whole datasets.
#[async_trait]
pub trait DataSession: Send {
    async fn write(
        &mut self,
        dataset: &Dataset,
        format: &str,
        options: &ConnectorOptions,
        mode: SaveMode,
    ) -> Result<()>;

    async fn read(&mut self, format: &str, options: &ConnectorOptions) -> Result<Dataset>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveMode {
    /// Fail if the table already exists.
    #[default]
    ErrorIfExists,
    Overwrite,
    Append,
    /// Leave an existing table untouched and write nothing.
    Ignore,
}

impl fmt::Display for SaveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveMode::ErrorIfExists => write!(f, "errorifexists"),
            SaveMode::Overwrite => write!(f, "overwrite"),
            SaveMode::Append => write!(f, "append"),
            SaveMode::Ignore => write!(f, "ignore"),
        }
    }
}

impl std::str::FromStr for SaveMode {
    type Err = SnowcheckError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "error" | "errorifexists" | "default" => Ok(SaveMode::ErrorIfExists),
            "overwrite" => Ok(SaveMode::Overwrite),
            "append" => Ok(SaveMode::Append),
            "ignore" => Ok(SaveMode::Ignore),
            _ => Err(SnowcheckError::InvalidArgument(format!(
                "Unknown save mode: {}. Valid values: errorifexists, overwrite, append, ignore",
                s
            ))),
        }
    }
}

/// String options handed unchanged to every read and write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectorOptions(BTreeMap<String, String>);

impl ConnectorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Copy of these options targeting `table`, with any query option dropped.
    pub fn with_table(&self, table: &str) -> Self {
        let mut options = self.clone();
        options.remove(OPTION_QUERY);
        options.with(OPTION_DBTABLE, table)
    }

    /// Copy of these options reading from `query`, with any table option dropped.
    pub fn with_query(&self, query: &str) -> Self {
        let mut options = self.clone();
        options.remove(OPTION_DBTABLE);
        options.with(OPTION_QUERY, query)
    }
}

impl From<BTreeMap<String, String>> for ConnectorOptions {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConnectorOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// One row of a statement result, addressed by position.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow(Vec<Value>);

impl ResultRow {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn get(&self, index: usize) -> Result<&Value> {
        self.0.get(index).ok_or_else(|| {
            SnowcheckError::Warehouse(format!(
                "column index {} out of range for a row of {} columns",
                index,
                self.0.len()
            ))
        })
    }

    /// String rendering of the value at `index`; nulls are an error.
    pub fn get_string(&self, index: usize) -> Result<String> {
        match self.get(index)? {
            Value::Null => Err(SnowcheckError::Warehouse(format!(
                "column {} is null",
                index
            ))),
            Value::String(s) => Ok(s.clone()),
            other => Ok(other.to_string()),
        }
    }
}

/// A lazily consumed statement result. Rows are pulled one at a time and
/// may fail individually, like a cursor.
pub struct ResultSet {
    columns: Vec<String>,
    rows: Box<dyn Iterator<Item = Result<ResultRow>> + Send>,
}

impl ResultSet {
    pub fn new<I>(columns: Vec<String>, rows: I) -> Self
    where
        I: IntoIterator<Item = Result<ResultRow>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            columns,
            rows: Box::new(rows.into_iter()),
        }
    }

    pub fn from_rows(columns: Vec<String>, rows: Vec<ResultRow>) -> Self {
        Self::new(columns, rows.into_iter().map(Ok))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl Iterator for ResultSet {
    type Item = Result<ResultRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }
}

impl fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSet")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

/// Records the SQL a session pushes down to the warehouse. Sessions receive a
/// clone at construction and call [`QueryRecorder::record`] for every query
/// they issue; the harness reads it back for pushdown checks.
#[derive(Debug, Clone, Default)]
pub struct QueryRecorder {
    history: Arc<Mutex<Vec<String>>>,
}

impl QueryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, sql: impl Into<String>) {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(sql.into());
    }

    /// The most recently issued query, if any.
    pub fn last(&self) -> Option<String> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .last()
            .cloned()
    }

    pub fn history(&self) -> Vec<String> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

/// Quote a warehouse identifier exactly as given, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
