//! An in-memory warehouse implementing [`Connection`] and [`DataSession`].
//!
//! It models just enough of Snowflake for the harness to be exercised without
//! an account: identifier case rules, `show tables`, `drop table [if exists]`,
//! save modes, and query recording on reads. Queries other than table scans
//! are answered from results registered with [`MemoryWarehouse::stub_query`].

use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::{
    pushdown::normalize_sql,
    schema::{Dataset, Value},
    warehouse::{
        Connection, ConnectorOptions, DataSession, QueryRecorder, ResultRow, ResultSet, SaveMode,
        OPTION_DBTABLE, OPTION_QUERY, SNOWFLAKE_SOURCE_NAME,
    },
    Result, SnowcheckError,
};

const SHOW_TABLES_COLUMNS: [&str; 5] = ["created_on", "name", "database_name", "schema_name", "kind"];
const CREATED_ON: &str = "1970-01-01 00:00:00.000 +0000";
const QUERY_ALIAS: &str = "SF_CONNECTOR_QUERY_ALIAS";

#[derive(Debug, Default)]
struct WarehouseState {
    tables: BTreeMap<String, Dataset>,
    statements: Vec<String>,
    commits: usize,
    stubs: Vec<(String, Dataset)>,
    failing: Vec<String>,
}

impl WarehouseState {
    fn check_failure(&self, sql: &str) -> Result<()> {
        let lowered = sql.to_lowercase();
        match self.failing.iter().find(|needle| lowered.contains(needle.as_str())) {
            Some(needle) => Err(SnowcheckError::Warehouse(format!(
                "statement rejected (matched '{}'): {}",
                needle, sql
            ))),
            None => Ok(()),
        }
    }
}

/// Shared handle to the in-memory warehouse. Clones see the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    state: Arc<Mutex<WarehouseState>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WarehouseState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection {
            warehouse: self.clone(),
        }
    }

    /// A session that records every query it pushes down into `recorder`.
    pub fn session(&self, recorder: QueryRecorder) -> MemorySession {
        MemorySession {
            warehouse: self.clone(),
            recorder,
        }
    }

    pub fn create_table(&self, name: &str, dataset: Dataset) {
        self.lock().tables.insert(resolve_identifier(name), dataset);
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.lock().tables.contains_key(&resolve_identifier(name))
    }

    pub fn table(&self, name: &str) -> Option<Dataset> {
        self.lock().tables.get(&resolve_identifier(name)).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.lock().tables.keys().cloned().collect()
    }

    /// Update statements executed so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    /// Answer reads of `sql` (compared whitespace- and case-insensitively)
    /// with `result`.
    pub fn stub_query(&self, sql: &str, result: Dataset) {
        self.lock().stubs.push((normalize_sql(sql), result));
    }

    /// Make every statement containing `needle` (case-insensitive) fail with
    /// a warehouse error.
    pub fn fail_statements_matching(&self, needle: &str) {
        self.lock().failing.push(needle.to_lowercase());
    }
}

/// Snowflake identifier rules: quoted names are kept verbatim, unquoted names
/// are upper-cased.
pub fn resolve_identifier(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].replace("\"\"", "\"")
    } else {
        trimmed.to_uppercase()
    }
}

#[derive(Debug, Clone)]
pub struct MemoryConnection {
    warehouse: MemoryWarehouse,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute_query(&mut self, sql: &str) -> Result<ResultSet> {
        let state = self.warehouse.lock();
        state.check_failure(sql)?;

        let normalized = normalize_sql(sql);
        if normalized == "showtables" {
            let rows: Vec<ResultRow> = state
                .tables
                .keys()
                .map(|name| {
                    ResultRow::new(vec![
                        Value::from(CREATED_ON),
                        Value::from(name.as_str()),
                        Value::from("TEST_DB"),
                        Value::from("PUBLIC"),
                        Value::from("TABLE"),
                    ])
                })
                .collect();
            let columns = SHOW_TABLES_COLUMNS.iter().map(|c| c.to_string()).collect();
            return Ok(ResultSet::from_rows(columns, rows));
        }

        let stub = state
            .stubs
            .iter()
            .find(|(query, _)| *query == normalized)
            .map(|(_, dataset)| dataset.clone())
            .ok_or_else(|| {
                SnowcheckError::Warehouse(format!("SQL compilation error: unsupported query: {}", sql))
            })?;

        let columns = stub
            .schema
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        let rows = stub
            .rows
            .into_iter()
            .map(|row| ResultRow::new(row.0))
            .collect();
        Ok(ResultSet::from_rows(columns, rows))
    }

    async fn execute_update(&mut self, sql: &str) -> Result<u64> {
        let mut state = self.warehouse.lock();
        state.check_failure(sql)?;

        let drop_pattern = Regex::new(r"(?is)^\s*drop\s+table\s+(if\s+exists\s+)?(.+?)\s*;?\s*$")
            .map_err(|e| SnowcheckError::General(e.into()))?;

        if let Some(caps) = drop_pattern.captures(sql) {
            let if_exists = caps.get(1).is_some();
            let name = resolve_identifier(&caps[2]);
            if state.tables.remove(&name).is_none() && !if_exists {
                return Err(SnowcheckError::Warehouse(format!(
                    "SQL compilation error: Table '{}' does not exist or not authorized.",
                    name
                )));
            }
            debug!("memory warehouse dropped {}", name);
        }

        state.statements.push(sql.to_string());
        Ok(0)
    }

    async fn commit(&mut self) -> Result<()> {
        self.warehouse.lock().commits += 1;
        Ok(())
    }

    async fn table_exists(&mut self, name: &str) -> Result<bool> {
        Ok(self.warehouse.has_table(name))
    }
}

#[derive(Debug, Clone)]
pub struct MemorySession {
    warehouse: MemoryWarehouse,
    recorder: QueryRecorder,
}

fn check_format(format: &str) -> Result<()> {
    if format == SNOWFLAKE_SOURCE_NAME {
        Ok(())
    } else {
        Err(SnowcheckError::Warehouse(format!(
            "Failed to find data source: {}",
            format
        )))
    }
}

#[async_trait]
impl DataSession for MemorySession {
    async fn write(
        &mut self,
        dataset: &Dataset,
        format: &str,
        options: &ConnectorOptions,
        mode: SaveMode,
    ) -> Result<()> {
        check_format(format)?;
        let raw = options.get(OPTION_DBTABLE).ok_or_else(|| {
            SnowcheckError::Warehouse("the dbtable option is required for writes".to_string())
        })?;
        let name = resolve_identifier(raw);

        let mut state = self.warehouse.lock();
        let existing = state.tables.get_mut(&name);
        match (mode, existing) {
            (SaveMode::ErrorIfExists, Some(_)) => {
                return Err(SnowcheckError::Warehouse(format!(
                    "Table {} already exists. (SaveMode: ErrorIfExists)",
                    name
                )))
            }
            (SaveMode::Ignore, Some(_)) => {}
            (SaveMode::Append, Some(existing)) => {
                if existing.schema != dataset.schema {
                    return Err(SnowcheckError::Warehouse(format!(
                        "cannot append to {}: schema {} does not match {}",
                        name, dataset.schema, existing.schema
                    )));
                }
                existing.rows.extend(dataset.rows.iter().cloned());
            }
            (SaveMode::Overwrite, Some(existing)) => *existing = dataset.clone(),
            (_, None) => {
                state.tables.insert(name.clone(), dataset.clone());
            }
        }

        debug!("memory warehouse wrote {} rows to {} ({})", dataset.num_rows(), name, mode);
        Ok(())
    }

    async fn read(&mut self, format: &str, options: &ConnectorOptions) -> Result<Dataset> {
        check_format(format)?;

        if let Some(query) = options.get(OPTION_QUERY) {
            self.recorder.record(query);
            let normalized = normalize_sql(query);
            let state = self.warehouse.lock();
            return state
                .stubs
                .iter()
                .find(|(stubbed, _)| *stubbed == normalized)
                .map(|(_, dataset)| dataset.clone())
                .ok_or_else(|| {
                    SnowcheckError::Warehouse(format!("no result stubbed for query: {}", query))
                });
        }

        let raw = options.get(OPTION_DBTABLE).ok_or_else(|| {
            SnowcheckError::Warehouse("either dbtable or query must be set".to_string())
        })?;
        self.recorder
            .record(format!("SELECT * FROM ( {} ) \"{}\"", raw, QUERY_ALIAS));

        let name = resolve_identifier(raw);
        self.warehouse.table(&name).ok_or_else(|| {
            SnowcheckError::Warehouse(format!(
                "SQL compilation error: Object '{}' does not exist or not authorized.",
                name
            ))
        })
    }
}
