use tracing::info;
use uuid::Uuid;

use crate::{
    config::{init_logging, HarnessConfig},
    prune::{PruneReport, TablePruner},
    pushdown::{verify_pushdown, PushdownCheck},
    roundtrip::{round_trip, RoundTrip},
    schema::{Dataset, Row, Schema},
    warehouse::{Connection, ConnectorOptions, DataSession, QueryRecorder, SaveMode, SNOWFLAKE_SOURCE_NAME},
    Result,
};

/// Integration-test fixture: a warehouse connection, a data session, the
/// connector options shared by every read and write, and the recorder the
/// session reports pushed-down queries to.
///
/// The harness never opens or closes the connection or session; it only
/// drives them.
pub struct Harness<C, S> {
    conn: C,
    session: S,
    options: ConnectorOptions,
    recorder: QueryRecorder,
    format: String,
    table_prefix: String,
}

impl<C, S> Harness<C, S>
where
    C: Connection,
    S: DataSession,
{
    /// `recorder` must be the one handed to `session` at construction.
    pub fn new(conn: C, session: S, options: ConnectorOptions, recorder: QueryRecorder) -> Self {
        Self {
            conn,
            session,
            options,
            recorder,
            format: SNOWFLAKE_SOURCE_NAME.to_string(),
            table_prefix: "test_table_".to_string(),
        }
    }

    /// Build from a loaded config and install logging at its `log_level`.
    pub fn from_config(conn: C, session: S, config: &HarnessConfig, recorder: QueryRecorder) -> Self {
        init_logging(config.log_level);
        Self {
            conn,
            session,
            options: config.connector_options(),
            recorder,
            format: config.format.clone(),
            table_prefix: config.table_prefix.clone(),
        }
    }

    pub fn options(&self) -> &ConnectorOptions {
        &self.options
    }

    pub fn recorder(&self) -> &QueryRecorder {
        &self.recorder
    }

    pub fn connection(&mut self) -> &mut C {
        &mut self.conn
    }

    pub fn session(&mut self) -> &mut S {
        &mut self.session
    }

    /// A table name unique to this call, e.g. `test_table_3f2a...`.
    pub fn unique_table_name(&self) -> String {
        format!("{}{}", self.table_prefix, Uuid::new_v4().simple())
    }

    /// Run a statement directly on the connection.
    pub async fn jdbc_update(&mut self, sql: &str) -> Result<u64> {
        self.conn.execute_update(sql).await
    }

    pub async fn table_exists(&mut self, table: &str) -> Result<bool> {
        self.conn.table_exists(table).await
    }

    pub async fn read_table(&mut self, table: &str) -> Result<Dataset> {
        let options = self.options.with_table(table);
        self.session.read(&self.format, &options).await
    }

    pub async fn read_query(&mut self, query: &str) -> Result<Dataset> {
        let options = self.options.with_query(query);
        self.session.read(&self.format, &options).await
    }

    /// Check rows of `result` against `expected`, then (unless bypassed) the
    /// last pushed-down query against `reference`.
    pub fn test_pushdown(
        &self,
        reference: &str,
        result: &Dataset,
        expected: &[Row],
        check: PushdownCheck,
    ) -> Result<()> {
        verify_pushdown(reference, result, expected, &self.recorder, check)
    }

    pub async fn round_trip(
        &mut self,
        table: &str,
        source: &Dataset,
        expected_schema: Option<&Schema>,
        mode: SaveMode,
    ) -> Result<()> {
        let trip = RoundTrip {
            table,
            source,
            expected_schema,
            mode,
            format: &self.format,
            options: &self.options,
        };
        round_trip(&mut self.conn, &mut self.session, trip).await
    }

    /// Drop every table whose name fully matches `pattern`, or with
    /// `print_only` just report them.
    pub async fn drop_tables_matching(
        &mut self,
        pattern: &str,
        print_only: bool,
    ) -> Result<PruneReport> {
        let pruner = TablePruner::new(pattern)?;
        let report = pruner.prune(&mut self.conn, print_only).await?;
        info!(
            "{} tables matched '{}', {} dropped",
            report.matched.len(),
            pattern,
            report.dropped.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryConnection, MemorySession, MemoryWarehouse};
    use crate::row;
    use crate::schema::{Column, DataType};
    use std::io::Write;

    fn harness(warehouse: &MemoryWarehouse) -> Harness<MemoryConnection, MemorySession> {
        let recorder = QueryRecorder::new();
        Harness::new(
            warehouse.connect(),
            warehouse.session(recorder.clone()),
            ConnectorOptions::new().with("sfDatabase", "TEST_DB"),
            recorder,
        )
    }

    fn letters() -> Dataset {
        Dataset::new(
            Schema::new(vec![Column::new("L", DataType::String, false)]),
            vec![row!["a"], row!["b"]],
        )
    }

    #[test]
    fn test_unique_table_names() {
        let warehouse = MemoryWarehouse::new();
        let h = harness(&warehouse);
        let a = h.unique_table_name();
        let b = h.unique_table_name();
        assert!(a.starts_with("test_table_"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_read_table_and_pushdown() {
        let warehouse = MemoryWarehouse::new();
        warehouse.create_table("LETTERS", letters());
        let mut h = harness(&warehouse);

        let result = h.read_table("letters").await.unwrap();
        h.test_pushdown(
            r#"select * from ( letters ) "SF_CONNECTOR_QUERY_ALIAS""#,
            &result,
            &[row!["b"], row!["a"]],
            PushdownCheck::default(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_round_trip_through_harness() {
        let warehouse = MemoryWarehouse::new();
        let mut h = harness(&warehouse);
        let table = h.unique_table_name();

        h.round_trip(&table, &letters(), None, SaveMode::ErrorIfExists)
            .await
            .unwrap();
        assert!(!h.table_exists(&table).await.unwrap());
    }

    #[tokio::test]
    async fn test_jdbc_update_and_prune() {
        let warehouse = MemoryWarehouse::new();
        warehouse.create_table("TEST_TABLE_1", letters());
        warehouse.create_table("KEEP_ME", letters());
        let mut h = harness(&warehouse);

        let preview = h.drop_tables_matching("TEST_TABLE_.*", true).await.unwrap();
        assert_eq!(preview.matched, vec!["TEST_TABLE_1"]);
        assert!(preview.dropped.is_empty());

        h.jdbc_update("drop table keep_me").await.unwrap();
        assert_eq!(warehouse.table_names(), vec!["TEST_TABLE_1"]);
    }

    fn config_file(format: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            "version: 1\n\
             options:\n  \
               sfURL: acct.snowflakecomputing.com\n  \
               sfUser: tester\n  \
               sfDatabase: TEST_DB\n  \
               sfSchema: PUBLIC\n\
             format: {}\n\
             log_level: debug\n\
             table_prefix: rt_case_\n",
            format
        )
        .unwrap();
        file
    }

    #[tokio::test]
    async fn test_from_config_applies_settings() {
        let file = config_file(SNOWFLAKE_SOURCE_NAME);
        let config = HarnessConfig::from_file(file.path()).unwrap();
        let warehouse = MemoryWarehouse::new();
        let recorder = QueryRecorder::new();
        let mut h = Harness::from_config(
            warehouse.connect(),
            warehouse.session(recorder.clone()),
            &config,
            recorder,
        );

        assert_eq!(h.options().get("sfSchema"), Some("PUBLIC"));
        let table = h.unique_table_name();
        assert!(table.starts_with("rt_case_"));

        h.round_trip(&table, &letters(), None, SaveMode::Overwrite)
            .await
            .unwrap();
        assert!(warehouse.table_names().is_empty());
    }

    #[tokio::test]
    async fn test_from_config_uses_configured_format() {
        let file = config_file("snowflake");
        let config = HarnessConfig::from_file(file.path()).unwrap();
        let warehouse = MemoryWarehouse::new();
        warehouse.create_table("LETTERS", letters());
        let recorder = QueryRecorder::new();
        let mut h = Harness::from_config(
            warehouse.connect(),
            warehouse.session(recorder.clone()),
            &config,
            recorder,
        );

        let err = h.read_table("letters").await.unwrap_err();
        assert!(err.to_string().contains("Failed to find data source: snowflake"));

        let err = h
            .round_trip("rt_fmt", &letters(), None, SaveMode::Overwrite)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to find data source: snowflake"));
    }
}
