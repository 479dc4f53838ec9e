use regex::Regex;
use tracing::info;

use crate::{
    warehouse::{quote_identifier, Connection, ResultSet},
    Result, SnowcheckError,
};

pub const SHOW_TABLES_SQL: &str = "show tables";

/// Position of the table name in a `show tables` row (after `created_on`).
pub const SHOW_TABLES_NAME_COLUMN: usize = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Every table name the pattern matched, in listing order.
    pub matched: Vec<String>,
    /// Tables actually dropped; empty in print-only mode.
    pub dropped: Vec<String>,
}

/// Drops warehouse tables whose whole name matches a pattern. Used to clear
/// out tables left behind by aborted test runs.
#[derive(Debug, Clone)]
pub struct TablePruner {
    pattern: Regex,
}

impl TablePruner {
    pub fn new(pattern: &str) -> Result<Self> {
        let anchored = format!("^(?:{})$", pattern);
        let pattern = Regex::new(&anchored).map_err(|e| {
            SnowcheckError::InvalidArgument(format!("Invalid table pattern '{}': {}", pattern, e))
        })?;
        Ok(Self { pattern })
    }

    pub fn matches(&self, table: &str) -> bool {
        self.pattern.is_match(table)
    }

    /// Matching table names from a `show tables` result, pulled lazily.
    /// Cursor errors are passed through.
    pub fn candidates(&self, tables: ResultSet) -> impl Iterator<Item = Result<String>> + '_ {
        tables
            .map(|row| row.and_then(|r| r.get_string(SHOW_TABLES_NAME_COLUMN)))
            .filter(move |name| match name {
                Ok(name) => self.matches(name),
                Err(_) => true,
            })
    }

    /// List tables and drop each match as it is found. With `print_only`
    /// nothing is dropped; the matches are only logged and reported.
    ///
    /// Drops are independent statements. A failing drop stops the pass and
    /// tables already dropped stay dropped.
    pub async fn prune<C>(&self, conn: &mut C, print_only: bool) -> Result<PruneReport>
    where
        C: Connection + ?Sized,
    {
        let tables = conn.execute_query(SHOW_TABLES_SQL).await?;
        let mut report = PruneReport::default();

        for name in self.candidates(tables) {
            let name = name?;
            if print_only {
                info!("table to be dropped: {}", name);
            } else {
                conn.execute_update(&format!("drop table {}", quote_identifier(&name)))
                    .await?;
                info!("dropped table {}", name);
                report.dropped.push(name.clone());
            }
            report.matched.push(name);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Value;
    use crate::warehouse::ResultRow;

    fn listing(names: &[&str]) -> ResultSet {
        let rows = names
            .iter()
            .map(|name| {
                ResultRow::new(vec![
                    Value::String("2024-01-01 00:00:00".to_string()),
                    Value::String(name.to_string()),
                ])
            })
            .collect();
        ResultSet::from_rows(vec!["created_on".to_string(), "name".to_string()], rows)
    }

    #[test]
    fn test_full_match_only() {
        let pruner = TablePruner::new(r"TEST_TABLE_\d+").unwrap();
        assert!(pruner.matches("TEST_TABLE_1"));
        assert!(!pruner.matches("MY_TEST_TABLE_1"));
        assert!(!pruner.matches("TEST_TABLE_1_BAK"));
    }

    #[test]
    fn test_alternation_is_anchored_as_a_whole() {
        let pruner = TablePruner::new("A|B").unwrap();
        assert!(pruner.matches("A"));
        assert!(pruner.matches("B"));
        assert!(!pruner.matches("AB"));
        assert!(!pruner.matches("XA"));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = TablePruner::new("TEST_(").unwrap_err();
        assert!(matches!(err, SnowcheckError::InvalidArgument(_)));
    }

    #[test]
    fn test_candidates_filter_listing() {
        let pruner = TablePruner::new(r".*TEST_TABLE_.*\d+").unwrap();
        let names: Vec<String> = pruner
            .candidates(listing(&["TEST_TABLE_1", "OTHER", "TEST_TABLE_22"]))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(names, vec!["TEST_TABLE_1", "TEST_TABLE_22"]);
    }

    #[test]
    fn test_candidates_pass_cursor_errors() {
        let pruner = TablePruner::new(".*").unwrap();
        let rows = vec![
            Ok(ResultRow::new(vec![Value::Null, Value::from("T1")])),
            Err(SnowcheckError::Warehouse("cursor closed".to_string())),
        ];
        let results: Vec<Result<String>> = pruner
            .candidates(ResultSet::new(Vec::new(), rows))
            .collect();
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }
}
