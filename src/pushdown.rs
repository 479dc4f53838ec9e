//! Checks that a query was pushed down to the warehouse as expected.

use tracing::info;

use crate::{
    compare::check_answer,
    schema::{Dataset, Row},
    warehouse::QueryRecorder,
    Result, SnowcheckError,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushdownCheck {
    /// Skip the SQL text comparison; rows are still compared.
    pub bypass: bool,
    /// Log the last issued query before comparing.
    pub print_sql: bool,
}

impl PushdownCheck {
    pub fn bypassed() -> Self {
        Self {
            bypass: true,
            ..Self::default()
        }
    }

    pub fn printing(mut self) -> Self {
        self.print_sql = true;
        self
    }
}

/// Drops every whitespace character and lower-cases the rest.
pub fn normalize_sql(sql: &str) -> String {
    sql.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn verify_pushdown(
    reference: &str,
    result: &Dataset,
    expected: &[Row],
    recorder: &QueryRecorder,
    check: PushdownCheck,
) -> Result<()> {
    check_answer(&result.rows, expected)?;

    let last_query = recorder.last();
    if check.print_sql {
        info!(
            target: "snowcheck::pushdown",
            "{}",
            last_query.as_deref().unwrap_or("<no query recorded>")
        );
    }

    if check.bypass {
        return Ok(());
    }

    let issued = last_query.ok_or_else(|| {
        SnowcheckError::Assertion(
            "no query was pushed down; nothing to compare against the reference".to_string(),
        )
    })?;

    let issued = normalize_sql(&issued);
    let reference = normalize_sql(reference);
    if issued != reference {
        return Err(SnowcheckError::Assertion(format!(
            "pushdown query mismatch\n  issued:    {}\n  reference: {}",
            issued, reference
        )));
    }

    Ok(())
}
