use crate::{
    schema::{Row, Schema},
    Result, SnowcheckError,
};

/// Difference between two row multisets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowDiff {
    /// Expected rows with no counterpart in the actual result.
    pub missing: Vec<Row>,
    /// Actual rows with no counterpart in the expectation.
    pub unexpected: Vec<Row>,
}

impl RowDiff {
    /// Multiset difference. Each expected row consumes at most one equal
    /// actual row, so duplicates are counted.
    pub fn between(actual: &[Row], expected: &[Row]) -> Self {
        let mut remaining: Vec<Option<&Row>> = actual.iter().map(Some).collect();
        let mut missing = Vec::new();

        for row in expected {
            let found = remaining
                .iter_mut()
                .find(|candidate| candidate.map_or(false, |c| c == row));
            match found {
                Some(slot) => *slot = None,
                None => missing.push(row.clone()),
            }
        }

        let unexpected = remaining.into_iter().flatten().cloned().collect();
        Self {
            missing,
            unexpected,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }

    fn describe(&self, actual_len: usize, expected_len: usize) -> String {
        let mut message = format!(
            "results do not match: expected {} rows, got {}",
            expected_len, actual_len
        );
        if !self.missing.is_empty() {
            message.push_str("\nmissing rows:");
            for row in &self.missing {
                message.push_str(&format!("\n  {}", row));
            }
        }
        if !self.unexpected.is_empty() {
            message.push_str("\nunexpected rows:");
            for row in &self.unexpected {
                message.push_str(&format!("\n  {}", row));
            }
        }
        message
    }
}

/// Compare result rows against expected rows, ignoring order.
pub fn check_answer(actual: &[Row], expected: &[Row]) -> Result<()> {
    let diff = RowDiff::between(actual, expected);
    if diff.is_empty() {
        Ok(())
    } else {
        Err(SnowcheckError::Assertion(
            diff.describe(actual.len(), expected.len()),
        ))
    }
}

/// Compare result rows against expected rows position by position, for
/// results whose order is part of the contract.
pub fn check_answer_ordered(actual: &[Row], expected: &[Row]) -> Result<()> {
    if actual.len() != expected.len() {
        return Err(SnowcheckError::Assertion(format!(
            "results do not match: expected {} rows, got {}",
            expected.len(),
            actual.len()
        )));
    }

    match actual.iter().zip(expected).position(|(a, e)| a != e) {
        None => Ok(()),
        Some(index) => Err(SnowcheckError::Assertion(format!(
            "results differ at row {}: expected {}, got {}",
            index, expected[index], actual[index]
        ))),
    }
}

pub fn check_schema(actual: &Schema, expected: &Schema) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(SnowcheckError::Assertion(format!(
            "schema mismatch: expected {}, got {}",
            expected, actual
        )))
    }
}
