//! Execution results and per-statement information.

use std::time::Duration;

use hdb_protocol::ServerError;

/// Rows-affected value reported for "success, count unknown".
pub const SUCCESS_NO_INFO: i32 = -2;
/// Rows-affected value reported for "execution failed".
pub const EXECUTION_FAILED: i32 = -3;

/// Outcome of one row of an execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCount {
    /// Number of rows affected.
    Rows(u64),
    /// Success without a row count.
    SuccessNoInfo,
    /// The row failed.
    ExecutionFailed,
}

impl From<i32> for RowCount {
    fn from(raw: i32) -> Self {
        match raw {
            SUCCESS_NO_INFO => Self::SuccessNoInfo,
            EXECUTION_FAILED => Self::ExecutionFailed,
            n => Self::Rows(u64::try_from(n).unwrap_or(0)),
        }
    }
}

/// Result of an `exec`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    counts: Vec<RowCount>,
}

impl ExecResult {
    pub(crate) fn from_raw(raw: &[i32]) -> Self {
        Self {
            counts: raw.iter().copied().map(RowCount::from).collect(),
        }
    }

    pub(crate) fn extend(&mut self, other: Self) {
        self.counts.extend(other.counts);
    }

    /// Total rows affected; unknown and failed counts add nothing.
    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        self.counts
            .iter()
            .map(|c| match c {
                RowCount::Rows(n) => *n,
                _ => 0,
            })
            .sum()
    }

    /// Per-row outcome in execution order.
    #[must_use]
    pub fn counts(&self) -> &[RowCount] {
        &self.counts
    }
}

/// Information about the last statement a session executed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementInfo {
    /// Warnings the server returned.
    pub warnings: Vec<ServerError>,
    /// Server-side execution time.
    pub server_execution_time: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_counts() {
        let result = ExecResult::from_raw(&[1, SUCCESS_NO_INFO, 3, EXECUTION_FAILED]);
        assert_eq!(result.rows_affected(), 4);
        assert_eq!(
            result.counts(),
            &[
                RowCount::Rows(1),
                RowCount::SuccessNoInfo,
                RowCount::Rows(3),
                RowCount::ExecutionFailed
            ]
        );
    }

    #[test]
    fn test_extend() {
        let mut total = ExecResult::from_raw(&[2]);
        total.extend(ExecResult::from_raw(&[2]));
        total.extend(ExecResult::from_raw(&[1]));
        assert_eq!(total.rows_affected(), 5);
        assert_eq!(total.counts().len(), 3);
    }
}
