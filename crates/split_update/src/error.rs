//! Typed failures surfaced by the split-update engine.
//!
//! Each variant maps to a process exit code so the CLI can switch on the
//! error kind instead of inspecting driver messages.

use std::fmt;

/// Exit code reported for statements the engine refuses to split.
pub const INVALID_STATEMENT_EXIT_CODE: u8 = 10;
/// Exit code reported when no column qualifies for range splitting.
pub const NO_USABLE_COLUMN_EXIT_CODE: u8 = 11;
/// Exit code reported for every other failure.
pub const GENERIC_EXIT_CODE: u8 = 1;

#[derive(Debug)]
/// Enumerates the failure kinds of a split-update run.
pub enum SplitError {
    /// Statement is not `UPDATE <table> SET ... [WHERE ...]`, carries a
    /// `LIMIT`, or targets more than one table.
    InvalidStatement { hint: String },
    /// No integer primary/unique/auto-increment column could be used, or the
    /// table has no rows to derive bounds from.
    NoUsableColumn { table: String },
    /// Chunk width must be strictly positive.
    InvalidSplitRange { value: i64 },
    /// The split column's `MIN`/`MAX` cannot be planned: inverted, or beyond
    /// the signed 64-bit range.
    InvalidKeyBounds { table: String, detail: String },
    /// `[MIN, MAX]` at the configured width needs more ranges than allowed.
    TooManyRanges { table: String, planned: u128, limit: u128 },
    /// One full pass finished with failed range transactions.
    TransactionsFailed { table: String, failed: u64 },
    /// Connectivity, catalog, or transaction failure from the driver.
    Database(anyhow::Error),
}

impl SplitError {
    /// Builds an invalid-statement error with a user-facing hint.
    pub fn invalid_statement(hint: impl Into<String>) -> Self {
        Self::InvalidStatement { hint: hint.into() }
    }

    /// Returns the process exit code associated with this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidStatement { .. } => INVALID_STATEMENT_EXIT_CODE,
            Self::NoUsableColumn { .. } => NO_USABLE_COLUMN_EXIT_CODE,
            Self::InvalidSplitRange { .. }
            | Self::InvalidKeyBounds { .. }
            | Self::TooManyRanges { .. }
            | Self::TransactionsFailed { .. }
            | Self::Database(_) => GENERIC_EXIT_CODE,
        }
    }

    /// Returns `true` when the caller may fall back to an unsplit update.
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self,
            Self::InvalidStatement { .. } | Self::NoUsableColumn { .. }
        )
    }
}

impl fmt::Display for SplitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidStatement { hint } => write!(f, "{hint}"),
            Self::NoUsableColumn { table } if table.is_empty() => {
                write!(f, "cannot detect any usable column for split update")
            }
            Self::NoUsableColumn { table } => write!(
                f,
                "cannot detect any usable column for split update of table '{table}'"
            ),
            Self::InvalidSplitRange { value } => {
                write!(f, "split range must be a positive integer, got {value}")
            }
            Self::InvalidKeyBounds { table, detail } => {
                write!(f, "[{table}] cannot plan key ranges: {detail}")
            }
            Self::TooManyRanges {
                table,
                planned,
                limit,
            } => write!(
                f,
                "[{table}] split would plan {planned} ranges (limit {limit}); raise --split"
            ),
            Self::TransactionsFailed { table, failed } => {
                write!(f, "[{table}] {failed} transactions failed")
            }
            Self::Database(err) => write!(f, "{err:#}"),
        }
    }
}

impl std::error::Error for SplitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Database(err) => Some(&**err),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for SplitError {
    fn from(err: anyhow::Error) -> Self {
        Self::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_distinguish_shape_and_column_failures() {
        assert_eq!(SplitError::invalid_statement("bad").exit_code(), 10);
        let no_column = SplitError::NoUsableColumn {
            table: "app.users".to_string(),
        };
        assert_eq!(no_column.exit_code(), 11);
        assert!(no_column.to_string().contains("'app.users'"));
        let failed = SplitError::TransactionsFailed {
            table: "app.users".to_string(),
            failed: 2,
        };
        assert_eq!(failed.exit_code(), 1);
        assert!(!failed.allows_fallback());
        assert_eq!(
            SplitError::Database(anyhow::anyhow!("lock wait timeout")).exit_code(),
            1
        );
    }

    #[test]
    fn unplannable_bounds_are_generic_failures_without_fallback() {
        let inverted = SplitError::InvalidKeyBounds {
            table: "app.users".to_string(),
            detail: "id bounds are inverted".to_string(),
        };
        assert_eq!(inverted.exit_code(), 1);
        assert!(!inverted.allows_fallback());
        let too_many = SplitError::TooManyRanges {
            table: "app.users".to_string(),
            planned: 92_233_720_368_548,
            limit: 1_000_000,
        };
        assert_eq!(too_many.exit_code(), 1);
        assert!(!too_many.allows_fallback());
        assert!(too_many.to_string().contains("raise --split"));
    }
}
