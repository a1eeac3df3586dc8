use derive_more::derive::{Deref, Display, Into};
use itertools::Itertools as _;
use thiserror::Error;

use crate::query::{run_command, QueryError};

/// What `sacct` prints for a start or end time that is not known yet.
pub const PENDING_SENTINEL: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deref, Into, Display)]
pub struct JobId(pub String);

/// One of the time columns of an accounting line.
///
/// Anything that is not the pending sentinel counts as populated; the value is not checked
/// to be a well-formed timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountingField {
    Pending,
    Populated(String),
}

impl AccountingField {
    pub fn from_token(token: &str) -> Self {
        if token.contains(PENDING_SENTINEL) {
            AccountingField::Pending
        } else {
            AccountingField::Populated(token.to_owned())
        }
    }

    pub fn is_populated(&self) -> bool {
        matches!(self, AccountingField::Populated(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTimes {
    pub start: AccountingField,
    pub end: AccountingField,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountingParseError {
    #[error("expected a value row on line 3, got {lines} line(s)")]
    MissingValueRow { lines: usize },
    #[error("value row `{row}` has no {column} column")]
    MissingColumn { row: String, column: &'static str },
}

impl JobTimes {
    /// Parses the output of `sacct -j <id> -o start,end -X`:
    ///
    /// ```text
    ///               Start                 End
    /// ------------------- -------------------
    /// 2024-01-01T10:00:00             Unknown
    /// ```
    ///
    /// The third line holds the values, first token start, second token end. Column order
    /// is fixed by the `-o start,end` argument, so the header is not consulted.
    pub fn parse_sacct(input: impl AsRef<str>) -> Result<Self, AccountingParseError> {
        let input = input.as_ref();
        let lines = input.lines().collect_vec();
        let Some(row) = lines.get(2) else {
            return Err(AccountingParseError::MissingValueRow { lines: lines.len() });
        };

        let mut tokens = row.split_whitespace();
        let missing = |column| AccountingParseError::MissingColumn {
            row: row.to_string(),
            column,
        };
        let start = tokens.next().ok_or_else(|| missing("start"))?;
        let end = tokens.next().ok_or_else(|| missing("end"))?;

        Ok(JobTimes {
            start: AccountingField::from_token(start),
            end: AccountingField::from_token(end),
        })
    }
}

/// Source of a job's start/end times.
pub trait Accounting {
    fn job_times(&mut self, job_id: &JobId) -> Result<JobTimes, QueryError>;
}

/// Asks the Slurm accounting database via `sacct`.
#[derive(Debug, Clone)]
pub struct Sacct {
    pub program: String,
}

impl Default for Sacct {
    fn default() -> Self {
        Self {
            program: "sacct".to_owned(),
        }
    }
}

impl Accounting for Sacct {
    fn job_times(&mut self, job_id: &JobId) -> Result<JobTimes, QueryError> {
        let output = run_command(&self.program, ["-j", job_id.as_str(), "-o", "start,end", "-X"])?;
        JobTimes::parse_sacct(&output).map_err(|e| QueryError::Malformed {
            program: self.program.clone(),
            reason: e.to_string(),
        })
    }
}
