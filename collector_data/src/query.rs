use std::{
    io,
    process::{Command, ExitStatus},
    string::FromUtf8Error,
    time::Duration,
};

use log::{debug, warn};
use thiserror::Error;

use crate::sampler::Sleeper;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("could not run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` failed with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("unexpected output from `{program}`: {reason}")]
    Malformed { program: String, reason: String },
    #[error("output of `{program}` is not valid UTF-8")]
    Utf8 {
        program: String,
        #[source]
        source: FromUtf8Error,
    },
}

impl QueryError {
    /// Busy nodes make scheduler and telemetry commands fail or return garbage now and
    /// then. Only a command that cannot be started at all is not worth another try.
    pub fn is_transient(&self) -> bool {
        !matches!(self, QueryError::Spawn { .. })
    }
}

/// Runs `program args…` to completion and returns its stdout.
pub fn run_command<I, S>(program: &str, args: I) -> Result<String, QueryError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| QueryError::Spawn {
            program: program.to_owned(),
            source,
        })?;

    if !output.status.success() {
        return Err(QueryError::Failed {
            program: program.to_owned(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    String::from_utf8(output.stdout).map_err(|source| QueryError::Utf8 {
        program: program.to_owned(),
        source,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of tries, including the first one. Never less than 1.
    pub attempts: u32,
    /// Wait before the second try; doubled for every further one.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Calls `f` until it succeeds, fails with a non-transient error, or the attempts are
    /// used up. The last error is returned as is.
    pub fn run<T, F>(&self, sleeper: &mut impl Sleeper, what: &str, mut f: F) -> Result<T, QueryError>
    where
        F: FnMut() -> Result<T, QueryError>,
    {
        let attempts = self.attempts.max(1);
        let mut wait = self.backoff;
        let mut attempt = 1;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && e.is_transient() => {
                    warn!("{what} failed (attempt {attempt}/{attempts}), retrying in {wait:?}: {e}");
                    sleeper.sleep(wait);
                    wait = wait.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => {
                    debug!("{what} failed for good after {attempt} attempt(s)");
                    return Err(e);
                }
            }
        }
    }
}
