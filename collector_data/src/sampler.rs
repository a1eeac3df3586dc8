use std::{
    io,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use log::{debug, info};
use thiserror::Error;

use crate::{
    log_format::{LogWriter, LOG_FILE_NAME},
    query::{QueryError, RetryPolicy},
    slurm::{Accounting, JobId, JobTimes},
    telemetry::Telemetry,
    START_POLL_INTERVAL,
};

/// Everything a sampling run needs to know, fixed for the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerConfig {
    pub job_id: JobId,
    pub outdir: PathBuf,
    /// Pause between two telemetry reads while logging.
    pub timestep: Duration,
    pub retry: RetryPolicy,
}

pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("Proposed output directory {} does not exist.", .0.display())]
    MissingOutdir(PathBuf),
    #[error("querying job accounting for {job_id}")]
    Accounting {
        job_id: JobId,
        #[source]
        source: QueryError,
    },
    #[error("querying GPU telemetry")]
    Telemetry(#[source] QueryError),
    #[error("writing log file {}", .path.display())]
    Log {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Waiting,
    Logging,
    Done,
}

/// What happened during a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerReport {
    /// Accounting queries issued before the job was seen running.
    pub waiting_polls: usize,
    /// Telemetry reads appended to the log.
    pub ticks: usize,
    pub lines_written: usize,
    pub log_path: PathBuf,
}

/// Waits for a job to start, then logs GPU memory until the job has ended.
pub struct Sampler<'a, A, T, S> {
    config: &'a SamplerConfig,
    accounting: &'a mut A,
    telemetry: &'a mut T,
    sleeper: &'a mut S,
    state: SamplerState,
}

impl<'a, A, T, S> Sampler<'a, A, T, S>
where
    A: Accounting,
    T: Telemetry,
    S: Sleeper,
{
    pub fn new(config: &'a SamplerConfig, accounting: &'a mut A, telemetry: &'a mut T, sleeper: &'a mut S) -> Self {
        Self {
            config,
            accounting,
            telemetry,
            sleeper,
            state: SamplerState::Waiting,
        }
    }

    /// Runs the WAITING → LOGGING → DONE machine to completion.
    ///
    /// The output directory is checked before anything is queried.
    pub fn run(mut self) -> Result<SamplerReport, SamplerError> {
        check_outdir(&self.config.outdir)?;

        let waiting_polls = self.wait_for_start()?;
        self.state = SamplerState::Logging;

        info!("Starting logging");
        let mut writer = LogWriter::create(&self.config.outdir)
            .map_err(log_error(&self.config.outdir.join(LOG_FILE_NAME)))?;

        let mut ticks = 0;
        let mut lines_written = 0;
        while self.state == SamplerState::Logging {
            let response = self.query_telemetry()?;
            lines_written += writer
                .append_telemetry(&response)
                .map_err(log_error(writer.path()))?;
            ticks += 1;
            debug!("tick {ticks}: {lines_written} line(s) so far");

            if self.query_job()?.end.is_populated() {
                info!("Job finished");
                self.state = SamplerState::Done;
            } else {
                self.sleeper.sleep(self.config.timestep);
            }
        }

        info!("Finishing logging and closing");
        Ok(SamplerReport {
            waiting_polls,
            ticks,
            lines_written,
            log_path: writer.path().to_path_buf(),
        })
    }

    fn wait_for_start(&mut self) -> Result<usize, SamplerError> {
        let mut polls = 0;
        loop {
            info!("Waiting for job to start (if not already started)");
            polls += 1;
            if self.query_job()?.start.is_populated() {
                info!("Job started");
                return Ok(polls);
            }
            self.sleeper.sleep(START_POLL_INTERVAL);
        }
    }

    fn query_job(&mut self) -> Result<JobTimes, SamplerError> {
        let config = self.config;
        config
            .retry
            .run(&mut *self.sleeper, "accounting query", || {
                self.accounting.job_times(&config.job_id)
            })
            .map_err(|source| SamplerError::Accounting {
                job_id: config.job_id.clone(),
                source,
            })
    }

    fn query_telemetry(&mut self) -> Result<String, SamplerError> {
        self.config
            .retry
            .run(&mut *self.sleeper, "telemetry query", || self.telemetry.query())
            .map_err(SamplerError::Telemetry)
    }
}

fn log_error(path: &Path) -> impl FnOnce(io::Error) -> SamplerError {
    let path = path.to_path_buf();
    move |source| SamplerError::Log { path, source }
}

pub fn check_outdir(outdir: &Path) -> Result<(), SamplerError> {
    if outdir.is_dir() {
        Ok(())
    } else {
        Err(SamplerError::MissingOutdir(outdir.to_path_buf()))
    }
}
