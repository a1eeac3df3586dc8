pub mod log_format;
pub mod misc;
pub mod query;
pub mod sampler;
pub mod slurm;
pub mod telemetry;

use std::time::Duration;

/// How often the accounting query is repeated while the job has not started yet.
pub const START_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_TIMESTEP: Duration = Duration::from_secs(2);
