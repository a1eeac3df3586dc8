use std::path::PathBuf;

use clap::{ArgAction, Parser};
use collector_data::{misc::parsing::Interval, DEFAULT_TIMESTEP};

/// Log GPU memory usage for the lifetime of a SLURM job.
#[derive(Debug, Clone, PartialEq, Parser)]
#[command(name = "gpu-mem-log", version, disable_version_flag = true)]
pub struct Args {
    #[allow(dead_code)]
    #[arg(short = 'v', long, action = ArgAction::Version)]
    version: Option<bool>,

    /// SLURM job ID.
    #[arg(short, long)]
    pub job_id: String,

    /// Directory in which to create the log.
    #[arg(short, long, default_value = ".")]
    pub outdir: PathBuf,

    /// How often to query the memory usage: seconds, or a duration like `500ms`, `1m`.
    #[arg(short, long, default_value_t = Interval(DEFAULT_TIMESTEP))]
    pub timestep: Interval,
}
