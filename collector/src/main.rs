use std::io::Write;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser as _;
use log::{info, LevelFilter};

mod cli;
mod config;

use cli::Args;
use collector_data::{
    sampler::{Sampler, SamplerConfig, ThreadSleeper},
    slurm::{JobId, Sacct},
    telemetry::NvidiaSmi,
};
use config::Settings;

fn main() -> Result<()> {
    init_logger();
    let args = Args::parse();
    let settings = read_config()?;

    let config = SamplerConfig {
        job_id: JobId(args.job_id),
        outdir: args.outdir,
        timestep: args.timestep.into(),
        retry: settings.retry_policy(),
    };
    let mut accounting = Sacct {
        program: settings.sacct_command,
    };
    let mut telemetry = NvidiaSmi {
        program: settings.nvidia_smi_command,
    };

    let report = Sampler::new(&config, &mut accounting, &mut telemetry, &mut ThreadSleeper).run()?;
    info!(
        "Wrote {} line(s) from {} tick(s) to {}",
        report.lines_written,
        report.ticks,
        report.log_path.display()
    );

    Ok(())
}

fn init_logger() {
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Info)
        .parse_default_env()
        .init();
}

fn read_config() -> Result<Settings> {
    info!("Loading config");
    Settings::new()
        .map_err(anyhow::Error::new)
        .context("parsing config file")
}
