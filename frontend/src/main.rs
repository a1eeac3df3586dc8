mod cli;
mod data;
mod parse;
mod render;
mod view;

use std::io::Write;

use anyhow::{ensure, Context, Result};
use chrono::Local;
use clap::Parser as _;
use log::{info, warn, LevelFilter};

use cli::Args;
use render::Figure;

fn main() -> Result<()> {
    init_logger();
    let args = Args::parse();
    let mode = args.mode();

    parse::validate(&args.logfile).context("checking log file")?;
    ensure!(args.outdir.is_dir(), "Proposed output directory does not exist.");

    let table = parse::load(&args.logfile).context("loading log file")?;
    if !table.defects.is_empty() {
        warn!("Skipped {} defective row(s)", table.defects.len());
    }
    info!(
        "Loaded {} sample(s) of {} GPU(s)",
        table.rows.len(),
        table.devices().len()
    );

    ensure!(!table.is_empty(), "Log file contains no valid samples.");

    let figure = Figure::from_table(&table);
    for series in &figure.series {
        info!("{} = {}", series.label, series.device);
    }
    if mode.saves() {
        let path = figure.save_png(&args.outdir).context("saving plot")?;
        info!("Saved plot to {}", path.display());
    }
    if mode.views() {
        view::show(&figure).context("showing plot")?;
    }

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
