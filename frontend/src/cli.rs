use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// Plot a GPU memory log written by `gpu-mem-log`.
#[derive(Debug, Clone, PartialEq, Parser)]
#[command(name = "gpu-mem-view", version, disable_version_flag = true)]
pub struct Args {
    #[allow(dead_code)]
    #[arg(short = 'v', long, action = ArgAction::Version)]
    version: Option<bool>,

    /// Path to the log file (`gpu.log`).
    #[arg(short, long, default_value = ".")]
    pub logfile: PathBuf,

    /// Directory in which to save `gpu_log.png`.
    #[arg(short, long, default_value = ".")]
    pub outdir: PathBuf,

    /// Only save the plot, do not show it.
    #[arg(short, long, conflicts_with = "view_only")]
    pub save_only: bool,

    /// Only show the plot, do not save it.
    #[arg(short = 'V', long)]
    pub view_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    SaveAndView,
    SaveOnly,
    ViewOnly,
}

impl OutputMode {
    pub fn saves(self) -> bool {
        self != OutputMode::ViewOnly
    }

    pub fn views(self) -> bool {
        self != OutputMode::SaveOnly
    }
}

impl Args {
    pub fn mode(&self) -> OutputMode {
        match (self.save_only, self.view_only) {
            (true, _) => OutputMode::SaveOnly,
            (_, true) => OutputMode::ViewOnly,
            _ => OutputMode::SaveAndView,
        }
    }
}
