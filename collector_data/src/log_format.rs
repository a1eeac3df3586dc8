//! The `gpu.log` file shared by the collector and the frontend.
//!
//! ```text
//! # GPU memory log
//! timestamp, uuid, memory.used [MiB]
//! 2024/01/01 00:00:00.000, GPU-1c7a…, 1000 MiB
//! ```
//!
//! Line 1 is [`LOG_MARKER`], line 2 the CSV header as printed by the telemetry command, every
//! further line one device reading. Rows are only ever appended.

use std::{
    fs::{File, OpenOptions},
    io::{self, Write as _},
    path::{Path, PathBuf},
};

use log::debug;

pub const LOG_FILE_NAME: &str = "gpu.log";
pub const LOG_MARKER: &str = "# GPU memory log";
pub const PLOT_FILE_NAME: &str = "gpu_log.png";
pub const TELEMETRY_FIELDS: &str = "timestamp,uuid,memory.used";

pub const COLUMN_TIMESTAMP: &str = "timestamp";
pub const COLUMN_UUID: &str = "uuid";
/// Prefix only, `nvidia-smi` appends the unit (`memory.used [MiB]`).
pub const COLUMN_MEMORY_USED: &str = "memory.used";

#[derive(Debug)]
pub struct LogWriter {
    path: PathBuf,
    has_header: bool,
}

impl LogWriter {
    /// Creates (or truncates) `<outdir>/gpu.log` and writes the marker line.
    pub fn create(outdir: impl AsRef<Path>) -> io::Result<Self> {
        let path = outdir.as_ref().join(LOG_FILE_NAME);
        let mut file = File::create(&path)?;
        writeln!(file, "{LOG_MARKER}")?;
        debug!("created {}", path.display());
        Ok(Self {
            path,
            has_header: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one telemetry response. Its header row goes in only the first time, so the
    /// file carries exactly one CSV header. The file is closed again before returning;
    /// a kill between ticks leaves every completed append on disk.
    ///
    /// Returns the number of data rows written.
    pub fn append_telemetry(&mut self, response: &str) -> io::Result<usize> {
        let mut lines = response.lines();
        let header = lines.next();
        let rows: Vec<&str> = lines.filter(|line| !line.trim().is_empty()).collect();

        let mut buf = String::new();
        if !self.has_header {
            if let Some(header) = header {
                buf.push_str(header);
                buf.push('\n');
            }
        }
        for row in &rows {
            buf.push_str(row);
            buf.push('\n');
        }

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(buf.as_bytes())?;
        file.flush()?;
        if header.is_some() {
            self.has_header = true;
        }

        Ok(rows.len())
    }
}
