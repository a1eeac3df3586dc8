use std::{
    fs::{self, File},
    io::{self, BufRead as _, BufReader},
    path::{Path, PathBuf},
};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use collector_data::{
    log_format::{COLUMN_MEMORY_USED, COLUMN_TIMESTAMP, COLUMN_UUID, LOG_FILE_NAME, LOG_MARKER},
    misc::parsing::{leading_digits, split_csv_line},
};
use itertools::Itertools as _;
use log::warn;
use thiserror::Error;

use crate::data::{DeviceId, MemoryMib, RowDefect, Sample, Table};

/// Why a path is not accepted as a GPU memory log.
#[derive(Debug, Error)]
pub enum LogFormatError {
    #[error("Specified log file {} does not exist.", .0.display())]
    NotFound(PathBuf),
    #[error("Log file should be called {}, got {}.", LOG_FILE_NAME, .0.display())]
    WrongName(PathBuf),
    #[error("{} does not look like a GPU memory log file (first line is not `{}`).", .0.display(), LOG_MARKER)]
    BadHeader(PathBuf),
    #[error("reading {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("reading {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} has no CSV header line", .0.display())]
    MissingHeader(PathBuf),
    #[error("{} has no `{column}` column (header: `{header}`)", .path.display())]
    MissingColumn {
        path: PathBuf,
        column: &'static str,
        header: String,
    },
}

/// Checks, in this order, that `path` is an existing file, is named `gpu.log` and starts with
/// the marker line.
pub fn validate(path: impl AsRef<Path>) -> Result<(), LogFormatError> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(LogFormatError::NotFound(path.to_path_buf()));
    }

    if path.file_name().and_then(|name| name.to_str()) != Some(LOG_FILE_NAME) {
        return Err(LogFormatError::WrongName(path.to_path_buf()));
    }

    let io_err = |source| LogFormatError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut first_line = Vec::new();
    BufReader::new(File::open(path).map_err(io_err)?)
        .read_until(b'\n', &mut first_line)
        .map_err(io_err)?;
    // byte-exact, so `\r\n` or trailing blanks are rejected too
    if first_line != format!("{LOG_MARKER}\n").as_bytes() {
        return Err(LogFormatError::BadHeader(path.to_path_buf()));
    }

    Ok(())
}

/// Reads a GPU memory log into a [`Table`].
///
/// The marker line is skipped, the next line names the columns. Data lines that cannot be
/// parsed end up in [`Table::defects`] (and are logged), not in the rows.
pub fn load(path: impl AsRef<Path>) -> Result<Table, LoadError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let table = parse_log(path, &content)?;
    for defect in &table.defects {
        warn!("{}:{}: skipping row: {}", path.display(), defect.line, defect.reason);
    }
    Ok(table)
}

struct Columns {
    timestamp: usize,
    uuid: usize,
    memory_used: usize,
    count: usize,
}

impl Columns {
    fn from_header(path: &Path, header: &str) -> Result<Self, LoadError> {
        let fields = split_csv_line(header).into_iter().map(str::trim).collect_vec();
        let find = |column: &'static str, matches: &dyn Fn(&str) -> bool| {
            fields
                .iter()
                .position(|field| matches(field))
                .ok_or_else(|| LoadError::MissingColumn {
                    path: path.to_path_buf(),
                    column,
                    header: header.to_owned(),
                })
        };

        Ok(Columns {
            timestamp: find(COLUMN_TIMESTAMP, &|f| f == COLUMN_TIMESTAMP)?,
            uuid: find(COLUMN_UUID, &|f| f == COLUMN_UUID)?,
            // `memory.used [MiB]` from nvidia-smi, bare `memory.used` accepted as well
            memory_used: find(COLUMN_MEMORY_USED, &|f| f.starts_with(COLUMN_MEMORY_USED))?,
            count: fields.len(),
        })
    }
}

fn parse_log(path: &Path, content: &str) -> Result<Table, LoadError> {
    let mut lines = content.lines().enumerate().skip(1);
    let Some((_, header)) = lines.next() else {
        return Err(LoadError::MissingHeader(path.to_path_buf()));
    };
    let columns = Columns::from_header(path, header)?;

    let (rows, defects): (Vec<_>, Vec<_>) = lines
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            parse_row(&columns, line).map_err(|reason| RowDefect { line: i + 1, reason })
        })
        .partition_result();

    Ok(Table { rows, defects })
}

fn parse_row(columns: &Columns, line: &str) -> Result<Sample, String> {
    let fields = split_csv_line(line);
    if fields.len() != columns.count {
        return Err(format!(
            "expected {} fields, got {} (`{line}`)",
            columns.count,
            fields.len()
        ));
    }

    let timestamp = fields[columns.timestamp].trim();
    let timestamp =
        parse_timestamp(timestamp).ok_or_else(|| format!("unrecognised timestamp `{timestamp}`"))?;
    let device = DeviceId(fields[columns.uuid].trim().to_owned());
    let memory = fields[columns.memory_used];
    let memory_used = leading_digits(memory)
        .map(MemoryMib)
        .ok_or_else(|| format!("no memory value in `{}`", memory.trim()))?;

    Ok(Sample {
        timestamp,
        device,
        memory_used,
    })
}

/// Accepts what `nvidia-smi` prints (`2024/01/01 12:34:56.789`) and the usual ISO 8601
/// spellings. An RFC 3339 offset is ignored, the wall clock time is kept as written.
pub fn parse_timestamp(input: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 6] = [
        "%Y/%m/%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y/%m/%d %H:%M",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    let input = input.trim();

    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(input)
                .ok()
                .map(|datetime| datetime.naive_local())
        })
        .or_else(|| {
            ["%Y-%m-%d", "%Y/%m/%d"]
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(input, fmt).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

#[allow(non_snake_case)]
#[cfg(test)]
mod test {
    use std::fs;

    use anyhow::Result;
    use chrono::NaiveDate;
    use collector_data::log_format::LogWriter;
    use tempfile::TempDir;

    use super::*;

    fn write_log(dir: &TempDir, name: &str, content: &str) -> Result<PathBuf> {
        let path = dir.path().join(name);
        fs::write(&path, content)?;
        Ok(path)
    }

    fn at(h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_milli_opt(h, m, s, ms))
            .unwrap()
    }

    #[test]
    fn validate__accepts_log() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_log(&dir, "gpu.log", "# GPU memory log\ntimestamp, uuid, memory.used [MiB]\n")?;
        validate(path)?;
        Ok(())
    }

    #[test]
    fn validate__not_found() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(matches!(validate(dir.path().join("gpu.log")), Err(LogFormatError::NotFound(_))));
        // a directory is not a log file either
        assert!(matches!(validate(dir.path()), Err(LogFormatError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn validate__wrong_name() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_log(&dir, "gpu.txt", "# GPU memory log\n")?;
        assert!(matches!(validate(path), Err(LogFormatError::WrongName(_))));
        Ok(())
    }

    #[test]
    fn validate__bad_header() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for content in ["# CPU memory log\n", "# GPU memory log\r\n", "# GPU memory log", "", "timestamp\n"] {
            let path = write_log(&dir, "gpu.log", content)?;
            assert!(
                matches!(validate(&path), Err(LogFormatError::BadHeader(_))),
                "{content:?} should be rejected"
            );
        }
        Ok(())
    }

    #[test]
    fn load__round_trip_single_row() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_log(
            &dir,
            "gpu.log",
            "# GPU memory log\ntimestamp,uuid,memory.used\n2024-01-01 00:00:00.000,GPU-aaa,1000 MiB\n",
        )?;
        let table = load(path)?;
        assert_eq!(
            table.rows,
            vec![Sample {
                timestamp: at(0, 0, 0, 0),
                device: DeviceId("GPU-aaa".into()),
                memory_used: MemoryMib(1000),
            }]
        );
        assert!(table.defects.is_empty());
        Ok(())
    }

    #[test]
    fn load__reads_what_the_collector_writes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = LogWriter::create(dir.path())?;
        writer.append_telemetry("timestamp,uuid,memory.used\n2024-01-01 00:00:00.000,GPU-aaa,1000 MiB\n")?;

        validate(writer.path())?;
        let table = load(writer.path())?;
        assert_eq!(
            table.rows,
            vec![Sample {
                timestamp: at(0, 0, 0, 0),
                device: DeviceId("GPU-aaa".into()),
                memory_used: MemoryMib(1000),
            }]
        );
        assert!(table.defects.is_empty());
        Ok(())
    }

    #[test]
    fn load__nvidia_smi_output_keeps_file_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_log(
            &dir,
            "gpu.log",
            "# GPU memory log\n\
             timestamp, uuid, memory.used [MiB]\n\
             2024/01/01 10:00:02.500, GPU-bbb, 20 MiB\n\
             2024/01/01 10:00:00.000, GPU-aaa, 1000 MiB\n\
             2024/01/01 10:00:00.000, GPU-bbb, 10 MiB\n",
        )?;
        let table = load(path)?;
        let rows = table
            .rows
            .iter()
            .map(|s| (s.timestamp, s.device.as_str(), *s.memory_used))
            .collect_vec();
        assert_eq!(
            rows,
            vec![
                (at(10, 0, 2, 500), "GPU-bbb", 20),
                (at(10, 0, 0, 0), "GPU-aaa", 1000),
                (at(10, 0, 0, 0), "GPU-bbb", 10),
            ]
        );
        Ok(())
    }

    #[test]
    fn load__defective_rows_are_skipped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_log(
            &dir,
            "gpu.log",
            "# GPU memory log\n\
             timestamp, uuid, memory.used [MiB]\n\
             2024/01/01 10:00:00.000, GPU-aaa, 1000 MiB\n\
             2024/01/01 10:00:00.000, GPU-bbb, [N/A]\n\
             yesterday, GPU-aaa, 5 MiB\n\
             2024/01/01 10:00:02.000, GPU-aaa\n\
             \n\
             2024/01/01 10:00:02.000, GPU-aaa, 1200 MiB\n",
        )?;
        let table = load(path)?;
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.defects.iter().map(|d| d.line).collect_vec(), vec![4, 5, 6]);
        Ok(())
    }

    #[test]
    fn load__header_problems_are_fatal() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_log(&dir, "gpu.log", "# GPU memory log\n")?;
        assert!(matches!(load(path), Err(LoadError::MissingHeader(_))));

        let path = write_log(&dir, "gpu.log", "# GPU memory log\ntimestamp, memory.used [MiB]\n")?;
        assert!(matches!(load(path), Err(LoadError::MissingColumn { column: "uuid", .. })));
        Ok(())
    }

    #[test]
    fn parse_timestamp__formats() {
        let expected = Some(at(12, 34, 56, 0));
        assert_eq!(parse_timestamp("2024/01/01 12:34:56.000"), expected);
        assert_eq!(parse_timestamp("2024/01/01 12:34:56"), expected);
        assert_eq!(parse_timestamp("2024-01-01 12:34:56"), expected);
        assert_eq!(parse_timestamp("2024-01-01T12:34:56"), expected);
        assert_eq!(parse_timestamp("2024-01-01T12:34:56+02:00"), expected);
        assert_eq!(parse_timestamp("2024-01-01"), Some(at(0, 0, 0, 0)));
        assert_eq!(parse_timestamp("2024/01/01 12:34"), Some(at(12, 34, 0, 0)));
        assert_eq!(parse_timestamp("12:34"), None);
        assert_eq!(parse_timestamp(""), None);
    }
}
