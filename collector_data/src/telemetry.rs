use crate::{
    log_format::TELEMETRY_FIELDS,
    query::{run_command, QueryError},
};

/// Source of per-device GPU memory readings, as CSV text with a header row.
pub trait Telemetry {
    fn query(&mut self) -> Result<String, QueryError>;
}

#[derive(Debug, Clone)]
pub struct NvidiaSmi {
    pub program: String,
}

impl Default for NvidiaSmi {
    fn default() -> Self {
        Self {
            program: "nvidia-smi".to_owned(),
        }
    }
}

impl Telemetry for NvidiaSmi {
    fn query(&mut self) -> Result<String, QueryError> {
        let output = run_command(
            &self.program,
            [format!("--query-gpu={TELEMETRY_FIELDS}"), "--format=csv".to_owned()],
        )?;
        check_has_header(&self.program, output)
    }
}

/// `nvidia-smi` sometimes exits 0 with nothing on stdout while the driver is busy.
pub fn check_has_header(program: &str, output: String) -> Result<String, QueryError> {
    match output.lines().next() {
        Some(header) if header.trim_start().starts_with("timestamp") => Ok(output),
        Some(header) => Err(QueryError::Malformed {
            program: program.to_owned(),
            reason: format!("expected a CSV header, got `{header}`"),
        }),
        None => Err(QueryError::Malformed {
            program: program.to_owned(),
            reason: "empty output".to_owned(),
        }),
    }
}
