use std::{env, time::Duration};

use collector_data::query::RetryPolicy;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const DEFAULT_SACCT_COMMAND: &str = "sacct";
const DEFAULT_NVIDIA_SMI_COMMAND: &str = "nvidia-smi";
const DEFAULT_QUERY_ATTEMPTS: u32 = 3;
const DEFAULT_QUERY_BACKOFF_MS: u64 = 500;

/// Node-level settings that rarely change between runs. Job specific values come from the
/// command line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub sacct_command: String,
    pub nvidia_smi_command: String,
    pub query_attempts: u32,
    pub query_backoff_ms: u64,
}

impl Settings {
    /// Defaults, overridden by `config/collector.toml`, `config/<RUN_MODE>.toml` (both
    /// optional) and finally `GPULOG_*` environment variables.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "default".into());

        let builder = Config::builder()
            .set_default("sacct_command", DEFAULT_SACCT_COMMAND)?
            .set_default("nvidia_smi_command", DEFAULT_NVIDIA_SMI_COMMAND)?
            .set_default("query_attempts", DEFAULT_QUERY_ATTEMPTS.to_string())?
            .set_default("query_backoff_ms", DEFAULT_QUERY_BACKOFF_MS.to_string())?
            .add_source(File::with_name("config/collector").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(Environment::with_prefix("gpulog"))
            .build()?;

        builder.try_deserialize()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.query_attempts.max(1),
            backoff: Duration::from_millis(self.query_backoff_ms),
        }
    }
}
