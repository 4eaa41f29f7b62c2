use crate::config::ConfigError;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone, Default)]
#[command(about, long_about = None)]
pub struct ShopTunnelScenarioCli {
    /// The base URL of the service to test, for example `http://localhost:8080`
    #[clap(short, long)]
    pub connection_string: Option<String>,

    /// A TOML file with settings for this run. Command line flags take precedence over the file.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// The number of iterations to start per time unit
    #[clap(long)]
    pub rate: Option<u32>,

    /// The period that `--rate` applies to, for example `1s` or `1m`
    #[clap(long, value_parser = humantime::parse_duration)]
    pub time_unit: Option<Duration>,

    /// How long to keep starting iterations for, for example `100s`
    #[clap(long, value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// The number of virtual users to initialise before the first iteration starts
    #[clap(long)]
    pub pre_allocated_vus: Option<usize>,

    /// The maximum number of virtual users. When every virtual user is busy and the pool is at
    /// this size, scheduled iterations are dropped.
    #[clap(long)]
    pub max_vus: Option<usize>,

    /// How long iterations that are still running at the end of the run may take to finish
    /// before they are interrupted
    #[clap(long, value_parser = humantime::parse_duration)]
    pub graceful_stop: Option<Duration>,

    /// Set a threshold in the format `metric=predicate`. For example `--threshold 'http_req_duration=p(95)<200'`.
    ///
    /// The flag can be repeated. Any metric named here replaces all configured thresholds for
    /// that metric.
    #[clap(long = "threshold", value_parser = parse_threshold_arg)]
    pub thresholds: Vec<(String, String)>,

    /// Write the run summary to this file as JSON
    #[clap(long)]
    pub summary_export: Option<PathBuf>,

    /// Append the run summary to this file as a single line of JSON. The recommended file
    /// extension is `.jsonl`.
    #[clap(long)]
    pub run_summary_path: Option<PathBuf>,

    /// Use this run id instead of generating one
    #[clap(long)]
    pub run_id: Option<String>,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,
}

pub(crate) fn parse_threshold_arg(s: &str) -> Result<(String, String), ConfigError> {
    let (metric, predicate) = s
        .split_once('=')
        .ok_or_else(|| ConfigError::InvalidThresholdArgument(s.to_string()))?;

    let metric = metric.trim();
    let predicate = predicate.trim();
    if metric.is_empty() || predicate.is_empty() {
        return Err(ConfigError::InvalidThresholdArgument(s.to_string()));
    }

    Ok((metric.to_string(), predicate.to_string()))
}
