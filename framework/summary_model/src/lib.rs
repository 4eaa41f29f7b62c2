mod metrics;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha3::Digest;
use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, Read, Write};
use std::path::Path;

pub use metrics::{
    CheckSummary, CounterSummary, MetricsSummary, OperationSummary, RateSummary, ThresholdResult,
    TrendSummary,
};

/// The load profile a run was configured with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioConfigSummary {
    /// Iteration starts per [ScenarioConfigSummary::time_unit_ms]
    pub arrival_rate: u32,
    pub time_unit_ms: u64,
    pub duration_ms: u64,
    pub pre_allocated_vus: usize,
    pub max_vus: usize,
    pub graceful_stop_ms: u64,
}

/// Summary of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// The unique run id
    ///
    /// Chosen by the runner unless one is provided on the command line.
    pub run_id: String,
    /// The name of the scenario that was run
    pub scenario_name: String,
    /// The target that was load tested
    pub connection_string: String,
    /// The time the run started
    ///
    /// This is a Unix timestamp in seconds.
    pub started_at: i64,
    /// How long the run actually took from the first scheduled start until the pool drained, in
    /// milliseconds.
    pub elapsed_ms: u64,
    /// The load profile
    pub config: ScenarioConfigSummary,
    /// Threshold predicates, by metric name
    pub thresholds: BTreeMap<String, Vec<String>>,
    /// Aggregated metrics, set once the run has finished
    pub metrics: Option<MetricsSummary>,
    /// One entry per predicate in [RunSummary::thresholds]
    pub threshold_results: Vec<ThresholdResult>,
    /// True when every threshold held
    pub passed: bool,
    /// Environment variables set for the run
    ///
    /// This won't capture all environment variables. Just the ones that the runner is aware of or
    /// that are included by the scenario itself.
    pub env: HashMap<String, String>,
    /// The version of Shop Tunnel that was used for this run
    pub shop_tunnel_version: String,
}

impl RunSummary {
    /// Create a new run summary
    pub fn new(
        run_id: String,
        scenario_name: String,
        connection_string: String,
        started_at: i64,
        config: ScenarioConfigSummary,
        thresholds: BTreeMap<String, Vec<String>>,
        shop_tunnel_version: String,
    ) -> Self {
        Self {
            run_id,
            scenario_name,
            connection_string,
            started_at,
            elapsed_ms: 0,
            config,
            thresholds,
            metrics: None,
            threshold_results: Vec::new(),
            passed: true,
            env: HashMap::with_capacity(0),
            shop_tunnel_version,
        }
    }

    pub fn set_elapsed_ms(&mut self, elapsed_ms: u64) {
        self.elapsed_ms = elapsed_ms;
    }

    pub fn set_metrics(&mut self, metrics: MetricsSummary) {
        self.metrics = Some(metrics);
    }

    /// Set the threshold results, which also decides whether the run passed.
    pub fn set_threshold_results(&mut self, threshold_results: Vec<ThresholdResult>) {
        self.passed = threshold_results.iter().all(|r| r.passed);
        self.threshold_results = threshold_results;
    }

    /// The thresholds that did not hold
    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.threshold_results.iter().filter(|r| !r.passed)
    }

    /// Add an environment variable
    pub fn add_env(&mut self, key: String, value: String) {
        self.env.insert(key, value);
    }

    /// Compute a fingerprint for this run summary
    ///
    /// The fingerprint is intended to uniquely identify the configuration used to run the scenario.
    /// It uses the
    ///     - Scenario name
    ///     - Load profile
    ///     - Thresholds
    ///     - Selected environment variables
    ///     - Shop Tunnel version
    ///
    /// The fingerprint is computed using [sha3::Sha3_256].
    pub fn fingerprint(&self) -> String {
        let mut hasher = sha3::Sha3_256::new();
        Digest::update(&mut hasher, self.scenario_name.as_bytes());
        Digest::update(&mut hasher, self.config.arrival_rate.to_le_bytes());
        Digest::update(&mut hasher, self.config.time_unit_ms.to_le_bytes());
        Digest::update(&mut hasher, self.config.duration_ms.to_le_bytes());
        Digest::update(&mut hasher, (self.config.pre_allocated_vus as u64).to_le_bytes());
        Digest::update(&mut hasher, (self.config.max_vus as u64).to_le_bytes());
        // BTreeMap iteration is already ordered
        self.thresholds.iter().for_each(|(metric, predicates)| {
            Digest::update(&mut hasher, metric.as_bytes());
            predicates
                .iter()
                .for_each(|p| Digest::update(&mut hasher, p.as_bytes()));
        });
        self.env
            .iter()
            .sorted_by_key(|(k, _)| k.to_owned())
            .for_each(|(k, v)| {
                Digest::update(&mut hasher, k.as_bytes());
                Digest::update(&mut hasher, v.as_bytes());
            });
        Digest::update(&mut hasher, self.shop_tunnel_version.as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

/// Append the run summary to a file
///
/// The summary will be serialized to JSON and output as a single line followed by a newline. The
/// recommended file extension is `.jsonl`.
pub fn append_run_summary(run_summary: &RunSummary, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    store_run_summary(run_summary, &mut file)?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Write the run summary to a file as pretty printed JSON, replacing the file if it exists.
pub fn export_run_summary(run_summary: &RunSummary, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, run_summary)?;
    Ok(())
}

/// Serialize the run summary to a writer
pub fn store_run_summary<W: Write>(run_summary: &RunSummary, writer: &mut W) -> anyhow::Result<()> {
    serde_json::to_writer(writer, run_summary)?;
    Ok(())
}

/// Load a run summary from a reader
pub fn load_run_summary<R: Read>(reader: R) -> anyhow::Result<RunSummary> {
    let reader = std::io::BufReader::new(reader);
    let run_summary: RunSummary = serde_json::from_reader(reader)?;
    Ok(run_summary)
}

/// Load run summaries from a file
///
/// The file should contain one JSON object per line. This is the format produced by
/// [append_run_summary].
pub fn load_summary_runs(path: impl AsRef<Path>) -> anyhow::Result<Vec<RunSummary>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut runs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let run: RunSummary = serde_json::from_str(&line)?;
        runs.push(run);
    }
    Ok(runs)
}
