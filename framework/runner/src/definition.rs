use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use shop_tunnel_instruments::Threshold;

use crate::cli::ShopTunnelScenarioCli;
use crate::config::{ConfigError, ConfigFile, ScenarioConfig};
use crate::context::{RunnerContext, UserValuesConstraint, VuContext};

pub type HookResult = anyhow::Result<()>;

pub type GlobalHookMut<RV> = fn(&mut RunnerContext<RV>) -> HookResult;
pub type GlobalHook<RV> = fn(Arc<RunnerContext<RV>>) -> HookResult;
pub type VuHookMut<RV, V> = fn(&mut VuContext<RV, V>) -> HookResult;

/// The builder for a scenario definition.
///
/// This must be used at the start of a test to define the scenario that you want to run.
pub struct ScenarioDefinitionBuilder<RV: UserValuesConstraint, V: UserValuesConstraint> {
    /// The name of the scenario, which should be unique within the test suite.
    ///
    /// Recommended value is `env!("CARGO_PKG_NAME")`.
    name: String,
    /// Parsed command line arguments, which take precedence over everything else.
    cli: ShopTunnelScenarioCli,
    default_connection_string: Option<String>,
    /// Load profile used for anything that is not set in a config file or on the command line.
    default_config: ScenarioConfig,
    default_thresholds: BTreeMap<String, Vec<String>>,
    /// Initial value for the runner context. Uses [Default] if not provided.
    runner_values: Option<RV>,
    /// Global setup hook for this scenario. It will be run once, before any virtual users are started.
    setup_fn: Option<GlobalHookMut<RV>>,
    /// Setup hook for a virtual user, which will be run once for each virtual user as it is initialised.
    ///
    /// Pre-allocated virtual users are all set up before the first iteration is scheduled. Virtual
    /// users added to the pool later are set up just before they run their first iteration.
    setup_vu_fn: Option<VuHookMut<RV, V>>,
    /// The iteration, run once for every scheduled start.
    iteration_fn: Option<VuHookMut<RV, V>>,
    /// Teardown hook for a virtual user, run once the pool has been closed.
    teardown_vu_fn: Option<VuHookMut<RV, V>>,
    /// Global teardown hook, run after every virtual user has stopped.
    teardown_fn: Option<GlobalHook<RV>>,
}

pub struct ScenarioDefinition<RV: UserValuesConstraint, V: UserValuesConstraint> {
    pub name: String,
    pub connection_string: String,
    pub config: ScenarioConfig,
    pub thresholds: Vec<Threshold>,
    pub threshold_config: BTreeMap<String, Vec<String>>,
    pub summary_export: Option<PathBuf>,
    pub run_summary_path: Option<PathBuf>,
    pub run_id: Option<String>,
    pub no_progress: bool,
    pub runner_values: RV,
    pub setup_fn: Option<GlobalHookMut<RV>>,
    pub setup_vu_fn: Option<VuHookMut<RV, V>>,
    pub iteration_fn: VuHookMut<RV, V>,
    pub teardown_vu_fn: Option<VuHookMut<RV, V>>,
    pub teardown_fn: Option<GlobalHook<RV>>,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> ScenarioDefinitionBuilder<RV, V> {
    /// Initialise a new scenario definition from the scenario name and command line arguments.
    /// See the [ScenarioDefinitionBuilder::name] for more information about the name.
    pub fn new(name: &str, cli: ShopTunnelScenarioCli) -> Self {
        Self {
            name: name.to_string(),
            cli,
            default_connection_string: None,
            default_config: ScenarioConfig::default(),
            default_thresholds: BTreeMap::new(),
            runner_values: None,
            setup_fn: None,
            setup_vu_fn: None,
            iteration_fn: None,
            teardown_vu_fn: None,
            teardown_fn: None,
        }
    }

    /// Initialise a new scenario definition, reading the command line arguments from the process.
    pub fn new_with_init(name: &str) -> Self {
        Self::new(name, crate::init::init())
    }

    pub fn with_default_connection_string(mut self, connection_string: &str) -> Self {
        self.default_connection_string = Some(connection_string.to_string());
        self
    }

    /// Start `rate` iterations every `time_unit`.
    pub fn with_default_arrival_rate(mut self, rate: u32, time_unit: Duration) -> Self {
        self.default_config.arrival_rate = rate;
        self.default_config.time_unit = time_unit;
        self
    }

    pub fn with_default_duration(mut self, duration: Duration) -> Self {
        self.default_config.sustain_duration = duration;
        self
    }

    pub fn with_default_duration_s(self, duration_s: u64) -> Self {
        self.with_default_duration(Duration::from_secs(duration_s))
    }

    pub fn with_default_vus(mut self, pre_allocated: usize, max: usize) -> Self {
        self.default_config.preallocated_workers = pre_allocated;
        self.default_config.max_workers = max;
        self
    }

    pub fn with_default_graceful_stop(mut self, graceful_stop: Duration) -> Self {
        self.default_config.graceful_stop = graceful_stop;
        self
    }

    /// Add a default threshold predicate for a metric, for example `("http_req_duration", "med<50")`.
    pub fn with_default_threshold(mut self, metric: &str, predicate: &str) -> Self {
        self.default_thresholds
            .entry(metric.to_string())
            .or_default()
            .push(predicate.to_string());
        self
    }

    /// Provide the initial value of the runner context, instead of using [Default].
    pub fn with_runner_values(mut self, runner_values: RV) -> Self {
        self.runner_values = Some(runner_values);
        self
    }

    /// Set the global setup hook [ScenarioDefinitionBuilder::setup_fn] for this scenario.
    pub fn use_setup(mut self, setup_fn: GlobalHookMut<RV>) -> Self {
        self.setup_fn = Some(setup_fn);
        self
    }

    /// Set the virtual user setup hook [ScenarioDefinitionBuilder::setup_vu_fn] for this scenario.
    pub fn use_vu_setup(mut self, setup_vu_fn: VuHookMut<RV, V>) -> Self {
        self.setup_vu_fn = Some(setup_vu_fn);
        self
    }

    /// Set the iteration hook [ScenarioDefinitionBuilder::iteration_fn] for this scenario.
    pub fn use_iteration(mut self, iteration_fn: VuHookMut<RV, V>) -> Self {
        self.iteration_fn = Some(iteration_fn);
        self
    }

    /// Set the virtual user teardown hook [ScenarioDefinitionBuilder::teardown_vu_fn] for this scenario.
    pub fn use_vu_teardown(mut self, teardown_vu_fn: VuHookMut<RV, V>) -> Self {
        self.teardown_vu_fn = Some(teardown_vu_fn);
        self
    }

    /// Set the global teardown hook [ScenarioDefinitionBuilder::teardown_fn] for this scenario.
    pub fn use_teardown(mut self, teardown_fn: GlobalHook<RV>) -> Self {
        self.teardown_fn = Some(teardown_fn);
        self
    }

    /// Resolve the run settings from the defaults, the config file and the command line, in
    /// increasing order of precedence.
    pub(crate) fn build(self) -> anyhow::Result<ScenarioDefinition<RV, V>> {
        let iteration_fn = self
            .iteration_fn
            .ok_or_else(|| anyhow::anyhow!("No iteration defined for scenario {}", self.name))?;

        let file = match &self.cli.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };

        let connection_string = self
            .cli
            .connection_string
            .or(file.connection_string)
            .or(self.default_connection_string)
            .ok_or(ConfigError::MissingConnectionString)?;
        url::Url::parse(&connection_string).map_err(|source| {
            ConfigError::InvalidConnectionString {
                value: connection_string.clone(),
                source,
            }
        })?;

        let defaults = self.default_config;
        let config = ScenarioConfig {
            arrival_rate: self
                .cli
                .rate
                .or(file.rate)
                .unwrap_or(defaults.arrival_rate),
            time_unit: self
                .cli
                .time_unit
                .or(file.time_unit)
                .unwrap_or(defaults.time_unit),
            sustain_duration: self
                .cli
                .duration
                .or(file.duration)
                .unwrap_or(defaults.sustain_duration),
            preallocated_workers: self
                .cli
                .pre_allocated_vus
                .or(file.pre_allocated_vus)
                .unwrap_or(defaults.preallocated_workers),
            max_workers: self
                .cli
                .max_vus
                .or(file.max_vus)
                .unwrap_or(defaults.max_workers),
            graceful_stop: self
                .cli
                .graceful_stop
                .or(file.graceful_stop)
                .unwrap_or(defaults.graceful_stop),
        };
        config.validate()?;

        let mut threshold_config = self.default_thresholds;
        threshold_config.extend(file.thresholds);
        let mut cli_thresholds = BTreeMap::<String, Vec<String>>::new();
        for (metric, predicate) in self.cli.thresholds {
            cli_thresholds.entry(metric).or_default().push(predicate);
        }
        threshold_config.extend(cli_thresholds);

        let thresholds = threshold_config
            .iter()
            .flat_map(|(metric, predicates)| {
                predicates
                    .iter()
                    .map(move |predicate| Threshold::parse(metric, predicate))
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(ConfigError::from)?;

        Ok(ScenarioDefinition {
            name: self.name,
            connection_string,
            config,
            thresholds,
            threshold_config,
            summary_export: self.cli.summary_export,
            run_summary_path: self.cli.run_summary_path,
            run_id: self.cli.run_id,
            no_progress: self.cli.no_progress,
            runner_values: self.runner_values.unwrap_or_default(),
            setup_fn: self.setup_fn,
            setup_vu_fn: self.setup_vu_fn,
            iteration_fn,
            teardown_vu_fn: self.teardown_vu_fn,
            teardown_fn: self.teardown_fn,
        })
    }
}
