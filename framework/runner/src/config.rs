use serde::{Deserialize, Deserializer};
use shop_tunnel_instruments::ThresholdError;
use shop_tunnel_summary_model::ScenarioConfigSummary;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("the arrival rate must be greater than zero")]
    ZeroArrivalRate,
    #[error("the time unit must be greater than zero")]
    ZeroTimeUnit,
    #[error("the duration must be greater than zero")]
    ZeroDuration,
    #[error("the maximum number of virtual users must be greater than zero")]
    ZeroMaxVus,
    #[error("{pre_allocated} pre-allocated virtual users is more than the maximum of {max}")]
    PreAllocatedExceedsMax { pre_allocated: usize, max: usize },
    #[error("no connection string was provided")]
    MissingConnectionString,
    #[error("invalid connection string `{value}`")]
    InvalidConnectionString {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid threshold argument `{0}`, expected `metric=predicate`")]
    InvalidThresholdArgument(String),
    #[error(transparent)]
    Threshold(#[from] ThresholdError),
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// The load profile for a constant-arrival-rate run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioConfig {
    /// Iterations to start per [ScenarioConfig::time_unit]
    pub arrival_rate: u32,
    pub time_unit: Duration,
    /// How long to keep starting iterations for
    pub sustain_duration: Duration,
    /// Virtual users initialised before the first iteration starts
    pub preallocated_workers: usize,
    /// The pool never grows beyond this many virtual users
    pub max_workers: usize,
    /// How long in-flight iterations may keep running once scheduling has stopped
    pub graceful_stop: Duration,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            arrival_rate: 10,
            time_unit: Duration::from_secs(1),
            sustain_duration: Duration::from_secs(60),
            preallocated_workers: 10,
            max_workers: 100,
            graceful_stop: Duration::from_secs(30),
        }
    }
}

impl ScenarioConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.arrival_rate == 0 {
            return Err(ConfigError::ZeroArrivalRate);
        }
        if self.time_unit.is_zero() {
            return Err(ConfigError::ZeroTimeUnit);
        }
        if self.sustain_duration.is_zero() {
            return Err(ConfigError::ZeroDuration);
        }
        if self.max_workers == 0 {
            return Err(ConfigError::ZeroMaxVus);
        }
        if self.preallocated_workers > self.max_workers {
            return Err(ConfigError::PreAllocatedExceedsMax {
                pre_allocated: self.preallocated_workers,
                max: self.max_workers,
            });
        }

        Ok(())
    }

    pub(crate) fn summary(&self) -> ScenarioConfigSummary {
        ScenarioConfigSummary {
            arrival_rate: self.arrival_rate,
            time_unit_ms: self.time_unit.as_millis() as u64,
            duration_ms: self.sustain_duration.as_millis() as u64,
            pre_allocated_vus: self.preallocated_workers,
            max_vus: self.max_workers,
            graceful_stop_ms: self.graceful_stop.as_millis() as u64,
        }
    }
}

/// Settings that can be provided in a TOML file with `--config`.
///
/// Any value set here replaces the scenario's default, and is itself replaced by the matching
/// command line flag.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub connection_string: Option<String>,
    pub rate: Option<u32>,
    #[serde(default, deserialize_with = "humantime_opt")]
    pub time_unit: Option<Duration>,
    #[serde(default, deserialize_with = "humantime_opt")]
    pub duration: Option<Duration>,
    pub pre_allocated_vus: Option<usize>,
    pub max_vus: Option<usize>,
    #[serde(default, deserialize_with = "humantime_opt")]
    pub graceful_stop: Option<Duration>,
    /// Predicates by metric name. A metric listed here replaces all default predicates for it.
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<String>>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn humantime_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        ScenarioConfig::default().validate().unwrap();
    }

    #[test]
    fn reject_invalid_load_profiles() {
        let base = ScenarioConfig::default();

        let config = ScenarioConfig {
            arrival_rate: 0,
            ..base.clone()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroArrivalRate)));

        let config = ScenarioConfig {
            time_unit: Duration::ZERO,
            ..base.clone()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroTimeUnit)));

        let config = ScenarioConfig {
            sustain_duration: Duration::ZERO,
            ..base.clone()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroDuration)));

        let config = ScenarioConfig {
            preallocated_workers: 0,
            max_workers: 0,
            ..base.clone()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroMaxVus)));

        let config = ScenarioConfig {
            preallocated_workers: 301,
            max_workers: 300,
            ..base
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PreAllocatedExceedsMax {
                pre_allocated: 301,
                max: 300
            })
        ));
    }

    #[test]
    fn equal_pre_allocated_and_max_is_valid() {
        let config = ScenarioConfig {
            preallocated_workers: 300,
            max_workers: 300,
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
connection_string = "http://localhost:8080"
rate = 250
time_unit = "1s"
duration = "1m 40s"
pre_allocated_vus = 300
max_vus = 100000
graceful_stop = "500ms"

[thresholds]
http_req_failed = ["rate<0.0001"]
http_req_duration = ["med<50", "p(95)<200"]
"#
        )
        .unwrap();

        let config = ConfigFile::load(file.path()).unwrap();

        assert_eq!(
            ConfigFile {
                connection_string: Some("http://localhost:8080".to_string()),
                rate: Some(250),
                time_unit: Some(Duration::from_secs(1)),
                duration: Some(Duration::from_secs(100)),
                pre_allocated_vus: Some(300),
                max_vus: Some(100_000),
                graceful_stop: Some(Duration::from_millis(500)),
                thresholds: BTreeMap::from([
                    (
                        "http_req_duration".to_string(),
                        vec!["med<50".to_string(), "p(95)<200".to_string()]
                    ),
                    (
                        "http_req_failed".to_string(),
                        vec!["rate<0.0001".to_string()]
                    ),
                ]),
            },
            config
        );
    }

    #[test]
    fn config_file_rejects_unknown_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "vus = 10").unwrap();

        assert!(matches!(
            ConfigFile::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn config_file_rejects_bad_durations() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "duration = \"forever\"").unwrap();

        assert!(matches!(
            ConfigFile::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
