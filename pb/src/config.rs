//! PurposeBench configuration types and loading

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main PurposeBench configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// This node and its peers in the sync barrier
    pub node: NodeConfig,

    /// Workload simulation
    pub workload: WorkloadConfig,

    /// Result log output
    pub results: ResultsConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.node.expected.is_empty() {
            return Err(eyre!("node.expected must name at least one node"));
        }
        if !self.node.expected.contains(&self.node.id) {
            return Err(eyre!(
                "node.id '{}' is not in node.expected {:?}",
                self.node.id,
                self.node.expected
            ));
        }
        self.workload.validate()
    }

    /// Apply command-line workload overrides; call before [`validate`](Self::validate)
    pub fn override_workload(
        &mut self,
        clients: Option<usize>,
        cycles: Option<usize>,
        seed: Option<u64>,
        seconds_between: Option<f64>,
    ) {
        let workload = &mut self.workload;
        workload.clients = clients.unwrap_or(workload.clients);
        workload.cycles = cycles.unwrap_or(workload.cycles);
        workload.seed = seed.or(workload.seed);
        workload.seconds_between = seconds_between.unwrap_or(workload.seconds_between);
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .purposebench.yml
        let local_config = PathBuf::from(".purposebench.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/purposebench/purposebench.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("purposebench").join("purposebench.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Any failure yields None; the full load reports it later.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from(".purposebench.yml")];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("purposebench").join("purposebench.yml"));
                }
                paths
            }
        };
        candidates
            .iter()
            .find(|p| p.exists())
            .and_then(|p| Self::load_from_file(p).ok())
            .and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Node identity for the ready/done barrier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's id
    pub id: String,

    /// Every node taking part, including this one
    pub expected: Vec<String>,

    /// Give up waiting on the barrier after this many seconds (unset waits forever)
    #[serde(rename = "barrier-timeout-secs")]
    pub barrier_timeout_secs: Option<u64>,
}

impl NodeConfig {
    pub fn barrier_timeout(&self) -> Option<Duration> {
        self.barrier_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: "benchmark-1".to_string(),
            expected: (1..=4).map(|i| format!("benchmark-{}", i)).collect(),
            barrier_timeout_secs: None,
        }
    }
}

/// Inclusive lower and upper bound
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds<T> {
    pub min: T,
    pub max: T,
}

/// Workload simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Number of simulated clients
    pub clients: usize,

    /// Publish/disconnect cycles to run
    pub cycles: usize,

    /// Pause between cycles
    #[serde(rename = "seconds-between")]
    pub seconds_between: f64,

    /// RNG seed; a random seed is chosen and logged when unset
    pub seed: Option<u64>,

    pub topics: Vec<String>,

    pub purposes: Vec<String>,

    /// Messages published per cycle
    #[serde(rename = "messages-per-cycle")]
    pub messages_per_cycle: Bounds<usize>,

    /// Fraction of active clients disconnected per cycle
    #[serde(rename = "disconnect-rate")]
    pub disconnect_rate: Bounds<f64>,
}

impl WorkloadConfig {
    fn validate(&self) -> Result<()> {
        if self.topics.is_empty() || self.purposes.is_empty() {
            return Err(eyre!("workload.topics and workload.purposes must not be empty"));
        }
        if self.messages_per_cycle.min > self.messages_per_cycle.max {
            return Err(eyre!("workload.messages-per-cycle min exceeds max"));
        }
        let rate = self.disconnect_rate;
        if !(0.0..=1.0).contains(&rate.min) || !(0.0..=1.0).contains(&rate.max) || rate.min > rate.max {
            return Err(eyre!(
                "workload.disconnect-rate must satisfy 0 <= min <= max <= 1, got {}..{}",
                rate.min,
                rate.max
            ));
        }
        if !self.seconds_between.is_finite() || self.seconds_between < 0.0 {
            return Err(eyre!(
                "workload.seconds-between must be a finite, non-negative number, got {}",
                self.seconds_between
            ));
        }
        Ok(())
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            clients: 10,
            cycles: 5,
            seconds_between: 1.0,
            seed: None,
            topics: vec!["topic1".to_string(), "topic2".to_string(), "topic3".to_string()],
            purposes: vec!["chat".to_string(), "alert".to_string(), "update".to_string()],
            messages_per_cycle: Bounds { min: 1, max: 5 },
            disconnect_rate: Bounds { min: 0.1, max: 0.3 },
        }
    }
}

/// Result log output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    /// Directory result logs are written to
    pub dir: PathBuf,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("purposebench")
                .join("results"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.node.id, "benchmark-1");
        assert_eq!(config.node.expected.len(), 4);
        assert!(config.node.barrier_timeout().is_none());
        assert_eq!(config.workload.clients, 10);
        assert_eq!(config.workload.messages_per_cycle, Bounds { min: 1, max: 5 });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
node:
  id: node-b
  expected: [node-a, node-b]
  barrier-timeout-secs: 30

workload:
  clients: 3
  seed: 42
  messages-per-cycle:
    min: 2
    max: 2
  disconnect-rate:
    min: 0.0
    max: 0.5

log-level: debug
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.node.expected, ["node-a", "node-b"]);
        assert_eq!(config.node.barrier_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.workload.clients, 3);
        assert_eq!(config.workload.seed, Some(42));
        assert_eq!(config.workload.cycles, 5);
        assert_eq!(config.workload.disconnect_rate.max, 0.5);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_self() {
        let mut config = Config::default();
        config.node.id = "benchmark-9".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_expected() {
        let mut config = Config::default();
        config.node.expected.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_rates() {
        let mut config = Config::default();
        config.workload.disconnect_rate = Bounds { min: 0.5, max: 0.2 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_seconds_between() {
        for bad in [f64::INFINITY, f64::NAN, -5.0] {
            let mut config = Config::default();
            config.override_workload(None, None, None, Some(bad));
            assert!(config.validate().is_err(), "{} accepted", bad);
        }
    }

    #[test]
    fn test_infinite_seconds_between_from_yaml_rejected() {
        let config: Config = serde_yaml::from_str("workload:\n  seconds-between: .inf\n").unwrap();
        assert!(config.workload.seconds_between.is_infinite());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_override_workload() {
        let mut config = Config::default();
        config.override_workload(Some(3), None, Some(7), Some(0.5));
        assert_eq!(config.workload.clients, 3);
        assert_eq!(config.workload.cycles, 5);
        assert_eq!(config.workload.seed, Some(7));
        assert_eq!(config.workload.seconds_between, 0.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("purposebench.yml");
        fs::write(&path, "node:\n  id: benchmark-2\nlog-level: warn\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.node.id, "benchmark-2");
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("warn"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("missing.yml");
        assert!(Config::load(Some(&path)).is_err());
        assert!(Config::load_log_level(Some(&path)).is_none());
    }
}
