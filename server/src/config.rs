use std::{env, fs, path::PathBuf, thread, time::Duration};

use forest::{DatasetSpec, ForestParams, MetricsFile};
use serde::Deserialize;

use crate::{
    aggregation::Strategy,
    error::{Result, ServerErr},
};

/// Environment variable holding the path of the configuration file.
pub const CONFIG_VAR: &str = "FEDT_CONFIG";
const DEFAULT_CONFIG: &str = "fedt.json";

/// How long the barrier waits for the expected clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierPolicy {
    /// Aggregate only once every expected client submitted.
    #[default]
    Indefinite,
    /// Aggregate whatever arrived once `secs` elapsed since the first submission.
    Timeout { secs: u64 },
}

/// What waiting uploads receive when the aggregation of their round fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationFailurePolicy {
    /// The previous global ensemble, as if nothing happened.
    #[default]
    RetainStale,
    /// An error reply.
    Propagate,
}

/// The growth of the per client component budget across rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub initial: usize,
    pub increment: usize,
}

impl Schedule {
    pub fn components_per_client(&self, round: usize) -> usize {
        round * self.increment + self.initial
    }
}

/// The `server` section of the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "ServerSection::default_host")]
    pub host: String,
    #[serde(default = "ServerSection::default_port")]
    pub port: u16,
    #[serde(default = "ServerSection::default_jobs")]
    pub jobs: usize,
    #[serde(default = "ServerSection::default_initial_components")]
    pub initial_components: usize,
    #[serde(default = "ServerSection::default_components_increment")]
    pub components_increment: usize,
    #[serde(default = "ServerSection::default_threshold")]
    pub threshold: f64,
    #[serde(default = "ServerSection::default_selection_ratio")]
    pub selection_ratio: f64,
    #[serde(default)]
    pub barrier: BarrierPolicy,
    #[serde(default)]
    pub on_aggregation_failure: AggregationFailurePolicy,
    #[serde(default = "ServerSection::default_grace_period_secs")]
    pub grace_period_secs: u64,
}

impl ServerSection {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_port() -> u16 {
        50051
    }

    fn default_jobs() -> usize {
        thread::available_parallelism().map_or(1, |n| n.get())
    }

    fn default_initial_components() -> usize {
        3
    }

    fn default_components_increment() -> usize {
        2
    }

    fn default_threshold() -> f64 {
        0.9
    }

    fn default_selection_ratio() -> f64 {
        0.5
    }

    fn default_grace_period_secs() -> u64 {
        5
    }
}

/// Everything the server reads from the shared configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub clients: usize,
    pub rounds: usize,
    #[serde(default = "ServerConfig::default_strategy")]
    pub aggregation_strategy: String,
    #[serde(default = "ServerConfig::default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default)]
    pub seed: Option<u64>,
    pub dataset: DatasetSpec,
    #[serde(default)]
    pub forest: ForestParams,
    pub server: ServerSection,
}

impl ServerConfig {
    fn default_strategy() -> String {
        "random".to_string()
    }

    fn default_results_dir() -> PathBuf {
        PathBuf::from("results")
    }

    /// Loads the file named by `FEDT_CONFIG`, or `fedt.json`.
    pub fn from_env() -> Result<Self> {
        let path = env::var(CONFIG_VAR).unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
        Self::from_file(path)
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = fs::read_to_string(&path)?;
        Self::from_json(&content)
    }

    /// Parses and validates a configuration.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| ServerErr::Config(format!("cannot parse the configuration: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: String| -> Result<()> { Err(ServerErr::Config(reason)) };
        let server = &self.server;

        if self.clients == 0 {
            return invalid("clients must be at least 1".into());
        }

        if self.rounds == 0 {
            return invalid("rounds must be at least 1".into());
        }

        if server.jobs == 0 {
            return invalid("server.jobs must be at least 1".into());
        }

        if server.initial_components == 0 {
            return invalid("server.initial_components must be at least 1".into());
        }

        if !(server.selection_ratio > 0.0 && server.selection_ratio <= 1.0) {
            return invalid(format!(
                "server.selection_ratio must be in (0, 1], got {}",
                server.selection_ratio
            ));
        }

        if !(-1.0..=1.0).contains(&server.threshold) {
            return invalid(format!(
                "server.threshold must be in [-1, 1], got {}",
                server.threshold
            ));
        }

        if let BarrierPolicy::Timeout { secs: 0 } = server.barrier {
            return invalid("server.barrier timeout must be positive".into());
        }

        if self.forest.min_samples_split < 2 {
            return invalid("forest.min_samples_split must be at least 2".into());
        }

        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn schedule(&self) -> Schedule {
        Schedule {
            initial: self.server.initial_components,
            increment: self.server.components_increment,
        }
    }

    pub fn strategy(&self) -> Strategy {
        Strategy::from_name(
            &self.aggregation_strategy,
            self.server.selection_ratio,
            self.server.threshold,
        )
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.server.grace_period_secs)
    }

    /// Picks the next free `{strategy}_server_{n}.json` under the results directory.
    pub fn metrics_file(&self) -> Result<MetricsFile> {
        let strategy = &self.aggregation_strategy;
        let dir = self.results_dir.join(strategy).join("server");
        Ok(MetricsFile::next_in(&dir, &format!("{strategy}_server"))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "clients": 3,
        "rounds": 2,
        "dataset": { "path": "data.csv", "features": ["T1"], "label": "Appliances" },
        "server": {}
    }"#;

    #[test]
    fn schedule_is_linear() {
        let schedule = Schedule {
            initial: 3,
            increment: 2,
        };

        let budgets: Vec<_> = (0..3).map(|r| schedule.components_per_client(r)).collect();
        assert_eq!(budgets, vec![3, 5, 7]);
        assert_eq!(schedule.components_per_client(1), 5);
    }

    #[test]
    fn defaults_fill_the_gaps() {
        let config = ServerConfig::from_json(MINIMAL).unwrap();

        assert_eq!(config.aggregation_strategy, "random");
        assert_eq!(config.server.barrier, BarrierPolicy::Indefinite);
        assert_eq!(
            config.server.on_aggregation_failure,
            AggregationFailurePolicy::RetainStale
        );
        assert_eq!(config.schedule().components_per_client(0), 3);
        assert_eq!(config.strategy(), Strategy::Random { ratio: 0.5 });
        assert_eq!(config.addr(), "127.0.0.1:50051");
        assert!(config.forest.bootstrap);
    }

    #[test]
    fn policies_parse() {
        let json = MINIMAL.replace(
            r#""server": {}"#,
            r#""server": { "barrier": { "timeout": { "secs": 30 } }, "on_aggregation_failure": "propagate" }"#,
        );
        let config = ServerConfig::from_json(&json).unwrap();

        assert_eq!(config.server.barrier, BarrierPolicy::Timeout { secs: 30 });
        assert_eq!(
            config.server.on_aggregation_failure,
            AggregationFailurePolicy::Propagate
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        let zero_clients = MINIMAL.replace(r#""clients": 3"#, r#""clients": 0"#);
        assert!(matches!(
            ServerConfig::from_json(&zero_clients),
            Err(ServerErr::Config(_))
        ));

        let bad_ratio = MINIMAL.replace(r#""server": {}"#, r#""server": { "selection_ratio": 1.5 }"#);
        assert!(ServerConfig::from_json(&bad_ratio).is_err());

        assert!(ServerConfig::from_json("{").is_err());
    }
}
