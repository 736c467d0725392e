use std::{env, fs, path::PathBuf, time::Duration};

use comms::specs::ClientId;
use forest::{DatasetSpec, ForestParams, MetricsFile};
use serde::Deserialize;

use crate::error::{ClientErr, Result};

/// Environment variable holding the path of the configuration file.
pub const CONFIG_VAR: &str = "FEDT_CONFIG";
/// Environment variable holding this client's id.
pub const CLIENT_ID_VAR: &str = "CLIENT_ID";
const DEFAULT_CONFIG: &str = "fedt.json";

/// The `client` section of the configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub host: String,
    pub port: u16,
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
    pub round_delay_secs: u64,
    pub inference_samples: usize,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 50051,
            poll_interval_secs: 5,
            timeout_secs: 600,
            round_delay_secs: 15,
            inference_samples: 100,
        }
    }
}

/// Everything a client reads from the shared configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub rounds: usize,
    #[serde(default = "ClientConfig::default_strategy")]
    pub aggregation_strategy: String,
    #[serde(default = "ClientConfig::default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default)]
    pub seed: Option<u64>,
    pub dataset: DatasetSpec,
    #[serde(default)]
    pub forest: ForestParams,
    #[serde(default)]
    pub client: ClientSection,
}

impl ClientConfig {
    fn default_strategy() -> String {
        "random".to_string()
    }

    fn default_results_dir() -> PathBuf {
        PathBuf::from("results")
    }

    /// Loads the file named by `FEDT_CONFIG`, or `fedt.json`.
    pub fn from_env() -> Result<Self> {
        let path = env::var(CONFIG_VAR).unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parses and validates a configuration.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| ClientErr::Config(format!("cannot parse the configuration: {e}")))?;

        if config.rounds == 0 {
            return Err(ClientErr::Config("rounds must be at least 1".into()));
        }

        if config.client.poll_interval_secs == 0 {
            return Err(ClientErr::Config(
                "client.poll_interval_secs must be at least 1".into(),
            ));
        }

        if config.forest.min_samples_split < 2 {
            return Err(ClientErr::Config(
                "forest.min_samples_split must be at least 2".into(),
            ));
        }

        Ok(config)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.client.host, self.client.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.client.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.client.timeout_secs)
    }

    pub fn round_delay(&self) -> Duration {
        Duration::from_secs(self.client.round_delay_secs)
    }

    /// Picks the next free `{strategy}_client-id-{id}_{n}.json` under the results directory.
    pub fn metrics_file(&self, client_id: ClientId) -> Result<MetricsFile> {
        let strategy = &self.aggregation_strategy;
        let name = format!("client-id-{client_id}");
        let dir = self.results_dir.join(strategy).join(&name);
        Ok(MetricsFile::next_in(&dir, &format!("{strategy}_{name}"))?)
    }
}

/// Reads this client's id from `CLIENT_ID`.
pub fn client_id_from_env() -> Result<ClientId> {
    let raw = env::var(CLIENT_ID_VAR)
        .map_err(|e| ClientErr::Config(format!("{CLIENT_ID_VAR} is not set: {e}")))?;

    raw.trim()
        .parse()
        .map_err(|e| ClientErr::Config(format!("{CLIENT_ID_VAR} must be a number, got {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHARED: &str = r#"{
        "clients": 2,
        "rounds": 3,
        "aggregation_strategy": "best_trees",
        "dataset": { "path": "data.csv", "features": ["T1", "RH_1"], "label": "Appliances" },
        "server": { "port": 6000 }
    }"#;

    #[test]
    fn reads_the_shared_file() {
        let config = ClientConfig::from_json(SHARED).unwrap();

        assert_eq!(config.rounds, 3);
        assert_eq!(config.client.poll_interval_secs, 5);
        assert_eq!(config.round_delay(), Duration::from_secs(15));
        assert_eq!(config.client.inference_samples, 100);
        assert_eq!(config.addr(), "127.0.0.1:50051");
        assert_eq!(config.dataset.features.len(), 2);
    }

    #[test]
    fn client_section_overrides_defaults() {
        let json = SHARED.replace(
            r#""server": { "port": 6000 }"#,
            r#""client": { "port": 6000, "round_delay_secs": 0 }"#,
        );
        let config = ClientConfig::from_json(&json).unwrap();

        assert_eq!(config.addr(), "127.0.0.1:6000");
        assert_eq!(config.round_delay(), Duration::ZERO);
        assert_eq!(config.timeout(), Duration::from_secs(600));
    }

    #[test]
    fn metrics_file_follows_the_naming_scheme() {
        let dir = env::temp_dir().join(format!("fedt-client-config-{}", std::process::id()));
        let json = SHARED.replace(
            r#""rounds": 3"#,
            &format!(r#""rounds": 3, "results_dir": {:?}"#, dir.to_string_lossy()),
        );
        let config = ClientConfig::from_json(&json).unwrap();

        let file = config.metrics_file(4).unwrap();
        let expected = dir
            .join("best_trees")
            .join("client-id-4")
            .join("best_trees_client-id-4_1.json");
        assert_eq!(file.path(), expected);

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn zero_rounds_are_rejected() {
        let json = SHARED.replace(r#""rounds": 3"#, r#""rounds": 0"#);
        assert!(matches!(ClientConfig::from_json(&json), Err(ClientErr::Config(_))));
    }
}
