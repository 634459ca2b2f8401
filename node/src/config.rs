use std::{env, fmt::Display, fs, path::Path, str::FromStr, time::Duration};

use serde::Deserialize;

use crate::{aggregator::AggregationMode, error::ConfigErr, orchestrator::PartialPolicy};

const CONFIG_PATH_VAR: &str = "NODE_CONFIG";

/// Process wide settings of a node, read once at start up.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Identifies the node and its data partition.
    pub node_id: usize,
    pub host: String,
    /// The port subordinates submit to.
    pub port: u16,
    pub num_children: usize,
    pub collect_timeout_ms: u64,
    /// Bound for a single subordinate connection to deliver its frame.
    pub read_timeout_ms: u64,
    /// Budget of the second collection under `PartialPolicy::RetryOnce`,
    /// `collect_timeout_ms` if absent.
    pub retry_timeout_ms: Option<u64>,
    pub partial_policy: PartialPolicy,
    pub aggregation: AggregationMode,
    /// Where to submit this node's result after every round, if it has a parent.
    pub parent_addr: Option<String>,
    pub submit_timeout_ms: u64,
    pub rounds: usize,
    pub epochs: usize,
    pub max_frame_len: usize,
    /// Size of the synthetic partition.
    pub samples: usize,
    pub features: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            host: "127.0.0.1".to_string(),
            port: 0,
            num_children: 0,
            collect_timeout_ms: 30_000,
            read_timeout_ms: 10_000,
            retry_timeout_ms: None,
            partial_policy: PartialPolicy::default(),
            aggregation: AggregationMode::default(),
            parent_addr: None,
            submit_timeout_ms: 30_000,
            rounds: 1,
            epochs: 1,
            max_frame_len: comms::DEFAULT_MAX_FRAME_LEN,
            samples: 1_000,
            features: 8,
        }
    }
}

impl NodeConfig {
    /// Loads the configuration from the JSON file named by `NODE_CONFIG` if set,
    /// otherwise from individual environment variables.
    ///
    /// # Errors
    /// A `ConfigErr` if a value is missing, unparsable or out of range.
    pub fn from_env() -> Result<Self, ConfigErr> {
        match env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::from_json_file(path),
            Err(_) => Self::from_vars(|key| env::var(key).ok()),
        }
    }

    /// Loads the configuration from a JSON file with snake_case keys.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigErr> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigErr> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the configuration from upper case variables resolved by `lookup`.
    ///
    /// `PORT` is required when `NUM_CHILDREN` is positive.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigErr>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        parse(&lookup, "NODE_ID", &mut config.node_id)?;
        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        parse(&lookup, "NUM_CHILDREN", &mut config.num_children)?;
        parse(&lookup, "PORT", &mut config.port)?;
        if config.num_children > 0 && lookup("PORT").is_none() {
            return Err(ConfigErr::Missing("PORT"));
        }

        parse(&lookup, "COLLECT_TIMEOUT_MS", &mut config.collect_timeout_ms)?;
        parse(&lookup, "READ_TIMEOUT_MS", &mut config.read_timeout_ms)?;
        if lookup("RETRY_TIMEOUT_MS").is_some() {
            let mut retry = 0;
            parse(&lookup, "RETRY_TIMEOUT_MS", &mut retry)?;
            config.retry_timeout_ms = Some(retry);
        }
        parse(&lookup, "PARTIAL_POLICY", &mut config.partial_policy)?;
        parse(&lookup, "AGGREGATION", &mut config.aggregation)?;
        config.parent_addr = lookup("PARENT_ADDR");
        parse(&lookup, "SUBMIT_TIMEOUT_MS", &mut config.submit_timeout_ms)?;
        parse(&lookup, "ROUNDS", &mut config.rounds)?;
        parse(&lookup, "EPOCHS", &mut config.epochs)?;
        parse(&lookup, "MAX_FRAME_LEN", &mut config.max_frame_len)?;
        parse(&lookup, "SAMPLES", &mut config.samples)?;
        parse(&lookup, "FEATURES", &mut config.features)?;

        config.validate()?;
        Ok(config)
    }

    /// Checks the ranges that can't be expressed in the field types.
    pub fn validate(&self) -> Result<(), ConfigErr> {
        let positive = [
            ("COLLECT_TIMEOUT_MS", self.collect_timeout_ms),
            ("READ_TIMEOUT_MS", self.read_timeout_ms),
            ("RETRY_TIMEOUT_MS", self.retry_timeout_ms.unwrap_or(1)),
            ("SUBMIT_TIMEOUT_MS", self.submit_timeout_ms),
            ("ROUNDS", self.rounds as u64),
            ("EPOCHS", self.epochs as u64),
            ("MAX_FRAME_LEN", self.max_frame_len as u64),
            ("SAMPLES", self.samples as u64),
            ("FEATURES", self.features as u64),
        ];

        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigErr::Invalid {
                    key,
                    value: value.to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        }

        Ok(())
    }

    /// The address the subordinate listener binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn collect_timeout(&self) -> Duration {
        Duration::from_millis(self.collect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms.unwrap_or(self.collect_timeout_ms))
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }
}

/// Overwrites `out` with the parsed value of `key` if it's set.
fn parse<F, T>(lookup: &F, key: &'static str, out: &mut T) -> Result<(), ConfigErr>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    let Some(value) = lookup(key) else {
        return Ok(());
    };

    *out = value.trim().parse().map_err(|e: T::Err| ConfigErr::Invalid {
        key,
        reason: e.to_string(),
        value,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_for_a_leaf() {
        let config = NodeConfig::from_vars(vars(&[])).unwrap();

        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.collect_timeout(), Duration::from_secs(30));
        assert_eq!(config.retry_timeout(), config.collect_timeout());
    }

    #[test]
    fn test_parent_from_vars() {
        let config = NodeConfig::from_vars(vars(&[
            ("NODE_ID", "2"),
            ("HOST", "0.0.0.0"),
            ("PORT", "9100"),
            ("NUM_CHILDREN", "3"),
            ("COLLECT_TIMEOUT_MS", "1500"),
            ("RETRY_TIMEOUT_MS", "500"),
            ("PARTIAL_POLICY", "retry_once"),
            ("AGGREGATION", "weighted"),
            ("PARENT_ADDR", "10.0.0.1:9000"),
        ]))
        .unwrap();

        assert_eq!(config.node_id, 2);
        assert_eq!(config.listen_addr(), "0.0.0.0:9100");
        assert_eq!(config.num_children, 3);
        assert_eq!(config.collect_timeout(), Duration::from_millis(1500));
        assert_eq!(config.retry_timeout(), Duration::from_millis(500));
        assert_eq!(config.partial_policy, PartialPolicy::RetryOnce);
        assert_eq!(config.aggregation, AggregationMode::Weighted);
        assert_eq!(config.parent_addr.as_deref(), Some("10.0.0.1:9000"));
    }

    #[test]
    fn test_parent_requires_port() {
        let err = NodeConfig::from_vars(vars(&[("NUM_CHILDREN", "2")])).unwrap_err();
        assert!(matches!(err, ConfigErr::Missing("PORT")));
    }

    #[test]
    fn test_unparsable_value() {
        let err = NodeConfig::from_vars(vars(&[("NUM_CHILDREN", "two")])).unwrap_err();

        match err {
            ConfigErr::Invalid { key, value, .. } => {
                assert_eq!(key, "NUM_CHILDREN");
                assert_eq!(value, "two");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = NodeConfig::from_vars(vars(&[("COLLECT_TIMEOUT_MS", "0")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigErr::Invalid {
                key: "COLLECT_TIMEOUT_MS",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_samples_rejected() {
        let err = NodeConfig::from_vars(vars(&[("SAMPLES", "0")])).unwrap_err();
        assert!(matches!(err, ConfigErr::Invalid { key: "SAMPLES", .. }));

        let err = NodeConfig::from_json_str(r#"{"samples": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigErr::Invalid { key: "SAMPLES", .. }));
    }

    #[test]
    fn test_from_json() {
        let config = NodeConfig::from_json_str(
            r#"{
                "node_id": 1,
                "port": 9001,
                "num_children": 2,
                "partial_policy": "abort",
                "aggregation": "unweighted"
            }"#,
        )
        .unwrap();

        assert_eq!(config.port, 9001);
        assert_eq!(config.num_children, 2);
        assert_eq!(config.partial_policy, PartialPolicy::Abort);
        assert_eq!(config.collect_timeout_ms, 30_000);
    }

    #[test]
    fn test_from_json_unknown_field() {
        let err = NodeConfig::from_json_str(r#"{"num_kids": 2}"#).unwrap_err();
        assert!(matches!(err, ConfigErr::Json(_)));
    }
}
