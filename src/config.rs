use std::collections::{HashMap, HashSet};
use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::security::credentials::CredentialSpec;

fn default_parallelism() -> usize {
    1
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_max_queue_size() -> usize {
    100
}
fn default_idle_timeout_secs() -> u64 {
    60
}

/// Per-connection configuration of the egress path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Requested number of simultaneous in-flight requests. The effective
    /// worker count is this value rounded up to the next power of two.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Submissions beyond this many queued requests are dropped with an
    /// immediate queue-overflow failure.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialSpec>,
    /// HTTP methods whose request body is never sent, upper-cased.
    #[serde(default)]
    pub omit_body_methods: HashSet<String>,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Proxy URL for all outbound requests, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            request_timeout_secs: default_request_timeout_secs(),
            max_queue_size: default_max_queue_size(),
            credentials: None,
            omit_body_methods: HashSet::new(),
            idle_timeout_secs: default_idle_timeout_secs(),
            proxy: None,
        }
    }
}

impl ConnectionConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).context("reading connection config file")?;
        let cfg: ConnectionConfig = serde_json::from_str(&raw).context("parsing JSON")?;
        Ok(cfg)
    }

    /// Overlay the string-keyed specific-config map that arrives alongside
    /// a connection definition. Unknown keys are ignored.
    pub fn apply_specific_config(&mut self, specific: &HashMap<String, String>) {
        if let Some(value) = specific.get("parallelism") {
            if let Ok(parallelism) = value.parse::<usize>() {
                self.parallelism = parallelism;
            }
        }
        if let Some(value) = specific.get("idleTimeout") {
            if let Some(secs) = parse_seconds(value) {
                self.idle_timeout_secs = secs;
            }
        }
        if let Some(value) = specific.get("omitRequestBody") {
            self.omit_body_methods = value
                .split(',')
                .map(|method| method.trim().to_ascii_uppercase())
                .filter(|method| !method.is_empty())
                .collect();
        }
    }

    /// Effective worker count: parallelism rounded up to a power of two.
    pub fn worker_count(&self) -> usize {
        self.parallelism.max(1).next_power_of_two()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn omits_body_for(&self, method: &str) -> bool {
        self.omit_body_methods.contains(&method.to_ascii_uppercase())
    }
}

/// Accepts plain seconds (`"30"`) or a seconds suffix (`"30s"`).
fn parse_seconds(value: &str) -> Option<u64> {
    value
        .strip_suffix('s')
        .unwrap_or(value)
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parallelism_rounds_up_to_powers_of_two() {
        let cases = [
            (1, 1),
            (2, 2),
            (3, 4),
            (4, 4),
            (5, 8),
            (8, 8),
            (9, 16),
            (10, 16),
            (16, 16),
        ];
        for (requested, expected) in cases {
            let config = ConnectionConfig {
                parallelism: requested,
                ..Default::default()
            };
            assert_eq!(config.worker_count(), expected, "parallelism {requested}");
        }
    }

    #[test]
    fn zero_parallelism_still_yields_one_worker() {
        let config = ConnectionConfig {
            parallelism: 0,
            ..Default::default()
        };
        assert_eq!(config.worker_count(), 1);
    }

    #[test]
    fn specific_config_overlays_known_keys() {
        let mut config = ConnectionConfig::default();
        let specific = HashMap::from([
            ("parallelism".to_owned(), "5".to_owned()),
            ("idleTimeout".to_owned(), "30s".to_owned()),
            ("omitRequestBody".to_owned(), "get, delete".to_owned()),
            ("somethingElse".to_owned(), "ignored".to_owned()),
        ]);
        config.apply_specific_config(&specific);

        assert_eq!(config.parallelism, 5);
        assert_eq!(config.idle_timeout_secs, 30);
        assert!(config.omits_body_for("GET"));
        assert!(config.omits_body_for("delete"));
        assert!(!config.omits_body_for("POST"));
    }

    #[test]
    fn unparsable_specific_values_leave_defaults_in_place() {
        let mut config = ConnectionConfig::default();
        config.apply_specific_config(&HashMap::from([(
            "parallelism".to_owned(),
            "lots".to_owned(),
        )]));
        assert_eq!(config.parallelism, default_parallelism());
    }

    #[test]
    fn from_file_parses_credentials() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{
                "parallelism": 4,
                "request_timeout_secs": 10,
                "credentials": {{
                    "type": "azure-monitor",
                    "workspace_id": "ws",
                    "shared_key_base64": "aGk="
                }}
            }}"#
        )
        .unwrap();

        let config = ConnectionConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.parallelism, 4);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert!(matches!(
            config.credentials,
            Some(CredentialSpec::AzureMonitor { .. })
        ));
        // Untouched keys keep their defaults.
        assert_eq!(config.max_queue_size, 100);
    }

    #[test]
    fn from_file_missing_file_errors() {
        assert!(ConnectionConfig::from_file("/nonexistent/egress.json").is_err());
    }
}
