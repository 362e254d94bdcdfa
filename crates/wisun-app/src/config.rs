//! Daemon configuration

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use wisun_core::config::LinkConfig;
use wisun_core::protocol::dialect::RouteBCredentials;

/// Link settings plus the foreground loop's own settings, in one JSON file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(flatten)]
    pub link: LinkConfig,

    /// Start connecting as soon as the module is found
    #[serde(default = "default_auto_connect")]
    pub auto_connect: bool,

    /// Wait after a failed join before trying again
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,

    /// Period of the property poll while connected
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Property codes to poll, as hex strings such as "E0"
    #[serde(default = "default_poll_properties")]
    pub poll_properties: Vec<String>,
}

fn default_auto_connect() -> bool {
    true
}

fn default_retry_interval_secs() -> u64 {
    60
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_poll_properties() -> Vec<String> {
    vec!["E0".to_string()]
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: DaemonConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.link.validate()?;
        config.poll_codes()?;
        Ok(config)
    }

    /// Settings for the simulated meter
    pub fn demo() -> Self {
        let mut link = LinkConfig::new(RouteBCredentials {
            id: "00000000000000000000000000000000".to_string(),
            password: "DEMODEMODEMO".to_string(),
        });
        link.device = "demo".to_string();
        link.reset_gpio = None;
        link.timing.send_interval_ms = 5_000;
        Self {
            link,
            auto_connect: true,
            retry_interval_secs: 10,
            poll_interval_secs: 20,
            poll_properties: vec!["D3".to_string(), "E1".to_string(), "E0".to_string()],
        }
    }

    pub fn poll_codes(&self) -> Result<Vec<u8>> {
        self.poll_properties
            .iter()
            .map(|s| {
                let s = s.trim().trim_start_matches("0x");
                if s.len() != 2 {
                    bail!("property code '{}' is not one hex byte", s);
                }
                u8::from_str_radix(s, 16)
                    .with_context(|| format!("property code '{}' is not hex", s))
            })
            .collect()
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_flattened_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "device": "/dev/ttyUSB0",
                "route_b": {{ "id": "0011", "password": "secret" }},
                "poll_properties": ["e7", "0xE0"],
                "auto_connect": false
            }}"#
        )
        .unwrap();

        let config = DaemonConfig::load(file.path()).unwrap();
        assert_eq!(config.link.device, "/dev/ttyUSB0");
        assert!(!config.auto_connect);
        assert_eq!(config.retry_interval(), Duration::from_secs(60));
        assert_eq!(config.poll_codes().unwrap(), vec![0xE7, 0xE0]);
    }

    #[test]
    fn test_bad_property_code() {
        let mut config = DaemonConfig::demo();
        config.poll_properties = vec!["E".to_string()];
        assert!(config.poll_codes().is_err());
        config.poll_properties = vec!["ZZ".to_string()];
        assert!(config.poll_codes().is_err());
    }

    #[test]
    fn test_demo_config_is_valid() {
        let config = DaemonConfig::demo();
        config.link.validate().unwrap();
        assert_eq!(config.poll_codes().unwrap(), vec![0xD3, 0xE1, 0xE0]);
    }
}
