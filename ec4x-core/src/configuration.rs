//! Daemon configuration, KDL on disk:
//!
//! ```kdl
//! data_dir "/var/lib/ec4x"
//! poll_interval 30
//! relay_urls "wss://relay.one" "wss://relay.two"
//! replay_retention_turns 20
//! replay_retention_days 30
//! replay_retention_days_definition 90
//! replay_retention_days_state 14
//! ```

use anyhow::{anyhow, Context, Result};
use kdl::KdlDocument;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub data_dir: PathBuf,
    pub poll_interval_secs: u64,
    pub relay_urls: Vec<String>,
    pub replay_retention_turns: u32,
    pub replay_retention_days: i64,
    pub replay_retention_days_definition: i64,
    pub replay_retention_days_state: i64,
    /// Optional balance-table override; embedded defaults otherwise.
    pub game_config_path: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./ec4x-data"),
            poll_interval_secs: 30,
            relay_urls: Vec::new(),
            replay_retention_turns: 20,
            replay_retention_days: 30,
            replay_retention_days_definition: 90,
            replay_retention_days_state: 14,
            game_config_path: None,
        }
    }
}

impl DaemonConfig {
    pub fn from_kdl(text: &str) -> Result<Self> {
        let doc: KdlDocument = text.parse().map_err(|e: kdl::KdlError| anyhow!("daemon config: {e}"))?;
        let mut config = Self::default();

        for node in doc.nodes() {
            let name = node.name().value();
            let args: Vec<_> = node
                .entries()
                .iter()
                .filter(|e| e.name().is_none())
                .map(|e| e.value())
                .collect();
            let first_str = args.first().and_then(|v| v.as_string());
            let first_i64 = args.first().and_then(|v| v.as_i64());

            match name {
                "data_dir" => {
                    config.data_dir = PathBuf::from(first_str.ok_or_else(|| anyhow!("data_dir needs a string"))?)
                }
                "poll_interval" => {
                    config.poll_interval_secs = first_i64.ok_or_else(|| anyhow!("poll_interval needs an integer"))? as u64
                }
                "relay_urls" => {
                    config.relay_urls = args
                        .iter()
                        .filter_map(|v| v.as_string())
                        .map(|s| s.to_string())
                        .collect()
                }
                "replay_retention_turns" => {
                    config.replay_retention_turns =
                        first_i64.ok_or_else(|| anyhow!("replay_retention_turns needs an integer"))? as u32
                }
                "replay_retention_days" => {
                    config.replay_retention_days = first_i64.ok_or_else(|| anyhow!("replay_retention_days needs an integer"))?
                }
                "replay_retention_days_definition" => {
                    config.replay_retention_days_definition =
                        first_i64.ok_or_else(|| anyhow!("replay_retention_days_definition needs an integer"))?
                }
                "replay_retention_days_state" => {
                    config.replay_retention_days_state =
                        first_i64.ok_or_else(|| anyhow!("replay_retention_days_state needs an integer"))?
                }
                "game_config" => {
                    config.game_config_path = Some(PathBuf::from(
                        first_str.ok_or_else(|| anyhow!("game_config needs a string"))?,
                    ))
                }
                other => return Err(anyhow!("unknown daemon config node \"{other}\"")),
            }
        }
        Ok(config)
    }

    /// Missing file is fatal at startup when a path was given explicitly.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).with_context(|| format!("reading daemon config {}", path.display()))?;
                Self::from_kdl(&text)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn games_dir(&self) -> PathBuf {
        self.data_dir.join("games")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config_parses() {
        let config = DaemonConfig::from_kdl(
            r#"
data_dir "/srv/ec4x"
poll_interval 15
relay_urls "wss://a.example" "wss://b.example"
replay_retention_turns 10
replay_retention_days 7
replay_retention_days_definition 60
replay_retention_days_state 5
"#,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/ec4x"));
        assert_eq!(config.poll_interval_secs, 15);
        assert_eq!(config.relay_urls.len(), 2);
        assert_eq!(config.replay_retention_days_state, 5);
    }

    #[test]
    fn unknown_nodes_are_fatal() {
        assert!(DaemonConfig::from_kdl("launch_codes 123").is_err());
    }
}
