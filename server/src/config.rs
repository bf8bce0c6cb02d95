//! Server configuration
//!
//! Values come from three layers: built-in defaults, an optional JSON file
//! and command line flags. Missing file fields fall back to the defaults.

use serde::{Deserialize, Serialize};
use shared::{MAX_PLAYERS_PER_FRAME, START_MASS};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub bind_addr: SocketAddr,
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Maximum concurrent connections, joined or not
    pub max_players: usize,
    /// Seconds a connection may stay without joining
    pub join_timeout_secs: u64,
    /// Frames that may wait for a slow peer before it is dropped
    pub outbound_queue: usize,
    /// Distance covered per tick while pursuing the target
    pub move_step: f32,
    /// Players closer than this to their target stop moving
    pub snap_distance: f32,
    pub start_mass: u32,
    /// Fixed seed for spawn points and tokens; random when unset
    pub rng_seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 2000)),
            tick_rate: 20,
            max_players: 64,
            join_timeout_secs: 10,
            outbound_queue: 256,
            move_step: 0.5,
            snap_distance: 1.0,
            start_mass: START_MASS,
            rng_seed: None,
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // The pursuit step only converges when it runs at least twice per second.
        if self.tick_rate < 2 {
            return Err(invalid("tick_rate", "must be at least 2"));
        }
        if self.max_players == 0 || self.max_players > MAX_PLAYERS_PER_FRAME {
            return Err(invalid(
                "max_players",
                format!("must be between 1 and {}", MAX_PLAYERS_PER_FRAME),
            ));
        }
        if self.outbound_queue == 0 {
            return Err(invalid("outbound_queue", "must be at least 1"));
        }
        if !(self.move_step.is_finite() && self.move_step > 0.0) {
            return Err(invalid("move_step", "must be a positive number"));
        }
        if !(self.snap_distance.is_finite() && self.snap_distance > 0.0) {
            return Err(invalid("snap_distance", "must be a positive number"));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate.max(1)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_addr.port(), 2000);
        assert_eq!(config.tick_interval(), Duration::from_millis(50));
        assert_eq!(config.join_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            ServerConfig::from_json(r#"{ "tick_rate": 30, "bind_addr": "0.0.0.0:4000" }"#)
                .unwrap();
        assert_eq!(config.tick_rate, 30);
        assert_eq!(config.bind_addr, "0.0.0.0:4000".parse().unwrap());
        assert_eq!(config.max_players, 64);
        assert_eq!(config.rng_seed, None);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = ServerConfig {
            rng_seed: Some(99),
            ..ServerConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(ServerConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            ServerConfig::from_json("{ tick_rate: }"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = ServerConfig::from_file("/nonexistent/blobs.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/blobs.json"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases: Vec<(ServerConfig, &str)> = vec![
            (
                ServerConfig {
                    tick_rate: 1,
                    ..Default::default()
                },
                "tick_rate",
            ),
            (
                ServerConfig {
                    max_players: 0,
                    ..Default::default()
                },
                "max_players",
            ),
            (
                ServerConfig {
                    max_players: MAX_PLAYERS_PER_FRAME + 1,
                    ..Default::default()
                },
                "max_players",
            ),
            (
                ServerConfig {
                    outbound_queue: 0,
                    ..Default::default()
                },
                "outbound_queue",
            ),
            (
                ServerConfig {
                    move_step: f32::NAN,
                    ..Default::default()
                },
                "move_step",
            ),
            (
                ServerConfig {
                    snap_distance: -1.0,
                    ..Default::default()
                },
                "snap_distance",
            ),
        ];

        for (config, expected) in cases {
            match config.validate() {
                Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected),
                other => panic!("{} accepted: {:?}", expected, other),
            }
        }
    }
}
