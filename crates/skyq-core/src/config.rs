//! skyq.toml configuration parser.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::QueuePolicy;

/// Errors while loading or writing configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkyqConfig {
    pub observer: ObserverConfig,
    #[serde(default, rename = "queue")]
    pub queues: Vec<QueueConfig>,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Observer location. Longitude is positive east.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverConfig {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
    /// Default horizon limit in degrees for targets without their own.
    #[serde(default)]
    pub horizon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    #[serde(flatten)]
    pub policy: QueuePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Time advance when nothing can be selected, seconds.
    pub step_secs: f64,
    /// Default forecast length, seconds.
    pub horizon_secs: f64,
    /// Upper bound on selection steps in a single forecast.
    pub max_steps: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            step_secs: 60.0,
            horizon_secs: 86_400.0,
            max_steps: 10_000,
        }
    }
}

impl SkyqConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SkyqConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(-90.0..=90.0).contains(&self.observer.latitude) {
            return Err(ConfigError::Invalid(format!(
                "latitude {} out of range",
                self.observer.latitude
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for q in &self.queues {
            if !seen.insert(q.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate queue name {}", q.name)));
            }
        }
        if self.simulation.step_secs <= 0.0 {
            return Err(ConfigError::Invalid("simulation.step_secs must be positive".into()));
        }
        Ok(())
    }

    /// Scaffold a config with a single default queue.
    pub fn scaffold(latitude: f64, longitude: f64) -> Self {
        SkyqConfig {
            observer: ObserverConfig {
                latitude,
                longitude,
                altitude: 0.0,
                horizon: 10.0,
            },
            queues: vec![QueueConfig {
                name: "plan".to_string(),
                policy: QueuePolicy::default(),
            }],
            simulation: SimulationConfig::default(),
        }
    }
}
