use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::search;

const DEFAULT_INGEST_QUEUE_SIZE: usize = 100;

/// Search defaults applied when a request leaves a knob unset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Minimum match score [0.0, 1.0] a candidate must reach.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Maximum rows to return; 0 means unbounded.
    #[serde(default)]
    pub max_results: usize,

    /// Cost of a case-only character replacement in the distance
    /// calculation. Below 1.0 warps results in favor of case-only variants.
    #[serde(default = "default_case_cost")]
    pub case_cost: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            threshold: search::DEFAULT_THRESHOLD,
            max_results: 0,
            case_cost: search::DEFAULT_CASE_COST,
        }
    }
}

fn default_threshold() -> f64 {
    search::DEFAULT_THRESHOLD
}

fn default_case_cost() -> f64 {
    search::DEFAULT_CASE_COST
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Worker threads for the search fan-out; 0 means all available cores.
    #[serde(default)]
    pub num_cores: usize,

    #[serde(default)]
    pub search: SearchConfig,

    /// Bound on jobs waiting in the background import queue.
    #[serde(default = "default_ingest_queue_size")]
    pub ingest_queue_size: usize,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

fn default_ingest_queue_size() -> usize {
    DEFAULT_INGEST_QUEUE_SIZE
}

impl Config {
    fn validate(&mut self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.search.threshold) {
            anyhow::bail!(
                "search.threshold must be between 0.0 and 1.0, got {}",
                self.search.threshold
            );
        }
        if self.search.case_cost < 0.0 {
            anyhow::bail!(
                "search.case_cost must not be negative, got {}",
                self.search.case_cost
            );
        }
        if self.ingest_queue_size == 0 {
            self.ingest_queue_size = 1;
        }
        Ok(())
    }

    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(base_path)?;
        let config_path = base_path.join("config.yaml");

        // Create new if it does not exist.
        if std::fs::metadata(&config_path).is_err() {
            std::fs::write(&config_path, serde_yml::to_string(&Self::default())?)?;
        }

        let config_str = std::fs::read_to_string(&config_path)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;
        config.base_path = base_path.to_path_buf();
        config.validate()?;

        // Resave in case the config grew new defaulted fields.
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = self.base_path.join("config.yaml");
        std::fs::write(config_path, serde_yml::to_string(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.num_cores, 0);
        assert_eq!(config.search.threshold, search::DEFAULT_THRESHOLD);
        assert_eq!(config.search.case_cost, search::DEFAULT_CASE_COST);
        assert_eq!(config.search.max_results, 0);
    }

    #[test]
    fn test_load_creates_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_with(dir.path()).unwrap();
        assert_eq!(config.ingest_queue_size, DEFAULT_INGEST_QUEUE_SIZE);

        // Second load reads the file written by the first.
        let reloaded = Config::load_with(dir.path()).unwrap();
        assert_eq!(reloaded.search.threshold, config.search.threshold);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.yaml"), "search:\n  threshold: 1.5\n").unwrap();
        assert!(Config::load_with(dir.path()).is_err());
    }
}
