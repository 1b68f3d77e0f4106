//! CLI configuration management.

use anyhow::{Context, anyhow, bail};
use serde::{Deserialize, Serialize};
use shipyard_trace::LogFormat;
use std::path::PathBuf;

/// CLI configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Root for per-instance working directories.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    /// Root for run artifact storage.
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,
    /// Runner limit used when the pipeline declares none.
    #[serde(default)]
    pub max_runners: Option<usize>,
    /// Report format.
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Log line format.
    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

impl std::str::FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "yaml" => Ok(OutputFormat::Yaml),
            _ => bail!("Invalid output format: {}", s),
        }
    }
}

impl CliConfig {
    /// Load configuration from the default location.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> anyhow::Result<PathBuf> {
        let dirs = Self::project_dirs()?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    fn project_dirs() -> anyhow::Result<directories::ProjectDirs> {
        directories::ProjectDirs::from("dev", "shipyard", "shipyard")
            .ok_or_else(|| anyhow!("Could not determine config directory"))
    }

    /// Working directory root, falling back to the platform cache directory.
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(|| {
            Self::project_dirs()
                .map(|d| d.cache_dir().join("work"))
                .unwrap_or_else(|_| std::env::temp_dir().join("shipyard").join("work"))
        })
    }

    /// Artifact root, falling back to the platform data directory.
    pub fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir.clone().unwrap_or_else(|| {
            Self::project_dirs()
                .map(|d| d.data_dir().join("artifacts"))
                .unwrap_or_else(|_| std::env::temp_dir().join("shipyard").join("artifacts"))
        })
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "work_dir" => self.work_dir = Some(PathBuf::from(value)),
            "artifact_dir" => self.artifact_dir = Some(PathBuf::from(value)),
            "max_runners" => {
                let n: usize = value
                    .parse()
                    .with_context(|| format!("Invalid max_runners: {}", value))?;
                if n == 0 {
                    bail!("max_runners must be at least 1");
                }
                self.max_runners = Some(n);
            }
            "output_format" => self.output_format = value.parse()?,
            "log_format" => self.log_format = value.parse().map_err(|e: String| anyhow!(e))?,
            _ => bail!("Unknown config key: {}", key),
        }
        Ok(())
    }
}
