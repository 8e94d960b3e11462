//! Configuration management
//!
//! This module handles loading, validation, and management of the Estate configuration.
//! Configuration is stored in TOML format at ~/.estate/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **orchestrator**: Plan deadline and collaborator call policy
//! - **memory**: Session store backend and retention
//! - **search**: Result limits and embedding model
//! - **renovation**: Default tier and per-tier unit cost rates
//! - **router**: Known location names
//! - **vector**: Similarity service endpoint (optional)
//!
//! Every section has defaults, so a partial file is valid.
//!
//! # Examples
//!
//! ```no_run
//! use estate_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Plan deadline: {:?}", config.orchestrator.plan_timeout());
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use sdk::types::RenovationTier;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Orchestration settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Session memory settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Search settings
    #[serde(default)]
    pub search: SearchConfig,

    /// Renovation estimator settings
    #[serde(default)]
    pub renovation: RenovationConfig,

    /// Query router settings
    #[serde(default)]
    pub router: RouterConfig,

    /// Vector index settings
    #[serde(default)]
    pub vector: VectorConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

/// Upper bound for any configured timeout (10 minutes)
pub const MAX_TIMEOUT_MS: u64 = 600_000;

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Deadline for a whole plan, in milliseconds
    #[serde(default = "default_plan_timeout_ms")]
    pub plan_timeout_ms: u64,

    /// Deadline for one collaborator call, in milliseconds
    #[serde(default = "default_collaborator_timeout_ms")]
    pub collaborator_timeout_ms: u64,

    /// Extra attempts after a failed collaborator call
    #[serde(default = "default_collaborator_retries")]
    pub collaborator_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            plan_timeout_ms: default_plan_timeout_ms(),
            collaborator_timeout_ms: default_collaborator_timeout_ms(),
            collaborator_retries: default_collaborator_retries(),
        }
    }
}

impl OrchestratorConfig {
    pub fn plan_timeout(&self) -> Duration {
        Duration::from_millis(self.plan_timeout_ms)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }
}

/// Session store backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Memory system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Where session logs live
    #[serde(default)]
    pub backend: MemoryBackend,

    /// Executed plans kept per session for reference resolution
    #[serde(default = "default_max_retained_plans")]
    pub max_retained_plans: usize,

    /// Most recent entries used to derive conversation state
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: MemoryBackend::default(),
            max_retained_plans: default_max_retained_plans(),
            history_window: default_history_window(),
        }
    }
}

/// Search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Row limit for structured queries
    #[serde(default = "default_structured_limit")]
    pub structured_limit: usize,

    /// Hit limit for similarity search
    #[serde(default = "default_semantic_limit")]
    pub semantic_limit: usize,

    /// Embedding model requested from the vector index
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            structured_limit: default_structured_limit(),
            semantic_limit: default_semantic_limit(),
            embedding_model: default_embedding_model(),
        }
    }
}

/// Per-tier unit cost per square foot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatesConfig {
    #[serde(default = "default_rate_basic")]
    pub basic: f64,
    #[serde(default = "default_rate_moderate")]
    pub moderate: f64,
    #[serde(default = "default_rate_high_end")]
    pub high_end: f64,
    #[serde(default = "default_rate_luxury")]
    pub luxury: f64,
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            basic: default_rate_basic(),
            moderate: default_rate_moderate(),
            high_end: default_rate_high_end(),
            luxury: default_rate_luxury(),
        }
    }
}

impl RatesConfig {
    pub fn rate(&self, tier: RenovationTier) -> f64 {
        match tier {
            RenovationTier::Basic => self.basic,
            RenovationTier::Moderate => self.moderate,
            RenovationTier::HighEnd => self.high_end,
            RenovationTier::Luxury => self.luxury,
        }
    }
}

/// Renovation estimator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenovationConfig {
    /// Tier used when the query names none
    #[serde(default = "default_tier")]
    pub default_tier: String,

    #[serde(default)]
    pub rates: RatesConfig,
}

impl Default for RenovationConfig {
    fn default() -> Self {
        Self {
            default_tier: default_tier(),
            rates: RatesConfig::default(),
        }
    }
}

impl RenovationConfig {
    /// Parsed default tier. Validation guarantees it parses.
    pub fn default_tier(&self) -> RenovationTier {
        RenovationTier::parse(&self.default_tier).unwrap_or(RenovationTier::Moderate)
    }
}

/// Query router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Location names recognised before the generic "in <Place>" rule
    #[serde(default = "default_known_locations")]
    pub known_locations: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            known_locations: default_known_locations(),
        }
    }
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VectorConfig {
    /// Base URL of the similarity service
    #[serde(default)]
    pub endpoint: Option<String>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.estate")
}

fn default_plan_timeout_ms() -> u64 {
    30_000
}

fn default_collaborator_timeout_ms() -> u64 {
    10_000
}

fn default_collaborator_retries() -> u32 {
    1
}

fn default_max_retained_plans() -> usize {
    10
}

fn default_history_window() -> usize {
    20
}

fn default_structured_limit() -> usize {
    50
}

fn default_semantic_limit() -> usize {
    5
}

fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_tier() -> String {
    "moderate".to_string()
}

fn default_rate_basic() -> f64 {
    25.0
}

fn default_rate_moderate() -> f64 {
    75.0
}

fn default_rate_high_end() -> f64 {
    150.0
}

fn default_rate_luxury() -> f64 {
    250.0
}

fn default_known_locations() -> Vec<String> {
    [
        "Mumbai",
        "Delhi",
        "Bangalore",
        "Hyderabad",
        "Chennai",
        "Pune",
        "Kolkata",
        "Ahmedabad",
        "Jaipur",
        "Lucknow",
        "Gurgaon",
        "Noida",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Config {
    /// Load configuration from the default location (~/.estate/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration text without touching the filesystem
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let config = Self::default();
        config.validate()?;

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.estate/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".estate").join("config.toml"))
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The log level is unknown
    /// - A timeout is zero or above `MAX_TIMEOUT_MS`
    /// - A limit is zero
    /// - The default tier is unknown
    /// - A unit cost rate is not positive
    pub fn validate(&self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        for (name, value) in [
            ("plan_timeout_ms", self.orchestrator.plan_timeout_ms),
            ("collaborator_timeout_ms", self.orchestrator.collaborator_timeout_ms),
        ] {
            if value == 0 || value > MAX_TIMEOUT_MS {
                return Err(EngineError::Config(format!(
                    "{} must be between 1 and {}, got {}",
                    name, MAX_TIMEOUT_MS, value
                )));
            }
        }

        if self.memory.max_retained_plans == 0 || self.memory.history_window == 0 {
            return Err(EngineError::Config(
                "max_retained_plans and history_window must be greater than 0".to_string(),
            ));
        }

        if self.search.structured_limit == 0 || self.search.semantic_limit == 0 {
            return Err(EngineError::Config(
                "structured_limit and semantic_limit must be greater than 0".to_string(),
            ));
        }

        if RenovationTier::parse(&self.renovation.default_tier).is_none() {
            return Err(EngineError::Config(format!(
                "Invalid default tier '{}'. Must be one of: basic, moderate, high_end, luxury",
                self.renovation.default_tier
            )));
        }

        for tier in RenovationTier::ALL {
            let rate = self.renovation.rates.rate(tier);
            if !(rate.is_finite() && rate > 0.0) {
                return Err(EngineError::Config(format!(
                    "Rate for tier '{}' must be positive",
                    tier.as_str()
                )));
            }
        }

        Ok(())
    }

    /// Data directory with ~ expanded, created if missing
    pub fn data_dir(&self) -> Result<PathBuf, EngineError> {
        let dir = expand_path(&self.core.data_dir)?;

        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(dir)
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.orchestrator.plan_timeout_ms, 30_000);
        assert_eq!(config.memory.backend, MemoryBackend::Memory);
        assert_eq!(config.search.semantic_limit, 5);
        assert_eq!(config.renovation.default_tier(), RenovationTier::Moderate);
        assert!(config
            .router
            .known_locations
            .iter()
            .any(|l| l == "Hyderabad"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        let expanded = expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_rates_by_tier() {
        let rates = RatesConfig::default();
        assert_eq!(rates.rate(RenovationTier::Basic), 25.0);
        assert_eq!(rates.rate(RenovationTier::HighEnd), 150.0);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(
            config.renovation.rates,
            deserialized.renovation.rates
        );
    }

    #[test]
    fn test_rejects_invalid_values() {
        let mut config = Config::default();
        config.orchestrator.plan_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.orchestrator.plan_timeout_ms = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.orchestrator.collaborator_timeout_ms = MAX_TIMEOUT_MS + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.orchestrator.plan_timeout_ms = MAX_TIMEOUT_MS;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.renovation.default_tier = "gold".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.renovation.rates.luxury = -1.0;
        assert!(config.validate().is_err());
    }
}
