//! Cache configuration
//!
//! Provides:
//! - Environment-based defaults (development, testing, production)
//! - TOML file loading and saving
//! - Environment variable overrides
//! - Validation that rejects misconfiguration at construction time

use crate::cache::EvictionStrategy;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub environment: Environment,
    pub memory: MemoryTierConfig,
    /// Durable tier; absent means memory-only operation
    #[serde(default)]
    pub durable: Option<DurableTierConfig>,
    #[serde(default)]
    pub ttl: TtlDefaults,
}

/// Bounded in-memory tier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryTierConfig {
    pub max_size: usize,
    #[serde(default)]
    pub strategy: EvictionStrategy,
}

/// Durable directory-backed tier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableTierConfig {
    pub directory: PathBuf,
    pub max_size_bytes: u64,
}

/// Default time-to-live applied by the domain helpers. `None` means the
/// entries never expire. Fields missing from a `[ttl]` table keep their
/// built-in defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlDefaults {
    #[serde(with = "humantime_serde")]
    pub config: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub measurement: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub calibration: Option<Duration>,
}

impl Default for TtlDefaults {
    fn default() -> Self {
        Self {
            config: Some(Duration::from_secs(3600)),
            measurement: Some(Duration::from_secs(300)),
            calibration: Some(Duration::from_secs(86400)),
        }
    }
}

/// Environment enumeration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Testing,
    Production,
}

impl Environment {
    /// Resolve from `HAL_CACHE_ENV`, defaulting to development.
    pub fn from_env() -> Self {
        match env::var("HAL_CACHE_ENV")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "production" | "prod" => Environment::Production,
            "testing" | "test" => Environment::Testing,
            _ => Environment::Development,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::default_for_environment(Environment::Development)
    }
}

impl CacheConfig {
    /// Memory-only configuration with the given capacity and strategy.
    pub fn memory_only(max_size: usize, strategy: EvictionStrategy) -> Self {
        Self {
            environment: Environment::Development,
            memory: MemoryTierConfig { max_size, strategy },
            durable: None,
            ttl: TtlDefaults::default(),
        }
    }

    pub fn with_durable(mut self, directory: impl Into<PathBuf>, max_size_bytes: u64) -> Self {
        self.durable = Some(DurableTierConfig {
            directory: directory.into(),
            max_size_bytes,
        });
        self
    }

    /// Load configuration for the current environment from
    /// `$HAL_CACHE_CONFIG_PATH/<env>.toml` when present, falling back to the
    /// environment defaults, then apply environment variable overrides.
    pub fn load() -> Result<Self> {
        let environment = Environment::from_env();
        let path = Self::get_config_path(environment);

        let mut config = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            Self::default_for_environment(environment)
        };

        config.override_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        let config: CacheConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    fn get_config_path(environment: Environment) -> PathBuf {
        let base_path =
            env::var("HAL_CACHE_CONFIG_PATH").unwrap_or_else(|_| "config".to_string());

        let filename = match environment {
            Environment::Production => "production.toml",
            Environment::Testing => "testing.toml",
            Environment::Development => "development.toml",
        };

        PathBuf::from(base_path).join(filename)
    }

    /// Override configuration with environment variables
    pub fn override_from_env(&mut self) -> Result<()> {
        if let Ok(val) = env::var("HAL_CACHE_MEMORY_SIZE") {
            self.memory.max_size = val
                .parse()
                .map_err(|_| Error::Config(format!("Invalid memory size: {}", val)))?;
        }

        if let Ok(val) = env::var("HAL_CACHE_STRATEGY") {
            self.memory.strategy = val.parse()?;
        }

        if let Ok(val) = env::var("HAL_CACHE_DIR") {
            let max_size_bytes = self
                .durable
                .as_ref()
                .map_or(DEFAULT_DURABLE_MAX_BYTES, |d| d.max_size_bytes);
            self.durable = Some(DurableTierConfig {
                directory: PathBuf::from(val),
                max_size_bytes,
            });
        }

        if let Ok(val) = env::var("HAL_CACHE_MAX_SIZE_BYTES") {
            let bytes = val
                .parse()
                .map_err(|_| Error::Config(format!("Invalid durable size: {}", val)))?;
            match self.durable.as_mut() {
                Some(durable) => durable.max_size_bytes = bytes,
                None => {
                    return Err(Error::Config(
                        "HAL_CACHE_MAX_SIZE_BYTES set without a cache directory".to_string(),
                    ))
                }
            }
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.memory.max_size == 0 {
            return Err(Error::invalid_config("memory.max_size", "> 0"));
        }

        if let Some(durable) = &self.durable {
            if durable.max_size_bytes == 0 {
                return Err(Error::invalid_config("durable.max_size_bytes", "> 0"));
            }
            if durable.directory.as_os_str().is_empty() {
                return Err(Error::invalid_config("durable.directory", "non-empty path"));
            }
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;
        Ok(())
    }

    /// Generate default configuration for an environment
    pub fn default_for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Production => Self::production_defaults(),
            Environment::Testing => Self::testing_defaults(),
            Environment::Development => Self::development_defaults(),
        }
    }

    fn production_defaults() -> Self {
        CacheConfig {
            environment: Environment::Production,
            memory: MemoryTierConfig {
                max_size: 10_000,
                strategy: EvictionStrategy::Lru,
            },
            durable: Some(DurableTierConfig {
                directory: PathBuf::from("/var/cache/hal"),
                max_size_bytes: 500 * 1024 * 1024,
            }),
            ttl: TtlDefaults::default(),
        }
    }

    fn development_defaults() -> Self {
        CacheConfig {
            environment: Environment::Development,
            memory: MemoryTierConfig {
                max_size: 1000,
                strategy: EvictionStrategy::Lru,
            },
            durable: Some(DurableTierConfig {
                directory: PathBuf::from("./data/cache"),
                max_size_bytes: DEFAULT_DURABLE_MAX_BYTES,
            }),
            ttl: TtlDefaults::default(),
        }
    }

    fn testing_defaults() -> Self {
        CacheConfig {
            environment: Environment::Testing,
            memory: MemoryTierConfig {
                max_size: 100,
                strategy: EvictionStrategy::Lru,
            },
            durable: None,
            ttl: TtlDefaults::default(),
        }
    }
}

/// Default durable budget: 100 MB
pub const DEFAULT_DURABLE_MAX_BYTES: u64 = 100 * 1024 * 1024;
