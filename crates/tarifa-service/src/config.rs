//! Tarifa service configuration
//!
//! Sources, later ones winning:
//! 1. built-in defaults
//! 2. `tarifa.toml` in the working directory, if present
//! 3. `TARIFA__<SECTION>__<KEY>` environment variables
//! 4. `PORT`, for platforms that assign one

use anyhow::{bail, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use tarifa_engine::EngineConfig;

/// Tarifa service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TarifaConfig {
    pub server: ServerSettings,
    pub engine: EngineSettings,
    pub scheduler: SchedulerSettings,
}

impl Default for TarifaConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            engine: EngineSettings::default(),
            scheduler: SchedulerSettings::default(),
        }
    }
}

impl TarifaConfig {
    /// Load configuration from `.env`, `tarifa.toml` and the environment
    pub fn load() -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();

        let mut cfg: Self = Config::builder()
            .add_source(File::with_name("tarifa").required(false))
            .add_source(
                Environment::with_prefix("TARIFA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse::<u16>() {
                cfg.server.port = p;
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document over the defaults
    pub fn from_toml(source: &str) -> Result<Self> {
        let cfg: Self = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.max_parallel_derivations == 0 {
            bail!("engine.max_parallel_derivations must be at least 1");
        }
        if self.engine.lookup_cache_capacity == 0 {
            bail!("engine.lookup_cache_capacity must be at least 1");
        }
        if self.scheduler.enabled && self.scheduler.interval_secs == 0 {
            bail!("scheduler.interval_secs must be at least 1");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
        }
    }
}

/// Engine tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Customer cards derived at once during a rebuild
    pub max_parallel_derivations: usize,
    /// Compiled rate tables kept for lookups
    pub lookup_cache_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_parallel_derivations: tarifa_engine::DEFAULT_MAX_PARALLEL_DERIVATIONS,
            lookup_cache_capacity: tarifa_engine::DEFAULT_LOOKUP_CACHE_CAPACITY,
        }
    }
}

impl From<&EngineSettings> for EngineConfig {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            max_parallel_derivations: settings.max_parallel_derivations,
            lookup_cache_capacity: settings.lookup_cache_capacity,
        }
    }
}

/// Background activation sweep and stale card rebuild
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
        }
    }
}
