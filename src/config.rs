use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for Prodflow
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProdflowConfig {
    /// Remote request store
    pub store: StoreConfig,
    /// Directory/catalog cache
    pub cache: CacheConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
    /// Step lifecycle policy
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Base URL of the request store API
    pub base_url: String,
    /// Bearer token (can be set via env var)
    pub token: Option<String>,
    /// Sustained request rate
    pub requests_per_second: u32,
    /// Burst capacity
    pub burst_capacity: u32,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheConfig {
    /// How long users, field definitions and catalogs stay cached
    pub ttl_seconds: u64,
    pub max_capacity: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable output
    pub json_logs: bool,
    /// Log engine counters when a command finishes
    pub metrics_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WorkflowConfig {
    /// Fixed seed for assignment draws (reproducible runs)
    pub assignment_seed: Option<u64>,
    /// Cancel and skip must carry a reason
    pub require_cancel_reason: bool,
}

impl Default for ProdflowConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                base_url: "http://localhost:8080/api".to_string(),
                token: None, // Will be read from env var or .prodflow-rc
                requests_per_second: 10,
                burst_capacity: 20,
                timeout_seconds: 30,
            },
            cache: CacheConfig {
                ttl_seconds: 300, // 5 minutes
                max_capacity: 1000,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: false,
                metrics_enabled: true,
            },
            workflow: WorkflowConfig {
                assignment_seed: None,
                require_cancel_reason: true,
            },
        }
    }
}

impl ProdflowConfig {
    /// Load configuration from the current directory. See [`Self::load_from`].
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files in `dir` (prodflow.toml, .prodflow-rc)
    /// 3. Environment variables (prefixed with PRODFLOW_, nested keys joined by `__`)
    pub fn load_from(dir: &Path) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        let toml_path = dir.join("prodflow.toml");
        if toml_path.exists() {
            builder = builder.add_source(File::from(toml_path));
        }

        let rc_path = dir.join(".prodflow-rc");
        if rc_path.exists() {
            builder = builder.add_source(File::from(rc_path).format(config::FileFormat::Toml));
        }

        // Override with environment variables
        builder = builder.add_source(
            Environment::with_prefix("PRODFLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;

        // Deserialize into our config struct
        let mut prodflow_config: ProdflowConfig = config.try_deserialize()?;

        // Special handling for the store token
        if prodflow_config.store.token.is_none() {
            if let Ok(token) = std::env::var("PRODFLOW_STORE_TOKEN") {
                prodflow_config.store.token = Some(token);
            }
        }

        Ok(prodflow_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}
