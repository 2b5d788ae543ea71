//! Configuration Loader
//!
//! Environment-aware loading: base file, environment override file, then
//! environment variables, merged by the `config` crate and deserialized into
//! [`AgentflowConfig`].

use super::error::{ConfigResult, ConfigurationError};
use super::AgentflowConfig;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_FILE_STEM: &str = "agentflow";
const ENV_PREFIX: &str = "AGENTFLOW";
const ENV_SEPARATOR: &str = "__";

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: AgentflowConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Useful for tests that must not touch process-wide environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        // An explicitly named directory must exist; the default one may not
        if let Some(dir) = &config_dir {
            if !dir.is_dir() {
                return Err(ConfigurationError::DirectoryNotFound { path: dir.clone() });
            }
        }
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = %environment,
            config_directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            max_parallel_agents = config.orchestrator.max_parallel_agents,
            default_strategy = ?config.orchestrator.default_strategy,
            dead_letter_max_size = config.dead_letter.max_size,
            "⚙️ Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: AgentflowConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_directory: Self::default_config_directory(),
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &AgentflowConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    fn detect_environment() -> String {
        crate::logging::get_environment()
    }

    fn default_config_directory() -> PathBuf {
        env::var("AGENTFLOW_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
    ) -> ConfigResult<AgentflowConfig> {
        let base_file = config_directory.join(format!("{BASE_FILE_STEM}.toml"));
        let env_file = config_directory.join(format!("{BASE_FILE_STEM}.{environment}.toml"));

        debug!(
            base_file = %base_file.display(),
            base_present = base_file.is_file(),
            env_file = %env_file.display(),
            env_present = env_file.is_file(),
            "Resolving configuration sources"
        );

        let settings = ::config::Config::builder()
            .add_source(::config::File::from(base_file).required(false))
            .add_source(::config::File::from(env_file).required(false))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .map_err(|error| ConfigurationError::load_error(environment, error))?;

        settings
            .try_deserialize::<AgentflowConfig>()
            .map_err(|error| ConfigurationError::load_error(environment, error))
    }
}
