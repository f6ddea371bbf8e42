use std::path::PathBuf;

use common::config::{ConfigError, StoreConfig};

use crate::args::Args;

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path the configuration was read from
    pub config_path: PathBuf,
    /// Loaded and validated store configuration
    pub config: StoreConfig,
    pub log_level: tracing::Level,
    /// Directory for log files (stdout only if not set)
    pub log_dir: Option<PathBuf>,
}

impl AppState {
    /// Load the configuration named on the command line and validate it
    pub fn load(args: &Args) -> Result<Self, StateError> {
        if !args.config.exists() {
            return Err(StateError::MissingFile(args.config.clone()));
        }

        let config = StoreConfig::load(&args.config)?;
        config.validate()?;

        Ok(Self {
            config_path: args.config.clone(),
            config,
            log_level: args.log_level,
            log_dir: args.log_dir.clone(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("configuration file not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
