use super::Config;
use crate::error::ConfigError;
use anyhow::{Context, Result};
use directories::UserDirs;
use std::fs;
use std::path::Path;

impl Config {
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        let conclave_dir = home.join(".conclave");
        let config_path = conclave_dir.join("config.toml");

        if !conclave_dir.exists() {
            fs::create_dir_all(&conclave_dir).context("Failed to create .conclave directory")?;
            fs::create_dir_all(conclave_dir.join("workspace"))
                .context("Failed to create workspace directory")?;
        }

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            let config = Self {
                config_path: config_path.clone(),
                ..Self::default()
            };
            config.save()?;
            config
        };
        config.workspace_dir = conclave_dir.join("workspace");
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Read a config file without touching the home directory.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config =
            toml::from_str(&contents).context("Failed to parse config file")?;
        config.config_path = path.to_path_buf();
        if let Some(parent) = path.parent() {
            config.workspace_dir = parent.join("workspace");
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&self.config_path, toml_str).context("Failed to write config file")?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.token_budget == 0 {
            return Err(ConfigError::Validation(
                "window.token_budget must be greater than zero".into(),
            ));
        }
        if !(self.window.warn_threshold > 0.0 && self.window.warn_threshold <= 1.0) {
            return Err(ConfigError::Validation(format!(
                "window.warn_threshold must be in (0, 1], got {}",
                self.window.warn_threshold
            )));
        }
        if self.dispatcher.event_bus_capacity == 0 {
            return Err(ConfigError::Validation(
                "dispatcher.event_bus_capacity must be greater than zero".into(),
            ));
        }
        if self.store.max_connections == 0 {
            return Err(ConfigError::Validation(
                "store.max_connections must be greater than zero".into(),
            ));
        }
        if self
            .observability
            .log_level
            .parse::<tracing::Level>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "unknown observability.log_level '{}'",
                self.observability.log_level
            )));
        }
        Ok(())
    }
}
