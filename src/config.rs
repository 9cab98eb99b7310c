//! # Application Configuration
//!
//! One TOML file holds everything the application needs at startup: the broker
//! settings, whether to connect right away, and window preferences.
//!
//! ## Error Handling Strategy
//! File IO and parsing use `color_eyre` for context-rich errors. A missing file is not
//! an error: it is created with defaults on first start so the application always comes
//! up with a usable configuration.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::controller::ControllerSettings;
use crate::mqtt::config::MqttConfig;

const CONFIG_DIR: &str = ".config/mqtt-car-controller";
const CONFIG_FILE: &str = "config.toml";
pub const CONFIG_PATH_ENV: &str = "MQTT_CAR_CONTROLLER_CONFIG";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct UIConfig {
    /// Start the operator panel in fullscreen, as on a dedicated display
    pub fullscreen: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Connect to the broker as soon as the application starts
    pub auto_connect: bool,
    pub mqtt: MqttConfig,
    pub ui: UIConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_connect: true,
            mqtt: MqttConfig::default(),
            ui: UIConfig::default(),
        }
    }
}

impl Config {
    /// `MQTT_CAR_CONTROLLER_CONFIG` if set, otherwise `~/.config/mqtt-car-controller/config.toml`.
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return PathBuf::from(path);
        }
        let mut path = get_home_dir();
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Loads the file at `path`, writing defaults there first if it does not exist.
    pub async fn load_or_create(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            info!("No configuration at {}, creating defaults", path.display());
            let config = Config::default();
            config.save(path).await?;
            return Ok(config);
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| eyre!("Failed to serialize config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file {}: {}", path.display(), e))?;

        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Validates the broker address and builds the controller settings from it.
    pub fn controller_settings(&self) -> Result<ControllerSettings> {
        let endpoint = self
            .mqtt
            .endpoint()
            .map_err(|e| eyre!("Invalid [mqtt] endpoint: {}", e))?;

        Ok(ControllerSettings {
            endpoint,
            mqtt: self.mqtt.clone(),
            auto_connect: self.auto_connect,
        })
    }
}

fn get_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::config::DEFAULT_ENDPOINT;
    use crate::mqtt::topics::AlertPolarity;

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let config = Config::load_or_create(&path).await.unwrap();

        assert_eq!(config, Config::default());
        assert!(path.exists());
        let reloaded = Config::load_or_create(&path).await.unwrap();
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(
            &path,
            "auto_connect = false\n[mqtt]\nendpoint = \"mqtt://10.0.0.5\"\nalert_polarity = \"active-low\"\n",
        )
        .await
        .unwrap();

        let config = Config::load_or_create(&path).await.unwrap();

        assert!(!config.auto_connect);
        assert_eq!(config.mqtt.endpoint, "mqtt://10.0.0.5");
        assert_eq!(config.mqtt.alert_polarity, AlertPolarity::ActiveLow);
        assert_eq!(config.mqtt.keep_alive_secs, 5);
        assert!(!config.ui.fullscreen);
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "auto_connect = \"sometimes\"").await.unwrap();

        assert!(Config::load_or_create(&path).await.is_err());
    }

    #[test]
    fn controller_settings_validate_endpoint() {
        let settings = Config::default().controller_settings().unwrap();
        assert_eq!(settings.endpoint.to_string(), DEFAULT_ENDPOINT);
        assert!(settings.auto_connect);

        let mut config = Config::default();
        config.mqtt.endpoint = "ftp://nowhere".to_string();
        assert!(config.controller_settings().is_err());
    }
}
