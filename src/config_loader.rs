use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::settings::RendererSettings;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub settings: RendererSettings,
    /// How many times `render` gets called.
    pub total_calls: u32,
    /// Samples per pixel once every call is done.
    pub total_samples: u32,
    pub frame_delay_ms: u64,
    /// Fixed seed for the random scene, a fresh one is picked when absent.
    pub scene_seed: Option<u64>,
    /// Where to save the finished image.
    pub screenshot_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings: RendererSettings::default(),
            total_calls: 100,
            total_samples: 1000,
            frame_delay_ms: 20,
            scene_seed: None,
            screenshot_path: None,
        }
    }
}

impl Config {
    pub fn from_str(value: &str) -> Result<Self> {
        Ok(serde_json::from_str(value)?)
    }
}

pub struct ConfigFileLoader {
    pub path: PathBuf,
    config: Option<Config>,
}

impl ConfigFileLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: None,
        }
    }

    /// Reads the config file, or writes one with the defaults if there is none yet.
    pub fn load_config(&mut self) -> Result<&Config> {
        let config = match std::fs::read_to_string(&self.path) {
            Ok(content) => Config::from_str(&content)
                .with_context(|| format!("Malformed config file {}", self.path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!("Creating default config at {}", self.path.display());
                self.config = Some(Config::default());
                self.save_config()?;
                Config::default()
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Could not read config file {}", self.path.display()))
            }
        };
        Ok(self.config.insert(config))
    }

    pub fn get_or_load_config(&mut self) -> Result<&Config> {
        if self.config.is_none() {
            self.load_config()?;
        }
        self.config
            .as_ref()
            .context("Config was not loaded")
    }

    pub fn save_config(&self) -> Result<()> {
        if let Some(config) = &self.config {
            let content = serde_json::to_string_pretty(config)?;
            std::fs::write(&self.path, content)
                .with_context(|| format!("Could not write config file {}", self.path.display()))?;
        }
        Ok(())
    }
}
