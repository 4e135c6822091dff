use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};

pub const DEFAULT_BACKEND_URL: &str = "https://juno-4m9x.onrender.com";
pub const BACKEND_URL_ENV: &str = "JUNO_BACKEND_URL";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the history/stream backend
    pub backend_url: String,

    /// Rows requested per history page
    pub page_size: u32,

    /// Timeout for non-streaming requests
    pub request_timeout_secs: u64,

    /// Juno home directory, holds config.toml and credentials.json
    #[serde(skip)]
    pub juno_home: PathBuf,

    /// UI preferences
    pub ui: UiConfig,

    /// Countdown timer preferences
    pub timer: TimerConfig,
}

/// Light or dark presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

/// UI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    pub theme: Theme,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    pub default_minutes: u64,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));

        Config {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            page_size: 20,
            request_timeout_secs: 60,
            juno_home: home.join(".juno"),
            ui: UiConfig { theme: Theme::Dark },
            timer: TimerConfig { default_minutes: 25 },
        }
    }
}

impl Config {
    /// Load configuration from ~/.juno/config.toml, falling back to defaults
    pub fn load() -> Result<Self> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        Self::load_from(&home.join(".juno"))
    }

    /// Load configuration rooted at an explicit directory
    pub fn load_from(juno_home: &Path) -> Result<Self> {
        let config_path = juno_home.join("config.toml");

        fs::create_dir_all(juno_home).context("Failed to create .juno directory")?;

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Config::default()
        };

        config.juno_home = juno_home.to_path_buf();

        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            if !url.trim().is_empty() {
                config.backend_url = url.trim().to_string();
            }
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.juno_home).context("Failed to create .juno directory")?;
        let config_path = self.juno_home.join("config.toml");
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&config_path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Path of the flat key-value credential file
    pub fn credentials_path(&self) -> PathBuf {
        self.juno_home.join("credentials.json")
    }

    /// Backend URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.backend_url.trim_end_matches('/')
    }

    /// Default countdown length in milliseconds, saturating on absurd values
    pub fn default_timer_ms(&self) -> u64 {
        self.timer.default_minutes.saturating_mul(60_000)
    }
}
