// Configuration management module
// Handles loading, saving, and validating configuration

use crate::scrobbler::audioscrobbler::LASTFM_API_URL;
use crate::scrobbler::listenbrainz::LISTENBRAINZ_API_URL;
use crate::tracker::session::{SUBMIT_MIN_DURATION, SUBMIT_PERCENTAGE, SUBMIT_TIME};
use crate::tracker::SubmitPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// When to try splitting "Artist - Title" song titles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TitleSplit {
    #[default]
    Off,
    /// Split when the song has no artist tag
    MissingArtist,
    /// Split when the song has no album tag (typical for radio streams)
    MissingAlbum,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Poll interval in seconds
    pub poll_interval: u64,

    /// Scrobble after playing this many seconds
    pub submit_time: u64,

    /// ...or after playing this percentage of the track
    pub submit_percentage: u64,

    /// Never scrobble tracks shorter than this many seconds
    pub submit_min_duration: u64,

    pub title_split: TitleSplit,

    /// Report track durations to the services
    pub send_duration: bool,

    /// Retry queue database, defaults to the user data directory
    pub database: Option<PathBuf>,

    pub player: PlayerConfig,

    /// Last.fm compatible services (Last.fm, Libre.fm, ...)
    pub lastfm: Vec<LastFmConfig>,

    /// ListenBrainz configurations (can have multiple instances)
    pub listenbrainz: Vec<ListenBrainzConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6600,
            password: String::new(),
        }
    }
}

impl PlayerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn password(&self) -> Option<String> {
        (!self.password.is_empty()).then(|| self.password.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastFmConfig {
    pub enabled: bool,
    pub name: String,
    pub api_key: String,
    pub api_secret: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_lastfm_url")]
    pub api_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenBrainzConfig {
    pub enabled: bool,
    pub name: String,
    pub token: String,
    #[serde(default = "default_listenbrainz_url")]
    pub api_url: String,
}

fn default_lastfm_url() -> String {
    LASTFM_API_URL.to_string()
}

fn default_listenbrainz_url() -> String {
    LISTENBRAINZ_API_URL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: 5,
            submit_time: SUBMIT_TIME,
            submit_percentage: SUBMIT_PERCENTAGE,
            submit_min_duration: SUBMIT_MIN_DURATION,
            title_split: TitleSplit::Off,
            send_duration: true,
            database: None,
            player: PlayerConfig::default(),
            lastfm: vec![LastFmConfig {
                enabled: false,
                name: "lastfm".to_string(),
                api_key: String::new(),
                api_secret: String::new(),
                username: String::new(),
                password: String::new(),
                api_url: default_lastfm_url(),
            }],
            listenbrainz: vec![ListenBrainzConfig {
                enabled: false,
                name: "listenbrainz".to_string(),
                token: String::new(),
                api_url: default_listenbrainz_url(),
            }],
        }
    }
}

impl Config {
    /// Get the default path to the configuration file
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;

        Ok(config_dir.join("mpd-scrobbler.toml"))
    }

    /// Default location of the retry queue database
    pub fn default_database_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir().context("Failed to get data directory")?;

        Ok(data_dir.join("mpd-scrobbler").join("queue.db"))
    }

    /// Load configuration from file, or create default if it doesn't exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("Config file not found, creating default at {:?}", path);
            let default_config = Self::default();
            default_config.save(path)?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content).context("Failed to write config file")?;

        log::info!("Config saved to {:?}", path);

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn submit_policy(&self) -> SubmitPolicy {
        SubmitPolicy {
            time: self.submit_time,
            percentage: self.submit_percentage,
            min_duration: self.submit_min_duration,
        }
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => Self::default_database_path(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval == 0 {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.submit_percentage == 0 || self.submit_percentage > 100 {
            anyhow::bail!("submit_percentage must be between 1 and 100");
        }

        if self.player.host.is_empty() {
            anyhow::bail!("player host is required");
        }

        // Names double as retry queue names, so they must be unique
        let mut names = HashSet::new();
        let enabled_names = self
            .lastfm
            .iter()
            .filter(|c| c.enabled)
            .map(|c| &c.name)
            .chain(self.listenbrainz.iter().filter(|c| c.enabled).map(|c| &c.name));
        for name in enabled_names {
            if name.is_empty() {
                anyhow::bail!("Every enabled service needs a name");
            }
            if !names.insert(name) {
                anyhow::bail!("Service name '{}' is used more than once", name);
            }
        }

        if names.is_empty() {
            log::warn!("No scrobbling services are enabled");
        }

        for lastfm in self.lastfm.iter().filter(|c| c.enabled) {
            if lastfm.api_key.is_empty() || lastfm.api_secret.is_empty() {
                anyhow::bail!("api_key and api_secret are required (service: {})", lastfm.name);
            }
            if lastfm.username.is_empty() || lastfm.password.is_empty() {
                anyhow::bail!("username and password are required (service: {})", lastfm.name);
            }
            if lastfm.api_url.is_empty() {
                anyhow::bail!("api_url is required (service: {})", lastfm.name);
            }
        }

        for lb in self.listenbrainz.iter().filter(|c| c.enabled) {
            if lb.token.is_empty() {
                anyhow::bail!("ListenBrainz token is required when enabled (service: {})", lb.name);
            }
            if lb.api_url.is_empty() {
                anyhow::bail!("ListenBrainz api_url is required (service: {})", lb.name);
            }
        }

        Ok(())
    }
}
