use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_OUTPUT_FRAMES, MAX_OUTPUT_FRAMES};
use crate::error::ConfigError;
use crate::relay::RelayConfig;

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Application configuration, read from TOML at startup.
///
/// Every section and field is optional; missing ones take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub relay: RelayConfig,
    pub audio: AudioConfig,
    pub session: SessionConfig,
    pub log: LogConfig,
}

// 扬声器测试参数
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AudioConfig {
    pub tone_frequency: f64,
    pub tone_seconds: f64,
    /// Fraction of full scale
    pub tone_amplitude: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            tone_frequency: 440.0,
            tone_seconds: 5.0,
            tone_amplitude: 0.5,
        }
    }
}

// 远端会话参数
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub url: String,
    pub token: String,
    /// Generated (and persisted to `client_id_file`) when empty
    pub client_id: String,
    pub client_id_file: Option<PathBuf>,
    pub outbound_capacity: usize,
    pub inbound_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/relay/v1/".to_string(),
            token: String::new(),
            client_id: String::new(),
            client_id_file: Some(PathBuf::from("voice_relay_uuid.txt")),
            outbound_capacity: DEFAULT_CHANNEL_CAPACITY,
            inbound_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// verbose|debug, warning|warn, info, error
    pub level: String,
    /// Records are appended here as well as printed
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load the configuration the binary runs with.
    ///
    /// Same as [`AppConfig::load_file`] followed by [`AppConfig::prepare`].
    /// The client id is left alone; see [`AppConfig::resolve_client_id`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load_file(path)?;
        config.prepare()?;
        Ok(config)
    }

    /// Read the TOML file only. An explicit `path` must exist; otherwise
    /// `config.toml` is used when present.
    pub fn load_file(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::read(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::read(Path::new(DEFAULT_CONFIG_PATH))
            }
            None => Ok(Self::default()),
        }
    }

    /// Apply environment overrides and validate.
    pub fn prepare(&mut self) -> Result<(), ConfigError> {
        self.prepare_with(|key| std::env::var(key).ok())
    }

    fn prepare_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.apply_overrides(lookup);
        self.validate()
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply `OUTPUT_FRAMES`, `LOG_LEVEL`, `RELAY_URL` and `RELAY_TOKEN`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("OUTPUT_FRAMES") {
            self.relay.output_frames = output_frames_override(&value);
        }
        if let Some(value) = lookup("LOG_LEVEL") {
            self.log.level = value;
        }
        if let Some(value) = lookup("RELAY_URL") {
            self.session.url = value;
        }
        if let Some(value) = lookup("RELAY_TOKEN") {
            self.session.token = value;
        }
    }

    /// Fill an empty client id, reusing the persisted one across restarts.
    ///
    /// Only the session path needs an id; this may create `client_id_file`.
    pub fn resolve_client_id(&mut self) {
        if !self.session.client_id.trim().is_empty() {
            return;
        }

        if let Some(file) = self.session.client_id_file.as_deref() {
            if let Ok(content) = std::fs::read_to_string(file) {
                let trimmed = content.trim();
                if !trimmed.is_empty() {
                    self.session.client_id = trimmed.to_string();
                    log::debug!("Loaded client id from {}", file.display());
                    return;
                }
            }
        }

        self.session.client_id = Uuid::new_v4().to_string();
        log::info!("Generated client id {}", self.session.client_id);
        if let Some(file) = self.session.client_id_file.as_deref() {
            if let Err(e) = std::fs::write(file, &self.session.client_id) {
                log::warn!("Failed to save client id to {}: {}", file.display(), e);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.relay.validate()?;
        if self.session.outbound_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "session.outbound_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.session.inbound_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "session.inbound_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Value for `output_frames` from the `OUTPUT_FRAMES` variable.
///
/// Anything that is not an integer in `1..=MAX_OUTPUT_FRAMES` is reported
/// and replaced by the default block size.
pub fn output_frames_override(value: &str) -> usize {
    match value.trim().parse::<usize>() {
        Ok(frames) if (1..=MAX_OUTPUT_FRAMES).contains(&frames) => frames,
        _ => {
            log::warn!(
                "Invalid OUTPUT_FRAMES value '{}', using default {}",
                value,
                DEFAULT_OUTPUT_FRAMES
            );
            DEFAULT_OUTPUT_FRAMES
        }
    }
}
