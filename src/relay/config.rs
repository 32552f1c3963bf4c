//! Per-relay settings, validated once before a run.

use serde::{Deserialize, Serialize};

use crate::constants::{CHANNELS, DEFAULT_OUTPUT_FRAMES, MAX_OUTPUT_FRAMES, SAMPLE_RATE};
use crate::error::ConfigError;

/// Which directions a relay carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelayMode {
    /// Capture → remote and remote → playback
    #[default]
    Duplex,
    /// Remote → playback only; no capture device is opened
    ReceiveOnly,
}

/// Relay settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Samples per playback block, 1..=48000
    pub output_frames: usize,
    /// Must be 48000
    pub sample_rate: u32,
    /// Must be 1
    pub channels: u16,
    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub capture_device: String,
    /// ALSA playback device name
    pub playback_device: String,
    /// Opus bitrate in bits/s; libopus picks one when unset
    pub bitrate: Option<i32>,
    pub mode: RelayMode,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            output_frames: DEFAULT_OUTPUT_FRAMES,
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            capture_device: "default".to_string(),
            playback_device: "default".to_string(),
            bitrate: None,
            mode: RelayMode::Duplex,
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_frames == 0 {
            return Err(ConfigError::Invalid {
                field: "output_frames",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.output_frames > MAX_OUTPUT_FRAMES {
            return Err(ConfigError::Invalid {
                field: "output_frames",
                reason: format!(
                    "must be at most {}, got {}",
                    MAX_OUTPUT_FRAMES, self.output_frames
                ),
            });
        }
        if self.sample_rate != SAMPLE_RATE {
            return Err(ConfigError::Invalid {
                field: "sample_rate",
                reason: format!("only {} is supported, got {}", SAMPLE_RATE, self.sample_rate),
            });
        }
        if self.channels != CHANNELS {
            return Err(ConfigError::Invalid {
                field: "channels",
                reason: format!("only {} is supported, got {}", CHANNELS, self.channels),
            });
        }
        if let Some(bits) = self.bitrate {
            // libopus accepts 500..=512000
            if !(500..=512_000).contains(&bits) {
                return Err(ConfigError::Invalid {
                    field: "bitrate",
                    reason: format!("{} is outside 500..=512000", bits),
                });
            }
        }
        Ok(())
    }
}
