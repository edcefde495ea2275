//! Configuration management for classroom media sessions
//!
//! Provides loading, saving and validation of ICE, gateway and recording
//! settings from a TOML file.

use crate::errors::ClassroomError;
use crate::types::{Direction, FeedKind};
use crate::webrtc::peer::{RTCConfiguration, DEFAULT_STUN_SERVERS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassroomConfig {
    pub ice: IceConfig,
    pub gateway: GatewayConfig,
    pub recording: RecorderConfig,
}

/// Peer transport and ICE gathering configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceConfig {
    /// STUN server URLs handed to every peer transport
    pub servers: Vec<String>,
    /// Gathering wait for camera publishing, in milliseconds
    pub publish_gather_timeout_ms: u64,
    /// Gathering wait for screen publishing, in milliseconds
    pub screen_gather_timeout_ms: u64,
    /// Gathering wait for subscriptions, in milliseconds
    pub subscribe_gather_timeout_ms: u64,
}

/// Gateway session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Keep-alive period for published sessions, in milliseconds
    pub keepalive_interval_ms: u64,
    /// Subscription attempts made by `subscribe_with_retry`
    pub subscribe_attempts: u32,
    /// Delay between subscription attempts, in milliseconds
    pub subscribe_retry_delay_ms: u64,
}

/// Chunked recording configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Length of one independently decodable chunk, in seconds
    pub chunk_duration_secs: u64,
    /// Captured segments below this size are discarded
    pub min_chunk_bytes: usize,
    /// Upper bound on one chunk upload or the completion call, in seconds
    pub upload_timeout_secs: u64,
    /// Wait between cancelling the rotation timer and the final flush, in milliseconds
    pub stop_grace_ms: u64,
    /// Upper bound on waiting for the final capture data, in milliseconds
    pub final_flush_timeout_ms: u64,
}

impl Default for ClassroomConfig {
    fn default() -> Self {
        Self {
            ice: IceConfig {
                servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
                publish_gather_timeout_ms: 10_000,
                screen_gather_timeout_ms: 15_000,
                subscribe_gather_timeout_ms: 5_000,
            },
            gateway: GatewayConfig {
                keepalive_interval_ms: 25_000,
                subscribe_attempts: 3,
                subscribe_retry_delay_ms: 1_000,
            },
            recording: RecorderConfig::default(),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            chunk_duration_secs: 30,
            min_chunk_bytes: 1000,
            upload_timeout_secs: 60,
            stop_grace_ms: 200,
            final_flush_timeout_ms: 5_000,
        }
    }
}

impl IceConfig {
    /// ICE gathering bound for a negotiation direction
    pub fn gather_timeout(&self, direction: Direction) -> Duration {
        let ms = match direction {
            Direction::Publish(FeedKind::Camera) => self.publish_gather_timeout_ms,
            Direction::Publish(FeedKind::Screen) => self.screen_gather_timeout_ms,
            Direction::Subscribe => self.subscribe_gather_timeout_ms,
        };
        Duration::from_millis(ms)
    }

    pub fn rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration::with_stun_servers(self.servers.iter().cloned())
    }
}

impl GatewayConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn subscribe_retry_delay(&self) -> Duration {
        Duration::from_millis(self.subscribe_retry_delay_ms)
    }
}

impl RecorderConfig {
    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs(self.chunk_duration_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn final_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.final_flush_timeout_ms)
    }
}

impl ClassroomConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ClassroomError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| ClassroomError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ClassroomConfig = toml::from_str(&contents)
            .map_err(|e| ClassroomError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate().map_err(ClassroomError::Config)?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ClassroomError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ClassroomError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ClassroomError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| ClassroomError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("classroom.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.ice.servers.iter().any(|s| !(s.starts_with("stun:") || s.starts_with("turn:"))) {
            return Err("ICE servers must be stun: or turn: URLs".to_string());
        }
        if self.ice.publish_gather_timeout_ms == 0
            || self.ice.screen_gather_timeout_ms == 0
            || self.ice.subscribe_gather_timeout_ms == 0
        {
            return Err("ICE gathering timeouts must be non-zero".to_string());
        }

        if self.gateway.keepalive_interval_ms == 0 {
            return Err("Keep-alive interval must be non-zero".to_string());
        }
        if self.gateway.subscribe_attempts == 0 {
            return Err("At least one subscribe attempt is required".to_string());
        }

        if self.recording.chunk_duration_secs == 0 {
            return Err("Chunk duration must be at least one second".to_string());
        }
        if self.recording.upload_timeout_secs == 0 {
            return Err("Upload timeout must be non-zero".to_string());
        }

        Ok(())
    }
}
