//! Configuration types for a mesh session

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration for a SessionNode
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Clock synchronization against the host
    pub clock: ClockSyncConfig,

    /// Recording countdown and clip encoding
    pub recording: RecordingConfig,

    /// Chunked transfer of finished recordings
    pub transfer: TransferConfig,
}

/// Clock sync sampling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockSyncConfig {
    /// Round-trip samples per estimate (default: 5)
    pub samples: u32,

    /// Delay between consecutive samples in milliseconds (default: 50)
    pub sample_spacing_ms: u64,

    /// Per-sample reply timeout in milliseconds (default: 2000)
    pub sample_timeout_ms: u64,
}

/// Recording start sequence parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Countdown length in ticks (default: 3)
    pub countdown_secs: u32,

    /// Countdown tick interval in milliseconds (default: 1000)
    pub countdown_tick_ms: u64,

    /// MIME type announced for finalized clips (default: video/webm)
    pub mime_type: String,
}

/// Transfer protocol parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Chunk size in bytes before base64 encoding (default: 64 KiB)
    pub chunk_size: usize,

    /// Pause after every N chunks (default: 10)
    pub pacing_interval_chunks: u32,

    /// Pause length in milliseconds (default: 10)
    pub pacing_delay_ms: u64,

    /// How long the sender waits for the receiver's ack (default: 30000)
    pub ack_timeout_ms: u64,

    /// Concurrent transfers (default: 3)
    pub max_parallel: usize,

    /// Guests ship finalized clips to the host automatically (default: true)
    pub auto_deliver: bool,

    /// Largest payload accepted from a peer, in bytes (default: 2 GiB)
    pub max_incoming_size: u64,
}

impl Default for ClockSyncConfig {
    fn default() -> Self {
        Self {
            samples: 5,
            sample_spacing_ms: 50,
            sample_timeout_ms: 2000,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            countdown_secs: 3,
            countdown_tick_ms: 1000,
            mime_type: "video/webm".to_string(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            pacing_interval_chunks: 10,
            pacing_delay_ms: 10,
            ack_timeout_ms: 30_000,
            max_parallel: 3,
            auto_deliver: true,
            max_incoming_size: 2 * 1024 * 1024 * 1024,
        }
    }
}

impl ClockSyncConfig {
    pub fn sample_spacing(&self) -> Duration {
        Duration::from_millis(self.sample_spacing_ms)
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_millis(self.sample_timeout_ms)
    }
}

impl RecordingConfig {
    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms)
    }
}

impl TransferConfig {
    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

impl SessionConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `clock.samples` is 0
    /// - `clock.sample_timeout_ms` is 0
    /// - `recording.mime_type` is empty
    /// - `transfer.chunk_size` is 0 or larger than 1 MiB
    /// - `transfer.pacing_interval_chunks` is 0
    /// - `transfer.max_parallel` is 0
    pub fn validate(&self) -> Result<()> {
        if self.clock.samples == 0 {
            return Err(Error::InvalidConfig(
                "clock.samples must be at least 1".to_string(),
            ));
        }

        if self.clock.sample_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "clock.sample_timeout_ms must be positive".to_string(),
            ));
        }

        if self.recording.mime_type.is_empty() {
            return Err(Error::InvalidConfig(
                "recording.mime_type must not be empty".to_string(),
            ));
        }

        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > 1024 * 1024 {
            return Err(Error::InvalidConfig(format!(
                "transfer.chunk_size must be in range 1-1048576, got {}",
                self.transfer.chunk_size
            )));
        }

        if self.transfer.pacing_interval_chunks == 0 {
            return Err(Error::InvalidConfig(
                "transfer.pacing_interval_chunks must be at least 1".to_string(),
            ));
        }

        if self.transfer.max_parallel == 0 {
            return Err(Error::InvalidConfig(
                "transfer.max_parallel must be at least 1".to_string(),
            ));
        }

        if self.transfer.max_incoming_size == 0 {
            return Err(Error::InvalidConfig(
                "transfer.max_incoming_size must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: SessionConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Short timers for tests and local demos
    ///
    /// Settings:
    /// - Sample spacing: 5ms, timeout: 200ms
    /// - Countdown tick: 20ms
    /// - Chunk size: 4 KiB, no pacing delay
    /// - Ack timeout: 2000ms
    ///
    /// # Example
    ///
    /// ```
    /// use meshcast_session::SessionConfig;
    ///
    /// let config = SessionConfig::fast_test_preset();
    /// assert_eq!(config.clock.samples, 5);
    /// assert_eq!(config.transfer.max_parallel, 3);
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn fast_test_preset() -> Self {
        Self {
            clock: ClockSyncConfig {
                samples: 5,
                sample_spacing_ms: 5,
                sample_timeout_ms: 200,
            },
            recording: RecordingConfig {
                countdown_secs: 3,
                countdown_tick_ms: 20,
                mime_type: "video/webm".to_string(),
            },
            transfer: TransferConfig {
                chunk_size: 4 * 1024,
                pacing_interval_chunks: 10,
                pacing_delay_ms: 0,
                ack_timeout_ms: 2000,
                max_parallel: 3,
                auto_deliver: true,
                max_incoming_size: 64 * 1024 * 1024,
            },
        }
    }
}
