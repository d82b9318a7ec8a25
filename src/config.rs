use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::session::{AudioWireFormat, HandshakeMode};

/// Environment variable prefix for overrides.
///
/// Nested keys use a double underscore, e.g.
/// `SPEECH_COACH_RECOGNIZER__API_KEY` sets `recognizer.api_key`.
pub const ENV_PREFIX: &str = "SPEECH_COACH";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub session: SessionTimeoutConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
}

/// Connection details for the remote streaming recognizer.
#[derive(Debug, Clone, Deserialize)]
pub struct RecognizerConfig {
    /// HTTP endpoint that mints short-lived session tokens.
    pub token_endpoint: String,

    /// WebSocket endpoint of the streaming recognizer.
    pub ws_endpoint: String,

    /// Long-lived API key. Expected from the environment
    /// (`SPEECH_COACH_RECOGNIZER__API_KEY`) rather than the config file.
    #[serde(default)]
    pub api_key: String,

    /// Requested token lifetime in seconds (accepted range 300-3600).
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    /// How the session token is presented during the handshake.
    #[serde(default)]
    pub handshake: HandshakeMode,

    /// Outbound audio framing on the socket.
    #[serde(default)]
    pub audio_wire: AudioWireFormat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Sample rate in Hz (the recognizer expects 16kHz mono).
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Number of channels (1 = mono).
    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Samples per captured block (the rendering quantum).
    /// 1280 samples = 80ms at 16kHz.
    #[serde(default = "default_block_samples")]
    pub block_samples: usize,

    /// Capacity of the outbound frame queue. Overflow drops the newest
    /// frame and bumps the drop counter.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionTimeoutConfig {
    /// Time allowed for connect + handshake before giving up.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Time to wait for a close acknowledgment before forcing closure.
    #[serde(default = "default_close_timeout_secs")]
    pub close_timeout_secs: u64,

    /// Whether a caller-initiated stop drains queued frames before closing.
    #[serde(default = "default_drain_on_stop")]
    pub drain_on_stop: bool,
}

/// Bounded exponential backoff applied between reconnect attempts.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_base_secs")]
    pub base_delay_secs: u64,

    #[serde(default = "default_retry_cap_secs")]
    pub max_delay_secs: u64,

    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackConfig {
    /// Speaking rate below this is flagged as slow (words per minute).
    #[serde(default = "default_slow_wpm")]
    pub slow_wpm: f64,

    /// Speaking rate above this is flagged as rushed (words per minute).
    #[serde(default = "default_fast_wpm")]
    pub fast_wpm: f64,
}

fn default_token_ttl_secs() -> u64 {
    3600
}
fn default_sample_rate() -> u32 {
    16000
}
fn default_channels() -> u16 {
    1
}
fn default_block_samples() -> usize {
    1280
}
fn default_queue_capacity() -> usize {
    64
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_close_timeout_secs() -> u64 {
    5
}
fn default_drain_on_stop() -> bool {
    true
}
fn default_retry_base_secs() -> u64 {
    1
}
fn default_retry_cap_secs() -> u64 {
    30
}
fn default_retry_attempts() -> u32 {
    5
}
fn default_slow_wpm() -> f64 {
    110.0
}
fn default_fast_wpm() -> f64 {
    170.0
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            block_samples: default_block_samples(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for SessionTimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            close_timeout_secs: default_close_timeout_secs(),
            drain_on_stop: default_drain_on_stop(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: default_retry_base_secs(),
            max_delay_secs: default_retry_cap_secs(),
            max_attempts: default_retry_attempts(),
        }
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            slow_wpm: default_slow_wpm(),
            fast_wpm: default_fast_wpm(),
        }
    }
}

impl SessionTimeoutConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a file, then apply environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
