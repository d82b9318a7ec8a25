use std::time::Duration;

use super::events::AudioWireFormat;
use super::handshake::HandshakeMode;

/// Configuration for one transcription session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint of the streaming recognizer.
    pub ws_endpoint: String,

    /// Sample rate announced during the handshake.
    pub sample_rate: u32,

    /// Token presentation variant.
    pub handshake: HandshakeMode,

    /// Outbound audio framing.
    pub audio_wire: AudioWireFormat,

    /// Time allowed for connect + handshake.
    pub connect_timeout: Duration,

    /// Time to wait for a close acknowledgment before forcing closure.
    pub close_timeout: Duration,

    /// The session closes itself this long before the credential expires,
    /// so the remote never tears the socket down first.
    pub expiry_margin: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ws_endpoint: "ws://127.0.0.1:8765/v2/realtime/ws".to_string(),
            sample_rate: 16000,
            handshake: HandshakeMode::TokenQuery,
            audio_wire: AudioWireFormat::JsonBase64,
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
            expiry_margin: Duration::from_secs(2),
        }
    }
}

impl SessionConfig {
    /// Build a session config from the application configuration.
    pub fn from_app_config(config: &crate::config::Config) -> Self {
        Self {
            ws_endpoint: config.recognizer.ws_endpoint.clone(),
            sample_rate: config.audio.sample_rate,
            handshake: config.recognizer.handshake,
            audio_wire: config.recognizer.audio_wire,
            connect_timeout: config.session.connect_timeout(),
            close_timeout: config.session.close_timeout(),
            expiry_margin: Duration::from_secs(2),
        }
    }
}
