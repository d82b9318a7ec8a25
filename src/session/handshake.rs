use serde::Deserialize;
use serde_json::json;

/// How the session token is presented during connection setup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeMode {
    /// Token embedded as a query parameter on the connection URL.
    #[default]
    TokenQuery,
    /// Anonymous connect followed by an explicit in-band auth frame.
    AuthMessage,
}

/// The handshake capability, selected once from configuration.
///
/// Both variants then await the recognizer's session-begins event; the
/// session code has a single path through the state machine.
pub trait HandshakeStrategy: Send + Sync {
    /// URL for the websocket upgrade request.
    fn request_url(&self, endpoint: &str, token: &str, sample_rate: u32) -> String;

    /// First in-band frame to send once the socket opens, if the variant
    /// requires one.
    fn auth_frame(&self, token: &str) -> Option<String>;
}

/// Token travels in the URL; nothing is sent before the first audio frame.
pub struct TokenQueryHandshake;

impl HandshakeStrategy for TokenQueryHandshake {
    fn request_url(&self, endpoint: &str, token: &str, sample_rate: u32) -> String {
        format!("{}?sample_rate={}&token={}", endpoint, sample_rate, token)
    }

    fn auth_frame(&self, _token: &str) -> Option<String> {
        None
    }
}

/// Anonymous connect, then `{"authorization": "<token>"}` as the first frame.
pub struct AuthFrameHandshake;

impl HandshakeStrategy for AuthFrameHandshake {
    fn request_url(&self, endpoint: &str, _token: &str, sample_rate: u32) -> String {
        format!("{}?sample_rate={}", endpoint, sample_rate)
    }

    fn auth_frame(&self, token: &str) -> Option<String> {
        Some(json!({ "authorization": token }).to_string())
    }
}

pub fn strategy_for(mode: HandshakeMode) -> Box<dyn HandshakeStrategy> {
    match mode {
        HandshakeMode::TokenQuery => Box::new(TokenQueryHandshake),
        HandshakeMode::AuthMessage => Box::new(AuthFrameHandshake),
    }
}
