//! Streaming transcription session management
//!
//! This module owns one authenticated duplex connection to the remote
//! recognizer:
//! - Connection state machine (connect, authenticate, stream, close)
//! - Outbound audio frames in strict capture order
//! - Inbound transcript/control events in strict arrival order
//! - Proactive closure ahead of credential expiry
//! - Caller-side reconnect backoff policy

mod config;
mod events;
mod handshake;
mod retry;
mod session;
mod state;

pub use config::SessionConfig;
pub use events::{parse_inbound, AudioWireFormat, TranscriptPayload, TransportEvent, Word};
pub use handshake::{strategy_for, AuthFrameHandshake, HandshakeMode, HandshakeStrategy, TokenQueryHandshake};
pub use retry::BackoffPolicy;
pub use session::{AudioSender, SessionHandle, TranscriptionSession};
pub use state::{FailureKind, SessionClose, SessionError, SessionState, StopMode};
