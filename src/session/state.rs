/// Why a session reached `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    ConnectTimeout,
    AuthRejected,
    AbnormalClose { code: u16 },
    Transport,
}

/// Connection state of a transcription session.
///
/// Transitions only move along
/// `Idle -> Connecting -> Authenticating -> Active -> Closing -> Closed`,
/// with `Failed` as the terminal error state reachable from any
/// non-terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Authenticating,
    Active,
    Closing,
    Closed,
    Failed(FailureKind),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed(_))
    }

    /// Whether audio may be handed to the session in this state. Frames
    /// queued while connecting are held until the session is active.
    pub fn accepts_audio(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Authenticating | SessionState::Active
        )
    }
}

/// How a session ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionClose {
    /// Caller requested the stop.
    Stopped,
    /// Remote closed the stream with a normal (1000) code.
    RemoteClosed,
    /// The session closed itself ahead of credential expiry. The caller
    /// can re-arm with a fresh credential.
    CredentialExpired,
}

/// Caller-supplied shutdown behavior.
#[derive(Debug, Clone, Copy)]
pub struct StopMode {
    /// Drain queued frames before the close frame, or discard them.
    pub drain: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("timed out establishing the recognizer connection")]
    ConnectTimeout,

    #[error("recognizer rejected the session credential: {0}")]
    AuthRejected(String),

    #[error("recognizer closed the stream abnormally (code {code}): {reason}")]
    AbnormalClose { code: u16, reason: String },

    #[error("session is closed")]
    SessionClosed,

    #[error("websocket transport failed: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("session task failed: {0}")]
    Internal(String),
}

impl SessionError {
    /// Whether the caller may re-arm a fresh session after this failure.
    /// Auth rejections are fatal; transient transport conditions are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::ConnectTimeout
                | SessionError::AbnormalClose { .. }
                | SessionError::Transport(_)
        )
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SessionError::ConnectTimeout => FailureKind::ConnectTimeout,
            SessionError::AuthRejected(_) => FailureKind::AuthRejected,
            SessionError::AbnormalClose { code, .. } => FailureKind::AbnormalClose { code: *code },
            SessionError::SessionClosed
            | SessionError::Transport(_)
            | SessionError::Encode(_)
            | SessionError::Internal(_) => FailureKind::Transport,
        }
    }
}
