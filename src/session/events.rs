use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outbound audio framing on the socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioWireFormat {
    /// JSON envelope `{"audio_data": "<base64>"}`.
    #[default]
    JsonBase64,
    /// Raw little-endian PCM in a binary frame.
    Binary,
}

/// A single recognized word inside a final transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    /// Start of the word in the audio stream, milliseconds.
    pub start: u64,
    /// End of the word in the audio stream, milliseconds.
    pub end: u64,
    #[serde(default)]
    pub confidence: f32,
}

/// Transcript text covering a bounded audio range.
#[derive(Debug, Clone)]
pub struct TranscriptPayload {
    pub text: String,
    pub audio_start: u64,
    pub audio_end: u64,
    pub confidence: f32,
    pub words: Vec<Word>,
}

/// Events flowing from the recognizer to the aggregator, in arrival order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    SessionBegins {
        session_id: String,
        expires_at: Option<DateTime<Utc>>,
    },
    /// Provisional recognition, wholly replaced by each successor.
    Partial(TranscriptPayload),
    /// Committed recognition, never revised.
    Final(TranscriptPayload),
    Error {
        code: Option<u32>,
        message: String,
    },
    Closed {
        code: u16,
        reason: String,
    },
}

/// Wire shape of recognizer messages, discriminated by `message_type`.
#[derive(Debug, Deserialize)]
#[serde(tag = "message_type")]
enum WireMessage {
    SessionBegins {
        session_id: String,
        #[serde(default)]
        expires_at: Option<DateTime<Utc>>,
    },
    PartialTranscript {
        #[serde(default)]
        text: String,
        audio_start: u64,
        audio_end: u64,
        #[serde(default)]
        confidence: f32,
    },
    FinalTranscript {
        #[serde(default)]
        text: String,
        audio_start: u64,
        audio_end: u64,
        #[serde(default)]
        confidence: f32,
        #[serde(default)]
        words: Vec<Word>,
    },
}

impl From<WireMessage> for TransportEvent {
    fn from(msg: WireMessage) -> Self {
        match msg {
            WireMessage::SessionBegins {
                session_id,
                expires_at,
            } => TransportEvent::SessionBegins {
                session_id,
                expires_at,
            },
            WireMessage::PartialTranscript {
                text,
                audio_start,
                audio_end,
                confidence,
            } => TransportEvent::Partial(TranscriptPayload {
                text,
                audio_start,
                audio_end,
                confidence,
                words: Vec::new(),
            }),
            WireMessage::FinalTranscript {
                text,
                audio_start,
                audio_end,
                confidence,
                words,
            } => TransportEvent::Final(TranscriptPayload {
                text,
                audio_start,
                audio_end,
                confidence,
                words,
            }),
        }
    }
}

/// Outbound JSON envelope for one audio frame.
#[derive(Debug, Serialize)]
pub(crate) struct AudioEnvelope<'a> {
    pub audio_data: &'a str,
}

/// Parse one inbound text payload.
///
/// Accepts the `message_type`-tagged union, plus bare error objects
/// (`{"error": "..."}` or `{"error": {"code": .., "message": ..}}`).
pub fn parse_inbound(raw: &str) -> Result<TransportEvent, serde_json::Error> {
    let tagged = serde_json::from_str::<WireMessage>(raw);
    match tagged {
        Ok(msg) => Ok(msg.into()),
        Err(primary) => {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
                if let Some(err) = value.get("error") {
                    return Ok(match err {
                        serde_json::Value::String(message) => TransportEvent::Error {
                            code: None,
                            message: message.clone(),
                        },
                        serde_json::Value::Object(fields) => TransportEvent::Error {
                            code: fields.get("code").and_then(|c| c.as_u64()).map(|c| c as u32),
                            message: fields
                                .get("message")
                                .and_then(|m| m.as_str())
                                .unwrap_or_default()
                                .to_string(),
                        },
                        other => TransportEvent::Error {
                            code: None,
                            message: other.to_string(),
                        },
                    });
                }
            }
            Err(primary)
        }
    }
}
