use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::Word;

/// A committed transcript segment. Never revised after emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizedSegment {
    /// Transcribed text.
    pub text: String,

    /// Start of the covered audio range, milliseconds.
    pub audio_start: u64,

    /// End of the covered audio range, milliseconds.
    pub audio_end: u64,

    /// Confidence score (0.0 to 1.0).
    pub confidence: f32,

    /// Word-level detail, when the recognizer provided it.
    #[serde(default)]
    pub words: Vec<Word>,

    /// True when the segment was flushed from a pending partial at
    /// termination instead of being committed by the recognizer.
    pub best_effort: bool,

    /// When this segment was finalized locally.
    pub finalized_at: DateTime<Utc>,
}

/// Why the event stream ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationReason {
    /// The recognizer reported an error.
    RemoteError { code: Option<u32>, message: String },
    /// The stream closed with the given close code.
    Closed { code: u16, reason: String },
}

/// Notifications emitted to collaborators as events are merged.
#[derive(Debug, Clone)]
pub enum TranscriptNotification {
    /// The pending partial changed; carries the full replacement text.
    PartialUpdated { text: String },
    /// A segment was committed to the transcript.
    SegmentFinalized(FinalizedSegment),
    /// The stream ended. At most one per session.
    Terminated { reason: TerminationReason },
}
