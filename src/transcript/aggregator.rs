use chrono::{DateTime, Utc};
use tracing::debug;

use crate::session::{TranscriptPayload, TransportEvent};

use super::segment::{FinalizedSegment, TerminationReason, TranscriptNotification};

/// Merges ordered transport events into a running transcript.
///
/// Single-writer: all events from one session arrive serialized, so no
/// locking is needed. The finalized list is append-only; replaying the same
/// event sequence into a fresh aggregator reproduces the same transcript.
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    session_id: Option<String>,
    finalized: Vec<FinalizedSegment>,
    pending: Option<TranscriptPayload>,
    last_event_at: Option<DateTime<Utc>>,
    terminated: bool,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one event, returning the notifications it produced.
    pub fn on_event(&mut self, event: TransportEvent) -> Vec<TranscriptNotification> {
        self.last_event_at = Some(Utc::now());

        match event {
            TransportEvent::SessionBegins { session_id, .. } => {
                // A new session continues the same transcript.
                self.session_id = Some(session_id);
                self.terminated = false;
                Vec::new()
            }

            TransportEvent::Partial(payload) => {
                if self.terminated {
                    debug!("Dropping partial after termination");
                    return Vec::new();
                }
                let text = payload.text.clone();
                self.pending = Some(payload);
                vec![TranscriptNotification::PartialUpdated { text }]
            }

            TransportEvent::Final(payload) => {
                if self.terminated {
                    debug!("Dropping final after termination");
                    return Vec::new();
                }
                self.pending = None;
                let segment = FinalizedSegment {
                    text: payload.text,
                    audio_start: payload.audio_start,
                    audio_end: payload.audio_end,
                    confidence: payload.confidence,
                    words: payload.words,
                    best_effort: false,
                    finalized_at: Utc::now(),
                };
                self.finalized.push(segment.clone());
                vec![TranscriptNotification::SegmentFinalized(segment)]
            }

            TransportEvent::Error { code, message } => {
                self.terminate(TerminationReason::RemoteError { code, message })
            }

            TransportEvent::Closed { code, reason } => {
                self.terminate(TerminationReason::Closed { code, reason })
            }
        }
    }

    /// Flush any pending partial as a best-effort segment and emit the
    /// terminal notification. Subsequent terminal events are ignored.
    fn terminate(&mut self, reason: TerminationReason) -> Vec<TranscriptNotification> {
        if self.terminated {
            return Vec::new();
        }
        self.terminated = true;

        let mut notifications = Vec::new();

        if let Some(pending) = self.pending.take() {
            if !pending.text.trim().is_empty() {
                let segment = FinalizedSegment {
                    text: pending.text,
                    audio_start: pending.audio_start,
                    audio_end: pending.audio_end,
                    // Never committed by the recognizer.
                    confidence: 0.0,
                    words: pending.words,
                    best_effort: true,
                    finalized_at: Utc::now(),
                };
                self.finalized.push(segment.clone());
                notifications.push(TranscriptNotification::SegmentFinalized(segment));
            }
        }

        notifications.push(TranscriptNotification::Terminated { reason });
        notifications
    }

    /// Stable view of the transcript so far: finalized text plus the
    /// current pending partial.
    pub fn current_transcript(&self) -> String {
        let mut parts: Vec<&str> = self.finalized.iter().map(|s| s.text.as_str()).collect();
        if let Some(pending) = &self.pending {
            if !pending.text.is_empty() {
                parts.push(pending.text.as_str());
            }
        }
        parts.join(" ")
    }

    pub fn finalized(&self) -> &[FinalizedSegment] {
        &self.finalized
    }

    pub fn pending_partial(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.text.as_str())
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        self.last_event_at
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}
