use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::audio::{frame_queue, CaptureSource, CapturedBlock, PcmEncoder, PushOutcome};
use crate::auth::CredentialBroker;
use crate::config::Config;
use crate::feedback::{Cue, FeedbackEngine};
use crate::session::{
    AudioSender, BackoffPolicy, SessionClose, SessionConfig, SessionState, StopMode,
    TranscriptionSession, TransportEvent,
};
use crate::transcript::{FinalizedSegment, TranscriptAggregator, TranscriptNotification};

/// Live notifications for collaborators (UI, analysis, storage).
#[derive(Debug, Clone)]
pub enum CoachEvent {
    /// The pending partial changed.
    PartialTranscript { text: String },
    /// A segment was committed, with the cues it produced.
    SegmentFinalized {
        segment: FinalizedSegment,
        cues: Vec<Cue>,
    },
    /// A transient failure; a reconnect follows after `delay`.
    ConnectionInterrupted { attempt: u32, delay: Duration },
    /// The pipeline finished, cleanly or not.
    Ended { reason: String },
}

/// Statistics about a completed pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub recording_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub frames_encoded: u64,
    pub frames_dropped: u64,
    pub segments_finalized: usize,
    pub reconnect_attempts: u32,
}

/// Final output of a pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    pub transcript: String,
    pub segments: Vec<FinalizedSegment>,
    pub recent_cues: Vec<Cue>,
    pub stats: PipelineStats,
}

/// Requests a pipeline stop from another task.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

/// Wires capture, encoding, the transcription session, the aggregator and
/// the feedback engine into one run.
///
/// The pipeline owns the reconnect loop: a failed session is re-armed with
/// a fresh credential under bounded exponential backoff, while capture and
/// the accumulated transcript carry on across attempts.
pub struct CoachingPipeline {
    config: Config,
    broker: CredentialBroker,
    recording_id: String,
    events_tx: mpsc::UnboundedSender<CoachEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<CoachEvent>>,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl CoachingPipeline {
    pub fn new(config: Config) -> Result<Self> {
        if config.recognizer.api_key.trim().is_empty() {
            bail!("recognizer API key is not configured (set SPEECH_COACH_RECOGNIZER__API_KEY)");
        }

        let broker = CredentialBroker::new(
            config.recognizer.token_endpoint.clone(),
            config.recognizer.api_key.clone(),
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        Ok(Self {
            config,
            broker,
            recording_id: format!("recording-{}", uuid::Uuid::new_v4()),
            events_tx,
            events_rx: Some(events_rx),
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        })
    }

    pub fn recording_id(&self) -> &str {
        &self.recording_id
    }

    /// Receiver for live notifications. Yields `None` after the first call.
    pub fn event_stream(&mut self) -> Option<mpsc::UnboundedReceiver<CoachEvent>> {
        self.events_rx.take()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: Arc::clone(&self.stop_tx),
        }
    }

    /// Run the pipeline until the capture source is exhausted, a stop is
    /// requested, or a fatal error occurs. Capture and session resources
    /// are released on every exit path.
    pub async fn run(mut self, mut capture: Box<dyn CaptureSource>) -> Result<PipelineReport> {
        let started_at = Utc::now();
        info!(
            "Starting coaching pipeline {} (source: {})",
            self.recording_id,
            capture.name()
        );

        let capture_rx = capture.start().await.context("could not start audio capture")?;
        let capture_rx = Arc::new(Mutex::new(capture_rx));

        // Single consumer for all session events, across reconnects.
        let (agg_tx, agg_rx) = mpsc::unbounded_channel::<TransportEvent>();
        let agg_task = spawn_aggregation(
            agg_rx,
            FeedbackEngine::new(self.config.feedback.clone()),
            self.events_tx.clone(),
        );

        let frames_encoded = Arc::new(AtomicU64::new(0));
        let mut frames_dropped: u64 = 0;
        let mut reconnects: u32 = 0;
        let mut attempt: u32 = 0;
        let backoff = BackoffPolicy::from_config(&self.config.retry);
        let session_config = SessionConfig::from_app_config(&self.config);
        let token_ttl = Duration::from_secs(self.config.recognizer.token_ttl_secs);
        let mut stop_rx = self.stop_rx.clone();

        let outcome: Result<String> = loop {
            if *stop_rx.borrow() {
                break Ok("stop requested".to_string());
            }

            // Every attempt runs on a fresh credential; tokens are never
            // reused past a session.
            let credential = match self.broker.fetch_token(token_ttl).await {
                Ok(credential) => credential,
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    match backoff.delay(attempt) {
                        Some(delay) => {
                            warn!("Token request failed ({}), retrying in {:?}", e, delay);
                            let _ = self
                                .events_tx
                                .send(CoachEvent::ConnectionInterrupted { attempt, delay });
                            if sleep_or_stop(delay, &mut stop_rx).await {
                                break Ok("stop requested".to_string());
                            }
                            continue;
                        }
                        None => {
                            break Err(anyhow::Error::new(e)
                                .context("connection interrupted: retries exhausted"))
                        }
                    }
                }
                Err(e) => break Err(anyhow::Error::new(e).context("could not start recording")),
            };

            let (producer, frame_rx) = frame_queue(self.config.audio.queue_capacity);
            let session = TranscriptionSession::new(session_config.clone(), credential);
            let handle = session.spawn(frame_rx, agg_tx.clone());
            let audio_tx = handle.audio_sender(producer);

            let pump = spawn_pump(
                Arc::clone(&capture_rx),
                audio_tx,
                handle.state_receiver(),
                Arc::clone(&frames_encoded),
                self.config.audio.block_samples,
                stop_rx.clone(),
            );

            let pump_end = pump.await.unwrap_or(PumpEnd {
                reason: PumpReason::SessionGone,
                dropped: 0,
            });
            frames_dropped += pump_end.dropped;

            let stopping = matches!(
                pump_end.reason,
                PumpReason::CaptureEnded | PumpReason::StopRequested
            );
            if stopping {
                handle.stop(StopMode {
                    drain: self.config.session.drain_on_stop,
                });
            }

            match handle.join().await {
                Ok(SessionClose::Stopped) => break Ok("recording stopped".to_string()),
                Ok(SessionClose::RemoteClosed) => {
                    break Ok("recognizer ended the session".to_string())
                }
                Ok(SessionClose::CredentialExpired) => {
                    if stopping {
                        break Ok("recording stopped".to_string());
                    }
                    info!("Re-arming session after credential expiry");
                    attempt = 0;
                    reconnects += 1;
                    continue;
                }
                Err(e) if stopping => {
                    warn!("Session ended with an error during shutdown: {}", e);
                    break Ok("recording stopped".to_string());
                }
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    match backoff.delay(attempt) {
                        Some(delay) => {
                            reconnects += 1;
                            warn!("Connection interrupted ({}), retrying in {:?}", e, delay);
                            let _ = self
                                .events_tx
                                .send(CoachEvent::ConnectionInterrupted { attempt, delay });
                            if sleep_or_stop(delay, &mut stop_rx).await {
                                break Ok("stop requested".to_string());
                            }
                            continue;
                        }
                        None => {
                            break Err(anyhow::Error::new(e)
                                .context("connection interrupted: retries exhausted"))
                        }
                    }
                }
                Err(e) => break Err(anyhow::Error::new(e).context("could not start recording")),
            }
        };

        // Resource release happens on every exit path, errors included.
        if let Err(e) = capture.stop().await {
            warn!("Failed to stop capture source: {}", e);
        }
        drop(agg_tx);

        let (aggregator, feedback) = match agg_task.await {
            Ok(state) => state,
            Err(e) => {
                warn!("Aggregation task failed: {}", e);
                (
                    TranscriptAggregator::new(),
                    FeedbackEngine::new(self.config.feedback.clone()),
                )
            }
        };

        let end_reason = match &outcome {
            Ok(reason) => reason.clone(),
            Err(e) => format!("{:#}", e),
        };
        let _ = self.events_tx.send(CoachEvent::Ended { reason: end_reason });

        outcome?;

        let stats = PipelineStats {
            recording_id: self.recording_id.clone(),
            started_at,
            duration_secs: (Utc::now() - started_at).num_milliseconds() as f64 / 1000.0,
            frames_encoded: frames_encoded.load(Ordering::Relaxed),
            frames_dropped,
            segments_finalized: aggregator.finalized().len(),
            reconnect_attempts: reconnects,
        };

        info!(
            "Pipeline complete: {} segments, {} frames encoded ({} dropped), {} reconnects",
            stats.segments_finalized, stats.frames_encoded, stats.frames_dropped, reconnects
        );

        Ok(PipelineReport {
            transcript: aggregator.current_transcript(),
            segments: aggregator.finalized().to_vec(),
            recent_cues: feedback.recent_cues().cloned().collect(),
            stats,
        })
    }
}

fn spawn_aggregation(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut feedback: FeedbackEngine,
    notify: mpsc::UnboundedSender<CoachEvent>,
) -> JoinHandle<(TranscriptAggregator, FeedbackEngine)> {
    tokio::spawn(async move {
        let mut aggregator = TranscriptAggregator::new();

        while let Some(event) = events.recv().await {
            for notification in aggregator.on_event(event) {
                match notification {
                    TranscriptNotification::PartialUpdated { text } => {
                        let _ = notify.send(CoachEvent::PartialTranscript { text });
                    }
                    TranscriptNotification::SegmentFinalized(segment) => {
                        let cues =
                            feedback.observe(&segment.text, segment.audio_start, segment.audio_end);
                        let _ = notify.send(CoachEvent::SegmentFinalized { segment, cues });
                    }
                    TranscriptNotification::Terminated { .. } => {
                        // Per-session terminal; the pipeline reports the
                        // overall end through CoachEvent::Ended.
                    }
                }
            }
        }

        (aggregator, feedback)
    })
}

enum PumpReason {
    CaptureEnded,
    StopRequested,
    SessionGone,
}

struct PumpEnd {
    reason: PumpReason,
    dropped: u64,
}

/// Encode captured blocks and hand them to the session without blocking.
///
/// One pump runs per session attempt; the capture receiver is shared so
/// audio keeps flowing into whichever session is current.
fn spawn_pump(
    capture_rx: Arc<Mutex<mpsc::Receiver<CapturedBlock>>>,
    audio_tx: AudioSender,
    mut session_state: watch::Receiver<SessionState>,
    frames_encoded: Arc<AtomicU64>,
    block_samples: usize,
    mut stop_rx: watch::Receiver<bool>,
) -> JoinHandle<PumpEnd> {
    tokio::spawn(async move {
        let mut encoder = PcmEncoder::with_block_capacity(block_samples);
        let mut rx = capture_rx.lock().await;

        let reason = loop {
            tokio::select! {
                maybe_block = rx.recv() => match maybe_block {
                    None => break PumpReason::CaptureEnded,
                    Some(block) => {
                        let frame =
                            encoder.encode_frame(block.sequence, block.timestamp_ms, &block.samples);
                        match audio_tx.send(frame) {
                            Ok(PushOutcome::Delivered) | Ok(PushOutcome::DroppedFull) => {
                                frames_encoded.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(PushOutcome::Disconnected) | Err(_) => break PumpReason::SessionGone,
                        }
                    }
                },

                result = stop_rx.wait_for(|stopped| *stopped) => {
                    let _ = result;
                    break PumpReason::StopRequested;
                }

                _ = session_state.wait_for(|s| s.is_terminal()) => {
                    break PumpReason::SessionGone;
                }
            }
        };

        PumpEnd {
            reason,
            dropped: audio_tx.dropped_frames(),
        }
    })
}

/// Sleep for the backoff delay, returning early (true) on a stop request.
async fn sleep_or_stop(delay: Duration, stop_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        result = stop_rx.wait_for(|stopped| *stopped) => result.is_ok(),
    }
}
