// Live Session Example: stream a WAV file to the recognizer in real time
//
// Demonstrates the pipeline wired by hand:
// 1. Exchange the API key for a short-lived session token
// 2. Open the streaming session (token in the connection URL by default)
// 3. Replay a WAV file as 80ms capture blocks, encoded to 16kHz PCM
// 4. Merge partial/final events into a running transcript
// 5. Derive coaching cues from each finalized segment
//
// Prerequisites:
// - A recognizer API key: export SPEECH_COACH_RECOGNIZER__API_KEY=...
// - A WAV file whose rate decimates to 16kHz (16/32/48kHz all work)
//
// Usage: cargo run --example live_session -- path/to/audio.wav

use anyhow::{Context, Result};
use speech_coach::audio::{
    frame_queue, CaptureConfig, CaptureKind, CaptureSourceFactory, PcmEncoder, ReplayPace,
};
use speech_coach::auth::CredentialBroker;
use speech_coach::feedback::FeedbackEngine;
use speech_coach::session::{SessionConfig, StopMode, TranscriptionSession};
use speech_coach::transcript::{TranscriptAggregator, TranscriptNotification};
use speech_coach::Config;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let wav_path = std::env::args()
        .nth(1)
        .context("usage: live_session <audio.wav>")?;
    let config = Config::load("config/speech-coach")?;
    let block_samples = config.audio.block_samples;

    // 1. Mint a session token
    let broker = CredentialBroker::new(
        config.recognizer.token_endpoint.clone(),
        config.recognizer.api_key.clone(),
    );
    let credential = broker
        .fetch_token(Duration::from_secs(config.recognizer.token_ttl_secs))
        .await?;
    info!("✅ Session token issued (expires {})", credential.expires_at());

    // 2. Start the capture source
    let capture_config = CaptureConfig {
        sample_rate: config.audio.sample_rate,
        channels: config.audio.channels,
        block_samples,
    };
    let mut capture = CaptureSourceFactory::create(
        CaptureKind::WavFile {
            path: wav_path.into(),
            pace: ReplayPace::RealTime,
        },
        capture_config,
    )?;
    let mut blocks = capture.start().await?;
    info!("✅ WAV replay started");

    // 3. Open the streaming session
    let (producer, frame_rx) = frame_queue(config.audio.queue_capacity);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let session = TranscriptionSession::new(SessionConfig::from_app_config(&config), credential);
    let handle = session.spawn(frame_rx, event_tx);
    let audio_tx = handle.audio_sender(producer);

    // 4. Pump capture blocks into the session
    let mut pump = tokio::spawn(async move {
        let mut encoder = PcmEncoder::with_block_capacity(block_samples);
        while let Some(block) = blocks.recv().await {
            let frame = encoder.encode_frame(block.sequence, block.timestamp_ms, &block.samples);
            if audio_tx.send(frame).is_err() {
                // Session reached a terminal state.
                break;
            }
        }
        audio_tx.dropped_frames()
    });

    // 5. Merge events live while the replay runs
    let mut aggregator = TranscriptAggregator::new();
    let mut feedback = FeedbackEngine::new(config.feedback.clone());
    let mut pump_done = false;
    let mut dropped = 0;

    loop {
        tokio::select! {
            result = &mut pump, if !pump_done => {
                dropped = result.unwrap_or(0);
                pump_done = true;
                info!("⏹️  Replay finished, closing the session");
                handle.stop(StopMode { drain: true });
            }

            maybe_event = event_rx.recv() => match maybe_event {
                None => break,
                Some(event) => {
                    for note in aggregator.on_event(event) {
                        match note {
                            TranscriptNotification::PartialUpdated { text } => {
                                if !text.is_empty() {
                                    info!("… {}", text);
                                }
                            }
                            TranscriptNotification::SegmentFinalized(segment) => {
                                info!("📝 {}", segment.text);
                                for cue in feedback.observe(
                                    &segment.text,
                                    segment.audio_start,
                                    segment.audio_end,
                                ) {
                                    info!("   tip: {}", cue.message);
                                }
                            }
                            TranscriptNotification::Terminated { reason } => {
                                info!("⏹️  Stream ended: {:?}", reason);
                            }
                        }
                    }
                }
            }
        }
    }

    let close = handle.join().await;
    info!("Session finished: {:?}", close);
    capture.stop().await?;

    println!();
    println!("Transcript:");
    println!("{}", aggregator.current_transcript());

    info!("🏁 Done ({} frames dropped)", dropped);

    Ok(())
}
