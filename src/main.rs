use anyhow::{Context, Result};
use clap::Parser;
use speech_coach::audio::{CaptureConfig, CaptureKind, CaptureSourceFactory, ReplayPace};
use speech_coach::{CoachEvent, CoachingPipeline, Config};
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "speech-coach", about = "Live speech coaching over a streaming recognizer")]
struct Args {
    /// Config file name (config crate style, no extension)
    #[arg(long, default_value = "config/speech-coach")]
    config: String,

    /// WAV file replayed as the capture source (16kHz reachable by decimation)
    #[arg(long)]
    input: PathBuf,

    /// Replay as fast as possible instead of at wall-clock rate
    #[arg(long)]
    fast: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("{} starting", cfg.service.name);

    let capture_config = CaptureConfig {
        sample_rate: cfg.audio.sample_rate,
        channels: cfg.audio.channels,
        block_samples: cfg.audio.block_samples,
    };
    let pace = if args.fast {
        ReplayPace::Fast
    } else {
        ReplayPace::RealTime
    };
    let capture = CaptureSourceFactory::create(
        CaptureKind::WavFile {
            path: args.input,
            pace,
        },
        capture_config,
    )?;

    let mut pipeline = CoachingPipeline::new(cfg)?;
    let stop = pipeline.stop_handle();
    let mut events = pipeline
        .event_stream()
        .context("event stream already taken")?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping");
            stop.stop();
        }
    });

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                CoachEvent::PartialTranscript { text } => {
                    if !text.is_empty() {
                        print!("\r{}", text);
                        let _ = std::io::stdout().flush();
                    }
                }
                CoachEvent::SegmentFinalized { segment, cues } => {
                    println!("\r{}", segment.text);
                    for cue in cues {
                        println!("  tip: {}", cue.message);
                    }
                }
                CoachEvent::ConnectionInterrupted { attempt, delay } => {
                    println!("\n[connection interrupted, retry {} in {:?}]", attempt, delay);
                }
                CoachEvent::Ended { reason } => {
                    println!("\n[{}]", reason);
                }
            }
        }
    });

    let report = pipeline.run(capture).await?;
    let _ = printer.await;

    println!();
    println!("Transcript:");
    println!("{}", report.transcript);

    if !report.recent_cues.is_empty() {
        println!();
        println!("Recent coaching cues:");
        for cue in &report.recent_cues {
            println!("- {}", cue.message);
        }
    }

    info!(
        "Recorded {:.1}s: {} segments, {} frames encoded ({} dropped)",
        report.stats.duration_secs,
        report.stats.segments_finalized,
        report.stats.frames_encoded,
        report.stats.frames_dropped
    );

    Ok(())
}
