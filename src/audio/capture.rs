use anyhow::Result;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// One audio rendering quantum from a capture source.
///
/// Samples are floating-point in [-1.0, 1.0]. The sequence index is
/// assigned at capture time and is strictly increasing; blocks are never
/// mutated after emission.
#[derive(Debug, Clone)]
pub struct CapturedBlock {
    /// Monotonic block index, starting at 0.
    pub sequence: u64,
    /// Mono samples for this quantum.
    pub samples: Vec<f32>,
    /// Milliseconds since capture started.
    pub timestamp_ms: u64,
}

/// Configuration for capture sources.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Target sample rate (sources resample if needed).
    pub sample_rate: u32,
    /// Target channel count (1 = mono).
    pub channels: u16,
    /// Samples per emitted block.
    pub block_samples: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000, // Recognizer expects 16kHz
            channels: 1,        // Mono
            block_samples: 1280, // 80ms blocks
        }
    }
}

/// Pacing for file-backed replay sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayPace {
    /// Emit blocks at wall-clock rate, as a live device would.
    RealTime,
    /// Emit blocks as fast as the consumer accepts them.
    Fast,
}

/// Audio capture source trait
///
/// Implementations deliver fixed-size blocks through a bounded channel and
/// never block the delivery path on downstream work.
#[async_trait::async_trait]
pub trait CaptureSource: Send {
    /// Start capturing audio.
    ///
    /// Returns a channel receiver that will receive captured blocks.
    async fn start(&mut self) -> Result<mpsc::Receiver<CapturedBlock>>;

    /// Stop capturing audio. Frame production ceases immediately.
    async fn stop(&mut self) -> Result<()>;

    /// Check if the source is currently capturing.
    fn is_capturing(&self) -> bool;

    /// Get source name for logging.
    fn name(&self) -> &str;
}

/// Capture source type.
#[derive(Debug, Clone)]
pub enum CaptureKind {
    /// Replay a WAV file (testing/batch processing).
    WavFile { path: PathBuf, pace: ReplayPace },
    /// Live microphone input.
    Microphone,
}

/// Capture source factory.
pub struct CaptureSourceFactory;

impl CaptureSourceFactory {
    /// Create a capture source for the requested kind.
    pub fn create(kind: CaptureKind, config: CaptureConfig) -> Result<Box<dyn CaptureSource>> {
        match kind {
            CaptureKind::WavFile { path, pace } => {
                let source = super::wav::WavFileSource::new(path, config, pace);
                Ok(Box::new(source))
            }

            CaptureKind::Microphone => {
                anyhow::bail!("microphone capture requires a platform audio backend, none is built in")
            }
        }
    }
}
