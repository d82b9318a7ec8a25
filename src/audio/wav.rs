use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::capture::{CaptureConfig, CaptureSource, CapturedBlock, ReplayPace};

/// Channel depth between the reader task and the consumer. Keeps memory
/// bounded when the consumer falls behind during fast replay.
const BLOCK_CHANNEL_DEPTH: usize = 8;

/// Replays a WAV file as a sequence of fixed-size capture blocks.
///
/// The file is normalized up front to the target rate and mono layout, then
/// a reader task emits one block per rendering quantum, paced in real time
/// or as fast as the consumer drains them.
pub struct WavFileSource {
    path: PathBuf,
    config: CaptureConfig,
    pace: ReplayPace,
    capturing: Arc<AtomicBool>,
    reader_task: Option<JoinHandle<()>>,
}

impl WavFileSource {
    pub fn new(path: PathBuf, config: CaptureConfig, pace: ReplayPace) -> Self {
        Self {
            path,
            config,
            pace,
            capturing: Arc::new(AtomicBool::new(false)),
            reader_task: None,
        }
    }

    /// Read and normalize the whole file: decoded to f32, mixed to mono,
    /// decimated to the target sample rate.
    fn load_samples(&self) -> Result<Vec<f32>> {
        if self.config.channels != 1 {
            anyhow::bail!("WAV replay only produces mono output");
        }

        let reader = hound::WavReader::open(&self.path)
            .with_context(|| format!("Failed to open WAV file: {:?}", self.path))?;
        let spec = reader.spec();

        let raw: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Int, 16) => reader
                .into_samples::<i16>()
                .map(|s| s.map(|v| v as f32 / 32768.0))
                .collect::<Result<_, _>>()
                .context("Failed to decode 16-bit samples")?,
            (hound::SampleFormat::Float, 32) => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()
                .context("Failed to decode float samples")?,
            (format, bits) => {
                anyhow::bail!("unsupported WAV format: {:?} {}-bit", format, bits)
            }
        };

        let mono = match spec.channels {
            1 => raw,
            2 => stereo_to_mono(&raw),
            n => anyhow::bail!("unsupported channel count: {}", n),
        };

        let resampled = decimate(mono, spec.sample_rate, self.config.sample_rate)?;

        Ok(resampled)
    }
}

#[async_trait::async_trait]
impl CaptureSource for WavFileSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<CapturedBlock>> {
        let samples = self.load_samples()?;

        info!(
            "WAV replay source ready: {:?} ({} samples at {}Hz)",
            self.path,
            samples.len(),
            self.config.sample_rate
        );

        let (tx, rx) = mpsc::channel(BLOCK_CHANNEL_DEPTH);
        let capturing = Arc::clone(&self.capturing);
        capturing.store(true, Ordering::SeqCst);

        let block_samples = self.config.block_samples;
        let sample_rate = self.config.sample_rate as u64;
        let pace = self.pace;
        let block_duration = Duration::from_millis(block_samples as u64 * 1000 / sample_rate.max(1));

        let task = tokio::spawn(async move {
            let mut sequence: u64 = 0;
            let mut emitted: u64 = 0;

            for chunk in samples.chunks(block_samples) {
                if !capturing.load(Ordering::SeqCst) {
                    break;
                }

                let block = CapturedBlock {
                    sequence,
                    samples: chunk.to_vec(),
                    timestamp_ms: emitted * 1000 / sample_rate,
                };

                if tx.send(block).await.is_err() {
                    // Consumer went away, nothing left to replay into.
                    break;
                }

                sequence += 1;
                emitted += chunk.len() as u64;

                if pace == ReplayPace::RealTime {
                    tokio::time::sleep(block_duration).await;
                }
            }

            capturing.store(false, Ordering::SeqCst);
            info!("WAV replay finished ({} blocks)", sequence);
        });

        self.reader_task = Some(task);

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);

        if let Some(task) = self.reader_task.take() {
            // The reader may be parked on a full channel; cancel it outright.
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("WAV reader task panicked: {}", e);
                }
            }
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "wav-replay"
    }
}

/// Average interleaved stereo pairs down to mono.
fn stereo_to_mono(samples: &[f32]) -> Vec<f32> {
    samples
        .chunks_exact(2)
        .map(|pair| (pair[0] + pair[1]) / 2.0)
        .collect()
}

/// Downsample by decimation. Only integer ratios are supported; anything
/// else needs a proper resampler upstream of this source.
fn decimate(samples: Vec<f32>, source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    if source_rate == target_rate {
        return Ok(samples);
    }
    if source_rate < target_rate || source_rate % target_rate != 0 {
        anyhow::bail!(
            "cannot resample {}Hz to {}Hz by decimation",
            source_rate,
            target_rate
        );
    }

    let ratio = (source_rate / target_rate) as usize;
    Ok(samples.iter().step_by(ratio).copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_collapses_to_average() {
        let mono = stereo_to_mono(&[0.5, 0.3, -1.0, 1.0]);
        assert_eq!(mono, vec![0.4, 0.0]);
    }

    #[test]
    fn decimate_keeps_every_nth_sample() {
        let out = decimate(vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5], 48000, 16000).unwrap();
        assert_eq!(out, vec![0.0, 0.3]);
    }

    #[test]
    fn decimate_rejects_non_integer_ratio() {
        assert!(decimate(vec![0.0], 44100, 16000).is_err());
    }
}
