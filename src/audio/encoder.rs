//! PCM encoding for the outbound audio path.
//!
//! This code runs once per captured block on the hot path between capture
//! and the frame queue. It must finish within the block's real-time budget:
//! no I/O, no waiting, and no per-block buffer growth once the encoder has
//! warmed up to the block size.

use base64::Engine;

/// An encoded audio frame ready for transport.
///
/// Carries little-endian 16-bit PCM. Base64 wrapping (when the wire format
/// wants it) happens on the consumer side of the queue, off the capture
/// path.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Capture-time sequence index, strictly increasing.
    pub sequence: u64,
    /// Little-endian i16 PCM bytes.
    pub payload: Vec<u8>,
    /// Milliseconds since capture started.
    pub timestamp_ms: u64,
}

/// Convert one floating-point sample to 16-bit signed PCM.
///
/// Linear scaling with clamping: 1.0 maps to 32767, -1.0 maps to -32768,
/// values outside [-1.0, 1.0] clamp rather than wrap.
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    let scaled = (sample * 32768.0) as i32;
    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Reusable PCM encoder.
///
/// Internal buffers are reused across blocks so steady-state encoding does
/// not allocate.
#[derive(Debug, Default)]
pub struct PcmEncoder {
    pcm: Vec<u8>,
    base64: String,
}

impl PcmEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size internal buffers for the given block size.
    pub fn with_block_capacity(block_samples: usize) -> Self {
        Self {
            pcm: Vec::with_capacity(block_samples * 2),
            base64: String::with_capacity(block_samples * 3),
        }
    }

    /// Encode a block of samples to little-endian 16-bit PCM.
    pub fn encode(&mut self, samples: &[f32]) -> &[u8] {
        self.pcm.clear();
        for &sample in samples {
            self.pcm.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
        }
        &self.pcm
    }

    /// Encode a block of samples and wrap the PCM bytes in base64.
    pub fn encode_base64(&mut self, samples: &[f32]) -> &str {
        self.encode(samples);
        self.base64.clear();
        base64::engine::general_purpose::STANDARD.encode_string(&self.pcm, &mut self.base64);
        &self.base64
    }

    /// Encode a block into an owned transport frame.
    pub fn encode_frame(&mut self, sequence: u64, timestamp_ms: u64, samples: &[f32]) -> EncodedFrame {
        let payload = self.encode(samples).to_vec();
        EncodedFrame {
            sequence,
            payload,
            timestamp_ms,
        }
    }
}
