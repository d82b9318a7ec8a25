pub mod capture;
pub mod encoder;
pub mod queue;
pub mod wav;

pub use capture::{CaptureConfig, CaptureKind, CaptureSource, CaptureSourceFactory, CapturedBlock, ReplayPace};
pub use encoder::{sample_to_i16, EncodedFrame, PcmEncoder};
pub use queue::{frame_queue, FrameProducer, PushOutcome};
pub use wav::WavFileSource;
