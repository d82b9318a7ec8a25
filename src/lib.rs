pub mod audio;
pub mod auth;
pub mod config;
pub mod feedback;
pub mod pipeline;
pub mod session;
pub mod transcript;

pub use audio::{
    frame_queue, sample_to_i16, CaptureConfig, CaptureKind, CaptureSource, CaptureSourceFactory,
    CapturedBlock, EncodedFrame, FrameProducer, PcmEncoder, PushOutcome, ReplayPace, WavFileSource,
};
pub use auth::{BrokerError, Credential, CredentialBroker};
pub use config::Config;
pub use feedback::{analyze_segment, Cue, CueKind, FeedbackEngine};
pub use pipeline::{CoachEvent, CoachingPipeline, PipelineReport, PipelineStats, StopHandle};
pub use session::{
    parse_inbound, AudioSender, AudioWireFormat, BackoffPolicy, FailureKind, HandshakeMode,
    SessionClose, SessionConfig, SessionError, SessionHandle, SessionState, StopMode,
    TranscriptionSession, TransportEvent,
};
pub use transcript::{
    FinalizedSegment, TerminationReason, TranscriptAggregator, TranscriptNotification,
};
