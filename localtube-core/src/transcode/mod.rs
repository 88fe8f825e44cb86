mod encoder;
mod error;
mod ladder;
mod lifecycle;
mod metrics;
mod playlist;
mod probe;
mod types;

pub use encoder::{EncodeOrchestrator, ProcessRegistry, Registration};
pub use error::{TranscodeError, TranscodeResult};
pub use ladder::QualityLadder;
pub use lifecycle::{JobHandle, TranscodeDispatcher, TranscodePipeline};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use playlist::{
    compose_master, write_master, MASTER_PLAYLIST_NAME, RENDITION_PLAYLIST_NAME, SEGMENT_PATTERN,
};
pub use probe::{parse_probe_output, MediaProber};
pub use types::{
    JobOutcome, ProbeInfo, ProcessKey, RenditionOutcome, FALLBACK_HEIGHT, FALLBACK_WIDTH,
};
