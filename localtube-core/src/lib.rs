pub mod catalog;
pub mod config;
pub mod error;
pub mod ingest;
pub mod sqlite;
pub mod transcode;

pub use catalog::{
    Comment, QualityProfile, SqliteVideoStore, SqliteVideoStoreBuilder, StoreError, StoreResult,
    Video, VideoLibrary, VideoStatus, VideoStore, STANDARD_LADDER,
};
pub use config::{
    load_localtube_config, EncoderSection, LocaltubeConfig, PlaybackSection, StorageSection,
    TranscodingSection,
};
pub use error::{ConfigError, Result};
pub use ingest::{
    AdmissionGate, ChunkAssembler, ChunkReceipt, CompletedUpload, Denial, DiskSpaceSource,
    IngestError, IngestResult, SystemDiskSpace, UploadService, UploadSession,
};
pub use transcode::{
    EncodeOrchestrator, JobHandle, JobOutcome, MediaProber, MetricsSnapshot, ProbeInfo,
    ProcessKey, ProcessRegistry, QualityLadder, TranscodeDispatcher, TranscodeError,
    TranscodePipeline, TranscodeResult,
};
