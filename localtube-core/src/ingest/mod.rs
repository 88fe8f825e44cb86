mod admission;
mod assembler;
mod error;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{VideoLibrary, VideoStore};
use crate::config::{LocaltubeConfig, PlaybackSection};
use crate::transcode::{JobHandle, TranscodeDispatcher};

pub use admission::{Admission, AdmissionGate, DiskSpaceSource, SystemDiskSpace};
pub use assembler::{format_progress, sanitize_filename, video_id_for, ChunkAssembler};
pub use error::{Denial, IngestError, IngestResult};

/// Declared shape of an upload, remembered between `init` and `complete`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UploadSession {
    pub video_id: String,
    pub filename: String,
    pub total_size: u64,
    pub total_chunks: u32,
    pub chunks_received: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChunkReceipt {
    pub chunk_index: u32,
    pub progress: f64,
    pub label: String,
}

/// Returned once transcoding has been queued.
#[derive(Debug)]
pub struct CompletedUpload {
    pub video_id: String,
    pub hls_url: String,
    pub job: JobHandle,
}

/// The init / chunk / complete surface in front of the pipeline.
pub struct UploadService {
    library: VideoLibrary,
    gate: Arc<AdmissionGate>,
    assembler: ChunkAssembler,
    dispatcher: TranscodeDispatcher,
    playback: PlaybackSection,
    verify_upload_size: bool,
    sessions: Mutex<HashMap<String, UploadSession>>,
}

impl std::fmt::Debug for UploadService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadService")
            .field("library", &self.library)
            .field("gate", &self.gate)
            .field("assembler", &self.assembler)
            .field("verify_upload_size", &self.verify_upload_size)
            .finish()
    }
}

impl UploadService {
    pub fn new(
        config: &LocaltubeConfig,
        store: Arc<dyn VideoStore>,
        disk: Arc<dyn DiskSpaceSource>,
    ) -> Self {
        let storage = &config.storage;
        let upload_dir = config.upload_dir();
        let gate = Arc::new(AdmissionGate::new(
            upload_dir.clone(),
            disk,
            storage.max_file_size,
            storage.min_disk_free,
            storage.disk_cache_ttl(),
        ));
        Self {
            library: VideoLibrary::new(Arc::clone(&store), config),
            assembler: ChunkAssembler::new(upload_dir, Arc::clone(&gate)),
            gate,
            dispatcher: TranscodeDispatcher::from_config(store, config),
            playback: config.playback.clone(),
            verify_upload_size: storage.verify_upload_size,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn library(&self) -> &VideoLibrary {
        &self.library
    }

    pub fn dispatcher(&self) -> &TranscodeDispatcher {
        &self.dispatcher
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Admits a new upload and registers its video with status UPLOADING.
    pub fn init(
        &self,
        filename: &str,
        total_size: u64,
        total_chunks: u32,
        title: Option<&str>,
        description: Option<&str>,
    ) -> IngestResult<UploadSession> {
        let sanitized = sanitize_filename(filename)?;
        if total_chunks == 0 {
            return Err(IngestError::InvalidChunk {
                index: 0,
                total: total_chunks,
            });
        }
        self.gate.check_file_size(total_size).into_result()?;
        self.gate.check_capacity_fresh(total_size).into_result()?;

        let video_id = video_id_for(&sanitized);
        self.library
            .create_video(&video_id, &sanitized, filename, title, description)?;
        let session = UploadSession {
            video_id,
            filename: sanitized.clone(),
            total_size,
            total_chunks,
            chunks_received: 0,
        };
        self.lock_sessions().insert(sanitized, session.clone());
        info!(
            video_id = %session.video_id,
            total_size,
            total_chunks,
            "upload initialised"
        );
        Ok(session)
    }

    pub async fn write_chunk(
        &self,
        filename: &str,
        chunk_index: u32,
        total_chunks: u32,
        bytes: &[u8],
    ) -> IngestResult<ChunkReceipt> {
        let progress = self
            .assembler
            .write_chunk(filename, chunk_index, total_chunks, bytes)
            .await?;
        let sanitized = sanitize_filename(filename)?;
        if let Some(session) = self.lock_sessions().get_mut(&sanitized) {
            session.chunks_received = chunk_index + 1;
        }
        Ok(ChunkReceipt {
            chunk_index,
            progress,
            label: format_progress(progress),
        })
    }

    /// Verifies the assembled file, persists PROCESSING and queues the job.
    /// Nothing stops the same upload from being completed, and transcoded, twice.
    pub async fn complete(&self, filename: &str) -> IngestResult<CompletedUpload> {
        let path = self.assembler.complete_upload(filename).await?;
        let sanitized = sanitize_filename(filename)?;
        let video_id = video_id_for(&sanitized);

        let session = self.lock_sessions().remove(&sanitized);
        if let Some(session) = session {
            self.check_size(&session, &path).await?;
        }

        let job = self.dispatcher.submit(&video_id, path)?;
        let hls_url = self.playback.master_playlist_url(&video_id);
        info!(video_id = %video_id, hls_url = %hls_url, "transcoding queued");
        Ok(CompletedUpload {
            video_id,
            hls_url,
            job,
        })
    }

    /// Kills the running encoder processes of a video. Status is left alone.
    pub fn cancel(&self, video_id: &str) -> usize {
        self.dispatcher.cancel(video_id)
    }

    pub fn sessions(&self) -> Vec<UploadSession> {
        let mut sessions: Vec<_> = self.lock_sessions().values().cloned().collect();
        sessions.sort_by(|left, right| left.filename.cmp(&right.filename));
        sessions
    }

    async fn check_size(&self, session: &UploadSession, path: &Path) -> IngestResult<()> {
        let actual = tokio::fs::metadata(path)
            .await
            .map_err(|err| IngestError::io(path, err))?
            .len();
        if actual == session.total_size {
            return Ok(());
        }
        warn!(
            video_id = %session.video_id,
            declared = session.total_size,
            actual,
            enforced = self.verify_upload_size,
            "assembled upload does not match declared size"
        );
        if self.verify_upload_size {
            self.lock_sessions()
                .insert(session.filename.clone(), session.clone());
            return Err(IngestError::SizeMismatch {
                declared: session.total_size,
                actual,
            });
        }
        Ok(())
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, UploadSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
