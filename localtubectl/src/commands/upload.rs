use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use localtube_core::transcode::JobOutcome;
use localtube_core::{SystemDiskSpace, UploadService, VideoStatus};
use serde::Serialize;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::info;

use crate::{AppContext, AppError, DisplayFallback, Result};

const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Local video file
    pub file: PathBuf,
    /// Filename announced to the server (defaults to the local file name)
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    /// Bytes per chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,
}

#[derive(Debug, Serialize)]
pub struct UploadReport {
    pub video_id: String,
    pub hls_url: String,
    pub bytes: u64,
    pub chunks: u32,
    pub status: VideoStatus,
    pub outcome: JobOutcome,
}

impl DisplayFallback for UploadReport {
    fn display(&self) -> String {
        let detail = match &self.outcome {
            JobOutcome::Ready {
                renditions,
                degraded_probe,
            } => {
                let mut detail = if renditions.is_empty() {
                    "no renditions produced".to_string()
                } else {
                    format!("renditions: {}", renditions.join(", "))
                };
                if *degraded_probe {
                    detail.push_str(" (probe degraded)");
                }
                detail
            }
            JobOutcome::Failed { reason } => format!("failed: {reason}"),
            JobOutcome::TimedOut => "timed out".to_string(),
        };
        format!(
            "{id}: {status} after {chunks} chunks ({bytes} bytes)\n  {detail}\n  playlist: {url}",
            id = self.video_id,
            status = self.status,
            chunks = self.chunks,
            bytes = self.bytes,
            url = self.hls_url,
        )
    }
}

/// Number of chunks needed for `size` bytes; an empty file still takes one.
pub fn chunk_count(size: u64, chunk_size: u64) -> Option<u32> {
    if chunk_size == 0 {
        return None;
    }
    let chunks = size.div_ceil(chunk_size).max(1);
    u32::try_from(chunks).ok()
}

impl AppContext {
    pub(crate) async fn upload(&self, args: &UploadArgs) -> Result<UploadReport> {
        let metadata = tokio::fs::metadata(&args.file).await?;
        if !metadata.is_file() {
            return Err(AppError::InvalidArgument(format!(
                "{} is not a file",
                args.file.display()
            )));
        }
        let name = match &args.name {
            Some(name) => name.clone(),
            None => args
                .file
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .ok_or_else(|| {
                    AppError::InvalidArgument(format!("{} has no file name", args.file.display()))
                })?,
        };
        let size = metadata.len();
        let chunks = chunk_count(size, args.chunk_size).ok_or_else(|| {
            AppError::InvalidArgument(format!(
                "chunk size {} is invalid for {size} bytes",
                args.chunk_size
            ))
        })?;

        let service = UploadService::new(self.config(), self.store(), Arc::new(SystemDiskSpace));
        let session = service.init(
            &name,
            size,
            chunks,
            args.title.as_deref(),
            args.description.as_deref(),
        )?;

        let mut file = File::open(&args.file).await?;
        let mut remaining = size;
        for index in 0..chunks {
            let length = remaining.min(args.chunk_size);
            let mut buffer = vec![0u8; length as usize];
            file.read_exact(&mut buffer).await?;
            remaining -= length;
            let receipt = service.write_chunk(&name, index, chunks, &buffer).await?;
            info!(video_id = %session.video_id, chunk = index, progress = %receipt.label, "chunk uploaded");
        }

        let completed = service.complete(&name).await?;
        info!(video_id = %completed.video_id, "waiting for transcoding");
        let video_id = completed.video_id.clone();
        let hls_url = completed.hls_url.clone();
        let outcome = completed.job.wait().await;
        let status = self
            .store()
            .find_by_id(&video_id)?
            .map(|video| video.status)
            .ok_or_else(|| AppError::NotFound(video_id.clone()))?;

        Ok(UploadReport {
            video_id,
            hls_url,
            bytes: size,
            chunks,
            status,
            outcome,
        })
    }
}
