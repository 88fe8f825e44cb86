use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::admission::{Admission, AdmissionGate};
use super::error::{IngestError, IngestResult};

fn unsafe_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]").expect("valid regex"))
}

fn repeated_underscores() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"_+").expect("valid regex"))
}

/// Maps a client filename onto the upload directory's naming rules.
///
/// Distinct raw names may sanitize to the same value; they then share one upload.
pub fn sanitize_filename(raw: &str) -> IngestResult<String> {
    let replaced = unsafe_chars().replace_all(raw, "_");
    let collapsed = repeated_underscores().replace_all(&replaced, "_");
    let trimmed = collapsed.trim_start_matches(['.', '_', '-']);
    if trimmed.is_empty() {
        return Err(IngestError::InvalidFilename(raw.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Video id for a sanitized filename: the name without its final extension.
pub fn video_id_for(sanitized: &str) -> String {
    match sanitized.rfind('.') {
        Some(index) if index > 0 => sanitized[..index].to_string(),
        _ => sanitized.to_string(),
    }
}

/// Appends ordered chunks into a single file under the upload directory.
#[derive(Debug, Clone)]
pub struct ChunkAssembler {
    upload_dir: PathBuf,
    gate: Arc<AdmissionGate>,
}

impl ChunkAssembler {
    pub fn new(upload_dir: impl Into<PathBuf>, gate: Arc<AdmissionGate>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            gate,
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn upload_path(&self, filename: &str) -> IngestResult<PathBuf> {
        Ok(self.upload_dir.join(sanitize_filename(filename)?))
    }

    /// Chunk 0 recreates the file, later chunks append. Chunks must arrive in
    /// index order; nothing is buffered or reordered. Returns the completion
    /// percentage after this chunk.
    pub async fn write_chunk(
        &self,
        filename: &str,
        chunk_index: u32,
        total_chunks: u32,
        bytes: &[u8],
    ) -> IngestResult<f64> {
        if total_chunks == 0 || chunk_index >= total_chunks {
            return Err(IngestError::InvalidChunk {
                index: chunk_index,
                total: total_chunks,
            });
        }
        let path = self.upload_path(filename)?;

        if let Admission::Denied(denial) = self.gate.check_capacity(bytes.len() as u64) {
            warn!(path = %path.display(), chunk_index, %denial, "chunk rejected, discarding partial upload");
            discard_partial(&path).await;
            return Err(IngestError::Denied(denial));
        }

        let mut options = OpenOptions::new();
        options.create(true);
        if chunk_index == 0 {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let mut file = options
            .open(&path)
            .await
            .map_err(|err| IngestError::io(&path, err))?;
        file.write_all(bytes)
            .await
            .map_err(|err| IngestError::io(&path, err))?;
        file.flush()
            .await
            .map_err(|err| IngestError::io(&path, err))?;

        let progress = f64::from(chunk_index + 1) / f64::from(total_chunks) * 100.0;
        debug!(
            path = %path.display(),
            chunk_index,
            total_chunks,
            bytes = bytes.len(),
            progress,
            "chunk written"
        );
        Ok(progress)
    }

    /// Hands back the assembled file. The byte count is not checked here.
    pub async fn complete_upload(&self, filename: &str) -> IngestResult<PathBuf> {
        let path = self.upload_path(filename)?;
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => {
                info!(path = %path.display(), bytes = metadata.len(), "upload assembled");
                Ok(path)
            }
            Ok(_) => Err(IngestError::MissingUpload(path)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(IngestError::MissingUpload(path))
            }
            Err(err) => Err(IngestError::io(&path, err)),
        }
    }

    /// Deletes whatever has been written so far for `filename`.
    pub async fn discard(&self, filename: &str) -> IngestResult<()> {
        let path = self.upload_path(filename)?;
        discard_partial(&path).await;
        Ok(())
    }
}

async fn discard_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "failed to delete partial upload"),
    }
}

/// `50.0%` style label used in upload responses.
pub fn format_progress(progress: f64) -> String {
    format!("{progress:.1}%")
}
