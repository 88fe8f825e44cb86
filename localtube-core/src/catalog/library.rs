use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{LocaltubeConfig, PlaybackSection};

use super::models::{Comment, Video, VideoStatus};
use super::store::VideoStore;
use super::StoreResult;

/// Read side and user-interaction side of the catalog.
#[derive(Clone)]
pub struct VideoLibrary {
    store: Arc<dyn VideoStore>,
    upload_dir: PathBuf,
    hls_dir: PathBuf,
    playback: PlaybackSection,
}

impl std::fmt::Debug for VideoLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoLibrary")
            .field("upload_dir", &self.upload_dir)
            .field("hls_dir", &self.hls_dir)
            .field("playback", &self.playback)
            .finish()
    }
}

impl VideoLibrary {
    pub fn new(store: Arc<dyn VideoStore>, config: &LocaltubeConfig) -> Self {
        Self {
            store,
            upload_dir: config.upload_dir(),
            hls_dir: config.hls_dir(),
            playback: config.playback.clone(),
        }
    }

    pub fn store(&self) -> Arc<dyn VideoStore> {
        Arc::clone(&self.store)
    }

    pub fn hls_dir_for(&self, video_id: &str) -> PathBuf {
        self.hls_dir.join(video_id)
    }

    /// Registers a fresh upload. An existing record with the same id is overwritten.
    pub fn create_video(
        &self,
        video_id: &str,
        stored_filename: &str,
        original_filename: &str,
        title: Option<&str>,
        description: Option<&str>,
    ) -> StoreResult<Video> {
        if let Some(existing) = self.store.find_by_id(video_id)? {
            warn!(
                video_id,
                status = %existing.status,
                "upload reuses an existing video id, previous record is replaced"
            );
        }
        let mut video = Video::new(
            video_id,
            title.unwrap_or(original_filename),
            original_filename,
        );
        video.description = description.unwrap_or_default().to_string();
        video.upload_path = path_string(&self.upload_dir.join(stored_filename));
        video.hls_path = path_string(&self.hls_dir_for(video_id));
        video.master_playlist_url = self.playback.master_playlist_url(video_id);
        let saved = self.store.save(&video)?;
        info!(video_id, "video registered");
        Ok(saved)
    }

    pub fn get(&self, video_id: &str) -> StoreResult<Option<Video>> {
        self.store.find_by_id(video_id)
    }

    pub fn list(&self) -> StoreResult<Vec<Video>> {
        self.store.find_all()
    }

    pub fn list_by_status(&self, status: VideoStatus) -> StoreResult<Vec<Video>> {
        self.store.find_by_status(status)
    }

    pub fn search(&self, query: &str) -> StoreResult<Vec<Video>> {
        self.store.search(query)
    }

    pub fn increment_views(&self, video_id: &str) -> StoreResult<bool> {
        self.store.increment_views(video_id)
    }

    pub fn increment_likes(&self, video_id: &str) -> StoreResult<bool> {
        self.store.increment_likes(video_id)
    }

    pub fn add_comment(
        &self,
        video_id: &str,
        user_id: &str,
        username: &str,
        text: &str,
    ) -> StoreResult<Option<Comment>> {
        self.store
            .add_comment(video_id, Comment::new(user_id, username, text))
    }

    /// Removes the upload file, the rendition tree and the record. Unknown ids are a no-op.
    pub fn delete_video(&self, video_id: &str) -> StoreResult<bool> {
        let Some(video) = self.store.find_by_id(video_id)? else {
            return Ok(false);
        };
        if !video.upload_path.is_empty() {
            remove_quietly(Path::new(&video.upload_path), false);
        }
        if !video.hls_path.is_empty() {
            remove_quietly(Path::new(&video.hls_path), true);
        }
        self.store.delete(video_id)?;
        info!(video_id, "video deleted");
        Ok(true)
    }
}

fn remove_quietly(path: &Path, directory: bool) {
    let result = if directory {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove video files"),
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
