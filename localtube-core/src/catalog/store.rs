use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::sqlite::configure_connection;

use super::models::{Comment, Video, VideoStatus};
use super::{StoreError, StoreResult};

const VIDEO_SCHEMA: &str = include_str!("../../../sql/videos.sql");

/// Upper bound on rows returned by listings.
pub const MAX_LISTING: usize = 1000;

/// Document-store contract the pipeline consumes.
///
/// The provided helpers are plain read-modify-write sequences over `find_by_id` and
/// `save`. Nothing guards them against a concurrent writer: two overlapping helpers
/// on the same video can lose one of the updates.
pub trait VideoStore: Send + Sync {
    /// Creates or overwrites by id.
    fn save(&self, video: &Video) -> StoreResult<Video>;
    fn find_by_id(&self, id: &str) -> StoreResult<Option<Video>>;
    fn find_all(&self) -> StoreResult<Vec<Video>>;
    fn find_by_status(&self, status: VideoStatus) -> StoreResult<Vec<Video>>;
    /// Title matches weigh twice as much as description matches.
    fn search(&self, query: &str) -> StoreResult<Vec<Video>>;
    fn update_status(&self, id: &str, status: VideoStatus) -> StoreResult<()>;
    fn delete(&self, id: &str) -> StoreResult<()>;

    fn add_quality(&self, id: &str, label: &str) -> StoreResult<bool> {
        let Some(mut video) = self.find_by_id(id)? else {
            return Ok(false);
        };
        if !video.add_quality(label) {
            return Ok(false);
        }
        self.save(&video)?;
        Ok(true)
    }

    fn update_metadata(
        &self,
        id: &str,
        width: u32,
        height: u32,
        duration_seconds: u32,
        file_size: u64,
    ) -> StoreResult<bool> {
        let Some(mut video) = self.find_by_id(id)? else {
            return Ok(false);
        };
        video.width = Some(width);
        video.height = Some(height);
        video.duration_seconds = Some(duration_seconds);
        video.file_size = Some(file_size);
        self.save(&video)?;
        Ok(true)
    }

    /// Status READY and the processed timestamp land in the same save.
    fn mark_ready(&self, id: &str) -> StoreResult<Video> {
        let mut video = self
            .find_by_id(id)?
            .ok_or_else(|| StoreError::NotFound {
                video_id: id.to_string(),
            })?;
        video.mark_ready(Utc::now());
        self.save(&video)
    }

    fn increment_views(&self, id: &str) -> StoreResult<bool> {
        let Some(mut video) = self.find_by_id(id)? else {
            return Ok(false);
        };
        video.views = video.views.saturating_add(1);
        self.save(&video)?;
        Ok(true)
    }

    fn increment_likes(&self, id: &str) -> StoreResult<bool> {
        let Some(mut video) = self.find_by_id(id)? else {
            return Ok(false);
        };
        video.likes = video.likes.saturating_add(1);
        self.save(&video)?;
        Ok(true)
    }

    fn add_comment(&self, id: &str, comment: Comment) -> StoreResult<Option<Comment>> {
        let Some(mut video) = self.find_by_id(id)? else {
            return Ok(None);
        };
        video.comments.push(comment.clone());
        self.save(&video)?;
        Ok(Some(comment))
    }
}

#[derive(Debug, Clone)]
pub struct SqliteVideoStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteVideoStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteVideoStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> StoreResult<SqliteVideoStore> {
        let path = self.path.ok_or(StoreError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(SqliteVideoStore { path, flags })
    }
}

#[derive(Debug, Clone)]
pub struct SqliteVideoStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteVideoStore {
    pub fn builder() -> SqliteVideoStoreBuilder {
        SqliteVideoStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        SqliteVideoStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> StoreResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            StoreError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| StoreError::OpenDatabase {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute_batch(VIDEO_SCHEMA)?;
        Ok(())
    }

    pub fn count_by_status(&self) -> StoreResult<Vec<(VideoStatus, usize)>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM videos GROUP BY status")?;
        let mut counts = Vec::new();
        for row in stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })? {
            let (status, count) = row?;
            if let Ok(status) = status.parse() {
                counts.push((status, count as usize));
            }
        }
        Ok(counts)
    }
}

impl VideoStore for SqliteVideoStore {
    fn save(&self, video: &Video) -> StoreResult<Video> {
        let conn = self.open()?;
        let qualities = serde_json::to_string(&video.qualities)?;
        let comments = serde_json::to_string(&video.comments)?;
        conn.execute(
            "INSERT INTO videos (
                id, title, description, filename, upload_path, hls_path, master_playlist_url,
                status, qualities, file_size, duration_seconds, width, height, views, likes,
                comments, uploaded_at, processed_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18
            )
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                filename = excluded.filename,
                upload_path = excluded.upload_path,
                hls_path = excluded.hls_path,
                master_playlist_url = excluded.master_playlist_url,
                status = excluded.status,
                qualities = excluded.qualities,
                file_size = excluded.file_size,
                duration_seconds = excluded.duration_seconds,
                width = excluded.width,
                height = excluded.height,
                views = excluded.views,
                likes = excluded.likes,
                comments = excluded.comments,
                uploaded_at = excluded.uploaded_at,
                processed_at = excluded.processed_at",
            params![
                &video.id,
                &video.title,
                &video.description,
                &video.filename,
                &video.upload_path,
                &video.hls_path,
                &video.master_playlist_url,
                video.status.as_str(),
                qualities,
                video.file_size.map(|size| size as i64),
                video.duration_seconds,
                video.width,
                video.height,
                video.views as i64,
                video.likes as i64,
                comments,
                video.uploaded_at.naive_utc(),
                video.processed_at.map(|dt| dt.naive_utc()),
            ],
        )?;
        Ok(video.clone())
    }

    fn find_by_id(&self, id: &str) -> StoreResult<Option<Video>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM videos WHERE id = ?1")?;
        let video = stmt.query_row([id], |row| Video::from_row(row)).optional()?;
        Ok(video)
    }

    fn find_all(&self) -> StoreResult<Vec<Video>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM videos ORDER BY uploaded_at DESC LIMIT ?1")?;
        let rows = stmt
            .query_map([MAX_LISTING as i64], |row| Video::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn find_by_status(&self, status: VideoStatus) -> StoreResult<Vec<Video>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM videos WHERE status = ?1 ORDER BY uploaded_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![status.as_str(), MAX_LISTING as i64], |row| {
                Video::from_row(row)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn search(&self, query: &str) -> StoreResult<Vec<Video>> {
        let terms = search_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let mut scored: Vec<(u32, Video)> = self
            .find_all()?
            .into_iter()
            .filter_map(|video| {
                let score = search_score(&video, &terms);
                (score > 0).then_some((score, video))
            })
            .collect();
        scored.sort_by(|(left_score, left), (right_score, right)| {
            right_score
                .cmp(left_score)
                .then_with(|| right.uploaded_at.cmp(&left.uploaded_at))
        });
        Ok(scored.into_iter().map(|(_, video)| video).collect())
    }

    fn update_status(&self, id: &str, status: VideoStatus) -> StoreResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE videos SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound {
                video_id: id.to_string(),
            });
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute("DELETE FROM videos WHERE id = ?1", [id])?;
        Ok(())
    }
}

pub(crate) fn search_terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|term| term.to_lowercase())
        .collect()
}

pub(crate) fn search_score(video: &Video, terms: &[String]) -> u32 {
    let title = video.title.to_lowercase();
    let description = video.description.to_lowercase();
    terms
        .iter()
        .map(|term| {
            let mut score = 0;
            if title.contains(term.as_str()) {
                score += 2;
            }
            if description.contains(term.as_str()) {
                score += 1;
            }
            score
        })
        .sum()
}
