use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoStatus {
    Uploading,
    Processing,
    Ready,
    Failed,
    Deleted,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Uploading => "UPLOADING",
            VideoStatus::Processing => "PROCESSING",
            VideoStatus::Ready => "READY",
            VideoStatus::Failed => "FAILED",
            VideoStatus::Deleted => "DELETED",
        }
    }

    /// Terminal from the transcoding pipeline's point of view.
    pub fn terminal(&self) -> bool {
        matches!(
            self,
            VideoStatus::Ready | VideoStatus::Failed | VideoStatus::Deleted
        )
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UPLOADING" => Ok(VideoStatus::Uploading),
            "PROCESSING" => Ok(VideoStatus::Processing),
            "READY" => Ok(VideoStatus::Ready),
            "FAILED" => Ok(VideoStatus::Failed),
            "DELETED" => Ok(VideoStatus::Deleted),
            other => Err(format!("unknown video status: {other}")),
        }
    }
}

/// One rung of the rendition ladder.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct QualityProfile {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    /// Advertised in the master playlist `BANDWIDTH` attribute, bits per second.
    pub bandwidth: u64,
}

pub const STANDARD_LADDER: [QualityProfile; 4] = [
    QualityProfile {
        label: "480p",
        width: 854,
        height: 480,
        bandwidth: 1_500_000,
    },
    QualityProfile {
        label: "720p",
        width: 1280,
        height: 720,
        bandwidth: 3_000_000,
    },
    QualityProfile {
        label: "1080p",
        width: 1920,
        height: 1080,
        bandwidth: 6_000_000,
    },
    QualityProfile {
        label: "2160p",
        width: 3840,
        height: 2160,
        bandwidth: 25_000_000,
    },
];

impl QualityProfile {
    pub fn by_label(label: &str) -> Option<QualityProfile> {
        STANDARD_LADDER
            .iter()
            .find(|profile| profile.label == label)
            .copied()
    }

    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub likes: u64,
}

impl Comment {
    pub fn new(
        user_id: impl Into<String>,
        username: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            user_id: user_id.into(),
            username: username.into(),
            text: text.into(),
            created_at: Utc::now(),
            likes: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Video {
    pub id: String,
    pub title: String,
    pub description: String,
    pub filename: String,
    pub upload_path: String,
    pub hls_path: String,
    pub master_playlist_url: String,
    pub status: VideoStatus,
    pub qualities: Vec<String>,
    pub file_size: Option<u64>,
    pub duration_seconds: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub views: u64,
    pub likes: u64,
    pub comments: Vec<Comment>,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Video {
    pub fn new(id: impl Into<String>, title: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            filename: filename.into(),
            upload_path: String::new(),
            hls_path: String::new(),
            master_playlist_url: String::new(),
            status: VideoStatus::Uploading,
            qualities: Vec::new(),
            file_size: None,
            duration_seconds: None,
            width: None,
            height: None,
            views: 0,
            likes: 0,
            comments: Vec::new(),
            uploaded_at: Utc::now(),
            processed_at: None,
        }
    }

    /// Appends a rendition label, keeping production order. Returns false for duplicates.
    pub fn add_quality(&mut self, label: &str) -> bool {
        if self.qualities.iter().any(|existing| existing == label) {
            return false;
        }
        self.qualities.push(label.to_string());
        true
    }

    pub fn mark_ready(&mut self, at: DateTime<Utc>) {
        self.status = VideoStatus::Ready;
        self.processed_at = Some(at);
    }

    pub fn hls_url(&self) -> Option<&str> {
        (self.status == VideoStatus::Ready).then_some(self.master_playlist_url.as_str())
    }

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let uploaded_at: NaiveDateTime = row.get("uploaded_at")?;
        let processed_at: Option<NaiveDateTime> = row.get("processed_at")?;
        let qualities: Option<String> = row.get("qualities")?;
        let comments: Option<String> = row.get("comments")?;
        Ok(Self {
            id: row.get("id")?,
            title: row.get("title")?,
            description: row.get::<_, Option<String>>("description")?.unwrap_or_default(),
            filename: row.get("filename")?,
            upload_path: row.get("upload_path")?,
            hls_path: row.get("hls_path")?,
            master_playlist_url: row.get("master_playlist_url")?,
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or(VideoStatus::Failed),
            qualities: decode_json_column(qualities.as_deref(), 8)?,
            file_size: row.get::<_, Option<i64>>("file_size")?.map(|v| v.max(0) as u64),
            duration_seconds: row.get("duration_seconds")?,
            width: row.get("width")?,
            height: row.get("height")?,
            views: row.get::<_, Option<i64>>("views")?.unwrap_or(0).max(0) as u64,
            likes: row.get::<_, Option<i64>>("likes")?.unwrap_or(0).max(0) as u64,
            comments: decode_json_column(comments.as_deref(), 15)?,
            uploaded_at: Utc.from_utc_datetime(&uploaded_at),
            processed_at: processed_at.map(|dt| Utc.from_utc_datetime(&dt)),
        })
    }
}

fn decode_json_column<T>(raw: Option<&str>, index: usize) -> rusqlite::Result<Vec<T>>
where
    T: serde::de::DeserializeOwned,
{
    match raw {
        None => Ok(Vec::new()),
        Some(value) if value.trim().is_empty() => Ok(Vec::new()),
        Some(value) => serde_json::from_str(value).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                index,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        }),
    }
}
