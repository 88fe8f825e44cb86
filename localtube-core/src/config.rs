use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::catalog::{QualityProfile, STANDARD_LADDER};
use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LocaltubeConfig {
    pub storage: StorageSection,
    pub transcoding: TranscodingSection,
    #[serde(default)]
    pub encoder: EncoderSection,
    #[serde(default)]
    pub playback: PlaybackSection,
}

impl LocaltubeConfig {
    /// Relative paths are taken from `storage.base_dir`, not from the config file.
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.storage.base_dir).join(path)
        }
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.resolve_path(&self.storage.upload_dir)
    }

    pub fn hls_dir(&self) -> PathBuf {
        self.resolve_path(&self.storage.hls_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve_path(&self.storage.database_path)
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.upload_dir())?;
        std::fs::create_dir_all(self.hls_dir())?;
        if let Some(parent) = self.database_path().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.transcoding.segment_duration == 0 {
            return Err(ConfigError::Invalid {
                field: "transcoding.segment_duration",
                reason: "must be greater than zero".into(),
            });
        }
        if self.transcoding.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid {
                field: "transcoding.max_concurrent_jobs",
                reason: "must be greater than zero".into(),
            });
        }
        if let Some(unknown) = self
            .transcoding
            .qualities
            .iter()
            .find(|label| QualityProfile::by_label(label).is_none())
        {
            return Err(ConfigError::Invalid {
                field: "transcoding.qualities",
                reason: format!(
                    "unknown rung {unknown}, expected one of {}",
                    STANDARD_LADDER
                        .iter()
                        .map(|profile| profile.label)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
    pub upload_dir: String,
    pub hls_dir: String,
    pub database_path: String,
    pub max_file_size: u64,
    pub min_disk_free: u64,
    #[serde(default = "default_disk_cache_ttl_ms")]
    pub disk_cache_ttl_ms: u64,
    #[serde(default)]
    pub verify_upload_size: bool,
}

impl StorageSection {
    pub fn disk_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.disk_cache_ttl_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscodingSection {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
    pub segment_duration: u32,
    pub qualities: Vec<String>,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    pub job_timeout_seconds: Option<u64>,
    pub probe_timeout_seconds: Option<u64>,
}

impl TranscodingSection {
    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_seconds.map(Duration::from_secs)
    }

    pub fn probe_timeout(&self) -> Option<Duration> {
        self.probe_timeout_seconds.map(Duration::from_secs)
    }

    /// Enabled rungs in ladder order, regardless of the order they were listed in.
    pub fn profiles(&self) -> Vec<QualityProfile> {
        STANDARD_LADDER
            .iter()
            .filter(|profile| self.qualities.iter().any(|label| label == profile.label))
            .copied()
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EncoderSection {
    pub video_codec: String,
    pub preset: String,
    pub crf: u8,
    pub profile: String,
    pub level: String,
    pub pix_fmt: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub audio_sample_rate: u32,
}

impl Default for EncoderSection {
    fn default() -> Self {
        Self {
            video_codec: "libx264".into(),
            preset: "fast".into(),
            crf: 23,
            profile: "high".into(),
            level: "4.0".into(),
            pix_fmt: "yuv420p".into(),
            audio_codec: "aac".into(),
            audio_bitrate: "128k".into(),
            audio_sample_rate: 48_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackSection {
    pub hls_url_prefix: String,
}

impl Default for PlaybackSection {
    fn default() -> Self {
        Self {
            hls_url_prefix: "/hls".into(),
        }
    }
}

impl PlaybackSection {
    pub fn master_playlist_url(&self, video_id: &str) -> String {
        format!(
            "{}/{video_id}/master.m3u8",
            self.hls_url_prefix.trim_end_matches('/')
        )
    }
}

fn default_base_dir() -> String {
    ".".into()
}

fn default_disk_cache_ttl_ms() -> u64 {
    1_000
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_max_concurrent_jobs() -> usize {
    2
}

pub fn load_localtube_config<P: AsRef<Path>>(path: P) -> Result<LocaltubeConfig> {
    let config: LocaltubeConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [storage]
        base_dir = "/srv/localtube"
        upload_dir = "uploads"
        hls_dir = "/var/hls"
        database_path = "data/videos.sqlite"
        max_file_size = 5368709120
        min_disk_free = 1073741824

        [transcoding]
        segment_duration = 6
        qualities = ["1080p", "480p", "720p"]
    "#;

    #[test]
    fn parses_sections_with_defaults() {
        let config: LocaltubeConfig = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.upload_dir(), PathBuf::from("/srv/localtube/uploads"));
        assert_eq!(config.hls_dir(), PathBuf::from("/var/hls"));
        assert_eq!(config.storage.disk_cache_ttl(), Duration::from_secs(1));
        assert!(!config.storage.verify_upload_size);
        assert_eq!(config.transcoding.max_concurrent_jobs, 2);
        assert_eq!(config.transcoding.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.encoder.crf, 23);
        assert_eq!(
            config.playback.master_playlist_url("clip"),
            "/hls/clip/master.m3u8"
        );
    }

    #[test]
    fn profiles_follow_ladder_order() {
        let config: LocaltubeConfig = toml::from_str(SAMPLE).unwrap();
        let labels: Vec<_> = config
            .transcoding
            .profiles()
            .iter()
            .map(|profile| profile.label)
            .collect();
        assert_eq!(labels, vec!["480p", "720p", "1080p"]);
    }

    #[test]
    fn relative_paths_use_base_dir() {
        let config: LocaltubeConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(
            config.resolve_path("data/videos.sqlite"),
            PathBuf::from("/srv/localtube/data/videos.sqlite")
        );
        assert_eq!(config.resolve_path("/tmp/x"), PathBuf::from("/tmp/x"));

        let without_base: LocaltubeConfig =
            toml::from_str(&SAMPLE.replace(r#"base_dir = "/srv/localtube""#, "")).unwrap();
        assert_eq!(without_base.upload_dir(), PathBuf::from("./uploads"));
    }

    #[test]
    fn rejects_unknown_rung() {
        let mut config: LocaltubeConfig = toml::from_str(SAMPLE).unwrap();
        config.transcoding.qualities.push("1440p".into());
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "transcoding.qualities",
                ..
            }
        ));
    }
}
