use std::path::{Path, PathBuf};

use tokio::fs;

use crate::catalog::QualityProfile;

use super::error::{TranscodeError, TranscodeResult};

pub const MASTER_PLAYLIST_NAME: &str = "master.m3u8";
pub const RENDITION_PLAYLIST_NAME: &str = "playlist.m3u8";
pub const SEGMENT_PATTERN: &str = "seg_%03d.ts";

/// Builds the master manifest. Rungs missing from `produced` are left out without a marker.
pub fn compose_master(profiles: &[QualityProfile], produced: &[String]) -> String {
    let mut playlist = String::new();
    playlist.push_str("#EXTM3U\n");
    playlist.push_str("#EXT-X-VERSION:3\n");
    for profile in profiles
        .iter()
        .filter(|profile| produced.iter().any(|label| label == profile.label))
    {
        playlist.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}\n",
            profile.bandwidth,
            profile.resolution()
        ));
        playlist.push_str(&format!("{}/{}\n", profile.label, RENDITION_PLAYLIST_NAME));
    }
    playlist
}

pub async fn write_master(output_dir: &Path, contents: &str) -> TranscodeResult<PathBuf> {
    let path = output_dir.join(MASTER_PLAYLIST_NAME);
    fs::write(&path, contents)
        .await
        .map_err(|source| TranscodeError::io(&path, source))?;
    Ok(path)
}
