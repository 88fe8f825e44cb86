use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::error::{TranscodeError, TranscodeResult};
use super::types::ProbeInfo;

/// Reads width, height and duration of the first video stream through ffprobe.
#[derive(Debug, Clone)]
pub struct MediaProber {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl MediaProber {
    pub fn new(program: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn args(source: &Path) -> Vec<String> {
        vec![
            "-v".into(),
            "error".into(),
            "-select_streams".into(),
            "v:0".into(),
            "-show_entries".into(),
            "stream=width,height,duration".into(),
            "-of".into(),
            "csv=p=0".into(),
            source.to_string_lossy().to_string(),
        ]
    }

    /// Unreadable output degrades to [`ProbeInfo::fallback`]. Only a tool that cannot be
    /// launched, or one that outlives the configured bound, is reported as an error.
    pub async fn probe(&self, source: &Path) -> TranscodeResult<ProbeInfo> {
        let mut command = Command::new(&self.program);
        command
            .kill_on_drop(true)
            .args(Self::args(source))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let output = match self.timeout {
            Some(limit) => timeout(limit, command.output())
                .await
                .map_err(|_| TranscodeError::ProbeTimeout(limit))?,
            None => command.output().await,
        }
        .map_err(|source| TranscodeError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            warn!(
                source = %source.display(),
                exit_code = output.status.code(),
                "ffprobe returned non-zero status"
            );
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_probe_output(&stdout) {
            Some(info) => {
                debug!(
                    source = %source.display(),
                    width = info.width,
                    height = info.height,
                    duration = info.duration_seconds,
                    "probed source"
                );
                Ok(info)
            }
            None => {
                warn!(
                    source = %source.display(),
                    output = %stdout.trim(),
                    "unreadable probe output, falling back to 1920x1080"
                );
                Ok(ProbeInfo::fallback())
            }
        }
    }
}

/// Parses `width,height[,duration]` from the first non-empty line.
///
/// Width and height are mandatory. A duration that is absent or not numeric
/// (ffprobe prints `N/A` for some containers) reads as zero.
pub fn parse_probe_output(stdout: &str) -> Option<ProbeInfo> {
    let line = stdout.lines().map(str::trim).find(|line| !line.is_empty())?;
    let mut parts = line.split(',').map(str::trim);
    let width = parts.next()?.parse::<u32>().ok()?;
    let height = parts.next()?.parse::<u32>().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    let duration = parts
        .next()
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value > 0.0)
        .map(|value| value.trunc() as u32)
        .unwrap_or(0);
    Some(ProbeInfo::measured(width, height, duration))
}
