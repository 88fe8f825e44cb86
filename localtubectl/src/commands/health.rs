use std::fmt;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use localtube_core::{DiskSpaceSource, SystemDiskSpace};
use serde::Serialize;
use walkdir::WalkDir;

use crate::{AppContext, DisplayFallback, Result};

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for HealthEntry {
    fn display(&self) -> String {
        format!(
            "[{status}] {name}: {detail}",
            status = self.status,
            name = self.name,
            detail = self.detail
        )
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(HealthEntry::display)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl AppContext {
    pub(crate) fn health_check(&self) -> Result<Vec<HealthEntry>> {
        let config = self.config();
        let upload_dir = config.upload_dir();
        let hls_dir = config.hls_dir();

        let mut results = vec![
            check_path("localtube.toml", self.config_path()),
            self.check_database(),
            check_tool("ffmpeg", &config.transcoding.ffmpeg_path),
            check_tool("ffprobe", &config.transcoding.ffprobe_path),
            check_directory("uploads", &upload_dir),
            check_directory("hls", &hls_dir),
        ];
        results.push(check_usage("uploads usage", &upload_dir));
        results.push(check_usage("hls usage", &hls_dir));
        results.push(self.check_free_space(&SystemDiskSpace, &upload_dir));
        results.push(HealthEntry::ok(
            "ladder",
            config.transcoding.qualities.join(", "),
        ));
        Ok(results)
    }

    fn check_database(&self) -> HealthEntry {
        match self.sqlite().count_by_status() {
            Ok(counts) if counts.is_empty() => HealthEntry::ok("videos.sqlite", "no videos"),
            Ok(counts) => HealthEntry::ok(
                "videos.sqlite",
                counts
                    .iter()
                    .map(|(status, count)| format!("{status}={count}"))
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            Err(err) => HealthEntry::error("videos.sqlite", format!("unreadable: {err}")),
        }
    }

    fn check_free_space(&self, disk: &dyn DiskSpaceSource, path: &Path) -> HealthEntry {
        let reserved = self.config().storage.min_disk_free;
        match disk.available_space(path) {
            Ok(free) if free < reserved => HealthEntry::error(
                "free space",
                format!("{free} bytes free, below the {reserved} byte reserve"),
            ),
            Ok(free) if free < reserved.saturating_add(self.config().storage.max_file_size) => {
                HealthEntry::warn(
                    "free space",
                    format!("{free} bytes free, not enough for a maximum size upload"),
                )
            }
            Ok(free) => HealthEntry::ok("free space", format!("{free} bytes free")),
            Err(err) => HealthEntry::warn("free space", format!("query failed: {err}")),
        }
    }
}

fn check_path(name: &str, path: &Path) -> HealthEntry {
    if path.exists() {
        HealthEntry::ok(name, format!("{}", path.display()))
    } else {
        HealthEntry::error(name, format!("{} missing", path.display()))
    }
}

fn check_directory(name: &str, path: &Path) -> HealthEntry {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
        Ok(_) => HealthEntry::error(name, format!("{} is not a directory", path.display())),
        Err(_) => HealthEntry::error(name, format!("{} not found", path.display())),
    }
}

fn check_tool(name: &str, program: &Path) -> HealthEntry {
    let status = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => HealthEntry::ok(name, format!("{}", program.display())),
        Ok(status) => HealthEntry::error(
            name,
            format!("{} -version exited with {:?}", program.display(), status.code()),
        ),
        Err(err) => HealthEntry::error(name, format!("{} not runnable: {err}", program.display())),
    }
}

fn check_usage(name: &str, path: &Path) -> HealthEntry {
    let (files, bytes) = directory_usage(path);
    HealthEntry::ok(name, format!("{files} files, {bytes} bytes"))
}

pub(crate) fn directory_usage(path: &Path) -> (u64, u64) {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .fold((0, 0), |(files, bytes), meta| (files + 1, bytes + meta.len()))
}
