use std::fmt;

use serde::Serialize;

pub const FALLBACK_WIDTH: u32 = 1920;
pub const FALLBACK_HEIGHT: u32 = 1080;

/// What the media probe reported about a source file.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ProbeInfo {
    pub width: u32,
    pub height: u32,
    pub duration_seconds: u32,
    /// Set when the numbers are the fallback rather than a measurement.
    pub degraded: bool,
}

impl ProbeInfo {
    pub fn measured(width: u32, height: u32, duration_seconds: u32) -> Self {
        Self {
            width,
            height,
            duration_seconds,
            degraded: false,
        }
    }

    pub fn fallback() -> Self {
        Self {
            width: FALLBACK_WIDTH,
            height: FALLBACK_HEIGHT,
            duration_seconds: 0,
            degraded: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenditionOutcome {
    Succeeded,
    Failed { exit_code: Option<i32> },
    Cancelled,
}

impl RenditionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RenditionOutcome::Succeeded)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Ready {
        renditions: Vec<String>,
        degraded_probe: bool,
    },
    Failed {
        reason: String,
    },
    TimedOut,
}

impl JobOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, JobOutcome::Ready { .. })
    }
}

/// Identity of one running encoder invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProcessKey {
    pub video_id: String,
    pub label: String,
}

impl ProcessKey {
    pub fn new(video_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            label: label.into(),
        }
    }
}

impl fmt::Display for ProcessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.video_id, self.label)
    }
}
